//! Local host name lookup.
//!
//! Heartbeat files and access lists are keyed by the machine's DNS host name,
//! exactly as the worker agent writes it.

/// Returns the local host name, or `None` if the OS refuses to report one.
pub fn local_hostname() -> Option<String> {
    #[cfg(unix)]
    {
        let mut buf = [0u8; 256];
        // SAFETY: buf is a valid writable buffer of the given length; gethostname
        // writes at most buf.len() bytes.
        #[allow(unsafe_code)]
        let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
        if rc != 0 {
            return None;
        }
        let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
        parse_hostname_output(&buf[..end])
    }
    #[cfg(not(unix))]
    {
        // COMPUTERNAME is the NetBIOS name: upper-cased and cut at 15 characters.
        windows_dns_hostname().or_else(|| {
            std::env::var("COMPUTERNAME")
                .ok()
                .and_then(|name| parse_hostname_output(name.as_bytes()))
        })
    }
}

/// `hostname.exe` prints the DNS host name, as gethostname does.
#[cfg(windows)]
fn windows_dns_hostname() -> Option<String> {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    let output = std::process::Command::new("hostname")
        .creation_flags(CREATE_NO_WINDOW)
        .output()
        .map_err(|err| tracing::debug!(error = %err, "hostname command failed"))
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_hostname_output(&output.stdout)
}

#[cfg(not(any(unix, windows)))]
fn windows_dns_hostname() -> Option<String> {
    None
}

/// First non-empty line of `raw`, trimmed.
fn parse_hostname_output(raw: &[u8]) -> Option<String> {
    String::from_utf8_lossy(raw)
        .lines()
        .map(|line| line.trim_matches(|c: char| c.is_whitespace() || c == '\0'))
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_hostname_is_trimmed_and_non_empty() {
        if let Some(name) = local_hostname() {
            assert!(!name.is_empty());
            assert_eq!(name, name.trim());
            assert!(!name.contains('\0'));
        }
    }

    #[test]
    fn test_hostname_output_keeps_full_dns_name() {
        assert_eq!(
            parse_hostname_output(b"build-agent-workstation-17\r\n"),
            Some("build-agent-workstation-17".to_string())
        );
        assert_eq!(
            parse_hostname_output(b"\r\n  Build-07  \r\n"),
            Some("Build-07".to_string())
        );
    }

    #[test]
    fn test_blank_hostname_output_is_none() {
        assert_eq!(parse_hostname_output(b""), None);
        assert_eq!(parse_hostname_output(b" \r\n\0"), None);
    }
}
