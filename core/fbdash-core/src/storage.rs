//! Storage configuration and path management for the dashboard.
//!
//! `StorageConfig` centralizes every local path the dashboard writes to:
//!
//! - the app data root (`~/.fbdash/`) holding config, instance locks and logs
//! - the shadow root (`FBDashboard/` in a per-user location: the runtime or
//!   cache dir on Unix, `%TEMP%` on Windows) holding the disposable executable copy
//!
//! Brokerage paths live on the network share and are built by the modules that
//! read them (see [`crate::brokerage`] and [`crate::update`]), not here. The
//! shadow context sits beside the shadow executable (see [`crate::shadow`]).
//!
//! Tests use [`StorageConfig::with_roots`] to point both roots at temp dirs.

use std::path::{Path, PathBuf};

use crate::error::{FarmError, Result};

/// Subfolder of the system temp dir that receives shadow copies.
pub const SHADOW_DIR_NAME: &str = "FBDashboard";

/// Companion worker payload folder, next to the dashboard executable.
pub const WORKER_PAYLOAD_DIR: &str = "FBuild";

/// Stem of the worker agent executable inside [`WORKER_PAYLOAD_DIR`].
pub const WORKER_EXE_STEM: &str = "FBuildWorker";

/// Central configuration for all dashboard storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for dashboard data (default: ~/.fbdash)
    root: PathBuf,
    /// Per-user directory receiving shadow copies (default: <runtime|cache|%TEMP%>/FBDashboard)
    shadow_root: PathBuf,
}

impl StorageConfig {
    /// Production layout rooted at the user's home and temp directories.
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().ok_or(FarmError::HomeDirNotFound)?;
        #[cfg(unix)]
        let shadow_base = private_shadow_base(dirs::runtime_dir(), dirs::cache_dir(), &home);
        #[cfg(not(unix))]
        let shadow_base = std::env::temp_dir();
        Ok(Self {
            root: home.join(".fbdash"),
            shadow_root: shadow_base.join(SHADOW_DIR_NAME),
        })
    }

    /// Creates a StorageConfig with custom roots. Used for testing with temp directories.
    pub fn with_roots(root: PathBuf, shadow_root: PathBuf) -> Self {
        Self { root, shadow_root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn shadow_root(&self) -> &Path {
        &self.shadow_root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // App Data
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to config.toml (dashboard settings).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Directory of single-instance lock files.
    pub fn instances_dir(&self) -> PathBuf {
        self.root.join("instances")
    }

    /// Directory of rolling log files.
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Shadow Copy
    // ─────────────────────────────────────────────────────────────────────────────

    /// Where the shadow copy of `original_exe` is placed.
    ///
    /// Example: `/opt/farm/FBDashboard.exe` -> `<shadow_root>/FBDashboard.shadow.exe`
    pub fn shadow_exe_for(&self, original_exe: &Path) -> PathBuf {
        let stem = original_exe
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "fbdash".to_string());
        let file_name = match original_exe.extension() {
            Some(ext) => format!("{}.shadow.{}", stem, ext.to_string_lossy()),
            None => format!("{}.shadow", stem),
        };
        self.shadow_root.join(file_name)
    }
}

/// Per-user base for shadow copies on Unix, where the system temp dir is shared:
/// the runtime dir, else the cache dir, else `~/.cache`.
#[cfg(unix)]
fn private_shadow_base(runtime: Option<PathBuf>, cache: Option<PathBuf>, home: &Path) -> PathBuf {
    runtime
        .or(cache)
        .unwrap_or_else(|| home.join(".cache"))
}

/// Creates `dir` if needed and makes sure only the current user can use it.
///
/// Fails when the directory belongs to someone else: its content must never be
/// executed.
pub fn ensure_private_dir(dir: &Path) -> Result<()> {
    fs_err::create_dir_all(dir).map_err(|err| FarmError::io("creating shadow directory", err))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::{MetadataExt, PermissionsExt};

        let meta = fs_err::metadata(dir).map_err(|err| FarmError::io("inspecting shadow directory", err))?;
        // SAFETY: getuid has no preconditions and cannot fail.
        #[allow(unsafe_code)]
        let uid = unsafe { libc::getuid() };
        if meta.uid() != uid {
            return Err(FarmError::ForeignShadowDir(dir.to_path_buf()));
        }
        if meta.permissions().mode() & 0o077 != 0 {
            fs_err::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
                .map_err(|err| FarmError::io("restricting shadow directory", err))?;
        }
    }

    Ok(())
}

/// Worker agent executable file name for this platform (`FBuildWorker.exe` on Windows).
pub fn worker_exe_name() -> String {
    format!("{}{}", WORKER_EXE_STEM, std::env::consts::EXE_SUFFIX)
}

/// `<dir>/FBuild/FBuildWorker<exe>`
pub fn worker_exe_in(dir: &Path) -> PathBuf {
    dir.join(WORKER_PAYLOAD_DIR).join(worker_exe_name())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> StorageConfig {
        StorageConfig::with_roots(PathBuf::from("/data/.fbdash"), PathBuf::from("/tmp/FBDashboard"))
    }

    #[test]
    fn test_app_paths_hang_off_root() {
        let s = storage();
        assert_eq!(s.config_file(), PathBuf::from("/data/.fbdash/config.toml"));
        assert_eq!(s.instances_dir(), PathBuf::from("/data/.fbdash/instances"));
        assert_eq!(s.logs_dir(), PathBuf::from("/data/.fbdash/logs"));
    }

    #[test]
    fn test_shadow_exe_keeps_extension() {
        let s = storage();
        assert_eq!(
            s.shadow_exe_for(Path::new("/opt/farm/FBDashboard.exe")),
            PathBuf::from("/tmp/FBDashboard/FBDashboard.shadow.exe")
        );
        assert_eq!(
            s.shadow_exe_for(Path::new("/opt/farm/fbdash")),
            PathBuf::from("/tmp/FBDashboard/fbdash.shadow")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_shadow_base_prefers_per_user_dirs() {
        let home = Path::new("/home/ci");
        assert_eq!(
            private_shadow_base(Some("/run/user/1000".into()), Some("/home/ci/.cache".into()), home),
            PathBuf::from("/run/user/1000")
        );
        assert_eq!(
            private_shadow_base(None, Some("/home/ci/Library/Caches".into()), home),
            PathBuf::from("/home/ci/Library/Caches")
        );
        assert_eq!(
            private_shadow_base(None, None, home),
            PathBuf::from("/home/ci/.cache")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_private_dir_restricts_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("shadow");
        fs_err::create_dir_all(&dir).unwrap();
        fs_err::set_permissions(&dir, std::fs::Permissions::from_mode(0o777)).unwrap();

        ensure_private_dir(&dir).unwrap();

        let mode = fs_err::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_worker_exe_in_payload_dir() {
        let path = worker_exe_in(Path::new("/opt/farm"));
        assert!(path.starts_with("/opt/farm/FBuild"));
        assert!(path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with("FBuildWorker")));
    }
}
