//! Versioned worker pool resolution and listing.
//!
//! # Layout
//!
//! ```text
//! <brokerage>/main/
//! ├── 21.windows/
//! │   ├── BUILD-01        # heartbeat files, one per live host
//! │   └── BUILD-02
//! └── 22.windows/
//!     └── BUILD-01
//! ```
//!
//! The number before the first `.` is the wire protocol version. Hosts move to
//! newer directories as their workers upgrade, so the local host's pool is the
//! highest version that holds a fresh heartbeat for it.
//!
//! # Enumeration Order
//!
//! Entries are enumerated in ordinal name order. Worker listing takes the
//! prefix of that order up to the first stale heartbeat, so hosts sorted after
//! a stale one are not reported even if they are alive.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::io;
use std::path::{Path, PathBuf};

use super::heartbeat::is_worker_active;
use crate::error::DiscoveryError;

/// Subdirectory of the brokerage root holding the versioned pools.
pub const WORKER_POOL_DIR: &str = "main";

/// Suffix of a versioned pool directory name.
pub const POOL_DIR_SUFFIX: &str = ".windows";

/// `<brokerage>/main`
pub fn pool_root(brokerage: &Path) -> PathBuf {
    brokerage.join(WORKER_POOL_DIR)
}

/// Protocol version of a pool directory name: the integer before the first `.`.
///
/// `"12.windows"` -> `Some(12)`, `"beta.windows"` -> `None`.
pub fn parse_pool_version(name: &str) -> Option<i64> {
    let prefix = name.split('.').next()?;
    prefix.parse().ok()
}

/// Orders pool directory names newest protocol first.
///
/// Numeric versions compare numerically (`12` ranks above `2`). Names whose
/// version doesn't parse rank below every numeric one and keep their relative
/// enumeration order.
pub fn order_pool_names(names: &mut [String]) {
    names.sort_by_key(|name| Reverse(parse_pool_version(name)));
}

/// Sorted names of the entries in `dir` accepted by `keep`.
fn enumerate_names(dir: &Path, keep: impl Fn(&Path) -> bool) -> io::Result<Vec<String>> {
    let mut names: Vec<String> = fs_err::read_dir(dir)?
        .flatten()
        .filter(|entry| keep(&entry.path()))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();
    Ok(names)
}

/// Versioned pool directories under `pool_root`, newest protocol first.
pub fn list_pool_dirs(pool_root: &Path) -> io::Result<Vec<String>> {
    let mut names = enumerate_names(pool_root, |path| path.is_dir())?;
    names.retain(|name| name.ends_with(POOL_DIR_SUFFIX));
    order_pool_names(&mut names);
    Ok(names)
}

/// Finds the pool directory the local host currently heartbeats into.
pub fn resolve_pool(
    brokerage: Option<&Path>,
    hostname: &str,
    now: DateTime<Utc>,
) -> Result<PathBuf, DiscoveryError> {
    let brokerage = brokerage
        .filter(|path| !path.as_os_str().is_empty())
        .ok_or(DiscoveryError::BrokerageUnset)?;
    let root = pool_root(brokerage);

    let versions = list_pool_dirs(&root).map_err(|source| DiscoveryError::BrokerageUnreachable {
        path: root.clone(),
        source,
    })?;

    if versions.is_empty() {
        return Err(DiscoveryError::NoVersionDirectories(root));
    }

    versions
        .iter()
        .map(|name| root.join(name))
        .find(|dir| {
            let host_file = dir.join(hostname);
            host_file.is_file() && is_worker_active(&host_file, now)
        })
        .ok_or_else(|| DiscoveryError::NoActivePool {
            pool_root: root,
            hostname: hostname.to_string(),
        })
}

/// Live worker names in `pool_dir`: the enumeration prefix before the first stale heartbeat.
pub fn try_list_workers(pool_dir: &Path, now: DateTime<Utc>) -> io::Result<Vec<String>> {
    let names = enumerate_names(pool_dir, |path| path.is_file())?;
    Ok(names
        .into_iter()
        .take_while(|name| is_worker_active(&pool_dir.join(name), now))
        .collect())
}

/// Like [`try_list_workers`] but an unreadable pool yields an empty list.
pub fn list_workers(pool_dir: &Path, now: DateTime<Utc>) -> Vec<String> {
    match try_list_workers(pool_dir, now) {
        Ok(workers) => workers,
        Err(err) => {
            tracing::debug!(error = %err, pool = %pool_dir.display(), "Worker pool unreadable");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::fs::File;
    use std::time::SystemTime;

    fn touch(path: &Path, modified: DateTime<Utc>) {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent).unwrap();
        }
        let file = File::create(path).unwrap();
        file.set_modified(SystemTime::from(modified)).unwrap();
    }

    #[test]
    fn test_parse_pool_version() {
        assert_eq!(parse_pool_version("12.windows"), Some(12));
        assert_eq!(parse_pool_version("2.windows"), Some(2));
        assert_eq!(parse_pool_version("beta.windows"), None);
        assert_eq!(parse_pool_version(".windows"), None);
    }

    #[test]
    fn test_versions_order_numerically_not_lexically() {
        let mut names = vec![
            "2.windows".to_string(),
            "12.windows".to_string(),
            "3.windows".to_string(),
        ];
        order_pool_names(&mut names);
        assert_eq!(names, vec!["12.windows", "3.windows", "2.windows"]);
    }

    #[test]
    fn test_unparseable_versions_rank_last_in_enumeration_order() {
        let mut names = vec![
            "x.windows".to_string(),
            "2.windows".to_string(),
            "a.windows".to_string(),
            "12.windows".to_string(),
        ];
        order_pool_names(&mut names);
        assert_eq!(
            names,
            vec!["12.windows", "2.windows", "x.windows", "a.windows"]
        );
    }

    #[test]
    fn test_resolve_picks_highest_version_with_active_host() {
        let temp = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let root = pool_root(temp.path());
        touch(&root.join("2.windows/HOST"), now);
        touch(&root.join("3.windows/HOST"), now);
        touch(&root.join("12.windows/OTHER"), now);

        let resolved = resolve_pool(Some(temp.path()), "HOST", now).unwrap();
        assert_eq!(resolved, root.join("3.windows"));
    }

    #[test]
    fn test_resolve_skips_stale_host_file() {
        let temp = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let root = pool_root(temp.path());
        touch(&root.join("12.windows/HOST"), now - Duration::seconds(600));
        touch(&root.join("2.windows/HOST"), now - Duration::seconds(10));

        let resolved = resolve_pool(Some(temp.path()), "HOST", now).unwrap();
        assert_eq!(resolved, root.join("2.windows"));
    }

    #[test]
    fn test_resolve_ignores_non_pool_directories() {
        let temp = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let root = pool_root(temp.path());
        touch(&root.join("99.linux/HOST"), now);

        let err = resolve_pool(Some(temp.path()), "HOST", now).unwrap_err();
        assert!(matches!(err, DiscoveryError::NoVersionDirectories(_)));
    }

    #[test]
    fn test_resolve_errors() {
        let temp = tempfile::tempdir().unwrap();
        let now = Utc::now();

        assert!(matches!(
            resolve_pool(None, "HOST", now),
            Err(DiscoveryError::BrokerageUnset)
        ));
        assert!(matches!(
            resolve_pool(Some(Path::new("")), "HOST", now),
            Err(DiscoveryError::BrokerageUnset)
        ));
        assert!(matches!(
            resolve_pool(Some(temp.path()), "HOST", now),
            Err(DiscoveryError::BrokerageUnreachable { .. })
        ));

        touch(&pool_root(temp.path()).join("5.windows/OTHER"), now);
        assert!(matches!(
            resolve_pool(Some(temp.path()), "HOST", now),
            Err(DiscoveryError::NoActivePool { .. })
        ));
    }

    #[test]
    fn test_list_workers_stops_at_first_inactive() {
        let temp = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let stale = now - Duration::seconds(121);
        touch(&temp.path().join("A"), now - Duration::seconds(5));
        touch(&temp.path().join("B"), now - Duration::seconds(119));
        touch(&temp.path().join("C"), stale);
        touch(&temp.path().join("D"), now);

        assert_eq!(list_workers(temp.path(), now), vec!["A", "B"]);
    }

    #[test]
    fn test_list_workers_ignores_subdirectories() {
        let temp = tempfile::tempdir().unwrap();
        let now = Utc::now();
        touch(&temp.path().join("A"), now);
        fs_err::create_dir_all(temp.path().join("AA")).unwrap();
        touch(&temp.path().join("B"), now);

        assert_eq!(list_workers(temp.path(), now), vec!["A", "B"]);
    }

    #[test]
    fn test_list_workers_missing_pool_is_empty() {
        let temp = tempfile::tempdir().unwrap();
        assert!(list_workers(&temp.path().join("gone"), Utc::now()).is_empty());
        assert!(try_list_workers(&temp.path().join("gone"), Utc::now()).is_err());
    }
}
