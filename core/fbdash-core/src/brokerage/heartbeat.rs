//! Heartbeat liveness predicate.
//!
//! Each live worker host keeps touching `<pool>/<hostname>`. The file's
//! modification time is the only signal: no payload, no handshake.

use chrono::{DateTime, Duration, Utc};
use std::path::Path;

/// A heartbeat older than this marks the host as gone.
pub const HEARTBEAT_TTL_SECS: i64 = 120;

/// `modified + 2 minutes >= now` (inclusive at exactly 120 s).
pub fn is_heartbeat_fresh(modified: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    modified + Duration::seconds(HEARTBEAT_TTL_SECS) >= now
}

/// Last write time of a heartbeat file, if it can be read.
pub fn heartbeat_time(path: &Path) -> Option<DateTime<Utc>> {
    let metadata = fs_err::metadata(path).ok()?;
    let modified = metadata.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// True when `path` is a heartbeat written within the TTL.
///
/// Missing or unreadable files count as inactive.
pub fn is_worker_active(path: &Path, now: DateTime<Utc>) -> bool {
    heartbeat_time(path).is_some_and(|modified| is_heartbeat_fresh(modified, now))
}
