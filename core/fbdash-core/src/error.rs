//! Error types for fbdash-core operations.
//!
//! Most of the coordination machinery degrades to "no data" instead of
//! failing, so these errors mostly surface at the edges: configuration
//! loading, shadow hand-off, and the one hard discovery failure.

use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════════════
// Discovery Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Why the worker pool of the local host could not be located.
///
/// Reported once per failed resolution. The periodic poll retries on its own
/// cadence, so callers should log and move on.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Brokerage path is not configured")]
    BrokerageUnset,

    #[error("Brokerage path unreachable: {path}: {source}")]
    BrokerageUnreachable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No versioned worker pool directories under {0}")]
    NoVersionDirectories(PathBuf),

    #[error("Unable to find the worker pool of host {hostname} under {pool_root}")]
    NoActivePool { pool_root: PathBuf, hostname: String },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Crate Error
// ═══════════════════════════════════════════════════════════════════════════════

/// All errors that can occur in fbdash-core operations.
#[derive(Debug, thiserror::Error)]
pub enum FarmError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Shadow / Supervisor Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Shadow context missing at {0}")]
    ShadowContextMissing(PathBuf),

    #[error("Shadow directory is owned by another user: {0}")]
    ForeignShadowDir(PathBuf),

    #[error("Executable path has no parent directory: {0}")]
    NoParentDir(PathBuf),

    // ─────────────────────────────────────────────────────────────────────
    // Discovery
    // ─────────────────────────────────────────────────────────────────────
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parsing error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FarmError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        FarmError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using FarmError.
pub type Result<T> = std::result::Result<T, FarmError>;

impl From<FarmError> for String {
    fn from(err: FarmError) -> String {
        err.to_string()
    }
}
