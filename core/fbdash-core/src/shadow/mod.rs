//! Shadow process hand-off.
//!
//! The installed executable may live on a network share and must stay
//! replaceable. The top-level process therefore copies itself into temp
//! storage, launches the copy with [`SHADOW_FLAG`], and exits. The copy (the
//! "shadow") runs the dashboard and is the only process that ever updates the
//! installed file.

mod context;
mod spawn;
mod supervisor;

pub use context::{ShadowContext, SHADOW_CONTEXT_FILE};
pub use spawn::{CommandLauncher, ProcessLauncher, SpawnSpec};
pub use supervisor::{LaunchMode, RunContext, ShadowSupervisor, Startup, SupervisorState};

#[cfg(test)]
pub(crate) use spawn::test_utils;

use std::ffi::OsString;

/// Reserved argument marking a shadow launch. Stripped before relaunching the original.
pub const SHADOW_FLAG: &str = "--shadow";

/// Runs the dashboard in place, without a shadow copy.
pub const NO_SHADOW_FLAG: &str = "--no-shadow";

/// `args` plus the shadow marker (added once).
pub fn with_shadow_marker(args: &[OsString]) -> Vec<OsString> {
    let mut out: Vec<OsString> = args.to_vec();
    if !out.iter().any(|arg| arg == SHADOW_FLAG) {
        out.push(OsString::from(SHADOW_FLAG));
    }
    out
}

/// `args` with every shadow marker removed; other arguments keep their order.
pub fn strip_shadow_marker(args: &[OsString]) -> Vec<OsString> {
    args.iter()
        .filter(|arg| arg.as_os_str() != SHADOW_FLAG)
        .cloned()
        .collect()
}
