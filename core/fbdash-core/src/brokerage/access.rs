//! Per-host access overrides from the brokerage root.
//!
//! `blacklist.txt` and `whitelist.txt` hold one host name per line. A
//! blacklisted host has its worker forced off; a whitelisted host is forced
//! back to work-when-idle. Blacklist is consulted first and wins.
//!
//! This check is advisory. Any read failure means "leave the mode alone".

use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::config::Brokerage;
use crate::events::{DashboardEvent, EventBus};
use crate::worker::{WorkerAgent, WorkerMode};

pub const BLACKLIST_FILE: &str = "blacklist.txt";
pub const WHITELIST_FILE: &str = "whitelist.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Disable,
    WorkWhenIdle,
    NoChange,
}

impl PolicyDecision {
    pub fn desired_mode(self) -> Option<WorkerMode> {
        match self {
            PolicyDecision::Disable => Some(WorkerMode::Disabled),
            PolicyDecision::WorkWhenIdle => Some(WorkerMode::WorkWhenIdle),
            PolicyDecision::NoChange => None,
        }
    }
}

/// Exact, whole-line membership of `hostname` in the list at `path`.
/// A missing list is an empty list.
fn list_contains(path: &Path, hostname: &str) -> io::Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let content = decode_list(&fs_err::read(path)?);
    Ok(content.lines().any(|line| line == hostname))
}

/// Text of a list file. Honors a UTF-8 or UTF-16 byte order mark, as editors
/// on Windows write them; anything else is read as lossy UTF-8.
fn decode_list(bytes: &[u8]) -> String {
    fn utf16(body: &[u8], from_bytes: fn([u8; 2]) -> u16) -> String {
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|pair| from_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    }

    match bytes {
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
        [0xFF, 0xFE, rest @ ..] => utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => utf16(rest, u16::from_be_bytes),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn try_evaluate(brokerage: &Path, hostname: &str) -> io::Result<PolicyDecision> {
    if list_contains(&brokerage.join(BLACKLIST_FILE), hostname)? {
        return Ok(PolicyDecision::Disable);
    }
    if list_contains(&brokerage.join(WHITELIST_FILE), hostname)? {
        return Ok(PolicyDecision::WorkWhenIdle);
    }
    Ok(PolicyDecision::NoChange)
}

/// Decides the desired worker mode for `hostname`.
pub fn evaluate(brokerage: Option<&Path>, hostname: &str) -> PolicyDecision {
    let Some(brokerage) = brokerage.filter(|path| !path.as_os_str().is_empty()) else {
        return PolicyDecision::NoChange;
    };

    match try_evaluate(brokerage, hostname) {
        Ok(decision) => decision,
        Err(err) => {
            tracing::debug!(error = %err, "Access list check failed; leaving worker mode unchanged");
            PolicyDecision::NoChange
        }
    }
}

/// Pushes `decision` into the agent. Returns the new mode when it changed.
pub fn apply(agent: &dyn WorkerAgent, decision: PolicyDecision) -> Option<WorkerMode> {
    let desired = decision.desired_mode()?;
    if agent.mode() == desired {
        return None;
    }
    agent.set_mode(desired);
    Some(desired)
}

/// Access policy bound to the shared brokerage handle.
pub struct AccessPolicy {
    brokerage: Arc<Brokerage>,
    hostname: String,
    events: Arc<EventBus>,
}

impl AccessPolicy {
    pub fn new(brokerage: Arc<Brokerage>, hostname: impl Into<String>, events: Arc<EventBus>) -> Self {
        Self {
            brokerage,
            hostname: hostname.into(),
            events,
        }
    }

    pub fn evaluate(&self) -> PolicyDecision {
        evaluate(self.brokerage.path().as_deref(), &self.hostname)
    }

    /// Evaluates and applies the policy, publishing `ModeChanged` on a switch.
    pub fn enforce(&self, agent: &dyn WorkerAgent) -> Option<WorkerMode> {
        let changed = apply(agent, self.evaluate())?;
        tracing::info!(host = %self.hostname, mode = %changed, "Access list changed worker mode");
        self.events
            .publish(DashboardEvent::ModeChanged { mode: changed });
        Some(changed)
    }
}
