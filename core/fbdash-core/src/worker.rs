//! Worker agent collaborator interface.
//!
//! The build worker itself (`FBuildWorker`) is an external program. The core
//! only needs to ask whether it runs, read per-core status, switch its mode,
//! and stop it before its binary is replaced.

use std::fmt;
use std::sync::Mutex;

use sysinfo::System;

use crate::storage::WORKER_EXE_STEM;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerMode {
    Disabled,
    WorkWhenIdle,
    WorkAlways,
    WorkProportional,
}

impl fmt::Display for WorkerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerMode::Disabled => "disabled",
            WorkerMode::WorkWhenIdle => "work-when-idle",
            WorkerMode::WorkAlways => "work-always",
            WorkerMode::WorkProportional => "work-proportional",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreState {
    Disabled,
    Idle,
    Working,
}

/// Status of one worker core as reported by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStatus {
    pub state: CoreState,
    /// Host whose job occupies the core, when working.
    pub host: Option<String>,
}

impl CoreStatus {
    pub fn new(state: CoreState) -> Self {
        Self { state, host: None }
    }
}

/// Trait for the local worker agent.
///
/// Implementors should:
/// - Never panic; report "not running" / empty status on transient errors
/// - Treat `request_termination` as best effort
pub trait WorkerAgent: Send + Sync {
    fn is_running(&self) -> bool;

    fn mode(&self) -> WorkerMode;

    fn set_mode(&self, mode: WorkerMode);

    fn core_statuses(&self) -> Vec<CoreStatus>;

    /// Stop any locally running worker process (releases its file locks).
    fn request_termination(&self);
}

/// One-word summary of the worker cores shown in the status header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTitle {
    Disabled,
    Working,
    Idle,
}

impl StatusTitle {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusTitle::Disabled => "Disabled",
            StatusTitle::Working => "Working",
            StatusTitle::Idle => "Idle",
        }
    }
}

/// All disabled -> Disabled (including no cores), any working -> Working, else Idle.
pub fn summarize_statuses(statuses: &[CoreStatus]) -> StatusTitle {
    if statuses.iter().all(|s| s.state == CoreState::Disabled) {
        StatusTitle::Disabled
    } else if statuses.iter().any(|s| s.state == CoreState::Working) {
        StatusTitle::Working
    } else {
        StatusTitle::Idle
    }
}

/// Worker agent backed by the OS process table.
///
/// Detects and terminates `FBuildWorker` processes. Per-core status needs the
/// worker's own IPC channel, so this agent reports none.
pub struct ProcessWorkerAgent {
    mode: Mutex<WorkerMode>,
}

impl ProcessWorkerAgent {
    pub fn new(initial_mode: WorkerMode) -> Self {
        Self {
            mode: Mutex::new(initial_mode),
        }
    }

    fn is_worker_process(name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        let stem = WORKER_EXE_STEM.to_ascii_lowercase();
        lower == stem || lower == format!("{}.exe", stem)
    }

    fn snapshot() -> System {
        let mut sys = System::new();
        sys.refresh_processes();
        sys
    }
}

impl Default for ProcessWorkerAgent {
    fn default() -> Self {
        Self::new(WorkerMode::WorkWhenIdle)
    }
}

impl WorkerAgent for ProcessWorkerAgent {
    fn is_running(&self) -> bool {
        Self::snapshot()
            .processes()
            .values()
            .any(|process| Self::is_worker_process(process.name()))
    }

    fn mode(&self) -> WorkerMode {
        match self.mode.lock() {
            Ok(mode) => *mode,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_mode(&self, mode: WorkerMode) {
        match self.mode.lock() {
            Ok(mut current) => *current = mode,
            Err(poisoned) => *poisoned.into_inner() = mode,
        }
    }

    fn core_statuses(&self) -> Vec<CoreStatus> {
        Vec::new()
    }

    /// Only kills workers owned by the user running the dashboard.
    fn request_termination(&self) {
        let sys = Self::snapshot();
        let me = sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| sys.process(pid))
            .and_then(|process| process.user_id());
        if me.is_none() {
            tracing::warn!("Current user unknown; not terminating worker processes");
        }
        for (pid, process) in sys.processes() {
            if should_terminate(process.name(), process.user_id(), me) {
                let killed = process.kill();
                tracing::info!(pid = %pid, killed, "Terminating local worker process");
            } else if Self::is_worker_process(process.name()) {
                tracing::debug!(pid = %pid, "Skipping worker process of another user");
            }
        }
    }
}

/// A worker process is ours to stop only when both owners are known and equal.
fn should_terminate<U: PartialEq>(name: &str, owner: Option<U>, me: Option<U>) -> bool {
    ProcessWorkerAgent::is_worker_process(name)
        && matches!((owner, me), (Some(owner), Some(me)) if owner == me)
}
