//! Polling service that keeps the live worker list current.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use super::pool::{list_workers, resolve_pool};
use crate::config::Brokerage;
use crate::events::{DashboardEvent, EventBus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A refresh was already in flight; this call did nothing.
    Skipped,
    Updated { count: usize, count_changed: bool },
}

#[derive(Debug, Default)]
struct ResolveState {
    /// Brokerage root the cached pool was resolved under.
    brokerage: Option<PathBuf>,
    /// Sticky once resolved; cleared only when the brokerage root changes.
    pool_path: Option<PathBuf>,
    last_error: Option<String>,
}

pub struct WorkerPoolService {
    brokerage: Arc<Brokerage>,
    hostname: String,
    events: Arc<EventBus>,
    resolve: Mutex<ResolveState>,
    workers: Mutex<Vec<String>>,
}

impl WorkerPoolService {
    pub fn new(brokerage: Arc<Brokerage>, hostname: impl Into<String>, events: Arc<EventBus>) -> Self {
        Self {
            brokerage,
            hostname: hostname.into(),
            events,
            resolve: Mutex::new(ResolveState::default()),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Current worker snapshot.
    pub fn workers(&self) -> Vec<String> {
        self.lock_workers().clone()
    }

    /// Pool directory resolved for the local host, if any.
    pub fn pool_path(&self) -> Option<PathBuf> {
        match self.resolve.lock() {
            Ok(state) => state.pool_path.clone(),
            Err(poisoned) => poisoned.into_inner().pool_path.clone(),
        }
    }

    /// Re-reads the pool. Overlapping calls are dropped, not queued.
    pub fn refresh(&self) -> RefreshOutcome {
        let mut state = match self.resolve.try_lock() {
            Ok(state) => state,
            Err(TryLockError::WouldBlock) => {
                tracing::debug!("Worker refresh already in flight; skipping");
                return RefreshOutcome::Skipped;
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        let brokerage = self.brokerage.path();
        if state.brokerage != brokerage {
            state.brokerage = brokerage.clone();
            state.pool_path = None;
            state.last_error = None;
        }

        let workers = match brokerage {
            None => Vec::new(),
            Some(root) => {
                let now = Utc::now();
                if state.pool_path.is_none() {
                    match resolve_pool(Some(&root), &self.hostname, now) {
                        Ok(path) => {
                            tracing::info!(
                                pool = %path.display(),
                                host = %self.hostname,
                                "Resolved worker pool"
                            );
                            state.pool_path = Some(path);
                            state.last_error = None;
                        }
                        Err(err) => {
                            let message = err.to_string();
                            if state.last_error.as_deref() != Some(message.as_str()) {
                                tracing::warn!(error = %message, "Worker pool discovery failed");
                                state.last_error = Some(message);
                            }
                        }
                    }
                }
                match &state.pool_path {
                    Some(path) => list_workers(path, now),
                    None => Vec::new(),
                }
            }
        };

        self.set_workers(workers)
    }

    fn set_workers(&self, workers: Vec<String>) -> RefreshOutcome {
        let count = workers.len();
        let count_changed = {
            let mut current = self.lock_workers();
            let changed = current.len() != count;
            *current = workers;
            changed
        };

        if count_changed {
            tracing::debug!(count, "Worker count changed");
            self.events
                .publish(DashboardEvent::WorkerCountChanged { count });
        }

        RefreshOutcome::Updated {
            count,
            count_changed,
        }
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<String>> {
        match self.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
