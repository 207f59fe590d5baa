//! Worker status header and access-list enforcement tick.

use std::sync::{Arc, Mutex};

use crate::brokerage::AccessPolicy;
use crate::events::{DashboardEvent, EventBus};
use crate::worker::{summarize_statuses, StatusTitle, WorkerAgent, WorkerMode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The previous tick was still running.
    Skipped,
    AgentNotRunning,
    Ticked {
        title: StatusTitle,
        title_changed: bool,
        mode_changed: Option<WorkerMode>,
    },
}

pub struct WorkerStatusMonitor {
    agent: Arc<dyn WorkerAgent>,
    policy: AccessPolicy,
    events: Arc<EventBus>,
    last_title: Mutex<Option<StatusTitle>>,
}

impl WorkerStatusMonitor {
    pub fn new(agent: Arc<dyn WorkerAgent>, policy: AccessPolicy, events: Arc<EventBus>) -> Self {
        Self {
            agent,
            policy,
            events,
            last_title: Mutex::new(None),
        }
    }

    /// Last published title, if any.
    pub fn title(&self) -> Option<StatusTitle> {
        self.last_title.lock().ok().and_then(|title| *title)
    }

    pub fn tick(&self) -> TickOutcome {
        let Ok(mut last_title) = self.last_title.try_lock() else {
            return TickOutcome::Skipped;
        };

        if !self.agent.is_running() {
            return TickOutcome::AgentNotRunning;
        }

        let title = summarize_statuses(&self.agent.core_statuses());
        let title_changed = *last_title != Some(title);
        if title_changed {
            *last_title = Some(title);
            self.events.publish(DashboardEvent::StatusChanged {
                title: title.as_str().to_string(),
            });
        }

        let mode_changed = self.policy.enforce(self.agent.as_ref());

        TickOutcome::Ticked {
            title,
            title_changed,
            mode_changed,
        }
    }
}
