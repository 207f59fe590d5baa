//! Notifications published by the core to observers (the UI, the log sink).
//!
//! Each subscriber gets its own channel. Dropping the receiver unsubscribes;
//! the bus prunes dead senders on the next publish.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use crate::worker::WorkerMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DashboardEvent {
    /// The live worker list changed length.
    WorkerCountChanged { count: usize },
    /// The local worker status title changed ("Disabled", "Working", "Idle").
    StatusChanged { title: String },
    /// The access policy switched the local worker mode.
    ModeChanged { mode: WorkerMode },
}

#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<DashboardEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<DashboardEvent> {
        let (tx, rx) = mpsc::channel();
        self.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: DashboardEvent) {
        tracing::debug!(event = ?event, "Publishing dashboard event");
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<DashboardEvent>>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
