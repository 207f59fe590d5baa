//! Fixed-cadence background jobs.
//!
//! Each [`PeriodicTask`] owns one named thread. Ticks are scheduled from the
//! start time, not from job completion. A job that overruns its interval skips
//! the ticks it missed instead of queueing them, so a job never overlaps itself.

use std::io;
use std::ops::ControlFlow;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Handle to a running periodic job. Dropping it stops the job after the
/// current run without waiting for it.
pub struct PeriodicTask {
    name: String,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Starts `job` on its own thread every `interval`.
    ///
    /// With `run_immediately` the first run happens right away, otherwise after
    /// one interval. Returning `ControlFlow::Break` from the job ends the task.
    pub fn spawn<F>(
        name: impl Into<String>,
        interval: Duration,
        run_immediately: bool,
        mut job: F,
    ) -> io::Result<Self>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let name = name.into();
        let interval = interval.max(MIN_INTERVAL);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(format!("fbdash-{}", name))
            .spawn(move || {
                let mut next = Instant::now();
                if !run_immediately {
                    next += interval;
                }

                loop {
                    let wait = next.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    if job().is_break() {
                        tracing::debug!(task = %thread_name, "Periodic task finished");
                        break;
                    }

                    next += interval;
                    let now = Instant::now();
                    let mut skipped = 0u32;
                    while next <= now {
                        next += interval;
                        skipped += 1;
                    }
                    if skipped > 0 {
                        tracing::debug!(task = %thread_name, skipped, "Skipped overrun ticks");
                    }
                }
            })?;

        tracing::debug!(task = %name, interval_ms = interval.as_millis() as u64, "Periodic task started");
        Ok(Self {
            name,
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signals the task and waits for the in-flight run (if any) to finish.
    pub fn stop(mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!(task = %self.name, "Periodic task panicked");
            }
        }
    }

    fn signal_stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.signal_stop();
    }
}
