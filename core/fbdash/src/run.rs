//! Dashboard runtime: startup hand-off, then the periodic tasks.

use std::ffi::OsString;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fbdash_core::{
    load_config, local_hostname, AccessPolicy, Brokerage, CommandLauncher, DashboardConfig,
    DashboardEvent, EventBus, LaunchMode, PeriodicTask, ProcessWorkerAgent, RunContext,
    SelfUpdater, ShadowSupervisor, Startup, StorageConfig, UpdateOutcome, WorkerAgent,
    WorkerPoolService, WorkerStatusMonitor,
};

const CONFIG_RELOAD_INTERVAL: Duration = Duration::from_secs(30);

pub fn run(
    mode: LaunchMode,
    storage: StorageConfig,
    config: DashboardConfig,
    config_path: PathBuf,
) -> Result<(), String> {
    let current_exe =
        std::env::current_exe().map_err(|e| format!("Failed to locate executable: {}", e))?;
    let args: Vec<OsString> = std::env::args_os().skip(1).collect();

    let mut supervisor = ShadowSupervisor::new(storage, CommandLauncher);
    let run_context = match supervisor
        .start(&current_exe, &args, mode)
        .map_err(String::from)?
    {
        Startup::Duplicate => return Ok(()),
        Startup::HandedOff { shadow_exe } => {
            tracing::info!(shadow = %shadow_exe.display(), "Handed off to shadow copy");
            return Ok(());
        }
        Startup::Run(context) => context,
    };

    tracing::info!(state = ?supervisor.state(), "Dashboard starting");
    Dashboard::start(run_context, config, config_path, args)?.wait();
    Ok(())
}

/// What the main thread waits on.
#[derive(Debug, PartialEq, Eq)]
enum Signal {
    Event(DashboardEvent),
    /// Leave now: an updated copy runs, or another dashboard owns the install.
    Exit,
}

/// Maps a self-update outcome to an exit request.
fn exit_signal(outcome: &UpdateOutcome) -> Option<Signal> {
    match outcome {
        UpdateOutcome::Relaunched { .. } => Some(Signal::Exit),
        UpdateOutcome::RelaunchFailed {
            guard_held: false, ..
        } => Some(Signal::Exit),
        _ => None,
    }
}

struct Dashboard {
    signals: mpsc::Receiver<Signal>,
    tasks: Vec<PeriodicTask>,
}

impl Dashboard {
    fn start(
        run_context: RunContext,
        config: DashboardConfig,
        config_path: PathBuf,
        args: Vec<OsString>,
    ) -> Result<Self, String> {
        let hostname = local_hostname().unwrap_or_else(|| {
            tracing::warn!("Host name unavailable; worker pool lookup will fail");
            String::new()
        });

        let brokerage = Arc::new(Brokerage::from_env(&config));
        let bus = Arc::new(EventBus::new());
        let agent: Arc<dyn WorkerAgent> = Arc::new(ProcessWorkerAgent::default());
        let (signal_tx, signals) = mpsc::channel();

        let events = bus.subscribe();
        let forward_tx = signal_tx.clone();
        thread::Builder::new()
            .name("fbdash-events".to_string())
            .spawn(move || {
                for event in events {
                    if forward_tx.send(Signal::Event(event)).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| format!("Failed to start event forwarder: {}", e))?;

        let pool = WorkerPoolService::new(Arc::clone(&brokerage), hostname.clone(), Arc::clone(&bus));
        let monitor = WorkerStatusMonitor::new(
            Arc::clone(&agent),
            AccessPolicy::new(Arc::clone(&brokerage), hostname, Arc::clone(&bus)),
            Arc::clone(&bus),
        );

        let spawn_err = |e: std::io::Error| format!("Failed to start background task: {}", e);
        let mut tasks = Vec::new();

        tasks.push(
            PeriodicTask::spawn(
                "discovery",
                Duration::from_secs(config.discovery_interval_secs),
                true,
                move || {
                    pool.refresh();
                    ControlFlow::Continue(())
                },
            )
            .map_err(spawn_err)?,
        );

        tasks.push(
            PeriodicTask::spawn(
                "status",
                Duration::from_millis(config.status_tick_ms),
                true,
                move || {
                    monitor.tick();
                    ControlFlow::Continue(())
                },
            )
            .map_err(spawn_err)?,
        );

        let reload_target = Arc::clone(&brokerage);
        tasks.push(
            PeriodicTask::spawn("config", CONFIG_RELOAD_INTERVAL, false, move || {
                reload_brokerage(&reload_target, &config_path);
                ControlFlow::Continue(())
            })
            .map_err(spawn_err)?,
        );

        // Only a shadow may update the installed file.
        if let Some(shadow) = run_context.shadow {
            let updater = SelfUpdater::new(
                Arc::clone(&brokerage),
                shadow.original_location,
                args,
                Arc::clone(&agent),
                Arc::new(CommandLauncher),
            )
            .with_guard(Arc::clone(&run_context.guard))
            .with_strategy(config.replace_strategy);

            tracing::info!(original = %updater.original().display(), "Self-update enabled");
            tasks.push(
                PeriodicTask::spawn(
                    "self-update",
                    Duration::from_secs(config.update_interval_secs),
                    true,
                    move || {
                        let outcome = updater.check_once();
                        tracing::debug!(outcome = ?outcome, "Self-update check done");
                        match exit_signal(&outcome) {
                            Some(signal) => {
                                let _ = signal_tx.send(signal);
                                ControlFlow::Break(())
                            }
                            None => ControlFlow::Continue(()),
                        }
                    },
                )
                .map_err(spawn_err)?,
            );
        }

        Ok(Self { signals, tasks })
    }

    /// Logs events until asked to exit. Returning ends the process, so the
    /// remaining tasks are only signalled, not joined.
    fn wait(self) {
        if wait_for_exit(&self.signals) {
            tracing::info!("Dashboard exiting");
        }
        for task in self.tasks {
            tracing::debug!(task = task.name(), "Stopping task");
            drop(task);
        }
    }
}

/// Blocks on `signals`, logging events, until `Exit` arrives (true) or every
/// sender is gone (false).
fn wait_for_exit(signals: &mpsc::Receiver<Signal>) -> bool {
    for signal in signals {
        match signal {
            Signal::Event(event) => log_event(&event),
            Signal::Exit => return true,
        }
    }
    false
}

fn reload_brokerage(brokerage: &Brokerage, config_path: &Path) {
    match load_config(config_path) {
        Ok(config) => {
            brokerage.reload(&config);
        }
        Err(err) => tracing::warn!(error = %err, "Config reload failed; keeping current brokerage"),
    }
}

fn log_event(event: &DashboardEvent) {
    match event {
        DashboardEvent::WorkerCountChanged { count } => {
            tracing::info!(count, "Live worker count changed")
        }
        DashboardEvent::StatusChanged { title } => {
            tracing::info!(title = %title, "Worker status changed")
        }
        DashboardEvent::ModeChanged { mode } => {
            tracing::info!(mode = %mode, "Worker mode changed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_relaunch_or_lost_lock_requests_exit() {
        let relaunched = UpdateOutcome::Relaunched {
            replaced: vec![PathBuf::from("/opt/farm/FBDashboard.exe")],
            pid: 7,
        };
        assert_eq!(exit_signal(&relaunched), Some(Signal::Exit));

        let lost = UpdateOutcome::RelaunchFailed {
            replaced: vec![],
            reason: "not found".to_string(),
            guard_held: false,
        };
        assert_eq!(exit_signal(&lost), Some(Signal::Exit));

        let retry = UpdateOutcome::RelaunchFailed {
            replaced: vec![],
            reason: "not found".to_string(),
            guard_held: true,
        };
        assert_eq!(exit_signal(&retry), None);
        assert_eq!(exit_signal(&UpdateOutcome::UpToDate), None);
    }

    #[test]
    fn test_exit_wakes_blocked_main_thread() {
        let (tx, rx) = mpsc::channel();
        let _keep_open = tx.clone();
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.send(Signal::Event(DashboardEvent::WorkerCountChanged { count: 3 }))
                .unwrap();
            tx.send(Signal::Exit).unwrap();
        });

        let started = Instant::now();
        assert!(wait_for_exit(&rx));
        assert!(started.elapsed() < Duration::from_secs(5));
        sender.join().unwrap();
    }

    #[test]
    fn test_exit_is_handled_before_later_events() {
        let (tx, rx) = mpsc::channel();
        tx.send(Signal::Exit).unwrap();
        tx.send(Signal::Event(DashboardEvent::WorkerCountChanged { count: 1 }))
            .unwrap();

        assert!(wait_for_exit(&rx));
        assert!(matches!(rx.try_recv(), Ok(Signal::Event(_))));
    }
}
