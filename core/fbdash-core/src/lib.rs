//! # fbdash-core
//!
//! Core library for the build-farm dashboard: discovers live workers on the
//! brokerage share, enforces per-host access lists, keeps one dashboard per
//! install, and updates the installed dashboard from the share while a shadow
//! copy is running.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Periodic work runs on dedicated threads
//!   ([`schedule::PeriodicTask`]).
//! - **Graceful degradation**: An unreachable share or missing list file means
//!   empty results, not errors. Failures are logged and retried on the next tick.
//! - **Explicit seams**: the local worker ([`WorkerAgent`]) and process launching
//!   ([`ProcessLauncher`]) are traits so tests never touch real processes.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fbdash_core::{Brokerage, EventBus, WorkerPoolService};
//! use std::sync::Arc;
//!
//! let brokerage = Arc::new(Brokerage::new(Some("/mnt/brokerage".into())));
//! let pool = WorkerPoolService::new(brokerage, "BUILD-07", Arc::new(EventBus::new()));
//! pool.refresh();
//! println!("{:?}", pool.workers());
//! ```

pub mod brokerage;
pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod instance;
pub mod schedule;
pub mod shadow;
pub mod status;
pub mod storage;
pub mod update;
pub mod worker;

pub use brokerage::{
    is_worker_active, list_workers, resolve_pool, AccessPolicy, PolicyDecision, RefreshOutcome,
    WorkerPoolService, HEARTBEAT_TTL_SECS,
};
pub use config::{
    load_config, resolve_brokerage_path, validate_brokerage_path, Brokerage, DashboardConfig,
    ReplaceStrategy, BROKERAGE_ENV_VAR,
};
pub use error::{DiscoveryError, FarmError, Result};
pub use events::{DashboardEvent, EventBus};
pub use host::local_hostname;
pub use instance::{InstanceGuard, InstanceId};
pub use schedule::PeriodicTask;
pub use shadow::{
    CommandLauncher, LaunchMode, ProcessLauncher, RunContext, ShadowContext, ShadowSupervisor,
    SpawnSpec, Startup, SupervisorState,
};
pub use status::{TickOutcome, WorkerStatusMonitor};
pub use storage::StorageConfig;
pub use update::{SelfUpdater, UpdateOutcome};
pub use worker::{
    CoreState, CoreStatus, ProcessWorkerAgent, StatusTitle, WorkerAgent, WorkerMode,
};
