//! Startup state machine: single-instance check, then shadow hand-off.
//!
//! ```text
//! TopLevelPending ──guard denied──────────────────────────────▶ Terminated
//!        │
//!        ├── --no-shadow ───────────────────────────────────▶ DirectRunning
//!        ├── --shadow ──────────────────────────────────────▶ ShadowRunning
//!        └── otherwise ─▶ ShadowRequested ─copy+spawn────────▶ Terminated
//! ```
//!
//! The running dashboard is always a copy in temp storage, never the installed
//! file, so the installed file can be replaced underneath it.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use super::context::ShadowContext;
use super::spawn::{ProcessLauncher, SpawnSpec};
use super::with_shadow_marker;
use crate::error::{FarmError, Result};
use crate::instance::{InstanceGuard, InstanceId};
use crate::storage::{ensure_private_dir, worker_exe_in, StorageConfig, WORKER_PAYLOAD_DIR};

/// How this process was asked to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Normal launch of the installed executable.
    TopLevel,
    /// Run in place without a shadow copy (`--no-shadow`).
    NoShadow,
    /// Launched as a shadow copy (`--shadow`).
    Shadow,
}

impl LaunchMode {
    /// `--shadow` wins over `--no-shadow`.
    pub fn from_flags(shadow: bool, no_shadow: bool) -> Self {
        if shadow {
            LaunchMode::Shadow
        } else if no_shadow {
            LaunchMode::NoShadow
        } else {
            LaunchMode::TopLevel
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    TopLevelPending,
    ShadowRequested,
    ShadowRunning,
    DirectRunning,
    Terminated,
}

/// This process should keep running the dashboard.
#[derive(Debug)]
pub struct RunContext {
    pub guard: Arc<InstanceGuard>,
    /// Present only in a shadow process that found its hand-off record.
    pub shadow: Option<ShadowContext>,
}

#[derive(Debug)]
pub enum Startup {
    /// Another process already runs this install. Exit 0 without side effects.
    Duplicate,
    /// A shadow copy was launched. Exit 0 immediately.
    HandedOff { shadow_exe: PathBuf },
    Run(RunContext),
}

pub struct ShadowSupervisor<L: ProcessLauncher> {
    storage: StorageConfig,
    launcher: L,
    state: SupervisorState,
}

impl<L: ProcessLauncher> ShadowSupervisor<L> {
    pub fn new(storage: StorageConfig, launcher: L) -> Self {
        Self {
            storage,
            launcher,
            state: SupervisorState::TopLevelPending,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Runs the startup decision for `current_exe` launched with `args`
    /// (program name excluded).
    pub fn start(
        &mut self,
        current_exe: &Path,
        args: &[OsString],
        mode: LaunchMode,
    ) -> Result<Startup> {
        self.state = SupervisorState::TopLevelPending;

        let shadow_context = match mode {
            LaunchMode::Shadow => load_own_context(current_exe),
            _ => None,
        };

        // A shadow locks under its original's identity, so launching the
        // installed copy while its shadow runs is a duplicate.
        let install_path = shadow_context
            .as_ref()
            .map(|ctx| ctx.original_location.as_path())
            .unwrap_or(current_exe);
        let id = InstanceId::from_install_path(install_path);

        let Some(guard) = InstanceGuard::try_acquire(&self.storage.instances_dir(), &id)? else {
            tracing::info!(install = %install_path.display(), "Dashboard already running for this install");
            self.state = SupervisorState::Terminated;
            return Ok(Startup::Duplicate);
        };

        match mode {
            LaunchMode::NoShadow => {
                self.state = SupervisorState::DirectRunning;
                Ok(Startup::Run(RunContext {
                    guard: Arc::new(guard),
                    shadow: None,
                }))
            }
            LaunchMode::Shadow => {
                self.state = SupervisorState::ShadowRunning;
                Ok(Startup::Run(RunContext {
                    guard: Arc::new(guard),
                    shadow: shadow_context,
                }))
            }
            LaunchMode::TopLevel => {
                self.state = SupervisorState::ShadowRequested;
                let shadow_exe = self.hand_off(current_exe, args, guard)?;
                self.state = SupervisorState::Terminated;
                Ok(Startup::HandedOff { shadow_exe })
            }
        }
    }

    fn hand_off(
        &self,
        current_exe: &Path,
        args: &[OsString],
        guard: InstanceGuard,
    ) -> Result<PathBuf> {
        let shadow_exe = self.storage.shadow_exe_for(current_exe);
        // Whatever sits in the shadow root gets launched below.
        ensure_private_dir(self.storage.shadow_root())?;

        if let Err(err) = prepare_shadow_copy(current_exe, &shadow_exe) {
            tracing::info!(
                error = %err,
                shadow = %shadow_exe.display(),
                "Shadow copy not refreshed; another instance may be running it"
            );
        }

        let context_path = ShadowContext::path_beside(&shadow_exe)?;
        if let Err(err) = ShadowContext::new(current_exe).save(&context_path) {
            tracing::warn!(error = %err, "Failed to persist shadow context; shadow will not self-update");
        }

        // The shadow takes over coordination from here.
        guard.release();

        let shadow_dir = shadow_exe
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| FarmError::NoParentDir(shadow_exe.clone()))?;
        let working_dir = if worker_exe_in(&shadow_dir).is_file() {
            shadow_dir.clone()
        } else {
            std::env::current_dir().unwrap_or_else(|_| shadow_dir.clone())
        };

        let spec = SpawnSpec {
            program: shadow_exe.clone(),
            args: with_shadow_marker(args),
            working_dir,
        };

        match self.launcher.launch(&spec) {
            Ok(pid) => {
                tracing::info!(pid, shadow = %shadow_exe.display(), "Handed off to shadow process");
            }
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                tracing::info!(error = %err, "Shadow launch denied; another instance may be updating");
            }
            Err(err) => {
                return Err(FarmError::io(
                    format!("launching shadow {}", shadow_exe.display()),
                    err,
                ))
            }
        }

        Ok(shadow_exe)
    }
}

fn load_own_context(current_exe: &Path) -> Option<ShadowContext> {
    let path = ShadowContext::path_beside(current_exe).ok()?;
    match ShadowContext::load(&path) {
        Ok(context) => Some(context),
        Err(err) => {
            tracing::warn!(error = %err, "Shadow started without a usable context; self-update disabled");
            None
        }
    }
}

/// Copies the executable and its `FBuild/` payload (top-level files) into the shadow dir.
fn prepare_shadow_copy(current_exe: &Path, shadow_exe: &Path) -> io::Result<()> {
    if shadow_exe.exists() {
        fs_err::remove_file(shadow_exe)?;
    }
    let shadow_dir = shadow_exe
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "shadow path has no parent"))?;
    fs_err::create_dir_all(shadow_dir)?;
    fs_err::copy(current_exe, shadow_exe)?;

    let Some(install_dir) = current_exe.parent() else {
        return Ok(());
    };
    let payload_src = install_dir.join(WORKER_PAYLOAD_DIR);
    if !payload_src.is_dir() {
        return Ok(());
    }

    let payload_dst = shadow_dir.join(WORKER_PAYLOAD_DIR);
    fs_err::create_dir_all(&payload_dst)?;
    for entry in WalkDir::new(&payload_src)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        fs_err::copy(entry.path(), payload_dst.join(entry.file_name()))?;
    }
    Ok(())
}
