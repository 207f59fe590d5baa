//! Self-update of the installed dashboard from the brokerage share.
//!
//! Runs only inside a shadow process, so the file being replaced is never the
//! running executable.
//!
//! # Cycle
//!
//! 1. Canonical copy: `<brokerage>/FBDashboard/FBDashboard<exe>`. Missing means
//!    self-update is not deployed (or the share is down): nothing to do.
//! 2. Compare canonical and installed bytes (size first). Equal: nothing to do.
//! 3. Replace the installed file, then the `FBuild/FBuildWorker<exe>` companion
//!    when both sides have one.
//! 4. If anything was replaced: stop the local worker, release the instance
//!    lock, relaunch the installed executable, and let the caller exit.
//!    A failed relaunch retakes the lock and is retried on the next cycle.
//!
//! Any I/O error abandons the cycle without rollback. The next tick retries.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, TryLockError};

use crate::config::{Brokerage, ReplaceStrategy};
use crate::instance::InstanceGuard;
use crate::shadow::{strip_shadow_marker, ProcessLauncher, SpawnSpec};
use crate::storage::worker_exe_in;
use crate::worker::WorkerAgent;

/// Folder under the brokerage root holding the canonical dashboard build.
pub const CANONICAL_DIR: &str = "FBDashboard";
const CANONICAL_STEM: &str = "FBDashboard";

/// `<brokerage>/FBDashboard/FBDashboard<exe>`
pub fn canonical_exe(brokerage: &Path) -> PathBuf {
    brokerage.join(CANONICAL_DIR).join(format!(
        "{}{}",
        CANONICAL_STEM,
        std::env::consts::EXE_SUFFIX
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Another check was still running.
    Skipped,
    /// No brokerage or no canonical copy on it.
    NotConfigured,
    UpToDate,
    /// An I/O error stopped the cycle; retried on the next tick.
    Abandoned { reason: String },
    /// Files were replaced and the installed executable relaunched.
    /// The caller must now exit with status 0.
    Relaunched { replaced: Vec<PathBuf>, pid: u32 },
    /// Files were replaced but the relaunch failed. The relaunch is retried on
    /// the next cycle. When `guard_held` is false another dashboard took the
    /// instance lock meanwhile and the caller must exit.
    RelaunchFailed {
        replaced: Vec<PathBuf>,
        reason: String,
        guard_held: bool,
    },
}

/// Byte-for-byte equality. Sizes are compared first.
pub fn files_identical(a: &Path, b: &Path) -> io::Result<bool> {
    if fs_err::metadata(a)?.len() != fs_err::metadata(b)?.len() {
        return Ok(false);
    }
    Ok(fs_err::read(a)? == fs_err::read(b)?)
}

/// Overwrites `target` with the content of `source`.
pub fn replace_file(source: &Path, target: &Path, strategy: ReplaceStrategy) -> io::Result<()> {
    match strategy {
        ReplaceStrategy::DeleteThenCopy => {
            if target.exists() {
                fs_err::remove_file(target)?;
            }
            fs_err::copy(source, target)?;
        }
        ReplaceStrategy::AtomicRename => {
            let dir = target.parent().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "target has no parent directory")
            })?;
            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            let mut src = fs_err::File::open(source)?;
            io::copy(&mut src, tmp.as_file_mut())?;
            tmp.as_file().sync_all()?;
            fs_err::set_permissions(tmp.path(), fs_err::metadata(source)?.permissions())?;
            tmp.persist(target).map_err(|err| err.error)?;
        }
    }
    Ok(())
}

/// Replaces `target` when it differs from `source` (or is missing).
/// Returns true when a replacement happened.
fn sync_file(source: &Path, target: &Path, strategy: ReplaceStrategy) -> io::Result<bool> {
    if target.exists() && files_identical(source, target)? {
        return Ok(false);
    }
    replace_file(source, target, strategy)?;
    tracing::info!(
        source = %source.display(),
        target = %target.display(),
        "Replaced stale binary"
    );
    Ok(true)
}

pub struct SelfUpdater {
    brokerage: Arc<Brokerage>,
    original: PathBuf,
    startup_args: Vec<OsString>,
    agent: Arc<dyn WorkerAgent>,
    launcher: Arc<dyn ProcessLauncher>,
    guard: Option<Arc<InstanceGuard>>,
    strategy: ReplaceStrategy,
    /// Held for the whole cycle. Holds the files of a cycle whose relaunch failed.
    pending_relaunch: Mutex<Option<Vec<PathBuf>>>,
}

impl SelfUpdater {
    /// `original` is the installed executable recorded in the shadow context;
    /// `startup_args` are this process's arguments (program name excluded).
    pub fn new(
        brokerage: Arc<Brokerage>,
        original: PathBuf,
        startup_args: Vec<OsString>,
        agent: Arc<dyn WorkerAgent>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        Self {
            brokerage,
            original,
            startup_args,
            agent,
            launcher,
            guard: None,
            strategy: ReplaceStrategy::default(),
            pending_relaunch: Mutex::new(None),
        }
    }

    /// Instance lock released right before relaunching.
    pub fn with_guard(mut self, guard: Arc<InstanceGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_strategy(mut self, strategy: ReplaceStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn original(&self) -> &Path {
        &self.original
    }

    /// Runs one update cycle.
    pub fn check_once(&self) -> UpdateOutcome {
        let mut pending = match self.pending_relaunch.try_lock() {
            Ok(pending) => pending,
            Err(TryLockError::WouldBlock) => return UpdateOutcome::Skipped,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        let Some(root) = self.brokerage.path() else {
            return UpdateOutcome::NotConfigured;
        };
        let canonical = canonical_exe(&root);
        if !canonical.is_file() {
            tracing::debug!(canonical = %canonical.display(), "No canonical dashboard build");
            return UpdateOutcome::NotConfigured;
        }

        let replaced = match self.sync_binaries(&canonical) {
            Ok(replaced) => replaced,
            Err(err) => {
                tracing::info!(error = %err, "Self-update abandoned; target may be in use");
                return UpdateOutcome::Abandoned {
                    reason: err.to_string(),
                };
            }
        };

        let replaced = match pending.take() {
            Some(mut earlier) => {
                for path in replaced {
                    if !earlier.contains(&path) {
                        earlier.push(path);
                    }
                }
                earlier
            }
            None if replaced.is_empty() => return UpdateOutcome::UpToDate,
            None => replaced,
        };

        let outcome = self.relaunch(replaced);
        if let UpdateOutcome::RelaunchFailed { replaced, .. } = &outcome {
            *pending = Some(replaced.clone());
        }
        outcome
    }

    fn sync_binaries(&self, canonical: &Path) -> io::Result<Vec<PathBuf>> {
        let mut replaced = Vec::new();

        if sync_file(canonical, &self.original, self.strategy)? {
            replaced.push(self.original.clone());
        }

        if let (Some(canonical_dir), Some(original_dir)) = (canonical.parent(), self.original.parent()) {
            let worker_src = worker_exe_in(canonical_dir);
            let worker_dst = worker_exe_in(original_dir);
            if worker_src.is_file()
                && worker_dst.is_file()
                && sync_file(&worker_src, &worker_dst, self.strategy)?
            {
                replaced.push(worker_dst);
            }
        }

        Ok(replaced)
    }

    fn relaunch(&self, replaced: Vec<PathBuf>) -> UpdateOutcome {
        self.agent.request_termination();
        if let Some(guard) = &self.guard {
            guard.release();
        }

        let working_dir = self
            .original
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let spec = SpawnSpec {
            program: self.original.clone(),
            args: strip_shadow_marker(&self.startup_args),
            working_dir,
        };

        match self.launcher.launch(&spec) {
            Ok(pid) => {
                tracing::info!(
                    pid,
                    replaced = replaced.len(),
                    original = %self.original.display(),
                    "Relaunched updated dashboard"
                );
                UpdateOutcome::Relaunched { replaced, pid }
            }
            Err(err) => {
                tracing::error!(error = %err, original = %self.original.display(), "Relaunch after update failed");
                UpdateOutcome::RelaunchFailed {
                    replaced,
                    reason: err.to_string(),
                    guard_held: self.restore_guard(),
                }
            }
        }
    }

    /// Takes the instance lock back after a failed relaunch.
    fn restore_guard(&self) -> bool {
        let Some(guard) = &self.guard else {
            return true;
        };
        match guard.reacquire() {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!("Instance lock taken by another dashboard during relaunch");
                false
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to retake instance lock");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shadow::test_utils::RecordingLauncher;
    use crate::shadow::SHADOW_FLAG;
    use crate::storage::WORKER_PAYLOAD_DIR;
    use crate::worker::test_utils::RecordingAgent;
    use crate::worker::WorkerMode;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        brokerage: PathBuf,
        original: PathBuf,
    }

    impl Fixture {
        fn new(canonical: Option<&[u8]>, installed: &[u8]) -> Self {
            let temp = tempfile::tempdir().unwrap();
            let brokerage = temp.path().join("brokerage");
            let install_dir = temp.path().join("install");
            fs_err::create_dir_all(&install_dir).unwrap();
            fs_err::create_dir_all(&brokerage).unwrap();
            if let Some(bytes) = canonical {
                let path = canonical_exe(&brokerage);
                fs_err::create_dir_all(path.parent().unwrap()).unwrap();
                fs_err::write(&path, bytes).unwrap();
            }
            let original = install_dir.join("FBDashboard.exe");
            fs_err::write(&original, installed).unwrap();
            Self {
                temp,
                brokerage,
                original,
            }
        }

        fn write_workers(&self, canonical: &[u8], installed: &[u8]) {
            let src = worker_exe_in(&self.brokerage.join(CANONICAL_DIR));
            let dst = worker_exe_in(self.original.parent().unwrap());
            fs_err::create_dir_all(src.parent().unwrap()).unwrap();
            fs_err::create_dir_all(dst.parent().unwrap()).unwrap();
            fs_err::write(src, canonical).unwrap();
            fs_err::write(dst, installed).unwrap();
        }

        fn updater(
            &self,
            agent: Arc<RecordingAgent>,
            launcher: Arc<RecordingLauncher>,
        ) -> SelfUpdater {
            SelfUpdater::new(
                Arc::new(Brokerage::new(Some(self.brokerage.clone()))),
                self.original.clone(),
                vec![OsString::from("--minimized"), OsString::from(SHADOW_FLAG)],
                agent,
                launcher,
            )
        }
    }

    #[test]
    fn test_files_identical_compares_content() {
        let temp = tempfile::tempdir().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs_err::write(&a, b"abcd").unwrap();
        fs_err::write(&b, b"abcd").unwrap();
        assert!(files_identical(&a, &b).unwrap());

        fs_err::write(&b, b"abce").unwrap();
        assert!(!files_identical(&a, &b).unwrap());

        fs_err::write(&b, b"abcde").unwrap();
        assert!(!files_identical(&a, &b).unwrap());
    }

    #[test]
    fn test_replace_strategies_produce_identical_target() {
        for strategy in [ReplaceStrategy::DeleteThenCopy, ReplaceStrategy::AtomicRename] {
            let temp = tempfile::tempdir().unwrap();
            let source = temp.path().join("source");
            let target = temp.path().join("target");
            fs_err::write(&source, b"new build").unwrap();
            fs_err::write(&target, b"old").unwrap();

            replace_file(&source, &target, strategy).unwrap();
            assert_eq!(fs_err::read(&target).unwrap(), b"new build");
        }
    }

    #[test]
    fn test_no_canonical_is_not_configured() {
        let fx = Fixture::new(None, b"v1");
        let agent = Arc::new(RecordingAgent::new(WorkerMode::WorkWhenIdle));
        let launcher = Arc::new(RecordingLauncher::default());
        let updater = fx.updater(agent.clone(), launcher.clone());

        assert_eq!(updater.check_once(), UpdateOutcome::NotConfigured);
        assert_eq!(agent.terminations(), 0);
        assert!(launcher.launches().is_empty());
    }

    #[test]
    fn test_unset_brokerage_is_not_configured() {
        let fx = Fixture::new(Some(b"v2"), b"v1");
        let updater = SelfUpdater::new(
            Arc::new(Brokerage::new(None)),
            fx.original.clone(),
            vec![],
            Arc::new(RecordingAgent::new(WorkerMode::WorkWhenIdle)),
            Arc::new(RecordingLauncher::default()),
        );
        assert_eq!(updater.check_once(), UpdateOutcome::NotConfigured);
        assert_eq!(fs_err::read(&fx.original).unwrap(), b"v1");
    }

    #[test]
    fn test_identical_binaries_are_left_alone() {
        let fx = Fixture::new(Some(b"build 7"), b"build 7");
        let before = fs_err::metadata(&fx.original).unwrap().modified().unwrap();
        let agent = Arc::new(RecordingAgent::new(WorkerMode::WorkWhenIdle));
        let launcher = Arc::new(RecordingLauncher::default());
        let updater = fx.updater(agent.clone(), launcher.clone());

        assert_eq!(updater.check_once(), UpdateOutcome::UpToDate);
        assert_eq!(
            fs_err::metadata(&fx.original).unwrap().modified().unwrap(),
            before
        );
        assert_eq!(agent.terminations(), 0);
        assert!(launcher.launches().is_empty());
    }

    #[test]
    fn test_stale_original_is_replaced_and_relaunched() {
        let fx = Fixture::new(Some(b"build 8 with trailer"), b"build 8 with trailet");
        let agent = Arc::new(RecordingAgent::new(WorkerMode::WorkWhenIdle));
        let launcher = Arc::new(RecordingLauncher::default());
        let updater = fx.updater(agent.clone(), launcher.clone());

        let outcome = updater.check_once();

        assert_eq!(
            outcome,
            UpdateOutcome::Relaunched {
                replaced: vec![fx.original.clone()],
                pid: 4242
            }
        );
        assert_eq!(
            fs_err::read(&fx.original).unwrap(),
            b"build 8 with trailer"
        );
        assert_eq!(agent.terminations(), 1);

        let launches = launcher.launches();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].program, fx.original);
        assert_eq!(launches[0].args, vec![OsString::from("--minimized")]);
        assert_eq!(launches[0].working_dir, fx.original.parent().unwrap());
    }

    #[test]
    fn test_worker_companion_is_synced_when_both_present() {
        let fx = Fixture::new(Some(b"same"), b"same");
        fx.write_workers(b"worker 2", b"worker 1");
        let agent = Arc::new(RecordingAgent::new(WorkerMode::WorkWhenIdle));
        let launcher = Arc::new(RecordingLauncher::default());
        let updater = fx.updater(agent.clone(), launcher.clone());

        let outcome = updater.check_once();

        let worker_dst = worker_exe_in(fx.original.parent().unwrap());
        assert_eq!(
            outcome,
            UpdateOutcome::Relaunched {
                replaced: vec![worker_dst.clone()],
                pid: 4242
            }
        );
        assert_eq!(fs_err::read(worker_dst).unwrap(), b"worker 2");
        assert_eq!(agent.terminations(), 1);
    }

    #[test]
    fn test_worker_companion_needs_installed_copy() {
        let fx = Fixture::new(Some(b"same"), b"same");
        let src = worker_exe_in(&fx.brokerage.join(CANONICAL_DIR));
        fs_err::create_dir_all(src.parent().unwrap()).unwrap();
        fs_err::write(&src, b"worker 2").unwrap();

        let updater = fx.updater(
            Arc::new(RecordingAgent::new(WorkerMode::WorkWhenIdle)),
            Arc::new(RecordingLauncher::default()),
        );

        assert_eq!(updater.check_once(), UpdateOutcome::UpToDate);
        assert!(!fx
            .original
            .parent()
            .unwrap()
            .join(WORKER_PAYLOAD_DIR)
            .exists());
    }

    #[test]
    fn test_io_failure_abandons_cycle() {
        let fx = Fixture::new(Some(b"v2"), b"v1");
        // A directory in place of the installed executable cannot be replaced.
        fs_err::remove_file(&fx.original).unwrap();
        fs_err::create_dir_all(fx.original.join("locked")).unwrap();

        let agent = Arc::new(RecordingAgent::new(WorkerMode::WorkWhenIdle));
        let launcher = Arc::new(RecordingLauncher::default());
        let updater = fx.updater(agent.clone(), launcher.clone());

        assert!(matches!(
            updater.check_once(),
            UpdateOutcome::Abandoned { .. }
        ));
        assert_eq!(agent.terminations(), 0);
        assert!(launcher.launches().is_empty());
    }

    #[test]
    fn test_relaunch_releases_guard() {
        let fx = Fixture::new(Some(b"v2"), b"v1");
        let lock_dir = fx.temp.path().join("instances");
        let id = crate::instance::InstanceId::from_install_path(&fx.original);
        let guard = Arc::new(InstanceGuard::try_acquire(&lock_dir, &id).unwrap().unwrap());

        let updater = fx
            .updater(
                Arc::new(RecordingAgent::new(WorkerMode::WorkWhenIdle)),
                Arc::new(RecordingLauncher::default()),
            )
            .with_guard(Arc::clone(&guard));

        assert!(matches!(
            updater.check_once(),
            UpdateOutcome::Relaunched { .. }
        ));
        assert!(!guard.is_held());
    }

    #[test]
    fn test_failed_relaunch_keeps_lock_and_retries() {
        let fx = Fixture::new(Some(b"v2"), b"v1");
        let lock_dir = fx.temp.path().join("instances");
        let id = crate::instance::InstanceId::from_install_path(&fx.original);
        let guard = Arc::new(InstanceGuard::try_acquire(&lock_dir, &id).unwrap().unwrap());
        let agent = Arc::new(RecordingAgent::new(WorkerMode::WorkWhenIdle));
        let launcher = Arc::new(RecordingLauncher::default());
        *launcher.fail_with.lock().unwrap() = Some(io::ErrorKind::NotFound);
        let updater = fx
            .updater(Arc::clone(&agent), Arc::clone(&launcher))
            .with_guard(Arc::clone(&guard));

        let first = updater.check_once();
        assert_eq!(
            first,
            UpdateOutcome::RelaunchFailed {
                replaced: vec![fx.original.clone()],
                reason: io::Error::from(io::ErrorKind::NotFound).to_string(),
                guard_held: true,
            }
        );
        assert_eq!(fs_err::read(&fx.original).unwrap(), b"v2");
        assert!(guard.is_held());
        assert!(InstanceGuard::try_acquire(&lock_dir, &id).unwrap().is_none());

        // Files are current now, but the relaunch is still owed.
        *launcher.fail_with.lock().unwrap() = None;
        assert_eq!(
            updater.check_once(),
            UpdateOutcome::Relaunched {
                replaced: vec![fx.original.clone()],
                pid: 4242
            }
        );
        assert_eq!(launcher.launches().len(), 1);
        assert_eq!(agent.terminations(), 2);

        assert_eq!(updater.check_once(), UpdateOutcome::UpToDate);
    }

    #[test]
    fn test_failed_relaunch_reports_lost_lock() {
        let fx = Fixture::new(Some(b"v2"), b"v1");
        let lock_dir = fx.temp.path().join("instances");
        let id = crate::instance::InstanceId::from_install_path(&fx.original);
        let guard = Arc::new(InstanceGuard::try_acquire(&lock_dir, &id).unwrap().unwrap());

        // Stands in for a dashboard that starts while the lock is released.
        struct GrabbingLauncher {
            lock_dir: PathBuf,
            id: crate::instance::InstanceId,
            taken: Mutex<Option<InstanceGuard>>,
        }
        impl ProcessLauncher for GrabbingLauncher {
            fn launch(&self, _spec: &SpawnSpec) -> io::Result<u32> {
                *self.taken.lock().unwrap() =
                    InstanceGuard::try_acquire(&self.lock_dir, &self.id).unwrap();
                Err(io::Error::from(io::ErrorKind::NotFound))
            }
        }
        let launcher = Arc::new(GrabbingLauncher {
            lock_dir: lock_dir.clone(),
            id,
            taken: Mutex::new(None),
        });

        let updater = SelfUpdater::new(
            Arc::new(Brokerage::new(Some(fx.brokerage.clone()))),
            fx.original.clone(),
            vec![],
            Arc::new(RecordingAgent::new(WorkerMode::WorkWhenIdle)),
            launcher.clone(),
        )
        .with_guard(Arc::clone(&guard));

        assert!(matches!(
            updater.check_once(),
            UpdateOutcome::RelaunchFailed {
                guard_held: false,
                ..
            }
        ));
        assert!(!guard.is_held());
        assert!(launcher.taken.lock().unwrap().is_some());
    }
}
