//! Child process launching.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Everything needed to start a detached child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: PathBuf,
}

/// Process launch seam. Production uses [`CommandLauncher`].
pub trait ProcessLauncher: Send + Sync {
    /// Starts the child without waiting for it. Returns its PID.
    fn launch(&self, spec: &SpawnSpec) -> io::Result<u32>;
}

impl<L: ProcessLauncher + ?Sized> ProcessLauncher for std::sync::Arc<L> {
    fn launch(&self, spec: &SpawnSpec) -> io::Result<u32> {
        (**self).launch(spec)
    }
}

/// Fire-and-forget launcher: the child is never waited on or supervised.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandLauncher;

impl ProcessLauncher for CommandLauncher {
    fn launch(&self, spec: &SpawnSpec) -> io::Result<u32> {
        let child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        tracing::info!(
            pid = child.id(),
            program = %spec.program.display(),
            cwd = %spec.working_dir.display(),
            "Launched child process"
        );
        Ok(child.id())
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::*;
    use std::sync::Mutex;

    /// Records launches instead of starting processes.
    #[derive(Default)]
    pub struct RecordingLauncher {
        pub launches: Mutex<Vec<SpawnSpec>>,
        pub fail_with: Mutex<Option<io::ErrorKind>>,
    }

    impl RecordingLauncher {
        pub fn launches(&self) -> Vec<SpawnSpec> {
            self.launches.lock().unwrap().clone()
        }
    }

    impl ProcessLauncher for RecordingLauncher {
        fn launch(&self, spec: &SpawnSpec) -> io::Result<u32> {
            if let Some(kind) = *self.fail_with.lock().unwrap() {
                return Err(io::Error::from(kind));
            }
            self.launches.lock().unwrap().push(spec.clone());
            Ok(4242)
        }
    }
}
