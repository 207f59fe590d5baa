//! Persisted hand-off record between the top-level process and its shadow.
//!
//! Written once by the top-level process right before it launches the shadow;
//! read once by the shadow at startup. Never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{FarmError, Result};

pub const SHADOW_CONTEXT_FILE: &str = "shadow-context.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowContext {
    /// Executable the shadow was copied from; the self-update target.
    pub original_location: PathBuf,
    pub created: DateTime<Utc>,
}

impl ShadowContext {
    pub fn new(original_location: impl Into<PathBuf>) -> Self {
        Self {
            original_location: original_location.into(),
            created: Utc::now(),
        }
    }

    /// Context file beside a shadow executable.
    pub fn path_beside(shadow_exe: &Path) -> Result<PathBuf> {
        shadow_exe
            .parent()
            .map(|dir| dir.join(SHADOW_CONTEXT_FILE))
            .ok_or_else(|| FarmError::NoParentDir(shadow_exe.to_path_buf()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| FarmError::io("creating shadow context directory", err))?;
        }

        let payload = serde_json::to_vec_pretty(self).map_err(|source| FarmError::Json {
            context: "serializing shadow context".to_string(),
            source,
        })?;
        let tmp_path = path.with_extension("tmp");
        fs_err::write(&tmp_path, payload)
            .map_err(|err| FarmError::io("writing shadow context", err))?;
        fs_err::rename(&tmp_path, path)
            .map_err(|err| FarmError::io("committing shadow context", err))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = match fs_err::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(FarmError::ShadowContextMissing(path.to_path_buf()))
            }
            Err(err) => return Err(FarmError::io("reading shadow context", err)),
        };

        serde_json::from_slice(&data).map_err(|source| FarmError::Json {
            context: format!("parsing {}", path.display()),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_then_load_preserves_original_location() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested").join(SHADOW_CONTEXT_FILE);
        let context = ShadowContext::new("/opt/farm/FBDashboard.exe");

        context.save(&path).unwrap();
        let loaded = ShadowContext::load(&path).unwrap();

        assert_eq!(loaded, context);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_load_missing_context() {
        let temp = tempfile::tempdir().unwrap();
        let err = ShadowContext::load(&temp.path().join(SHADOW_CONTEXT_FILE)).unwrap_err();
        assert!(matches!(err, FarmError::ShadowContextMissing(_)));
    }

    #[test]
    fn test_load_garbage_context() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join(SHADOW_CONTEXT_FILE);
        fs_err::write(&path, "not json").unwrap();
        assert!(matches!(
            ShadowContext::load(&path).unwrap_err(),
            FarmError::Json { .. }
        ));
    }

    #[test]
    fn test_path_beside_shadow_exe() {
        let path = ShadowContext::path_beside(Path::new("/tmp/FBDashboard/fbdash.shadow")).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/FBDashboard/shadow-context.json"));
    }
}
