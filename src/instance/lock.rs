//! Phase-completion markers of a local instance directory.
//!
//! Marker files stay on disk so operators can inspect them, but code only
//! sees them through [`LockState`], which cannot express "initialized but
//! never created".

use std::fs;
use std::path::Path;

use crate::error::{AppError, Result};
use crate::paths::get_lock_file;

pub const LOCK_CREATE: &str = "create";
pub const LOCK_INIT: &str = "init";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockState {
    Absent,
    Created,
    Initialized,
}

impl LockState {
    pub fn read(instance_dir: &Path) -> Self {
        let created = get_lock_file(instance_dir, LOCK_CREATE).exists();
        let initialized = get_lock_file(instance_dir, LOCK_INIT).exists();
        match (created, initialized) {
            (true, true) => Self::Initialized,
            (true, false) => Self::Created,
            (false, true) => {
                log::warn!(
                    "Ignoring init marker without create marker in {:?}",
                    instance_dir
                );
                Self::Absent
            }
            (false, false) => Self::Absent,
        }
    }

    pub fn is_created(self) -> bool {
        self >= Self::Created
    }

    pub fn is_initialized(self) -> bool {
        self == Self::Initialized
    }

    /// Record a fully successful provisioning run.
    pub fn mark_created(instance_dir: &Path) -> Result<Self> {
        write_marker(instance_dir, LOCK_CREATE)?;
        Ok(Self::Created)
    }

    /// Record the first successful start; only legal after creation.
    pub fn mark_initialized(self, instance_dir: &Path) -> Result<Self> {
        match self {
            Self::Absent => Err(AppError::invalid_instance(
                &instance_dir.display().to_string(),
                "cannot initialize an instance that has not been created",
            )),
            Self::Created => {
                write_marker(instance_dir, LOCK_INIT)?;
                Ok(Self::Initialized)
            }
            Self::Initialized => Ok(self),
        }
    }
}

/// Write-then-rename so a marker never exists half written.
fn write_marker(instance_dir: &Path, name: &str) -> Result<()> {
    let target = get_lock_file(instance_dir, name);
    let staging = instance_dir.join(format!(".{name}.lock.tmp"));
    let content = format!("locked={}\n", chrono::Utc::now().to_rfc3339());

    fs::write(&staging, content)
        .map_err(|e| AppError::io(format!("Failed to write marker {:?}: {}", staging, e)))?;
    fs::rename(&staging, &target)
        .map_err(|e| AppError::io(format!("Failed to commit marker {:?}: {}", target, e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_follow_markers() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(LockState::read(dir.path()), LockState::Absent);

        let created = LockState::mark_created(dir.path()).unwrap();
        assert_eq!(LockState::read(dir.path()), LockState::Created);
        assert!(!dir.path().join(".create.lock.tmp").exists());

        created.mark_initialized(dir.path()).unwrap();
        let state = LockState::read(dir.path());
        assert!(state.is_created());
        assert!(state.is_initialized());
    }

    #[test]
    fn initializing_absent_instance_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LockState::Absent.mark_initialized(dir.path()).is_err());
        assert!(!get_lock_file(dir.path(), LOCK_INIT).exists());
    }

    #[test]
    fn stray_init_marker_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(get_lock_file(dir.path(), LOCK_INIT), "").unwrap();
        assert_eq!(LockState::read(dir.path()), LockState::Absent);
    }
}
