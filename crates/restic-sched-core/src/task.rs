//! Executable task variants.
//!
//! A job linearizes into a flat list of [`ExecutableTask`]s. The closed set
//! of variants keeps dispatch explicit and the pipeline order auditable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::restic::{BackupOpts, RestoreOpts};

/// A shell script with separate bodies for the backup and restore phases.
///
/// An empty body makes that phase a no-op; this is how database pre-tasks
/// stay silent on restore and post-tasks stay silent on backup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptTask {
    #[serde(default)]
    pub on_backup: String,
    #[serde(default)]
    pub on_restore: String,
    /// Working directory for the shell; empty means the process cwd.
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Injected from the owning task at linearization time, not configured.
    #[serde(skip)]
    pub name: String,
}

/// The file-snapshot step present in every job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupFilesTask {
    pub paths: Vec<String>,
    #[serde(default)]
    pub backup_opts: Option<BackupOpts>,
    #[serde(default)]
    pub restore_opts: Option<RestoreOpts>,
    #[serde(skip)]
    pub name: String,
}

impl BackupFilesTask {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.paths.is_empty() {
            return Err(ValidationError::invalid(
                "backup config doesn't include any paths",
            ));
        }

        Ok(())
    }
}

/// One step of a linearized job pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutableTask {
    Script(ScriptTask),
    BackupFiles(BackupFilesTask),
}

impl ExecutableTask {
    pub fn name(&self) -> &str {
        match self {
            ExecutableTask::Script(task) => &task.name,
            ExecutableTask::BackupFiles(task) => &task.name,
        }
    }
}
