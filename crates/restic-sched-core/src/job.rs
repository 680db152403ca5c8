//! Jobs: the unit the scheduler fires.
//!
//! A job binds a cron schedule, repository credentials, any number of grouped
//! tasks and database dumps, the mandatory file-snapshot step and an optional
//! retention policy. [`Job::all_tasks`] produces the canonical execution
//! order; everything the runner does follows from that list.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::db::{MySqlTask, PostgresTask, SqliteTask};
use crate::error::ValidationError;
use crate::restic::{ForgetOpts, ResticGlobalOpts};
use crate::schedule::parse_schedule;
use crate::task::{BackupFilesTask, ExecutableTask, ScriptTask};

/// Repository credentials and restic-wide settings for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResticConfig {
    pub repo: String,
    #[serde(default)]
    pub passphrase: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub global_opts: Option<ResticGlobalOpts>,
}

impl ResticConfig {
    /// Exactly one of the inline passphrase and a password file must be set.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let has_passphrase = !self.passphrase.is_empty();
        let has_password_file = self
            .global_opts
            .as_ref()
            .is_some_and(|opts| !opts.password_file.is_empty());

        if has_passphrase == has_password_file {
            return Err(ValidationError::MutuallyExclusive(
                "exactly one of passphrase and global_opts.password_file must be set".to_string(),
            ));
        }

        Ok(())
    }
}

/// A named group of scripts and database dumps within a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobTask {
    pub name: String,
    #[serde(default)]
    pub pre_scripts: Vec<ScriptTask>,
    #[serde(default)]
    pub post_scripts: Vec<ScriptTask>,
    #[serde(default)]
    pub mysql: Vec<MySqlTask>,
    #[serde(default)]
    pub postgres: Vec<PostgresTask>,
    #[serde(default)]
    pub sqlite: Vec<SqliteTask>,
}

impl JobTask {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::missing("task is missing a name"));
        }

        for task in &self.mysql {
            task.validate()?;
        }
        for task in &self.postgres {
            task.validate()?;
        }
        for task in &self.sqlite {
            task.validate()?;
        }

        Ok(())
    }

    /// Tasks to run before the file snapshot: database dumps, then scripts.
    pub fn pre_tasks(&self) -> Vec<ExecutableTask> {
        let mut tasks = Vec::new();

        for task in &self.mysql {
            tasks.push(ExecutableTask::Script(task.pre_task()));
        }
        for task in &self.postgres {
            tasks.push(ExecutableTask::Script(task.pre_task()));
        }
        for task in &self.sqlite {
            tasks.push(ExecutableTask::Script(task.pre_task()));
        }

        for script in &self.pre_scripts {
            let mut script = script.clone();
            script.name = self.name.clone();
            tasks.push(ExecutableTask::Script(script));
        }

        tasks
    }

    /// Tasks to run after the snapshot: scripts, then database loads.
    pub fn post_tasks(&self) -> Vec<ExecutableTask> {
        let mut tasks = Vec::new();

        for script in &self.post_scripts {
            let mut script = script.clone();
            script.name = self.name.clone();
            tasks.push(ExecutableTask::Script(script));
        }

        for task in &self.mysql {
            tasks.push(ExecutableTask::Script(task.post_task()));
        }
        for task in &self.postgres {
            tasks.push(ExecutableTask::Script(task.post_task()));
        }
        for task in &self.sqlite {
            tasks.push(ExecutableTask::Script(task.post_task()));
        }

        tasks
    }
}

/// A complete scheduled backup job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub schedule: String,
    /// Absent in the file when the default config should apply; filled in
    /// during load.
    #[serde(default)]
    pub config: Option<ResticConfig>,
    #[serde(default, rename = "task")]
    pub tasks: Vec<JobTask>,
    pub backup: BackupFilesTask,
    #[serde(default)]
    pub forget: Option<ForgetOpts>,
    #[serde(default)]
    pub mysql: Vec<MySqlTask>,
    #[serde(default)]
    pub postgres: Vec<PostgresTask>,
    #[serde(default)]
    pub sqlite: Vec<SqliteTask>,
}

impl Job {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::missing("job is missing a name"));
        }

        parse_schedule(&self.schedule)?;

        match &self.config {
            Some(config) => config.validate()?,
            None => {
                return Err(ValidationError::missing(format!(
                    "job {} has no config and no default_config applies",
                    self.name
                )))
            }
        }

        for task in &self.tasks {
            task.validate()?;
        }
        for task in &self.mysql {
            task.validate()?;
        }
        for task in &self.postgres {
            task.validate()?;
        }
        for task in &self.sqlite {
            task.validate()?;
        }

        self.backup.validate()?;

        if let Some(forget) = &self.forget {
            forget.validate()?;
        }

        Ok(())
    }

    /// The full ordered pipeline for one run.
    ///
    /// All dumps land on disk before the snapshot is taken; all loads run
    /// after the snapshot has been restored. Outer database tasks bracket
    /// the grouped tasks on both sides.
    pub fn all_tasks(&self) -> Vec<ExecutableTask> {
        let mut tasks = Vec::new();

        for task in &self.mysql {
            tasks.push(ExecutableTask::Script(task.pre_task()));
        }
        for task in &self.postgres {
            tasks.push(ExecutableTask::Script(task.pre_task()));
        }
        for task in &self.sqlite {
            tasks.push(ExecutableTask::Script(task.pre_task()));
        }

        for job_task in &self.tasks {
            tasks.extend(job_task.pre_tasks());
        }

        let mut backup = self.backup.clone();
        backup.name = self.name.clone();
        tasks.push(ExecutableTask::BackupFiles(backup));

        for job_task in &self.tasks {
            tasks.extend(job_task.post_tasks());
        }

        for task in &self.mysql {
            tasks.push(ExecutableTask::Script(task.post_task()));
        }
        for task in &self.postgres {
            tasks.push(ExecutableTask::Script(task.post_task()));
        }
        for task in &self.sqlite {
            tasks.push(ExecutableTask::Script(task.post_task()));
        }

        tasks
    }

    /// Paths handed to `restic backup`: the configured paths plus every
    /// database dump file, in declaration order.
    pub fn backup_paths(&self) -> Vec<String> {
        let mut paths = self.backup.paths.clone();

        for task in &self.mysql {
            paths.extend(task.paths());
        }
        for task in &self.postgres {
            paths.extend(task.paths());
        }
        for task in &self.sqlite {
            paths.extend(task.paths());
        }

        for job_task in &self.tasks {
            for task in &job_task.mysql {
                paths.extend(task.paths());
            }
            for task in &job_task.postgres {
                paths.extend(task.paths());
            }
            for task in &job_task.sqlite {
                paths.extend(task.paths());
            }
        }

        paths
    }
}
