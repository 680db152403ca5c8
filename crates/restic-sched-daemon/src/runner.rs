//! Drives one job run: pipeline linearization in, subprocesses out.
//!
//! The pipeline is strictly sequential; the first failing task aborts the
//! run with no retry and no rollback. Dumps therefore always hit the disk
//! before the snapshot, and restore loads only run once the snapshot is back.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use restic_sched_core::{ExecutableTask, Job, ScriptTask};

use crate::logger::{self, JobLogger};
use crate::metrics::METRICS;
use crate::restic::{Restic, ResticError};
use crate::shell::{run_script, ShellError};
use crate::state::{JobResult, JobType, ResultStore};

#[derive(Debug, Error)]
pub enum JobRunError {
    #[error("job {job} is missing its restic config")]
    MissingConfig { job: String },

    #[error("task {name} failed: {source}")]
    Task {
        name: String,
        #[source]
        source: ShellError,
    },

    #[error(transparent)]
    Restic(#[from] ResticError),

    #[error("failed preparing job directory {path}: {source}")]
    JobDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Everything a task needs for one run, shared across the whole pipeline.
pub struct TaskContext {
    pub backup_paths: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub logger: Arc<JobLogger>,
    pub restic: Restic,
    pub restore_snapshot: String,
}

impl TaskContext {
    /// An empty selector means the newest snapshot.
    pub fn effective_snapshot(&self) -> &str {
        if self.restore_snapshot.is_empty() {
            "latest"
        } else {
            &self.restore_snapshot
        }
    }
}

/// Child env wins over parent on key collisions.
pub fn merge_env(
    parent: &BTreeMap<String, String>,
    child: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = parent.clone();
    for (key, value) in child {
        merged.insert(key.clone(), value.clone());
    }

    merged
}

async fn run_script_phase(
    task: &ScriptTask,
    script: &str,
    ctx: &TaskContext,
) -> Result<(), JobRunError> {
    // An empty body means this phase is a no-op, not an error.
    if script.is_empty() {
        return Ok(());
    }

    let env = merge_env(&ctx.env, &task.env);
    let task_logger = logger::child(&ctx.logger, &task.name);

    run_script(&task.name, script, &task.cwd, &env, &task_logger)
        .await
        .map_err(|source| JobRunError::Task {
            name: task.name.clone(),
            source,
        })
}

pub async fn run_task_backup(task: &ExecutableTask, ctx: &TaskContext) -> Result<(), JobRunError> {
    match task {
        ExecutableTask::Script(script) => run_script_phase(script, &script.on_backup, ctx).await,
        ExecutableTask::BackupFiles(backup) => {
            let opts = backup.backup_opts.clone().unwrap_or_default();
            ctx.restic.backup(&ctx.backup_paths, &opts).await?;

            Ok(())
        }
    }
}

pub async fn run_task_restore(task: &ExecutableTask, ctx: &TaskContext) -> Result<(), JobRunError> {
    match task {
        ExecutableTask::Script(script) => run_script_phase(script, &script.on_restore, ctx).await,
        ExecutableTask::BackupFiles(backup) => {
            let opts = backup.restore_opts.clone().unwrap_or_default();
            ctx.restic.restore(ctx.effective_snapshot(), &opts).await?;

            Ok(())
        }
    }
}

fn job_dir(base_dir: &Path, job: &Job) -> PathBuf {
    base_dir.join(job.name.replace('/', "_"))
}

fn build_context(
    job: &Job,
    base_dir: &Path,
    logger: Arc<JobLogger>,
    restic: Restic,
    restore_snapshot: String,
) -> Result<TaskContext, JobRunError> {
    let dir = job_dir(base_dir, job);
    std::fs::create_dir_all(&dir).map_err(|source| JobRunError::JobDir {
        path: dir.clone(),
        source,
    })?;

    let mut env = BTreeMap::new();
    env.insert(
        "RESTIC_JOB_DIR".to_string(),
        dir.to_string_lossy().into_owned(),
    );

    Ok(TaskContext {
        backup_paths: job.backup_paths(),
        env,
        logger,
        restic,
        restore_snapshot,
    })
}

fn restic_for(job: &Job, logger: Arc<JobLogger>) -> Result<Restic, JobRunError> {
    let config = job.config.as_ref().ok_or_else(|| JobRunError::MissingConfig {
        job: job.name.clone(),
    })?;

    Ok(Restic::from_config(config, logger))
}

/// The backup pipeline: init check, every task in order, optional forget,
/// then a snapshot read feeding the gauges.
pub async fn run_backup(job: &Job, base_dir: &Path) -> Result<(), JobRunError> {
    let job_logger = logger::get(&job.name);
    let restic = restic_for(job, job_logger.clone())?;

    restic.ensure_init().await?;

    let ctx = build_context(job, base_dir, job_logger.clone(), restic, String::new())?;

    for task in job.all_tasks() {
        run_task_backup(&task, &ctx).await?;
    }

    if let Some(forget) = &job.forget {
        ctx.restic.forget(forget).await?;
    }

    update_snapshot_metrics(job, &ctx).await;

    Ok(())
}

/// Snapshot bookkeeping failures never fail the run.
async fn update_snapshot_metrics(job: &Job, ctx: &TaskContext) {
    match ctx.restic.read_snapshots().await {
        Ok(snapshots) => {
            METRICS
                .snapshot_current_count
                .with_label_values(&[&job.name])
                .set(snapshots.len() as f64);

            if let Some(latest) = snapshots.last() {
                METRICS
                    .snapshot_latest_time
                    .with_label_values(&[&job.name])
                    .set(latest.time.timestamp() as f64);
            }
        }
        Err(err) => {
            ctx.logger
                .error(&format!("failed reading snapshots after backup: {err}"));
        }
    }
}

/// The restore pipeline. The repository must already exist.
pub async fn run_restore(job: &Job, base_dir: &Path, snapshot: &str) -> Result<(), JobRunError> {
    let job_logger = logger::get(&job.name);
    let restic = restic_for(job, job_logger.clone())?;

    // A missing repository fails the whole restore; nothing to load from.
    restic.snapshots().await?;

    let ctx = build_context(
        job,
        base_dir,
        job_logger,
        restic,
        snapshot.to_string(),
    )?;

    for task in job.all_tasks() {
        run_task_restore(&task, &ctx).await?;
    }

    Ok(())
}

fn record_outcome(
    job: &Job,
    job_type: JobType,
    outcome: &Result<(), JobRunError>,
    store: &ResultStore,
) {
    let result = JobResult {
        job_name: job.name.clone(),
        job_type,
        success: outcome.is_ok(),
        message: outcome
            .as_ref()
            .err()
            .map(ToString::to_string)
            .unwrap_or_default(),
    };

    logger::get(&job.name).line(&format!(
        "completed {} run: success={}",
        result.job_type, result.success
    ));
    store.complete(result);
}

/// Run a backup, record the outcome and feed the job gauges. Used by both
/// cron triggers and one-shot CLI runs.
pub async fn run_job_backup(
    job: &Job,
    base_dir: &Path,
    store: &ResultStore,
) -> Result<(), JobRunError> {
    METRICS
        .job_start_time
        .with_label_values(&[&job.name])
        .set(Utc::now().timestamp() as f64);

    let outcome = run_backup(job, base_dir).await;

    let failure_count = METRICS.job_failure_count.with_label_values(&[&job.name]);
    match &outcome {
        Ok(()) => failure_count.set(0.0),
        Err(_) => failure_count.inc(),
    }

    record_outcome(job, JobType::Backup, &outcome, store);

    outcome
}

/// Run a restore and record the outcome; no gauges move on restores.
pub async fn run_job_restore(
    job: &Job,
    base_dir: &Path,
    store: &ResultStore,
    snapshot: &str,
) -> Result<(), JobRunError> {
    let outcome = run_restore(job, base_dir, snapshot).await;
    record_outcome(job, JobType::Restore, &outcome, store);

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use restic_sched_core::ResticConfig;

    fn dummy_restic() -> Restic {
        Restic::from_config(
            &ResticConfig {
                repo: "/nonexistent/repo".into(),
                passphrase: "shh".into(),
                ..Default::default()
            },
            logger::get("runner-test"),
        )
    }

    fn script_ctx() -> TaskContext {
        TaskContext {
            backup_paths: Vec::new(),
            env: BTreeMap::new(),
            logger: logger::get("runner-test"),
            restic: dummy_restic(),
            restore_snapshot: String::new(),
        }
    }

    #[test]
    fn merge_env_prefers_child() {
        let mut parent = BTreeMap::new();
        parent.insert("key".to_string(), "old".to_string());
        parent.insert("other".to_string(), "other".to_string());

        let mut child = BTreeMap::new();
        child.insert("key".to_string(), "new".to_string());

        let merged = merge_env(&parent, &child);
        assert_eq!(Some(&"new".to_string()), merged.get("key"));
        assert_eq!(Some(&"other".to_string()), merged.get("other"));

        assert_eq!(parent, merge_env(&parent, &BTreeMap::new()));
        assert_eq!(child, merge_env(&BTreeMap::new(), &child));
    }

    #[test]
    fn empty_selector_means_latest() {
        let mut ctx = script_ctx();
        assert_eq!("latest", ctx.effective_snapshot());

        ctx.restore_snapshot = "abc123".to_string();
        assert_eq!("abc123", ctx.effective_snapshot());
    }

    #[tokio::test]
    async fn empty_script_phases_are_no_ops() {
        let task = ExecutableTask::Script(ScriptTask {
            name: "noop".into(),
            ..Default::default()
        });
        let ctx = script_ctx();

        assert!(run_task_backup(&task, &ctx).await.is_ok());
        assert!(run_task_restore(&task, &ctx).await.is_ok());
    }

    #[tokio::test]
    async fn script_phases_run_in_pipeline_order() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("order.txt");

        let tasks = vec![
            ExecutableTask::Script(ScriptTask {
                name: "first".into(),
                on_backup: format!("echo first >> '{}'", marker.display()),
                ..Default::default()
            }),
            ExecutableTask::Script(ScriptTask {
                name: "second".into(),
                on_backup: format!("echo second >> '{}'", marker.display()),
                ..Default::default()
            }),
        ];

        let ctx = script_ctx();
        for task in &tasks {
            run_task_backup(task, &ctx).await.unwrap();
        }

        let contents = std::fs::read_to_string(&marker).unwrap();
        assert_eq!("first\nsecond\n", contents);
    }

    #[tokio::test]
    async fn failing_task_reports_its_name() {
        let task = ExecutableTask::Script(ScriptTask {
            name: "broken".into(),
            on_backup: "exit 1".into(),
            ..Default::default()
        });

        let err = run_task_backup(&task, &script_ctx()).await.unwrap_err();
        match err {
            JobRunError::Task { name, .. } => assert_eq!("broken", name),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn task_env_overrides_context_env() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("env.txt");

        let mut ctx = script_ctx();
        ctx.env
            .insert("WHO".to_string(), "context".to_string());

        let mut task_env = BTreeMap::new();
        task_env.insert("WHO".to_string(), "task".to_string());

        let task = ExecutableTask::Script(ScriptTask {
            name: "env".into(),
            on_backup: format!("echo $WHO > '{}'", marker.display()),
            env: task_env,
            ..Default::default()
        });

        run_task_backup(&task, &ctx).await.unwrap();
        assert_eq!("task\n", std::fs::read_to_string(&marker).unwrap());
    }
}
