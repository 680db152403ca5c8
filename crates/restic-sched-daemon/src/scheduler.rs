//! The cron scheduler and its shutdown protocol.
//!
//! Every job gets a parsed schedule and a next-fire time; a one-second tick
//! spawns due jobs onto the runtime. Runs of the same job may overlap when a
//! run outlasts its schedule interval; the scheduler deliberately does not
//! serialize them. Signals end the loop: SIGINT returns at once, SIGTERM and
//! SIGQUIT wait for in-flight jobs to drain. In-flight subprocesses are never
//! killed either way.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinSet;
use tracing::info;

use restic_sched_core::{next_occurrence, parse_schedule, Job};

use crate::runner::run_job_backup;
use crate::state::ResultStore;

struct ScheduledJob {
    job: Job,
    schedule: Schedule,
    next_run: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    fn new(job: Job) -> Result<Self> {
        // Schedules were validated at load; a failure here is a config bug.
        let schedule = parse_schedule(&job.schedule)
            .with_context(|| format!("error scheduling job {}", job.name))?;
        let next_run = next_occurrence(&schedule, Utc::now());

        Ok(ScheduledJob {
            job,
            schedule,
            next_run,
        })
    }

    fn due(&self, now: DateTime<Utc>) -> bool {
        self.next_run.is_some_and(|next| next <= now)
    }

    fn advance(&mut self, now: DateTime<Utc>) {
        self.next_run = next_occurrence(&self.schedule, now);
    }
}

/// Register all jobs and run them until a shutdown signal arrives.
pub async fn schedule_and_run_jobs(
    jobs: Vec<Job>,
    base_dir: PathBuf,
    store: ResultStore,
) -> Result<()> {
    let mut scheduled = Vec::with_capacity(jobs.len());
    for job in jobs {
        info!("scheduling {}", job.name);
        scheduled.push(ScheduledJob::new(job)?);
    }

    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sigquit = signal(SignalKind::quit()).context("installing SIGQUIT handler")?;

    let mut running: JoinSet<()> = JoinSet::new();
    let mut tick = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let now = Utc::now();

                for entry in scheduled.iter_mut().filter(|entry| entry.due(now)) {
                    let job = entry.job.clone();
                    let dir = base_dir.clone();
                    let results = store.clone();

                    running.spawn(async move {
                        // Failures are recorded in the result store and the
                        // gauges; they never stop the scheduler.
                        let _ = run_job_backup(&job, &dir, &results).await;
                    });

                    entry.advance(now);
                }

                // Reap whatever finished since the last tick.
                while running.try_join_next().is_some() {}
            }
            _ = sigint.recv() => {
                info!("stopping now...");

                return Ok(());
            }
            _ = sigterm.recv() => break,
            _ = sigquit.recv() => break,
        }
    }

    info!("stopping after running jobs complete...");
    while running.join_next().await.is_some() {}
    info!("all jobs successfully stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use restic_sched_core::{BackupFilesTask, ResticConfig};

    fn job_with_schedule(schedule: &str) -> Job {
        Job {
            name: "sched-test".into(),
            schedule: schedule.into(),
            config: Some(ResticConfig {
                repo: "./repo".into(),
                passphrase: "shh".into(),
                ..Default::default()
            }),
            backup: BackupFilesTask {
                paths: vec!["/data".into()],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn new_jobs_have_a_next_run() {
        let scheduled = ScheduledJob::new(job_with_schedule("* * * * *")).unwrap();
        assert!(scheduled.next_run.is_some());
    }

    #[test]
    fn unparseable_schedule_errors() {
        assert!(ScheduledJob::new(job_with_schedule("nope")).is_err());
    }

    #[test]
    fn due_and_advance() {
        let mut scheduled = ScheduledJob::new(job_with_schedule("* * * * *")).unwrap();

        let before = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 30).unwrap();
        scheduled.next_run = Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 1, 0).unwrap());
        assert!(!scheduled.due(before));

        let later = Utc.with_ymd_and_hms(2020, 1, 1, 0, 1, 0).unwrap();
        assert!(scheduled.due(later));

        scheduled.advance(later);
        assert_eq!(
            Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 2, 0).unwrap()),
            scheduled.next_run
        );
    }
}
