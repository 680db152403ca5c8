//! The fixed metrics registry.
//!
//! Four gauges, all labelled by job name, live for the process lifetime.
//! Besides the `/metrics` endpoint they can be pushed once to a push gateway
//! after a one-shot run.

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

pub static METRICS: Lazy<ResticMetrics> = Lazy::new(ResticMetrics::new);

pub struct ResticMetrics {
    pub registry: Registry,
    pub job_start_time: GaugeVec,
    pub job_failure_count: GaugeVec,
    pub snapshot_current_count: GaugeVec,
    pub snapshot_latest_time: GaugeVec,
}

impl ResticMetrics {
    fn new() -> Self {
        let labels = ["job"];

        let job_start_time = GaugeVec::new(
            Opts::new("restic_job_start_time", "time that a job was run"),
            &labels,
        )
        .expect("job start time gauge");
        let job_failure_count = GaugeVec::new(
            Opts::new(
                "restic_job_failure_count",
                "number of consecutive failures for jobs",
            ),
            &labels,
        )
        .expect("job failure count gauge");
        let snapshot_current_count = GaugeVec::new(
            Opts::new("restic_snapshot_current_total", "number of current snapshots"),
            &labels,
        )
        .expect("snapshot count gauge");
        let snapshot_latest_time = GaugeVec::new(
            Opts::new(
                "restic_snapshot_latest_time",
                "time of the most recent snapshot",
            ),
            &labels,
        )
        .expect("snapshot latest time gauge");

        let registry = Registry::new();
        registry
            .register(Box::new(job_start_time.clone()))
            .expect("register job start time");
        registry
            .register(Box::new(job_failure_count.clone()))
            .expect("register job failure count");
        registry
            .register(Box::new(snapshot_current_count.clone()))
            .expect("register snapshot count");
        registry
            .register(Box::new(snapshot_latest_time.clone()))
            .expect("register snapshot latest time");

        ResticMetrics {
            registry,
            job_start_time,
            job_failure_count,
            snapshot_current_count,
            snapshot_latest_time,
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .context("failed encoding metrics")?;

        String::from_utf8(buffer).context("metrics encoding was not utf-8")
    }

    /// One-shot push of the whole registry under the `batch` job name.
    pub async fn push_to_gateway(&self, url: &str) -> Result<()> {
        let body = self.render()?;
        let push_url = format!("{}/metrics/job/batch", url.trim_end_matches('/'));

        let response = reqwest::Client::new()
            .post(&push_url)
            .header("Content-Type", "text/plain; version=0.0.4")
            .body(body)
            .send()
            .await
            .with_context(|| format!("error pushing to registry {url}"))?;

        if !response.status().is_success() {
            bail!(
                "push gateway {push_url} responded with status {}",
                response.status()
            );
        }

        Ok(())
    }
}
