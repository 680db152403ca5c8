//! The shared job-result cache.
//!
//! One entry per job, last writer wins. Job runs write on completion; the
//! health endpoint reads. The mutex is held only for the store or load.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Which pipeline produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Backup,
    Restore,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobType::Backup => write!(f, "backup"),
            JobType::Restore => write!(f, "restore"),
        }
    }
}

/// Outcome of the most recent run of one job.
///
/// Field names follow the wire format consumed by existing health checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(rename = "JobName")]
    pub job_name: String,
    #[serde(rename = "JobType")]
    pub job_type: JobType,
    #[serde(rename = "Success")]
    pub success: bool,
    #[serde(rename = "Message")]
    pub message: String,
}

/// Process-wide result cache shared by the scheduler and the HTTP API.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    results: Arc<Mutex<HashMap<String, JobResult>>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&self, result: JobResult) {
        let mut results = self.results.lock().expect("result store poisoned");
        results.insert(result.job_name.clone(), result);
    }

    pub fn get(&self, job_name: &str) -> Option<JobResult> {
        let results = self.results.lock().expect("result store poisoned");

        results.get(job_name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, success: bool) -> JobResult {
        JobResult {
            job_name: name.into(),
            job_type: JobType::Backup,
            success,
            message: String::new(),
        }
    }

    #[test]
    fn unknown_job_is_none() {
        let store = ResultStore::new();
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn last_writer_wins() {
        let store = ResultStore::new();

        store.complete(result("job", true));
        assert!(store.get("job").unwrap().success);

        store.complete(result("job", false));
        assert!(!store.get("job").unwrap().success);
    }

    #[test]
    fn results_serialize_with_wire_names() {
        let json = serde_json::to_value(result("J", false)).unwrap();

        assert_eq!("J", json["JobName"]);
        assert_eq!("backup", json["JobType"]);
        assert_eq!(false, json["Success"]);
    }
}
