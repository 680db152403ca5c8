//! Prefix-keyed job loggers.
//!
//! Subprocess output is attributed to a job (and task) by prefix. Handles are
//! deduplicated through a process-wide map so concurrent lookups for the same
//! key share one instance; lines funnel into the `tracing` subscriber.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use tracing::{error, info};

static LOGGERS: Lazy<Mutex<HashMap<String, Arc<JobLogger>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// A logging handle scoped to one job or task.
#[derive(Debug)]
pub struct JobLogger {
    prefix: String,
}

impl JobLogger {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Emit one output line as `<prefix> <line>`.
    pub fn line(&self, line: &str) {
        info!("{} {}", self.prefix, line);
    }

    pub fn error(&self, message: &str) {
        error!("{} {}", self.prefix, message);
    }
}

/// Fetch or create the logger for `name`; the prefix becomes `name:`.
pub fn get(name: &str) -> Arc<JobLogger> {
    let mut loggers = LOGGERS.lock().expect("logger registry poisoned");

    loggers
        .entry(name.to_string())
        .or_insert_with(|| {
            Arc::new(JobLogger {
                prefix: format!("{name}:"),
            })
        })
        .clone()
}

/// A logger nested under `parent`; prefix `parent-prefix + name + ":"`.
pub fn child(parent: &JobLogger, name: &str) -> Arc<JobLogger> {
    get(&format!("{}{}", parent.prefix(), name))
}
