//! Job configuration files.
//!
//! A config file is TOML with an optional `default_config` table and any
//! number of `[[job]]` blocks. Jobs without their own `config` fall back to
//! `default_config`. Before deserializing, every string value is expanded:
//! `env(NAME)` becomes the named environment variable (empty when unset) and
//! `readfile(PATH)` becomes the file's contents, so secrets stay out of the
//! config file itself.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use restic_sched_core::{Job, ResticConfig};

#[derive(Debug, Error)]
#[error("jobs not found: {0:?}")]
pub struct JobFilterError(pub Vec<String>);

/// Decoded form of one configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub default_config: Option<ResticConfig>,
    #[serde(default, rename = "job")]
    pub jobs: Vec<Job>,
}

fn expand_string(value: &str) -> Result<String> {
    let trimmed = value.trim();

    if let Some(inner) = call_argument(trimmed, "env") {
        return Ok(std::env::var(inner).unwrap_or_default());
    }

    if let Some(inner) = call_argument(trimmed, "readfile") {
        return std::fs::read_to_string(inner)
            .with_context(|| format!("readfile({inner}) failed"));
    }

    Ok(value.to_string())
}

/// Match `name("arg")` / `name(arg)` and return the argument.
fn call_argument<'a>(value: &'a str, name: &str) -> Option<&'a str> {
    let inner = value.strip_prefix(name)?.strip_prefix('(')?.strip_suffix(')')?;
    let inner = inner.trim();

    Some(
        inner
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
            .unwrap_or(inner),
    )
}

fn expand_value(value: &mut toml::Value) -> Result<()> {
    match value {
        toml::Value::String(text) => {
            *text = expand_string(text)?;
        }
        toml::Value::Array(items) => {
            for item in items {
                expand_value(item)?;
            }
        }
        toml::Value::Table(table) => {
            for (_, item) in table.iter_mut() {
                expand_value(item)?;
            }
        }
        _ => {}
    }

    Ok(())
}

/// Parse one file into validated jobs, applying the file's default config.
pub fn parse_config(path: &Path) -> Result<Vec<Job>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading config file {}", path.display()))?;

    let mut value: toml::Value = toml::from_str(&text)
        .with_context(|| format!("{}: failed to decode file", path.display()))?;
    expand_value(&mut value)?;

    let config: SchedulerConfig = value
        .try_into()
        .with_context(|| format!("{}: failed to decode file", path.display()))?;

    if config.jobs.is_empty() {
        warn!("{}: no jobs defined in file", path.display());

        return Ok(Vec::new());
    }

    let mut jobs = config.jobs;
    for job in &mut jobs {
        if job.config.is_none() {
            job.config = config.default_config.clone();
        }

        job.validate()
            .with_context(|| format!("{}: invalid job {}", path.display(), job.name))?;
    }

    Ok(jobs)
}

/// Read every config file, requiring at least one job and unique job names.
pub fn read_jobs(paths: &[impl AsRef<Path>]) -> Result<Vec<Job>> {
    let mut all_jobs = Vec::new();

    for path in paths {
        all_jobs.extend(parse_config(path.as_ref())?);
    }

    if all_jobs.is_empty() {
        bail!("no jobs found in provided configuration");
    }

    let mut seen = HashSet::new();
    for job in &all_jobs {
        if !seen.insert(job.name.clone()) {
            bail!("duplicate job name: {}", job.name);
        }
    }

    Ok(all_jobs)
}

/// Select jobs by name; `all` selects everything. Matched jobs are returned
/// even when some names are unknown so a partial filter can still run.
pub fn filter_jobs<'a>(
    jobs: &'a [Job],
    names: &[String],
) -> (Vec<&'a Job>, Option<JobFilterError>) {
    if names.iter().any(|name| name == "all") {
        return (jobs.iter().collect(), None);
    }

    let mut wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
    let mut matched = Vec::new();

    for job in jobs {
        if wanted.remove(job.name.as_str()) {
            matched.push(job);
        }
    }

    let missing: Vec<String> = wanted.into_iter().map(String::from).collect();
    let err = if missing.is_empty() {
        None
    } else {
        Some(JobFilterError(missing))
    };

    (matched, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[default_config]
repo = "./test-repo"
passphrase = "shared-secret"

[[job]]
name = "nightly"
schedule = "@daily"

[job.backup]
paths = ["/data"]

[[job.mysql]]
name = "app-db"
database = "app"
dump_to = "/tmp/app.sql"

[[job]]
name = "weekly"
schedule = "0 3 * * 0"

[job.config]
repo = "./other-repo"
passphrase = "other-secret"

[job.backup]
paths = ["/var/lib/other"]

[job.forget]
keep_last = 7
prune = true
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();

        file
    }

    #[test]
    fn sample_config_parses() {
        let file = write_config(SAMPLE);
        let jobs = read_jobs(&[file.path()]).unwrap();

        assert_eq!(2, jobs.len());
        assert_eq!("nightly", jobs[0].name);

        // default_config applies only where no job config is given
        assert_eq!(
            "./test-repo",
            jobs[0].config.as_ref().unwrap().repo.as_str()
        );
        assert_eq!(
            "./other-repo",
            jobs[1].config.as_ref().unwrap().repo.as_str()
        );
        assert_eq!(7, jobs[1].forget.as_ref().unwrap().keep_last);
    }

    #[test]
    fn env_function_expands() {
        std::env::set_var("RESTIC_SCHED_TEST_PASS", "from-env");

        let file = write_config(
            r#"
[[job]]
name = "envjob"
schedule = "@daily"

[job.config]
repo = "./repo"
passphrase = 'env("RESTIC_SCHED_TEST_PASS")'

[job.backup]
paths = ["/data"]
"#,
        );

        let jobs = read_jobs(&[file.path()]).unwrap();
        assert_eq!("from-env", jobs[0].config.as_ref().unwrap().passphrase);
    }

    #[test]
    fn readfile_function_expands() {
        let mut secret = tempfile::NamedTempFile::new().unwrap();
        secret.write_all(b"file-secret").unwrap();

        let file = write_config(&format!(
            r#"
[[job]]
name = "filejob"
schedule = "@daily"

[job.config]
repo = "./repo"
passphrase = 'readfile("{}")'

[job.backup]
paths = ["/data"]
"#,
            secret.path().display()
        ));

        let jobs = read_jobs(&[file.path()]).unwrap();
        assert_eq!("file-secret", jobs[0].config.as_ref().unwrap().passphrase);
    }

    #[test]
    fn readfile_missing_file_fails_the_load() {
        let file = write_config(
            r#"
[[job]]
name = "badfile"
schedule = "@daily"

[job.config]
repo = "./repo"
passphrase = 'readfile("/definitely/not/here")'

[job.backup]
paths = ["/data"]
"#,
        );

        assert!(read_jobs(&[file.path()]).is_err());
    }

    #[test]
    fn empty_config_set_is_an_error() {
        let file = write_config("");
        assert!(read_jobs(&[file.path()]).is_err());
    }

    #[test]
    fn duplicate_job_names_are_rejected() {
        let file = write_config(
            r#"
[default_config]
repo = "./repo"
passphrase = "shh"

[[job]]
name = "twin"
schedule = "@daily"
[job.backup]
paths = ["/a"]

[[job]]
name = "twin"
schedule = "@daily"
[job.backup]
paths = ["/b"]
"#,
        );

        assert!(read_jobs(&[file.path()]).is_err());
    }

    #[test]
    fn invalid_job_fails_the_load() {
        let file = write_config(
            r#"
[[job]]
name = "broken"
schedule = "not a schedule"

[job.config]
repo = "./repo"
passphrase = "shh"

[job.backup]
paths = ["/data"]
"#,
        );

        assert!(read_jobs(&[file.path()]).is_err());
    }

    fn named_job(name: &str) -> Job {
        Job {
            name: name.into(),
            schedule: "@daily".into(),
            ..Default::default()
        }
    }

    #[test]
    fn filter_matches_and_reports_missing() {
        let jobs = vec![named_job("one"), named_job("two")];

        let (matched, err) = filter_jobs(&jobs, &["one".to_string()]);
        assert_eq!(1, matched.len());
        assert!(err.is_none());

        let (matched, err) = filter_jobs(&jobs, &["all".to_string()]);
        assert_eq!(2, matched.len());
        assert!(err.is_none());

        let (matched, err) =
            filter_jobs(&jobs, &["two".to_string(), "missing".to_string()]);
        assert_eq!(1, matched.len());
        assert_eq!("two", matched[0].name);
        assert_eq!(vec!["missing".to_string()], err.unwrap().0);
    }
}
