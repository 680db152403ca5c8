//! Option structs rendered into restic argv fragments, plus the snapshot
//! model parsed back from `restic snapshots --json`.
//!
//! Rendering rules: a string-valued flag is emitted only when the value is
//! non-empty, an integer-valued flag only when the value is positive, a
//! boolean flag only when true, and list-valued flags once per element. The
//! exact argv order matters; tests below pin it.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Append `--flag value` when `value` is non-empty.
pub fn arg_str(args: &mut Vec<String>, flag: &str, value: &str) {
    if !value.is_empty() {
        args.push(flag.to_string());
        args.push(value.to_string());
    }
}

/// Append `--flag value` when `value` is positive.
pub fn arg_uint(args: &mut Vec<String>, flag: &str, value: u32) {
    if value > 0 {
        args.push(flag.to_string());
        args.push(value.to_string());
    }
}

/// Append a bare `--flag` when `on` is true.
pub fn arg_flag(args: &mut Vec<String>, flag: &str, on: bool) {
    if on {
        args.push(flag.to_string());
    }
}

/// Append `--flag v` once per element.
pub fn arg_list(args: &mut Vec<String>, flag: &str, values: &[String]) {
    for value in values {
        args.push(flag.to_string());
        args.push(value.clone());
    }
}

/// Anything that renders itself as a restic argv fragment.
pub trait ToArgs {
    fn to_args(&self) -> Vec<String>;
}

/// A group of tags joined with commas on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagList(pub Vec<String>);

impl fmt::Display for TagList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}

/// A restic-style duration such as `1s`, `2h45m` or `30d`.
///
/// Stored as the configured text and passed through to restic verbatim;
/// validation only checks that the text parses and is non-negative.
pub fn parse_duration_secs(text: &str) -> Result<u64, ValidationError> {
    if text.is_empty() {
        return Err(ValidationError::invalid("duration cannot be empty"));
    }

    let mut total: u64 = 0;
    let mut number = String::new();

    for c in text.chars() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }

        let value: u64 = number
            .parse()
            .map_err(|_| ValidationError::invalid(format!("invalid duration {text:?}")))?;
        number.clear();

        let unit: u64 = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86_400,
            'w' => 604_800,
            'y' => 31_536_000,
            _ => {
                return Err(ValidationError::invalid(format!(
                    "invalid duration unit {c:?} in {text:?}"
                )))
            }
        };

        total += value * unit;
    }

    if !number.is_empty() {
        return Err(ValidationError::invalid(format!(
            "duration {text:?} is missing a trailing unit"
        )));
    }

    Ok(total)
}

fn validate_duration_field(value: &str, field: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Ok(());
    }

    parse_duration_secs(value)
        .map(|_| ())
        .map_err(|_| ValidationError::invalid(format!("{field} is not a valid duration: {value:?}")))
}

/// Global flags accepted by every restic invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResticGlobalOpts {
    pub cacert_file: String,
    pub cache_dir: String,
    pub password_file: String,
    pub tls_client_cert_file: String,
    pub limit_download: u32,
    pub limit_upload: u32,
    pub verbose_level: u32,
    pub cleanup_cache: bool,
    pub insecure_tls: bool,
    pub no_cache: bool,
    pub no_lock: bool,
    pub options: BTreeMap<String, String>,
}

impl ToArgs for ResticGlobalOpts {
    fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        arg_str(&mut args, "--cacert", &self.cacert_file);
        arg_str(&mut args, "--cache-dir", &self.cache_dir);
        arg_str(&mut args, "--password-file", &self.password_file);
        arg_str(&mut args, "--tls-client-cert", &self.tls_client_cert_file);
        arg_uint(&mut args, "--limit-download", self.limit_download);
        arg_uint(&mut args, "--limit-upload", self.limit_upload);
        arg_uint(&mut args, "--verbose", self.verbose_level);
        arg_flag(&mut args, "--cleanup-cache", self.cleanup_cache);
        arg_flag(&mut args, "--insecure-tls", self.insecure_tls);
        arg_flag(&mut args, "--no-cache", self.no_cache);
        arg_flag(&mut args, "--no-lock", self.no_lock);

        for (key, value) in &self.options {
            args.push("--option".to_string());
            args.push(format!("{key}='{value}'"));
        }

        args
    }
}

/// Options for `restic backup`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupOpts {
    pub exclude: Vec<String>,
    pub include: Vec<String>,
    pub tags: Vec<String>,
    pub host: String,
}

impl ToArgs for BackupOpts {
    fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        arg_list(&mut args, "--exclude", &self.exclude);
        arg_list(&mut args, "--include", &self.include);
        arg_list(&mut args, "--tag", &self.tags);
        arg_str(&mut args, "--host", &self.host);

        args
    }
}

/// Options for `restic restore`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreOpts {
    pub exclude: Vec<String>,
    pub include: Vec<String>,
    pub host: Vec<String>,
    pub tags: Vec<String>,
    pub path: String,
    pub target: String,
    pub verify: bool,
}

impl ToArgs for RestoreOpts {
    fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        arg_list(&mut args, "--exclude", &self.exclude);
        arg_list(&mut args, "--include", &self.include);
        arg_list(&mut args, "--host", &self.host);
        arg_list(&mut args, "--tag", &self.tags);
        arg_str(&mut args, "--path", &self.path);
        arg_str(&mut args, "--target", &self.target);
        arg_flag(&mut args, "--verify", self.verify);

        args
    }
}

/// Options for `restic unlock`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnlockOpts {
    pub remove_all: bool,
}

impl ToArgs for UnlockOpts {
    fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        arg_flag(&mut args, "--remove-all", self.remove_all);

        args
    }
}

/// Retention policy rendered into `restic forget` arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgetOpts {
    pub keep_last: u32,
    pub keep_hourly: u32,
    pub keep_daily: u32,
    pub keep_weekly: u32,
    pub keep_monthly: u32,
    pub keep_yearly: u32,

    pub keep_within: String,
    pub keep_within_hourly: String,
    pub keep_within_daily: String,
    pub keep_within_weekly: String,
    pub keep_within_monthly: String,
    pub keep_within_yearly: String,

    pub tags: Vec<TagList>,
    pub keep_tags: Vec<TagList>,

    pub prune: bool,
}

impl ForgetOpts {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_duration_field(&self.keep_within, "keep_within")?;
        validate_duration_field(&self.keep_within_hourly, "keep_within_hourly")?;
        validate_duration_field(&self.keep_within_daily, "keep_within_daily")?;
        validate_duration_field(&self.keep_within_weekly, "keep_within_weekly")?;
        validate_duration_field(&self.keep_within_monthly, "keep_within_monthly")?;
        validate_duration_field(&self.keep_within_yearly, "keep_within_yearly")?;

        Ok(())
    }
}

impl ToArgs for ForgetOpts {
    fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        arg_uint(&mut args, "--keep-last", self.keep_last);
        arg_uint(&mut args, "--keep-hourly", self.keep_hourly);
        arg_uint(&mut args, "--keep-daily", self.keep_daily);
        arg_uint(&mut args, "--keep-weekly", self.keep_weekly);
        arg_uint(&mut args, "--keep-monthly", self.keep_monthly);
        arg_uint(&mut args, "--keep-yearly", self.keep_yearly);

        arg_str(&mut args, "--keep-within", &self.keep_within);
        arg_str(&mut args, "--keep-within-hourly", &self.keep_within_hourly);
        arg_str(&mut args, "--keep-within-daily", &self.keep_within_daily);
        arg_str(&mut args, "--keep-within-weekly", &self.keep_within_weekly);
        arg_str(&mut args, "--keep-within-monthly", &self.keep_within_monthly);
        arg_str(&mut args, "--keep-within-yearly", &self.keep_within_yearly);

        for tag_list in &self.tags {
            args.push("--tag".to_string());
            args.push(tag_list.to_string());
        }

        for tag_list in &self.keep_tags {
            args.push("--keep-tag".to_string());
            args.push(tag_list.to_string());
        }

        arg_flag(&mut args, "--prune", self.prune);

        args
    }
}

/// One snapshot record as emitted by `restic snapshots --json`.
///
/// Restic emits the list oldest first; "latest" is the last element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub short_id: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub tree: String,
    pub hostname: String,
    pub username: String,
    #[serde(default)]
    pub uid: u32,
    #[serde(default)]
    pub gid: u32,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}
