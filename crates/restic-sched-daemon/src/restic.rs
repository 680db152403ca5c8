//! The restic subprocess adapter.
//!
//! Every repository operation funnels through [`Restic::run`], which builds
//! the argv from the configured global options, injects the passphrase via
//! `RESTIC_PASSWORD`, streams output to the job logger and classifies
//! failures. The "is there a repository at..." stderr probe is the only way
//! restic distinguishes an uninitialized repository from a broken one.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::process::Command;

use restic_sched_core::{
    BackupOpts, ForgetOpts, ResticConfig, RestoreOpts, Snapshot, ToArgs, UnlockOpts,
};

use crate::logger::JobLogger;
use crate::shell::capture_command;

const REPO_NOT_FOUND_MARKER: &str = "Is there a repository at the following location?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResticErrorKind {
    /// The repository does not exist or is not initialized.
    RepoNotFound,
    /// Any other non-zero exit.
    CommandFailed,
}

#[derive(Debug, Error)]
pub enum ResticError {
    #[error("error running restic {command}: {kind:?}\noutput:\n{}", output.join("\n"))]
    Command {
        command: String,
        kind: ResticErrorKind,
        output: Vec<String>,
    },

    #[error("no snapshot output to parse")]
    EmptySnapshotOutput,

    #[error("failed parsing snapshot results: {0}")]
    SnapshotParse(#[from] serde_json::Error),

    #[error("failed spawning restic: {0}")]
    Spawn(#[from] std::io::Error),
}

impl ResticError {
    pub fn is_repo_not_found(&self) -> bool {
        matches!(
            self,
            ResticError::Command {
                kind: ResticErrorKind::RepoNotFound,
                ..
            }
        )
    }
}

/// A configured restic invocation target: one repository plus its
/// credentials, environment and global flags.
#[derive(Debug, Clone)]
pub struct Restic {
    pub repo: String,
    pub passphrase: String,
    pub env: BTreeMap<String, String>,
    pub global_opts: Option<restic_sched_core::ResticGlobalOpts>,
    pub cwd: Option<PathBuf>,
    pub logger: Arc<JobLogger>,
}

impl Restic {
    pub fn from_config(config: &ResticConfig, logger: Arc<JobLogger>) -> Self {
        Restic {
            repo: config.repo.clone(),
            passphrase: config.passphrase.clone(),
            env: config.env.clone(),
            global_opts: config.global_opts.clone(),
            cwd: None,
            logger,
        }
    }

    /// Extra environment applied on top of the inherited process env.
    fn build_env(&self) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        if !self.passphrase.is_empty() {
            env.insert("RESTIC_PASSWORD".to_string(), self.passphrase.clone());
        }

        env
    }

    fn build_args(&self, command: &str, opts: &[String], positional: &[String]) -> Vec<String> {
        let mut args = self
            .global_opts
            .as_ref()
            .map(ToArgs::to_args)
            .unwrap_or_default();

        args.push("--repo".to_string());
        args.push(self.repo.clone());
        args.push(command.to_string());
        args.extend(opts.iter().cloned());
        args.extend(positional.iter().cloned());

        args
    }

    /// Run one restic command, returning captured output or a classified
    /// error carrying the full merged output.
    pub async fn run(
        &self,
        command: &str,
        opts: &[String],
        positional: &[String],
    ) -> Result<crate::shell::CapturedOutput, ResticError> {
        let mut cmd = Command::new("restic");
        cmd.args(self.build_args(command, opts, positional));

        for (key, value) in self.build_env() {
            cmd.env(key, value);
        }

        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let (output, status) = capture_command(cmd, &self.logger).await?;

        if !status.success() {
            let kind = classify_failure(&output.stderr);

            return Err(ResticError::Command {
                command: command.to_string(),
                kind,
                output: output.all_lines(),
            });
        }

        Ok(output)
    }

    pub async fn backup(&self, paths: &[String], opts: &BackupOpts) -> Result<(), ResticError> {
        self.run("backup", &opts.to_args(), paths).await?;

        Ok(())
    }

    pub async fn restore(&self, snapshot: &str, opts: &RestoreOpts) -> Result<(), ResticError> {
        self.run("restore", &opts.to_args(), &[snapshot.to_string()])
            .await?;

        Ok(())
    }

    pub async fn forget(&self, opts: &ForgetOpts) -> Result<(), ResticError> {
        self.run("forget", &opts.to_args(), &[]).await?;

        Ok(())
    }

    pub async fn check(&self) -> Result<(), ResticError> {
        self.run("check", &[], &[]).await?;

        Ok(())
    }

    pub async fn unlock(&self, opts: &UnlockOpts) -> Result<(), ResticError> {
        self.run("unlock", &opts.to_args(), &[]).await?;

        Ok(())
    }

    /// List snapshots without parsing, to probe that the repository exists.
    pub async fn snapshots(&self) -> Result<(), ResticError> {
        self.run("snapshots", &[], &[]).await?;

        Ok(())
    }

    /// Read the snapshot list as JSON. Restic emits oldest first; "latest"
    /// is the final element.
    pub async fn read_snapshots(&self) -> Result<Vec<Snapshot>, ResticError> {
        let output = self
            .run("snapshots", &["--json".to_string()], &[])
            .await?;

        if output.stdout.is_empty() {
            return Err(ResticError::EmptySnapshotOutput);
        }

        let joined = output.stdout.join("");
        let snapshots: Vec<Snapshot> = serde_json::from_str(&joined)?;

        Ok(snapshots)
    }

    /// Initialize the repository if (and only if) it does not exist yet.
    pub async fn ensure_init(&self) -> Result<(), ResticError> {
        match self.snapshots().await {
            Ok(()) => Ok(()),
            Err(err) if err.is_repo_not_found() => {
                self.run("init", &[], &[]).await?;

                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

fn classify_failure(stderr: &[String]) -> ResticErrorKind {
    if stderr.iter().any(|line| line.contains(REPO_NOT_FOUND_MARKER)) {
        ResticErrorKind::RepoNotFound
    } else {
        ResticErrorKind::CommandFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger;
    use restic_sched_core::ResticGlobalOpts;

    fn test_restic() -> Restic {
        Restic {
            repo: "s3://bucket/repo".into(),
            passphrase: "shh".into(),
            env: BTreeMap::new(),
            global_opts: None,
            cwd: None,
            logger: logger::get("restic-test"),
        }
    }

    #[test]
    fn args_are_assembled_in_order() {
        let mut restic = test_restic();
        restic.global_opts = Some(ResticGlobalOpts {
            no_cache: true,
            ..Default::default()
        });

        let args = restic.build_args(
            "backup",
            &["--tag".to_string(), "nightly".to_string()],
            &["/data".to_string()],
        );

        assert_eq!(
            vec![
                "--no-cache".to_string(),
                "--repo".to_string(),
                "s3://bucket/repo".to_string(),
                "backup".to_string(),
                "--tag".to_string(),
                "nightly".to_string(),
                "/data".to_string(),
            ],
            args
        );
    }

    #[test]
    fn passphrase_lands_in_env() {
        let env = test_restic().build_env();
        assert_eq!(Some(&"shh".to_string()), env.get("RESTIC_PASSWORD"));

        let mut no_pass = test_restic();
        no_pass.passphrase.clear();
        assert!(!no_pass.build_env().contains_key("RESTIC_PASSWORD"));
    }

    #[test]
    fn configured_env_passes_through() {
        let mut restic = test_restic();
        restic
            .env
            .insert("AWS_ACCESS_KEY_ID".to_string(), "key".to_string());

        let env = restic.build_env();
        assert_eq!(Some(&"key".to_string()), env.get("AWS_ACCESS_KEY_ID"));
    }

    #[test]
    fn repo_not_found_is_detected_in_stderr() {
        let stderr = vec![
            "Fatal: unable to open config file".to_string(),
            "Is there a repository at the following location?".to_string(),
        ];
        assert_eq!(ResticErrorKind::RepoNotFound, classify_failure(&stderr));

        let other = vec!["Fatal: wrong password".to_string()];
        assert_eq!(ResticErrorKind::CommandFailed, classify_failure(&other));
    }

    #[tokio::test]
    async fn missing_repo_path_fails_as_not_found() {
        // `restic` may be absent on test machines; a spawn error is fine,
        // everything else must classify as repo-not-found.
        let mut restic = test_restic();
        let missing = tempfile::tempdir().unwrap();
        restic.repo = missing.path().join("no-repo").display().to_string();

        match restic.snapshots().await {
            Err(ResticError::Spawn(_)) => {}
            Err(err) => assert!(err.is_repo_not_found(), "unexpected error: {err}"),
            Ok(()) => panic!("expected an error for a missing repository"),
        }
    }
}
