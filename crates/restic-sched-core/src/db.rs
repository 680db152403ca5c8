//! Database dump tasks.
//!
//! Each database task is a factory for two [`ScriptTask`]s: a pre-task that
//! dumps the database to a file before the snapshot, and a post-task that
//! loads the dumped file back after a restore. The rendered command text is
//! pinned by tests because operators diff it against their own invocations.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::task::ScriptTask;

fn push_str(command: &mut Vec<String>, flag: &str, value: &str) {
    if !value.is_empty() {
        command.push(flag.to_string());
        command.push(value.to_string());
    }
}

fn push_uint(command: &mut Vec<String>, flag: &str, value: u32) {
    if value > 0 {
        command.push(flag.to_string());
        command.push(value.to_string());
    }
}

fn push_flag(command: &mut Vec<String>, flag: &str, on: bool) {
    if on {
        command.push(flag.to_string());
    }
}

/// `dump_to` must name a (possibly not yet existing) file, never a directory.
fn validate_dump_path(name: &str, dump_to: &str) -> Result<(), ValidationError> {
    if dump_to.is_empty() {
        return Err(ValidationError::missing(format!(
            "task {name} is missing a dump_to path"
        )));
    }

    if let Ok(meta) = std::fs::metadata(Path::new(dump_to)) {
        if meta.is_dir() {
            return Err(ValidationError::invalid(format!(
                "task {name}: dump_to cannot be a directory"
            )));
        }
    }

    Ok(())
}

/// MySQL (or MariaDB) dump task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MySqlTask {
    pub name: String,
    pub hostname: String,
    pub port: u32,
    pub username: String,
    pub password: String,
    pub database: String,
    pub tables: Vec<String>,
    pub no_tablespaces: bool,
    pub dump_to: String,
    pub use_mariadb: bool,
}

impl MySqlTask {
    fn client_command(&self) -> &'static str {
        if self.use_mariadb {
            "mariadb"
        } else {
            "mysql"
        }
    }

    fn dump_command(&self) -> &'static str {
        if self.use_mariadb {
            "mariadb-dump"
        } else {
            "mysqldump"
        }
    }

    /// Paths this task contributes to the file snapshot.
    pub fn paths(&self) -> Vec<String> {
        vec![self.dump_to.clone()]
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_dump_path(&self.name, &self.dump_to)?;

        if !self.tables.is_empty() && self.database.is_empty() {
            return Err(ValidationError::missing(format!(
                "task {}: a database is required when tables are listed",
                self.name
            )));
        }

        Ok(())
    }

    pub fn pre_task(&self) -> ScriptTask {
        let mut command = vec![
            self.dump_command().to_string(),
            "--result-file".to_string(),
            self.dump_to.clone(),
        ];

        push_str(&mut command, "--host", &self.hostname);
        push_uint(&mut command, "--port", self.port);
        push_str(&mut command, "--user", &self.username);

        // The `=` form keeps the password out of a separate argv slot.
        if !self.password.is_empty() {
            command.push(format!("--password={}", self.password));
        }

        push_flag(&mut command, "--no-tablespaces", self.no_tablespaces);

        if self.database.is_empty() {
            command.push("--all-databases".to_string());
        } else {
            command.push(self.database.clone());
        }

        command.extend(self.tables.iter().cloned());

        ScriptTask {
            name: self.name.clone(),
            on_backup: command.join(" "),
            cwd: ".".to_string(),
            ..Default::default()
        }
    }

    pub fn post_task(&self) -> ScriptTask {
        let mut command = vec![self.client_command().to_string()];

        push_str(&mut command, "--host", &self.hostname);
        push_uint(&mut command, "--port", self.port);
        push_str(&mut command, "--user", &self.username);

        if !self.password.is_empty() {
            command.push(format!("--password={}", self.password));
        }

        if !self.database.is_empty() {
            command.push(self.database.clone());
        }

        command.push("<".to_string());
        command.push(self.dump_to.clone());

        ScriptTask {
            name: self.name.clone(),
            on_restore: command.join(" "),
            cwd: ".".to_string(),
            ..Default::default()
        }
    }
}

/// Postgres dump task. The password travels via `PGPASSWORD`, never argv.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresTask {
    pub name: String,
    pub hostname: String,
    pub port: u32,
    pub username: String,
    pub password: String,
    pub database: String,
    pub tables: Vec<String>,
    pub no_tablespaces: bool,
    pub clean: bool,
    pub create: bool,
    pub dump_to: String,
}

impl PostgresTask {
    pub fn paths(&self) -> Vec<String> {
        vec![self.dump_to.clone()]
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_dump_path(&self.name, &self.dump_to)?;

        if !self.tables.is_empty() && self.database.is_empty() {
            return Err(ValidationError::missing(format!(
                "task {}: a database is required when tables are listed",
                self.name
            )));
        }

        Ok(())
    }

    fn password_env(&self) -> std::collections::BTreeMap<String, String> {
        let mut env = std::collections::BTreeMap::new();
        if !self.password.is_empty() {
            env.insert("PGPASSWORD".to_string(), self.password.clone());
        }

        env
    }

    pub fn pre_task(&self) -> ScriptTask {
        // pg_dumpall has no single-database mode; switch tools on that.
        let mut command = if self.database.is_empty() {
            vec!["pg_dumpall".to_string()]
        } else {
            vec!["pg_dump".to_string()]
        };

        command.push("--file".to_string());
        command.push(self.dump_to.clone());
        push_str(&mut command, "--host", &self.hostname);
        push_uint(&mut command, "--port", self.port);
        push_str(&mut command, "--username", &self.username);
        push_flag(&mut command, "--no-tablespaces", self.no_tablespaces);
        push_flag(&mut command, "--clean", self.clean);
        push_flag(&mut command, "--create", self.create);

        for table in &self.tables {
            command.push("--table".to_string());
            command.push(table.clone());
        }

        if !self.database.is_empty() {
            command.push(self.database.clone());
        }

        ScriptTask {
            name: self.name.clone(),
            on_backup: command.join(" "),
            cwd: ".".to_string(),
            env: self.password_env(),
            ..Default::default()
        }
    }

    pub fn post_task(&self) -> ScriptTask {
        let mut command = vec!["psql".to_string()];

        push_str(&mut command, "--host", &self.hostname);
        push_uint(&mut command, "--port", self.port);
        push_str(&mut command, "--username", &self.username);

        if !self.database.is_empty() {
            command.push(self.database.clone());
        }

        command.push("<".to_string());
        command.push(self.dump_to.clone());

        ScriptTask {
            name: self.name.clone(),
            on_restore: command.join(" "),
            cwd: ".".to_string(),
            env: self.password_env(),
            ..Default::default()
        }
    }
}

/// Sqlite dump task using the `.backup` dot command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteTask {
    pub name: String,
    pub path: String,
    pub dump_to: String,
}

impl SqliteTask {
    pub fn paths(&self) -> Vec<String> {
        vec![self.dump_to.clone()]
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_dump_path(&self.name, &self.dump_to)
    }

    pub fn pre_task(&self) -> ScriptTask {
        ScriptTask {
            name: self.name.clone(),
            on_backup: format!("sqlite3 '{}' '.backup {}'", self.path, self.dump_to),
            cwd: ".".to_string(),
            ..Default::default()
        }
    }

    pub fn post_task(&self) -> ScriptTask {
        ScriptTask {
            name: self.name.clone(),
            on_restore: format!("cp '{}' '{}'", self.dump_to, self.path),
            cwd: ".".to_string(),
            ..Default::default()
        }
    }
}
