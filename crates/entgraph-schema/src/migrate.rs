//! Versioned migration runner.
//!
//! Applied versions are tracked in a `schema_migrations(version PRIMARY KEY,
//! applied TIMESTAMP)` table. Each pending migration runs inside its own
//! transaction; the version row is written in the same transaction, so a
//! failed migration leaves no trace.

use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use entgraph_core::{Cx, Dialect, Error, Outcome, Row, Value, try_outcome};

/// One migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: String,
    pub name: String,
    /// Statements to apply, separated by `;`.
    pub up: String,
}

impl Migration {
    pub fn new(version: impl Into<String>, name: impl Into<String>, up: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            name: name.into(),
            up: up.into(),
        }
    }

    /// Parse `20240115_create_users.up.sql` into version `20240115` and
    /// name `create_users`.
    pub fn from_filename(filename: &str, up: impl Into<String>) -> Result<Self, Error> {
        let stem = filename
            .rsplit('/')
            .next()
            .unwrap_or(filename)
            .trim_end_matches(".sql")
            .trim_end_matches(".up");
        let (version, name) = stem.split_once('_').unwrap_or((stem, ""));
        if version.is_empty() || !version.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::Custom(format!(
                "migration file {filename:?} does not start with a numeric version"
            )));
        }
        Ok(Self::new(version, name, up))
    }

    fn statements(&self) -> impl Iterator<Item = &str> {
        self.up.split(';').map(str::trim).filter(|s| !s.is_empty())
    }
}

/// The backend a [`Migrator`] runs against.
pub trait MigrationExecutor {
    fn dialect(&self) -> Dialect;
    fn execute(&self, cx: &Cx, sql: &str, params: &[Value]) -> Outcome<u64, Error>;
    fn query(&self, cx: &Cx, sql: &str, params: &[Value]) -> Outcome<Vec<Row>, Error>;
    fn begin(&self, cx: &Cx) -> Outcome<(), Error>;
    fn commit(&self, cx: &Cx) -> Outcome<(), Error>;
    fn rollback(&self, cx: &Cx) -> Outcome<(), Error>;
}

#[derive(Debug, Clone)]
pub struct MigratorConfig {
    /// Version-tracking table.
    pub table: String,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            table: "schema_migrations".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Applied,
    Pending,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MigrationState::Applied => "APPLIED",
            MigrationState::Pending => "PENDING",
        })
    }
}

/// A known migration cross-referenced against the tracking table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub version: String,
    pub name: String,
    pub state: MigrationState,
    /// Unix seconds.
    pub applied_at: Option<i64>,
}

pub struct Migrator<E: MigrationExecutor> {
    executor: E,
    migrations: Vec<Migration>,
    config: MigratorConfig,
}

impl<E: MigrationExecutor> Migrator<E> {
    /// Migrations are ordered lexically by version.
    pub fn new(executor: E, mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by(|a, b| a.version.cmp(&b.version));
        Self {
            executor,
            migrations,
            config: MigratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MigratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    fn ensure_table(&self, cx: &Cx) -> Outcome<(), Error> {
        let d = self.executor.dialect();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({} varchar(255) PRIMARY KEY, {} timestamp)",
            d.quote(&self.config.table),
            d.quote("version"),
            d.quote("applied")
        );
        try_outcome!(self.executor.execute(cx, &sql, &[]));
        Outcome::Ok(())
    }

    fn applied(&self, cx: &Cx) -> Outcome<HashMap<String, Option<i64>>, Error> {
        try_outcome!(self.ensure_table(cx));
        let d = self.executor.dialect();
        let sql = format!(
            "SELECT {}, {} FROM {}",
            d.quote("version"),
            d.quote("applied"),
            d.quote(&self.config.table)
        );
        let rows = try_outcome!(self.executor.query(cx, &sql, &[]));
        Outcome::Ok(
            rows.iter()
                .filter_map(|row| {
                    let version = row.get("version")?.to_id_string();
                    let applied = row.get("applied").and_then(Value::as_i64);
                    Some((version, applied))
                })
                .collect(),
        )
    }

    /// Apply every pending migration, returning the versions applied.
    #[tracing::instrument(level = "info", skip(self, cx), fields(known = self.migrations.len()))]
    pub fn up(&self, cx: &Cx) -> Outcome<Vec<String>, Error> {
        let applied = try_outcome!(self.applied(cx));
        let mut done = Vec::new();
        for migration in self
            .migrations
            .iter()
            .filter(|m| !applied.contains_key(&m.version))
        {
            try_outcome!(self.apply(cx, migration));
            tracing::info!(version = %migration.version, name = %migration.name, "Applied migration");
            done.push(migration.version.clone());
        }
        Outcome::Ok(done)
    }

    fn apply(&self, cx: &Cx, migration: &Migration) -> Outcome<(), Error> {
        try_outcome!(self.executor.begin(cx));
        let result = self.apply_in_transaction(cx, migration);
        match result {
            Outcome::Ok(()) => self.executor.commit(cx),
            other => {
                tracing::warn!(version = %migration.version, "Migration failed, rolling back");
                if let Outcome::Err(e) = self.executor.rollback(cx) {
                    tracing::warn!(error = %e, "Rollback failed");
                }
                other
            }
        }
    }

    fn apply_in_transaction(&self, cx: &Cx, migration: &Migration) -> Outcome<(), Error> {
        for stmt in migration.statements() {
            try_outcome!(self.executor.execute(cx, stmt, &[]));
        }
        let d = self.executor.dialect();
        let sql = format!(
            "INSERT INTO {} ({}, {}) VALUES ({}, {})",
            d.quote(&self.config.table),
            d.quote("version"),
            d.quote("applied"),
            d.placeholder(1),
            d.placeholder(2)
        );
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX));
        try_outcome!(self.executor.execute(
            cx,
            &sql,
            &[
                Value::Text(migration.version.clone()),
                Value::Timestamp(now)
            ]
        ));
        Outcome::Ok(())
    }

    /// Every known migration with its applied state.
    pub fn status(&self, cx: &Cx) -> Outcome<Vec<MigrationRecord>, Error> {
        let applied = try_outcome!(self.applied(cx));
        Outcome::Ok(
            self.migrations
                .iter()
                .map(|m| {
                    let applied_at = applied.get(&m.version);
                    MigrationRecord {
                        version: m.version.clone(),
                        name: m.name.clone(),
                        state: if applied_at.is_some() {
                            MigrationState::Applied
                        } else {
                            MigrationState::Pending
                        },
                        applied_at: applied_at.copied().flatten(),
                    }
                })
                .collect(),
        )
    }
}
