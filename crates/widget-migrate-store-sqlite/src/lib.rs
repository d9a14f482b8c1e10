use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use widget_migrate_core::{
    pending, run_all, ConfigRecord, FlagStore, MigrationRegistry, RecordId, RecordStore,
    RecordWrite, RunOptions, RunReport, StoreError, RECORD_KEYS,
};

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS records (
  record_id INTEGER PRIMARY KEY AUTOINCREMENT,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS record_values (
  record_id INTEGER NOT NULL,
  key TEXT NOT NULL CHECK (length(key) > 0),
  value TEXT NOT NULL,
  PRIMARY KEY (record_id, key),
  FOREIGN KEY (record_id) REFERENCES records(record_id)
);

CREATE TABLE IF NOT EXISTS migration_flags (
  name TEXT PRIMARY KEY CHECK (length(name) > 0),
  applied INTEGER NOT NULL CHECK (applied IN (0, 1)),
  updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_record_values_key ON record_values(key);
";

/// Host-side persistence for widget records and migration completion flags.
pub struct SqliteStore {
    conn: Connection,
}

/// [`RecordStore`] view over an open [`SqliteStore`].
pub struct SqliteRecords<'a> {
    conn: &'a Connection,
}

/// [`FlagStore`] view over an open [`SqliteStore`].
pub struct SqliteFlags<'a> {
    conn: &'a Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlagRow {
    pub name: String,
    pub applied: bool,
    pub updated_at: String,
}

/// A stored value under a key no migration reads or writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StrayValue {
    pub record_id: RecordId,
    pub key: String,
}

/// Consistency of stored widget data against what the migration registry expects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreHealth {
    pub sqlite_ok: bool,
    pub records: usize,
    pub stray_values: Vec<StrayValue>,
    /// Flags stored under names the registry does not know, e.g. after a rename.
    pub unknown_flags: Vec<String>,
    pub pending_migrations: Vec<String>,
    pub schema: SchemaStatus,
}

impl SqliteStore {
    /// Open a SQLite-backed widget store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Open a store and bring its table layout up to date.
    ///
    /// # Errors
    /// Returns an error when opening or migrating the database fails.
    pub fn open_migrated(path: &Path) -> Result<Self> {
        let mut store = Self::open(path)?;
        store.migrate()?;
        Ok(store)
    }

    /// Report current and target schema versions plus pending schema upgrades.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward schema upgrades up to the latest supported version.
    ///
    /// # Errors
    /// Returns an error when bootstrapping fails or the database is newer than this build.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;
        if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        if version < 1 {
            let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration v1")?;
            tracing::info!(version = 1, "applied store schema migration");
        }

        Ok(())
    }

    #[must_use]
    pub fn records(&self) -> SqliteRecords<'_> {
        SqliteRecords { conn: &self.conn }
    }

    #[must_use]
    pub fn flags(&self) -> SqliteFlags<'_> {
        SqliteFlags { conn: &self.conn }
    }

    /// Run every unapplied data migration in `registry` against this store.
    ///
    /// # Errors
    /// Returns an error when the schema cannot be migrated or the runner aborts.
    pub fn run_migrations(
        &mut self,
        registry: &MigrationRegistry,
        options: RunOptions,
    ) -> Result<RunReport> {
        self.migrate()?;
        let report = run_all(registry, &mut self.flags(), &mut self.records(), options)
            .context("data migration run failed")?;
        Ok(report)
    }

    /// Create a record holding `values` and return its new identifier.
    ///
    /// # Errors
    /// Returns an error when any write in the transaction fails.
    pub fn create_record(&mut self, values: &BTreeMap<String, String>) -> Result<RecordId> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute("INSERT INTO records(created_at) VALUES (?1)", params![now_rfc3339()?])
            .context("failed to insert record")?;
        let id = RecordId(tx.last_insert_rowid());
        for (key, value) in values {
            upsert_value(&tx, id, key, value)?;
        }
        tx.commit().context("failed to commit record")?;
        tracing::debug!(record = %id, keys = values.len(), "created record");
        Ok(id)
    }

    /// Delete a record and all of its values. Returns `false` when it did not exist.
    ///
    /// # Errors
    /// Returns an error when the delete transaction fails.
    pub fn delete_record(&mut self, id: RecordId) -> Result<bool> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute("DELETE FROM record_values WHERE record_id = ?1", params![id.0])
            .context("failed to delete record values")?;
        let deleted = tx
            .execute("DELETE FROM records WHERE record_id = ?1", params![id.0])
            .context("failed to delete record")?;
        tx.commit().context("failed to commit record delete")?;
        Ok(deleted > 0)
    }

    /// # Errors
    /// Returns an error when the record or its values cannot be read.
    pub fn record(&self, id: RecordId) -> Result<Option<ConfigRecord>> {
        let exists = self
            .conn
            .query_row("SELECT 1 FROM records WHERE record_id = ?1", params![id.0], |_| Ok(()))
            .optional()
            .with_context(|| format!("failed to read record {id}"))?;
        if exists.is_none() {
            return Ok(None);
        }

        let mut record = ConfigRecord::new(id);
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM record_values WHERE record_id = ?1 ORDER BY key ASC")?;
        let rows = stmt.query_map(params![id.0], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (key, value) = row?;
            record.values.insert(key, value);
        }
        Ok(Some(record))
    }

    /// # Errors
    /// Returns an error when records cannot be enumerated or read.
    pub fn list_records(&self) -> Result<Vec<ConfigRecord>> {
        let mut records = Vec::new();
        for id in list_record_ids(&self.conn)? {
            if let Some(record) = self.record(id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// # Errors
    /// Returns an error when the record does not exist or the write fails.
    pub fn set_value(&self, id: RecordId, key: &str, value: &str) -> Result<()> {
        upsert_value(&self.conn, id, key, value)
    }

    /// # Errors
    /// Returns an error when the value cannot be read.
    pub fn get_value(&self, id: RecordId, key: &str) -> Result<Option<String>> {
        select_value(&self.conn, id, key)
    }

    /// # Errors
    /// Returns an error when the flag table cannot be read.
    pub fn list_flags(&self) -> Result<Vec<FlagRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, applied, updated_at FROM migration_flags ORDER BY name ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(FlagRow {
                name: row.get(0)?,
                applied: row.get::<_, i64>(1)? == 1,
                updated_at: row.get(2)?,
            })
        })?;

        let mut flags = Vec::new();
        for row in rows {
            flags.push(row?);
        }
        Ok(flags)
    }

    /// Compare stored values and flags with the keys and steps `registry` knows about.
    ///
    /// # Errors
    /// Returns an error when a health query fails.
    pub fn check_health(&self, registry: &MigrationRegistry) -> Result<StoreHealth> {
        let sqlite_ok = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?
            == "ok";

        let mut stmt = self
            .conn
            .prepare("SELECT record_id, key FROM record_values ORDER BY record_id ASC, key ASC")
            .context("failed to prepare value key listing")?;
        let rows = stmt.query_map([], |row| {
            Ok(StrayValue { record_id: RecordId(row.get(0)?), key: row.get(1)? })
        })?;
        let mut stray_values = Vec::new();
        for row in rows {
            let value = row?;
            if !RECORD_KEYS.iter().any(|key| *key == value.key) {
                stray_values.push(value);
            }
        }

        let known = registry.names();
        let unknown_flags = self
            .list_flags()?
            .into_iter()
            .map(|flag| flag.name)
            .filter(|name| !known.iter().any(|known| *known == name.as_str()))
            .collect::<Vec<_>>();

        let pending_migrations = pending(registry, &self.flags())
            .context("failed to read migration flags")?
            .into_iter()
            .map(str::to_string)
            .collect();

        let health = StoreHealth {
            sqlite_ok,
            records: list_record_ids(&self.conn)?.len(),
            stray_values,
            unknown_flags,
            pending_migrations,
            schema: self.schema_status()?,
        };
        if !health.unknown_flags.is_empty() {
            tracing::warn!(flags = ?health.unknown_flags, "unregistered migration flags stored");
        }
        Ok(health)
    }
}

impl RecordStore for SqliteRecords<'_> {
    fn record_ids(&self) -> Result<Vec<RecordId>, StoreError> {
        list_record_ids(self.conn).map_err(store_error)
    }

    fn get(&self, id: RecordId, key: &str) -> Result<Option<String>, StoreError> {
        select_value(self.conn, id, key).map_err(store_error)
    }

    fn set(&mut self, id: RecordId, key: &str, value: &str) -> Result<(), StoreError> {
        upsert_value(self.conn, id, key, value).map_err(store_error)
    }

    fn set_all(&mut self, id: RecordId, writes: &[RecordWrite]) -> Result<(), StoreError> {
        upsert_values(self.conn, id, writes).map_err(store_error)
    }
}

impl FlagStore for SqliteFlags<'_> {
    fn is_applied(&self, name: &str) -> Result<bool, StoreError> {
        self.conn
            .query_row(
                "SELECT applied FROM migration_flags WHERE name = ?1",
                params![name],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map(|applied| applied == Some(1))
            .with_context(|| format!("failed to read migration flag {name}"))
            .map_err(store_error)
    }

    fn set_applied(&mut self, name: &str, applied: bool) -> Result<(), StoreError> {
        write_flag(self.conn, name, applied).map_err(store_error)
    }
}

#[allow(clippy::needless_pass_by_value)]
fn store_error(err: anyhow::Error) -> StoreError {
    StoreError::new(format!("{err:#}"))
}

fn list_record_ids(conn: &Connection) -> Result<Vec<RecordId>> {
    let mut stmt = conn
        .prepare("SELECT record_id FROM records ORDER BY record_id ASC")
        .context("failed to prepare record listing")?;
    let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(RecordId(row?));
    }
    Ok(ids)
}

fn select_value(conn: &Connection, id: RecordId, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM record_values WHERE record_id = ?1 AND key = ?2",
        params![id.0, key],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .with_context(|| format!("failed to read {key} for record {id}"))
}

fn upsert_value(conn: &Connection, id: RecordId, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO record_values(record_id, key, value) VALUES (?1, ?2, ?3)
         ON CONFLICT(record_id, key) DO UPDATE SET value = excluded.value",
        params![id.0, key, value],
    )
    .with_context(|| format!("failed to write {key} for record {id}"))?;
    Ok(())
}

fn upsert_values(conn: &Connection, id: RecordId, writes: &[RecordWrite]) -> Result<()> {
    let tx = conn
        .unchecked_transaction()
        .with_context(|| format!("failed to start write transaction for record {id}"))?;
    for write in writes {
        upsert_value(&tx, id, &write.key, &write.value)?;
    }
    tx.commit().with_context(|| format!("failed to commit writes for record {id}"))
}

fn write_flag(conn: &Connection, name: &str, applied: bool) -> Result<()> {
    conn.execute(
        "INSERT INTO migration_flags(name, applied, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(name) DO UPDATE SET applied = excluded.applied, updated_at = excluded.updated_at",
        params![name, i64::from(applied), now_rfc3339()?],
    )
    .with_context(|| format!("failed to write migration flag {name}"))?;
    Ok(())
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}
