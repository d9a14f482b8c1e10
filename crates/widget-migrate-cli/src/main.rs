use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;
use widget_migrate_core::{pending, MigrationRegistry, RecordId, RunOptions};
use widget_migrate_store_sqlite::SqliteStore;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "wm")]
#[command(about = "Widget preference migration CLI")]
struct Cli {
    #[arg(long, default_value = "./widget_prefs.sqlite3")]
    db: PathBuf,

    /// Log filter directives; `RUST_LOG` takes precedence when set.
    #[arg(long, default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Record {
        #[command(subcommand)]
        command: RecordCommand,
    },
    Flags {
        #[command(subcommand)]
        command: FlagsCommand,
    },
    Migrate {
        #[command(subcommand)]
        command: MigrateCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate,
    /// Report stray value keys, unregistered flags and pending migrations.
    Check,
}

#[derive(Debug, Subcommand)]
enum RecordCommand {
    Add(RecordAddArgs),
    Set(RecordSetArgs),
    Show(RecordIdArgs),
    List,
    Delete(RecordIdArgs),
}

#[derive(Debug, Args)]
struct RecordAddArgs {
    /// `key=value` pair; repeatable.
    #[arg(long = "value", value_parser = parse_key_value)]
    values: Vec<(String, String)>,
}

#[derive(Debug, Args)]
struct RecordSetArgs {
    #[arg(long)]
    id: i64,
    #[arg(long)]
    key: String,
    #[arg(long)]
    value: String,
}

#[derive(Debug, Args)]
struct RecordIdArgs {
    #[arg(long)]
    id: i64,
}

/// Completion flags are read-only here; only a migration run sets them.
#[derive(Debug, Subcommand)]
enum FlagsCommand {
    List,
}

#[derive(Debug, Subcommand)]
enum MigrateCommand {
    Status,
    Run(MigrateRunArgs),
}

#[derive(Debug, Args)]
struct MigrateRunArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got `{raw}`")),
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing(directives: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!("failed to initialize logging: {err}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log)?;

    let mut store = SqliteStore::open(&cli.db)?;
    match cli.command {
        Command::Db { command } => run_db(command, &mut store),
        Command::Record { command } => run_record(command, &mut store),
        Command::Flags { command } => run_flags(&command, &mut store),
        Command::Migrate { command } => run_migrate(&command, &mut store),
    }
}

fn run_db(command: DbCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = store.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate => {
            let before = store.schema_status()?;
            store.migrate()?;
            let after = store.schema_status()?;
            emit_json(serde_json::json!({
                "before_version": before.current_version,
                "applied_versions": before.pending_versions,
                "after_version": after.current_version,
                "up_to_date": after.pending_versions.is_empty()
            }))
        }
        DbCommand::Check => {
            store.migrate()?;
            let health = store.check_health(&MigrationRegistry::builtin())?;
            emit_json(serde_json::to_value(&health).context("failed to serialize store health")?)
        }
    }
}

fn run_record(command: RecordCommand, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    match command {
        RecordCommand::Add(args) => {
            let values = args.values.into_iter().collect::<BTreeMap<_, _>>();
            let id = store.create_record(&values)?;
            emit_json(serde_json::json!({ "id": id, "values": values }))
        }
        RecordCommand::Set(args) => {
            let id = RecordId(args.id);
            store.set_value(id, &args.key, &args.value)?;
            emit_json(serde_json::json!({ "id": id, "key": args.key, "value": args.value }))
        }
        RecordCommand::Show(args) => {
            let id = RecordId(args.id);
            let record = store.record(id)?.ok_or_else(|| anyhow!("record {id} does not exist"))?;
            emit_json(serde_json::to_value(&record).context("failed to serialize record")?)
        }
        RecordCommand::List => {
            let records = store.list_records()?;
            emit_json(serde_json::json!({ "records": records }))
        }
        RecordCommand::Delete(args) => {
            let id = RecordId(args.id);
            let deleted = store.delete_record(id)?;
            emit_json(serde_json::json!({ "id": id, "deleted": deleted }))
        }
    }
}

fn run_flags(command: &FlagsCommand, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    match command {
        FlagsCommand::List => {
            let flags = store.list_flags()?;
            emit_json(serde_json::json!({ "flags": flags }))
        }
    }
}

fn run_migrate(command: &MigrateCommand, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    let registry = MigrationRegistry::builtin();
    match command {
        MigrateCommand::Status => {
            let pending = pending(&registry, &store.flags())
                .context("failed to read migration flags")?;
            let applied = registry
                .names()
                .into_iter()
                .filter(|name| !pending.contains(name))
                .collect::<Vec<_>>();
            emit_json(serde_json::json!({
                "registered": registry.names(),
                "applied": applied,
                "pending": pending,
                "up_to_date": pending.is_empty()
            }))
        }
        MigrateCommand::Run(args) => {
            let report = store.run_migrations(&registry, RunOptions { dry_run: args.dry_run })?;
            emit_json(serde_json::to_value(&report).context("failed to serialize run report")?)
        }
    }
}
