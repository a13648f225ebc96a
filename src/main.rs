use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pgstore::config::StoreConfig;
use pgstore::db::{create_pool, Executor, PgExecutor, RecordingExecutor};
use pgstore::store::{Operation, PurgeFlags, Storage, StoreError};
use tracing_subscriber::EnvFilter;

/// Historian storage requests against PostgreSQL
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Config file (defaults to the per-user pgstore/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print the generated SQL instead of running it
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

/// Payload arguments take JSON text, or `@path` to read it from a file.
#[derive(Subcommand)]
enum Command {
    /// Query a table
    Retrieve { table: String, payload: Option<String> },
    /// Insert one row
    Insert { table: String, payload: String },
    /// Update rows
    Update { table: String, payload: String },
    /// Delete rows; without a payload every row goes
    Delete { table: String, payload: Option<String> },
    /// Append a batch of readings
    Append { payload: String },
    /// Fetch a block of readings by id
    Fetch {
        #[arg(long)]
        id: u64,
        #[arg(long)]
        size: u64,
    },
    /// Remove readings older than a number of hours
    Purge {
        /// Age in hours; 0 uses the age of the oldest reading
        #[arg(long)]
        age: u64,
        /// 0x01 retains readings that have not been sent
        #[arg(long, default_value_t = 0)]
        flags: u32,
        /// Id of the last reading sent
        #[arg(long, default_value_t = 0)]
        sent: u64,
    },
    /// Report the on-disk size of a table
    TableSize { table: String },
}

impl Command {
    fn into_request(self) -> (Operation, String, Option<String>) {
        match self {
            Command::Retrieve { table, payload } => (Operation::Retrieve, table, payload),
            Command::Insert { table, payload } => (Operation::Insert, table, Some(payload)),
            Command::Update { table, payload } => (Operation::Update, table, Some(payload)),
            Command::Delete { table, payload } => (Operation::Delete, table, payload),
            Command::Append { payload } => (Operation::AppendReadings, String::new(), Some(payload)),
            Command::Fetch { id, size } => (Operation::FetchReadings { id, size }, String::new(), None),
            Command::Purge { age, flags, sent } => (
                Operation::PurgeReadings {
                    age,
                    flags: PurgeFlags::from_bits(flags),
                    sent,
                },
                String::new(),
                None,
            ),
            Command::TableSize { table } => (Operation::TableSize, table, None),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pgstore=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::load_default()?,
    };
    let (operation, table, payload) = cli.command.into_request();
    let payload = match payload {
        Some(arg) => read_payload(&arg)?,
        None => String::new(),
    };

    let outcome = if cli.dry_run {
        let storage = storage(&config, RecordingExecutor::new());
        let outcome = storage.handle(operation, &table, &payload).await;
        for sql in storage.executor().statements() {
            println!("{}", sql);
        }
        outcome.map(|_| ())
    } else {
        // Resolve password: PGPASSWORD env var, then interactive prompt
        if config.connection.password.is_empty() {
            if let Ok(pw) = std::env::var("PGPASSWORD") {
                config.connection.password = pw;
            } else if std::env::var(pgstore::db::CONNECTION_ENV).is_err() {
                let prompt = format!("Password for {}: ", config.connection.display_string());
                config.connection.password = rpassword::read_password_from_tty(Some(&prompt))?;
            }
        }
        let pool = create_pool(&config.connection, config.pool_size)?;
        let storage = storage(&config, PgExecutor::new(pool));
        storage
            .handle(operation, &table, &payload)
            .await
            .map(|reply| println!("{:#}", reply))
    };

    if let Err(err) = outcome {
        report(&err);
        std::process::exit(1);
    }
    Ok(())
}

fn storage<E: Executor>(config: &StoreConfig, executor: E) -> Storage<E> {
    Storage::new(executor)
        .with_compiler(config.compiler())
        .with_null_policy(config.null_policy)
        .with_sql_logging(config.log_sql)
}

fn read_payload(arg: &str) -> Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read payload file: {}", path)),
        None => Ok(arg.to_string()),
    }
}

fn report(err: &StoreError) {
    match err.backend() {
        Some(backend) => eprintln!("Error: {}\n{}", err, backend.report()),
        None => eprintln!("Error: {}", err),
    }
}
