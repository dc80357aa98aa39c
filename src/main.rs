//! tablekit - Main entry point.
//!
//! Administration tool for the settings stored through the storage layer.

use tablekit::config::{Command, Config};
use tablekit::db::Driver;
use tablekit::models::TypeMapperRegistry;
use tablekit::{ConfigStore, Database};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // stdout carries command output
    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn run(config: &Config) -> CliResult {
    let backend = config.backend()?;
    info!(dialect = %backend.dialect(), "Starting tablekit v{}", env!("CARGO_PKG_VERSION"));

    let db = Database::open_with(
        &backend,
        TypeMapperRegistry::standard(),
        config.acquire_timeout(),
    )?;
    run_command(&db, &config.command)
}

/// Run one command and drain the pool afterwards, whether it failed or not.
fn run_command<D: Driver>(db: &Database<D>, command: &Command) -> CliResult {
    let result = ConfigStore::new(db)
        .map_err(Into::into)
        .and_then(|store| execute(&store, command));
    db.shutdown();
    result
}

fn execute<D: Driver>(store: &ConfigStore<D>, command: &Command) -> CliResult {
    match command {
        Command::Get {
            scope,
            key,
            default,
        } => match store.get(scope, key)?.or_else(|| default.clone()) {
            Some(value) => {
                println!("{value}");
                Ok(())
            }
            None => Err(format!("No setting '{key}' in scope '{scope}'").into()),
        },
        Command::Set { scope, key, value } => {
            store.set(scope, key, Some(value.as_str()))?;
            Ok(())
        }
        Command::Delete { scope, key } => {
            store.delete(scope, key)?;
            Ok(())
        }
        Command::List { scope, json } => {
            for setting in store.list(scope)? {
                if *json {
                    println!("{}", serde_json::to_string(&setting)?);
                } else {
                    println!("{}={}", setting.name, setting.value);
                }
            }
            Ok(())
        }
        Command::Schema => {
            println!("{};", store.create_table_sql());
            Ok(())
        }
    }
}

fn main() {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    if let Err(e) = run(&config) {
        error!(error = %e, "Command failed");
        eprintln!("Error: {e}");
        if let Some(suggestion) = e
            .downcast_ref::<tablekit::DbError>()
            .and_then(|db_err| db_err.suggestion())
        {
            eprintln!("Hint: {suggestion}");
        }
        std::process::exit(1);
    }
}
