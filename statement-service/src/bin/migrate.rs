//! Schema management for statement-service.
//!
//! ```text
//! statement-migrate create        # create the database if it is missing
//! statement-migrate migrate       # apply pending migrations
//! statement-migrate status        # applied and pending migrations
//! statement-migrate reset --yes   # drop everything and re-apply
//! ```

use clap::{Parser, Subcommand};
use service_core::error::AppError;
use sqlx::migrate::MigrateDatabase;
use sqlx::Postgres;
use statement_service::services::database::{Database, MIGRATOR};
use std::collections::HashSet;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "statement-migrate",
    about = "Manage the statement-service database schema"
)]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database if it does not exist.
    Create,
    /// Apply pending migrations.
    Migrate,
    /// Show applied and pending migrations.
    Status,
    /// Drop all tables and data, then re-apply every migration.
    Reset {
        /// Confirm that all data will be deleted
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Command::Create => create(&cli.database_url).await,
        Command::Migrate => {
            let db = connect(&cli.database_url).await?;
            db.run_migrations().await
        }
        Command::Status => status(&connect(&cli.database_url).await?).await,
        Command::Reset { yes } => {
            if !yes {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "reset deletes all data; re-run with --yes to confirm"
                )));
            }
            let db = connect(&cli.database_url).await?;
            db.reset_schema().await?;
            db.run_migrations().await?;
            tracing::info!("Database reset completed");
            Ok(())
        }
    }
}

async fn connect(url: &str) -> Result<Database, AppError> {
    Database::new(url, 2, 1).await
}

async fn create(url: &str) -> Result<(), AppError> {
    let exists = Postgres::database_exists(url)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to check database: {}", e)))?;
    if exists {
        tracing::info!("Database already exists");
        return Ok(());
    }

    Postgres::create_database(url)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create database: {}", e)))?;
    tracing::info!("Database created");
    Ok(())
}

async fn status(db: &Database) -> Result<(), AppError> {
    let applied = db.applied_migrations().await?;
    let applied_versions: HashSet<i64> = applied.iter().map(|m| m.version).collect();

    if applied.is_empty() {
        println!("No migrations have been run");
    } else {
        println!("Applied migrations:");
        for m in &applied {
            let mark = if m.success { "ok  " } else { "FAIL" };
            println!(
                "  {} {:<16} {:<40} {} ({} ms)",
                mark,
                m.version,
                m.description,
                m.installed_on.format("%Y-%m-%d %H:%M:%S"),
                m.execution_time_ms
            );
        }
    }

    let pending: Vec<_> = MIGRATOR
        .iter()
        .filter(|m| !m.migration_type.is_down_migration())
        .filter(|m| !applied_versions.contains(&m.version))
        .collect();

    if pending.is_empty() {
        println!("Schema is up to date");
    } else {
        println!("Pending migrations:");
        for m in pending {
            println!("  {:<16} {}", m.version, m.description);
        }
    }
    Ok(())
}
