use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use petshop_core::{
    config::{self, AppConfig},
    db::{self, DbConfig},
    migrator::Migrator,
};
use sea_orm_migration::MigratorTrait;
use tracing::info;

/// Applies or inspects the pet shop schema
#[derive(Debug, Parser)]
#[command(name = "petshop-migrate", version, about)]
struct Cli {
    /// Overrides the configured database URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending migrations (default)
    Up {
        /// Number of migrations to apply
        #[arg(long)]
        steps: Option<u32>,
    },
    /// Roll back applied migrations
    Down {
        /// Number of migrations to roll back
        #[arg(long, default_value_t = 1)]
        steps: u32,
    },
    /// Drop every table and apply all migrations again
    Fresh,
    /// List migrations and whether they are applied
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut app_config: AppConfig = config::load_config().context("failed to load configuration")?;
    if let Some(url) = cli.database_url {
        app_config.database_url = url;
    }
    config::init_tracing(app_config.log_level(), app_config.log_json);

    let pool = db::establish_connection_with_config(&DbConfig::from(&app_config))
        .await
        .context("failed to connect to the database")?;

    match cli.command.unwrap_or(Command::Up { steps: None }) {
        Command::Up { steps } => {
            info!(?steps, "Applying migrations");
            Migrator::up(&pool, steps).await?;
        }
        Command::Down { steps } => {
            info!(steps, "Rolling back migrations");
            Migrator::down(&pool, Some(steps)).await?;
        }
        Command::Fresh => {
            info!("Recreating schema");
            Migrator::fresh(&pool).await?;
        }
        Command::Status => {
            Migrator::status(&pool).await?;
        }
    }

    db::close_pool(pool).await?;
    info!("Migration command finished");
    Ok(())
}
