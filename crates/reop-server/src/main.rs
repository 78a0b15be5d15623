//! `reop`: REOP record store server and maintenance commands.
//!
//! Reads `config.toml` (or the path given with `--config`), opens the SQLite
//! store and runs one subcommand:
//!
//! ```text
//! reop serve                      # default
//! reop migrate up | down --to N | status
//! reop backfill up | down [--collection NAME]
//! ```

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use reop_core::backfill::{self, BackfillOptions, SOURCE_COLLECTION};
use reop_server::{ServerConfig, app, expand_tilde, load_config};
use reop_store_sqlite::{SqliteStore, migrations::latest_version};
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "REOP record store")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
  /// Serve the JSON API over HTTP.
  Serve,
  /// Apply or revert relational schema migrations.
  #[command(subcommand)]
  Migrate(MigrateCommand),
  /// Run or roll back the target-profile document backfill.
  Backfill {
    #[command(subcommand)]
    direction: BackfillDirection,
    /// Document collection to transform.
    #[arg(long, global = true, default_value = SOURCE_COLLECTION)]
    collection: String,
  },
}

#[derive(Subcommand)]
enum MigrateCommand {
  /// Apply every pending migration.
  Up,
  /// Revert applied migrations newer than `--to`.
  Down {
    #[arg(long)]
    to: u32,
  },
  /// List applied migrations.
  Status,
}

#[derive(Subcommand)]
enum BackfillDirection {
  Up,
  Down,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let server_cfg =
    load_config(&cli.config).context("failed to load configuration")?;
  let store_path = expand_tilde(&server_cfg.store_path);
  if let Some(dir) = store_path.parent()
    && !dir.as_os_str().is_empty()
  {
    std::fs::create_dir_all(dir)
      .with_context(|| format!("failed to create {dir:?}"))?;
  }

  match cli.command.unwrap_or(Command::Serve) {
    Command::Serve => serve(&server_cfg, &store_path).await,
    Command::Migrate(cmd) => migrate(cmd, &store_path).await,
    Command::Backfill { direction, collection } => {
      let store = SqliteStore::open(&store_path)
        .await
        .with_context(|| format!("failed to open store at {store_path:?}"))?;
      let opts = BackfillOptions { collection, thresholds: server_cfg.thresholds };
      let report = match direction {
        BackfillDirection::Up => {
          serde_json::to_string_pretty(&backfill::run_up(&store, &opts).await?)?
        }
        BackfillDirection::Down => {
          serde_json::to_string_pretty(&backfill::run_down(&store, &opts).await?)?
        }
      };
      println!("{report}");
      Ok(())
    }
  }
}

async fn serve(cfg: &ServerConfig, store_path: &std::path::Path) -> anyhow::Result<()> {
  let store = SqliteStore::open(store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?
    .with_thresholds(cfg.thresholds);

  let app = app(Arc::new(store), cfg.weights);
  let address = cfg.address();

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

async fn migrate(
  cmd: MigrateCommand,
  store_path: &std::path::Path,
) -> anyhow::Result<()> {
  let store = SqliteStore::open_unmigrated(store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  match cmd {
    MigrateCommand::Up => {
      let applied = store.migrate_up().await.context("migration failed")?;
      if applied.is_empty() {
        println!("schema is up to date (version {})", latest_version());
      } else {
        println!("applied {applied:?}");
      }
    }
    MigrateCommand::Down { to } => {
      let reverted = store.migrate_down(to).await.context("rollback failed")?;
      println!("reverted {reverted:?}");
    }
    MigrateCommand::Status => {
      let applied = store.applied_migrations().await?;
      for m in &applied {
        println!("{:>3}  {:<32} {}", m.version, m.name, m.applied_at.to_rfc3339());
      }
      println!(
        "current {} / latest {}",
        store.schema_version().await?,
        latest_version()
      );
    }
  }
  Ok(())
}
