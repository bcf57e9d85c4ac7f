use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::PathBuf;

use syncstash::logging::init_tracing;
use syncstash::queue::{Mutation, MutationAction};
use syncstash::{App, Config};

#[derive(Parser, Debug)]
#[command(name = "syncstash")]
#[command(about = "Offline-first cache and mutation queue with background sync")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./syncstash.yaml or $XDG_CONFIG_HOME/syncstash/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run background sync and performance analysis until ctrl-c
  Run,
  /// Inspect or extend the offline queue
  Queue {
    #[command(subcommand)]
    command: QueueCommand,
  },
  /// Replay the offline queue once
  Sync,
  /// Manage the cache
  Cache {
    #[command(subcommand)]
    command: CacheCommand,
  },
  /// Print cache and performance statistics
  Report,
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
  /// List pending mutations
  List,
  /// Queue a mutation for the next sync
  Push {
    /// create, update or delete
    action: MutationAction,
    /// Endpoint path or URL
    endpoint: String,
    /// JSON payload
    payload: Option<String>,
  },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
  /// Remove every entry in the configured namespace
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let level = config.log_level.clone().unwrap_or_else(|| "warn".to_string());
  let _guard = init_tracing(&config.data_dir()?, &level)?;

  let mut app = App::new(config)?;

  match args.command {
    Command::Run => app.run().await?,
    Command::Queue {
      command: QueueCommand::List,
    } => {
      for item in app.queue().snapshot() {
        println!("{}", serde_json::to_string(&item)?);
      }
    }
    Command::Queue {
      command: QueueCommand::Push {
        action,
        endpoint,
        payload,
      },
    } => {
      let payload = match payload {
        Some(raw) => {
          serde_json::from_str(&raw).map_err(|e| eyre!("Payload is not valid JSON: {}", e))?
        }
        None => Value::Null,
      };
      let item = app
        .queue()
        .enqueue_mutation(Mutation::new(action, endpoint, payload));
      println!("Queued {} ({} pending)", item.id, app.queue().len());
    }
    Command::Sync => match app.coordinator().sync_now().await {
      Some(report) => {
        println!(
          "Applied {}, retried {}, dropped {}, remaining {}",
          report.applied.len(),
          report.retried,
          report.dropped.len(),
          report.remaining
        );
        if let Some(e) = report.persist_error {
          return Err(eyre!("Sync finished but the queue could not be saved: {}", e));
        }
      }
      None => println!("Nothing synced (offline or a sync is already running)"),
    },
    Command::Cache {
      command: CacheCommand::Clear,
    } => {
      app.access().cache().clear();
      println!("Cache cleared");
    }
    Command::Report => {
      let report = app.access().monitor().cache_performance_report();
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
  }

  Ok(())
}
