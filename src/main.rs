use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use storysync::config::Config;
use storysync::connectivity::Connectivity;
use storysync::migrate::{Migrator, SqliteLegacyStore};
use storysync::queue::ProcessOutcome;
use storysync::transport::RequestOptions;
use storysync::{logging, Engine};

#[derive(Parser, Debug)]
#[command(name = "storysync")]
#[command(about = "Inspect and drive the offline cache and sync queue of the story client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/storysync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Treat the network as unavailable
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show store, cache and queue counts
  Status,
  /// Replay queued mutations now
  Sync,
  /// Delete expired responses and old offline content
  Prune,
  /// Move drafts from a previous app version's database
  Migrate {
    /// Legacy database with a kv(key, value) table
    #[arg(long)]
    legacy: PathBuf,
  },
  /// Remove everything cached for a user
  Clear {
    #[arg(long)]
    owner: String,
  },
  /// List, requeue or discard dead-lettered mutations
  DeadLetters {
    #[arg(long, conflicts_with = "discard")]
    requeue: Option<Uuid>,
    #[arg(long)]
    discard: Option<Uuid>,
  },
  /// GET a url through the cache
  Fetch {
    url: String,
    /// Owner to file the cached response under
    #[arg(long)]
    owner: Option<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.logging)?;

  let engine = Engine::from_config(&config, Connectivity::new(!args.offline))?;

  match args.command {
    Command::Status => {
      let status = engine.status()?;
      println!("persistent:        {}", status.persistent);
      println!("schema version:    {}", status.schema_version);
      println!("online:            {}", status.online);
      println!("cached responses:  {}", status.cached_responses);
      println!("pending mutations: {}", status.pending_mutations);
      println!("dead letters:      {}", status.dead_letters);
    }
    Command::Sync => {
      if args.offline {
        return Err(eyre!("Cannot sync while offline"));
      }
      match engine.sync().await? {
        ProcessOutcome::Completed(report) => println!(
          "attempted {}, succeeded {}, failed {}, deferred {}, dead-lettered {}",
          report.attempted, report.succeeded, report.failed, report.deferred, report.dead_lettered
        ),
        ProcessOutcome::AlreadyRunning => println!("a sync pass is already running"),
      }
    }
    Command::Prune => {
      let pruned = engine.cache().prune_expired()?;
      let swept = engine.content().sweep_expired()?;
      println!("pruned {} cached responses, swept {} offline items", pruned, swept);
    }
    Command::Migrate { legacy } => {
      let legacy = SqliteLegacyStore::open(&legacy)?;
      let report = Migrator::new(Arc::new(legacy), engine.content().clone()).run();
      println!(
        "{}",
        serde_json::to_string_pretty(&report).map_err(|e| eyre!("Failed to format report: {}", e))?
      );
      if !report.success {
        return Err(eyre!("{} legacy entries could not be migrated", report.errors.len()));
      }
    }
    Command::Clear { owner } => {
      let removed = engine.clear_owner(&owner)?;
      println!("removed {} entries for {}", removed, owner);
    }
    Command::DeadLetters { requeue, discard } => {
      if let Some(id) = requeue {
        if !engine.queue().requeue_dead_letter(id)? {
          return Err(eyre!("No dead letter with id {}", id));
        }
        println!("requeued {}", id);
      } else if let Some(id) = discard {
        if !engine.queue().discard_dead_letter(id)? {
          return Err(eyre!("No dead letter with id {}", id));
        }
        println!("discarded {}", id);
      } else {
        for letter in engine.queue().dead_letters()? {
          println!(
            "{}  {} {}  retries={}  failed={}  {}",
            letter.mutation.id,
            letter.mutation.payload.method,
            letter.mutation.payload.url,
            letter.mutation.retry_count,
            letter.failed_at.format("%Y-%m-%d %H:%M:%S"),
            letter.last_error
          );
        }
      }
    }
    Command::Fetch { url, owner } => {
      let mut request = RequestOptions::get(url);
      if let Some(owner) = owner {
        request = request.with_owner(owner);
      }
      let response = engine.request(request).await?;
      println!("{} {}", response.status, response.status_text);
      if let Some(data) = response.data {
        println!(
          "{}",
          serde_json::to_string_pretty(&data).map_err(|e| eyre!("Failed to format response: {}", e))?
        );
      }
    }
  }

  Ok(())
}
