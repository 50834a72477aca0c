use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use counter_activity::{
  ActivityExecutor, CatalogGateway, HttpCatalogGateway, LogNotifier, Notifier, StaticCatalog,
  WebhookNotifier, fulfillment_registry,
};
use counter_config::CounterConfig;
use counter_engine::Coordinator;
use counter_order::PlaceOrder;
use counter_store::{HistoryStore, InstanceStatus, OrderRepository, SqliteStore};

/// Counter - durable order fulfillment for a coffee shop counter
#[derive(Parser)]
#[command(name = "counter")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.counter)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Database URL (default: sqlite://<data-dir>/counter.db)
  #[arg(long, global = true, env = "COUNTER_DATABASE_URL")]
  database_url: Option<String>,

  /// Path to a JSON config file
  #[arg(long, global = true, env = "COUNTER_CONFIG")]
  config: Option<PathBuf>,

  /// Product catalog base URL, overriding the config file
  #[arg(long, global = true, env = "COUNTER_CATALOG_URL")]
  catalog_url: Option<String>,

  /// Notification webhook URL, overriding the config file
  #[arg(long, global = true, env = "COUNTER_NOTIFY_URL")]
  notify_url: Option<String>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Place an order read from stdin and fulfill it
  Place {
    /// Workflow instance id for the order
    #[arg(long)]
    instance_id: String,

    /// Return once the workflow is started instead of waiting for it to finish
    #[arg(long)]
    no_wait: bool,
  },

  /// Show the status of an instance and its order
  Status { instance_id: String },

  /// Print the recorded history of an instance
  History { instance_id: String },

  /// List all orders with their line items, oldest first
  Orders,

  /// Terminate a running instance
  Terminate {
    instance_id: String,

    #[arg(long, default_value = "terminated by operator")]
    reason: String,
  },

  /// Resume instances interrupted by a shutdown or crash
  Resume,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("counter=info")),
    )
    .with_writer(io::stderr)
    .init();

  let Some(command) = cli.command else {
    println!("counter - use --help to see available commands");
    return Ok(());
  };

  let mut config = match &cli.config {
    Some(path) => CounterConfig::from_file(path)?,
    None => CounterConfig::default(),
  };
  if cli.catalog_url.is_some() {
    config.catalog_url = cli.catalog_url;
  }
  if cli.notify_url.is_some() {
    config.notify_url = cli.notify_url;
  }

  let database_url = match cli.database_url {
    Some(url) => url,
    None => {
      let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => dirs::home_dir()
          .context("could not determine home directory")?
          .join(".counter"),
      };
      default_database_url(&data_dir)?
    }
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run(command, config, &database_url).await })
}

fn default_database_url(data_dir: &Path) -> Result<String> {
  std::fs::create_dir_all(data_dir)
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
  Ok(format!("sqlite://{}", data_dir.join("counter.db").display()))
}

async fn run(command: Commands, config: CounterConfig, database_url: &str) -> Result<()> {
  let store = SqliteStore::connect(database_url)
    .await
    .with_context(|| format!("failed to open database: {database_url}"))?;
  store.migrate().await.context("failed to migrate database")?;
  let store = Arc::new(store);

  let catalog: Arc<dyn CatalogGateway> = match &config.catalog_url {
    Some(url) => Arc::new(HttpCatalogGateway::new(url.clone())),
    None => Arc::new(StaticCatalog::coffee_menu()),
  };
  let notifier: Arc<dyn Notifier> = match &config.notify_url {
    Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
    None => Arc::new(LogNotifier),
  };

  let registry = fulfillment_registry(store.clone(), catalog, notifier)?;
  let executor = ActivityExecutor::from_config(registry, &config);
  let coordinator = Coordinator::new(store.clone(), store.clone(), executor, &config);

  let result = match command {
    Commands::Place {
      instance_id,
      no_wait,
    } => place(&coordinator, &instance_id, no_wait).await,
    Commands::Status { instance_id } => {
      let status = coordinator.get_status(&instance_id).await?;
      print_json(&status)
    }
    Commands::History { instance_id } => {
      let history = coordinator.history(&instance_id).await?;
      print_json(&history)
    }
    Commands::Orders => {
      let orders = store.list().await?;
      print_json(&orders)
    }
    Commands::Terminate {
      instance_id,
      reason,
    } => {
      coordinator.terminate(&instance_id, &reason).await?;
      let status = coordinator.get_status(&instance_id).await?;
      print_json(&status)
    }
    Commands::Resume => resume(&coordinator, store.as_ref()).await,
  };

  coordinator.shutdown().await;
  result
}

async fn place(coordinator: &Coordinator, instance_id: &str, no_wait: bool) -> Result<()> {
  let payload = read_payload_from_stdin()?;
  let order: PlaceOrder =
    serde_json::from_value(payload).context("failed to parse order from stdin")?;

  coordinator.start(instance_id, order).await?;
  eprintln!("Started instance: {instance_id}");

  if no_wait {
    // Activities already dispatched are cancelled on exit and resumed by
    // `counter resume`.
    return print_json(&coordinator.get_status(instance_id).await?);
  }

  let status = tokio::select! {
    status = coordinator.wait(instance_id) => status?,
    _ = tokio::signal::ctrl_c() => {
      eprintln!("Interrupted; resume with `counter resume`");
      coordinator.get_status(instance_id).await?
    }
  };
  print_json(&status)
}

async fn resume(coordinator: &Coordinator, store: &dyn HistoryStore) -> Result<()> {
  let running = store.list_instances(Some(InstanceStatus::Running)).await?;
  let resumed = coordinator.recover().await?;
  info!(resumed, "waiting for resumed instances");

  let mut statuses = Vec::with_capacity(running.len());
  for instance in running {
    statuses.push(coordinator.wait(&instance.instance_id).await?);
  }
  print_json(&statuses)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    bail!("expected an order JSON on stdin");
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read payload from stdin")?;

  if input.trim().is_empty() {
    bail!("expected an order JSON on stdin");
  }
  serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
}
