use std::io::Read as _;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use settle_apply::{Reconciler, ReconcileConfig};
use settle_core::{NamespacePolicy, ResourceId};
use settle_kubehub::KubeClient;
use settle_persist::{HandleStore, SqliteStore};
use tracing::{info, warn};

mod handles;

#[derive(Parser, Debug)]
#[command(name = "settlectl", version, about = "Apply a manifest and wait for it to settle")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace parameter; the manifest's own namespace wins when set
    #[arg(long = "ns", global = true, env = "SETTLE_NAMESPACE", default_value = "")]
    namespace: String,

    /// Convergence timeout in seconds
    #[arg(long = "timeout", global = true, env = "SETTLE_TIMEOUT_SECS", default_value_t = 1200)]
    timeout: u64,

    /// Namespace policy when neither manifest nor parameter name one (permissive|strict)
    #[arg(long = "namespace-policy", global = true, value_parser = NamespacePolicy::from_str)]
    namespace_policy: Option<NamespacePolicy>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the object in a manifest and wait until it is ready
    Create {
        /// Manifest file ("-" reads stdin)
        #[arg(short = 'f', long = "file")]
        file: String,
    },
    /// Print the live object behind an identifier
    Read {
        /// Identifier, e.g. "default::apps/v1::Deployment::web"
        id: String,
    },
    /// Apply a new manifest to an existing object
    Update {
        id: String,
        #[arg(short = 'f', long = "file")]
        file: String,
    },
    /// Delete an object and wait until it is gone
    Delete {
        id: String,
    },
    /// Create or update the object tracked under a local key
    Apply {
        #[arg(long = "key")]
        key: String,
        #[arg(short = 'f', long = "file")]
        file: String,
    },
    /// Delete the object tracked under a local key
    Destroy {
        #[arg(long = "key")]
        key: String,
    },
    /// List tracked keys, refreshing each against the cluster
    State,
}

fn init_tracing() {
    let env = std::env::var("SETTLE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout carries command output
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("SETTLE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid SETTLE_METRICS_ADDR; expected host:port");
        }
    }
}

fn read_manifest(file: &str) -> Result<String> {
    if file == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading manifest from stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(file).with_context(|| format!("reading manifest {}", file))
}

fn parse_id(id: &str) -> Result<ResourceId> {
    id.parse::<ResourceId>().map_err(Into::into)
}

#[derive(Serialize)]
struct IdRow<'a> {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
    action: &'a str,
}

fn print_id(output: Output, id: &ResourceId, key: Option<&str>, action: &str) -> Result<()> {
    match output {
        Output::Human => match key {
            Some(k) => println!("{} {} ({})", action, id, k),
            None => println!("{} {}", action, id),
        },
        Output::Json => println!("{}", serde_json::to_string_pretty(&IdRow { id: id.to_string(), key, action })?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let mut config = ReconcileConfig::from_env();
    if let Some(policy) = cli.namespace_policy {
        config.namespace_policy = policy;
    }
    let timeout = Duration::from_secs(cli.timeout);
    let client = KubeClient::try_default().await?;
    let rec = Reconciler::new(Arc::new(client), config);

    match cli.command {
        Commands::Create { file } => {
            let content = read_manifest(&file)?;
            let id = rec.create(&cli.namespace, &content, timeout).await?;
            print_id(cli.output, &id, None, "created")?;
        }
        Commands::Read { id } => {
            let id = parse_id(&id)?;
            let obj = rec.read(&id).await?;
            match cli.output {
                Output::Human => print!("{}", serde_yaml::to_string(&obj)?),
                Output::Json => println!("{}", serde_json::to_string_pretty(&obj)?),
            }
        }
        Commands::Update { id, file } => {
            let id = parse_id(&id)?;
            let content = read_manifest(&file)?;
            let next = rec.update(&id, &content, timeout).await?;
            print_id(cli.output, &next, None, "updated")?;
        }
        Commands::Delete { id } => {
            let id = parse_id(&id)?;
            match rec.delete(&id, timeout).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => warn!(id = %id, "object already gone"),
                Err(e) => return Err(e.into()),
            }
            print_id(cli.output, &id, None, "deleted")?;
        }
        Commands::Apply { key, file } => {
            let store = SqliteStore::open_default()?;
            let content = read_manifest(&file)?;
            let (id, action) = handles::apply(&rec, &store, &key, &cli.namespace, &content, timeout).await?;
            print_id(cli.output, &id, Some(&key), &action.to_string())?;
        }
        Commands::Destroy { key } => {
            let store = SqliteStore::open_default()?;
            match handles::destroy(&rec, &store, &key, timeout).await? {
                Some(id) => print_id(cli.output, &id, Some(&key), "deleted")?,
                None => info!(key = %key, "nothing tracked under key"),
            }
        }
        Commands::State => {
            let store = SqliteStore::open_default()?;
            #[derive(Serialize)]
            struct Row { key: String, id: String, namespace: String, live: bool, ts: i64 }
            let mut rows = Vec::new();
            for h in store.list()? {
                let live = handles::refresh(&rec, &store, &h.key).await?.is_some();
                rows.push(Row { key: h.key, id: h.id, namespace: h.namespace, live, ts: h.ts });
            }
            match cli.output {
                Output::Human => {
                    println!("{:<20} {:<6} ID", "KEY", "LIVE");
                    for r in &rows {
                        println!("{:<20} {:<6} {}", r.key, if r.live { "yes" } else { "gone" }, r.id);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
            }
        }
    }

    Ok(())
}
