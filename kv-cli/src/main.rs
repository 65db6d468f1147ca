use std::time::Duration;

use clap::{Parser, Subcommand};
use eyre::{eyre, Result};

use kv_client::command::CommandOptions;
use kv_client::observability::Observability;
use kv_client::options::{ClusterOptionsBuilder, Credentials, NetworkSelector};
use kv_client::{ClusterTracker, CommandRuntime};

#[derive(Parser, Debug)]
#[command(name = "kv-cli", version, about = "Drive a Couchbase KV cluster over the binary protocol")]
struct Args {
    /// Comma-separated seed addresses, e.g. "node1:11210,node2:11210".
    #[arg(long, default_value = "127.0.0.1:11210")]
    seeds: String,

    /// Bucket to select after authentication.
    #[arg(long)]
    bucket: Option<String>,

    /// Environment variable holding the password. Username comes from --username.
    #[arg(long, default_value = "Administrator")]
    username: String,

    #[arg(long, env = "KV_CLI_PASSWORD", default_value = "password")]
    password: String,

    /// Prefer the external network topology advertised by the cluster.
    #[arg(long)]
    external_network: bool,

    /// Per-operation timeout in milliseconds.
    #[arg(long, default_value_t = 2500)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a document by key.
    Get { key: String },
    /// Insert or overwrite a document.
    Upsert { key: String, value: String },
    /// Remove a document by key.
    Remove { key: String },
    /// Round-trip a NOOP against the node owning `key`'s vbucket.
    Ping { key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let seed_addresses: Vec<String> = args.seeds.split(',').map(|s| s.trim().to_string()).collect();
    let credentials = Credentials { username: args.username, password: args.password };

    let mut builder = ClusterOptionsBuilder::new(seed_addresses, credentials);
    if let Some(bucket) = &args.bucket {
        builder = builder.bucket(bucket.clone());
    }
    if args.external_network {
        builder = builder.network(NetworkSelector::External);
    }
    let options = builder.build().map_err(|e| eyre!("invalid cluster options: {e}"))?;

    let durability_timeout_floor = options.durability_timeout_floor;
    let tracker = ClusterTracker::new(options, Observability::default());
    tracker.bootstrap().await.map_err(|e| eyre!("cluster bootstrap failed: {e}"))?;

    let runtime = CommandRuntime::new(tracker.clone(), Observability::default(), durability_timeout_floor);
    let cmd_options = CommandOptions { timeout: Duration::from_millis(args.timeout_ms), ..Default::default() };

    match args.command {
        Command::Get { key } => {
            let packet = runtime.get(key.as_bytes(), cmd_options).await.map_err(|e| eyre!("get failed: {e}"))?;
            println!("cas={} value={}", packet.cas, String::from_utf8_lossy(&packet.value));
        }
        Command::Upsert { key, value } => {
            let packet = runtime
                .upsert(key.as_bytes(), value.into_bytes(), cmd_options)
                .await
                .map_err(|e| eyre!("upsert failed: {e}"))?;
            println!("cas={}", packet.cas);
        }
        Command::Remove { key } => {
            runtime.remove(key.as_bytes(), cmd_options).await.map_err(|e| eyre!("remove failed: {e}"))?;
            println!("removed {key}");
        }
        Command::Ping { key } => {
            let session = kv_client::command::dispatcher::dispatch(&tracker, key.as_bytes(), 0)
                .await
                .map_err(|e| eyre!("could not resolve a session for {key}: {e:?}"))?;
            let latency = session.ping().await.map_err(|e| eyre!("ping failed: {e}"))?;
            println!("pong from {} in {:?}", session.endpoint(), latency);
        }
    }

    tracker.close().await;
    Ok(())
}
