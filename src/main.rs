use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use rollcall::config::{clock_peer_id, NodeConfig};
use rollcall::election::Role;
use rollcall::node::spawn_peer;
use rollcall::transport::InProcessBroker;

#[derive(Parser, Debug)]
#[command(name = "rollcall")]
#[command(version)]
#[command(about = "Peer role election and note aggregation over pub/sub")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a local cluster of peers over an in-process broker
    Local(LocalArgs),
}

#[derive(Parser, Debug)]
struct LocalArgs {
    /// Number of peers to start
    #[arg(long, default_value = "3")]
    peers: usize,

    /// Base roll-call interval in milliseconds (scheduler rate; others poll
    /// at half this rate)
    #[arg(long, default_value = "10000")]
    roll_call_ms: u64,

    /// Election collection window in milliseconds
    #[arg(long, default_value = "3000")]
    election_window_ms: u64,

    /// Seconds between scheduler-side aggregation rounds
    #[arg(long, default_value = "5")]
    aggregate_every_secs: u64,
}

/// Token cancelled on SIGTERM or SIGINT; every peer in the pool watches it
/// and tears down cleanly.
fn shutdown_on_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(error) => {
                tracing::error!(error = %error, "failed to install SIGTERM handler");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM received, stopping peer pool");
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(error) = result {
                    tracing::error!(error = %error, "interrupt handler failed");
                }
                tracing::info!("interrupt received, stopping peer pool");
            }
        }

        trigger.cancel();
    });

    token
}

async fn run_local(args: LocalArgs) {
    let broker = Arc::new(InProcessBroker::new());
    let shutdown = shutdown_on_signal();

    let base_id = clock_peer_id();
    let mut handles = Vec::with_capacity(args.peers);

    for offset in 0..args.peers as u64 {
        let config = NodeConfig::new(base_id + offset)
            .with_roll_call_frequency(Duration::from_millis(args.roll_call_ms))
            .with_election_window(Duration::from_millis(args.election_window_ms));
        let peer_id = config.peer_id;

        let (handle, mut role_changes) = spawn_peer(config, broker.clone(), shutdown.clone());

        // Print role transitions as the host's hook for dispatching duties.
        tokio::spawn(async move {
            while let Ok(change) = role_changes.recv().await {
                match serde_json::to_string(&change) {
                    Ok(line) => println!("{}", line),
                    Err(error) => tracing::warn!(error = %error, "role change not serializable"),
                }
            }
        });

        // Every peer contributes one note for the aggregation demo.
        if let Err(error) = handle.write("members", vec![json!(peer_id)]).await {
            tracing::warn!(peer_id, error = %error, "failed to write member note");
        }

        handles.push(handle);
    }

    tracing::info!(
        peers = args.peers,
        roll_call_ms = args.roll_call_ms,
        "local cluster started"
    );

    let mut aggregate = tokio::time::interval(Duration::from_secs(args.aggregate_every_secs));
    aggregate.tick().await; // first tick fires immediately, skip it

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = aggregate.tick() => {
                let Some(scheduler) = handles
                    .iter()
                    .find(|h| h.current_role() == Role::Scheduler)
                else {
                    tracing::info!("no scheduler resolved yet, skipping aggregation round");
                    continue;
                };

                match scheduler.request_aggregation().await {
                    Ok(result) => match serde_json::to_string_pretty(&result) {
                        Ok(pretty) => println!("{}", pretty),
                        Err(error) => tracing::warn!(error = %error, "aggregation result not serializable"),
                    },
                    Err(error) => {
                        tracing::warn!(
                            peer_id = scheduler.peer_id(),
                            error = %error,
                            "aggregation round failed"
                        );
                    }
                }
            }
        }
    }

    tracing::info!("local cluster stopped");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Local(local_args) => run_local(local_args).await,
    }
}
