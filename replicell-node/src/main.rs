use std::sync::Arc;

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge};
use replicell_common::NodeId;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use replicell_node::config::ReplicellConfig;
use replicell_node::driver::{run_initializer, run_reader, run_writer, Role};
use replicell_node::management::start_management_api;
use replicell_node::replica::ReplicaNode;
use replicell_node::transport::nats::NatsTransport;
use replicell_node::transport::{NameDirectory, PeerConnector};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let (cli_node_id, role_arg) = match args.len() {
        // Node id may come from [node].id in the config file instead.
        2 => (None, args[1].clone()),
        3 => (Some(args[1].clone()), args[2].clone()),
        _ => {
            eprintln!("Usage: {} [<node-id>] <role>", args[0]);
            eprintln!("role can be: initializer, reader, writer");
            std::process::exit(2);
        }
    };
    let role: Role = role_arg.parse().map_err(anyhow::Error::msg)?;

    // Load configuration before logging so the filter default applies.
    let config_path =
        std::env::var("REPLICELL_CONFIG").unwrap_or_else(|_| "config/default".to_string());
    let (config, load_error) = match ReplicellConfig::from_file(&config_path) {
        Ok(config) => (config, None),
        Err(e) => (ReplicellConfig::default(), Some(e)),
    };
    init_tracing(&config);
    if let Some(e) = load_error {
        warn!(error = %e, path = %config_path, "failed to load config file, using defaults");
    }

    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    let node_id = cli_node_id
        .or_else(|| config.node.id.clone())
        .map(NodeId::from)
        .context("no node id given on the command line or in [node].id")?;

    info!(
        node_id = %node_id,
        role = ?role,
        version = env!("CARGO_PKG_VERSION"),
        "starting replicell node"
    );

    if config.metrics.enabled {
        let listen_addr: std::net::SocketAddr = config
            .metrics
            .listen_addr
            .parse()
            .context("invalid metrics listen address")?;
        info!(metrics_addr = %listen_addr, "starting Prometheus metrics exporter");
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(listen_addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        initialize_metrics();
    }

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
                return;
            }
            info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    let transport = NatsTransport::connect(&config.nats, node_id.clone(), shutdown.clone())
        .await
        .context("failed to connect to NATS")?;

    let connector: Arc<dyn PeerConnector> = transport.clone();
    let node = match role {
        Role::Initializer => ReplicaNode::bootstrap(
            node_id,
            Some(json!(0)),
            connector,
            shutdown.child_token(),
        ),
        Role::Reader | Role::Writer => {
            ReplicaNode::joining(node_id, connector, shutdown.child_token())
        }
    };

    // Bind before joining so the seed peer can call back with the
    // current value and gossip.
    transport
        .bind(Arc::clone(&node))
        .await
        .context("failed to bind node in the directory")?;

    if role != Role::Initializer {
        node.join_via_directory(transport.as_ref())
            .await
            .context("failed to join the network")?;
        info!(node_id = %node.id(), peers = ?node.peers().ids().await, "joined the network");
    }

    if config.management.enabled {
        let management_config = config.management.clone();
        let node = Arc::clone(&node);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = start_management_api(management_config, node, shutdown).await {
                error!(error = %e, "management API failed");
            }
        });
    }

    match role {
        Role::Initializer => run_initializer(Arc::clone(&node), &config.driver, shutdown.clone()).await,
        Role::Reader => run_reader(Arc::clone(&node), &config.driver, shutdown.clone()).await,
        Role::Writer => run_writer(Arc::clone(&node), &config.driver, shutdown.clone()).await,
    }

    node.leave_network().await;
    info!(node_id = %node.id(), "node stopped");
    Ok(())
}

fn init_tracing(config: &ReplicellConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with_target(false)
        .init();
}

/// Register metric descriptions with the exporter.
fn initialize_metrics() {
    describe_counter!("replicell_reads", "Token-guarded reads served locally");
    describe_counter!("replicell_writes", "Writes committed locally");
    describe_counter!(
        "replicell_updates_applied",
        "Remote value updates applied to the local cell"
    );
    describe_counter!(
        "replicell_propagation_failures",
        "Peers skipped during value propagation"
    );
    describe_counter!(
        "replicell_read_tokens_granted",
        "Read tokens granted by the local coordinator"
    );
    describe_counter!(
        "replicell_write_tokens_granted",
        "Write tokens granted by the local coordinator"
    );
    describe_gauge!("replicell_known_peers", "Current size of the peer table");
}
