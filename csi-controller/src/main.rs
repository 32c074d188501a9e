//! Entry point for the CSI controller daemon: parses CLI arguments,
//! builds the `Registry` and `VolumeManager`, registers the statically
//! configured node fleet, then serves the CSI Identity and Controller
//! services on a unix domain socket until a shutdown signal arrives.

use std::sync::{atomic::AtomicBool, Arc};

use clap::Parser;
use common::NodeId;
use core_agent::{Registry, VolumeManager};
use tracing::info;

/// A `name=endpoint` pair describing one storage node to register at
/// startup, e.g. `node-1=10.1.0.5:10124`.
#[derive(Clone, Debug)]
struct NodeArg {
    id: NodeId,
    endpoint: String,
}

impl std::str::FromStr for NodeArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (name, endpoint) = value.split_once('=').ok_or_else(|| {
            format!("node '{value}' must be of the form <name>=<endpoint>")
        })?;
        if name.is_empty() || endpoint.is_empty() {
            return Err(format!("node '{value}' must be of the form <name>=<endpoint>"));
        }
        Ok(Self {
            id: NodeId::from(name),
            endpoint: endpoint.to_string(),
        })
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "csi-controller", about = "CSI controller plugin for the mayastor control plane")]
struct CliArgs {
    /// Path of the unix domain socket the CSI Identity/Controller
    /// services are served on. A stale socket file is unlinked on
    /// startup.
    #[arg(long, short = 'c', env = "CSI_SOCKET", default_value = "/var/tmp/csi.sock")]
    csi_socket: String,

    /// A storage node to register at startup, `<name>=<endpoint>`.
    /// Repeatable.
    #[arg(long = "node", short = 'n')]
    nodes: Vec<NodeArg>,

    /// How often a connected node's pools/replicas/nexuses are
    /// re-synced from its own `List*` RPCs.
    #[arg(long, default_value = "10s")]
    sync_period: humantime::Duration,

    /// How often the volume manager re-runs `ensure()` against every
    /// tracked volume, independent of the event-driven refresh.
    #[arg(long, default_value = "30s")]
    reconcile_period: humantime::Duration,

    /// Deadline for establishing a node's gRPC channel.
    #[arg(long, default_value = "2s")]
    grpc_connect_timeout: humantime::Duration,

    /// Deadline for a single RPC against an already-connected node.
    #[arg(long, default_value = "5s")]
    grpc_request_timeout: humantime::Duration,
}

fn init_tracing() {
    if let Ok(filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter("info").init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli_args = CliArgs::parse();
    info!(?cli_args, "starting csi-controller");

    let registry = Registry::new(
        cli_args.sync_period.into(),
        cli_args.grpc_connect_timeout.into(),
        cli_args.grpc_request_timeout.into(),
    );
    for node in &cli_args.nodes {
        registry.add_node(node.id.clone(), node.endpoint.clone()).await?;
    }

    let manager = VolumeManager::new(registry.clone(), cli_args.reconcile_period.into());
    let ready = Arc::new(AtomicBool::new(true));

    csi_controller::server::run(&cli_args.csi_socket, registry, manager, ready).await
}
