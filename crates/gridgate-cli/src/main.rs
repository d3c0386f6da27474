// Copyright 2025 Gridgate Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Gridgate CLI Entry Point
//!
//! Main binary for a gridgate cluster. Every process of the cluster runs
//! `gridgate node`; the supervisor re-executes the same binary with a
//! different `--instance-id` to start missing instances.
//!
//! ## Usage
//!
//! ```bash
//! # Single embedded process owning the public ports
//! gridgate node --http 0.0.0.0:8080
//!
//! # Two gateways (active + hot standby) and three workers
//! gridgate node --standby 2 --servers 3 --http 0.0.0.0:8080 --cluster-dir /var/lib/gridgate
//!
//! # Inspect and stop the cluster
//! gridgate status --cluster-dir /var/lib/gridgate
//! gridgate stop --cluster-dir /var/lib/gridgate
//! ```

use anyhow::Result;
use argh::FromArgs;
use gridgate_cluster::{
    ClusterLayer, CommandLauncher, DirectoryCluster, InstanceLauncher, Liveness,
};
use gridgate_common::{now_millis, ClusterConfig, InstanceId, ListenerConfig, Role, Topology};
use gridgate_server::{Collaborators, HoldingHttpService, NodeSupervisor, NoopDeployment};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(FromArgs)]
/// gridgate - clustered REST gateway
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Node(NodeArgs),
    Stop(StopArgs),
    Status(StatusArgs),
}

// Every instance of a cluster must be started with the same topology,
// timeouts and cluster directory. Only `--instance-id` differs.
#[derive(FromArgs)]
#[argh(subcommand, name = "node")]
/// run one gridgate instance
struct NodeArgs {
    /// id of this instance within the topology
    ///
    /// Ids below `--standby` are gateways, the rest are workers.
    #[argh(option, long = "instance-id", default = "0")]
    instance_id: u32,

    /// number of gateway instances (active plus hot standbys)
    #[argh(option, long = "standby", default = "1")]
    hot_standby_count: u32,

    /// number of worker instances; 0 runs the gateway embedded
    #[argh(option, long = "servers", default = "0")]
    server_count: u32,

    /// heartbeat interval in milliseconds
    ///
    /// Peers that have not refreshed within 1.25 times this interval are
    /// considered dead. Defaults to 5000ms.
    #[argh(option, long = "heartbeat-ms", default = "5000")]
    heartbeat_ms: u64,

    /// lifetime of SSO pre-authentication tokens in seconds
    #[argh(option, long = "sso-timeout-secs", default = "60")]
    sso_timeout_secs: u64,

    /// idle time before a session is reaped, in seconds
    #[argh(option, long = "session-timeout-secs", default = "1800")]
    session_timeout_secs: u64,

    /// interval of the diagnostic session dump in seconds; off if unset
    #[argh(option, long = "dump-interval-secs")]
    dump_interval_secs: Option<u64>,

    /// public HTTP listener address
    #[argh(option, long = "http")]
    http: Option<SocketAddr>,

    /// public HTTPS listener address
    #[argh(option, long = "https")]
    https: Option<SocketAddr>,

    /// admin listener address
    #[argh(option, long = "admin")]
    admin: Option<SocketAddr>,

    /// directory holding the shared cluster state
    #[argh(option, long = "cluster-dir", default = "\".gridgate\".into()")]
    cluster_dir: String,

    /// token that issued GUIDs must never equal; repeatable
    #[argh(option, long = "reserved-token")]
    reserved_tokens: Vec<String>,

    /// clear a leftover stop request before starting
    #[argh(switch, long = "clear-stop")]
    clear_stop: bool,
}

impl NodeArgs {
    fn to_config(&self) -> ClusterConfig {
        ClusterConfig {
            instance_id: self.instance_id,
            topology: Topology::new(self.hot_standby_count, self.server_count),
            heartbeat: Duration::from_millis(self.heartbeat_ms),
            sso_timeout: Duration::from_secs(self.sso_timeout_secs),
            session_timeout: Duration::from_secs(self.session_timeout_secs),
            session_dump_interval: self.dump_interval_secs.map(Duration::from_secs),
            reserved_tokens: self.reserved_tokens.clone(),
            listeners: ListenerConfig {
                http: self.http,
                https: self.https,
                admin: self.admin,
            },
            startup_grace: ClusterConfig::default().startup_grace,
        }
    }

    /// Arguments a spawned instance is started with, minus its id
    fn to_launch_args(&self) -> Vec<String> {
        let mut args = vec![
            "node".to_string(),
            "--standby".to_string(),
            self.hot_standby_count.to_string(),
            "--servers".to_string(),
            self.server_count.to_string(),
            "--heartbeat-ms".to_string(),
            self.heartbeat_ms.to_string(),
            "--sso-timeout-secs".to_string(),
            self.sso_timeout_secs.to_string(),
            "--session-timeout-secs".to_string(),
            self.session_timeout_secs.to_string(),
            "--cluster-dir".to_string(),
            self.cluster_dir.clone(),
        ];
        if let Some(secs) = self.dump_interval_secs {
            args.extend(["--dump-interval-secs".to_string(), secs.to_string()]);
        }
        for (flag, addr) in [("--http", self.http), ("--https", self.https), ("--admin", self.admin)] {
            if let Some(addr) = addr {
                args.extend([flag.to_string(), addr.to_string()]);
            }
        }
        for token in &self.reserved_tokens {
            args.extend(["--reserved-token".to_string(), token.clone()]);
        }
        args
    }
}

#[derive(FromArgs)]
#[argh(subcommand, name = "stop")]
/// ask every instance of a cluster to exit
struct StopArgs {
    /// directory holding the shared cluster state
    #[argh(option, long = "cluster-dir", default = "\".gridgate\".into()")]
    cluster_dir: String,
}

// Prints one JSON object per known instance, for scripting
#[derive(FromArgs)]
#[argh(subcommand, name = "status")]
/// show the instances of a cluster
struct StatusArgs {
    /// directory holding the shared cluster state
    #[argh(option, long = "cluster-dir", default = "\".gridgate\".into()")]
    cluster_dir: String,

    /// heartbeat interval of the cluster in milliseconds
    #[argh(option, long = "heartbeat-ms", default = "5000")]
    heartbeat_ms: u64,
}

/// Launcher for commands that never spawn instances
fn no_launcher() -> Arc<dyn InstanceLauncher> {
    Arc::new(|_role: Role, id: InstanceId| -> gridgate_common::Result<()> {
        Err(gridgate_common::GridgateError::Spawn {
            id,
            reason: "spawning is only available to running nodes".to_string(),
        })
    })
}

async fn run_node(args: NodeArgs) -> Result<()> {
    let config = args.to_config();
    config.validate()?;

    tracing::info!(
        "Starting instance {} of {} ({} gateways, {} workers)",
        config.instance_id,
        args.cluster_dir,
        config.topology.hot_standby_count,
        config.topology.server_count
    );

    let launcher = CommandLauncher::current_exe(args.to_launch_args())?;
    let cluster =
        DirectoryCluster::open(&args.cluster_dir, Liveness::from_config(&config), Arc::new(launcher)).await?;
    if args.clear_stop {
        tracing::info!("Clearing previous stop request");
        cluster.clear_stop().await?;
    }

    let supervisor = NodeSupervisor::new(
        config,
        Collaborators {
            cluster: Arc::new(cluster),
            http: Arc::new(HoldingHttpService::new()),
            deployment: Arc::new(NoopDeployment),
            pools: Vec::new(),
        },
    )?;
    supervisor.start().await?;

    // Ctrl-C stops this process only; `gridgate stop` stops the cluster
    let interrupted = supervisor.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, halting instance");
            interrupted.halt();
        }
    });

    supervisor.run().await?;
    Ok(())
}

async fn run_stop(args: StopArgs) -> Result<()> {
    let cluster = DirectoryCluster::open(
        &args.cluster_dir,
        Liveness::new(Duration::from_secs(5), Duration::ZERO),
        no_launcher(),
    )
    .await?;
    cluster.request_stop().await?;
    tracing::info!("Stop requested for cluster in {}", args.cluster_dir);
    Ok(())
}

async fn run_status(args: StatusArgs) -> Result<()> {
    let liveness = Liveness::new(Duration::from_millis(args.heartbeat_ms), Duration::ZERO);
    let cluster = DirectoryCluster::open(&args.cluster_dir, liveness, no_launcher()).await?;

    let now_ms = now_millis();
    for record in cluster.list_statistics().await? {
        let running = cluster.is_instance_running(record.instance_id).await?;
        let line = serde_json::json!({
            "instance_id": record.instance_id,
            "role": record.role,
            "process_id": record.process_id,
            "is_manager": record.is_manager,
            "age_ms": record.age(now_ms).as_millis() as u64,
            "running": running,
        });
        println!("{}", line);
    }
    if cluster.stop_requested().await? {
        tracing::warn!("A stop request is pending for this cluster");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Keep status output clean for piping
    if !matches!(cli.command, Commands::Status(_)) {
        // Set default log level to INFO, but allow RUST_LOG env var to override
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    match cli.command {
        Commands::Node(args) => run_node(args).await,
        Commands::Stop(args) => run_stop(args).await,
        Commands::Status(args) => run_status(args).await,
    }
}
