mod client;
mod error;
mod server;

use clap::{Parser, Subcommand};
use client::{parse_manifest, KitClient};
use kit_bootstrap::MockClusterApi;
use kit_cloud::{CloudClients, MockCloud};
use kit_controller::{Manager, ManagerConfig};
use kit_storage::{RedbBackend, StateStore};
use server::AppState;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// AMI the local mock cloud hands out for the recommended-image parameter
const LOCAL_AMI: &str = "ami-0123456789abcdef0";

#[derive(Parser)]
#[command(name = "kit", about = "Kubernetes control planes on cloud infrastructure")]
struct Cli {
    /// Log verbosity: 0 = info, 1 = debug, 2 or more = trace
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbosity: u8,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the manager and its HTTP API against a local mock cloud
    Run {
        /// Port the HTTP API listens on
        #[arg(long, default_value_t = 8080)]
        metrics_port: u16,
        /// Address the HTTP API binds to
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        /// Path to the redb database file
        #[arg(long, default_value = "./kit.redb")]
        data_dir: String,
        /// Workers per record kind
        #[arg(long, default_value_t = 2)]
        workers: usize,
        /// Region the cluster's subnets are spread across
        #[arg(long, env = "KIT_REGION", default_value = "us-west-2")]
        region: String,
    },
    /// Create or update a ControlPlane from a YAML manifest
    Apply {
        /// Manifest file
        #[arg(short = 'f', long = "file")]
        file: String,
        /// Manager URL
        #[arg(long, env = "KIT_SERVER", default_value = "http://127.0.0.1:8080")]
        server: String,
    },
    /// Request deletion of a ControlPlane
    Delete {
        name: String,
        #[arg(short, long, default_value = "default")]
        namespace: String,
        /// Manager URL
        #[arg(long, env = "KIT_SERVER", default_value = "http://127.0.0.1:8080")]
        server: String,
    },
    /// Print the status of a ControlPlane, or list them all
    Status {
        name: Option<String>,
        #[arg(short, long, default_value = "default")]
        namespace: String,
        /// Manager URL
        #[arg(long, env = "KIT_SERVER", default_value = "http://127.0.0.1:8080")]
        server: String,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_level = match cli.verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    match cli.command {
        Commands::Run {
            metrics_port,
            bind,
            data_dir,
            workers,
            region,
        } => run_manager(&bind, metrics_port, &data_dir, workers, region).await,
        Commands::Apply { file, server } => {
            let manifest = std::fs::read_to_string(&file)
                .map_err(|e| miette::miette!("Failed to read '{}': {}", file, e))?;
            let cp = parse_manifest(&manifest)?;
            let applied = KitClient::new(&server).apply(&cp).await?;
            println!("controlplane/{} applied", applied.name());
            Ok(())
        }
        Commands::Delete {
            name,
            namespace,
            server,
        } => {
            KitClient::new(&server).delete(&namespace, &name).await?;
            println!("controlplane/{} deleting", name);
            Ok(())
        }
        Commands::Status {
            name,
            namespace,
            server,
        } => {
            let client = KitClient::new(&server);
            let yaml = match name {
                Some(name) => {
                    let cp = client.get(&namespace, &name).await?;
                    kit_core::to_yaml(&cp.status)?
                }
                None => {
                    let summary: Vec<_> = client
                        .list()
                        .await?
                        .iter()
                        .map(|cp| {
                            serde_json::json!({
                                "name": cp.name(),
                                "namespace": cp.namespace(),
                                "active": cp.is_active(),
                                "bootstrapped": kit_core::conditions::is_true(
                                    &cp.status.conditions,
                                    kit_core::BOOTSTRAPPED,
                                ),
                                "deleting": cp.is_deleting(),
                            })
                        })
                        .collect();
                    kit_core::to_yaml(&summary)?
                }
            };
            print!("{}", yaml);
            Ok(())
        }
    }
}

/// Run the manager and the HTTP API until ctrl-c
async fn run_manager(
    bind: &str,
    metrics_port: u16,
    data_dir: &str,
    workers: usize,
    region: String,
) -> miette::Result<()> {
    info!("Starting kit manager");

    let mut config = ManagerConfig {
        workers,
        ..Default::default()
    };
    config.provisioning.region = region;

    let backend = RedbBackend::new(std::path::Path::new(data_dir))
        .map_err(|e| miette::miette!("Failed to open storage at '{}': {}", data_dir, e))?;
    let store = StateStore::new(Arc::new(backend), config.event_capacity);

    let cloud = Arc::new(MockCloud::new());
    cloud
        .set_parameter(&config.provisioning.ami_parameter, LOCAL_AMI)
        .await;
    info!("Using MockCloud (in-memory cloud for local development)");

    let manager = Arc::new(Manager::new(
        store.clone(),
        CloudClients::mock(cloud),
        Arc::new(MockClusterApi::ready()),
        config,
    ));

    let listen_addr: std::net::SocketAddr = format!("{}:{}", bind, metrics_port)
        .parse()
        .map_err(|e| miette::miette!("Invalid bind address '{}:{}': {}", bind, metrics_port, e))?;

    let token = CancellationToken::new();

    // 1. Spawn the manager
    let manager_token = token.clone();
    let manager_handle = {
        let manager = manager.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.run(manager_token).await {
                error!("Manager error: {}", e);
            }
        })
    };

    // 2. Spawn the HTTP API
    let state = Arc::new(AppState { store, manager });
    let api_token = token.clone();
    let api_handle = tokio::spawn(async move {
        tokio::select! {
            result = server::serve(listen_addr, state) => {
                if let Err(e) = result {
                    error!("HTTP server error: {}", e);
                }
            }
            _ = api_token.cancelled() => {
                info!("HTTP server shutting down");
            }
        }
    });

    info!("All components started. HTTP API on {}", listen_addr);

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;

    info!("Shutting down gracefully...");
    token.cancel();

    // Wait for all tasks to finish with a timeout
    let shutdown_timeout = std::time::Duration::from_secs(5);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = tokio::join!(manager_handle, api_handle);
    })
    .await;

    info!("Shutdown complete");

    Ok(())
}
