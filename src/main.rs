//! `resilient-request` diagnostic CLI.
//!
//! Loads a client configuration, then executes one request, probes service
//! health, prints breaker/health status, or runs the background tasks
//! (health monitor, offline replay, config hot reload) until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use resilient_request::auth::StaticCredentials;
use resilient_request::config::{load_config, ClientConfig};
use resilient_request::config::watcher::ConfigWatcher;
use resilient_request::health::HealthMonitor;
use resilient_request::lifecycle::signals::wait_for_shutdown_signal;
use resilient_request::observability::{logging, metrics};
use resilient_request::offline::run_replay_loop;
use resilient_request::{RequestDescriptor, ResilientClient, Shutdown};

#[derive(Parser)]
#[command(name = "resilient-request")]
#[command(about = "Diagnostic CLI for the resilient request layer", long_about = None)]
struct Cli {
    /// TOML configuration file; built-in defaults when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bearer token attached to requests.
    #[arg(short, long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one request against a configured service
    Call {
        service: String,
        path: String,
        #[arg(short, long, default_value = "GET")]
        method: String,
        /// JSON request body
        #[arg(short, long)]
        body: Option<String>,
    },
    /// Probe health endpoints (all services when none is given)
    Health { service: Option<String> },
    /// Print breaker and health status for every service
    Status,
    /// Run health checks, offline replay and config reload until interrupted
    Run,
}

#[derive(Serialize)]
struct CallOutput {
    status: u16,
    body: Value,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };

    logging::init_logging(&config.observability);
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let client = Arc::new(
        ResilientClient::builder(config)
            .credentials(Arc::new(StaticCredentials::new(cli.token.clone())))
            .build()?,
    );

    match cli.command {
        Commands::Call {
            service,
            path,
            method,
            body,
        } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())?;
            let mut request = RequestDescriptor::new(method, path);
            if let Some(body) = body {
                request = request.json(serde_json::from_str(&body)?);
            }

            match client.execute(&service, request).await {
                Ok(response) => {
                    let body = response
                        .json::<Value>()
                        .unwrap_or_else(|_| Value::String(response.text()));
                    print_json(&CallOutput {
                        status: response.status.as_u16(),
                        body,
                    })?;
                }
                Err(e) => {
                    print_json(&e)?;
                    std::process::exit(1);
                }
            }
        }
        Commands::Health { service } => {
            let services = match service {
                Some(s) => vec![s],
                None => client.service_names(),
            };
            for service in &services {
                client.check_health(service).await?;
            }
            let window = client.config().health_check.fresh_window();
            print_json(&client.health().snapshot_all(window))?;
        }
        Commands::Status => {
            print_json(&client.status_all())?;
        }
        Commands::Run => run(client, cli.config).await?,
    }

    Ok(())
}

async fn run(client: Arc<ResilientClient>, config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = Shutdown::new();

    let monitor = HealthMonitor::new(Arc::clone(&client));
    let monitor_task = tokio::spawn(monitor.run(shutdown.subscribe()));
    let replay_task = tokio::spawn(run_replay_loop(Arc::clone(&client), shutdown.subscribe()));

    let reload_task = match config_path {
        Some(path) => Some(ConfigWatcher::new(&path, Arc::clone(&client)).spawn(shutdown.subscribe())?),
        None => None,
    };

    tracing::info!("Background tasks running, press Ctrl-C to stop");
    wait_for_shutdown_signal().await;

    shutdown.trigger();
    let _ = tokio::join!(monitor_task, replay_task);
    if let Some(task) = reload_task {
        let _ = task.await;
    }
    tracing::info!(pending = client.offline_queue().len(), "Shutdown complete");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
