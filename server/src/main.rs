//! Recurring HTTP Job Scheduler
//!
//! Authenticated users register tasks that describe an outbound HTTP call
//! to make at a start time and repeat at a fixed frequency for a bounded
//! number of executions. The server durably stores each task, fires each
//! occurrence close to its scheduled time, and re-enrolls the next one.
// This is the main entry point for the server application. It's responsible
// for:
// - Initializing logging and configuration.
// - Opening the task store and rehydrating the firing queue.
// - Spawning the dispatcher and starting the HTTP ingress.
// - Handling graceful shutdown.

// Use jemalloc as the global allocator for better performance
#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

mod api;
mod database;
mod dispatcher;
mod executor;
mod queue;
mod scheduler;

#[cfg(test)]
mod tests;

use api::AppState;
use database::TaskStore;
use dispatcher::Dispatcher;
use executor::Executor;
use scheduler::{rehydrate, Scheduler};
use shared::config::SchedulerConfig;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Multi-tenant scheduler for recurring outbound HTTP jobs", long_about = None)]
struct CliArgs {
    /// Path to the configuration file (scheduler.toml)
    #[arg(value_name = "CONFIG_FILE")]
    config_file: PathBuf,

    /// Override the listen address from config file
    #[arg(long = "listen-address", value_name = "ADDRESS")]
    listen_address: Option<String>,

    /// Override the data directory from config file
    #[arg(long = "data-dir", value_name = "DIR")]
    data_dir: Option<String>,

    /// Override the log directory from config file
    #[arg(long = "log-dir", value_name = "DIR")]
    log_dir: Option<String>,

    /// Override the per-task execution cap from config file
    #[arg(long = "max-executions", value_name = "COUNT")]
    max_executions: Option<u32>,
}

/// The main application structure for the server.
/// It owns the configuration and the long-lived components created during
/// `run`, so that `shutdown` can wind them down in order.
pub struct Server {
    config: SchedulerConfig,
    /// The `SocketAddr` (IP address and port) the ingress listens on.
    listen_address: SocketAddr,
    /// Store handle kept for closing the connection at shutdown.
    store: Option<Arc<Mutex<TaskStore>>>,
    /// Executor handle kept for draining in-flight firings at shutdown.
    executor: Option<Executor>,
    /// Handle to the dispatcher worker for graceful shutdown.
    dispatcher_task_handle: Option<JoinHandle<()>>,
    /// Shutdown signal sender for notifying background tasks.
    shutdown_tx: Option<tokio::sync::broadcast::Sender<()>>,
}

impl Server {
    /// Creates a new server instance from a validated configuration.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        let listen_address: SocketAddr = config.listen_address.parse().map_err(|e| {
            anyhow::anyhow!("Invalid listen address '{}': {}", config.listen_address, e)
        })?;

        Ok(Self {
            config,
            listen_address,
            store: None,
            executor: None,
            dispatcher_task_handle: None,
            shutdown_tx: None,
        })
    }

    /// Starts the server and runs until the ingress stops.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting recurring HTTP job scheduler");
        info!(
            listen_address = %self.listen_address,
            data_dir = %self.config.data_dir,
            max_executions = self.config.max_executions,
            "Server configuration loaded"
        );

        // Initialize the task store.
        let mut store = TaskStore::new(&self.config.data_dir)
            .context("Failed to create task store manager")?;
        store
            .initialize()
            .await
            .context("Failed to initialize task store")?;
        let store = Arc::new(Mutex::new(store));
        self.store = Some(Arc::clone(&store));

        // Process-wide scheduling state: queue, wake channel, tombstones.
        let scheduler = Scheduler::new();

        let executor = Executor::new(
            Arc::clone(&store),
            scheduler.clone(),
            self.config.max_concurrent_firings,
            self.config.max_executions,
            self.config.outbound_timeout_seconds,
        )
        .context("Failed to create executor")?;
        self.executor = Some(executor.clone());

        // Create shutdown broadcast channel
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        // Spawn the dispatcher worker before rehydration: it starts on an
        // empty queue and is woken by each bootstrap push.
        let dispatcher = Dispatcher::new(
            scheduler.clone(),
            executor,
            self.config.idle_wait_seconds,
        );
        let dispatcher_task = tokio::spawn(dispatcher.run(shutdown_tx.subscribe()));
        self.dispatcher_task_handle = Some(dispatcher_task);

        // Re-enroll every stored non-terminal task at its stored
        // next_execution; past-due entries fire in time order.
        let enrolled = rehydrate(&store, &scheduler, self.config.max_executions)
            .await
            .context("Failed to rehydrate firing queue")?;
        info!(enrolled, "Bootstrap complete");

        let app_state = AppState::new(self.config.clone(), store, scheduler);
        let app = api::create_router(app_state);

        info!("Starting HTTP server on {}", self.listen_address);

        let listener = tokio::net::TcpListener::bind(self.listen_address)
            .await
            .with_context(|| {
                format!(
                    "Failed to bind TCP listener to {}. \
                     Check if port is already in use (EADDRINUSE) or requires elevated permissions (EACCES).",
                    self.listen_address
                )
            })?;

        let shutdown_signal = {
            let mut rx = shutdown_tx.subscribe();
            async move {
                let _ = rx.recv().await;
                info!("HTTP server received shutdown signal");
            }
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }

    /// Performs a graceful shutdown of the server.
    ///
    /// Shutdown sequence:
    /// 1. Broadcast shutdown signal to the dispatcher and the ingress
    /// 2. Wait for the dispatcher loop to exit (with timeout)
    /// 3. Wait for in-flight firings to complete (with timeout)
    /// 4. Close the store connection
    pub async fn shutdown(&mut self) {
        info!("Shutting down scheduler gracefully");

        let shutdown_timeout_secs = self.config.graceful_shutdown_timeout_seconds;

        if let Some(shutdown_tx) = &self.shutdown_tx {
            if let Err(e) = shutdown_tx.send(()) {
                warn!("Failed to send shutdown signal: {}", e);
            }
        }

        if let Some(handle) = self.dispatcher_task_handle.take() {
            info!(
                "Waiting for dispatcher to stop (timeout: {}s)",
                shutdown_timeout_secs
            );

            match tokio::time::timeout(
                std::time::Duration::from_secs(shutdown_timeout_secs),
                handle,
            )
            .await
            {
                Ok(Ok(())) => info!("Dispatcher stopped"),
                Ok(Err(e)) => warn!("Dispatcher task panicked: {}", e),
                Err(_) => warn!("Dispatcher shutdown timeout reached, aborting"),
            }
        }

        if let Some(executor) = self.executor.take() {
            info!(
                "Waiting for in-flight firings to complete (timeout: {}s)",
                shutdown_timeout_secs
            );

            match tokio::time::timeout(
                std::time::Duration::from_secs(shutdown_timeout_secs),
                executor.drain(),
            )
            .await
            {
                Ok(()) => info!("All in-flight firings completed"),
                Err(_) => warn!("Firing drain timeout reached, some firings abandoned"),
            }
        }

        if let Some(store) = &self.store {
            info!("Closing task store");
            let mut store = store.lock().await;
            store.close().await;
            info!("Task store closed");
        }

        info!("Server shutdown complete");
    }
}

/// Sets up signal handlers for graceful shutdown.
/// Returns a future that completes when a shutdown signal is received.
///
/// On Unix systems, handles SIGTERM and SIGINT signals.
/// On non-Unix systems, handles Ctrl+C.
async fn setup_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let sigterm = signal(SignalKind::terminate());
        let sigint = signal(SignalKind::interrupt());

        match (sigterm, sigint) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to register signal handlers: {}", e);
                error!("Falling back to Ctrl+C only");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to wait for Ctrl+C: {}", e);
                } else {
                    info!("Received Ctrl+C");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to receive Ctrl+C signal: {}", e);
        } else {
            info!("Received Ctrl+C");
        }
    }
}

/// Server entry point
///
/// Loads configuration, initializes logging, creates the server instance,
/// and runs until a shutdown signal is received.
#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    // Configuration is loaded before logging so that the log directory is
    // configurable; load errors go to stderr.
    let mut config = match SchedulerConfig::load_from_file(&cli_args.config_file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Failed to load configuration from {}: {}",
                cli_args.config_file.display(),
                e
            );
            std::process::exit(1);
        }
    };

    // Apply command-line overrides if provided.
    if let Some(listen_address) = cli_args.listen_address {
        config.listen_address = listen_address;
    }
    if let Some(data_dir) = cli_args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(log_dir) = cli_args.log_dir {
        config.log_dir = log_dir;
    }
    if let Some(max_executions) = cli_args.max_executions {
        config.max_executions = max_executions;
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    // Initialize logging.
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "scheduler.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Configure logging with proper RUST_LOG environment variable handling
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("server=info,shared=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    info!("Recurring HTTP job scheduler starting up");
    info!("Configuration file: {}", cli_args.config_file.display());

    let mut server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to initialize server: {}", e);
            std::process::exit(1);
        }
    };

    // Run the server and the shutdown signal handler concurrently.
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        _ = setup_shutdown_signal() => {
            info!("Shutdown signal received, initiating graceful shutdown");
        }
    }

    server.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}
