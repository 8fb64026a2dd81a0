//! wordtop server
//!
//! TCP dispatcher plus a fixed worker pool. Each accepted connection
//! carries one URL; the server fetches it, reduces the body to its
//! top-K word frequencies, and answers with a JSON outcome. When the
//! work queue is full the request is rejected with a retry status
//! instead of queueing without bound.
//!
//! # Configuration
//!
//! Settings come from an optional TOML file (`--config`) with CLI flags
//! layered on top. Logging is controlled through `RUST_LOG`.
//!
//! # Example Usage
//!
//! ```bash
//! # Defaults: 127.0.0.1:5000, 4 workers, top 10 words
//! ./wordtop-server
//!
//! # Custom sizing with a response cache
//! ./wordtop-server --workers 8 --top-k 5 --cache-capacity 256
//!
//! # Config file plus overrides
//! ./wordtop-server --config wordtop.toml --port 6000
//! ```

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use wordtop::config::{ServerConfig, TransientPolicy};
use wordtop::server::Server;

#[derive(Parser)]
#[command(name = "wordtop-server", version, about = "URL word-frequency server")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Override listen host
    #[arg(long)]
    host: Option<String>,

    /// Override listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override worker count
    #[arg(short, long)]
    workers: Option<usize>,

    /// Override number of top words reported per URL
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// Override maximum work-queue depth
    #[arg(long)]
    queue_depth: Option<usize>,

    /// Enable an LRU cache over fetched bodies with this many entries
    #[arg(long)]
    cache_capacity: Option<usize>,

    /// Override transient-failure handling (report or requeue)
    #[arg(long, value_enum)]
    transient_policy: Option<TransientPolicy>,
}

impl Cli {
    /// Load the file config (or defaults) and layer CLI overrides on top
    fn resolve(&self) -> Result<ServerConfig, wordtop::Error> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(top_k) = self.top_k {
            config.top_k = top_k;
        }
        if let Some(queue_depth) = self.queue_depth {
            config.queue_depth = queue_depth;
        }
        if let Some(cache_capacity) = self.cache_capacity {
            config.cache_capacity = Some(cache_capacity);
        }
        if let Some(policy) = self.transient_policy {
            config.transient_policy = policy;
        }

        Ok(config)
    }
}

/// Wait for Ctrl+C or SIGTERM
///
/// Signal registration failures are logged and that signal is simply
/// never observed; the server can still be stopped through the other
/// one or forcefully.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {},
            Err(e) => {
                warn!(error = %e, "Ctrl+C handler installation failed");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "SIGTERM handler installation failed");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let config = cli.resolve()?;
    info!("Starting wordtop server v{}", env!("CARGO_PKG_VERSION"));

    let server = Server::bind(config).await?;
    info!(addr = %server.local_addr(), "Listening");

    let handle = server.handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        handle.shutdown();
    });

    let stats = server.run().await;
    info!(
        accepted = stats.accepted,
        processed = stats.processed,
        errors = stats.errors,
        rejected = stats.rejected,
        "Server stopped"
    );
    Ok(())
}
