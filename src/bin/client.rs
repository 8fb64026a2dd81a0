//! wordtop client
//!
//! Streams URLs from a file at a wordtop server with a fixed number of
//! concurrent producers. Transient failures and busy rejections are
//! retried after a fixed delay, unbounded unless a ceiling is set.
//!
//! # Example Usage
//!
//! ```bash
//! # One producer, default server address
//! ./wordtop-client urls.txt
//!
//! # Eight producers against a remote server, capped retries
//! ./wordtop-client urls.txt -n 8 --host 10.0.0.5 --port 6000 --max-attempts 5
//! ```

use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use wordtop::client::{read_url_file, Client};
use wordtop::config::{BusyPolicy, ClientConfig, RetryPolicy};

#[derive(Parser)]
#[command(name = "wordtop-client", version, about = "URL word-frequency client")]
struct Cli {
    /// File holding one URL per line
    url_file: std::path::PathBuf,

    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = 5000)]
    port: u16,

    /// Number of concurrent producers
    #[arg(short = 'n', long, default_value_t = 1)]
    producers: usize,

    /// Delay between retry attempts, milliseconds
    #[arg(long, default_value_t = 1000)]
    retry_delay_ms: u64,

    /// Retry ceiling per URL; unbounded when omitted
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Handling of "Server busy" responses
    #[arg(long, value_enum, default_value = "requeue")]
    busy_policy: BusyPolicy,
}

impl Cli {
    fn resolve(&self) -> ClientConfig {
        ClientConfig {
            host: self.host.clone(),
            port: self.port,
            producers: self.producers,
            retry: RetryPolicy {
                delay_ms: self.retry_delay_ms,
                max_attempts: self.max_attempts,
            },
            busy_policy: self.busy_policy,
            ..Default::default()
        }
    }
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

    let urls = read_url_file(&cli.url_file)?;
    if urls.is_empty() {
        warn!(file = %cli.url_file.display(), "No URLs to process");
        return Ok(());
    }
    info!(count = urls.len(), producers = cli.producers, "Starting wordtop client");

    let client = Client::new(cli.resolve())?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, draining");
            let _ = shutdown_tx.send(());
        }
    });

    let summary = client.run(urls, shutdown_rx).await?;
    info!(
        completed = summary.completed,
        failed = summary.failed,
        dropped = summary.dropped,
        "Client finished"
    );
    Ok(())
}
