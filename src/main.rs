use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::Level;

use lorahub_server::{LivenessConfig, ServerConfig};
use lorahub_store::{Database, SqliteHubStorage};
use lorahub_telemetry::{LogFormat, TelemetryConfig};

/// Realtime hub between LoRa gateways, observers and operators.
#[derive(Debug, Parser)]
#[command(name = "lorahub", version, about)]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "LORAHUB_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// SQLite database file.
    #[arg(long, env = "LORAHUB_DB", default_value = "lora_data.db")]
    db_path: PathBuf,

    /// Evict connections silent for longer than this.
    #[arg(long, default_value_t = 120)]
    heartbeat_timeout_secs: u64,

    #[arg(long, default_value_t = 60)]
    sweep_interval_secs: u64,

    /// WebSocket keep-alive ping period.
    #[arg(long, default_value_t = 30)]
    ping_interval_secs: u64,

    /// Per-connection outbound queue capacity.
    #[arg(long, default_value_t = 256)]
    max_send_queue: usize,

    #[arg(long, default_value = "info")]
    log_level: Level,

    /// `json` or `pretty`.
    #[arg(long, default_value = "json")]
    log_format: LogFormat,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            max_send_queue: self.max_send_queue,
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            liveness: LivenessConfig {
                sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
                heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    lorahub_telemetry::init_telemetry(&TelemetryConfig {
        log_level: cli.log_level,
        format: cli.log_format,
        ..Default::default()
    })?;

    tracing::info!("starting LoRa hub");

    let db = Database::open(&cli.db_path)
        .with_context(|| format!("failed to open database at {}", cli.db_path.display()))?;
    let storage = Arc::new(SqliteHubStorage::new(db));

    let handle = lorahub_server::start_with_shutdown(cli.server_config(), storage, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
        tracing::info!("shutting down");
    })
    .await
    .with_context(|| format!("failed to bind {}:{}", cli.host, cli.port))?;

    tracing::info!(port = handle.port, "LoRa hub ready");
    handle.join().await;
    Ok(())
}
