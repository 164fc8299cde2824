// CLI entry point for the Slipstream relay.
//
// Starts a standalone relay that racing clients connect to. See `server.rs`
// for the networking architecture and `coordinator.rs` for the lobby and
// race state machine.
//
// Usage:
//   relay [OPTIONS]
//     --host <HOST>                  Bind address (default: 127.0.0.1)
//     --port <PORT>                  Listen port (default: 7878)
//     --countdown-from <N>           First countdown value (default: 3)
//     --countdown-interval-ms <MS>   Countdown step (default: 1000)
//     --log-level <LEVEL>            Used when RUST_LOG is unset (default: info)
//
// The process runs until killed; Ctrl+C ends it.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use slipstream_relay::{CountdownConfig, RelayConfig, start_relay};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "relay", about = "Slipstream lobby and race coordinator")]
struct Cli {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// TCP port to listen on (0 picks a free port).
    #[arg(long, default_value_t = 7878)]
    port: u16,

    /// First value of the pre-race countdown.
    #[arg(long, default_value_t = 3)]
    countdown_from: u32,

    /// Milliseconds between countdown values.
    #[arg(long, default_value_t = 1000)]
    countdown_interval_ms: u64,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            host: self.host.clone(),
            port: self.port,
            countdown: CountdownConfig {
                from: self.countdown_from,
                interval: Duration::from_millis(self.countdown_interval_ms),
            },
            ..RelayConfig::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = cli.relay_config();
    let (handle, addr) = start_relay(config)
        .with_context(|| format!("failed to start relay on {}:{}", cli.host, cli.port))?;

    info!(%addr, "relay listening");
    handle.wait();
    Ok(())
}
