use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mecanum_runtime::config::{BRIDGE_BAUDRATE, BRIDGE_PORT, LOOP_HZ};
use mecanum_runtime::keypad::CrlfWriter;
use mecanum_runtime::runtime::{self, RuntimeOptions};

#[derive(Parser)]
#[command(name = "mecanum-runtime")]
#[command(about = "Mecanum base control loop: manual, line following and obstacle avoidance")]
struct Args {
    /// Serial port of the I/O bridge
    #[arg(short, long, default_value = BRIDGE_PORT)]
    port: String,

    /// Bridge baud rate
    #[arg(short, long, default_value_t = BRIDGE_BAUDRATE)]
    baud: u32,

    /// JSON calibration file (missing fields keep their defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run against the simulated board, driven from the keyboard
    #[arg(long)]
    sim: bool,

    /// Control loop rate
    #[arg(long, default_value_t = LOOP_HZ)]
    loop_hz: u64,
}

/// RUST_LOG directives when set and valid, `info` otherwise
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    // Setup logging (set RUST_LOG=debug for per-tick reports)
    let logs = tracing_subscriber::fmt().with_env_filter(log_filter(
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
    ));
    if args.sim {
        // The keyboard pad puts the terminal in raw mode
        logs.with_writer(CrlfWriter::stderr).init();
    } else {
        logs.init();
    }

    let options = RuntimeOptions {
        port: args.port,
        baud: args.baud,
        config: args.config,
        sim: args.sim,
        loop_hz: args.loop_hz,
    };

    if let Err(e) = runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_defaults_to_info() {
        assert_eq!(log_filter(None).to_string(), "info");
    }

    #[test]
    fn test_log_filter_keeps_debug_from_env() {
        let filter = log_filter(Some("mecanum_runtime=debug".to_string()));
        assert!(
            filter.to_string().contains("debug"),
            "RUST_LOG=debug must not be capped at info, got {}",
            filter
        );
    }
}
