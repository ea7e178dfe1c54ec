// Fixed-rate control loop
//
// One tick = one ModeArbiter::tick. Runs until Ctrl-C (or Esc in --sim),
// then stops the motors before returning.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use crate::arbiter::ModeArbiter;
use crate::config::{BRIDGE_BAUDRATE, BRIDGE_PORT, Config, LOOP_HZ};
use crate::context::SharedContext;
use crate::hal::{Board, IoBridge, SimBoard};
use crate::keypad::KeyboardPad;
use crate::messages::{RuntimeHealth, TickAction};

/// Startup options, normally filled from the command line
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub port: String,
    pub baud: u32,
    pub config: Option<PathBuf>,
    pub sim: bool,
    pub loop_hz: u64,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            port: BRIDGE_PORT.to_string(),
            baud: BRIDGE_BAUDRATE,
            config: None,
            sim: false,
            loop_hz: LOOP_HZ,
        }
    }
}

/// Tick period for a loop rate, never shorter than 1 ms
pub fn tick_period(loop_hz: u64) -> Duration {
    Duration::from_millis((1000 / loop_hz.max(1)).max(1))
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn open_board(
    options: &RuntimeOptions,
    ctx: &Arc<SharedContext>,
) -> Result<(Board, Arc<AtomicBool>), BoxError> {
    if options.sim {
        info!("Running against the simulated board");
        let pad = KeyboardPad::new(Arc::clone(ctx))?;
        let quit = pad.quit_flag();
        let sim = SimBoard::new();
        return Ok((sim.board_with_echo(Box::new(pad), Arc::clone(ctx)), quit));
    }

    info!("Opening I/O bridge on {} @ {} baud", options.port, options.baud);
    let mut bridge = IoBridge::open(&options.port, options.baud)?;
    match bridge.ping() {
        Ok(true) => info!("I/O bridge responding"),
        Ok(false) | Err(_) => warn!("I/O bridge did not answer ping, continuing"),
    }
    Ok((bridge.into_board(), Arc::new(AtomicBool::new(false))))
}

pub async fn run(options: RuntimeOptions) -> Result<(), BoxError> {
    let config = match &options.config {
        Some(path) => {
            info!("Loading config from {}", path.display());
            Config::load(path)?
        }
        None => Config::default(),
    };

    let ctx = Arc::new(SharedContext::new(&config.threshold));
    let (board, quit) = open_board(&options, &ctx)?;
    let mut arbiter = ModeArbiter::new(board, &config, ctx);

    let mut tick = interval(tick_period(options.loop_hz));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Runtime started: {}Hz loop", options.loop_hz);

    let mut health = RuntimeHealth::Ok;
    let mut last_action = TickAction::Stopped;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            _ = tick.tick() => {
                let report = arbiter.tick(Instant::now());
                if report.health != health {
                    match report.health {
                        RuntimeHealth::Ok => info!("Health back to ok"),
                        other => warn!("Health: {:?}", other),
                    }
                    health = report.health;
                }
                if options.sim && report.action != last_action {
                    info!("{:?} th={}cm {:?}", report.mode, report.threshold_cm, report.action);
                }
                last_action = report.action;

                if quit.load(Ordering::Acquire) {
                    info!("Quit requested");
                    break;
                }
            }
        }
    }

    arbiter.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_period() {
        assert_eq!(tick_period(50), Duration::from_millis(20));
        assert_eq!(tick_period(0), Duration::from_secs(1));
        assert_eq!(tick_period(5000), Duration::from_millis(1));
    }

    #[test]
    fn test_default_options() {
        let options = RuntimeOptions::default();
        assert_eq!(options.port, "/dev/ttyACM0");
        assert_eq!(options.loop_hz, 50);
        assert!(!options.sim);
    }
}
