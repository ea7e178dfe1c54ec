// Open-loop timed maneuvers: drive for a while, stop, then sit still
//
// Nothing here sleeps. The caller advances the pulse once per tick with the
// current time, so the control loop keeps polling input while a maneuver runs.

use std::time::{Duration, Instant};

use tracing::debug;

use super::driver::MotorDriver;
use crate::config::PulseConfig;
use crate::messages::DriveCommand;

/// A drive command held for a fixed time, followed by a settle delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub command: DriveCommand,
    pub drive: Duration,
    pub settle: Duration,
}

impl Pulse {
    pub fn new(command: DriveCommand, drive: Duration, settle: Duration) -> Self {
        Self {
            command,
            drive,
            settle,
        }
    }

    /// Build from a calibration entry and a move constructor
    pub fn from_config(config: &PulseConfig, make: fn(i16) -> DriveCommand) -> Self {
        Self::new(make(config.power), config.drive(), config.settle())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Driving { until: Instant },
    Settling { until: Instant },
}

/// A pulse in progress
#[derive(Debug, Clone, Copy)]
pub struct ActivePulse {
    pulse: Pulse,
    phase: Phase,
}

impl ActivePulse {
    /// Start driving now
    pub fn start(pulse: Pulse, now: Instant, motors: &mut MotorDriver) -> Self {
        debug!("Pulse start: {:?} for {:?}", pulse.command, pulse.drive);
        motors.drive(pulse.command);
        Self {
            pulse,
            phase: Phase::Driving {
                until: now + pulse.drive,
            },
        }
    }

    pub fn pulse(&self) -> &Pulse {
        &self.pulse
    }

    /// Advance by the clock. Returns true once the pulse has fully finished.
    pub fn advance(&mut self, now: Instant, motors: &mut MotorDriver) -> bool {
        if let Phase::Driving { until } = self.phase {
            if now < until {
                return false;
            }
            motors.stop();
            self.phase = Phase::Settling {
                until: until + self.pulse.settle,
            };
        }
        match self.phase {
            Phase::Settling { until } => now >= until,
            Phase::Driving { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MotorConfig;
    use crate::hal::SimBoard;
    use crate::motor::moves;

    fn driver() -> (MotorDriver, SimBoard) {
        let sim = SimBoard::new();
        let board = sim.board();
        (
            MotorDriver::new(board.pwm, board.shift, MotorConfig::default()),
            sim,
        )
    }

    #[test]
    fn test_pulse_drives_then_stops_then_settles() {
        let (mut motors, sim) = driver();
        let t0 = Instant::now();
        let pulse = Pulse::new(
            moves::turn_left(50),
            Duration::from_millis(380),
            Duration::from_millis(500),
        );

        let mut active = ActivePulse::start(pulse, t0, &mut motors);
        assert!(!sim.state().motors_off());

        assert!(!active.advance(t0 + Duration::from_millis(379), &mut motors));
        assert!(!sim.state().motors_off());

        assert!(!active.advance(t0 + Duration::from_millis(380), &mut motors));
        assert!(sim.state().motors_off(), "motors should stop after drive time");

        assert!(!active.advance(t0 + Duration::from_millis(879), &mut motors));
        assert!(active.advance(t0 + Duration::from_millis(880), &mut motors));
    }

    #[test]
    fn test_late_tick_finishes_in_one_step() {
        let (mut motors, sim) = driver();
        let t0 = Instant::now();
        let pulse = Pulse::from_config(&PulseConfig::new(25, 300, 0), moves::backward);

        let mut active = ActivePulse::start(pulse, t0, &mut motors);
        assert!(active.advance(t0 + Duration::from_secs(2), &mut motors));
        assert!(sim.state().motors_off());
    }
}
