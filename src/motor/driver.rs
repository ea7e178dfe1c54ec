// Motor driver for the mecanum base
//
// Combines kinematics with the PWM channels and the direction shift register
// to provide a simple drive API.

use tracing::{debug, info, warn};

use super::kinematics::{WheelPowers, command_to_wheels};
use crate::config::MotorConfig;
use crate::hal::{PwmOutputs, ShiftRegister};
use crate::messages::{DriveCommand, Wheel};

/// (IN1, IN2) bits of each wheel in the direction byte
const DIRECTION_PINS: [(u8, u8); 4] = [
    (0x08, 0x04), // front left
    (0x02, 0x01), // front right
    (0x80, 0x40), // rear right
    (0x20, 0x10), // rear left
];

/// Logical spin direction after the polarity flag is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Forward,
    #[default]
    Reverse,
}

/// What one wheel is told to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WheelCommand {
    pub direction: Direction,
    pub duty_cycle: u16,
}

/// Map a signed wheel power to a direction and a duty cycle
///
/// Zero power means "motor off" (duty 0). Anything else is rescaled from
/// 0..=100 into `pwm_min..=pwm_max`, so a small non-zero power still gets
/// enough duty to turn the wheel.
pub fn wheel_command(config: &MotorConfig, wheel: Wheel, power: i16) -> WheelCommand {
    let forward = (power > 0) != config.reversed[wheel.index()];
    let direction = if forward {
        Direction::Forward
    } else {
        Direction::Reverse
    };

    let duty_cycle = if power == 0 {
        0
    } else {
        let min = config.pwm_min as i32;
        let max = config.pwm_max as i32;
        let scaled = (power as i32).abs() * (max - min) / 100 + min;
        scaled.clamp(min, max) as u16
    };

    WheelCommand {
        direction,
        duty_cycle,
    }
}

/// Motor driver adapter. Owns the PWM channels and the direction latch.
pub struct MotorDriver {
    pwm: Box<dyn PwmOutputs>,
    shift: Box<dyn ShiftRegister>,
    config: MotorConfig,
    direction_bits: u8,
    commands: [WheelCommand; 4],
}

impl MotorDriver {
    pub fn new(pwm: Box<dyn PwmOutputs>, shift: Box<dyn ShiftRegister>, config: MotorConfig) -> Self {
        info!(
            "Motor driver ready: pwm {}..={}, reversed {:?}",
            config.pwm_min, config.pwm_max, config.reversed
        );
        Self {
            pwm,
            shift,
            config,
            direction_bits: 0,
            commands: [WheelCommand::default(); 4],
        }
    }

    /// Set one wheel's PWM and stage its direction bits. Directions reach the
    /// hardware on the next `flush`.
    pub fn set_wheel(&mut self, wheel: Wheel, power: i16) {
        let cmd = wheel_command(&self.config, wheel, power);
        let (in1, in2) = DIRECTION_PINS[wheel.index()];

        self.direction_bits &= !(in1 | in2);
        self.direction_bits |= match cmd.direction {
            Direction::Forward => in1,
            Direction::Reverse => in2,
        };
        self.commands[wheel.index()] = cmd;

        if let Err(e) = self.pwm.set_duty(wheel, cmd.duty_cycle) {
            warn!("Failed to set PWM on {:?}: {}", wheel, e);
        }
    }

    /// Latch all four direction pairs in one transfer.
    /// If the latch fails the wheels are cut rather than left on stale directions.
    pub fn flush(&mut self) {
        if let Err(e) = self.shift.shift_out(self.direction_bits) {
            warn!("Direction latch failed ({}), cutting motor power", e);
            for wheel in Wheel::ALL {
                self.commands[wheel.index()].duty_cycle = 0;
                if let Err(e) = self.pwm.set_duty(wheel, 0) {
                    warn!("Failed to cut PWM on {:?}: {}", wheel, e);
                }
            }
        }
    }

    /// Send raw wheel powers
    pub fn apply(&mut self, powers: WheelPowers) {
        debug!(
            "Setting wheel powers: fl={}, fr={}, rr={}, rl={}",
            powers.front_left, powers.front_right, powers.rear_right, powers.rear_left
        );
        for wheel in Wheel::ALL {
            self.set_wheel(wheel, powers.get(wheel));
        }
        self.flush();
    }

    /// Drive along a travel vector
    pub fn drive(&mut self, cmd: DriveCommand) -> WheelPowers {
        let powers = command_to_wheels(cmd);
        self.apply(powers);
        powers
    }

    /// Stop all motors immediately
    pub fn stop(&mut self) {
        self.apply(WheelPowers::zero());
    }

    pub fn direction_bits(&self) -> u8 {
        self.direction_bits
    }

    /// Last command sent to each wheel
    pub fn commands(&self) -> [WheelCommand; 4] {
        self.commands
    }

    pub fn is_stopped(&self) -> bool {
        self.commands.iter().all(|c| c.duty_cycle == 0)
    }
}

impl Drop for MotorDriver {
    fn drop(&mut self) {
        info!("Stopping all motors");
        self.stop();
    }
}
