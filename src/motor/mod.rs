// Motor control module for the mecanum base
//
// Provides:
// - Mecanum inverse kinematics (travel vector -> wheel powers)
// - Motor driver adapter (wheel power -> PWM duty + direction latch)
// - Named moves and open-loop timed pulses

mod driver;
pub mod kinematics;
pub mod moves;
pub mod pulse;

pub use driver::{Direction, MotorDriver, WheelCommand, wheel_command};
pub use kinematics::{WheelPowers, compute_wheel_powers};
pub use pulse::{ActivePulse, Pulse};
