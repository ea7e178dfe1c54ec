// Peripheral interfaces used by the control core
//
// Provides:
// - One trait per peripheral (PWM, shift register, servo, ranger, line bank, gamepad, display)
// - Serial I/O bridge implementation
// - In-memory simulated board for tests and --sim runs
// - Echo capture decoding for interrupt-driven rangers

pub mod bridge;
pub mod echo;
pub mod sim;

pub use bridge::{BridgeError, IoBridge};
pub use echo::{EchoCapture, EchoRangeSensor, EchoTrigger};
pub use sim::{SimBoard, SimState};

use crate::messages::{ControllerState, Wheel};

/// Peripheral failure
#[derive(Debug, thiserror::Error)]
pub enum HalError {
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("{device} not responding")]
    NotResponding { device: &'static str },

    #[error("Value {value} out of range for {device}")]
    OutOfRange { device: &'static str, value: i32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ranger failure
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("No echo within the sensor timeout")]
    Timeout,

    #[error(transparent)]
    Hal(#[from] HalError),
}

/// Four independent PWM compare registers, one per wheel
pub trait PwmOutputs {
    fn set_duty(&mut self, wheel: Wheel, duty: u16) -> Result<(), HalError>;
}

/// Serial-in parallel-out latch carrying the motor direction bits
pub trait ShiftRegister {
    /// Shift out one byte MSB first and latch it
    fn shift_out(&mut self, byte: u8) -> Result<(), HalError>;
}

/// Pan servo carrying the ranger
pub trait PanServo {
    /// Angle in degrees, 0 (right) ..= 180 (left)
    fn set_angle(&mut self, degrees: u8) -> Result<(), HalError>;
}

/// Distance sensor
pub trait RangeSensor {
    /// Trigger one measurement and wait (bounded) for the result in cm
    fn measure_cm(&mut self) -> Result<f32, SensorError>;
}

/// Five reflectance sensors under the front bumper
pub trait LineSensor {
    /// 5-bit pattern, bit 4 = leftmost sensor, set = line NOT seen
    fn read_pattern(&mut self) -> Result<u8, HalError>;
}

/// Gamepad poller
pub trait Gamepad {
    /// `Ok(None)` when the pad has not produced a valid analog-mode frame yet
    fn poll(&mut self) -> Result<Option<ControllerState>, HalError>;
}

/// Two-line character display
pub trait StatusDisplay {
    fn show(&mut self, top: &str, bottom: &str) -> Result<(), HalError>;
}

/// Every peripheral the control core needs, each owned exactly once.
/// The arbiter splits this up and hands each part to the component using it.
pub struct Board {
    pub pwm: Box<dyn PwmOutputs>,
    pub shift: Box<dyn ShiftRegister>,
    pub servo: Box<dyn PanServo>,
    pub range: Box<dyn RangeSensor>,
    pub line: Box<dyn LineSensor>,
    pub pad: Box<dyn Gamepad>,
    pub display: Box<dyn StatusDisplay>,
}

/// Pad a display row to the full width, truncating anything longer
pub fn display_row(text: &str) -> String {
    let mut row: String = text.chars().take(crate::config::DISPLAY_COLUMNS).collect();
    while row.chars().count() < crate::config::DISPLAY_COLUMNS {
        row.push(' ');
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_row_is_fixed_width() {
        assert_eq!(display_row("AUTO"), "AUTO            ");
        assert_eq!(display_row("0123456789ABCDEFXYZ"), "0123456789ABCDEF");
        assert_eq!(display_row("").len(), 16);
    }
}
