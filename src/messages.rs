// Message types passed between the arbiter, the planners and the motor layer

use serde::{Deserialize, Serialize};

/// How rotation authority is mixed into translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftMode {
    #[default]
    None,
    DriftLeft,
    DriftRight,
}

/// Desired travel vector, consumed immediately by the kinematics engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DriveCommand {
    pub angle: i16,    // degrees, 0 = straight ahead, positive = right
    pub power: i16,    // 0..=100
    pub rotation: i16, // -100..=100, positive = counter-clockwise
    pub drift: DriftMode,
}

impl DriveCommand {
    pub fn new(angle: i16, power: i16, rotation: i16, drift: DriftMode) -> Self {
        Self {
            angle,
            power,
            rotation,
            drift,
        }
    }

    pub fn stop() -> Self {
        Self::default()
    }

    /// Translate at `angle` with no rotation
    pub fn heading(angle: i16, power: i16) -> Self {
        Self::new(angle, power, 0, DriftMode::None)
    }

    /// Spin in place, positive = counter-clockwise
    pub fn pivot(rotation: i16) -> Self {
        Self::new(0, 0, rotation, DriftMode::None)
    }

    /// Saturate out-of-range fields instead of rejecting them.
    /// Angle wraps into (-180, 180], power and rotation clamp.
    pub fn saturated(self) -> Self {
        let mut angle = (self.angle as i32).rem_euclid(360);
        if angle > 180 {
            angle -= 360;
        }
        Self {
            angle: angle as i16,
            power: self.power.clamp(0, 100),
            rotation: self.rotation.clamp(-100, 100),
            drift: self.drift,
        }
    }

    pub fn is_stop(&self) -> bool {
        self.power == 0 && self.rotation == 0
    }
}

/// Physical wheel positions, in the order the motor channels are wired
///
/// ```text
///  [0]--|||--[1]
///   |         |
///   |         |
///  [3]-------[2]
/// ```
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wheel {
    FrontLeft = 0,
    FrontRight = 1,
    RearRight = 2,
    RearLeft = 3,
}

impl Wheel {
    pub const ALL: [Wheel; 4] = [
        Wheel::FrontLeft,
        Wheel::FrontRight,
        Wheel::RearRight,
        Wheel::RearLeft,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Operating mode, advanced cyclically by one button
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    #[default]
    Manual = 0,
    LineFollow = 1,
    Autonomous = 2,
    Idle = 3,
}

impl OperatingMode {
    pub fn next(self) -> Self {
        match self {
            OperatingMode::Manual => OperatingMode::LineFollow,
            OperatingMode::LineFollow => OperatingMode::Autonomous,
            OperatingMode::Autonomous => OperatingMode::Idle,
            OperatingMode::Idle => OperatingMode::Manual,
        }
    }

    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => OperatingMode::Manual,
            1 => OperatingMode::LineFollow,
            2 => OperatingMode::Autonomous,
            _ => OperatingMode::Idle,
        }
    }
}

/// Gamepad buttons with their bit in the 16-bit button word
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Select = 0x0001,
    L3 = 0x0002,
    R3 = 0x0004,
    Start = 0x0008,
    Up = 0x0010,
    Right = 0x0020,
    Down = 0x0040,
    Left = 0x0080,
    L2 = 0x0100,
    R2 = 0x0200,
    L1 = 0x0400,
    R1 = 0x0800,
    Triangle = 0x1000,
    Circle = 0x2000,
    Cross = 0x4000,
    Square = 0x8000,
}

/// One controller poll: 16 button bits plus four stick axes.
/// `Default` is "everything released, sticks centered".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerState {
    pub buttons: u16, // 1 = pressed
    pub rx: u8,
    pub ry: u8,
    pub lx: u8,
    pub ly: u8,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            buttons: 0,
            rx: 0x80,
            ry: 0x80,
            lx: 0x80,
            ly: 0x80,
        }
    }
}

impl ControllerState {
    /// Decode the six data bytes of an analog-mode poll response.
    /// Button bytes are active-low on the wire.
    pub fn from_poll_bytes(raw: [u8; 6]) -> Self {
        Self {
            buttons: !(raw[0] as u16 | (raw[1] as u16) << 8),
            rx: raw[2],
            ry: raw[3],
            lx: raw[4],
            ly: raw[5],
        }
    }

    pub fn with(mut self, button: Button) -> Self {
        self.buttons |= button as u16;
        self
    }

    pub fn pressed(&self, button: Button) -> bool {
        self.buttons & button as u16 != 0
    }

    /// Pressed now but not in `previous`
    pub fn just_pressed(&self, previous: &ControllerState, button: Button) -> bool {
        self.pressed(button) && !previous.pressed(button)
    }
}

/// Health reported with every tick
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    ControllerMissing,
    SensorTimeout,
}

/// What the arbiter did during one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickAction {
    Stopped,
    Drive(DriveCommand),
    PulseStarted(DriveCommand),
    PulseRunning,
    Scanning,
}

/// Summary of one control tick, logged at debug level
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TickReport {
    pub mode: OperatingMode,
    pub threshold_cm: u8,
    pub action: TickAction,
    pub health: RuntimeHealth,
}
