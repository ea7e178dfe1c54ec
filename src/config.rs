// Loop rate, serial defaults and calibration values
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Serial port of the I/O bridge board
pub const BRIDGE_PORT: &str = "/dev/ttyACM0";
pub const BRIDGE_BAUDRATE: u32 = 115_200;

// Longest the ranger may take before a reading counts as "no echo"
pub const SENSOR_TIMEOUT: Duration = Duration::from_millis(30);

// Status display geometry
pub const DISPLAY_COLUMNS: usize = 16;

/// Errors loading a config file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Full runtime configuration. Every field has a default, so a config file
/// only needs to list what it overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub motor: MotorConfig,
    pub threshold: ThresholdConfig,
    pub nav: NavConfig,
    pub line: LineConfig,
    pub manual: ManualConfig,
}

impl Config {
    /// Load from a JSON file, falling back to defaults for missing fields
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.motor.pwm_min >= self.motor.pwm_max {
            return Err(ConfigError::Invalid(format!(
                "pwm_min ({}) must be below pwm_max ({})",
                self.motor.pwm_min, self.motor.pwm_max
            )));
        }
        let t = &self.threshold;
        if t.min_cm >= t.max_cm || t.step_cm == 0 {
            return Err(ConfigError::Invalid(format!(
                "threshold range {}..{} step {} is empty",
                t.min_cm, t.max_cm, t.step_cm
            )));
        }
        if !(t.min_cm..=t.max_cm).contains(&t.default_cm) {
            return Err(ConfigError::Invalid(format!(
                "default threshold {} outside {}..={}",
                t.default_cm, t.min_cm, t.max_cm
            )));
        }
        if self.nav.very_near_cm >= self.nav.near_cm {
            return Err(ConfigError::Invalid(format!(
                "very_near_cm ({}) must be below near_cm ({})",
                self.nav.very_near_cm, self.nav.near_cm
            )));
        }
        Ok(())
    }
}

/// PWM range and per-wheel polarity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorConfig {
    pub pwm_min: u16, // lowest duty cycle that still turns a wheel
    pub pwm_max: u16,
    pub reversed: [bool; 4], // [front_left, front_right, rear_right, rear_left]
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            pwm_min: 100,
            pwm_max: 999,
            reversed: [false, true, true, false],
        }
    }
}

/// Obstacle trigger distance, adjustable at runtime in Autonomous mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub min_cm: u8,
    pub max_cm: u8,
    pub step_cm: u8,
    pub default_cm: u8,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            min_cm: 20,
            max_cm: 80,
            step_cm: 5,
            default_cm: 20,
        }
    }
}

/// A timed drive pulse: power, how long to drive, how long to sit still after
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseConfig {
    pub power: i16,
    pub drive_ms: u64,
    pub settle_ms: u64,
}

impl PulseConfig {
    pub const fn new(power: i16, drive_ms: u64, settle_ms: u64) -> Self {
        Self {
            power,
            drive_ms,
            settle_ms,
        }
    }

    pub fn drive(&self) -> Duration {
        Duration::from_millis(self.drive_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Autonomous navigation calibration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavConfig {
    pub cruise_power: i16,
    pub near_cm: f32,      // both sides closer than this = boxed in
    pub very_near_cm: f32, // too tight even for a U-turn
    pub scan_settle_ms: u64,
    pub turn: PulseConfig,
    pub u_turn: PulseConfig,
    pub creep: PulseConfig,
    pub reverse: PulseConfig,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            cruise_power: 25,
            near_cm: 30.0,
            very_near_cm: 15.0,
            scan_settle_ms: 1000,
            turn: PulseConfig::new(50, 380, 500),
            u_turn: PulseConfig::new(40, 850, 500),
            creep: PulseConfig::new(25, 300, 0),
            reverse: PulseConfig::new(25, 300, 0),
        }
    }
}

impl NavConfig {
    pub fn scan_settle(&self) -> Duration {
        Duration::from_millis(self.scan_settle_ms)
    }
}

/// Line following pulses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LineConfig {
    pub straight: PulseConfig,
    pub bias: PulseConfig,
    pub spin: PulseConfig,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            straight: PulseConfig::new(30, 20, 0),
            bias: PulseConfig::new(30, 20, 0),
            spin: PulseConfig::new(35, 20, 0),
        }
    }
}

/// Manual (gamepad) driving powers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManualConfig {
    pub power: i16,
    pub drift_power: i16,
}

impl Default for ManualConfig {
    fn default() -> Self {
        Self {
            power: 50,
            drift_power: 80,
        }
    }
}
