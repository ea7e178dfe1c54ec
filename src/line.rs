// Line-sensor pattern classifier
//
//            LINE
//   sensor 1-2-3-4-5
//   bit    4-3-2-1-0
//       [0]--|||--[1]
//        |         |
//       [3]-------[2]
//
// A set bit means that sensor does NOT see the line.

use tracing::debug;

use crate::config::LineConfig;
use crate::motor::{Pulse, moves};

/// Patterns with the line under the middle sensors
const STRAIGHT: [u8; 5] = [0b11001, 0b10011, 0b10001, 0b00000, 0b11011];

/// Line under the left sensors: robot has drifted right, steer left
const BIAS_LEFT: [u8; 5] = [0b01111, 0b00111, 0b00011, 0b00001, 0b10111];

/// Line under the right sensors: steer right
const BIAS_RIGHT: [u8; 5] = [0b11100, 0b11110, 0b11000, 0b10000, 0b11101];

/// No sensor sees the line
pub const LOST: u8 = 0b11111;

/// Side the line was last seen on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LateralBias {
    Left,
    #[default]
    Right,
}

/// What to do for one pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineAction {
    Straight,
    BiasLeft,
    BiasRight,
    SpinLeft,
    SpinRight,
}

/// Build a pattern from the five raw sensor levels, leftmost first.
/// `true` = sensor output high = line not seen.
pub fn pattern_from_sensors(levels: [bool; 5]) -> u8 {
    levels
        .iter()
        .fold(0u8, |acc, &high| (acc << 1) | high as u8)
}

/// Classifier with memory of the last lateral correction
#[derive(Debug, Default)]
pub struct LineClassifier {
    last_bias: LateralBias,
}

impl LineClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_bias(&self) -> LateralBias {
        self.last_bias
    }

    /// Classify a 5-bit pattern. Lost or unknown patterns keep turning the way
    /// the line was last seen.
    pub fn classify(&mut self, pattern: u8) -> LineAction {
        let pattern = pattern & LOST;
        let action = if STRAIGHT.contains(&pattern) {
            LineAction::Straight
        } else if BIAS_LEFT.contains(&pattern) {
            self.last_bias = LateralBias::Left;
            LineAction::BiasLeft
        } else if BIAS_RIGHT.contains(&pattern) {
            self.last_bias = LateralBias::Right;
            LineAction::BiasRight
        } else {
            match self.last_bias {
                LateralBias::Left => LineAction::SpinLeft,
                LateralBias::Right => LineAction::SpinRight,
            }
        };
        debug!("Line pattern {:05b} -> {:?}", pattern, action);
        action
    }
}

/// The drive pulse issued for each line action
pub fn line_pulse(action: LineAction, config: &LineConfig) -> Pulse {
    match action {
        LineAction::Straight => Pulse::from_config(&config.straight, moves::forward),
        LineAction::BiasLeft => Pulse::from_config(&config.bias, moves::turn_left),
        LineAction::BiasRight => Pulse::from_config(&config.bias, moves::turn_right),
        LineAction::SpinLeft => Pulse::from_config(&config.spin, moves::turn_left),
        LineAction::SpinRight => Pulse::from_config(&config.spin, moves::turn_right),
    }
}
