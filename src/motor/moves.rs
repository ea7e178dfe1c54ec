// Named moves, each a preset travel vector
//
// Power is 0-100. Angles follow the kinematics convention:
// 0 = forward, 90 = right, -90 = left, 180 = backward.

use crate::messages::{DriftMode, DriveCommand};

pub fn forward(power: i16) -> DriveCommand {
    DriveCommand::heading(0, power)
}

pub fn backward(power: i16) -> DriveCommand {
    DriveCommand::heading(180, power)
}

pub fn strafe_left(power: i16) -> DriveCommand {
    DriveCommand::heading(-90, power)
}

pub fn strafe_right(power: i16) -> DriveCommand {
    DriveCommand::heading(90, power)
}

pub fn left_forward(power: i16) -> DriveCommand {
    DriveCommand::heading(-45, power)
}

pub fn right_forward(power: i16) -> DriveCommand {
    DriveCommand::heading(45, power)
}

pub fn left_backward(power: i16) -> DriveCommand {
    DriveCommand::heading(-135, power)
}

pub fn right_backward(power: i16) -> DriveCommand {
    DriveCommand::heading(135, power)
}

pub fn turn_left(power: i16) -> DriveCommand {
    DriveCommand::pivot(power)
}

pub fn turn_right(power: i16) -> DriveCommand {
    DriveCommand::pivot(-power)
}

/// Pivot used for U-turns (same sense as a left turn)
pub fn turn_back(power: i16) -> DriveCommand {
    DriveCommand::pivot(power)
}

/// Sliding turn: strafe while the rear pair carries the rotation
pub fn drift_turn_left(power: i16) -> DriveCommand {
    DriveCommand::new(90, power, power, DriftMode::DriftRight)
}

pub fn drift_turn_right(power: i16) -> DriveCommand {
    DriveCommand::new(-90, power, power, DriftMode::DriftRight)
}

pub fn stop() -> DriveCommand {
    DriveCommand::stop()
}
