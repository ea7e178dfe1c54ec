// Mecanum inverse kinematics for the 4-wheel base
// Converts a travel vector (angle, power, rotation, drift) to signed wheel powers.

use std::f32::consts::{FRAC_1_SQRT_2, PI};

use crate::messages::{DriftMode, DriveCommand, Wheel};

/// Rotation share of the motor headroom for a symmetric pivot
const PIVOT_RATIO: f32 = 0.5;

/// Rotation share when drifting (rotation only reaches two wheels)
const DRIFT_RATIO: f32 = 0.3;

/// Signed per-wheel power, roughly -100..=100 but NOT clamped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WheelPowers {
    pub front_left: i16,  // [0]
    pub front_right: i16, // [1]
    pub rear_right: i16,  // [2]
    pub rear_left: i16,   // [3]
}

impl WheelPowers {
    pub fn new(front_left: i16, front_right: i16, rear_right: i16, rear_left: i16) -> Self {
        Self {
            front_left,
            front_right,
            rear_right,
            rear_left,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Returns powers as array in wheel index order
    pub fn as_array(&self) -> [i16; 4] {
        [
            self.front_left,
            self.front_right,
            self.rear_right,
            self.rear_left,
        ]
    }

    pub fn get(&self, wheel: Wheel) -> i16 {
        self.as_array()[wheel.index()]
    }
}

/// Convert a drive command to wheel powers
pub fn command_to_wheels(cmd: DriveCommand) -> WheelPowers {
    let cmd = cmd.saturated();
    compute_wheel_powers(cmd.angle, cmd.power, cmd.rotation, cmd.drift)
}

/// Convert a travel vector to wheel powers
///
/// # Arguments
/// * `angle` - Travel direction in degrees (0 = forward, 90 = right, -90 = left)
/// * `power` - Translation power, 0-100
/// * `rotation` - Rotation power, positive = counter-clockwise
/// * `drift` - Mixing profile for the rotation term
///
/// Translation and rotation share the motor headroom: when both are asked for,
/// translation drops by the drift ratio and rotation is halved.
pub fn compute_wheel_powers(angle: i16, power: i16, rotation: i16, drift: DriftMode) -> WheelPowers {
    let mut power = power as i32;
    let mut rot = rotation as i32;

    // Shift so that 0° points straight ahead in the trig frame
    let angle = angle as i32 + 90;
    let rad = angle as f32 * (PI / 180.0);

    let ratio = match drift {
        DriftMode::None => PIVOT_RATIO,
        DriftMode::DriftLeft | DriftMode::DriftRight => DRIFT_RATIO,
    };

    // Diagonals would otherwise drive both roller axes at full power
    if angle % 90 != 0 {
        power = (power as f32 * FRAC_1_SQRT_2) as i32;
    }

    if rot != 0 {
        power = (power as f32 * (1.0 - ratio)) as i32;
        if power != 0 {
            rot /= 2;
        }
    }

    let p = power as f32;
    let r = rot as f32;
    let (sin, cos) = rad.sin_cos();
    let s = p * sin;
    let c = p * cos;

    let powers = match drift {
        DriftMode::None => {
            let turn = r * ratio * 2.0;
            [s - c - turn, s + c + turn, s - c + turn, s + c - turn]
        }
        DriftMode::DriftLeft => {
            let turn = r * cos * ratio;
            [s - c - turn, s + c + turn, s - c, s + c]
        }
        DriftMode::DriftRight => {
            let turn = r * cos * ratio;
            [
                s - c * (rad + PI).cos(),
                s + c * cos,
                s - c - turn,
                -s + c + turn,
            ]
        }
    };

    // cos(π/2) is not exactly 0 in f32, so round rather than truncate.
    // A stop command is 0.0 * finite everywhere and stays exactly zero.
    let [p0, p1, p2, p3] = powers.map(|v| v.round() as i16);
    WheelPowers::new(p0, p1, p2, p3)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DRIFTS: [DriftMode; 3] = [DriftMode::None, DriftMode::DriftLeft, DriftMode::DriftRight];

    #[test]
    fn test_zero_command_is_exact_stop() {
        for drift in DRIFTS {
            for angle in [-180, -135, -90, -45, 0, 45, 90, 135, 180] {
                let wheels = compute_wheel_powers(angle, 0, 0, drift);
                assert_eq!(
                    wheels,
                    WheelPowers::zero(),
                    "angle {} drift {:?} should be a full stop",
                    angle,
                    drift
                );
            }
        }
    }

    #[test]
    fn test_forward_drives_all_wheels_equally() {
        let wheels = compute_wheel_powers(0, 50, 0, DriftMode::None);
        println!("Forward: {:?}", wheels);
        assert_eq!(wheels.as_array(), [50, 50, 50, 50]);
    }

    #[test]
    fn test_strafe_right_crosses_diagonal_pairs() {
        let wheels = compute_wheel_powers(90, 50, 0, DriftMode::None);
        println!("Strafe right: {:?}", wheels);
        // angle 180 in trig frame: sin ~ 0, cos = -1
        assert_eq!(wheels.front_left, 50);
        assert_eq!(wheels.front_right, -50);
        assert_eq!(wheels.rear_right, 50);
        assert_eq!(wheels.rear_left, -50);
    }

    #[test]
    fn test_diagonal_power_is_reduced() {
        let wheels = compute_wheel_powers(45, 100, 0, DriftMode::None);
        println!("Diagonal: {:?}", wheels);
        // Moving front-right only uses one roller diagonal
        for p in wheels.as_array() {
            assert!(p.abs() <= 100, "diagonal overdrive: {:?}", wheels);
        }
        assert!(wheels.front_left > 90);
        assert!(wheels.front_right.abs() < 2);
    }

    #[test]
    fn test_pure_pivot_spins_sides_opposite() {
        for rotation in [10, 40, 100, -25, -100] {
            let wheels = compute_wheel_powers(0, 0, rotation, DriftMode::None);
            assert!(
                (wheels.front_left > 0) != (wheels.front_right > 0),
                "rotation {} should spin wheels 0 and 1 opposite: {:?}",
                rotation,
                wheels
            );
            assert_eq!(wheels.front_left, -rotation);
            assert_eq!(wheels.rear_right, rotation);
        }
    }

    #[test]
    fn test_rotation_shares_headroom() {
        // Power 50 with rotation: power scaled by 0.5, rotation halved
        let wheels = compute_wheel_powers(0, 50, 40, DriftMode::None);
        assert_eq!(wheels.as_array(), [25 - 20, 25 + 20, 25 + 20, 25 - 20]);
    }

    #[test]
    fn test_drift_turn_only_moves_rotation_into_two_wheels() {
        let plain = compute_wheel_powers(-90, 80, 0, DriftMode::DriftRight);
        let turning = compute_wheel_powers(-90, 80, 80, DriftMode::DriftRight);
        println!("Drift right: plain {:?}, turning {:?}", plain, turning);
        // Rotation term is weighted by cos(rad) and lands on the rear pair
        assert_ne!(turning.rear_right, turning.rear_left);
        assert!(turning.front_left.abs() <= 80);
    }

    #[test]
    fn test_output_never_exceeds_combined_input() {
        for drift in DRIFTS {
            for angle in (-180..=180).step_by(15) {
                for power in [0, 10, 50, 100] {
                    for rotation in [-100, -40, 0, 40, 100] {
                        let wheels = compute_wheel_powers(angle, power, rotation, drift);
                        let bound = power + rotation.abs();
                        for p in wheels.as_array() {
                            assert!(
                                p.abs() <= bound,
                                "angle={} power={} rot={} drift={:?} gave {:?}",
                                angle,
                                power,
                                rotation,
                                drift,
                                wheels
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_command_input_is_saturated() {
        let wild = command_to_wheels(DriveCommand::new(0, 500, 0, DriftMode::None));
        assert_eq!(wild.as_array(), [100, 100, 100, 100]);
    }
}
