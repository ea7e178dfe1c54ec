// Autonomous obstacle avoidance
//
// Cruise forward until the ranger sees something closer than the threshold,
// then stop, look left, look right, look ahead again, and pick a way out.
// Every wait is a deadline checked once per tick, never a sleep.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::NavConfig;
use crate::hal::{PanServo, RangeSensor, SensorError};
use crate::motor::{Pulse, moves};
use crate::messages::DriveCommand;

/// Distance reported when the ranger gets no echo: treat as open space
pub const OPEN_SPACE_CM: f32 = 400.0;

/// Named pan positions
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoPosition {
    Right = 0,
    Front = 90,
    Left = 180,
}

/// Way out chosen after a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Maneuver {
    TurnLeft,
    TurnRight,
    UTurn,
    CreepForward,
    Reverse,
}

impl Maneuver {
    pub fn pulse(self, config: &NavConfig) -> Pulse {
        match self {
            Maneuver::TurnLeft => Pulse::from_config(&config.turn, moves::turn_left),
            Maneuver::TurnRight => Pulse::from_config(&config.turn, moves::turn_right),
            Maneuver::UTurn => Pulse::from_config(&config.u_turn, moves::turn_back),
            Maneuver::CreepForward => Pulse::from_config(&config.creep, moves::forward),
            Maneuver::Reverse => Pulse::from_config(&config.reverse, moves::backward),
        }
    }
}

/// Flags carried between ticks while in Autonomous mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NavigationState {
    pub obstacle: bool,
    pub turn_in_progress: bool,
}

/// Pick a maneuver from the two side distances and update the flags.
///
/// Boxed in on both sides: U-turn if there is room and none was tried yet,
/// creep forward out of a U-turn that was too tight, otherwise back up.
/// The obstacle flag stays set in those cases so the next tick rescans.
/// Otherwise turn toward the more open side and clear both flags.
pub fn decide(left: f32, right: f32, state: &mut NavigationState, config: &NavConfig) -> Maneuver {
    if left < config.near_cm && right < config.near_cm {
        if left > config.very_near_cm && right > config.very_near_cm && !state.turn_in_progress {
            state.turn_in_progress = true;
            Maneuver::UTurn
        } else if state.turn_in_progress {
            Maneuver::CreepForward
        } else {
            Maneuver::Reverse
        }
    } else if right >= left {
        *state = NavigationState::default();
        Maneuver::TurnRight
    } else {
        *state = NavigationState::default();
        Maneuver::TurnLeft
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ScanStage {
    LookingLeft,
    LookingRight { left: f32 },
    Recentering { left: f32, right: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Cruising,
    Scanning { stage: ScanStage, since: Instant },
}

/// Result of one navigation tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavAction {
    /// Keep driving with this command
    Cruise(DriveCommand),
    /// Obstacle ahead, stop now
    Stop,
    /// Scan in progress, stay still
    Scanning,
    /// Scan finished, run this maneuver
    Maneuver(Maneuver),
}

/// Navigation state machine. Owns the pan servo and the ranger.
pub struct Navigator {
    servo: Box<dyn PanServo>,
    range: Box<dyn RangeSensor>,
    config: NavConfig,
    state: NavigationState,
    phase: Phase,
    sensor_timed_out: bool,
}

impl Navigator {
    pub fn new(servo: Box<dyn PanServo>, range: Box<dyn RangeSensor>, config: NavConfig) -> Self {
        let mut nav = Self {
            servo,
            range,
            config,
            state: NavigationState::default(),
            phase: Phase::Cruising,
            sensor_timed_out: false,
        };
        nav.aim(ServoPosition::Front);
        nav
    }

    pub fn state(&self) -> NavigationState {
        self.state
    }

    pub fn config(&self) -> &NavConfig {
        &self.config
    }

    pub fn is_scanning(&self) -> bool {
        matches!(self.phase, Phase::Scanning { .. })
    }

    /// True if the last reading got no echo
    pub fn sensor_timed_out(&self) -> bool {
        self.sensor_timed_out
    }

    /// Abandon any scan, clear the flags and look ahead again
    pub fn reset(&mut self) {
        if self.is_scanning() || self.state != NavigationState::default() {
            debug!("Navigation reset from {:?}", self.phase);
        }
        self.state = NavigationState::default();
        self.phase = Phase::Cruising;
        self.aim(ServoPosition::Front);
    }

    /// Run one tick with the current obstacle threshold
    pub fn step(&mut self, now: Instant, threshold_cm: f32) -> NavAction {
        match self.phase {
            Phase::Cruising => {
                if self.state.obstacle {
                    // Previous maneuver left us boxed in, look around again
                    self.start_scan(now);
                    return NavAction::Scanning;
                }
                let ahead = self.measure();
                if ahead < threshold_cm {
                    info!("Obstacle at {:.1}cm (threshold {}cm), scanning", ahead, threshold_cm);
                    self.state.obstacle = true;
                    self.start_scan(now);
                    NavAction::Stop
                } else {
                    NavAction::Cruise(moves::forward(self.config.cruise_power))
                }
            }
            Phase::Scanning { stage, since } => {
                if now.duration_since(since) < self.config.scan_settle() {
                    return NavAction::Scanning;
                }
                match stage {
                    ScanStage::LookingLeft => {
                        let left = self.measure();
                        self.aim(ServoPosition::Right);
                        self.phase = Phase::Scanning {
                            stage: ScanStage::LookingRight { left },
                            since: now,
                        };
                        NavAction::Scanning
                    }
                    ScanStage::LookingRight { left } => {
                        let right = self.measure();
                        self.aim(ServoPosition::Front);
                        self.phase = Phase::Scanning {
                            stage: ScanStage::Recentering { left, right },
                            since: now,
                        };
                        NavAction::Scanning
                    }
                    ScanStage::Recentering { left, right } => {
                        self.phase = Phase::Cruising;
                        let maneuver = decide(left, right, &mut self.state, &self.config);
                        info!(
                            "Scan left={:.1}cm right={:.1}cm -> {:?} ({:?})",
                            left, right, maneuver, self.state
                        );
                        NavAction::Maneuver(maneuver)
                    }
                }
            }
        }
    }

    fn start_scan(&mut self, now: Instant) {
        self.aim(ServoPosition::Left);
        self.phase = Phase::Scanning {
            stage: ScanStage::LookingLeft,
            since: now,
        };
    }

    fn aim(&mut self, position: ServoPosition) {
        if let Err(e) = self.servo.set_angle(position as u8) {
            warn!("Failed to aim servo {:?}: {}", position, e);
        }
    }

    /// Read the ranger, failing toward "nothing there"
    fn measure(&mut self) -> f32 {
        match self.range.measure_cm() {
            Ok(cm) => {
                self.sensor_timed_out = false;
                cm
            }
            Err(SensorError::Timeout) => {
                debug!("Ranger timeout, treating as open space");
                self.sensor_timed_out = true;
                OPEN_SPACE_CM
            }
            Err(e) => {
                warn!("Ranger failed ({}), treating as open space", e);
                self.sensor_timed_out = true;
                OPEN_SPACE_CM
            }
        }
    }
}
