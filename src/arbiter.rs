// Mode arbiter: one control tick
//
// poll pad -> button edges -> mode change handling -> display -> active pulse
// -> per-mode drive decision. At most one drive decision per tick.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::{Config, LineConfig, ManualConfig};
use crate::context::SharedContext;
use crate::hal::{Board, Gamepad, LineSensor, StatusDisplay};
use crate::line::{LineClassifier, line_pulse};
use crate::messages::{
    Button, ControllerState, DriveCommand, OperatingMode, RuntimeHealth, TickAction, TickReport,
};
use crate::motor::{ActivePulse, MotorDriver, Pulse, moves};
use crate::nav::{NavAction, Navigator};

/// Manual-mode mapping from held buttons to a travel vector.
/// Direction pad first, then the drift shoulders, otherwise stop.
pub fn manual_command(pad: &ControllerState, config: &ManualConfig) -> DriveCommand {
    let power = config.power;
    let left = pad.pressed(Button::Left);
    let right = pad.pressed(Button::Right);

    if pad.pressed(Button::Up) {
        match (left, right) {
            (true, _) => moves::left_forward(power),
            (_, true) => moves::right_forward(power),
            _ => moves::forward(power),
        }
    } else if pad.pressed(Button::Down) {
        match (left, right) {
            (true, _) => moves::left_backward(power),
            (_, true) => moves::right_backward(power),
            _ => moves::backward(power),
        }
    } else if left {
        moves::strafe_left(power)
    } else if right {
        moves::strafe_right(power)
    } else if pad.pressed(Button::R1) {
        moves::drift_turn_right(config.drift_power)
    } else if pad.pressed(Button::L1) {
        moves::drift_turn_left(config.drift_power)
    } else {
        moves::stop()
    }
}

/// The two display rows for a mode
pub fn status_lines(mode: OperatingMode, threshold_cm: u8) -> (String, String) {
    match mode {
        OperatingMode::Idle => ("  PRESS BUTTON  ".to_string(), String::new()),
        OperatingMode::Manual => ("CONTROL WITH PS2".to_string(), String::new()),
        OperatingMode::LineFollow => ("DETECT LINE MODE".to_string(), String::new()),
        OperatingMode::Autonomous => (
            "AUTO MOVING MODE".to_string(),
            format!("  DISTANCE:{}  ", threshold_cm),
        ),
    }
}

pub struct ModeArbiter {
    ctx: Arc<SharedContext>,
    motors: MotorDriver,
    nav: Navigator,
    line: Box<dyn LineSensor>,
    classifier: LineClassifier,
    pad: Box<dyn Gamepad>,
    display: Box<dyn StatusDisplay>,
    line_config: LineConfig,
    manual_config: ManualConfig,
    pulse: Option<ActivePulse>,
    previous_pad: ControllerState,
    pad_missing: bool,
    mode: OperatingMode,
    shown: Option<(OperatingMode, u8)>,
}

impl ModeArbiter {
    /// Split the board between the components and start stopped
    pub fn new(board: Board, config: &Config, ctx: Arc<SharedContext>) -> Self {
        let mut motors = MotorDriver::new(board.pwm, board.shift, config.motor.clone());
        motors.stop();
        let nav = Navigator::new(board.servo, board.range, config.nav.clone());
        let mode = ctx.mode();
        info!("Mode arbiter started in {:?}", mode);

        Self {
            ctx,
            motors,
            nav,
            line: board.line,
            classifier: LineClassifier::new(),
            pad: board.pad,
            display: board.display,
            line_config: config.line.clone(),
            manual_config: config.manual.clone(),
            pulse: None,
            previous_pad: ControllerState::default(),
            pad_missing: false,
            mode,
            shown: None,
        }
    }

    pub fn context(&self) -> &Arc<SharedContext> {
        &self.ctx
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn motors(&self) -> &MotorDriver {
        &self.motors
    }

    pub fn navigator(&self) -> &Navigator {
        &self.nav
    }

    pub fn pulse_active(&self) -> bool {
        self.pulse.is_some()
    }

    /// Run one control tick
    pub fn tick(&mut self, now: Instant) -> TickReport {
        let pad = self.poll_pad();
        self.handle_buttons(&pad);
        self.previous_pad = pad;

        let mode = self.ctx.mode();
        if mode != self.mode {
            self.enter_mode(mode);
        }
        let threshold_cm = self.ctx.threshold_cm();
        self.refresh_display(mode, threshold_cm);

        let action = match self.advance_pulse(now) {
            Some(action) => action,
            None => self.dispatch(mode, &pad, threshold_cm, now),
        };

        let health = if self.pad_missing {
            RuntimeHealth::ControllerMissing
        } else if mode == OperatingMode::Autonomous && self.nav.sensor_timed_out() {
            RuntimeHealth::SensorTimeout
        } else {
            RuntimeHealth::Ok
        };

        let report = TickReport {
            mode,
            threshold_cm,
            action,
            health,
        };
        debug!("{:?}", report);
        report
    }

    /// Stop everything, used on shutdown
    pub fn stop(&mut self) {
        self.pulse = None;
        self.nav.reset();
        self.motors.stop();
    }

    /// A failed or not-ready pad reads as all released
    fn poll_pad(&mut self) -> ControllerState {
        let polled = match self.pad.poll() {
            Ok(state) => state,
            Err(e) => {
                if !self.pad_missing {
                    warn!("Gamepad poll failed: {}", e);
                }
                None
            }
        };
        match polled {
            Some(state) => {
                if self.pad_missing {
                    info!("Gamepad back");
                    self.pad_missing = false;
                }
                state
            }
            None => {
                if !self.pad_missing {
                    warn!("Gamepad not ready, treating as released");
                    self.pad_missing = true;
                }
                ControllerState::default()
            }
        }
    }

    /// Circle, Triangle and Cross edges, one event per tick in that priority
    fn handle_buttons(&mut self, pad: &ControllerState) {
        let previous = self.previous_pad;
        if pad.just_pressed(&previous, Button::Circle) {
            self.ctx.advance_mode();
        } else if pad.just_pressed(&previous, Button::Triangle) {
            self.ctx.raise_threshold();
        } else if pad.just_pressed(&previous, Button::Cross) {
            self.ctx.lower_threshold();
        }
    }

    fn enter_mode(&mut self, mode: OperatingMode) {
        info!("Entering {:?}", mode);
        if self.pulse.take().is_some() {
            debug!("Pulse cancelled by mode change");
        }
        self.nav.reset();
        self.motors.stop();
        self.mode = mode;
    }

    fn refresh_display(&mut self, mode: OperatingMode, threshold_cm: u8) {
        if self.shown == Some((mode, threshold_cm)) {
            return;
        }
        let (top, bottom) = status_lines(mode, threshold_cm);
        match self.display.show(&top, &bottom) {
            Ok(()) => self.shown = Some((mode, threshold_cm)),
            Err(e) => warn!("Display write failed: {}", e),
        }
    }

    /// `Some` while a pulse is still running
    fn advance_pulse(&mut self, now: Instant) -> Option<TickAction> {
        let active = self.pulse.as_mut()?;
        if active.advance(now, &mut self.motors) {
            self.pulse = None;
            None
        } else {
            Some(TickAction::PulseRunning)
        }
    }

    fn start_pulse(&mut self, pulse: Pulse, now: Instant) -> TickAction {
        self.pulse = Some(ActivePulse::start(pulse, now, &mut self.motors));
        TickAction::PulseStarted(pulse.command)
    }

    fn dispatch(
        &mut self,
        mode: OperatingMode,
        pad: &ControllerState,
        threshold_cm: u8,
        now: Instant,
    ) -> TickAction {
        match mode {
            OperatingMode::Manual => {
                let cmd = manual_command(pad, &self.manual_config);
                self.drive_or_stop(cmd)
            }
            OperatingMode::LineFollow => {
                let pattern = match self.line.read_pattern() {
                    Ok(pattern) => pattern,
                    Err(e) => {
                        warn!("Line sensor read failed ({}), stopping", e);
                        self.motors.stop();
                        return TickAction::Stopped;
                    }
                };
                let action = self.classifier.classify(pattern);
                let pulse = line_pulse(action, &self.line_config);
                self.start_pulse(pulse, now)
            }
            OperatingMode::Autonomous => match self.nav.step(now, threshold_cm as f32) {
                NavAction::Cruise(cmd) => self.drive_or_stop(cmd),
                NavAction::Stop => {
                    self.motors.stop();
                    TickAction::Stopped
                }
                NavAction::Scanning => {
                    if !self.motors.is_stopped() {
                        self.motors.stop();
                    }
                    TickAction::Scanning
                }
                NavAction::Maneuver(maneuver) => {
                    let pulse = maneuver.pulse(self.nav.config());
                    self.start_pulse(pulse, now)
                }
            },
            OperatingMode::Idle => {
                if !self.motors.is_stopped() {
                    self.motors.stop();
                }
                TickAction::Stopped
            }
        }
    }

    fn drive_or_stop(&mut self, cmd: DriveCommand) -> TickAction {
        if cmd.is_stop() {
            self.motors.stop();
            TickAction::Stopped
        } else {
            self.motors.drive(cmd);
            TickAction::Drive(cmd)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ButtonEvent;
    use crate::hal::{SimBoard, display_row};
    use crate::nav::Maneuver;
    use std::time::Duration;

    fn arbiter() -> (ModeArbiter, SimBoard) {
        let sim = SimBoard::new();
        sim.state().pad = Some(ControllerState::default());
        let config = Config::default();
        let ctx = Arc::new(SharedContext::new(&config.threshold));
        (ModeArbiter::new(sim.board(), &config, ctx), sim)
    }

    fn press(sim: &SimBoard, button: Button) {
        sim.state().pad = Some(ControllerState::default().with(button));
    }

    fn release(sim: &SimBoard) {
        sim.state().pad = Some(ControllerState::default());
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Tap Circle until the arbiter reaches `mode`
    fn switch_to(arbiter: &mut ModeArbiter, sim: &SimBoard, mode: OperatingMode, now: Instant) {
        while arbiter.mode() != mode {
            press(sim, Button::Circle);
            arbiter.tick(now);
            release(sim);
            arbiter.tick(now);
        }
    }

    #[test]
    fn test_manual_mapping() {
        let config = ManualConfig::default();
        let pad = |buttons: &[Button]| {
            buttons
                .iter()
                .fold(ControllerState::default(), |s, &b| s.with(b))
        };

        assert_eq!(manual_command(&pad(&[Button::Up]), &config), moves::forward(50));
        assert_eq!(
            manual_command(&pad(&[Button::Up, Button::Left]), &config),
            moves::left_forward(50)
        );
        assert_eq!(
            manual_command(&pad(&[Button::Down, Button::Right]), &config),
            moves::right_backward(50)
        );
        assert_eq!(manual_command(&pad(&[Button::Right]), &config), moves::strafe_right(50));
        assert_eq!(
            manual_command(&pad(&[Button::R1]), &config),
            moves::drift_turn_right(80)
        );
        assert_eq!(
            manual_command(&pad(&[Button::L1]), &config),
            moves::drift_turn_left(80)
        );
        assert!(manual_command(&pad(&[]), &config).is_stop());
        // Direction pad wins over the shoulders
        assert_eq!(
            manual_command(&pad(&[Button::R1, Button::Up]), &config),
            moves::forward(50)
        );
    }

    #[test]
    fn test_manual_drives_and_stops() {
        let (mut arbiter, sim) = arbiter();
        let now = Instant::now();

        press(&sim, Button::Up);
        let report = arbiter.tick(now);
        assert_eq!(report.mode, OperatingMode::Manual);
        assert_eq!(report.action, TickAction::Drive(moves::forward(50)));
        assert!(!sim.state().motors_off());

        release(&sim);
        assert_eq!(arbiter.tick(now).action, TickAction::Stopped);
        assert!(sim.state().motors_off());
    }

    #[test]
    fn test_circle_edge_advances_once_per_press() {
        let (mut arbiter, sim) = arbiter();
        let now = Instant::now();

        press(&sim, Button::Circle);
        arbiter.tick(now);
        arbiter.tick(now);
        arbiter.tick(now);
        assert_eq!(
            arbiter.mode(),
            OperatingMode::LineFollow,
            "holding Circle must advance only once"
        );
        release(&sim);
        arbiter.tick(now);
        press(&sim, Button::Circle);
        arbiter.tick(now);
        assert_eq!(arbiter.mode(), OperatingMode::Autonomous);
    }

    #[test]
    fn test_threshold_buttons_only_in_autonomous() {
        let (mut arbiter, sim) = arbiter();
        let now = Instant::now();

        press(&sim, Button::Triangle);
        assert_eq!(arbiter.tick(now).threshold_cm, 20);
        release(&sim);

        switch_to(&mut arbiter, &sim, OperatingMode::Autonomous, now);
        press(&sim, Button::Triangle);
        assert_eq!(arbiter.tick(now).threshold_cm, 25);
        release(&sim);
        arbiter.tick(now);
        press(&sim, Button::Cross);
        assert_eq!(arbiter.tick(now).threshold_cm, 20);
        release(&sim);
        arbiter.tick(now);
        press(&sim, Button::Cross);
        assert_eq!(arbiter.tick(now).threshold_cm, 20, "clamped at minimum");
    }

    #[test]
    fn test_display_rewritten_only_on_change() {
        let (mut arbiter, sim) = arbiter();
        let now = Instant::now();

        arbiter.tick(now);
        assert_eq!(sim.state().display[0], "CONTROL WITH PS2");
        let writes = sim.state().display_writes;
        arbiter.tick(now);
        arbiter.tick(now);
        assert_eq!(sim.state().display_writes, writes);

        switch_to(&mut arbiter, &sim, OperatingMode::Autonomous, now);
        assert_eq!(sim.state().display[0], "AUTO MOVING MODE");
        assert_eq!(sim.state().display[1], display_row("  DISTANCE:20  "));

        press(&sim, Button::Triangle);
        arbiter.tick(now);
        assert_eq!(sim.state().display[1], display_row("  DISTANCE:25  "));

        switch_to(&mut arbiter, &sim, OperatingMode::Idle, now);
        assert_eq!(sim.state().display[0], "  PRESS BUTTON  ");
        assert_eq!(sim.state().display[1], " ".repeat(16));
    }

    #[test]
    fn test_line_follow_pulses() {
        let (mut arbiter, sim) = arbiter();
        let t0 = Instant::now();
        switch_to(&mut arbiter, &sim, OperatingMode::LineFollow, t0);

        let t1 = t0 + ms(100);
        sim.state().line_pattern = 0x07;
        let report = arbiter.tick(t1);
        assert_eq!(report.action, TickAction::PulseStarted(moves::turn_left(30)));
        assert_eq!(arbiter.tick(t1 + ms(10)).action, TickAction::PulseRunning);

        // Pulse over: stop, then the next decision in the same tick
        sim.state().line_pattern = 0x1F;
        let report = arbiter.tick(t1 + ms(20));
        assert_eq!(report.action, TickAction::PulseStarted(moves::turn_left(35)));
    }

    #[test]
    fn test_line_sensor_failure_stops_without_spinning() {
        let (mut arbiter, sim) = arbiter();
        let t0 = Instant::now();
        switch_to(&mut arbiter, &sim, OperatingMode::LineFollow, t0);

        // Leave the line on the left so a lost-line guess would spin left
        let t1 = t0 + ms(100);
        sim.state().line_pattern = 0x07;
        arbiter.tick(t1);

        sim.state().fail_line = true;
        for i in 1..5 {
            let report = arbiter.tick(t1 + ms(20 * i));
            assert_eq!(report.action, TickAction::Stopped, "tick {}", i);
            assert!(sim.state().motors_off(), "dead line sensor must not drive");
        }

        // Reads resume with the old bias intact
        sim.state().fail_line = false;
        sim.state().line_pattern = 0x1F;
        let report = arbiter.tick(t1 + ms(200));
        assert_eq!(report.action, TickAction::PulseStarted(moves::turn_left(35)));
    }

    #[test]
    fn test_autonomous_scan_and_maneuver() {
        let (mut arbiter, sim) = arbiter();
        let t0 = Instant::now();
        switch_to(&mut arbiter, &sim, OperatingMode::Autonomous, t0);

        sim.state()
            .ranges
            .extend([Some(50.0), Some(12.0), Some(60.0), Some(10.0)]);

        let report = arbiter.tick(t0);
        assert_eq!(report.action, TickAction::Drive(moves::forward(25)));
        assert_eq!(arbiter.tick(t0).action, TickAction::Stopped);
        assert!(sim.state().motors_off());

        assert_eq!(arbiter.tick(t0 + ms(1000)).action, TickAction::Scanning);
        assert_eq!(arbiter.tick(t0 + ms(2000)).action, TickAction::Scanning);
        let report = arbiter.tick(t0 + ms(3000));
        assert_eq!(
            report.action,
            TickAction::PulseStarted(Maneuver::TurnLeft.pulse(&Config::default().nav).command)
        );
        assert!(arbiter.pulse_active());
        assert_eq!(arbiter.tick(t0 + ms(3100)).action, TickAction::PulseRunning);
    }

    #[test]
    fn test_mode_change_cancels_pulse_and_scan() {
        let (mut arbiter, sim) = arbiter();
        let t0 = Instant::now();
        switch_to(&mut arbiter, &sim, OperatingMode::Autonomous, t0);

        sim.state().ranges.push_back(Some(5.0));
        arbiter.tick(t0);
        assert!(arbiter.navigator().is_scanning());

        // Physical mode button lands mid-scan
        arbiter.context().on_button(ButtonEvent::Mode);
        let report = arbiter.tick(t0 + ms(20));
        assert_eq!(report.mode, OperatingMode::Idle);
        assert!(!arbiter.navigator().is_scanning());
        assert!(!arbiter.pulse_active());
        assert!(sim.state().motors_off());
        assert_eq!(sim.state().servo_angle, 90);
    }

    #[test]
    fn test_mode_change_during_line_pulse() {
        let (mut arbiter, sim) = arbiter();
        let t0 = Instant::now();
        switch_to(&mut arbiter, &sim, OperatingMode::LineFollow, t0);

        arbiter.tick(t0);
        assert!(arbiter.pulse_active());
        press(&sim, Button::Circle);
        let report = arbiter.tick(t0 + ms(5));
        assert_eq!(report.mode, OperatingMode::Autonomous);
        assert!(
            !matches!(report.action, TickAction::PulseRunning),
            "pulse should be cancelled, got {:?}",
            report.action
        );
    }

    #[test]
    fn test_missing_pad_reads_released() {
        let (mut arbiter, sim) = arbiter();
        let now = Instant::now();

        press(&sim, Button::Up);
        arbiter.tick(now);
        sim.state().pad = None;
        let report = arbiter.tick(now);
        assert_eq!(report.health, RuntimeHealth::ControllerMissing);
        assert_eq!(report.action, TickAction::Stopped);

        sim.state().fail_pad = true;
        assert_eq!(arbiter.tick(now).health, RuntimeHealth::ControllerMissing);

        sim.state().fail_pad = false;
        release(&sim);
        assert_eq!(arbiter.tick(now).health, RuntimeHealth::Ok);
    }

    #[test]
    fn test_sensor_timeout_health() {
        let (mut arbiter, sim) = arbiter();
        let now = Instant::now();
        switch_to(&mut arbiter, &sim, OperatingMode::Autonomous, now);

        sim.state().ranges.push_back(None);
        let report = arbiter.tick(now);
        assert_eq!(report.health, RuntimeHealth::SensorTimeout);
        assert!(matches!(report.action, TickAction::Drive(_)), "timeout is open space");
    }

    #[test]
    fn test_idle_keeps_motors_off() {
        let (mut arbiter, sim) = arbiter();
        let now = Instant::now();
        switch_to(&mut arbiter, &sim, OperatingMode::Idle, now);
        press(&sim, Button::Up);
        assert_eq!(arbiter.tick(now).action, TickAction::Stopped);
        assert!(sim.state().motors_off());
    }
}
