// Interrupt-driven ultrasonic ranging
//
// The timer input-capture interrupt sees a rising edge when the echo pulse
// starts and a falling edge when it ends. The pulse width in microseconds is
// the round-trip time of the sound burst.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{HalError, RangeSensor, SensorError};
use crate::context::SharedContext;

/// Speed of sound in cm/us
const SOUND_CM_PER_US: f32 = 0.0343;

/// Input-capture edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

/// Auto-reload value of the 1 MHz capture timer
pub const ECHO_TIMER_PERIOD: u32 = 0xFFFF;

/// Convert an echo pulse width to a one-way distance
pub fn pulse_to_cm(width_us: u32) -> f32 {
    width_us as f32 * SOUND_CM_PER_US / 2.0
}

/// Echo pulse width for an obstacle at `cm`
pub fn cm_to_pulse(cm: f32) -> u32 {
    (cm.max(0.0) * 2.0 / SOUND_CM_PER_US).round() as u32
}

/// Edge-pair decoder fed from the capture interrupt
pub struct EchoCapture {
    ctx: Arc<SharedContext>,
    period: u32, // timer auto-reload value, capture counter wraps here
    rising: Option<u32>,
}

impl EchoCapture {
    pub fn new(ctx: Arc<SharedContext>, period: u32) -> Self {
        Self {
            ctx,
            period,
            rising: None,
        }
    }

    /// Handle one capture event. Returns the distance when a pulse completes.
    pub fn on_capture(&mut self, edge: Edge, counter: u32) -> Option<f32> {
        match (edge, self.rising.take()) {
            (Edge::Rising, _) => {
                self.rising = Some(counter);
                None
            }
            (Edge::Falling, Some(rising)) => {
                let width = if counter >= rising {
                    counter - rising
                } else {
                    // Timer wrapped between the two edges; the reload
                    // from `period` back to 0 takes one count
                    self.period.saturating_sub(rising) + counter + 1
                };
                let cm = pulse_to_cm(width);
                self.ctx.publish_echo(cm);
                Some(cm)
            }
            // Falling edge without a rising one: we started mid-pulse
            (Edge::Falling, None) => None,
        }
    }
}

/// Fires the 10us trigger pulse on the ranger
pub trait EchoTrigger {
    fn fire(&mut self) -> Result<(), HalError>;
}

/// Ranger that triggers, then waits (bounded) for the capture path to
/// publish a fresh distance into the shared context.
/// `config::SENSOR_TIMEOUT` covers the ranger's full 5 m range.
pub struct EchoRangeSensor {
    ctx: Arc<SharedContext>,
    trigger: Box<dyn EchoTrigger>,
    timeout: Duration,
}

impl EchoRangeSensor {
    pub fn new(ctx: Arc<SharedContext>, trigger: Box<dyn EchoTrigger>, timeout: Duration) -> Self {
        Self {
            ctx,
            trigger,
            timeout,
        }
    }
}

impl RangeSensor for EchoRangeSensor {
    fn measure_cm(&mut self) -> Result<f32, SensorError> {
        let seq = self.ctx.echo_seq();
        self.trigger.fire()?;

        let deadline = Instant::now() + self.timeout;
        loop {
            if self.ctx.echo_seq() != seq {
                return Ok(self.ctx.latest_echo_cm());
            }
            if Instant::now() >= deadline {
                return Err(SensorError::Timeout);
            }
            std::thread::sleep(Duration::from_micros(100));
        }
    }
}
