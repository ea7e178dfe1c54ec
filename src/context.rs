// State shared between the control loop and interrupt-style callbacks
//
// Only three scalars cross that boundary: the operating mode, the obstacle
// threshold and the latest echo distance. Each lives in its own atomic, so no
// invariant ever spans two fields and no lock is needed.

use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use tracing::info;

use crate::config::ThresholdConfig;
use crate::messages::OperatingMode;

/// Physical button events (mode, up, down)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Mode,
    Up,
    Down,
}

pub struct SharedContext {
    mode: AtomicU8,
    threshold_cm: AtomicU8,
    echo_cm_bits: AtomicU32,
    echo_seq: AtomicU32,
    limits: ThresholdConfig,
}

impl SharedContext {
    pub fn new(limits: &ThresholdConfig) -> Self {
        Self {
            mode: AtomicU8::new(OperatingMode::Manual as u8),
            threshold_cm: AtomicU8::new(limits.default_cm),
            echo_cm_bits: AtomicU32::new(0),
            echo_seq: AtomicU32::new(0),
            limits: limits.clone(),
        }
    }

    pub fn mode(&self) -> OperatingMode {
        OperatingMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    pub fn threshold_cm(&self) -> u8 {
        self.threshold_cm.load(Ordering::Acquire)
    }

    /// Advance to the next mode in the cycle and return it
    pub fn advance_mode(&self) -> OperatingMode {
        let previous = self
            .mode
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                Some(OperatingMode::from_u8(raw).next() as u8)
            })
            .unwrap_or_else(|raw| raw);
        let next = OperatingMode::from_u8(previous).next();
        info!("Mode {:?} -> {:?}", OperatingMode::from_u8(previous), next);
        next
    }

    /// Step the threshold up, wrapping to the minimum once it reaches the maximum.
    /// Ignored outside Autonomous mode. Returns the threshold after the call.
    pub fn raise_threshold(&self) -> u8 {
        if self.mode() != OperatingMode::Autonomous {
            return self.threshold_cm();
        }
        let limits = &self.limits;
        self.update_threshold(|t| {
            let mut t = if t < limits.max_cm {
                t.saturating_add(limits.step_cm)
            } else {
                t
            };
            if t >= limits.max_cm {
                t = limits.min_cm;
            }
            t
        })
    }

    /// Step the threshold down, clamped at the minimum.
    /// Ignored outside Autonomous mode. Returns the threshold after the call.
    pub fn lower_threshold(&self) -> u8 {
        if self.mode() != OperatingMode::Autonomous {
            return self.threshold_cm();
        }
        let limits = &self.limits;
        self.update_threshold(|t| {
            if t > limits.min_cm {
                t.saturating_sub(limits.step_cm).max(limits.min_cm)
            } else {
                limits.min_cm
            }
        })
    }

    fn update_threshold(&self, step: impl Fn(u8) -> u8) -> u8 {
        let previous = self
            .threshold_cm
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |t| Some(step(t)))
            .unwrap_or_else(|t| t);
        let next = step(previous);
        if next != previous {
            info!("Obstacle threshold {}cm -> {}cm", previous, next);
        }
        next
    }

    /// Entry point for physical button interrupts
    pub fn on_button(&self, event: ButtonEvent) {
        match event {
            ButtonEvent::Mode => {
                self.advance_mode();
            }
            ButtonEvent::Up => {
                self.raise_threshold();
            }
            ButtonEvent::Down => {
                self.lower_threshold();
            }
        }
    }

    /// Store a fresh distance measurement (called from the echo capture path)
    pub fn publish_echo(&self, cm: f32) {
        self.echo_cm_bits.store(cm.to_bits(), Ordering::Release);
        self.echo_seq.fetch_add(1, Ordering::AcqRel);
    }

    /// Counter bumped on every published echo
    pub fn echo_seq(&self) -> u32 {
        self.echo_seq.load(Ordering::Acquire)
    }

    pub fn latest_echo_cm(&self) -> f32 {
        f32::from_bits(self.echo_cm_bits.load(Ordering::Acquire))
    }
}
