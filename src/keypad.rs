// Keyboard gamepad for --sim runs
//
// Arrows/WASD = direction pad, Q/E = L1/R1, C/T/X = Circle/Triangle/Cross.
// M, + and - go through the physical-button path instead of the pad.
// Esc or Ctrl-C quits.
//
// Terminals only report key presses, so a button counts as held until no
// press or repeat has arrived for HOLD_TIMEOUT.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use tracing::{info, warn};

use crate::context::{ButtonEvent, SharedContext};
use crate::hal::{Gamepad, HalError};
use crate::messages::{Button, ControllerState};

const HOLD_TIMEOUT: Duration = Duration::from_millis(150);

/// What one key does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyBinding {
    Pad(Button),
    Physical(ButtonEvent),
    Quit,
}

pub fn binding(code: KeyCode, modifiers: KeyModifiers) -> Option<KeyBinding> {
    if modifiers.contains(KeyModifiers::CONTROL) && code == KeyCode::Char('c') {
        return Some(KeyBinding::Quit);
    }
    let binding = match code {
        KeyCode::Up | KeyCode::Char('w') => KeyBinding::Pad(Button::Up),
        KeyCode::Down | KeyCode::Char('s') => KeyBinding::Pad(Button::Down),
        KeyCode::Left | KeyCode::Char('a') => KeyBinding::Pad(Button::Left),
        KeyCode::Right | KeyCode::Char('d') => KeyBinding::Pad(Button::Right),
        KeyCode::Char('q') => KeyBinding::Pad(Button::L1),
        KeyCode::Char('e') => KeyBinding::Pad(Button::R1),
        KeyCode::Char('c') => KeyBinding::Pad(Button::Circle),
        KeyCode::Char('t') => KeyBinding::Pad(Button::Triangle),
        KeyCode::Char('x') => KeyBinding::Pad(Button::Cross),
        KeyCode::Char('m') => KeyBinding::Physical(ButtonEvent::Mode),
        KeyCode::Char('+') | KeyCode::Char('=') => KeyBinding::Physical(ButtonEvent::Up),
        KeyCode::Char('-') => KeyBinding::Physical(ButtonEvent::Down),
        KeyCode::Esc => KeyBinding::Quit,
        _ => return None,
    };
    Some(binding)
}

/// Held-button bookkeeping, independent of the terminal
#[derive(Debug, Default)]
pub struct HeldKeys {
    last_seen: Vec<(Button, Instant)>,
}

impl HeldKeys {
    pub fn press(&mut self, button: Button, now: Instant) {
        match self.last_seen.iter_mut().find(|(b, _)| *b == button) {
            Some(entry) => entry.1 = now,
            None => self.last_seen.push((button, now)),
        }
    }

    /// Pad state at `now`, dropping buttons that have decayed
    pub fn state(&mut self, now: Instant) -> ControllerState {
        self.last_seen
            .retain(|(_, seen)| now.duration_since(*seen) < HOLD_TIMEOUT);
        self.last_seen
            .iter()
            .fold(ControllerState::default(), |state, (button, _)| {
                state.with(*button)
            })
    }
}

/// Terminal-backed gamepad. Puts the terminal in raw mode while alive.
pub struct KeyboardPad {
    ctx: Arc<SharedContext>,
    held: HeldKeys,
    quit: Arc<AtomicBool>,
}

impl KeyboardPad {
    pub fn new(ctx: Arc<SharedContext>) -> Result<Self, HalError> {
        enable_raw_mode()?;
        info!("Keys: arrows/WASD move, Q/E drift, C/T/X pad buttons, M/+/- board buttons, Esc quit");
        Ok(Self {
            ctx,
            held: HeldKeys::default(),
            quit: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Set once the user asks to quit
    pub fn quit_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.quit)
    }

    fn on_key(&mut self, key: KeyEvent, now: Instant) {
        if key.kind == KeyEventKind::Release {
            return;
        }
        match binding(key.code, key.modifiers) {
            Some(KeyBinding::Pad(button)) => self.held.press(button, now),
            Some(KeyBinding::Physical(event)) if key.kind == KeyEventKind::Press => {
                self.ctx.on_button(event)
            }
            Some(KeyBinding::Quit) => self.quit.store(true, Ordering::Release),
            _ => {}
        }
    }
}

impl Gamepad for KeyboardPad {
    fn poll(&mut self) -> Result<Option<ControllerState>, HalError> {
        let now = Instant::now();
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                self.on_key(key, now);
            }
        }
        Ok(Some(self.held.state(now)))
    }
}

impl Drop for KeyboardPad {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!("Failed to restore terminal: {}", e);
        }
    }
}

/// Log writer for a terminal in raw mode, where a bare `\n` moves down a
/// line without returning to column 0
pub struct CrlfWriter<W> {
    inner: W,
}

impl<W: Write> CrlfWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl CrlfWriter<io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl<W: Write> Write for CrlfWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for (i, line) in buf.split(|&b| b == b'\n').enumerate() {
            if i > 0 {
                self.inner.write_all(b"\r\n")?;
            }
            self.inner.write_all(line)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bindings() {
        let none = KeyModifiers::NONE;
        assert_eq!(binding(KeyCode::Up, none), Some(KeyBinding::Pad(Button::Up)));
        assert_eq!(
            binding(KeyCode::Char('e'), none),
            Some(KeyBinding::Pad(Button::R1))
        );
        assert_eq!(
            binding(KeyCode::Char('m'), none),
            Some(KeyBinding::Physical(ButtonEvent::Mode))
        );
        assert_eq!(binding(KeyCode::Esc, none), Some(KeyBinding::Quit));
        assert_eq!(
            binding(KeyCode::Char('c'), KeyModifiers::CONTROL),
            Some(KeyBinding::Quit)
        );
        assert_eq!(binding(KeyCode::Char('z'), none), None);
    }

    #[test]
    fn test_held_keys_decay() {
        let mut held = HeldKeys::default();
        let t0 = Instant::now();
        held.press(Button::Up, t0);
        held.press(Button::Left, t0 + Duration::from_millis(100));

        let state = held.state(t0 + Duration::from_millis(120));
        assert!(state.pressed(Button::Up) && state.pressed(Button::Left));

        let state = held.state(t0 + Duration::from_millis(200));
        assert!(!state.pressed(Button::Up), "Up should have decayed");
        assert!(state.pressed(Button::Left));

        let state = held.state(t0 + Duration::from_millis(400));
        assert_eq!(state, ControllerState::default());
    }

    #[test]
    fn test_repeat_keeps_button_held() {
        let mut held = HeldKeys::default();
        let t0 = Instant::now();
        for i in 0..5 {
            held.press(Button::R1, t0 + Duration::from_millis(100 * i));
        }
        assert!(held.state(t0 + Duration::from_millis(500)).pressed(Button::R1));
    }

    #[test]
    fn test_crlf_writer_returns_to_column_zero() {
        let mut out = CrlfWriter::new(Vec::new());
        let line = b"INFO Entering Autonomous\nINFO Obstacle\n";
        assert_eq!(out.write(line).unwrap(), line.len());
        assert_eq!(out.inner, b"INFO Entering Autonomous\r\nINFO Obstacle\r\n");
    }
}
