// Serial I/O bridge protocol
//
// A small microcontroller owns the pins (PWM timers, 74HC595 latch, servo,
// ultrasonic ranger, line sensors, gamepad SPI, LCD) and the host drives it
// with framed packets:
// Request:  [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// Response: [0xFF, 0xFF, ID, Length, Status, Params..., Checksum]

use std::cell::RefCell;
use std::io::{Read, Write};
use std::rc::Rc;
use std::time::Duration;

use tracing::debug;

use super::{
    Board, Gamepad, HalError, LineSensor, PanServo, PwmOutputs, RangeSensor, SensorError,
    ShiftRegister, StatusDisplay,
};
use crate::messages::{ControllerState, Wheel};

/// Default serial configuration
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Address of the bridge board on the link
pub const BRIDGE_ID: u8 = 0x01;

/// Packet header bytes
const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Status flags that are answers rather than faults
pub const STATUS_NO_ECHO: u8 = 0x01;
pub const STATUS_PAD_NOT_READY: u8 = 0x02;

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    SetPwm = 0x10,       // wheel, duty lo, duty hi
    ShiftOut = 0x11,     // byte
    SetServo = 0x12,     // degrees
    ReadRange = 0x20,    // -> distance mm lo, hi
    ReadLine = 0x21,     // -> 5-bit pattern
    PollPad = 0x22,      // -> 6 raw poll bytes
    WriteDisplay = 0x30, // row, 16 chars
}

/// Error types for bridge communication
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from bridge {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for bridge {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Bridge {id} returned status: 0x{status:02X}")]
    Status { id: u8, status: u8 },

    #[error("Timeout waiting for response from bridge {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Anything the bridge can talk through: a serial port, or a byte script in tests
pub trait Transport: Read + Write {}

impl<T: Read + Write + ?Sized> Transport for T {}

/// Bridge connection - handles framing and checksums
pub struct IoBridge {
    port: Box<dyn Transport>,
    id: u8,
}

impl IoBridge {
    /// Open a new connection to the bridge board
    pub fn open(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self::with_transport(Box::new(port)))
    }

    pub fn with_transport(port: Box<dyn Transport>) -> Self {
        Self {
            port,
            id: BRIDGE_ID,
        }
    }

    /// Calculate checksum for a packet (excluding header)
    fn checksum(data: &[u8]) -> u8 {
        let sum: u16 = data.iter().map(|&b| b as u16).sum();
        (!sum & 0xFF) as u8
    }

    /// Build a packet with header and checksum
    fn build_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
        let length = (params.len() + 2) as u8; // params + instruction + checksum
        let mut packet = Vec::with_capacity(6 + params.len());

        packet.extend_from_slice(&HEADER);
        packet.push(id);
        packet.push(length);
        packet.push(instruction as u8);
        packet.extend_from_slice(params);

        let checksum = Self::checksum(&packet[2..]);
        packet.push(checksum);

        packet
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let id = self.id;
        self.port.read_exact(buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::UnexpectedEof => {
                BridgeError::Timeout { id }
            }
            _ => BridgeError::Io(e),
        })
    }

    /// Read a response packet, returning its params
    fn read_response(&mut self) -> Result<Vec<u8>> {
        let expected_id = self.id;
        let mut header = [0u8; 2];
        self.read_exact(&mut header)?;

        if header != HEADER {
            return Err(BridgeError::InvalidResponse {
                id: expected_id,
                reason: format!("Invalid header: {:02X?}", header),
            });
        }

        let mut id_length = [0u8; 2];
        self.read_exact(&mut id_length)?;
        let id = id_length[0];
        let length = id_length[1] as usize;

        if id != expected_id {
            return Err(BridgeError::InvalidResponse {
                id: expected_id,
                reason: format!("ID mismatch: expected {}, got {}", expected_id, id),
            });
        }
        if length < 2 {
            return Err(BridgeError::InvalidResponse {
                id,
                reason: format!("Length {} too short", length),
            });
        }

        // status + params + checksum = length bytes
        let mut remaining = vec![0u8; length];
        self.read_exact(&mut remaining)?;

        let mut checksum_data = vec![id, length as u8];
        checksum_data.extend_from_slice(&remaining[..remaining.len() - 1]);
        if Self::checksum(&checksum_data) != remaining[remaining.len() - 1] {
            return Err(BridgeError::ChecksumMismatch { id });
        }

        let status = remaining[0];
        if status != 0 {
            return Err(BridgeError::Status { id, status });
        }

        Ok(remaining[1..remaining.len() - 1].to_vec())
    }

    fn transact(&mut self, instruction: Instruction, params: &[u8]) -> Result<Vec<u8>> {
        let packet = Self::build_packet(self.id, instruction, params);
        debug!("Bridge {:?} params={:02X?}", instruction, params);
        self.send_packet(&packet)?;
        self.read_response()
    }

    fn expect_len(&self, response: &[u8], len: usize) -> Result<()> {
        if response.len() < len {
            return Err(BridgeError::InvalidResponse {
                id: self.id,
                reason: format!("Expected {} bytes, got {}", len, response.len()),
            });
        }
        Ok(())
    }

    /// Ping the bridge to check it is alive
    pub fn ping(&mut self) -> Result<bool> {
        match self.transact(Instruction::Ping, &[]) {
            Ok(_) => Ok(true),
            Err(BridgeError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Write one wheel's PWM compare value
    pub fn set_pwm(&mut self, wheel: Wheel, duty: u16) -> Result<()> {
        let [lo, hi] = duty.to_le_bytes();
        self.transact(Instruction::SetPwm, &[wheel.index() as u8, lo, hi])?;
        Ok(())
    }

    /// Latch one byte into the shift register
    pub fn shift_out(&mut self, byte: u8) -> Result<()> {
        self.transact(Instruction::ShiftOut, &[byte])?;
        Ok(())
    }

    pub fn set_servo(&mut self, degrees: u8) -> Result<()> {
        self.transact(Instruction::SetServo, &[degrees])?;
        Ok(())
    }

    /// Trigger the ranger. `None` when the board saw no echo.
    pub fn read_range_mm(&mut self) -> Result<Option<u16>> {
        match self.transact(Instruction::ReadRange, &[]) {
            Ok(response) => {
                self.expect_len(&response, 2)?;
                Ok(Some(u16::from_le_bytes([response[0], response[1]])))
            }
            Err(BridgeError::Status { status, .. }) if status & STATUS_NO_ECHO != 0 => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn read_line(&mut self) -> Result<u8> {
        let response = self.transact(Instruction::ReadLine, &[])?;
        self.expect_len(&response, 1)?;
        Ok(response[0] & 0x1F)
    }

    /// Raw analog-mode poll bytes. `None` until the pad reports analog mode.
    pub fn poll_pad(&mut self) -> Result<Option<[u8; 6]>> {
        match self.transact(Instruction::PollPad, &[]) {
            Ok(response) => {
                self.expect_len(&response, 6)?;
                let mut raw = [0u8; 6];
                raw.copy_from_slice(&response[..6]);
                Ok(Some(raw))
            }
            Err(BridgeError::Status { status, .. }) if status & STATUS_PAD_NOT_READY != 0 => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn write_display(&mut self, row: u8, text: &str) -> Result<()> {
        let mut params = vec![row];
        // One byte per column: the LCD only has an ASCII character ROM
        params.extend(
            super::display_row(text)
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' }),
        );
        self.transact(Instruction::WriteDisplay, &params)?;
        Ok(())
    }

    /// Share the bridge between all peripheral slots of a board
    pub fn into_board(self) -> Board {
        let shared = BridgeHandle(Rc::new(RefCell::new(self)));
        Board {
            pwm: Box::new(shared.clone()),
            shift: Box::new(shared.clone()),
            servo: Box::new(shared.clone()),
            range: Box::new(shared.clone()),
            line: Box::new(shared.clone()),
            pad: Box::new(shared.clone()),
            display: Box::new(shared),
        }
    }
}

/// One bridge connection seen through one peripheral trait.
/// The control loop is single-threaded, so borrows never overlap.
#[derive(Clone)]
struct BridgeHandle(Rc<RefCell<IoBridge>>);

impl PwmOutputs for BridgeHandle {
    fn set_duty(&mut self, wheel: Wheel, duty: u16) -> std::result::Result<(), HalError> {
        Ok(self.0.borrow_mut().set_pwm(wheel, duty)?)
    }
}

impl ShiftRegister for BridgeHandle {
    fn shift_out(&mut self, byte: u8) -> std::result::Result<(), HalError> {
        Ok(self.0.borrow_mut().shift_out(byte)?)
    }
}

impl PanServo for BridgeHandle {
    fn set_angle(&mut self, degrees: u8) -> std::result::Result<(), HalError> {
        if degrees > 180 {
            return Err(HalError::OutOfRange {
                device: "servo",
                value: degrees as i32,
            });
        }
        Ok(self.0.borrow_mut().set_servo(degrees)?)
    }
}

impl RangeSensor for BridgeHandle {
    fn measure_cm(&mut self) -> std::result::Result<f32, SensorError> {
        let reading = self
            .0
            .borrow_mut()
            .read_range_mm()
            .map_err(HalError::from)?;
        match reading {
            Some(mm) => Ok(mm as f32 / 10.0),
            None => Err(SensorError::Timeout),
        }
    }
}

impl LineSensor for BridgeHandle {
    fn read_pattern(&mut self) -> std::result::Result<u8, HalError> {
        Ok(self.0.borrow_mut().read_line()?)
    }
}

impl Gamepad for BridgeHandle {
    fn poll(&mut self) -> std::result::Result<Option<ControllerState>, HalError> {
        let raw = self.0.borrow_mut().poll_pad()?;
        Ok(raw.map(ControllerState::from_poll_bytes))
    }
}

impl StatusDisplay for BridgeHandle {
    fn show(&mut self, top: &str, bottom: &str) -> std::result::Result<(), HalError> {
        let mut bridge = self.0.borrow_mut();
        bridge.write_display(0, top)?;
        bridge.write_display(1, bottom)?;
        Ok(())
    }
}
