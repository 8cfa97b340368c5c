//! Modbus RTU master over UART.
//!
//! Implements [`BusPort`] with function 0x04 (read input registers), the
//! only function the charge controller needs.
//!
//! ```text
//!  request   [slave][0x04][addr hi][addr lo][qty hi][qty lo][crc lo][crc hi]
//!  response  [slave][0x04][bytes][data ...][crc lo][crc hi]
//!  exception [slave][0x84][code][crc lo][crc hi]
//! ```
//!
//! Responses are checked in order: CRC, slave address, exception bit,
//! function code and byte count.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::hal::uart::UartDriver`.
//! - **all other targets**: an in-memory slave that answers from a register
//!   map with properly framed responses.

use core::time::Duration;

use log::{debug, warn};

use crate::app::ports::BusPort;
use crate::error::BusError;

#[cfg(target_os = "espidf")]
use esp_idf_svc::hal::{delay::TickType, uart::UartDriver};

/// Read input registers.
pub const FN_READ_INPUT_REGISTERS: u8 = 0x04;

/// Most registers a single 0x04 request may ask for.
pub const MAX_REGISTERS: usize = 125;

const EXCEPTION_BIAS: u8 = 0x80;
const CRC_LEN: usize = 2;
const HEADER_LEN: usize = 3;
const EXCEPTION_LEN: usize = HEADER_LEN + CRC_LEN;
const REQUEST_LEN: usize = 8;
const MAX_FRAME: usize = HEADER_LEN + MAX_REGISTERS * 2 + CRC_LEN;

/// Default response timeout.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

// ───────────────────────────────────────────────────────────────
// Framing
// ───────────────────────────────────────────────────────────────

/// CRC-16/MODBUS (poly 0xA001 reflected, init 0xFFFF).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
        }
    }
    crc
}

fn append_crc(frame: &mut [u8], len: usize) -> usize {
    let crc = crc16(&frame[..len]).to_le_bytes();
    frame[len..len + CRC_LEN].copy_from_slice(&crc);
    len + CRC_LEN
}

fn crc_ok(frame: &[u8]) -> bool {
    match frame.len().checked_sub(CRC_LEN) {
        Some(body) => crc16(&frame[..body]).to_le_bytes() == frame[body..],
        None => false,
    }
}

/// Encode a read-input-registers request.
pub fn encode_read_request(slave_id: u8, address: u16, count: u16) -> [u8; REQUEST_LEN] {
    let mut frame = [0u8; REQUEST_LEN];
    frame[0] = slave_id;
    frame[1] = FN_READ_INPUT_REGISTERS;
    frame[2..4].copy_from_slice(&address.to_be_bytes());
    frame[4..6].copy_from_slice(&count.to_be_bytes());
    append_crc(&mut frame, 6);
    frame
}

/// Number of bytes a complete response for `count` registers occupies.
pub const fn response_len(count: usize) -> usize {
    HEADER_LEN + count * 2 + CRC_LEN
}

/// Validate a response frame and copy its registers into `out`.
///
/// Returns the number of words written, which is the smaller of what the
/// slave sent and `out.len()`.
pub fn decode_read_response(frame: &[u8], slave_id: u8, out: &mut [u16]) -> Result<usize, BusError> {
    // An exception reply is shorter than the data reply the master waited for.
    if frame.len() >= EXCEPTION_LEN && frame[1] & EXCEPTION_BIAS != 0 {
        let exc = &frame[..EXCEPTION_LEN];
        if !crc_ok(exc) {
            return Err(BusError::Crc);
        }
        if exc[0] != slave_id {
            return Err(BusError::WrongSlave);
        }
        return Err(BusError::Exception(exc[2]));
    }
    if frame.len() < EXCEPTION_LEN {
        return Err(BusError::Timeout);
    }
    if !crc_ok(frame) {
        return Err(BusError::Crc);
    }
    if frame[0] != slave_id {
        return Err(BusError::WrongSlave);
    }
    if frame[1] != FN_READ_INPUT_REGISTERS {
        return Err(BusError::Malformed);
    }
    let byte_count = usize::from(frame[2]);
    if byte_count % 2 != 0 || frame.len() != HEADER_LEN + byte_count + CRC_LEN {
        return Err(BusError::Malformed);
    }

    let data = &frame[HEADER_LEN..HEADER_LEN + byte_count];
    let mut n = 0;
    for (slot, pair) in out.iter_mut().zip(data.chunks_exact(2)) {
        *slot = u16::from_be_bytes([pair[0], pair[1]]);
        n += 1;
    }
    Ok(n)
}

// ───────────────────────────────────────────────────────────────
// RTU master
// ───────────────────────────────────────────────────────────────

/// Simulated slave: a sparse register map behind one address.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
pub struct SimSlave {
    pub slave_id: u8,
    registers: std::collections::BTreeMap<u16, u16>,
    silent: std::collections::BTreeSet<u16>,
    requests: u32,
}

pub struct ModbusRtu {
    timeout: Duration,
    #[cfg(target_os = "espidf")]
    uart: UartDriver<'static>,
    #[cfg(not(target_os = "espidf"))]
    slave: SimSlave,
}

impl ModbusRtu {
    #[cfg(target_os = "espidf")]
    pub fn new(uart: UartDriver<'static>) -> Self {
        Self {
            timeout: RESPONSE_TIMEOUT,
            uart,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new(slave_id: u8) -> Self {
        Self {
            timeout: RESPONSE_TIMEOUT,
            slave: SimSlave {
                slave_id,
                ..Default::default()
            },
        }
    }

    /// Override how long a transaction waits for the response frame.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    // ── Platform-specific ─────────────────────────────────────

    /// Send `request` and collect up to `expected` response bytes.
    #[cfg(target_os = "espidf")]
    fn transact(&mut self, request: &[u8], response: &mut [u8], expected: usize) -> Result<usize, BusError> {
        self.uart.clear_rx().map_err(|_| BusError::Io)?;
        self.uart.write(request).map_err(|e| {
            warn!("Modbus: UART write failed: {}", e);
            BusError::Io
        })?;

        let deadline = crate::time::Deadline::after(self.timeout);
        let mut got = 0;
        while got < expected && !deadline.expired() {
            let ticks = TickType::from(deadline.remaining()).ticks();
            match self.uart.read(&mut response[got..expected], ticks) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) => {
                    warn!("Modbus: UART read failed: {}", e);
                    return Err(BusError::Io);
                }
            }
            // An exception frame is complete at five bytes.
            if got >= EXCEPTION_LEN && response[1] & EXCEPTION_BIAS != 0 {
                break;
            }
        }
        Ok(got)
    }

    /// A silent slave costs the full response timeout, as on the wire.
    #[cfg(not(target_os = "espidf"))]
    fn transact(&mut self, request: &[u8], response: &mut [u8], _expected: usize) -> Result<usize, BusError> {
        let got = self.slave.answer(request, response);
        if got == 0 {
            std::thread::sleep(self.timeout);
        }
        Ok(got)
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation hooks
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl ModbusRtu {
    pub fn set_register(&mut self, address: u16, value: u16) {
        self.slave.registers.insert(address, value);
    }

    /// Load consecutive registers starting at `address`.
    pub fn load(&mut self, address: u16, values: &[u16]) {
        for (addr, &v) in (address..).zip(values) {
            self.set_register(addr, v);
        }
    }

    /// Requests touching `address` get no answer.
    pub fn set_silent(&mut self, address: u16, silent: bool) {
        if silent {
            self.slave.silent.insert(address);
        } else {
            self.slave.silent.remove(&address);
        }
    }

    /// Requests the simulated slave has seen.
    pub fn requests(&self) -> u32 {
        self.slave.requests
    }
}

#[cfg(not(target_os = "espidf"))]
impl SimSlave {
    /// Illegal data address.
    const EXC_ILLEGAL_ADDRESS: u8 = 0x02;

    fn answer(&mut self, request: &[u8], response: &mut [u8]) -> usize {
        self.requests += 1;
        if request.len() != REQUEST_LEN || !crc_ok(request) || request[0] != self.slave_id {
            return 0;
        }
        let address = u16::from_be_bytes([request[2], request[3]]);
        let count = u16::from_be_bytes([request[4], request[5]]);
        let span = address..address.saturating_add(count);
        if span.clone().any(|a| self.silent.contains(&a)) {
            return 0;
        }

        response[0] = self.slave_id;
        let words: Option<Vec<u16>> = span.map(|a| self.registers.get(&a).copied()).collect();
        match words {
            Some(words) => {
                response[1] = FN_READ_INPUT_REGISTERS;
                response[2] = (words.len() * 2) as u8;
                for (i, w) in words.iter().enumerate() {
                    response[HEADER_LEN + i * 2..HEADER_LEN + i * 2 + 2].copy_from_slice(&w.to_be_bytes());
                }
                append_crc(response, HEADER_LEN + words.len() * 2)
            }
            None => {
                response[1] = FN_READ_INPUT_REGISTERS | EXCEPTION_BIAS;
                response[2] = Self::EXC_ILLEGAL_ADDRESS;
                append_crc(response, HEADER_LEN)
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// BusPort
// ───────────────────────────────────────────────────────────────

impl BusPort for ModbusRtu {
    fn read(&mut self, slave_id: u8, address: u16, out: &mut [u16]) -> Result<usize, BusError> {
        if out.is_empty() {
            return Ok(0);
        }
        if out.len() > MAX_REGISTERS {
            return Err(BusError::Malformed);
        }
        let request = encode_read_request(slave_id, address, out.len() as u16);
        let mut response = [0u8; MAX_FRAME];
        let expected = response_len(out.len());
        let got = self.transact(&request, &mut response, expected)?;
        debug!("Modbus: 0x{:04X}×{} → {} bytes", address, out.len(), got);
        decode_read_response(&response[..got], slave_id, out).inspect_err(|e| {
            warn!("Modbus: slave {} @0x{:04X}: {}", slave_id, address, e);
        })
    }
}
