//! GPIO / peripheral assignments for the SolarNode board.
//!
//! Single source of truth: the binary builds its peripherals from these
//! numbers rather than hard-coding them.

// ---------------------------------------------------------------------------
// Field bus (RS-485 transceiver to the charge controller's RJ45 port)
// ---------------------------------------------------------------------------

/// UART TX → transceiver DI.
pub const BUS_TX_GPIO: i32 = 17;
/// UART RX ← transceiver RO.
pub const BUS_RX_GPIO: i32 = 18;
/// The controller's fixed serial speed, 8N1.
pub const BUS_BAUD: u32 = 115_200;
