//! ELCON frame codec
//!
//! Pure conversions between physical units and the ELCON CAN payloads.
//! Both directions use big-endian 16-bit fields in deci-units (value x 10).

use crate::constants::{
    COMMAND_LEN, CONTROL_CHARGE, CONTROL_DISABLED, DECI_SCALE, ELCON_COMMAND_ID,
    ELCON_TELEMETRY_ID, TELEMETRY_MIN_LEN,
};
use crate::error::{LinkError, Result};
use crate::frame::CanFrame;

/// Convert a physical value to the 16-bit deci-unit wire field
///
/// Truncates toward zero; negative and NaN inputs become 0 and anything above
/// 6553.5 wraps to the low 16 bits, matching the hardware field width.
pub fn to_deci(value: f64) -> u16 {
    // f64 -> u32 saturates, the u32 -> u16 step keeps the low 16 bits
    (value * DECI_SCALE) as u32 as u16
}

/// Convert a deci-unit wire field back to physical units
pub fn from_deci(raw: u16) -> f64 {
    f64::from(raw) / DECI_SCALE
}

/// Charge command sent to the charger every transmit period
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChargeCommand {
    /// Target voltage in volts
    pub voltage: f64,
    /// Requested current in amps
    pub current: f64,
    /// Whether charging is requested
    pub enabled: bool,
}

impl ChargeCommand {
    /// Command requesting charge at the given setpoints
    pub fn charge(voltage: f64, current: f64) -> Self {
        Self {
            voltage,
            current,
            enabled: true,
        }
    }

    /// Command keeping the charger idle
    pub fn disabled() -> Self {
        Self {
            voltage: 0.0,
            current: 0.0,
            enabled: false,
        }
    }

    /// Encode into the 5-byte command payload
    pub fn encode(&self) -> [u8; COMMAND_LEN] {
        encode_command(self.voltage, self.current, self.enabled)
    }

    /// Build the extended CAN frame carrying this command
    pub fn to_frame(&self) -> CanFrame {
        CanFrame::extended(ELCON_COMMAND_ID, &self.encode())
    }
}

/// Encode a charge command payload
///
/// Layout: `[V_hi, V_lo, I_hi, I_lo, control]` where control is 0 to charge
/// and 1 to stay disabled.
pub fn encode_command(voltage: f64, current: f64, enabled: bool) -> [u8; COMMAND_LEN] {
    let v = to_deci(voltage).to_be_bytes();
    let i = to_deci(current).to_be_bytes();
    let control = if enabled {
        CONTROL_CHARGE
    } else {
        CONTROL_DISABLED
    };
    [v[0], v[1], i[0], i[1], control]
}

/// Charger-reported output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    /// Actual output voltage in volts
    pub voltage: f64,
    /// Actual output current in amps
    pub current: f64,
}

impl Telemetry {
    /// Decode from a received frame
    ///
    /// Returns `Ok(None)` for frames that are not ELCON telemetry.
    pub fn from_frame(frame: &CanFrame) -> Result<Option<Self>> {
        if !frame.is_extended() || frame.is_remote() || frame.id() != ELCON_TELEMETRY_ID {
            return Ok(None);
        }
        decode_telemetry(frame.data()).map(Some)
    }
}

/// Decode a telemetry payload `[V_hi, V_lo, I_hi, I_lo, ...]`
pub fn decode_telemetry(data: &[u8]) -> Result<Telemetry> {
    if data.len() < TELEMETRY_MIN_LEN {
        return Err(LinkError::MalformedFrame {
            expected: TELEMETRY_MIN_LEN,
            actual: data.len(),
        });
    }

    Ok(Telemetry {
        voltage: from_deci(u16::from_be_bytes([data[0], data[1]])),
        current: from_deci(u16::from_be_bytes([data[2], data[3]])),
    })
}
