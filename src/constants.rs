//! ELCON protocol and CAN constants
//!
//! This module contains the fixed CAN identifiers used by ELCON chargers,
//! the CAN identifier flags/masks, payload sizes and the timing defaults
//! used by the transmit and receive loops.

use std::time::Duration;

// ============================================================================
// ELCON CAN Identifiers (29-bit extended)
// ============================================================================

/// Identifier of the charge command frame (host -> charger)
pub const ELCON_COMMAND_ID: u32 = 0x1806_E5F4;
/// Identifier of the status/telemetry frame (charger -> host)
pub const ELCON_TELEMETRY_ID: u32 = 0x18FF_50E5;

// ============================================================================
// ELCON Payload Layout
// ============================================================================

/// Command frame payload length
pub const COMMAND_LEN: usize = 5;
/// Minimum telemetry payload length (voltage + current)
pub const TELEMETRY_MIN_LEN: usize = 4;

/// Control byte value requesting the charger to charge
pub const CONTROL_CHARGE: u8 = 0;
/// Control byte value requesting the charger to stop/stay idle
pub const CONTROL_DISABLED: u8 = 1;

/// Payload sent every period while connected but not charging
pub const DISABLED_PAYLOAD: [u8; COMMAND_LEN] = [0, 0, 0, 0, CONTROL_DISABLED];

/// Scale between physical units and the transmitted deci-units
pub const DECI_SCALE: f64 = 10.0;

// ============================================================================
// CAN ID Flags and Masks
// ============================================================================

/// Extended frame format flag (29-bit ID)
pub const CAN_EFF_FLAG: u32 = 0x8000_0000;
/// Remote transmission request flag
pub const CAN_RTR_FLAG: u32 = 0x4000_0000;

/// Standard frame format mask (11-bit ID)
pub const CAN_SFF_MASK: u32 = 0x0000_07FF;
/// Extended frame format mask (29-bit ID)
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;

/// Maximum data length for classic CAN
pub const CAN_MAX_DLEN: usize = 8;

// ============================================================================
// Loop Timing Defaults
// ============================================================================

/// Period of the charge command transmission
pub const DEFAULT_TRANSMIT_PERIOD: Duration = Duration::from_secs(1);
/// Upper bound of a single blocking read against the adapter
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);
/// How long the receiver waits for the link to open before re-checking shutdown
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(100);
/// Capacity of the event channel towards the display
pub const DEFAULT_EVENT_CAPACITY: usize = 64;
/// Consecutive read failures before they are reported as persistent
pub const DEFAULT_READ_FAILURE_WARN_THRESHOLD: u32 = 10;

// ============================================================================
// Affordance Labels
// ============================================================================

/// Connect button label while disconnected
pub const LABEL_CONNECT: &str = "Connect";
/// Connect button label while connected
pub const LABEL_DISCONNECT: &str = "Disconnect";
/// Charge button label while not charging (default state)
pub const LABEL_START_CHARGING: &str = "Start Charging";
/// Charge button label while charging
pub const LABEL_STOP_CHARGING: &str = "Stop Charging";
