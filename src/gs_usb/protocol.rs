//! GS-USB wire structures
//!
//! Control request payloads and the 20-byte classic host frame exchanged with
//! GS-USB compatible adapters (candleLight, CANable and friends). All fields
//! are little-endian.

use crate::constants::CAN_MAX_DLEN;
use crate::frame::CanFrame;

// ============================================================================
// Control Requests
// ============================================================================

/// Set host byte order (legacy)
pub const GS_USB_BREQ_HOST_FORMAT: u8 = 0;
/// Set bit timing
pub const GS_USB_BREQ_BITTIMING: u8 = 1;
/// Set/start mode
pub const GS_USB_BREQ_MODE: u8 = 2;
/// Get bit timing constants
pub const GS_USB_BREQ_BT_CONST: u8 = 4;

/// Reset/stop mode
pub const GS_CAN_MODE_RESET: u32 = 0;
/// Start mode
pub const GS_CAN_MODE_START: u32 = 1;
/// Normal operation flags
pub const GS_CAN_MODE_NORMAL: u32 = 0;

/// bmRequestType: vendor, host-to-device
pub const REQUEST_TYPE_OUT: u8 = 0x41;
/// bmRequestType: vendor, device-to-host
pub const REQUEST_TYPE_IN: u8 = 0xC1;

/// Bulk OUT endpoint (host to device)
pub const GS_USB_ENDPOINT_OUT: u8 = 0x02;
/// Bulk IN endpoint (device to host)
pub const GS_USB_ENDPOINT_IN: u8 = 0x81;

/// Length of the BT_CONST response
pub const BT_CONST_LEN: usize = 40;

// ============================================================================
// Host Frames
// ============================================================================

/// Echo ID for transmitted frames
pub const GS_USB_ECHO_ID: u32 = 0;
/// Echo ID value for received frames (from CAN bus)
pub const GS_USB_RX_ECHO_ID: u32 = 0xFFFF_FFFF;

/// Header: echo_id (4) + can_id (4) + can_dlc (1) + channel (1) + flags (1) + reserved (1)
pub const HOST_FRAME_HEADER_LEN: usize = 12;
/// Classic CAN host frame size (without timestamp)
pub const HOST_FRAME_SIZE: usize = HOST_FRAME_HEADER_LEN + CAN_MAX_DLEN;
/// Classic CAN host frame size (with hardware timestamp)
pub const HOST_FRAME_SIZE_HW_TIMESTAMP: usize = HOST_FRAME_SIZE + 4;

// ============================================================================
// Known Adapters
// ============================================================================

const KNOWN_ADAPTERS: [(u16, u16, &str); 4] = [
    (0x1D50, 0x606F, "GS-USB"),
    (0x1209, 0x2323, "candleLight"),
    (0x1CD2, 0x606F, "CES CANext FD"),
    (0x16D0, 0x10B8, "ABE CANdebugger FD"),
];

/// Product name of a GS-USB compatible adapter
pub fn adapter_name(vendor_id: u16, product_id: u16) -> Option<&'static str> {
    KNOWN_ADAPTERS
        .iter()
        .find(|(vid, pid, _)| *vid == vendor_id && *pid == product_id)
        .map(|(_, _, name)| *name)
}

/// Device mode request payload
#[derive(Debug, Clone, Copy)]
pub struct DeviceMode {
    /// Mode value (0 = reset/stop, 1 = start)
    pub mode: u32,
    /// Mode flags
    pub flags: u32,
}

impl DeviceMode {
    /// Start the channel in normal mode
    pub fn start() -> Self {
        Self {
            mode: GS_CAN_MODE_START,
            flags: GS_CAN_MODE_NORMAL,
        }
    }

    /// Stop the channel
    pub fn reset() -> Self {
        Self {
            mode: GS_CAN_MODE_RESET,
            flags: 0,
        }
    }

    /// Serialize to the control request payload
    pub fn pack(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&self.mode.to_le_bytes());
        buf[4..8].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }
}

/// Nominal bit timing request payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceBitTiming {
    pub prop_seg: u32,
    pub phase_seg1: u32,
    pub phase_seg2: u32,
    pub sjw: u32,
    pub brp: u32,
}

impl DeviceBitTiming {
    /// Create a bit timing from its segments
    pub fn new(prop_seg: u32, phase_seg1: u32, phase_seg2: u32, sjw: u32, brp: u32) -> Self {
        Self {
            prop_seg,
            phase_seg1,
            phase_seg2,
            sjw,
            brp,
        }
    }

    /// Serialize to the control request payload
    pub fn pack(&self) -> [u8; 20] {
        let mut buf = [0u8; 20];
        buf[0..4].copy_from_slice(&self.prop_seg.to_le_bytes());
        buf[4..8].copy_from_slice(&self.phase_seg1.to_le_bytes());
        buf[8..12].copy_from_slice(&self.phase_seg2.to_le_bytes());
        buf[12..16].copy_from_slice(&self.sjw.to_le_bytes());
        buf[16..20].copy_from_slice(&self.brp.to_le_bytes());
        buf
    }

    /// Timing for `bitrate` at an 87.5% sample point on a `clock_hz` CAN clock
    pub fn for_bitrate(clock_hz: u32, bitrate: u32) -> Option<Self> {
        // (phase_seg1, phase_seg2, brp) with prop_seg = sjw = 1
        let (seg1, seg2, brp) = match (clock_hz, bitrate) {
            (48_000_000, 125_000) => (12, 2, 24),
            (48_000_000, 250_000) => (12, 2, 12),
            (48_000_000, 500_000) => (12, 2, 6),
            (48_000_000, 1_000_000) => (12, 2, 3),

            (80_000_000, 125_000) => (12, 2, 40),
            (80_000_000, 250_000) => (12, 2, 20),
            (80_000_000, 500_000) => (12, 2, 10),
            (80_000_000, 1_000_000) => (12, 2, 5),

            (40_000_000, 125_000) => (12, 2, 20),
            (40_000_000, 250_000) => (12, 2, 10),
            (40_000_000, 500_000) => (12, 2, 5),
            (40_000_000, 1_000_000) => (5, 1, 5),

            _ => return None,
        };
        Some(Self::new(1, seg1, seg2, 1, brp))
    }
}

/// Subset of the BT_CONST response used by the driver
#[derive(Debug, Clone, Copy)]
pub struct DeviceCapability {
    /// Feature bitfield
    pub feature: u32,
    /// CAN clock frequency in Hz
    pub fclk_can: u32,
}

impl DeviceCapability {
    /// Unpack from a BT_CONST response; `None` if it is too short
    pub fn unpack(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        Some(Self {
            feature: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            fclk_can: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        })
    }
}

/// Pack a frame for transmission on channel 0
pub fn pack_host_frame(frame: &CanFrame) -> [u8; HOST_FRAME_SIZE] {
    let mut buf = [0u8; HOST_FRAME_SIZE];
    buf[0..4].copy_from_slice(&GS_USB_ECHO_ID.to_le_bytes());
    buf[4..8].copy_from_slice(&frame.raw_id().to_le_bytes());
    buf[8] = frame.dlc();
    // channel, flags and reserved stay zero
    buf[12..12 + frame.data().len()].copy_from_slice(frame.data());
    buf
}

/// A host frame read from the adapter
#[derive(Debug, Clone, Copy)]
pub struct HostFrame {
    pub echo_id: u32,
    pub frame: CanFrame,
}

impl HostFrame {
    /// Check if this is an echo frame (TX confirmation from device)
    pub fn is_echo(&self) -> bool {
        self.echo_id != GS_USB_RX_ECHO_ID
    }

    /// Unpack a received host frame; `None` if shorter than a classic frame
    pub fn unpack(data: &[u8]) -> Option<Self> {
        if data.len() < HOST_FRAME_SIZE {
            return None;
        }

        let echo_id = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let raw_id = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let len = (data[8] as usize).min(CAN_MAX_DLEN);
        let payload = &data[HOST_FRAME_HEADER_LEN..HOST_FRAME_HEADER_LEN + len];

        Some(Self {
            echo_id,
            frame: CanFrame::from_raw_id(raw_id, payload),
        })
    }
}
