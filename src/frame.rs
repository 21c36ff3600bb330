//! Classic CAN frame
//!
//! This module provides the `CanFrame` struct exchanged between the link and
//! the adapter driver. Frames are immutable once constructed.

use crate::constants::{CAN_EFF_FLAG, CAN_EFF_MASK, CAN_MAX_DLEN, CAN_RTR_FLAG, CAN_SFF_MASK};

/// Classic CAN frame (up to 8 data bytes)
///
/// The identifier is stored without flags; `extended` selects the 29-bit
/// format.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    extended: bool,
    remote: bool,
    dlc: u8,
    data: [u8; CAN_MAX_DLEN],
}

impl CanFrame {
    /// Create an extended (29-bit) data frame
    ///
    /// Data beyond 8 bytes is dropped and the identifier is masked to 29 bits.
    pub fn extended(id: u32, data: &[u8]) -> Self {
        Self::build(id & CAN_EFF_MASK, true, data)
    }

    /// Create a standard (11-bit) data frame
    pub fn standard(id: u16, data: &[u8]) -> Self {
        Self::build(u32::from(id) & CAN_SFF_MASK, false, data)
    }

    fn build(id: u32, extended: bool, data: &[u8]) -> Self {
        let len = data.len().min(CAN_MAX_DLEN);
        let mut buf = [0u8; CAN_MAX_DLEN];
        buf[..len].copy_from_slice(&data[..len]);
        Self {
            id,
            extended,
            remote: false,
            dlc: len as u8,
            data: buf,
        }
    }

    /// Create a frame from a raw SocketCAN-style identifier (flags included)
    pub fn from_raw_id(raw_id: u32, data: &[u8]) -> Self {
        let mut frame = if raw_id & CAN_EFF_FLAG != 0 {
            Self::extended(raw_id, data)
        } else {
            Self::build(raw_id & CAN_SFF_MASK, false, data)
        };
        frame.remote = raw_id & CAN_RTR_FLAG != 0;
        frame
    }

    /// Get the arbitration ID (without flags)
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Get the identifier with the SocketCAN-style format flags applied
    pub fn raw_id(&self) -> u32 {
        let mut raw = self.id;
        if self.extended {
            raw |= CAN_EFF_FLAG;
        }
        if self.remote {
            raw |= CAN_RTR_FLAG;
        }
        raw
    }

    /// Check if this is an extended ID frame (29-bit)
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Check if this is a remote transmission request
    pub fn is_remote(&self) -> bool {
        self.remote
    }

    /// Data length code (0-8)
    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    /// Get frame data as a slice
    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }
}

impl std::fmt::Display for CanFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data_str = if self.remote {
            "remote request".to_string()
        } else {
            self.data()
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(" ")
        };

        if self.extended {
            write!(f, "{:08X}   [{}]  {}", self.id, self.dlc, data_str)
        } else {
            write!(f, "{:>8X}   [{}]  {}", self.id, self.dlc, data_str)
        }
    }
}

impl std::fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanFrame")
            .field("id", &format_args!("0x{:08X}", self.id))
            .field("extended", &self.extended)
            .field("remote", &self.remote)
            .field("dlc", &self.dlc)
            .field("data", &self.data())
            .finish()
    }
}
