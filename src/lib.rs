//! ELCON Charger Control over CAN
//!
//! This crate drives an ELCON-protocol EV battery charger over a CAN bus. A
//! single shared link to the CAN adapter is used by two long-lived loops: one
//! transmits the charge command every second, the other receives and decodes
//! the charger's status frames. A connection controller, driven from the UI
//! thread, opens and closes the link while both loops are running.
//!
//! # Features
//!
//! - ELCON command/telemetry codec (big-endian deci-volt/deci-amp fields)
//! - Lock-guarded link with open/close semantics safe against in-flight I/O
//! - Periodic transmitter and filtering receiver on dedicated threads
//! - Connect/disconnect/charge state machine with UI affordance model
//! - GS-USB (candleLight, CANable) adapter driver and an in-memory virtual bus
//!
//! # Example
//!
//! ```no_run
//! use elcon_can::{Charger, ChargerConfig, ChargerEvent, GsUsbDriver, SharedSetpoints};
//! use std::sync::Arc;
//!
//! fn main() -> elcon_can::Result<()> {
//!     let driver = GsUsbDriver::new()?;
//!     let setpoints = Arc::new(SharedSetpoints::new(400.0, 10.0));
//!     let (mut charger, events) = Charger::start(driver, ChargerConfig::default(), setpoints)?;
//!
//!     // Device 0 at 500 kbps (baud index 1)
//!     charger.controller().refresh_devices();
//!     charger.controller().connect(0, 1)?;
//!     charger.controller().start_charging()?;
//!
//!     for event in events.iter().take(10) {
//!         if let ChargerEvent::Telemetry(t) = event {
//!             println!("{:.1} V  {:.1} A", t.voltage, t.current);
//!         }
//!     }
//!
//!     charger.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Protocol
//!
//! | Direction | Identifier | Payload |
//! | --- | --- | --- |
//! | host -> charger | `0x1806E5F4` | `V_hi V_lo I_hi I_lo control` (control 0 = charge, 1 = disabled) |
//! | charger -> host | `0x18FF50E5` | `V_hi V_lo I_hi I_lo ...` |

pub mod baud;
pub mod charger;
pub mod codec;
pub mod config;
pub mod constants;
pub mod controller;
pub mod driver;
pub mod error;
pub mod event;
pub mod frame;
pub mod gs_usb;
pub mod link;
pub mod receiver;
pub mod shutdown;
pub mod transmitter;
pub mod virtual_bus;

// Re-export main types at crate root
pub use constants::{
    // Protocol identifiers
    ELCON_COMMAND_ID,
    ELCON_TELEMETRY_ID,
    // Payloads
    COMMAND_LEN,
    DISABLED_PAYLOAD,
    TELEMETRY_MIN_LEN,
    // CAN ID flags
    CAN_EFF_FLAG,
    CAN_EFF_MASK,
    CAN_RTR_FLAG,
    CAN_SFF_MASK,
};

pub use baud::{resolve_baud, BaudRate};
pub use charger::Charger;
pub use codec::{decode_telemetry, encode_command, ChargeCommand, Telemetry};
pub use config::ChargerConfig;
pub use controller::{Affordances, ConnectionController, ConnectionState};
pub use driver::CanDriver;
pub use error::{LinkError, Result};
pub use event::{ChargerEvent, EventPublisher};
pub use frame::CanFrame;
pub use gs_usb::GsUsbDriver;
pub use link::{CanLink, LinkState};
pub use receiver::{PollOutcome, ReceiverLoop};
pub use shutdown::ShutdownToken;
pub use transmitter::{
    ChargeControl, SetpointSource, Setpoints, SharedSetpoints, TickOutcome, TransmitterLoop,
};
pub use virtual_bus::{VirtualBus, VirtualDriver};
