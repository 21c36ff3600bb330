//! Connection state machine driven by user intents
//!
//! The controller runs on the UI-event context and is the only writer of the
//! link state and of the charge enable flag.
//!
//! ```text
//! Disconnected --connect(device, baud)--> Connected
//! Connected    --disconnect()-----------> Disconnected   (charging forced off)
//! Connected    --select_device/baud-----> Disconnected   (implicit disconnect)
//! Connected    --start/stop_charging----> Connected
//! ```

use std::sync::Arc;

use log::{debug, info, warn};

use crate::baud::BaudRate;
use crate::constants::{LABEL_CONNECT, LABEL_DISCONNECT, LABEL_START_CHARGING, LABEL_STOP_CHARGING};
use crate::error::{LinkError, Result};
use crate::link::CanLink;
use crate::transmitter::ChargeControl;

/// Connection state as seen by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// How the UI should present its controls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Affordances {
    /// Text of the connect/disconnect toggle
    pub connect_label: &'static str,
    /// Text of the start/stop charging toggle
    pub charge_label: &'static str,
    /// Whether the charge toggle can be used
    pub charge_available: bool,
}

/// State machine over the shared link
pub struct ConnectionController {
    link: Arc<CanLink>,
    control: Arc<ChargeControl>,
    state: ConnectionState,
    device_index: usize,
    baud: BaudRate,
    devices: Vec<String>,
}

impl ConnectionController {
    /// Create a disconnected controller using the link's current baud rate
    pub fn new(link: Arc<CanLink>, control: Arc<ChargeControl>) -> Self {
        let baud = link.baud_rate();
        Self {
            link,
            control,
            state: ConnectionState::Disconnected,
            device_index: 0,
            baud,
            devices: Vec::new(),
        }
    }

    /// Open `device_index` at the rate selected by `baud_index`
    ///
    /// Unknown baud indices fall back to 500 kbps. Connecting while connected
    /// to another device or rate disconnects first; the same selection is a
    /// no-op. On failure the controller stays disconnected and the error is
    /// returned for display.
    pub fn connect(&mut self, device_index: usize, baud_index: usize) -> Result<()> {
        let baud = BaudRate::from_index(baud_index).unwrap_or_default();

        if self.state == ConnectionState::Connected {
            if device_index == self.device_index && baud == self.baud {
                return Ok(());
            }
            if let Err(e) = self.disconnect() {
                warn!("Close before reconnect failed: {}", e);
            }
        }

        self.device_index = device_index;
        self.baud = baud;
        self.control.set_enabled(false);

        if let Err(e) = self.link.open(device_index, self.baud) {
            warn!("Connect to device {} failed: {}", device_index, e);
            return Err(e);
        }

        self.state = ConnectionState::Connected;
        info!("Connected to device {} at {}", device_index, self.baud);
        Ok(())
    }

    /// Close the link and stop charging
    ///
    /// Always ends `Disconnected`; a close failure is returned as a warning.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Disconnected {
            return Ok(());
        }

        // Charging must be off before the transmitter can see a closed link
        self.control.set_enabled(false);
        self.state = ConnectionState::Disconnected;

        let result = self.link.close();
        match &result {
            Ok(()) => info!("Disconnected"),
            Err(e) => warn!("Disconnected with close error: {}", e),
        }
        result
    }

    /// Connect with the stored selection, or disconnect
    pub fn toggle_connection(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Connected => self.disconnect(),
            ConnectionState::Disconnected => self.connect(self.device_index, self.baud.index()),
        }
    }

    /// Request charging; only allowed while connected
    pub fn start_charging(&mut self) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(LinkError::NotOpen);
        }
        self.control.set_enabled(true);
        info!("Charging started");
        Ok(())
    }

    /// Stop charging
    pub fn stop_charging(&mut self) {
        if self.control.is_enabled() {
            info!("Charging stopped");
        }
        self.control.set_enabled(false);
    }

    /// Start or stop charging
    pub fn toggle_charging(&mut self) -> Result<()> {
        if self.is_charging() {
            self.stop_charging();
            Ok(())
        } else {
            self.start_charging()
        }
    }

    /// Select the baud rate for the next connection
    ///
    /// Selecting a different rate while connected disconnects first.
    pub fn select_baud(&mut self, baud_index: usize) -> Result<()> {
        let baud = BaudRate::from_index(baud_index).unwrap_or_default();
        if baud == self.baud {
            return Ok(());
        }

        let result = self.disconnect();
        self.baud = baud;
        self.link.set_baud_rate(baud);
        debug!("Baud rate selection: {}", baud);
        result
    }

    /// Select the device for the next connection
    ///
    /// Selecting a different device while connected disconnects first.
    pub fn select_device(&mut self, device_index: usize) -> Result<()> {
        if device_index == self.device_index {
            return Ok(());
        }

        let result = self.disconnect();
        self.device_index = device_index;
        debug!("Device selection: {}", device_index);
        result
    }

    /// Add newly enumerated adapters to the device list
    ///
    /// Names already listed are not repeated and nothing is ever removed, so
    /// indices stay stable for the selection.
    pub fn refresh_devices(&mut self) -> &[String] {
        match self.link.list_devices() {
            Ok(found) => {
                for name in found {
                    if !self.devices.contains(&name) {
                        debug!("Found CAN device: {}", name);
                        self.devices.push(name);
                    }
                }
            }
            Err(e) => warn!("Device enumeration failed: {}", e),
        }
        &self.devices
    }

    /// Adapters found so far
    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Check if charging is requested
    pub fn is_charging(&self) -> bool {
        self.control.is_enabled()
    }

    /// Device used by the next connect
    pub fn selected_device(&self) -> usize {
        self.device_index
    }

    /// Baud rate used by the next connect
    pub fn selected_baud(&self) -> BaudRate {
        self.baud
    }

    /// Labels and availability of the UI controls
    pub fn affordances(&self) -> Affordances {
        let connected = self.is_connected();
        Affordances {
            connect_label: if connected {
                LABEL_DISCONNECT
            } else {
                LABEL_CONNECT
            },
            charge_label: if connected && self.is_charging() {
                LABEL_STOP_CHARGING
            } else {
                LABEL_START_CHARGING
            },
            charge_available: connected,
        }
    }
}

impl std::fmt::Debug for ConnectionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionController")
            .field("state", &self.state)
            .field("device_index", &self.device_index)
            .field("baud", &self.baud)
            .field("charging", &self.is_charging())
            .field("devices", &self.devices)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DISABLED_PAYLOAD;
    use crate::shutdown::ShutdownToken;
    use crate::transmitter::{SetpointSource, SharedSetpoints, TransmitterLoop};
    use crate::virtual_bus::{VirtualBus, VirtualDriver};
    use std::time::Duration;

    fn setup() -> (ConnectionController, Arc<CanLink>, VirtualBus, Arc<ChargeControl>) {
        let (driver, bus) = VirtualDriver::new(["vcan0", "vcan1"]);
        let link = Arc::new(CanLink::new(
            driver,
            BaudRate::Kbps500,
            Duration::from_millis(5),
            ShutdownToken::new(),
        ));
        let control = Arc::new(ChargeControl::new());
        let controller = ConnectionController::new(Arc::clone(&link), Arc::clone(&control));
        (controller, link, bus, control)
    }

    #[test]
    fn test_connect_and_disconnect() {
        let (mut ctl, link, bus, _) = setup();
        assert_eq!(ctl.affordances().connect_label, LABEL_CONNECT);
        assert!(!ctl.affordances().charge_available);

        ctl.connect(1, 2).unwrap();
        assert!(ctl.is_connected());
        assert!(link.is_open());
        assert_eq!(bus.open_device(), Some(1));
        assert_eq!(bus.bitrate(), 250_000);
        assert_eq!(ctl.affordances().connect_label, LABEL_DISCONNECT);
        assert!(ctl.affordances().charge_available);

        ctl.disconnect().unwrap();
        assert_eq!(ctl.state(), ConnectionState::Disconnected);
        assert!(!link.is_open());
    }

    #[test]
    fn test_connect_failure_stays_disconnected() {
        let (mut ctl, link, bus, _) = setup();
        bus.fail_next_open("busy");

        let err = ctl.connect(0, 1).unwrap_err();
        assert!(matches!(err, LinkError::DeviceOpenFailed { .. }));
        assert_eq!(ctl.state(), ConnectionState::Disconnected);
        assert!(!link.is_open());
        assert!(ctl.start_charging().is_err());
    }

    #[test]
    fn test_connect_with_new_selection_reopens() {
        let (mut ctl, link, bus, control) = setup();
        ctl.connect(0, 1).unwrap();
        ctl.start_charging().unwrap();

        // same selection leaves the open device alone
        ctl.connect(0, 1).unwrap();
        assert_eq!(bus.open_count(), 1);
        assert!(control.is_enabled());

        ctl.connect(1, 0).unwrap();
        assert!(link.is_open());
        assert_eq!(bus.open_device(), Some(1));
        assert_eq!(bus.bitrate(), 1_000_000);
        assert_eq!(bus.close_count(), 1);
        assert_eq!(ctl.selected_device(), 1);
        assert_eq!(ctl.selected_baud(), BaudRate::Mbps1);
        assert!(!control.is_enabled());
    }

    #[test]
    fn test_unknown_baud_index_uses_default() {
        let (mut ctl, _, bus, _) = setup();
        ctl.connect(0, 9).unwrap();
        assert_eq!(bus.bitrate(), 500_000);
        assert_eq!(ctl.selected_baud(), BaudRate::Kbps500);
    }

    #[test]
    fn test_charging_requires_connection() {
        let (mut ctl, _, _, control) = setup();

        assert!(matches!(ctl.start_charging(), Err(LinkError::NotOpen)));
        assert!(ctl.toggle_charging().is_err());
        assert!(!control.is_enabled());
        assert_eq!(ctl.affordances().charge_label, LABEL_START_CHARGING);
    }

    #[test]
    fn test_charge_toggle() {
        let (mut ctl, _, _, control) = setup();
        ctl.connect(0, 1).unwrap();

        ctl.toggle_charging().unwrap();
        assert!(control.is_enabled());
        assert_eq!(ctl.affordances().charge_label, LABEL_STOP_CHARGING);

        ctl.toggle_charging().unwrap();
        assert!(!control.is_enabled());
        assert_eq!(ctl.affordances().charge_label, LABEL_START_CHARGING);
    }

    #[test]
    fn test_disconnect_forces_charging_off() {
        let (mut ctl, link, bus, control) = setup();
        let setpoints: Arc<dyn SetpointSource> = Arc::new(SharedSetpoints::new(400.0, 10.0));
        let tx = TransmitterLoop::new(
            Arc::clone(&link),
            Arc::clone(&control),
            setpoints,
            Duration::from_millis(10),
        );

        ctl.connect(0, 1).unwrap();
        ctl.start_charging().unwrap();
        ctl.disconnect().unwrap();

        assert!(!control.is_enabled());
        assert_eq!(ctl.affordances().charge_label, LABEL_START_CHARGING);
        assert!(!ctl.affordances().charge_available);

        // after reconnecting, ticks send the disabled payload until restarted
        ctl.connect(0, 1).unwrap();
        bus.clear_sent();
        tx.tick();
        tx.tick();
        let sent = bus.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|f| f.data() == DISABLED_PAYLOAD));
    }

    #[test]
    fn test_close_failure_still_disconnects() {
        let (mut ctl, link, bus, _) = setup();
        ctl.connect(0, 1).unwrap();
        bus.fail_next_close("usb error");

        assert!(matches!(ctl.disconnect(), Err(LinkError::DeviceCloseFailed(_))));
        assert_eq!(ctl.state(), ConnectionState::Disconnected);
        assert!(!link.is_open());
    }

    #[test]
    fn test_baud_change_while_connected_disconnects() {
        let (mut ctl, link, bus, control) = setup();
        ctl.connect(0, 1).unwrap();
        ctl.start_charging().unwrap();

        ctl.select_baud(0).unwrap();
        assert!(!ctl.is_connected());
        assert!(!link.is_open());
        assert!(!control.is_enabled());

        ctl.toggle_connection().unwrap();
        assert_eq!(bus.bitrate(), 1_000_000);
    }

    #[test]
    fn test_device_change_while_connected_disconnects() {
        let (mut ctl, _, bus, _) = setup();
        ctl.connect(0, 1).unwrap();

        ctl.select_device(1).unwrap();
        assert!(!ctl.is_connected());

        ctl.toggle_connection().unwrap();
        assert_eq!(bus.open_device(), Some(1));
    }

    #[test]
    fn test_selection_while_disconnected_only_stores() {
        let (mut ctl, link, bus, _) = setup();

        ctl.select_device(1).unwrap();
        ctl.select_baud(3).unwrap();
        assert!(!link.is_open());
        assert_eq!(bus.open_count(), 0);
        assert_eq!(ctl.selected_device(), 1);
        assert_eq!(ctl.selected_baud(), BaudRate::Kbps125);
        assert_eq!(link.baud_rate(), BaudRate::Kbps125);
    }

    #[test]
    fn test_refresh_devices_deduplicates() {
        let (mut ctl, _, bus, _) = setup();

        assert_eq!(ctl.refresh_devices(), &["vcan0", "vcan1"]);
        bus.set_devices(["vcan1", "vcan2", "vcan2"]);
        assert_eq!(ctl.refresh_devices(), &["vcan0", "vcan1", "vcan2"]);
        assert_eq!(ctl.devices().len(), 3);
    }
}
