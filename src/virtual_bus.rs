//! In-memory CAN adapter
//!
//! `VirtualDriver` implements `CanDriver` without hardware. A cloneable
//! `VirtualBus` handle plays the role of the rest of the bus: it injects frames
//! that the driver will read, records frames the driver wrote and can inject
//! open/close/read/write failures.
//!
//! ```
//! use elcon_can::{CanDriver, CanFrame, VirtualDriver};
//! use std::time::Duration;
//!
//! let (mut driver, bus) = VirtualDriver::new(["vcan0"]);
//! driver.open(0, 500_000)?;
//! bus.inject(CanFrame::extended(0x18FF_50E5, &[0x0F, 0xA0, 0x00, 0x64]));
//! let frame = driver.read(Duration::from_millis(10))?;
//! assert_eq!(frame.id(), 0x18FF_50E5);
//! # Ok::<(), elcon_can::LinkError>(())
//! ```

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::driver::CanDriver;
use crate::error::{LinkError, Result};
use crate::frame::CanFrame;

#[derive(Debug, Default)]
struct BusState {
    devices: Vec<String>,
    open_device: Option<usize>,
    bitrate: u32,
    sent: Vec<CanFrame>,
    open_count: usize,
    close_count: usize,
    fail_open: Option<String>,
    fail_close: Option<String>,
    fail_reads: u32,
    fail_writes: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<BusState>,
    sent_cvar: Condvar,
    rx_tx: Sender<CanFrame>,
    rx_rx: Receiver<CanFrame>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Driver side of the virtual adapter
#[derive(Debug)]
pub struct VirtualDriver {
    shared: Arc<Shared>,
}

/// Bus side of the virtual adapter
#[derive(Debug, Clone)]
pub struct VirtualBus {
    shared: Arc<Shared>,
}

impl VirtualDriver {
    /// Create a driver exposing the given device names, plus its bus handle
    pub fn new<I, S>(devices: I) -> (Self, VirtualBus)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (rx_tx, rx_rx) = unbounded();
        let shared = Arc::new(Shared {
            state: Mutex::new(BusState {
                devices: devices.into_iter().map(Into::into).collect(),
                ..BusState::default()
            }),
            sent_cvar: Condvar::new(),
            rx_tx,
            rx_rx,
        });

        (
            Self {
                shared: Arc::clone(&shared),
            },
            VirtualBus { shared },
        )
    }
}

impl CanDriver for VirtualDriver {
    fn open(&mut self, device_index: usize, bitrate: u32) -> Result<()> {
        let mut state = self.shared.state();

        if let Some(reason) = state.fail_open.take() {
            return Err(LinkError::DeviceOpenFailed {
                index: device_index,
                reason,
            });
        }
        if device_index >= state.devices.len() {
            return Err(LinkError::DeviceNotFound(device_index));
        }

        // A fresh session starts with an empty receive queue
        while self.shared.rx_rx.try_recv().is_ok() {}

        state.open_device = Some(device_index);
        state.bitrate = bitrate;
        state.open_count += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.shared.state();
        if state.open_device.take().is_none() {
            return Ok(());
        }
        state.close_count += 1;

        match state.fail_close.take() {
            Some(reason) => Err(LinkError::DeviceCloseFailed(reason)),
            None => Ok(()),
        }
    }

    fn set_bitrate(&mut self, bitrate: u32) {
        self.shared.state().bitrate = bitrate;
    }

    fn read(&mut self, timeout: Duration) -> Result<CanFrame> {
        {
            let mut state = self.shared.state();
            if state.open_device.is_none() {
                return Err(LinkError::NotOpen);
            }
            if state.fail_reads > 0 {
                state.fail_reads -= 1;
                return Err(LinkError::Read("injected read failure".into()));
            }
        }

        match self.shared.rx_rx.recv_timeout(timeout) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => Err(LinkError::ReadTimeout),
            Err(RecvTimeoutError::Disconnected) => Err(LinkError::Read("bus disconnected".into())),
        }
    }

    fn write(&mut self, frame: &CanFrame) -> Result<()> {
        let mut state = self.shared.state();
        if state.open_device.is_none() {
            return Err(LinkError::NotOpen);
        }
        if state.fail_writes {
            return Err(LinkError::Write("injected write failure".into()));
        }

        state.sent.push(*frame);
        self.shared.sent_cvar.notify_all();
        Ok(())
    }

    fn list_devices(&self) -> Result<Vec<String>> {
        Ok(self.shared.state().devices.clone())
    }
}

impl VirtualBus {
    /// Queue a frame for the driver to read
    pub fn inject(&self, frame: CanFrame) {
        // The receiver lives in `Shared`, so the channel is never disconnected
        let _ = self.shared.rx_tx.send(frame);
    }

    /// Frames written by the driver so far
    pub fn sent(&self) -> Vec<CanFrame> {
        self.shared.state().sent.clone()
    }

    /// Forget recorded frames
    pub fn clear_sent(&self) {
        self.shared.state().sent.clear();
    }

    /// Remove and return the frames recorded so far
    pub fn take_sent(&self) -> Vec<CanFrame> {
        std::mem::take(&mut self.shared.state().sent)
    }

    /// Wait until at least `count` frames have been written or `timeout` elapses
    ///
    /// Returns every frame recorded so far.
    pub fn wait_for_sent(&self, count: usize, timeout: Duration) -> Vec<CanFrame> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state();
        while state.sent.len() < count {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            state = self
                .shared
                .sent_cvar
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        state.sent.clone()
    }

    /// Index of the currently open device
    pub fn open_device(&self) -> Option<usize> {
        self.shared.state().open_device
    }

    /// Bitrate last configured on the driver
    pub fn bitrate(&self) -> u32 {
        self.shared.state().bitrate
    }

    /// Number of successful opens
    pub fn open_count(&self) -> usize {
        self.shared.state().open_count
    }

    /// Number of closes of an open device
    pub fn close_count(&self) -> usize {
        self.shared.state().close_count
    }

    /// Replace the enumerated device names
    pub fn set_devices<I, S>(&self, devices: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared.state().devices = devices.into_iter().map(Into::into).collect();
    }

    /// Make the next `open` fail
    pub fn fail_next_open(&self, reason: &str) {
        self.shared.state().fail_open = Some(reason.to_string());
    }

    /// Make the next `close` of an open device fail (the device still closes)
    pub fn fail_next_close(&self, reason: &str) {
        self.shared.state().fail_close = Some(reason.to_string());
    }

    /// Make the next `count` reads fail
    pub fn fail_reads(&self, count: u32) {
        self.shared.state().fail_reads = count;
    }

    /// Make every write fail until cleared
    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.state().fail_writes = fail;
    }
}
