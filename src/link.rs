//! CAN link lifecycle
//!
//! `CanLink` exclusively owns the adapter driver. Every hardware call runs
//! under a single lock, so at most one open/close/read/write touches the
//! device at any instant. The open flag is an atomic that the worker loops
//! poll without taking the lock, and `close` clears it before it waits for
//! the lock so an in-flight read or write can tell it lost the race.
//!
//! # Example
//!
//! ```
//! use elcon_can::{BaudRate, CanLink, ShutdownToken, VirtualDriver};
//! use std::time::Duration;
//!
//! let (driver, bus) = VirtualDriver::new(["vcan0"]);
//! let link = CanLink::new(driver, BaudRate::Kbps500, Duration::from_millis(10), ShutdownToken::new());
//!
//! link.open(0, BaudRate::Kbps250)?;
//! link.write(0x1806_E5F4, &[0, 0, 0, 0, 1])?;
//! assert_eq!(bus.sent().len(), 1);
//!
//! link.close()?;
//! assert!(link.write(0x1806_E5F4, &[0, 0, 0, 0, 1]).is_err());
//! # Ok::<(), elcon_can::LinkError>(())
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info, trace};

use crate::baud::BaudRate;
use crate::driver::CanDriver;
use crate::error::{LinkError, Result};
use crate::frame::CanFrame;
use crate::shutdown::ShutdownToken;

/// Open/closed state of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No device handle may be used
    Closed,
    /// Reads and writes may be attempted
    Open,
}

/// Lock-guarded owner of the CAN adapter
pub struct CanLink {
    /// Adapter driver; the lock is held for the duration of each hardware call
    driver: Mutex<Box<dyn CanDriver>>,
    /// Serializes open and close against each other
    lifecycle: Mutex<()>,
    /// Open flag read by the loops without locking
    open: AtomicBool,
    /// Paired with `state_cvar` to wake loops waiting for the link to open
    state_lock: Mutex<()>,
    state_cvar: Condvar,
    /// Rate used by the next open
    baud: Mutex<BaudRate>,
    read_timeout: Duration,
    shutdown: ShutdownToken,
}

impl CanLink {
    /// Create a closed link around `driver`
    ///
    /// `read_timeout` bounds each blocking read, and with it how long `close`
    /// may wait behind an in-flight read.
    pub fn new<D>(
        driver: D,
        baud: BaudRate,
        read_timeout: Duration,
        shutdown: ShutdownToken,
    ) -> Self
    where
        D: CanDriver + 'static,
    {
        let mut driver: Box<dyn CanDriver> = Box::new(driver);
        driver.set_bitrate(baud.bits_per_second());

        Self {
            driver: Mutex::new(driver),
            lifecycle: Mutex::new(()),
            open: AtomicBool::new(false),
            state_lock: Mutex::new(()),
            state_cvar: Condvar::new(),
            baud: Mutex::new(baud),
            read_timeout,
            shutdown,
        }
    }

    /// Open the `device_index`-th adapter at `baud`
    ///
    /// Opening an already open link is a no-op.
    pub fn open(&self, device_index: usize, baud: BaudRate) -> Result<()> {
        if self.shutdown.is_terminated() {
            return Err(LinkError::Terminated);
        }

        let _lifecycle = lock(&self.lifecycle);
        if self.is_open() {
            debug!("CAN link already open, ignoring open request");
            return Ok(());
        }

        *lock(&self.baud) = baud;
        let bitrate = baud.bits_per_second();

        {
            let mut driver = lock(&self.driver);
            driver.set_bitrate(bitrate);
            driver.open(device_index, bitrate).map_err(|e| match e {
                LinkError::DeviceOpenFailed { .. } => e,
                other => LinkError::DeviceOpenFailed {
                    index: device_index,
                    reason: other.to_string(),
                },
            })?;
        }

        self.set_open(true);
        info!("CAN device {} opened at {}", device_index, baud);
        Ok(())
    }

    /// Close the link
    ///
    /// The link reports `Closed` before the driver is released, and stays
    /// closed even when the driver reports a close failure. Closing a closed
    /// link is a no-op.
    pub fn close(&self) -> Result<()> {
        let _lifecycle = lock(&self.lifecycle);
        if !self.is_open() {
            return Ok(());
        }
        self.set_open(false);

        // Waits for at most one in-flight read (bounded by the read timeout)
        let result = lock(&self.driver).close();
        info!("CAN device closed");

        result.map_err(|e| match e {
            LinkError::DeviceCloseFailed(_) => e,
            other => LinkError::DeviceCloseFailed(other.to_string()),
        })
    }

    /// Store the rate used by the next `open`
    ///
    /// Has no effect on an open link until it is reopened.
    pub fn set_baud_rate(&self, baud: BaudRate) {
        *lock(&self.baud) = baud;

        if self.is_open() {
            debug!("Baud rate {} stored for next open", baud);
            return;
        }
        lock(&self.driver).set_bitrate(baud.bits_per_second());
    }

    /// Rate used by the next `open`
    pub fn baud_rate(&self) -> BaudRate {
        *lock(&self.baud)
    }

    /// Read one frame, blocking up to the configured read timeout
    ///
    /// Fails with `NotOpen` on a closed link and with `Closed` when the link
    /// was closed while the read was waiting; a frame received in that window
    /// is discarded.
    pub fn read(&self) -> Result<CanFrame> {
        if !self.is_open() {
            return Err(LinkError::NotOpen);
        }

        let mut driver = lock(&self.driver);
        if !self.is_open() {
            return Err(LinkError::Closed);
        }

        let result = driver.read(self.read_timeout);
        if !self.is_open() {
            return Err(LinkError::Closed);
        }
        if let Ok(frame) = &result {
            trace!("RX  {}", frame);
        }
        result
    }

    /// Send an extended data frame
    pub fn write(&self, id: u32, data: &[u8]) -> Result<()> {
        self.write_frame(&CanFrame::extended(id, data))
    }

    /// Send a frame
    pub fn write_frame(&self, frame: &CanFrame) -> Result<()> {
        if !self.is_open() {
            return Err(LinkError::NotOpen);
        }

        let mut driver = lock(&self.driver);
        if !self.is_open() {
            return Err(LinkError::Closed);
        }

        driver.write(frame)?;
        trace!("TX  {}", frame);
        Ok(())
    }

    /// Enumerate adapters; works whether or not the link is open
    pub fn list_devices(&self) -> Result<Vec<String>> {
        lock(&self.driver).list_devices()
    }

    /// Check if the link is open
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Current state of the link
    pub fn state(&self) -> LinkState {
        if self.is_open() {
            LinkState::Open
        } else {
            LinkState::Closed
        }
    }

    /// Check if shutdown has been signalled
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_terminated()
    }

    /// Shutdown token shared with the loops
    pub fn shutdown_token(&self) -> &ShutdownToken {
        &self.shutdown
    }

    /// Block until the link is open, shutdown is signalled or `timeout` elapses
    ///
    /// Returns whether the link is open.
    pub fn wait_until_open(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = lock(&self.state_lock);

        while !self.is_open() && !self.shutdown.is_terminated() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            guard = self
                .state_cvar
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        self.is_open()
    }

    /// Wake every thread blocked in `wait_until_open`
    pub fn notify_waiters(&self) {
        let _guard = lock(&self.state_lock);
        self.state_cvar.notify_all();
    }

    fn set_open(&self, open: bool) {
        let _guard = lock(&self.state_lock);
        self.open.store(open, Ordering::SeqCst);
        self.state_cvar.notify_all();
    }
}

impl std::fmt::Debug for CanLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanLink")
            .field("state", &self.state())
            .field("baud", &self.baud_rate())
            .field("read_timeout", &self.read_timeout)
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

/// Guarded values stay consistent across a panicking holder
fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_bus::{VirtualBus, VirtualDriver};
    use std::sync::Arc;
    use std::thread;

    fn link_with(read_timeout: Duration) -> (Arc<CanLink>, VirtualBus) {
        let (driver, bus) = VirtualDriver::new(["vcan0", "vcan1"]);
        let link = CanLink::new(
            driver,
            BaudRate::Kbps500,
            read_timeout,
            ShutdownToken::new(),
        );
        (Arc::new(link), bus)
    }

    #[test]
    fn test_open_close_lifecycle() {
        let (link, bus) = link_with(Duration::from_millis(10));
        assert_eq!(link.state(), LinkState::Closed);

        link.open(1, BaudRate::Kbps125).unwrap();
        assert_eq!(link.state(), LinkState::Open);
        assert_eq!(bus.open_device(), Some(1));
        assert_eq!(bus.bitrate(), 125_000);
        assert_eq!(link.baud_rate(), BaudRate::Kbps125);

        link.close().unwrap();
        assert_eq!(link.state(), LinkState::Closed);
        assert_eq!(bus.open_device(), None);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (link, bus) = link_with(Duration::from_millis(10));
        link.close().unwrap();

        link.open(0, BaudRate::Kbps500).unwrap();
        link.close().unwrap();
        link.close().unwrap();
        assert_eq!(bus.close_count(), 1);
    }

    #[test]
    fn test_open_failure_stays_closed() {
        let (link, bus) = link_with(Duration::from_millis(10));

        bus.fail_next_open("device busy");
        let err = link.open(0, BaudRate::Kbps500).unwrap_err();
        assert!(matches!(err, LinkError::DeviceOpenFailed { index: 0, .. }));
        assert!(!link.is_open());

        let err = link.open(7, BaudRate::Kbps500).unwrap_err();
        assert!(matches!(err, LinkError::DeviceOpenFailed { index: 7, .. }));
        assert!(!link.is_open());
    }

    #[test]
    fn test_close_failure_still_closes() {
        let (link, bus) = link_with(Duration::from_millis(10));
        link.open(0, BaudRate::Kbps500).unwrap();

        bus.fail_next_close("usb unplugged");
        let err = link.close().unwrap_err();
        assert!(matches!(err, LinkError::DeviceCloseFailed(_)));
        assert!(!link.is_open());
    }

    #[test]
    fn test_io_after_close_fails() {
        let (link, bus) = link_with(Duration::from_millis(10));
        link.open(0, BaudRate::Kbps500).unwrap();
        link.close().unwrap();

        bus.inject(CanFrame::extended(0x18FF_50E5, &[0, 1, 0, 1]));
        assert!(matches!(link.read(), Err(LinkError::NotOpen)));
        assert!(matches!(link.write(0x1, &[]), Err(LinkError::NotOpen)));
        assert!(bus.sent().is_empty());
    }

    #[test]
    fn test_close_during_blocking_read_discards_frame() {
        let (link, bus) = link_with(Duration::from_secs(2));
        link.open(0, BaudRate::Kbps500).unwrap();

        let reader = {
            let link = Arc::clone(&link);
            thread::spawn(move || link.read())
        };
        thread::sleep(Duration::from_millis(50));

        // close() clears the open flag, then waits behind the read for the lock
        let closer = {
            let link = Arc::clone(&link);
            thread::spawn(move || link.close())
        };
        thread::sleep(Duration::from_millis(50));

        // Arrives while the read is still pending but after close began
        bus.inject(CanFrame::extended(0x18FF_50E5, &[0x0F, 0xA0, 0x00, 0x64]));

        let read = reader.join().unwrap();
        assert!(read.is_err());
        assert!(read.unwrap_err().is_closed());
        closer.join().unwrap().unwrap();
        assert!(!link.is_open());
    }

    #[test]
    fn test_set_baud_rate_applies_to_next_open() {
        let (link, bus) = link_with(Duration::from_millis(10));

        link.set_baud_rate(BaudRate::Mbps1);
        assert_eq!(bus.bitrate(), 1_000_000);

        link.open(0, BaudRate::Kbps250).unwrap();
        link.set_baud_rate(BaudRate::Kbps125);
        // the open device keeps its rate
        assert_eq!(bus.bitrate(), 250_000);
        assert_eq!(link.baud_rate(), BaudRate::Kbps125);
    }

    #[test]
    fn test_list_devices_without_open() {
        let (link, _bus) = link_with(Duration::from_millis(10));
        assert_eq!(link.list_devices().unwrap(), vec!["vcan0", "vcan1"]);
    }

    #[test]
    fn test_open_refused_after_shutdown() {
        let (link, _bus) = link_with(Duration::from_millis(10));
        link.shutdown_token().terminate();

        assert!(matches!(
            link.open(0, BaudRate::Kbps500),
            Err(LinkError::Terminated)
        ));
    }

    #[test]
    fn test_wait_until_open_wakes_on_open() {
        let (link, _bus) = link_with(Duration::from_millis(10));
        assert!(!link.wait_until_open(Duration::from_millis(10)));

        let waiter = {
            let link = Arc::clone(&link);
            thread::spawn(move || link.wait_until_open(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        link.open(0, BaudRate::Kbps500).unwrap();

        assert!(waiter.join().unwrap());
    }
}
