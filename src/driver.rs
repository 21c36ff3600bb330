//! CAN adapter driver interface
//!
//! `CanDriver` is the seam between the link and whatever performs bus I/O.
//! Drivers are not required to be thread safe themselves: `CanLink` owns the
//! driver and serializes every call behind its lock.

use std::time::Duration;

use crate::error::Result;
use crate::frame::CanFrame;

/// Hardware collaborator performing actual CAN bus I/O
pub trait CanDriver: Send {
    /// Open the `device_index`-th adapter at `bitrate` bits per second
    fn open(&mut self, device_index: usize, bitrate: u32) -> Result<()>;

    /// Stop the adapter and release it. Closing a closed driver is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Store the bitrate used by the next `open`
    fn set_bitrate(&mut self, bitrate: u32);

    /// Block until a frame arrives, an error occurs or `timeout` elapses
    ///
    /// A timeout is reported as `LinkError::ReadTimeout`.
    fn read(&mut self, timeout: Duration) -> Result<CanFrame>;

    /// Transmit a frame
    fn write(&mut self, frame: &CanFrame) -> Result<()>;

    /// Enumerate adapter names; does not require an open adapter
    ///
    /// The result may repeat names, callers de-duplicate before display.
    fn list_devices(&self) -> Result<Vec<String>>;
}

impl<D: CanDriver + ?Sized> CanDriver for Box<D> {
    fn open(&mut self, device_index: usize, bitrate: u32) -> Result<()> {
        (**self).open(device_index, bitrate)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn set_bitrate(&mut self, bitrate: u32) {
        (**self).set_bitrate(bitrate)
    }

    fn read(&mut self, timeout: Duration) -> Result<CanFrame> {
        (**self).read(timeout)
    }

    fn write(&mut self, frame: &CanFrame) -> Result<()> {
        (**self).write(frame)
    }

    fn list_devices(&self) -> Result<Vec<String>> {
        (**self).list_devices()
    }
}
