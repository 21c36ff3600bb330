//! GS-USB adapter driver
//!
//! `GsUsbDriver` implements `CanDriver` for GS-USB compatible CAN adapters
//! such as candleLight and CANable, talking to them over libusb.
//!
//! # Example
//!
//! ```no_run
//! use elcon_can::{CanDriver, GsUsbDriver};
//! use std::time::Duration;
//!
//! let mut driver = GsUsbDriver::new()?;
//! for name in driver.list_devices()? {
//!     println!("{}", name);
//! }
//!
//! driver.open(0, 500_000)?;
//! let frame = driver.read(Duration::from_millis(100))?;
//! println!("RX  {}", frame);
//! # Ok::<(), elcon_can::LinkError>(())
//! ```

pub mod protocol;

use std::time::{Duration, Instant};

use log::{debug, warn};
use rusb::{Device, DeviceHandle, GlobalContext};

use crate::driver::CanDriver;
use crate::error::{LinkError, Result};
use crate::frame::CanFrame;

use protocol::{
    adapter_name, pack_host_frame, DeviceBitTiming, DeviceCapability, DeviceMode, HostFrame,
    BT_CONST_LEN, GS_USB_BREQ_BITTIMING, GS_USB_BREQ_BT_CONST, GS_USB_BREQ_HOST_FORMAT,
    GS_USB_BREQ_MODE, GS_USB_ENDPOINT_IN, GS_USB_ENDPOINT_OUT, HOST_FRAME_SIZE_HW_TIMESTAMP,
    REQUEST_TYPE_IN, REQUEST_TYPE_OUT,
};

/// Timeout of control transfers and bulk writes
const USB_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default bitrate until `set_bitrate` is called
const DEFAULT_BITRATE: u32 = 500_000;

/// An adapter that has been started
struct OpenAdapter {
    handle: DeviceHandle<GlobalContext>,
    name: String,
}

/// Driver for GS-USB compatible adapters
pub struct GsUsbDriver {
    adapter: Option<OpenAdapter>,
    bitrate: u32,
}

impl GsUsbDriver {
    /// Create a driver; fails only if libusb cannot be used at all
    pub fn new() -> Result<Self> {
        rusb::devices()?;
        Ok(Self {
            adapter: None,
            bitrate: DEFAULT_BITRATE,
        })
    }

    /// Name of the open adapter
    pub fn open_device_name(&self) -> Option<&str> {
        self.adapter.as_ref().map(|a| a.name.as_str())
    }

    fn start(device: &Device<GlobalContext>, bitrate: u32) -> Result<DeviceHandle<GlobalContext>> {
        let mut handle = device.open()?;

        // Reset to support restart multiple times
        handle.reset()?;

        #[cfg(any(target_os = "linux", target_os = "macos"))]
        {
            if handle.kernel_driver_active(0).unwrap_or(false) {
                handle.detach_kernel_driver(0)?;
            }
        }
        handle.claim_interface(0)?;

        // Legacy byte order request, not supported by every firmware
        let host_format = 0x0000_BEEFu32.to_le_bytes();
        let _ = control_out(&handle, GS_USB_BREQ_HOST_FORMAT, &host_format);

        let data = control_in(&handle, GS_USB_BREQ_BT_CONST, BT_CONST_LEN)?;
        let capability = DeviceCapability::unpack(&data)
            .ok_or_else(|| LinkError::Read("short bit timing constants response".into()))?;

        let timing = DeviceBitTiming::for_bitrate(capability.fclk_can, bitrate).ok_or(
            LinkError::UnsupportedBitrate {
                bitrate,
                clock_hz: capability.fclk_can,
            },
        )?;
        control_out(&handle, GS_USB_BREQ_BITTIMING, &timing.pack())?;
        control_out(&handle, GS_USB_BREQ_MODE, &DeviceMode::start().pack())?;

        debug!(
            "GS-USB started: clock {} Hz, features 0x{:08x}, {:?}",
            capability.fclk_can, capability.feature, timing
        );
        Ok(handle)
    }
}

impl CanDriver for GsUsbDriver {
    fn open(&mut self, device_index: usize, bitrate: u32) -> Result<()> {
        if let Err(e) = self.close() {
            warn!("Closing previous adapter failed: {}", e);
        }
        self.bitrate = bitrate;

        let (device, name) = scan()?
            .into_iter()
            .nth(device_index)
            .ok_or(LinkError::DeviceNotFound(device_index))?;

        let handle = Self::start(&device, bitrate).map_err(|e| LinkError::DeviceOpenFailed {
            index: device_index,
            reason: e.to_string(),
        })?;

        debug!("Opened {} at {} bit/s", name, bitrate);
        self.adapter = Some(OpenAdapter { handle, name });
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut adapter) = self.adapter.take() else {
            return Ok(());
        };

        let stopped = control_out(&adapter.handle, GS_USB_BREQ_MODE, &DeviceMode::reset().pack());
        if let Err(e) = adapter.handle.release_interface(0) {
            debug!("Releasing interface of {} failed: {}", adapter.name, e);
        }
        debug!("Closed {}", adapter.name);

        stopped.map_err(|e| LinkError::DeviceCloseFailed(e.to_string()))
    }

    fn set_bitrate(&mut self, bitrate: u32) {
        self.bitrate = bitrate;
    }

    fn read(&mut self, timeout: Duration) -> Result<CanFrame> {
        let adapter = self.adapter.as_ref().ok_or(LinkError::NotOpen)?;
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; HOST_FRAME_SIZE_HW_TIMESTAMP];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LinkError::ReadTimeout);
            }

            let len = match adapter
                .handle
                .read_bulk(GS_USB_ENDPOINT_IN, &mut buf, remaining)
            {
                Ok(len) => len,
                Err(rusb::Error::Timeout) => return Err(LinkError::ReadTimeout),
                Err(e) => return Err(LinkError::Read(e.to_string())),
            };

            match HostFrame::unpack(&buf[..len]) {
                // TX confirmations are not bus traffic
                Some(host) if host.is_echo() => continue,
                Some(host) => return Ok(host.frame),
                None => {
                    warn!("Dropping short GS-USB transfer ({} bytes)", len);
                    continue;
                }
            }
        }
    }

    fn write(&mut self, frame: &CanFrame) -> Result<()> {
        let adapter = self.adapter.as_ref().ok_or(LinkError::NotOpen)?;
        adapter
            .handle
            .write_bulk(GS_USB_ENDPOINT_OUT, &pack_host_frame(frame), USB_TIMEOUT)
            .map_err(|e| LinkError::Write(e.to_string()))?;
        Ok(())
    }

    fn list_devices(&self) -> Result<Vec<String>> {
        Ok(scan()?.into_iter().map(|(_, name)| name).collect())
    }
}

impl std::fmt::Debug for GsUsbDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GsUsbDriver")
            .field("open", &self.open_device_name())
            .field("bitrate", &self.bitrate)
            .finish()
    }
}

impl Drop for GsUsbDriver {
    fn drop(&mut self) {
        // Try to stop the adapter when dropped
        let _ = self.close();
    }
}

/// GS-USB compatible devices on the system, in bus order, with display names
fn scan() -> Result<Vec<(Device<GlobalContext>, String)>> {
    let mut found = Vec::new();

    for device in rusb::devices()?.iter() {
        let desc = match device.device_descriptor() {
            Ok(desc) => desc,
            Err(_) => continue,
        };

        if let Some(product) = adapter_name(desc.vendor_id(), desc.product_id()) {
            let name = format!(
                "{} {:04x}:{:04x} (bus {}, addr {})",
                product,
                desc.vendor_id(),
                desc.product_id(),
                device.bus_number(),
                device.address()
            );
            found.push((device, name));
        }
    }

    Ok(found)
}

fn control_out(handle: &DeviceHandle<GlobalContext>, request: u8, data: &[u8]) -> Result<()> {
    handle.write_control(REQUEST_TYPE_OUT, request, 0, 0, data, USB_TIMEOUT)?;
    Ok(())
}

fn control_in(handle: &DeviceHandle<GlobalContext>, request: u8, length: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; length];
    let len = handle.read_control(REQUEST_TYPE_IN, request, 0, 0, &mut buf, USB_TIMEOUT)?;
    buf.truncate(len);
    Ok(buf)
}
