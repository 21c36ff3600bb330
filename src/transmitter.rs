//! Periodic charge command transmission
//!
//! Every period the loop reads the charge enable flag and the link state.
//! Enabled and open: send the setpoints. Open only: send the disabled
//! payload. Closed: send nothing. The loop then sleeps out the rest of the
//! period whatever the outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info, trace};

use crate::codec::ChargeCommand;
use crate::error::LinkError;
use crate::link::CanLink;

/// Charge enable flag
///
/// Written only by the connection controller, read once per tick by the
/// transmitter. A tick of staleness is harmless.
#[derive(Debug, Default)]
pub struct ChargeControl {
    enabled: AtomicBool,
}

impl ChargeControl {
    /// Create a flag with charging disabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if charging is requested
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Request or withdraw charging
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

/// Target voltage (V) and requested current (A)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Setpoints {
    pub voltage: f64,
    pub current: f64,
}

/// Input collaborator holding the user-set setpoints
pub trait SetpointSource: Send + Sync {
    /// Latest setpoints; called once per transmit tick
    fn setpoints(&self) -> Setpoints;
}

/// Setpoints held in memory and updated by the UI context
#[derive(Debug, Default)]
pub struct SharedSetpoints {
    inner: Mutex<Setpoints>,
}

impl SharedSetpoints {
    /// Create with initial setpoints
    pub fn new(voltage: f64, current: f64) -> Self {
        Self {
            inner: Mutex::new(Setpoints { voltage, current }),
        }
    }

    /// Replace both setpoints
    pub fn set(&self, voltage: f64, current: f64) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Setpoints { voltage, current };
    }

    /// Update the target voltage
    pub fn set_voltage(&self, voltage: f64) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).voltage = voltage;
    }

    /// Update the requested current
    pub fn set_current(&self, current: f64) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).current = current;
    }
}

impl SetpointSource for SharedSetpoints {
    fn setpoints(&self) -> Setpoints {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Result of one transmit tick
#[derive(Debug)]
pub enum TickOutcome {
    /// Command frame sent
    Sent(ChargeCommand),
    /// Link closed, nothing sent
    Skipped,
    /// Write failed; the next tick tries again
    Failed(LinkError),
    /// Shutdown signalled, setpoints were not read
    Terminated,
}

/// Periodic command transmitter over a shared link
pub struct TransmitterLoop {
    link: Arc<CanLink>,
    control: Arc<ChargeControl>,
    setpoints: Arc<dyn SetpointSource>,
    period: Duration,
}

impl TransmitterLoop {
    /// Create a loop sending on `link` every `period`
    pub fn new(
        link: Arc<CanLink>,
        control: Arc<ChargeControl>,
        setpoints: Arc<dyn SetpointSource>,
        period: Duration,
    ) -> Self {
        Self {
            link,
            control,
            setpoints,
            period,
        }
    }

    /// Run until shutdown is signalled
    pub fn run(self) {
        info!("Transmitter loop started ({:?} period)", self.period);
        let shutdown = self.link.shutdown_token().clone();

        while !shutdown.is_terminated() {
            let started = Instant::now();
            self.tick();

            let remaining = self.period.saturating_sub(started.elapsed());
            if shutdown.sleep(remaining) {
                break;
            }
        }

        info!("Transmitter loop stopped");
    }

    /// Build and send this period's command
    pub fn tick(&self) -> TickOutcome {
        if self.link.is_shutting_down() {
            return TickOutcome::Terminated;
        }
        if !self.link.is_open() {
            trace!("Link closed, skipping transmit");
            return TickOutcome::Skipped;
        }

        let command = if self.control.is_enabled() {
            let Setpoints { voltage, current } = self.setpoints.setpoints();
            ChargeCommand::charge(voltage, current)
        } else {
            ChargeCommand::disabled()
        };

        match self.link.write_frame(&command.to_frame()) {
            Ok(()) => TickOutcome::Sent(command),
            Err(e) if e.is_closed() => TickOutcome::Skipped,
            Err(e) => {
                debug!("Charge command write failed: {}", e);
                TickOutcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baud::BaudRate;
    use crate::constants::{DISABLED_PAYLOAD, ELCON_COMMAND_ID};
    use crate::shutdown::ShutdownToken;
    use crate::virtual_bus::{VirtualBus, VirtualDriver};
    use std::thread;

    struct Fixture {
        tx: TransmitterLoop,
        link: Arc<CanLink>,
        bus: VirtualBus,
        control: Arc<ChargeControl>,
        setpoints: Arc<SharedSetpoints>,
    }

    fn fixture(period: Duration) -> Fixture {
        let (driver, bus) = VirtualDriver::new(["vcan0"]);
        let link = Arc::new(CanLink::new(
            driver,
            BaudRate::Kbps500,
            Duration::from_millis(5),
            ShutdownToken::new(),
        ));
        let control = Arc::new(ChargeControl::new());
        let setpoints = Arc::new(SharedSetpoints::new(400.0, 10.0));
        let tx = TransmitterLoop::new(
            Arc::clone(&link),
            Arc::clone(&control),
            Arc::clone(&setpoints) as Arc<dyn SetpointSource>,
            period,
        );
        Fixture {
            tx,
            link,
            bus,
            control,
            setpoints,
        }
    }

    #[test]
    fn test_closed_link_sends_nothing() {
        let f = fixture(Duration::from_millis(10));
        f.control.set_enabled(true);

        assert!(matches!(f.tx.tick(), TickOutcome::Skipped));
        assert!(f.bus.sent().is_empty());
    }

    #[test]
    fn test_open_but_disabled_sends_disabled_payload() {
        let f = fixture(Duration::from_millis(10));
        f.link.open(0, BaudRate::Kbps500).unwrap();

        assert!(matches!(f.tx.tick(), TickOutcome::Sent(_)));
        let sent = f.bus.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id(), ELCON_COMMAND_ID);
        assert!(sent[0].is_extended());
        assert_eq!(sent[0].data(), &DISABLED_PAYLOAD);
    }

    #[test]
    fn test_enabled_sends_setpoints() {
        let f = fixture(Duration::from_millis(10));
        f.link.open(0, BaudRate::Kbps500).unwrap();
        f.control.set_enabled(true);

        f.tx.tick();
        f.setpoints.set_voltage(100.0);
        f.setpoints.set_current(2.5);
        f.tx.tick();

        let sent = f.bus.sent();
        assert_eq!(sent[0].data(), &[0x0F, 0xA0, 0x00, 0x64, 0x00]);
        assert_eq!(sent[1].data(), &[0x03, 0xE8, 0x00, 0x19, 0x00]);
    }

    #[test]
    fn test_write_failure_is_transient() {
        let f = fixture(Duration::from_millis(10));
        f.link.open(0, BaudRate::Kbps500).unwrap();

        f.bus.set_fail_writes(true);
        assert!(matches!(f.tx.tick(), TickOutcome::Failed(LinkError::Write(_))));

        f.bus.set_fail_writes(false);
        assert!(matches!(f.tx.tick(), TickOutcome::Sent(_)));
        assert_eq!(f.bus.sent().len(), 1);
    }

    #[test]
    fn test_tick_after_shutdown_does_not_read_setpoints() {
        struct PanickingSource;
        impl SetpointSource for PanickingSource {
            fn setpoints(&self) -> Setpoints {
                panic!("setpoints read after shutdown");
            }
        }

        let f = fixture(Duration::from_millis(10));
        f.link.open(0, BaudRate::Kbps500).unwrap();
        f.control.set_enabled(true);
        let tx = TransmitterLoop::new(
            Arc::clone(&f.link),
            Arc::clone(&f.control),
            Arc::new(PanickingSource),
            Duration::from_millis(10),
        );

        f.link.shutdown_token().terminate();
        assert!(matches!(tx.tick(), TickOutcome::Terminated));
        assert!(f.bus.sent().is_empty());
    }

    #[test]
    fn test_run_sends_one_frame_per_period() {
        let period = Duration::from_millis(50);
        let f = fixture(period);
        f.link.open(0, BaudRate::Kbps500).unwrap();
        let link = Arc::clone(&f.link);
        let bus = f.bus.clone();

        let handle = thread::spawn(move || f.tx.run());
        thread::sleep(period * 10);
        link.shutdown_token().terminate();
        handle.join().unwrap();

        // N periods give N +/- 1 frames, allowing for scheduler jitter
        let count = bus.sent().len();
        assert!((9..=11).contains(&count), "sent {} frames", count);
    }

    #[test]
    fn test_run_stops_within_one_period() {
        let f = fixture(Duration::from_secs(30));
        let link = Arc::clone(&f.link);
        let handle = thread::spawn(move || f.tx.run());

        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        link.shutdown_token().terminate();
        handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
