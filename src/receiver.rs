//! Telemetry receive loop
//!
//! `Idle` (link closed, wait for it to open) alternates with `Polling`
//! (blocking reads). Telemetry frames are decoded and published; anything
//! else is dropped. Read failures while the link is open are transient, a
//! failure caused by close or shutdown just returns the loop to `Idle`.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::codec::Telemetry;
use crate::config::ChargerConfig;
use crate::error::LinkError;
use crate::event::{ChargerEvent, EventPublisher};
use crate::link::CanLink;

/// Result of one receive attempt
#[derive(Debug)]
pub enum PollOutcome {
    /// Telemetry decoded and published
    Telemetry(Telemetry),
    /// Frame with a foreign identifier, discarded
    Ignored,
    /// Telemetry identifier with a short payload, discarded
    Malformed,
    /// Nothing arrived within the read timeout
    Idle,
    /// Link closed or shutdown signalled
    Closed,
    /// Transient adapter failure
    Failed(LinkError),
}

/// Receive loop over a shared link
pub struct ReceiverLoop {
    link: Arc<CanLink>,
    events: EventPublisher,
    idle_poll: Duration,
    warn_threshold: u32,
    failures: u32,
}

impl ReceiverLoop {
    /// Create a loop reading from `link` and publishing on `events`
    pub fn new(link: Arc<CanLink>, events: EventPublisher, config: &ChargerConfig) -> Self {
        Self {
            link,
            events,
            idle_poll: config.idle_poll,
            warn_threshold: config.read_failure_warn_threshold.max(1),
            failures: 0,
        }
    }

    /// Run until shutdown is signalled
    pub fn run(mut self) {
        info!("Receiver loop started");

        while !self.link.is_shutting_down() {
            if !self.link.wait_until_open(self.idle_poll) {
                continue;
            }

            if let PollOutcome::Failed(_) = self.poll_once() {
                // A dead adapter fails instantly; don't spin on it
                self.link.shutdown_token().sleep(self.idle_poll);
            }
        }

        info!("Receiver loop stopped");
    }

    /// Perform one read and handle its frame
    pub fn poll_once(&mut self) -> PollOutcome {
        if self.link.is_shutting_down() {
            return PollOutcome::Closed;
        }

        let frame = match self.link.read() {
            Ok(frame) => frame,
            Err(e) if e.is_timeout() => {
                self.failures = 0;
                return PollOutcome::Idle;
            }
            Err(e) if e.is_closed() || !self.link.is_open() || self.link.is_shutting_down() => {
                trace!("Read ended by close: {}", e);
                self.failures = 0;
                return PollOutcome::Closed;
            }
            Err(e) => {
                self.record_failure(&e);
                return PollOutcome::Failed(e);
            }
        };
        self.failures = 0;

        match Telemetry::from_frame(&frame) {
            Ok(Some(telemetry)) => {
                debug!(
                    "Telemetry: {:.1} V, {:.1} A",
                    telemetry.voltage, telemetry.current
                );
                self.events.publish(ChargerEvent::Telemetry(telemetry));
                PollOutcome::Telemetry(telemetry)
            }
            Ok(None) => PollOutcome::Ignored,
            Err(e) => {
                trace!("Discarding telemetry frame {}: {}", frame, e);
                PollOutcome::Malformed
            }
        }
    }

    /// Consecutive read failures so far
    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    fn record_failure(&mut self, error: &LinkError) {
        self.failures = self.failures.saturating_add(1);

        if self.failures == self.warn_threshold {
            warn!(
                "CAN read failing persistently ({} in a row): {}",
                self.failures, error
            );
            self.events.publish(ChargerEvent::ReceiveStalled {
                failures: self.failures,
            });
        } else {
            debug!("CAN read failed, retrying: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baud::BaudRate;
    use crate::constants::{ELCON_COMMAND_ID, ELCON_TELEMETRY_ID};
    use crate::frame::CanFrame;
    use crate::shutdown::ShutdownToken;
    use crate::virtual_bus::{VirtualBus, VirtualDriver};
    use crossbeam_channel::Receiver;
    use std::thread;

    fn setup(config: &ChargerConfig) -> (ReceiverLoop, Arc<CanLink>, VirtualBus, Receiver<ChargerEvent>) {
        let (driver, bus) = VirtualDriver::new(["vcan0"]);
        let token = ShutdownToken::new();
        let link = Arc::new(CanLink::new(
            driver,
            BaudRate::Kbps500,
            config.read_timeout,
            token.clone(),
        ));
        let (events, rx) = EventPublisher::channel(config.event_capacity, token);
        let receiver = ReceiverLoop::new(Arc::clone(&link), events, config);
        (receiver, link, bus, rx)
    }

    fn fast_config() -> ChargerConfig {
        ChargerConfig::default()
            .with_read_timeout(Duration::from_millis(5))
            .with_idle_poll(Duration::from_millis(5))
    }

    #[test]
    fn test_telemetry_is_published() {
        let (mut receiver, link, bus, rx) = setup(&fast_config());
        link.open(0, BaudRate::Kbps500).unwrap();

        bus.inject(CanFrame::extended(ELCON_TELEMETRY_ID, &[0x0F, 0xA0, 0x00, 0x64]));
        assert!(matches!(receiver.poll_once(), PollOutcome::Telemetry(_)));

        assert_eq!(
            rx.try_recv().unwrap(),
            ChargerEvent::Telemetry(Telemetry {
                voltage: 400.0,
                current: 10.0
            })
        );
    }

    #[test]
    fn test_foreign_frames_never_publish() {
        let (mut receiver, link, bus, rx) = setup(&fast_config());
        link.open(0, BaudRate::Kbps500).unwrap();

        let foreign = [
            CanFrame::extended(ELCON_COMMAND_ID, &[0x0F, 0xA0, 0x00, 0x64, 0x00]),
            CanFrame::extended(0x18FF_50E6, &[0x0F, 0xA0, 0x00, 0x64]),
            CanFrame::standard(0x0E5, &[0x0F, 0xA0, 0x00, 0x64]),
        ];
        for frame in foreign {
            bus.inject(frame);
            assert!(matches!(receiver.poll_once(), PollOutcome::Ignored));
        }

        assert!(rx.is_empty());
        assert_eq!(receiver.consecutive_failures(), 0);
    }

    #[test]
    fn test_short_telemetry_is_discarded() {
        let (mut receiver, link, bus, rx) = setup(&fast_config());
        link.open(0, BaudRate::Kbps500).unwrap();

        bus.inject(CanFrame::extended(ELCON_TELEMETRY_ID, &[0x0F, 0xA0]));
        assert!(matches!(receiver.poll_once(), PollOutcome::Malformed));
        assert!(rx.is_empty());
    }

    #[test]
    fn test_closed_link_is_not_an_error() {
        let (mut receiver, _link, _bus, rx) = setup(&fast_config());

        assert!(matches!(receiver.poll_once(), PollOutcome::Closed));
        assert_eq!(receiver.consecutive_failures(), 0);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_persistent_failures_are_reported_once() {
        let config = fast_config().with_read_failure_warn_threshold(3);
        let (mut receiver, link, bus, rx) = setup(&config);
        link.open(0, BaudRate::Kbps500).unwrap();

        bus.fail_reads(5);
        for _ in 0..5 {
            assert!(matches!(receiver.poll_once(), PollOutcome::Failed(_)));
        }
        assert_eq!(receiver.consecutive_failures(), 5);
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![ChargerEvent::ReceiveStalled { failures: 3 }]
        );

        // a quiet read means the adapter is responsive again
        assert!(matches!(receiver.poll_once(), PollOutcome::Idle));
        assert_eq!(receiver.consecutive_failures(), 0);
    }

    #[test]
    fn test_zero_threshold_reports_first_failure() {
        let mut config = fast_config();
        config.read_failure_warn_threshold = 0;
        let (mut receiver, link, bus, rx) = setup(&config);
        link.open(0, BaudRate::Kbps500).unwrap();

        bus.fail_reads(1);
        assert!(matches!(receiver.poll_once(), PollOutcome::Failed(_)));
        assert_eq!(
            rx.try_recv().unwrap(),
            ChargerEvent::ReceiveStalled { failures: 1 }
        );
    }

    #[test]
    fn test_run_exits_on_shutdown() {
        let (receiver, link, bus, rx) = setup(&fast_config());
        link.open(0, BaudRate::Kbps500).unwrap();
        let handle = thread::spawn(move || receiver.run());

        bus.inject(CanFrame::extended(ELCON_TELEMETRY_ID, &[0x0F, 0xA0, 0x00, 0x64]));
        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(event, ChargerEvent::Telemetry(_)));

        link.shutdown_token().terminate();
        link.notify_waiters();
        handle.join().unwrap();

        // nothing is published once shutdown is raised
        bus.inject(CanFrame::extended(ELCON_TELEMETRY_ID, &[0x0F, 0xA0, 0x00, 0x64]));
        assert!(rx.is_empty());
    }

    #[test]
    fn test_run_idles_while_closed() {
        let (receiver, link, bus, rx) = setup(&fast_config());
        let handle = thread::spawn(move || receiver.run());

        thread::sleep(Duration::from_millis(30));
        assert!(rx.is_empty());

        link.open(0, BaudRate::Kbps500).unwrap();
        bus.inject(CanFrame::extended(ELCON_TELEMETRY_ID, &[0x00, 0x64, 0x00, 0x0A]));
        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(
            event,
            ChargerEvent::Telemetry(Telemetry {
                voltage: 10.0,
                current: 1.0
            })
        );

        link.shutdown_token().terminate();
        handle.join().unwrap();
    }
}
