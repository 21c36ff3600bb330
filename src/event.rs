//! Events published from the worker loops to the display
//!
//! Worker loops never touch UI-owned objects. They publish `ChargerEvent`s on
//! a bounded channel which the UI context drains at its own pace.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::trace;

use crate::codec::Telemetry;
use crate::shutdown::ShutdownToken;

/// Event delivered to the display collaborator
#[derive(Debug, Clone, PartialEq)]
pub enum ChargerEvent {
    /// A telemetry frame was decoded
    Telemetry(Telemetry),
    /// Reads have failed `failures` times in a row while the link is open
    ReceiveStalled { failures: u32 },
}

/// Sending half of the event channel, muted once shutdown is signalled
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: Sender<ChargerEvent>,
    shutdown: ShutdownToken,
}

impl EventPublisher {
    /// Create a channel holding at most `capacity` undelivered events
    ///
    /// A capacity of zero is raised to one.
    pub fn channel(capacity: usize, shutdown: ShutdownToken) -> (Self, Receiver<ChargerEvent>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { tx, shutdown }, rx)
    }

    /// Publish an event without blocking
    ///
    /// Returns `false` if the event was dropped: shutdown was signalled, the
    /// display is not keeping up, or it has gone away.
    pub fn publish(&self, event: ChargerEvent) -> bool {
        if self.shutdown.is_terminated() {
            return false;
        }

        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                trace!("Event channel full, dropping {:?}", event);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telemetry() -> ChargerEvent {
        ChargerEvent::Telemetry(Telemetry {
            voltage: 400.0,
            current: 10.0,
        })
    }

    #[test]
    fn test_publish_delivers() {
        let (publisher, rx) = EventPublisher::channel(4, ShutdownToken::new());
        assert!(publisher.publish(telemetry()));
        assert_eq!(rx.try_recv().unwrap(), telemetry());
    }

    #[test]
    fn test_zero_capacity_still_buffers() {
        let (publisher, rx) = EventPublisher::channel(0, ShutdownToken::new());
        assert!(publisher.publish(telemetry()));
        assert_eq!(rx.try_recv().unwrap(), telemetry());
    }

    #[test]
    fn test_publish_drops_when_full() {
        let (publisher, rx) = EventPublisher::channel(1, ShutdownToken::new());
        assert!(publisher.publish(telemetry()));
        assert!(!publisher.publish(ChargerEvent::ReceiveStalled { failures: 3 }));
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn test_publish_muted_after_shutdown() {
        let token = ShutdownToken::new();
        let (publisher, rx) = EventPublisher::channel(4, token.clone());

        token.terminate();
        assert!(!publisher.publish(telemetry()));
        assert!(rx.is_empty());
    }

    #[test]
    fn test_publish_after_display_dropped() {
        let (publisher, rx) = EventPublisher::channel(4, ShutdownToken::new());
        drop(rx);
        assert!(!publisher.publish(telemetry()));
    }
}
