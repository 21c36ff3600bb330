//! Charger session configuration

use std::time::Duration;

use crate::baud::BaudRate;
use crate::constants::{
    DEFAULT_EVENT_CAPACITY, DEFAULT_IDLE_POLL, DEFAULT_READ_FAILURE_WARN_THRESHOLD,
    DEFAULT_READ_TIMEOUT, DEFAULT_TRANSMIT_PERIOD,
};

/// Tunables for a charger session
///
/// ```
/// use elcon_can::{BaudRate, ChargerConfig};
/// use std::time::Duration;
///
/// let config = ChargerConfig::default()
///     .with_initial_baud(BaudRate::Kbps250)
///     .with_transmit_period(Duration::from_millis(500));
/// assert_eq!(config.initial_baud, BaudRate::Kbps250);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ChargerConfig {
    /// Baud rate configured on the adapter at startup
    pub initial_baud: BaudRate,
    /// Charge command period
    pub transmit_period: Duration,
    /// Upper bound of one blocking read
    pub read_timeout: Duration,
    /// Receiver wait granularity while the link is closed
    pub idle_poll: Duration,
    /// Capacity of the event channel
    pub event_capacity: usize,
    /// Consecutive read failures reported as a stall
    pub read_failure_warn_threshold: u32,
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            initial_baud: BaudRate::default(),
            transmit_period: DEFAULT_TRANSMIT_PERIOD,
            read_timeout: DEFAULT_READ_TIMEOUT,
            idle_poll: DEFAULT_IDLE_POLL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            read_failure_warn_threshold: DEFAULT_READ_FAILURE_WARN_THRESHOLD,
        }
    }
}

impl ChargerConfig {
    /// Set the baud rate configured on the adapter at startup
    pub fn with_initial_baud(mut self, baud: BaudRate) -> Self {
        self.initial_baud = baud;
        self
    }

    /// Set the charge command period
    pub fn with_transmit_period(mut self, period: Duration) -> Self {
        self.transmit_period = period;
        self
    }

    /// Set the upper bound of one blocking read
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set how often the receiver re-checks a closed link
    pub fn with_idle_poll(mut self, poll: Duration) -> Self {
        self.idle_poll = poll;
        self
    }

    /// Zero is raised to one, a channel must hold at least one event
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Zero is raised to one
    pub fn with_read_failure_warn_threshold(mut self, threshold: u32) -> Self {
        self.read_failure_warn_threshold = threshold.max(1);
        self
    }
}
