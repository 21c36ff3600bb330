//! Charger session: link, worker threads and controller wired together
//!
//! # Example
//!
//! ```
//! use elcon_can::{Charger, ChargerConfig, ChargerEvent, SharedSetpoints, VirtualDriver};
//! use std::sync::Arc;
//!
//! let (driver, _bus) = VirtualDriver::new(["vcan0"]);
//! let setpoints = Arc::new(SharedSetpoints::new(400.0, 10.0));
//! let (mut charger, events) = Charger::start(driver, ChargerConfig::default(), setpoints)?;
//!
//! charger.controller().connect(0, 1)?;
//! charger.controller().start_charging()?;
//!
//! for event in events.try_iter() {
//!     if let ChargerEvent::Telemetry(t) = event {
//!         println!("{:.1} V {:.1} A", t.voltage, t.current);
//!     }
//! }
//!
//! charger.shutdown();
//! # Ok::<(), elcon_can::LinkError>(())
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use log::{error, info, warn};

use crate::config::ChargerConfig;
use crate::controller::ConnectionController;
use crate::driver::CanDriver;
use crate::error::{LinkError, Result};
use crate::event::{ChargerEvent, EventPublisher};
use crate::link::CanLink;
use crate::receiver::ReceiverLoop;
use crate::shutdown::ShutdownToken;
use crate::transmitter::{ChargeControl, SetpointSource, TransmitterLoop};

/// Running charger session
pub struct Charger {
    link: Arc<CanLink>,
    controller: ConnectionController,
    shutdown: ShutdownToken,
    workers: Vec<JoinHandle<()>>,
}

impl Charger {
    /// Create the link around `driver` and start the receive and transmit loops
    ///
    /// The link starts closed. Telemetry is delivered on the returned
    /// receiver. Failing to start a worker thread is the only startup error.
    pub fn start<D>(
        driver: D,
        config: ChargerConfig,
        setpoints: Arc<dyn SetpointSource>,
    ) -> Result<(Self, Receiver<ChargerEvent>)>
    where
        D: CanDriver + 'static,
    {
        let shutdown = ShutdownToken::new();
        let link = Arc::new(CanLink::new(
            driver,
            config.initial_baud,
            config.read_timeout,
            shutdown.clone(),
        ));
        let control = Arc::new(ChargeControl::new());
        let (events, rx) = EventPublisher::channel(config.event_capacity, shutdown.clone());

        let mut charger = Self {
            controller: ConnectionController::new(Arc::clone(&link), Arc::clone(&control)),
            link: Arc::clone(&link),
            shutdown,
            workers: Vec::with_capacity(2),
        };

        let receiver = ReceiverLoop::new(Arc::clone(&link), events, &config);
        charger.spawn("elcon-rx", move || receiver.run())?;

        let transmitter = TransmitterLoop::new(link, control, setpoints, config.transmit_period);
        charger.spawn("elcon-tx", move || transmitter.run())?;

        info!("Charger started ({:?})", config);
        Ok((charger, rx))
    }

    fn spawn<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        match thread::Builder::new().name(name.to_string()).spawn(f) {
            Ok(handle) => {
                self.workers.push(handle);
                Ok(())
            }
            Err(e) => {
                error!("Failed to start {} thread: {}", name, e);
                // Drop stops any worker already running
                Err(LinkError::Spawn(e))
            }
        }
    }

    /// Controller for user intents; use from the UI context only
    pub fn controller(&mut self) -> &mut ConnectionController {
        &mut self.controller
    }

    /// Shared link
    pub fn link(&self) -> &Arc<CanLink> {
        &self.link
    }

    /// Check if shutdown has been signalled
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_terminated()
    }

    /// Stop the session
    ///
    /// Raises the shutdown signal, closes the link if open and waits for both
    /// loops to finish. Calling it again is a no-op.
    pub fn shutdown(&mut self) {
        if self.shutdown.is_terminated() && self.workers.is_empty() {
            return;
        }

        info!("Charger shutting down");
        self.shutdown.terminate();
        self.link.notify_waiters();

        if let Err(e) = self.controller.disconnect() {
            warn!("Close during shutdown failed: {}", e);
        }
        // The link may have been opened directly rather than through the controller
        if let Err(e) = self.link.close() {
            warn!("Close during shutdown failed: {}", e);
        }

        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                warn!("{} thread panicked", name);
            }
        }
        info!("Charger stopped");
    }
}

impl Drop for Charger {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Charger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Charger")
            .field("link", &self.link)
            .field("controller", &self.controller)
            .field("workers", &self.workers.len())
            .finish()
    }
}
