//! Daemon lifecycle
//!
//! Wires the pieces together and runs the event loop:
//!
//! ```text
//! Starting --> Running --> Terminating --> Restored
//! ```
//!
//! Starting covers the gadget preflight, opening the uevent socket,
//! taking over the LED bank and the first unconditional exposure. The
//! running loop blocks on hotplug events and reconciles once per wake.
//! Every path out of the loop, clean or fatal, passes through the LED
//! restore before the daemon exits.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::gadget::{self, GadgetExposure};
use crate::hotplug::{HotplugMonitor, Uevent};
use crate::inventory::{DeviceSnapshot, Inventory, SysfsInventory};
use crate::leds::{LedBank, LedOverride};
use crate::reconcile::Reconciler;

/// Lifecycle state, used for transition logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Preflight, socket setup and first exposure
    Starting,
    /// Blocking on hotplug events
    Running,
    /// Leaving the loop after a signal, fatal error or monitor loss
    Terminating,
    /// LED defaults written back
    Restored,
}

impl ServiceState {
    /// Get state name as string
    pub fn name_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Terminating => "terminating",
            Self::Restored => "restored",
        }
    }
}

/// Run the daemon until cancelled or a fatal error.
///
/// The uevent socket is opened before the first enumeration so devices
/// plugged during startup end up queued instead of lost.
pub async fn run(cancel: CancellationToken) -> Result<()> {
    info!("Service state: {}", ServiceState::Starting.name_str());

    gadget::preflight()?;

    let events = HotplugMonitor::spawn(cancel.clone())?;

    run_parts(
        Box::new(SysfsInventory::new()),
        GadgetExposure::new(),
        LedBank::new(),
        events,
        cancel,
    )
    .await
}

/// Lifecycle body over injectable parts
async fn run_parts(
    inventory: Box<dyn Inventory>,
    exposure: GadgetExposure,
    bank: LedBank,
    events: mpsc::Receiver<Uevent>,
    cancel: CancellationToken,
) -> Result<()> {
    let guard = LedOverride::engage(bank);
    let mut reconciler = Reconciler::new(inventory, exposure);

    let result = match reconciler.initialize(guard.bank()).await {
        Ok(snapshot) => {
            info!("Service state: {}", ServiceState::Running.name_str());
            drive(&mut reconciler, guard.bank(), events, &cancel, snapshot).await
        }
        Err(e) => Err(e),
    };

    info!("Service state: {}", ServiceState::Terminating.name_str());
    // Stops the monitor task when the loop exited on its own
    cancel.cancel();
    guard.restore();
    info!("Service state: {}", ServiceState::Restored.name_str());

    result
}

/// The running loop: one reconciliation pass per wake.
///
/// Returns `Ok` on cancellation and an error when a pass fails or the
/// event stream closes underneath us.
async fn drive(
    reconciler: &mut Reconciler,
    leds: &LedBank,
    mut events: mpsc::Receiver<Uevent>,
    cancel: &CancellationToken,
    mut snapshot: DeviceSnapshot,
) -> Result<()> {
    loop {
        tokio::select! {
            // Shutdown wins over queued events
            biased;

            _ = cancel.cancelled() => {
                info!("Shutdown requested");
                return Ok(());
            }
            received = events.recv() => {
                let event = match received {
                    Some(event) => event,
                    None => {
                        if cancel.is_cancelled() {
                            info!("Shutdown requested");
                            return Ok(());
                        }
                        return Err(AppError::Hotplug("uevent stream closed".to_string()));
                    }
                };

                debug!("Woken by {} {}", event.action.name_str(), event.devpath);

                // A replug or partition rescan arrives as a burst of
                // uevents; one pass covers all of them
                let mut coalesced = 0;
                while events.try_recv().is_ok() {
                    coalesced += 1;
                }
                if coalesced > 0 {
                    debug!("Coalesced {} queued event(s)", coalesced);
                }

                let outcome = reconciler.reconcile(leds, snapshot).await?;
                snapshot = outcome.snapshot;
            }
        }
    }
}
