//! Reconciliation engine
//!
//! One pass per wakeup, always in the same order: drive the LED bank
//! from HID presence, then re-enumerate partitions and reconfigure the
//! gadget only when the set actually differs from the previous pass.
//! The previous set travels through `ReconcileOutcome` rather than any
//! shared state, so a pass is a pure fold step over the event stream.

use tracing::{debug, info};

use crate::error::Result;
use crate::gadget::GadgetExposure;
use crate::inventory::{DeviceSnapshot, Inventory};
use crate::leds::LedBank;

/// Result of one reconciliation pass, input to the next
#[derive(Debug)]
pub struct ReconcileOutcome {
    /// Partition set seen by this pass
    pub snapshot: DeviceSnapshot,
    /// Whether the gadget was reconfigured
    pub changed: bool,
    /// Whether at least one HID device was attached
    pub hid_present: bool,
}

/// Applies LED state and gadget exposure policy to the device inventory
pub struct Reconciler {
    inventory: Box<dyn Inventory>,
    gadget: GadgetExposure,
}

impl Reconciler {
    pub fn new(inventory: Box<dyn Inventory>, gadget: GadgetExposure) -> Self {
        Self { inventory, gadget }
    }

    /// Startup pass.
    ///
    /// Applies the LED state and exposes whatever is attached without
    /// comparing against anything, so the gadget is brought to a known
    /// configuration even when no partition is present.
    pub async fn initialize(&mut self, leds: &LedBank) -> Result<DeviceSnapshot> {
        self.update_leds(leds);

        let snapshot = self.inventory.usb_partitions();
        info!("Initial exposure of {} partition(s)", snapshot.len());
        self.gadget.expose(&snapshot).await?;
        Ok(snapshot)
    }

    /// Steady-state pass: LEDs every time, gadget only on change
    pub async fn reconcile(
        &mut self,
        leds: &LedBank,
        previous: DeviceSnapshot,
    ) -> Result<ReconcileOutcome> {
        let hid_present = self.update_leds(leds);

        let snapshot = self.inventory.usb_partitions();
        let changed = snapshot != previous;
        if changed {
            info!(
                "USB partitions changed ({} -> {} node(s))",
                previous.len(),
                snapshot.len()
            );
            self.gadget.expose(&snapshot).await?;
        } else {
            debug!("USB partitions unchanged ({} node(s))", snapshot.len());
        }

        Ok(ReconcileOutcome {
            snapshot,
            changed,
            hid_present,
        })
    }

    /// Drive the LED bank from HID presence
    fn update_leds(&self, leds: &LedBank) -> bool {
        let hid_present = self.inventory.hid_device_count() > 0;
        if hid_present {
            leds.blink_all();
        } else {
            leds.all_on();
        }
        hid_present
    }
}
