//! gooddog - USB mass storage gadget watchdog
//!
//! This crate keeps the partitions of locally attached USB storage
//! exposed to a host computer through the `g_mass_storage` gadget and
//! mirrors USB HID presence on the board's status LEDs, reacting to
//! kernel hotplug events.

pub mod config;
pub mod error;
pub mod gadget;
pub mod hotplug;
pub mod inventory;
pub mod leds;
pub mod reconcile;
pub mod service;
pub mod sysfs;

pub use error::{AppError, Result};
