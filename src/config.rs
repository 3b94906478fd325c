//! Compile-time hardware configuration
//!
//! The LED bank and gadget parameters describe fixed board wiring and
//! kernel driver limits, so they live here as constants rather than in
//! a runtime configuration file.

/// Sysfs LED class root
pub const LED_CLASS_PATH: &str = "/sys/class/leds";

/// Status LED bank: sysfs name and the trigger the board boots with.
///
/// The default triggers are what the stock device tree assigns, so
/// restoring them returns the board to its out-of-the-box behavior.
pub const LED_BANK: [(&str, &str); 4] = [
    ("beaglebone:green:usr0", "heartbeat"),
    ("beaglebone:green:usr1", "mmc0"),
    ("beaglebone:green:usr2", "cpu0"),
    ("beaglebone:green:usr3", "mmc1"),
];

/// Brightness used when `max_brightness` cannot be read
pub const DEFAULT_MAX_BRIGHTNESS: u32 = 255;

/// Mass storage gadget kernel module
pub const GADGET_MODULE: &str = "g_mass_storage";

/// Composite gadget modules that claim the same UDC port.
///
/// Loading `g_mass_storage` while one of these is active would fail or
/// detach the composite gadget, so startup refuses to proceed.
pub const CONFLICTING_MODULES: &[&str] = &["g_multi"];

/// Loaded module table
pub const PROC_MODULES_PATH: &str = "/proc/modules";

/// The gadget driver accepts at most this many backing files
pub const MAX_BACKING_FILES: usize = 8;

/// Capacity of the hotplug event channel.
///
/// A partition table rescan emits a burst of uevents; the channel only
/// has to absorb one burst because the loop drains it on every wake.
pub const HOTPLUG_CHANNEL_CAPACITY: usize = 64;
