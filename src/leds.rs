//! Status LED bank
//!
//! Drives the board's four user LEDs through the sysfs LED class.
//! The bank has three states:
//! - solid on: trigger `none` plus full brightness, shown while no HID
//!   device is attached
//! - blink: trigger `heartbeat` on every LED, shown while at least one
//!   HID device is attached (a shared trigger keeps the bank in phase)
//! - restored: each LED back on the trigger the board boots with
//!
//! Every write is best effort. A missing or unwritable LED is logged
//! and skipped so the remaining LEDs still follow the state machine.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::{DEFAULT_MAX_BRIGHTNESS, LED_BANK, LED_CLASS_PATH};
use crate::sysfs;

/// One LED class device
struct Led {
    name: String,
    dir: PathBuf,
    default_trigger: String,
    max_brightness: u32,
}

impl Led {
    fn new(root: &Path, name: &str, default_trigger: &str) -> Self {
        let dir = root.join(name);
        let max_brightness = sysfs::read_attr_parsed(&dir.join("max_brightness"))
            .unwrap_or(DEFAULT_MAX_BRIGHTNESS);

        Self {
            name: name.to_string(),
            dir,
            default_trigger: default_trigger.to_string(),
            max_brightness,
        }
    }

    fn set_trigger(&self, trigger: &str) {
        if let Err(e) = sysfs::write_attr(&self.dir.join("trigger"), trigger) {
            warn!("Failed to set trigger '{}' on {}: {}", trigger, self.name, e);
        }
    }

    fn set_brightness(&self, value: u32) {
        if let Err(e) = sysfs::write_attr(&self.dir.join("brightness"), &value.to_string()) {
            warn!("Failed to set brightness {} on {}: {}", value, self.name, e);
        }
    }
}

/// The four status LEDs, driven as one unit
pub struct LedBank {
    leds: Vec<Led>,
}

impl LedBank {
    /// Create the bank over the system LED class path
    pub fn new() -> Self {
        Self::with_root(Path::new(LED_CLASS_PATH))
    }

    /// Create the bank over an alternate LED class root
    pub fn with_root(root: &Path) -> Self {
        let leds = LED_BANK
            .iter()
            .map(|(name, trigger)| Led::new(root, name, trigger))
            .collect();
        Self { leds }
    }

    /// Solid on: trigger `none`, then full brightness
    pub fn all_on(&self) {
        debug!("LED bank: solid on");
        for led in &self.leds {
            led.set_trigger("none");
            led.set_brightness(led.max_brightness);
        }
    }

    /// Synchronized blink via the shared `heartbeat` trigger
    pub fn blink_all(&self) {
        debug!("LED bank: heartbeat blink");
        for led in &self.leds {
            led.set_trigger("heartbeat");
        }
    }

    /// Put every LED back on its boot default trigger
    pub fn restore_all(&self) {
        info!("Restoring LED default triggers");
        for led in &self.leds {
            led.set_trigger(&led.default_trigger);
        }
    }
}

impl Default for LedBank {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the LED bank for the lifetime of the daemon.
///
/// `restore_all` runs exactly once per override: through the consuming
/// `restore` call on the normal shutdown path, or through `Drop` when
/// the service unwinds. Either way it is the last LED action taken.
pub struct LedOverride {
    bank: LedBank,
    restored: bool,
}

impl LedOverride {
    /// Take over the bank; from here on restoration is guaranteed
    pub fn engage(bank: LedBank) -> Self {
        Self {
            bank,
            restored: false,
        }
    }

    /// The bank under override
    pub fn bank(&self) -> &LedBank {
        &self.bank
    }

    /// Restore default triggers and release the bank
    pub fn restore(mut self) {
        self.restore_inner();
    }

    fn restore_inner(&mut self) {
        if !self.restored {
            self.restored = true;
            self.bank.restore_all();
        }
    }
}

impl Drop for LedOverride {
    fn drop(&mut self) {
        self.restore_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn led_fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, _) in LED_BANK {
            let led_dir = dir.path().join(name);
            std::fs::create_dir(&led_dir).unwrap();
            std::fs::write(led_dir.join("trigger"), "").unwrap();
            std::fs::write(led_dir.join("brightness"), "0\n").unwrap();
            std::fs::write(led_dir.join("max_brightness"), "127\n").unwrap();
        }
        dir
    }

    // Fixture files are plain files, so a short write leaves the tail of
    // a previous longer value in place. The first line is the value the
    // last write produced.
    fn first_line(dir: &tempfile::TempDir, led: &str, attr: &str) -> String {
        let content = std::fs::read_to_string(dir.path().join(led).join(attr)).unwrap();
        content.lines().next().unwrap_or_default().to_string()
    }

    #[test]
    fn test_all_on_sets_none_and_max_brightness() {
        let dir = led_fixture();
        let bank = LedBank::with_root(dir.path());

        bank.all_on();

        for (name, _) in LED_BANK {
            assert_eq!(first_line(&dir, name, "trigger"), "none");
            assert_eq!(first_line(&dir, name, "brightness"), "127");
        }
    }

    #[test]
    fn test_all_on_falls_back_to_default_brightness() {
        let dir = led_fixture();
        let led_dir = dir.path().join(LED_BANK[0].0);
        std::fs::remove_file(led_dir.join("max_brightness")).unwrap();
        let bank = LedBank::with_root(dir.path());

        bank.all_on();

        assert_eq!(first_line(&dir, LED_BANK[0].0, "brightness"), "255");
        assert_eq!(first_line(&dir, LED_BANK[1].0, "brightness"), "127");
    }

    #[test]
    fn test_blink_all_sets_heartbeat() {
        let dir = led_fixture();
        let bank = LedBank::with_root(dir.path());

        bank.blink_all();

        for (name, _) in LED_BANK {
            assert_eq!(first_line(&dir, name, "trigger"), "heartbeat");
        }
    }

    #[test]
    fn test_restore_all_writes_per_led_defaults() {
        let dir = led_fixture();
        let bank = LedBank::with_root(dir.path());

        bank.blink_all();
        bank.restore_all();

        for (name, default_trigger) in LED_BANK {
            assert_eq!(first_line(&dir, name, "trigger"), default_trigger);
        }
    }

    #[test]
    fn test_missing_led_does_not_block_the_rest() {
        let dir = led_fixture();
        std::fs::remove_dir_all(dir.path().join(LED_BANK[0].0)).unwrap();
        let bank = LedBank::with_root(dir.path());

        bank.blink_all();

        for (name, _) in &LED_BANK[1..] {
            assert_eq!(first_line(&dir, name, "trigger"), "heartbeat");
        }
    }

    #[test]
    fn test_override_restores_on_drop() {
        let dir = led_fixture();

        {
            let guard = LedOverride::engage(LedBank::with_root(dir.path()));
            guard.bank().blink_all();
        }

        for (name, default_trigger) in LED_BANK {
            assert_eq!(first_line(&dir, name, "trigger"), default_trigger);
        }
    }

    #[test]
    fn test_override_explicit_restore() {
        let dir = led_fixture();
        let guard = LedOverride::engage(LedBank::with_root(dir.path()));

        guard.bank().all_on();
        guard.restore();

        for (name, default_trigger) in LED_BANK {
            assert_eq!(first_line(&dir, name, "trigger"), default_trigger);
        }
    }
}
