//! Device inventory over sysfs
//!
//! Reads the two class trees the daemon cares about directly instead of
//! going through libudev:
//! - `/sys/class/block`: partitions whose ancestor chain passes through
//!   the USB bus are candidates for gadget exposure
//! - `/sys/class/input`: devices with a HID ancestor decide the LED state
//!
//! Enumeration is a best-effort snapshot. Entries that vanish or cannot
//! be read mid-scan are skipped; a missing class directory yields an
//! empty result, not an error.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

/// One enumerated sysfs device
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    /// Kobject name (e.g. `sda1`, `event0`)
    pub name: String,
    /// Resolved path under the devices tree
    pub syspath: PathBuf,
    /// `DEVTYPE` from the uevent file, if any
    pub devtype: Option<String>,
    /// Device node derived from `DEVNAME`, if any
    pub devnode: Option<String>,
    /// Subsystems of the physical ancestor chain, nearest first
    ancestor_subsystems: Vec<String>,
}

impl DeviceRecord {
    /// Whether any ancestor of this device sits on the given bus
    pub fn on_bus(&self, bus: &str) -> bool {
        self.ancestor_subsystems.iter().any(|s| s == bus)
    }
}

/// A partition eligible for gadget exposure: a block device of type
/// `partition`, reachable through the USB bus, with a device node.
pub fn is_usb_partition(record: &DeviceRecord) -> bool {
    record.devtype.as_deref() == Some("partition")
        && record.devnode.is_some()
        && record.on_bus("usb")
}

/// An input device backed by a HID transport
pub fn is_hid_input(record: &DeviceRecord) -> bool {
    record.on_bus("hid")
}

/// The set of exposable partition nodes seen in one enumeration pass.
///
/// Node order is the directory iteration order of the scan and is not
/// stable across passes, so equality compares membership only. The
/// order is still kept: when more partitions exist than the gadget can
/// back, the first entries of the pass win.
#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    nodes: Vec<String>,
}

impl DeviceSnapshot {
    pub fn new(nodes: Vec<String>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl PartialEq for DeviceSnapshot {
    fn eq(&self, other: &Self) -> bool {
        let a: BTreeSet<&str> = self.nodes.iter().map(String::as_str).collect();
        let b: BTreeSet<&str> = other.nodes.iter().map(String::as_str).collect();
        a == b
    }
}

impl Eq for DeviceSnapshot {}

/// Read-only view of the devices currently attached to the board
pub trait Inventory: Send + Sync {
    /// Partitions eligible for gadget exposure
    fn usb_partitions(&self) -> DeviceSnapshot;

    /// Number of HID-backed input devices
    fn hid_device_count(&self) -> usize;
}

/// Inventory backed by the live sysfs tree
pub struct SysfsInventory {
    sys_root: PathBuf,
    dev_root: PathBuf,
}

impl SysfsInventory {
    /// Inventory over the system `/sys` and `/dev`
    pub fn new() -> Self {
        Self::with_roots("/sys", "/dev")
    }

    /// Inventory over alternate roots
    pub fn with_roots(sys_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        let sys_root = sys_root.into();
        // Resolved entry paths are compared against this root, so it has
        // to be in resolved form itself.
        let sys_root = fs::canonicalize(&sys_root).unwrap_or(sys_root);
        Self {
            sys_root,
            dev_root: dev_root.into(),
        }
    }

    /// Scan one sysfs class directory into device records
    fn scan_class(&self, class: &str) -> Vec<DeviceRecord> {
        let class_dir = self.sys_root.join("class").join(class);
        let entries = match fs::read_dir(&class_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot read {:?}: {}", class_dir, e);
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };

            let name = entry.file_name().to_string_lossy().to_string();
            match self.resolve(&entry.path(), &name) {
                Some(record) => records.push(record),
                None => debug!("Skipping unresolvable {} entry: {}", class, name),
            }
        }
        records
    }

    /// Resolve one class entry into a record, `None` if it went away
    fn resolve(&self, entry_path: &Path, name: &str) -> Option<DeviceRecord> {
        // Class entries are symlinks into the devices tree
        let syspath = fs::canonicalize(entry_path).ok()?;

        let mut devtype = None;
        let mut devnode = None;
        if let Ok(uevent) = fs::read_to_string(syspath.join("uevent")) {
            for line in uevent.lines() {
                match line.split_once('=') {
                    Some(("DEVTYPE", value)) => devtype = Some(value.to_string()),
                    Some(("DEVNAME", value)) => {
                        devnode = Some(self.dev_root.join(value).to_string_lossy().to_string())
                    }
                    _ => {}
                }
            }
        }

        Some(DeviceRecord {
            name: name.to_string(),
            ancestor_subsystems: self.ancestor_subsystems(&syspath),
            syspath,
            devtype,
            devnode,
        })
    }

    /// Subsystem names along the physical parent chain, nearest first.
    ///
    /// Parents without a `subsystem` link contribute nothing; the walk
    /// stops at the sysfs root.
    fn ancestor_subsystems(&self, syspath: &Path) -> Vec<String> {
        let mut subsystems = Vec::new();
        for dir in syspath.ancestors().skip(1) {
            if !dir.starts_with(&self.sys_root) {
                break;
            }
            if let Ok(target) = fs::read_link(dir.join("subsystem")) {
                if let Some(bus) = target.file_name().and_then(|n| n.to_str()) {
                    subsystems.push(bus.to_string());
                }
            }
        }
        subsystems
    }
}

impl Default for SysfsInventory {
    fn default() -> Self {
        Self::new()
    }
}

impl Inventory for SysfsInventory {
    fn usb_partitions(&self) -> DeviceSnapshot {
        let mut nodes = Vec::new();
        for record in self.scan_class("block") {
            if is_usb_partition(&record) {
                if let Some(node) = record.devnode {
                    debug!("USB partition: {} ({})", node, record.name);
                    nodes.push(node);
                }
            }
        }
        debug!("Enumerated {} USB partition(s)", nodes.len());
        DeviceSnapshot::new(nodes)
    }

    fn hid_device_count(&self) -> usize {
        let count = self
            .scan_class("input")
            .iter()
            .filter(|r| is_hid_input(r))
            .count();
        debug!("Enumerated {} HID input device(s)", count);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    /// Builds a sysfs-shaped tree inside a tempdir: a devices chain with
    /// `subsystem` links plus the class symlink pointing at its tail.
    struct SysTree {
        dir: tempfile::TempDir,
    }

    impl SysTree {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(dir.path().join("class/block")).unwrap();
            std::fs::create_dir_all(dir.path().join("class/input")).unwrap();
            Self { dir }
        }

        fn root(&self) -> &Path {
            self.dir.path()
        }

        fn inventory(&self) -> SysfsInventory {
            SysfsInventory::with_roots(self.root(), "/dev")
        }

        /// Add a device chain under `devices/` and link it from a class.
        /// `chain` is (directory name, optional subsystem) from the bus
        /// root down to the device itself.
        fn add_device(&self, class: &str, chain: &[(&str, Option<&str>)], uevent: &str) {
            let mut dir = self.root().join("devices");
            for (component, subsystem) in chain {
                dir = dir.join(component);
                std::fs::create_dir_all(&dir).unwrap();
                if let Some(bus) = subsystem {
                    let bus_dir = self.root().join("bus").join(bus);
                    std::fs::create_dir_all(&bus_dir).unwrap();
                    let link = dir.join("subsystem");
                    if !link.exists() {
                        symlink(&bus_dir, &link).unwrap();
                    }
                }
            }

            std::fs::write(dir.join("uevent"), uevent).unwrap();
            let leaf = chain.last().unwrap().0;
            symlink(&dir, self.root().join("class").join(class).join(leaf)).unwrap();
        }

        fn add_usb_partition(&self, disk: &str, part: &str) {
            self.add_device(
                "block",
                &[
                    ("usb1", Some("usb")),
                    ("1-1", Some("usb")),
                    ("host0", None),
                    (disk, Some("block")),
                    (part, Some("block")),
                ],
                &format!("DEVTYPE=partition\nDEVNAME={}\n", part),
            );
        }
    }

    #[test]
    fn test_usb_partition_enumerated() {
        let tree = SysTree::new();
        tree.add_usb_partition("sda", "sda1");

        let snapshot = tree.inventory().usb_partitions();
        assert_eq!(snapshot.nodes(), ["/dev/sda1".to_string()]);
    }

    #[test]
    fn test_non_usb_partition_rejected() {
        let tree = SysTree::new();
        tree.add_device(
            "block",
            &[
                ("pci0", Some("pci")),
                ("nvme0", Some("nvme")),
                ("nvme0n1", Some("block")),
                ("nvme0n1p1", Some("block")),
            ],
            "DEVTYPE=partition\nDEVNAME=nvme0n1p1\n",
        );

        assert!(tree.inventory().usb_partitions().is_empty());
    }

    #[test]
    fn test_whole_disk_rejected() {
        let tree = SysTree::new();
        tree.add_device(
            "block",
            &[("usb1", Some("usb")), ("sdb", Some("block"))],
            "DEVTYPE=disk\nDEVNAME=sdb\n",
        );

        assert!(tree.inventory().usb_partitions().is_empty());
    }

    #[test]
    fn test_partition_without_devname_rejected() {
        let tree = SysTree::new();
        tree.add_device(
            "block",
            &[("usb1", Some("usb")), ("sdc", Some("block")), ("sdc1", Some("block"))],
            "DEVTYPE=partition\n",
        );

        assert!(tree.inventory().usb_partitions().is_empty());
    }

    #[test]
    fn test_missing_class_dirs_give_empty_results() {
        let dir = tempfile::tempdir().unwrap();
        let inventory = SysfsInventory::with_roots(dir.path(), "/dev");

        assert!(inventory.usb_partitions().is_empty());
        assert_eq!(inventory.hid_device_count(), 0);
    }

    #[test]
    fn test_hid_inputs_counted() {
        let tree = SysTree::new();
        tree.add_device(
            "input",
            &[
                ("usb1", Some("usb")),
                ("1-2", Some("usb")),
                ("0003:046D", Some("hid")),
                ("input3", Some("input")),
                ("event3", Some("input")),
            ],
            "DEVNAME=input/event3\n",
        );
        // Board buttons sit on the platform bus, not HID
        tree.add_device(
            "input",
            &[("gpio-keys", Some("platform")), ("input0", Some("input"))],
            "",
        );

        assert_eq!(tree.inventory().hid_device_count(), 1);
    }

    #[test]
    fn test_snapshot_equality_ignores_order() {
        let a = DeviceSnapshot::new(vec!["/dev/sda1".into(), "/dev/sdb1".into()]);
        let b = DeviceSnapshot::new(vec!["/dev/sdb1".into(), "/dev/sda1".into()]);
        let c = DeviceSnapshot::new(vec!["/dev/sda1".into()]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, DeviceSnapshot::default());
    }

    #[test]
    fn test_record_bus_membership() {
        let tree = SysTree::new();
        tree.add_usb_partition("sda", "sda1");

        let records = tree.inventory().scan_class("block");
        assert_eq!(records.len(), 1);
        assert!(records[0].on_bus("usb"));
        assert!(!records[0].on_bus("pci"));
        assert!(is_usb_partition(&records[0]));
    }
}
