//! Sysfs attribute helpers

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use crate::error::Result;

/// Write a value to a sysfs attribute.
///
/// Sysfs attributes consume the value on the first write() syscall, so
/// the buffer (including the trailing newline) is assembled up front and
/// written once. Splitting the write can leave the kernel with partial
/// data or return EINVAL.
pub fn write_attr(path: &Path, value: &str) -> Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;

    let mut buf = Vec::with_capacity(value.len() + 1);
    buf.extend_from_slice(value.as_bytes());
    if !value.ends_with('\n') {
        buf.push(b'\n');
    }

    file.write_all(&buf)?;
    file.flush()?;
    Ok(())
}

/// Read and parse a sysfs attribute, `None` when missing or malformed
pub fn read_attr_parsed<T: FromStr>(path: &Path) -> Option<T> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse().ok()
}
