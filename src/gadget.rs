//! USB mass storage gadget exposure
//!
//! `g_mass_storage` takes its backing files as a load-time parameter
//! and cannot be reconfigured in place, so the only way to change the
//! exposed set is to unload the module and load it again with a fresh
//! `file=` argument. The unload runs unconditionally and its failure is
//! ignored (on first run the module is simply not loaded yet). A failed
//! load leaves the host-facing port in an unknown state and is fatal.

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{CONFLICTING_MODULES, GADGET_MODULE, MAX_BACKING_FILES, PROC_MODULES_PATH};
use crate::error::{AppError, Result};
use crate::inventory::DeviceSnapshot;

/// Kernel module loading seam
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Remove the module from the kernel
    async fn unload(&self, module: &str) -> Result<()>;

    /// Load the module with one parameter
    async fn load(&self, module: &str, parameter: &str) -> Result<()>;
}

/// Loader shelling out to rmmod and modprobe
pub struct Modprobe;

#[async_trait]
impl ModuleLoader for Modprobe {
    async fn unload(&self, module: &str) -> Result<()> {
        debug!("rmmod {}", module);
        let output = Command::new("rmmod").arg(module).output().await?;
        if !output.status.success() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!(
                    "rmmod {} exited with {}: {}",
                    module,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            )
            .into());
        }
        Ok(())
    }

    async fn load(&self, module: &str, parameter: &str) -> Result<()> {
        debug!("modprobe {} {}", module, parameter);
        let output = Command::new("modprobe")
            .arg(module)
            .arg(parameter)
            .output()
            .await?;
        if !output.status.success() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!(
                    "modprobe {} exited with {}: {}",
                    module,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            )
            .into());
        }
        Ok(())
    }
}

/// Backing set for one gadget load, capped at the driver limit
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GadgetConfig {
    files: Vec<String>,
}

impl GadgetConfig {
    /// Take the first `MAX_BACKING_FILES` nodes of a snapshot, in scan order
    pub fn from_snapshot(snapshot: &DeviceSnapshot) -> Self {
        let files = snapshot
            .nodes()
            .iter()
            .take(MAX_BACKING_FILES)
            .cloned()
            .collect();
        Self { files }
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The `file=` module parameter, `None` when nothing is exposed
    pub fn module_parameter(&self) -> Option<String> {
        if self.files.is_empty() {
            None
        } else {
            Some(format!("file={}", self.files.join(",")))
        }
    }
}

/// Owns the backing set currently applied to the gadget.
///
/// The set is replaced wholesale per reconfiguration; nothing else in
/// the process touches the module table.
pub struct GadgetExposure {
    loader: Box<dyn ModuleLoader>,
    current: GadgetConfig,
}

impl GadgetExposure {
    pub fn new() -> Self {
        Self::with_loader(Box::new(Modprobe))
    }

    pub fn with_loader(loader: Box<dyn ModuleLoader>) -> Self {
        Self {
            loader,
            current: GadgetConfig::default(),
        }
    }

    /// The last successfully applied backing set
    pub fn current(&self) -> &GadgetConfig {
        &self.current
    }

    /// Replace the exposed set with the partitions in `snapshot`
    pub async fn expose(&mut self, snapshot: &DeviceSnapshot) -> Result<()> {
        let config = GadgetConfig::from_snapshot(snapshot);
        if snapshot.len() > config.files().len() {
            warn!(
                "{} partition(s) found, exposing the first {} (driver limit)",
                snapshot.len(),
                config.files().len()
            );
        }

        if let Err(e) = self.loader.unload(GADGET_MODULE).await {
            debug!("Ignoring {} unload failure: {}", GADGET_MODULE, e);
        }

        match config.module_parameter() {
            Some(parameter) => {
                info!(
                    "Exposing {} partition(s) via {}",
                    config.files().len(),
                    GADGET_MODULE
                );
                self.loader
                    .load(GADGET_MODULE, &parameter)
                    .await
                    .map_err(|e| AppError::GadgetLoad {
                        module: GADGET_MODULE.to_string(),
                        reason: e.to_string(),
                    })?;
            }
            None => {
                info!("No USB partitions to expose, {} left unloaded", GADGET_MODULE);
            }
        }

        self.current = config;
        Ok(())
    }
}

impl Default for GadgetExposure {
    fn default() -> Self {
        Self::new()
    }
}

/// Refuse to start while a composite gadget owns the UDC port.
///
/// Loading `g_mass_storage` on top of one would either fail or tear the
/// composite gadget down, so this is checked once before the first
/// exposure.
pub fn preflight() -> Result<()> {
    preflight_at(Path::new(PROC_MODULES_PATH))
}

fn preflight_at(proc_modules: &Path) -> Result<()> {
    let loaded = match fs::read_to_string(proc_modules) {
        Ok(contents) => contents,
        Err(e) => {
            debug!("Cannot read {:?}, skipping module check: {}", proc_modules, e);
            return Ok(());
        }
    };

    for line in loaded.lines() {
        if let Some(module) = line.split_whitespace().next() {
            if CONFLICTING_MODULES.contains(&module) {
                return Err(AppError::ConflictingGadget(module.to_string()));
            }
        }
    }
    Ok(())
}
