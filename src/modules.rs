//! Peripheral module subsystem boundary.
//!
//! Modules are the deck peripherals (temperature deck, magnetic deck)
//! reached over their own USB-serial ports, separate from the motion board.
//! The core only needs three capabilities from whatever concrete family is
//! plugged in (discover, build, update firmware), captured by the
//! [`ModuleBus`] trait. Discovery and flashing internals live with the
//! peripheral implementation, not here.
//!
//! Known module families are kept in a registry keyed by model name, so a
//! bus implementation can validate a model before handing out a handle.

use crate::error::{HwError, HwResult};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Module families the robot knows how to drive.
pub const KNOWN_MODELS: [&str; 2] = ["tempdeck", "magdeck"];

/// Whether `model` names a known module family.
pub fn is_known_model(model: &str) -> bool {
    KNOWN_MODELS.contains(&model)
}

/// Handle to one attached peripheral module.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleHandle {
    /// Serial port the module is reached on.
    pub port: String,
    /// Module family model name.
    pub model: String,
    /// Whether the handle drives a simulated module.
    pub simulated: bool,
    /// Firmware version reported by (or flashed onto) the module.
    pub firmware_version: String,
}

/// Capability surface required from the module subsystem.
pub trait ModuleBus: Send {
    /// List attached modules as `(port, model)` pairs.
    fn discover(&mut self) -> HwResult<Vec<(String, String)>>;

    /// Build a handle for the module at `port`.
    fn build(&mut self, port: &str, model: &str, simulate: bool) -> HwResult<ModuleHandle>;

    /// Flash the image at `firmware_path` onto `module` and return the
    /// rebuilt handle.
    fn update_firmware(
        &mut self,
        module: ModuleHandle,
        firmware_path: &Path,
    ) -> HwResult<ModuleHandle>;
}

/// Module bus with a configurable set of attached simulated modules.
///
/// Serves the virtual backend and tests; `build` validates models against
/// the registry exactly like a real bus would.
pub struct SimulatedModuleBus {
    attached: Vec<(String, String)>,
}

impl SimulatedModuleBus {
    /// A bus with no modules attached.
    pub fn empty() -> Self {
        Self {
            attached: Vec::new(),
        }
    }

    /// A bus with the given `(port, model)` pairs attached.
    pub fn with_modules(attached: Vec<(String, String)>) -> Self {
        Self { attached }
    }
}

impl ModuleBus for SimulatedModuleBus {
    fn discover(&mut self) -> HwResult<Vec<(String, String)>> {
        Ok(self.attached.clone())
    }

    fn build(&mut self, port: &str, model: &str, simulate: bool) -> HwResult<ModuleHandle> {
        if !is_known_model(model) {
            return Err(HwError::UnknownModule(model.to_string()));
        }
        Ok(ModuleHandle {
            port: port.to_string(),
            model: model.to_string(),
            simulated: simulate,
            firmware_version: "v1.0.0".to_string(),
        })
    }

    fn update_firmware(
        &mut self,
        module: ModuleHandle,
        firmware_path: &Path,
    ) -> HwResult<ModuleHandle> {
        if !firmware_path.exists() {
            return Err(HwError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("firmware image {} not found", firmware_path.display()),
            )));
        }
        // Version tag taken from the image filename stem, as the flash tool
        // reports it.
        let version = firmware_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());
        info!(
            "flashed {} onto {} module at {}",
            firmware_path.display(),
            module.model,
            module.port
        );
        Ok(ModuleHandle {
            firmware_version: version,
            ..module
        })
    }
}

/// Module bus backed by the deck's USB-serial tree.
///
/// Modules enumerate under a well-known device directory with their model
/// name embedded in the port name (e.g. `/dev/modules/tty-tempdeck0`).
/// Firmware updates hand the image to `avrdude`, which talks to the
/// module's bootloader over its port.
pub struct DeckModuleBus {
    dev_dir: std::path::PathBuf,
}

impl DeckModuleBus {
    /// A bus scanning `dev_dir` for enumerated modules.
    pub fn new(dev_dir: std::path::PathBuf) -> Self {
        Self { dev_dir }
    }
}

impl ModuleBus for DeckModuleBus {
    fn discover(&mut self) -> HwResult<Vec<(String, String)>> {
        // A missing directory just means no modules have enumerated.
        let Ok(entries) = std::fs::read_dir(&self.dev_dir) else {
            return Ok(Vec::new());
        };
        let mut found = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(model) = KNOWN_MODELS.iter().find(|model| name.contains(*model)) {
                found.push((
                    entry.path().to_string_lossy().into_owned(),
                    (*model).to_string(),
                ));
            }
        }
        Ok(found)
    }

    fn build(&mut self, port: &str, model: &str, simulate: bool) -> HwResult<ModuleHandle> {
        if !is_known_model(model) {
            return Err(HwError::UnknownModule(model.to_string()));
        }
        Ok(ModuleHandle {
            port: port.to_string(),
            model: model.to_string(),
            simulated: simulate,
            firmware_version: "unknown".to_string(),
        })
    }

    fn update_firmware(
        &mut self,
        module: ModuleHandle,
        firmware_path: &Path,
    ) -> HwResult<ModuleHandle> {
        if !firmware_path.exists() {
            return Err(HwError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("firmware image {} not found", firmware_path.display()),
            )));
        }
        let status = std::process::Command::new("avrdude")
            .args(["-patmega32u4", "-cavr109"])
            .arg(format!("-P{}", module.port))
            .args(["-b57600", "-D"])
            .arg(format!("-Uflash:w:{}:i", firmware_path.display()))
            .status()?;
        if !status.success() {
            return Err(HwError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("avrdude exited with {status} flashing {}", module.port),
            )));
        }
        let version = firmware_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());
        info!(
            "flashed {} onto {} module at {}",
            firmware_path.display(),
            module.model,
            module.port
        );
        Ok(ModuleHandle {
            firmware_version: version,
            ..module
        })
    }
}
