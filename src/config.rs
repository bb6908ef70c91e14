//! Application settings.
//!
//! Settings are loaded with the `config` crate in three layers: programmed
//! defaults, an optional TOML file, and `BENCHBOT_*` environment overrides
//! (double underscore separates nesting, e.g. `BENCHBOT_BOOT__SIMULATE=true`).
//!
//! Two well-known environment switches seed the defaults before the layers
//! are applied, so they keep working without any config file:
//!
//! - `ENABLE_VIRTUAL_SMOOTHIE`: presence selects the simulated backend
//!   unconditionally.
//! - `RUNNING_ON_ROBOT`: presence marks this host as the robot; real
//!   hardware construction and the system firmware directory are only
//!   consulted when it is set.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

/// Default path of the host-level controller lock file.
pub const DEFAULT_LOCK_FILE: &str = "/tmp/benchbot-hardware.lock";

/// Default system firmware directory, searched first when on the robot.
pub const DEFAULT_SYSTEM_FIRMWARE_DIR: &str = "/usr/lib/firmware";

/// Default bundled firmware resource directory.
pub const DEFAULT_RESOURCE_FIRMWARE_DIR: &str = "resources";

/// Default directory where deck modules enumerate their serial ports.
pub const DEFAULT_MODULE_DEV_DIR: &str = "/dev/modules";

/// Hardware access settings.
#[derive(Clone, Debug, Deserialize)]
pub struct HardwareSettings {
    /// Path of the lock file backing the cross-process half of the
    /// exclusivity guard. The file is created if absent and never deleted.
    pub lock_file: PathBuf,
    /// Serial port of the motion board.
    pub port: String,
    /// Baud rate of the motion board link.
    pub baud_rate: u32,
    /// Directory where deck modules enumerate their serial ports.
    pub module_dev_dir: PathBuf,
    /// Whether this host is the robot. Real controllers refuse to
    /// instantiate when false.
    pub is_robot: bool,
}

/// Firmware resolution settings.
#[derive(Clone, Debug, Deserialize)]
pub struct FirmwareSettings {
    /// System directory searched first when on the robot.
    pub system_dir: PathBuf,
    /// Bundled resource directory searched second.
    pub resource_dir: PathBuf,
}

/// Boot sequencing settings.
#[derive(Clone, Debug, Deserialize)]
pub struct BootSettings {
    /// Select the simulated backend unconditionally.
    pub simulate: bool,
    /// Skip homing the carriages during boot.
    pub disable_home_on_boot: bool,
    /// Half-period of the boot heartbeat, milliseconds per light phase.
    pub heartbeat_period_ms: u64,
}

/// Top-level application settings.
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    /// Hardware access settings.
    pub hardware: HardwareSettings,
    /// Firmware resolution settings.
    pub firmware: FirmwareSettings,
    /// Boot sequencing settings.
    pub boot: BootSettings,
}

impl Settings {
    /// Load settings from defaults, an optional TOML file, and the
    /// environment.
    pub fn new(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("hardware.lock_file", DEFAULT_LOCK_FILE)?
            .set_default("hardware.port", "/dev/ttyAMA0")?
            .set_default("hardware.baud_rate", 115_200_i64)?
            .set_default("hardware.module_dev_dir", DEFAULT_MODULE_DEV_DIR)?
            .set_default(
                "hardware.is_robot",
                std::env::var_os("RUNNING_ON_ROBOT").is_some(),
            )?
            .set_default("firmware.system_dir", DEFAULT_SYSTEM_FIRMWARE_DIR)?
            .set_default("firmware.resource_dir", DEFAULT_RESOURCE_FIRMWARE_DIR)?
            .set_default(
                "boot.simulate",
                std::env::var_os("ENABLE_VIRTUAL_SMOOTHIE").is_some(),
            )?
            .set_default("boot.disable_home_on_boot", false)?
            .set_default("boot.heartbeat_period_ms", 500_i64)?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        builder
            .add_source(Environment::with_prefix("BENCHBOT").separator("__"))
            .build()?
            .try_deserialize()
    }
}

impl Default for Settings {
    /// Programmed defaults only; ignores the environment. Intended for
    /// tests, which override individual fields.
    fn default() -> Self {
        Self {
            hardware: HardwareSettings {
                lock_file: PathBuf::from(DEFAULT_LOCK_FILE),
                port: "/dev/ttyAMA0".to_string(),
                baud_rate: 115_200,
                module_dev_dir: PathBuf::from(DEFAULT_MODULE_DEV_DIR),
                is_robot: false,
            },
            firmware: FirmwareSettings {
                system_dir: PathBuf::from(DEFAULT_SYSTEM_FIRMWARE_DIR),
                resource_dir: PathBuf::from(DEFAULT_RESOURCE_FIRMWARE_DIR),
            },
            boot: BootSettings {
                simulate: false,
                disable_home_on_boot: false,
                heartbeat_period_ms: 500,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_load_without_a_file() {
        let settings = Settings::new(None).expect("defaults should load");
        assert_eq!(settings.hardware.baud_rate, 115_200);
        assert_eq!(settings.boot.heartbeat_period_ms, 500);
        assert!(!settings.boot.disable_home_on_boot);
    }

    #[test]
    fn test_default_impl_matches_programmed_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.hardware.lock_file, PathBuf::from(DEFAULT_LOCK_FILE));
        assert_eq!(
            settings.firmware.system_dir,
            PathBuf::from(DEFAULT_SYSTEM_FIRMWARE_DIR)
        );
    }
}
