//! Motion board firmware resolution.
//!
//! The boot sequencer needs a smoothie firmware image before it can build a
//! real controller. Images are named `smoothie-<version>.hex`; the system
//! firmware directory is searched first when running on the robot (a system
//! image overrides whatever is bundled), then the bundled resource
//! directory. Within each directory the first match by iteration order
//! wins.

use crate::config::Settings;
use crate::error::{HwError, HwResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

static SMOOTHIE_HEX_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"smoothie-(.*)\.hex").expect("firmware pattern is valid")
});

/// A firmware image found during boot, with the version tag extracted from
/// its filename.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirmwareCandidate {
    /// Full path of the image.
    pub path: PathBuf,
    /// Version tag captured from the filename.
    pub version: String,
}

/// Match one filename against the firmware pattern.
fn candidate_from(path: &Path) -> Option<FirmwareCandidate> {
    let name = path.file_name()?.to_str()?;
    let captures = SMOOTHIE_HEX_RE.captures(name)?;
    Some(FirmwareCandidate {
        path: path.to_path_buf(),
        version: captures.get(1)?.as_str().to_string(),
    })
}

/// First matching image in `dir`, by directory iteration order.
fn scan_dir(dir: &Path) -> Option<FirmwareCandidate> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .flatten()
        .find_map(|entry| candidate_from(&entry.path()))
}

/// Find the smoothie firmware image to flash at boot.
///
/// Searches the system directory first when on the robot, then the bundled
/// resource directory. Fails with [`HwError::FirmwareNotFound`] naming the
/// searched directories when no image matches.
pub fn find_smoothie_firmware(settings: &Settings) -> HwResult<FirmwareCandidate> {
    let mut searched = Vec::new();

    if settings.hardware.is_robot {
        searched.push(settings.firmware.system_dir.clone());
        if let Some(candidate) = scan_dir(&settings.firmware.system_dir) {
            return Ok(candidate);
        }
    }

    searched.push(settings.firmware.resource_dir.clone());
    if let Some(candidate) = scan_dir(&settings.firmware.resource_dir) {
        return Ok(candidate);
    }

    Err(HwError::FirmwareNotFound { searched })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_dirs(system: &Path, resource: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.firmware.system_dir = system.to_path_buf();
        settings.firmware.resource_dir = resource.to_path_buf();
        settings
    }

    #[test]
    fn test_system_image_wins_on_the_robot() {
        let system = tempfile::tempdir().expect("tempdir");
        let resource = tempfile::tempdir().expect("tempdir");
        std::fs::write(system.path().join("smoothie-v2.hex"), b"fw").expect("write");
        std::fs::write(resource.path().join("smoothie-v1.hex"), b"fw").expect("write");

        let mut settings = settings_with_dirs(system.path(), resource.path());
        settings.hardware.is_robot = true;

        let candidate = find_smoothie_firmware(&settings).expect("candidate");
        assert_eq!(candidate.version, "v2");
        assert_eq!(candidate.path, system.path().join("smoothie-v2.hex"));
    }

    #[test]
    fn test_system_dir_is_skipped_off_the_robot() {
        let system = tempfile::tempdir().expect("tempdir");
        let resource = tempfile::tempdir().expect("tempdir");
        std::fs::write(system.path().join("smoothie-v2.hex"), b"fw").expect("write");
        std::fs::write(resource.path().join("smoothie-v1.hex"), b"fw").expect("write");

        let settings = settings_with_dirs(system.path(), resource.path());
        let candidate = find_smoothie_firmware(&settings).expect("candidate");
        assert_eq!(candidate.version, "v1");
    }

    #[test]
    fn test_non_matching_files_are_ignored() {
        let system = tempfile::tempdir().expect("tempdir");
        let resource = tempfile::tempdir().expect("tempdir");
        std::fs::write(resource.path().join("README.md"), b"not firmware").expect("write");
        std::fs::write(resource.path().join("smoothie-edge-1a2b.hex"), b"fw").expect("write");

        let settings = settings_with_dirs(system.path(), resource.path());
        let candidate = find_smoothie_firmware(&settings).expect("candidate");
        assert_eq!(candidate.version, "edge-1a2b");
    }

    #[test]
    fn test_no_match_reports_every_searched_directory() {
        let system = tempfile::tempdir().expect("tempdir");
        let resource = tempfile::tempdir().expect("tempdir");

        let mut settings = settings_with_dirs(system.path(), resource.path());
        settings.hardware.is_robot = true;

        match find_smoothie_firmware(&settings) {
            Err(HwError::FirmwareNotFound { searched }) => {
                assert_eq!(
                    searched,
                    vec![system.path().to_path_buf(), resource.path().to_path_buf()]
                );
            }
            other => panic!("expected FirmwareNotFound, got {other:?}"),
        }
    }
}
