//! The synchronous command surface for one exclusively-held hardware
//! instance.
//!
//! A [`Controller`] composes the exclusivity guard, the motion driver and
//! the module bus. Real construction happens in three ordered steps:
//! platform check, lock acquisition, driver connect; a failed lock must
//! never touch the driver. [`Controller::simulated`] skips the platform
//! check and the lock and is what the virtual backend and tests use.
//!
//! Methods here are blocking and take `&mut self`; callers reach them
//! through the [`crate::executor::HardwareExecutor`], which serializes all
//! access onto one dedicated thread.
//!
//! Temporary speed and current overrides follow stack discipline: each push
//! records the prior value and the matching pop is guaranteed on every exit
//! path by an RAII guard, never by caller cleanup.

use crate::config::Settings;
use crate::driver::MotionDriver;
use crate::error::{HwError, HwResult};
use crate::lock::{ExclusivityGuard, LockHandle};
use crate::modules::{ModuleBus, ModuleHandle};
use crate::types::{Axis, InstrumentDescriptor, Mount, PositionMap};
use log::{error, info};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::path::Path;

/// One exclusively-held hardware instance.
pub struct Controller {
    // Held only for its Drop; releasing it frees the hardware for the next
    // controller.
    _lock: Option<LockHandle>,
    driver: Box<dyn MotionDriver>,
    modules: Box<dyn ModuleBus>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("_lock", &self._lock)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Build a controller for real hardware.
    ///
    /// Fails with [`HwError::NotOnRobot`] off the robot and with
    /// [`HwError::AlreadyLocked`] when another controller is live anywhere
    /// on the host; in both cases the driver is left untouched.
    pub fn new(
        settings: &Settings,
        driver: Box<dyn MotionDriver>,
        modules: Box<dyn ModuleBus>,
    ) -> HwResult<Self> {
        if !settings.hardware.is_robot {
            return Err(HwError::NotOnRobot);
        }
        let lock = ExclusivityGuard::acquire(&settings.hardware.lock_file)?;
        let mut controller = Self {
            _lock: Some(lock),
            driver,
            modules,
        };
        controller.driver.connect()?;
        info!("hardware controller connected");
        Ok(controller)
    }

    /// Build a simulated controller: no platform check, no lock.
    pub fn simulated(driver: Box<dyn MotionDriver>, modules: Box<dyn ModuleBus>) -> Self {
        Self {
            _lock: None,
            driver,
            modules,
        }
    }

    /// Whether this controller is backed by the simulated backend.
    pub fn is_simulated(&self) -> bool {
        self._lock.is_none()
    }

    /// Move to the given targets. When `speed` is given it applies only for
    /// the duration of this call; the prior speed is restored on every exit
    /// path.
    pub fn move_to(
        &mut self,
        targets: &PositionMap,
        home_flagged_axes: bool,
        speed: Option<f64>,
    ) -> HwResult<()> {
        match speed {
            None => self.driver.move_to(targets, home_flagged_axes),
            Some(value) => {
                self.driver.push_speed()?;
                let mut scope = SpeedScope {
                    driver: self.driver.as_mut(),
                };
                scope.driver.set_speed(value)?;
                scope.driver.move_to(targets, home_flagged_axes)
            }
        }
    }

    /// Home the given axes, or all axes when `None`.
    pub fn home(&mut self, axes: Option<&[Axis]>) -> HwResult<PositionMap> {
        self.driver.home(axes)
    }

    /// Bounded-travel home of a single axis.
    pub fn fast_home(&mut self, axis: Axis, margin: f64) -> HwResult<PositionMap> {
        self.driver.fast_home(axis, margin)
    }

    /// Find the instruments attached to the mounts.
    ///
    /// `expected` may name a model prefix per mount; a mount whose
    /// discovered model does not start with its expected prefix (including
    /// a mount with nothing attached) fails the whole call with
    /// [`HwError::InstrumentMismatch`]. The check is fail-fast: partial
    /// hardware identification is unsafe to proceed with.
    pub fn get_attached_instruments(
        &mut self,
        expected: &HashMap<Mount, String>,
    ) -> HwResult<HashMap<Mount, InstrumentDescriptor>> {
        let mut found = HashMap::new();
        for mount in Mount::ALL {
            let model = self.driver.read_instrument_model(mount)?;
            let id = self.driver.read_instrument_id(mount)?;
            if let Some(prefix) = expected.get(&mount) {
                let matches = model
                    .as_deref()
                    .is_some_and(|model| model.starts_with(prefix.as_str()));
                if !matches {
                    return Err(HwError::InstrumentMismatch {
                        mount,
                        expected: prefix.clone(),
                        found: model,
                    });
                }
            }
            found.insert(mount, InstrumentDescriptor { model, id });
        }
        Ok(found)
    }

    /// Set the sustained actuation current for one axis. Unscoped: the
    /// value persists beyond this call.
    pub fn set_active_current(&mut self, axis: Axis, amps: f64) -> HwResult<()> {
        self.driver
            .set_active_current(&HashMap::from([(axis, amps)]))
    }

    /// Save the active current state for the lifetime of the returned
    /// scope. The prior state is restored when the scope drops, on every
    /// exit path.
    pub fn save_current(&mut self) -> HwResult<CurrentScope<'_>> {
        self.driver.push_active_current()?;
        Ok(CurrentScope { controller: self })
    }

    /// Set the plunger speed. Unscoped: persists until changed.
    pub fn set_pipette_speed(&mut self, value: f64) -> HwResult<()> {
        self.driver.set_speed(value)
    }

    /// Turn the front indicator light on or off.
    pub fn set_button_light(&mut self, on: bool) -> HwResult<()> {
        self.driver.set_button_light(on)
    }

    /// List the peripheral modules attached to the robot as
    /// `(port, model)` pairs.
    pub fn get_attached_modules(&mut self) -> HwResult<Vec<(String, String)>> {
        self.modules.discover()
    }

    /// Build a handle for the module at `port`.
    pub fn build_module(&mut self, port: &str, model: &str) -> HwResult<ModuleHandle> {
        self.modules.build(port, model, self.is_simulated())
    }

    /// Flash `firmware_path` onto `module`, returning the rebuilt handle.
    pub fn update_module(
        &mut self,
        module: ModuleHandle,
        firmware_path: &Path,
    ) -> HwResult<ModuleHandle> {
        self.modules.update_firmware(module, firmware_path)
    }
}

/// Restores the pushed speed when dropped.
struct SpeedScope<'a> {
    driver: &'a mut dyn MotionDriver,
}

impl Drop for SpeedScope<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.driver.pop_speed() {
            error!("failed to restore speed after scoped override: {err}");
        }
    }
}

/// Scoped active-current override, returned by [`Controller::save_current`].
///
/// Derefs to the controller so the bounded operation can keep issuing
/// commands; the pushed current state is restored when the scope drops.
pub struct CurrentScope<'a> {
    controller: &'a mut Controller,
}

impl Deref for CurrentScope<'_> {
    type Target = Controller;

    fn deref(&self) -> &Controller {
        self.controller
    }
}

impl DerefMut for CurrentScope<'_> {
    fn deref_mut(&mut self) -> &mut Controller {
        self.controller
    }
}

impl Drop for CurrentScope<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.controller.driver.pop_active_current() {
            error!("failed to restore active current after scope: {err}");
        }
    }
}
