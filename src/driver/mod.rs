//! Motion board driver facade.
//!
//! [`MotionDriver`] is the narrow capability surface the core requires from
//! the motion-control driver. The trait is deliberately blocking and takes
//! `&mut self` everywhere: the driver is not reentrant, and the executor
//! guarantees it is only ever touched from the one dedicated worker thread,
//! so no lock around the driver is needed.
//!
//! Two implementations ship with the crate: [`SimulatedSmoothie`] for the
//! virtual backend and tests, and (behind the `instrument_serial` feature)
//! [`smoothie::SmoothieDriver`] for the real board.

pub mod sim;

#[cfg(feature = "instrument_serial")]
pub mod smoothie;

pub use sim::SimulatedSmoothie;

use crate::error::HwResult;
use crate::types::{Axis, Mount, PositionMap};
use std::collections::HashMap;

/// Capability surface required from the motion-control driver.
///
/// `set_speed`/`set_active_current` persist until changed; the push/pop
/// pairs save and restore the corresponding value in strict LIFO order and
/// back the scoped-override guards on the controller.
pub trait MotionDriver: Send {
    /// Open the connection to the board.
    fn connect(&mut self) -> HwResult<()>;

    /// Move to the given axis targets, optionally homing flagged axes first.
    fn move_to(&mut self, targets: &PositionMap, home_flagged_axes: bool) -> HwResult<()>;

    /// Home the given axes, or all axes when `None`. Returns the resulting
    /// positions.
    fn home(&mut self, axes: Option<&[Axis]>) -> HwResult<PositionMap>;

    /// Bounded-travel home of a single axis: retract to `margin` short of
    /// the switch at full speed, then home that axis.
    fn fast_home(&mut self, axis: Axis, margin: f64) -> HwResult<PositionMap>;

    /// Read the model of the instrument at `mount`, if one is attached.
    fn read_instrument_model(&mut self, mount: Mount) -> HwResult<Option<String>>;

    /// Read the serial id of the instrument at `mount`, if one is attached.
    fn read_instrument_id(&mut self, mount: Mount) -> HwResult<Option<String>>;

    /// Set the sustained actuation current, in amps, for the given axes.
    fn set_active_current(&mut self, currents: &HashMap<Axis, f64>) -> HwResult<()>;

    /// Save the active current state for a later `pop_active_current`.
    fn push_active_current(&mut self) -> HwResult<()>;

    /// Restore the most recently pushed active current state.
    fn pop_active_current(&mut self) -> HwResult<()>;

    /// Set the combined axis speed, in mm/s. Persists until changed.
    fn set_speed(&mut self, value: f64) -> HwResult<()>;

    /// Save the current speed for a later `pop_speed`.
    fn push_speed(&mut self) -> HwResult<()>;

    /// Restore the most recently pushed speed.
    fn pop_speed(&mut self) -> HwResult<()>;

    /// Turn the front indicator light on or off.
    fn set_button_light(&mut self, on: bool) -> HwResult<()>;
}
