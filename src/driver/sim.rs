//! Simulated motion board.
//!
//! In-memory stand-in for the real smoothie board, used by the virtual
//! backend and by tests. Positions, speed and current stacks, the indicator
//! light and the attached instruments are all plain state; every operation
//! completes immediately.

use super::MotionDriver;
use crate::error::{HwError, HwResult};
use crate::types::{Axis, Mount, PositionMap};
use std::collections::HashMap;

/// Homed position per axis, matching the travel limits of the real gantry.
fn homed_position(axis: Axis) -> f64 {
    match axis {
        Axis::X => 418.0,
        Axis::Y => 353.0,
        Axis::Z | Axis::A => 218.0,
        Axis::B | Axis::C => 19.0,
    }
}

/// Simulated smoothie board.
pub struct SimulatedSmoothie {
    positions: PositionMap,
    speed: f64,
    speed_stack: Vec<f64>,
    current: HashMap<Axis, f64>,
    current_stack: Vec<HashMap<Axis, f64>>,
    button_light: bool,
    attached: HashMap<Mount, (String, String)>,
    connected: bool,
}

impl SimulatedSmoothie {
    /// A board with nothing attached to either mount.
    pub fn new() -> Self {
        Self {
            positions: Axis::ALL.iter().map(|&axis| (axis, 0.0)).collect(),
            speed: 400.0,
            speed_stack: Vec::new(),
            current: HashMap::new(),
            current_stack: Vec::new(),
            button_light: false,
            attached: HashMap::new(),
            connected: false,
        }
    }

    /// A board with the given `(model, id)` pairs attached.
    pub fn with_instruments(attached: HashMap<Mount, (String, String)>) -> Self {
        Self {
            attached,
            ..Self::new()
        }
    }

    /// Current position of one axis.
    pub fn position(&self, axis: Axis) -> f64 {
        self.positions.get(&axis).copied().unwrap_or(0.0)
    }

    /// Current indicator light state.
    pub fn button_light(&self) -> bool {
        self.button_light
    }

    /// Depth of the speed override stack.
    pub fn speed_stack_depth(&self) -> usize {
        self.speed_stack.len()
    }

    /// The speed currently in effect.
    pub fn speed(&self) -> f64 {
        self.speed
    }
}

impl Default for SimulatedSmoothie {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionDriver for SimulatedSmoothie {
    fn connect(&mut self) -> HwResult<()> {
        self.connected = true;
        Ok(())
    }

    fn move_to(&mut self, targets: &PositionMap, _home_flagged_axes: bool) -> HwResult<()> {
        for (&axis, &coordinate) in targets {
            self.positions.insert(axis, coordinate);
        }
        Ok(())
    }

    fn home(&mut self, axes: Option<&[Axis]>) -> HwResult<PositionMap> {
        let axes: Vec<Axis> = axes.map(<[Axis]>::to_vec).unwrap_or_else(|| Axis::ALL.to_vec());
        for axis in axes {
            self.positions.insert(axis, homed_position(axis));
        }
        Ok(self.positions.clone())
    }

    fn fast_home(&mut self, axis: Axis, margin: f64) -> HwResult<PositionMap> {
        let retract = (homed_position(axis) - margin).max(0.0);
        self.positions.insert(axis, retract);
        self.home(Some(&[axis]))
    }

    fn read_instrument_model(&mut self, mount: Mount) -> HwResult<Option<String>> {
        Ok(self.attached.get(&mount).map(|(model, _)| model.clone()))
    }

    fn read_instrument_id(&mut self, mount: Mount) -> HwResult<Option<String>> {
        Ok(self.attached.get(&mount).map(|(_, id)| id.clone()))
    }

    fn set_active_current(&mut self, currents: &HashMap<Axis, f64>) -> HwResult<()> {
        for (&axis, &amps) in currents {
            self.current.insert(axis, amps);
        }
        Ok(())
    }

    fn push_active_current(&mut self) -> HwResult<()> {
        self.current_stack.push(self.current.clone());
        Ok(())
    }

    fn pop_active_current(&mut self) -> HwResult<()> {
        self.current = self
            .current_stack
            .pop()
            .ok_or_else(|| HwError::Motion("active current pop without push".to_string()))?;
        Ok(())
    }

    fn set_speed(&mut self, value: f64) -> HwResult<()> {
        self.speed = value;
        Ok(())
    }

    fn push_speed(&mut self) -> HwResult<()> {
        self.speed_stack.push(self.speed);
        Ok(())
    }

    fn pop_speed(&mut self) -> HwResult<()> {
        self.speed = self
            .speed_stack
            .pop()
            .ok_or_else(|| HwError::Motion("speed pop without push".to_string()))?;
        Ok(())
    }

    fn set_button_light(&mut self, on: bool) -> HwResult<()> {
        self.button_light = on;
        Ok(())
    }
}
