//! Shared data types for the hardware control core.
//!
//! These are the vocabulary types that cross module boundaries: mounts,
//! axes, position maps and instrument descriptors. All of them are plain
//! data; nothing here talks to hardware.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A physical attachment point for an instrument (pipette).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mount {
    /// Left mount.
    Left,
    /// Right mount.
    Right,
}

impl Mount {
    /// Every mount on the gantry, in scan order.
    pub const ALL: [Mount; 2] = [Mount::Left, Mount::Right];

    /// Lowercase name used in driver commands and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mount::Left => "left",
            Mount::Right => "right",
        }
    }
}

impl fmt::Display for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One controllable axis of the motion board.
///
/// X/Y drive the gantry, Z/A the left and right carriages, B/C the left
/// and right plungers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Gantry X.
    X,
    /// Gantry Y.
    Y,
    /// Left carriage.
    Z,
    /// Right carriage.
    A,
    /// Left plunger.
    B,
    /// Right plunger.
    C,
}

impl Axis {
    /// Every axis, in the board's canonical order.
    pub const ALL: [Axis; 6] = [Axis::X, Axis::Y, Axis::Z, Axis::A, Axis::B, Axis::C];

    /// The carriage axes homed during boot.
    pub const CARRIAGES: [Axis; 2] = [Axis::Z, Axis::A];

    /// Single-letter name used in G-code and position reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
            Axis::A => "A",
            Axis::B => "B",
            Axis::C => "C",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mapping from axis to a coordinate, as returned by home/move operations.
///
/// Produced fresh by each call; owned by the caller after return.
pub type PositionMap = HashMap<Axis, f64>;

/// What, if anything, is attached at a mount.
///
/// Constructed fresh on every discovery call; never cached by the core.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentDescriptor {
    /// Model name reported by the instrument, if one is attached.
    pub model: Option<String>,
    /// Serial id reported by the instrument, if one is attached.
    pub id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_names_round_trip_display() {
        for axis in Axis::ALL {
            assert_eq!(axis.to_string(), axis.as_str());
        }
    }

    #[test]
    fn test_mount_scan_order() {
        assert_eq!(Mount::ALL[0], Mount::Left);
        assert_eq!(Mount::ALL[1], Mount::Right);
    }
}
