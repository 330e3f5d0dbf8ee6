//! Field groups and their decoded readings

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the seven logical telemetry groups sent by the battery unit.
///
/// Each group is sourced from exactly one frame identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupId {
    /// Cell voltages V1-V4
    Cells1,
    /// Cell voltages V5-V8
    Cells2,
    /// Cell voltages V9-V12
    Cells3,
    /// Cell voltages V13-V16
    Cells4,
    /// Pack voltage, current, output voltage, secondary current
    Pack,
    /// Temperatures T1-T4
    Temperatures,
    /// Status values S1-S7
    Status,
}

impl GroupId {
    /// Number of groups in a snapshot.
    pub const COUNT: usize = 7;

    /// All groups in storage order.
    pub const ALL: [GroupId; Self::COUNT] = [
        GroupId::Cells1,
        GroupId::Cells2,
        GroupId::Cells3,
        GroupId::Cells4,
        GroupId::Pack,
        GroupId::Temperatures,
        GroupId::Status,
    ];

    /// Frame identifier carrying this group.
    pub const fn frame_id(self) -> u32 {
        match self {
            GroupId::Cells1 => 0x8800_8000,
            GroupId::Cells2 => 0x8801_8000,
            GroupId::Cells3 => 0x8802_8000,
            GroupId::Cells4 => 0x8803_8000,
            GroupId::Pack => 0x8400_8000,
            GroupId::Temperatures => 0x9000_8000,
            GroupId::Status => 0x8402_8000,
        }
    }

    /// Look up the group carried by a frame identifier.
    ///
    /// Unknown identifiers return `None`; they are ordinary bus noise.
    pub fn from_frame_id(identifier: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|group| group.frame_id() == identifier)
    }

    /// Storage index of this group (0..7).
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Published field names, in payload order.
    pub const fn field_names(self) -> &'static [&'static str] {
        match self {
            GroupId::Cells1 => &["V1", "V2", "V3", "V4"],
            GroupId::Cells2 => &["V5", "V6", "V7", "V8"],
            GroupId::Cells3 => &["V9", "V10", "V11", "V12"],
            GroupId::Cells4 => &["V13", "V14", "V15", "V16"],
            GroupId::Pack => &["VT", "A", "V0", "A2"],
            GroupId::Temperatures => &["T1", "T2", "T3", "T4"],
            GroupId::Status => &["S1", "S2", "S3", "S4", "S5", "S6", "S7"],
        }
    }

    /// Decimal places kept when the group is published.
    pub const fn decimals(self) -> u32 {
        match self {
            GroupId::Temperatures => 0,
            _ => 3,
        }
    }

    /// First cell number covered by a voltage group.
    pub const fn first_cell(self) -> Option<usize> {
        match self {
            GroupId::Cells1 => Some(0),
            GroupId::Cells2 => Some(4),
            GroupId::Cells3 => Some(8),
            GroupId::Cells4 => Some(12),
            _ => None,
        }
    }

    /// Stable lowercase name used in logs and configuration.
    pub const fn as_str(self) -> &'static str {
        match self {
            GroupId::Cells1 => "cells1",
            GroupId::Cells2 => "cells2",
            GroupId::Cells3 => "cells3",
            GroupId::Cells4 => "cells4",
            GroupId::Pack => "pack",
            GroupId::Temperatures => "temperatures",
            GroupId::Status => "status",
        }
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pack-level electrical readings.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PackReading(pub [f32; 4]);

impl PackReading {
    /// Pack voltage (VT), volts.
    pub fn voltage(&self) -> f32 {
        self.0[0]
    }

    /// Pack current (A), amps. Negative while charging.
    pub fn current(&self) -> f32 {
        self.0[1]
    }

    /// Output voltage (V0), volts.
    pub fn output_voltage(&self) -> f32 {
        self.0[2]
    }

    /// Secondary current (A2), amps.
    pub fn secondary_current(&self) -> f32 {
        self.0[3]
    }
}

/// Decoded values of one group.
///
/// A reading is always built completely before it reaches the snapshot store, which swaps it
/// in as a single unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GroupReading {
    /// Four cell voltages, volts.
    Cells([f32; 4]),
    /// Pack voltage and current readings.
    Pack(PackReading),
    /// Four temperatures, degrees Celsius.
    Temperatures([f32; 4]),
    /// Seven status values.
    Status([f32; 7]),
}

impl GroupReading {
    /// All-zero reading with the shape of `group`.
    pub fn empty(group: GroupId) -> Self {
        match group {
            GroupId::Cells1 | GroupId::Cells2 | GroupId::Cells3 | GroupId::Cells4 => {
                GroupReading::Cells([0.0; 4])
            }
            GroupId::Pack => GroupReading::Pack(PackReading::default()),
            GroupId::Temperatures => GroupReading::Temperatures([0.0; 4]),
            GroupId::Status => GroupReading::Status([0.0; 7]),
        }
    }

    /// Values in field-name order.
    pub fn values(&self) -> &[f32] {
        match self {
            GroupReading::Cells(values) => values,
            GroupReading::Pack(pack) => &pack.0,
            GroupReading::Temperatures(values) => values,
            GroupReading::Status(values) => values,
        }
    }

    /// Whether every value equals zero.
    pub fn is_zero(&self) -> bool {
        self.values().iter().all(|v| *v == 0.0)
    }

    /// Whether this reading has the shape `group` expects.
    pub fn fits(&self, group: GroupId) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(&GroupReading::empty(group))
    }
}
