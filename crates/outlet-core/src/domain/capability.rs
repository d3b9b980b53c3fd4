//! Capability kinds and the fixed metadata table attached to them.
//!
//! A capability is one independently-enabled feature of a managed device: the
//! on/off switch, or one of the metering readings.  Each enabled capability
//! carries a *resolution* (the rounding granularity applied to its readings).
//!
//! The enum itself carries no presentation data.  Labels, units, and default
//! resolutions live in [`CAPABILITY_TABLE`] so that callers that render a
//! settings page and callers that persist descriptors share one source of
//! truth without the core type knowing about either.
//!
//! | Kind          | Default resolution | Unit  |
//! |---------------|--------------------|-------|
//! | `Switch`      | 1                  | none  |
//! | `Power`       | 0.01               | W     |
//! | `Current`     | 0.01               | A     |
//! | `Voltage`     | 0.1                | V     |
//! | `PowerFactor` | 0.01               | none  |
//! | `Energy`      | 0.01               | kWh   |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Resolution used for a capability name that is not in the table.
pub const FALLBACK_RESOLUTION: f64 = 0.01;

/// A category of device feature that can be enabled with its own resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CapabilityKind {
    Switch,
    Power,
    Current,
    Voltage,
    PowerFactor,
    Energy,
}

impl CapabilityKind {
    /// Every kind, in table order.
    pub const ALL: [CapabilityKind; 6] = [
        CapabilityKind::Switch,
        CapabilityKind::Power,
        CapabilityKind::Current,
        CapabilityKind::Voltage,
        CapabilityKind::PowerFactor,
        CapabilityKind::Energy,
    ];

    /// Stable identifier used in persisted key names (`<name>Resolution`).
    pub fn as_str(self) -> &'static str {
        match self {
            CapabilityKind::Switch => "Switch",
            CapabilityKind::Power => "Power",
            CapabilityKind::Current => "Current",
            CapabilityKind::Voltage => "Voltage",
            CapabilityKind::PowerFactor => "PowerFactor",
            CapabilityKind::Energy => "Energy",
        }
    }

    /// Returns the metadata row for this kind.
    pub fn info(self) -> &'static CapabilityInfo {
        // Table rows follow declaration order.
        &CAPABILITY_TABLE[self as usize]
    }

    /// Default resolution for this kind.
    pub fn default_resolution(self) -> f64 {
        self.info().default_resolution
    }

    /// Display unit for this kind, or `None` for unitless readings.
    pub fn unit(self) -> Option<&'static str> {
        self.info().unit
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        CapabilityKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or(())
    }
}

/// Display metadata for one capability kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapabilityInfo {
    pub kind: CapabilityKind,
    /// Human-readable label for settings pages.
    pub label: &'static str,
    /// Unit suffix for readings, if any.
    pub unit: Option<&'static str>,
    /// Resolution used when none is configured.
    pub default_resolution: f64,
}

/// The fixed capability metadata table, in [`CapabilityKind::ALL`] order.
pub const CAPABILITY_TABLE: [CapabilityInfo; 6] = [
    CapabilityInfo {
        kind: CapabilityKind::Switch,
        label: "On/Off",
        unit: None,
        default_resolution: 1.0,
    },
    CapabilityInfo {
        kind: CapabilityKind::Power,
        label: "Power",
        unit: Some("W"),
        default_resolution: 0.01,
    },
    CapabilityInfo {
        kind: CapabilityKind::Current,
        label: "Current",
        unit: Some("A"),
        default_resolution: 0.01,
    },
    CapabilityInfo {
        kind: CapabilityKind::Voltage,
        label: "Voltage",
        unit: Some("V"),
        default_resolution: 0.1,
    },
    CapabilityInfo {
        kind: CapabilityKind::PowerFactor,
        label: "Power Factor",
        unit: None,
        default_resolution: 0.01,
    },
    CapabilityInfo {
        kind: CapabilityKind::Energy,
        label: "Energy",
        unit: Some("kWh"),
        default_resolution: 0.01,
    },
];

/// Default resolution for a capability given by name.
///
/// Unknown names fall back to [`FALLBACK_RESOLUTION`].
pub fn default_resolution_for(name: &str) -> f64 {
    name.parse::<CapabilityKind>()
        .map(CapabilityKind::default_resolution)
        .unwrap_or(FALLBACK_RESOLUTION)
}

/// Display unit for a capability given by name.  Unknown names have no unit.
pub fn unit_for(name: &str) -> Option<&'static str> {
    name.parse::<CapabilityKind>().ok().and_then(CapabilityKind::unit)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
