//! Domain entities for the outlet plugin.
//!
//! This module contains pure data and validation rules with no infrastructure
//! dependencies.  Code in outer layers (registry, persistence, UI glue)
//! depends on these types, but the domain never depends on them.

/// Capability kinds and their display metadata.
pub mod capability;

/// The managed-device record and its validation rules.
///
/// See [`device::DeviceDescriptor`] for the main type.
pub mod device;
