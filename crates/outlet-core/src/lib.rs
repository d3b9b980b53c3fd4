//! # outlet-core
//!
//! Shared library for the outlet plugin containing the device descriptor model,
//! the capability metadata table, and the binary framing codec spoken on the
//! two RPC channels to the host controller.
//!
//! It has zero dependencies on OS APIs, sockets, or the file system.
//!
//! # Architecture overview
//!
//! The plugin runs inside a host controller process that drives automation.
//! The plugin manages networked power strips: each strip has up to eight
//! switchable outlets and may report metering readings (power, current,
//! voltage, power factor, energy).
//!
//! - **`domain`** – Pure data: what a managed device looks like, which
//!   capabilities exist, and the rules a user-supplied device must satisfy
//!   before it is stored.
//!
//! - **`protocol`** – How bytes travel between the plugin and the host.
//!   Messages are encoded into a compact binary format (24-byte header +
//!   payload) and decoded back into typed Rust values on the other end.

pub mod domain;
pub mod protocol;

pub use domain::capability::{CapabilityInfo, CapabilityKind};
pub use domain::device::{
    Credentials, DescriptorField, DeviceDescriptor, DeviceDraft, FieldProblem, ValidationError,
    MAX_PORTS,
};
pub use protocol::codec::{decode_frame, encode_frame, Frame, ProtocolError};
pub use protocol::messages::RpcMessage;
