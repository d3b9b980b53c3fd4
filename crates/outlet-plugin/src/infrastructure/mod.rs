//! Infrastructure layer for the outlet plugin.
//!
//! Contains the OS-facing adapters: TCP channels to the host, the session
//! supervisor built on them, and file-system storage for configuration and
//! device settings.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `outlet_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
