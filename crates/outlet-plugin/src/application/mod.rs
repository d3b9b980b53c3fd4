//! Application layer for the outlet plugin.
//!
//! Use cases in this layer depend on abstractions (traits) rather than
//! concrete implementations, so storage backends and secret handling can be
//! swapped without changing this code.  There are no sockets or file paths
//! here.
//!
//! # Sub-modules
//!
//! - **`device_registry`** – The persisted, concurrency-safe store of managed
//!   device descriptors and the debug-logging flag.
//!
//! - **`observers`** – The change-notification list behind
//!   `DeviceRegistry::subscribe`.
//!
//! - **`settings`** – The section/key/value document the registry persists,
//!   and the `SettingsStore` trait that loads and saves it.
//!
//! - **`secret`** – The `SecretCodec` trait used to obfuscate stored
//!   credentials.

pub mod device_registry;
pub mod observers;
pub mod secret;
pub mod settings;
