//! Storage infrastructure: configuration and settings persistence.
//!
//! - **`config`** – The plugin's own TOML configuration (host endpoint,
//!   retry policy, log level), with defaults for every field.
//! - **`settings_file`** – A [`SettingsStore`](crate::application::settings::SettingsStore)
//!   backed by a TOML file, written atomically.
//! - **`secret_codec`** – The default fixed-key obfuscation for stored
//!   passwords.

pub mod config;
pub mod secret_codec;
pub mod settings_file;
