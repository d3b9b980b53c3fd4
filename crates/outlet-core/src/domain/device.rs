//! The managed-device record.
//!
//! A [`DeviceDescriptor`] is the full configuration of one power strip: where
//! it lives on the network, how to log in to it, which capabilities are
//! enabled (and at what resolution), and which outlets are active.
//!
//! # Equality
//!
//! Two descriptors are equal iff every field is equal.  Capabilities and ports
//! are kept in ordered collections (`BTreeMap`, `BTreeSet`) so that equality
//! is independent of the order in which they were inserted.
//!
//! # Validation
//!
//! User-supplied values arrive as a [`DeviceDraft`] of raw strings.  Parsing a
//! draft checks every field and reports *all* problems at once in a
//! [`ValidationError`], so an interactive caller can highlight each offending
//! field in one pass.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;

use thiserror::Error;

use crate::domain::capability::CapabilityKind;

/// Highest outlet number on a managed strip.  Ports are numbered `1..=MAX_PORTS`.
pub const MAX_PORTS: u8 = 8;

/// Separator used when device ids are joined into a single persisted value.
pub const ID_SEPARATOR: char = '|';

/// Name of the persisted section holding global settings.
///
/// Device ids share the section namespace, so an id may not take this name.
pub const DEFAULT_SECTION: &str = "Settings";

// ── Descriptor ────────────────────────────────────────────────────────────────

/// Login credentials for a device.
///
/// `secret` is plaintext in memory; it is only obfuscated at rest.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Configuration record for one managed device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    /// Stable identifier, unique within the registry.
    pub id: String,
    /// Human label.
    pub display_name: String,
    /// Network address of the device.
    pub address: IpAddr,
    pub credentials: Credentials,
    /// Enabled capabilities mapped to their resolution.  Absent = disabled.
    pub capabilities: BTreeMap<CapabilityKind, f64>,
    /// Active outlets, each in `1..=MAX_PORTS`.
    pub enabled_ports: BTreeSet<u8>,
}

impl DeviceDescriptor {
    /// Creates a descriptor with no credentials, capabilities, or ports.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, address: IpAddr) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            address,
            credentials: Credentials::default(),
            capabilities: BTreeMap::new(),
            enabled_ports: BTreeSet::new(),
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, secret: impl Into<String>) -> Self {
        self.credentials = Credentials::new(username, secret);
        self
    }

    pub fn with_capability(mut self, kind: CapabilityKind, resolution: f64) -> Self {
        self.capabilities.insert(kind, resolution);
        self
    }

    pub fn with_ports(mut self, ports: impl IntoIterator<Item = u8>) -> Self {
        self.enabled_ports = ports.into_iter().collect();
        self
    }

    pub fn is_enabled(&self, kind: CapabilityKind) -> bool {
        self.capabilities.contains_key(&kind)
    }

    /// The configured resolution, or `None` when the capability is disabled.
    pub fn resolution(&self, kind: CapabilityKind) -> Option<f64> {
        self.capabilities.get(&kind).copied()
    }

    /// The configured resolution, falling back to the kind's default.
    pub fn effective_resolution(&self, kind: CapabilityKind) -> f64 {
        self.resolution(kind)
            .unwrap_or_else(|| kind.default_resolution())
    }

    /// Checks every invariant a stored descriptor must hold.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] listing every violated rule.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut problems = Vec::new();
        check_id(&self.id, &mut problems);
        check_trimmed(DescriptorField::Id, &self.id, &mut problems);
        check_display_name(&self.display_name, &mut problems);
        check_trimmed(DescriptorField::DisplayName, &self.display_name, &mut problems);
        check_username(&self.credentials.username, &mut problems);
        for (kind, resolution) in &self.capabilities {
            check_resolution(*kind, *resolution, &mut problems);
        }
        for port in &self.enabled_ports {
            check_port(u32::from(*port), &mut problems);
        }
        ValidationError::from_problems(problems)
    }
}

// ── Draft (raw user input) ────────────────────────────────────────────────────

/// Raw, unvalidated device fields as entered on a settings page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceDraft {
    pub id: String,
    pub display_name: String,
    /// Address text, e.g. `"10.0.0.5"` or `"fe80::1"`.
    pub address: String,
    pub username: String,
    pub secret: String,
    /// Enabled capabilities mapped to the resolution text typed by the user.
    pub capabilities: BTreeMap<CapabilityKind, String>,
    /// Ticked outlet numbers.
    pub ports: Vec<u32>,
}

impl DeviceDraft {
    /// Converts the draft into a descriptor, reporting every problem found.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] with one [`FieldProblem`] per bad field.
    pub fn parse(&self) -> Result<DeviceDescriptor, ValidationError> {
        let mut problems = Vec::new();

        check_id(&self.id, &mut problems);
        check_display_name(&self.display_name, &mut problems);
        check_username(&self.username, &mut problems);

        let address = match self.address.trim().parse::<IpAddr>() {
            Ok(addr) => Some(addr),
            Err(_) => {
                problems.push(FieldProblem::new(
                    DescriptorField::Address,
                    format!("'{}' is not a valid IPv4 or IPv6 address", self.address.trim()),
                ));
                None
            }
        };

        let mut capabilities = BTreeMap::new();
        for (kind, text) in &self.capabilities {
            match text.trim().parse::<f64>() {
                Ok(value) => {
                    if check_resolution(*kind, value, &mut problems) {
                        capabilities.insert(*kind, value);
                    }
                }
                Err(_) => problems.push(FieldProblem::new(
                    DescriptorField::Resolution(*kind),
                    format!("'{}' is not a number", text.trim()),
                )),
            }
        }

        let mut enabled_ports = BTreeSet::new();
        for port in &self.ports {
            if check_port(*port, &mut problems) {
                // check_port guarantees the value fits in 1..=MAX_PORTS.
                enabled_ports.insert(*port as u8);
            }
        }

        ValidationError::from_problems(problems)?;

        Ok(DeviceDescriptor {
            id: self.id.trim().to_string(),
            display_name: self.display_name.trim().to_string(),
            // Address problems were reported above, so this is always `Some`.
            address: address.ok_or_else(|| ValidationError {
                problems: vec![FieldProblem::new(DescriptorField::Address, "missing address")],
            })?,
            credentials: Credentials::new(self.username.trim(), self.secret.clone()),
            capabilities,
            enabled_ports,
        })
    }
}

impl From<&DeviceDescriptor> for DeviceDraft {
    fn from(d: &DeviceDescriptor) -> Self {
        Self {
            id: d.id.clone(),
            display_name: d.display_name.clone(),
            address: d.address.to_string(),
            username: d.credentials.username.clone(),
            secret: d.credentials.secret.clone(),
            capabilities: d
                .capabilities
                .iter()
                .map(|(k, v)| (*k, v.to_string()))
                .collect(),
            ports: d.enabled_ports.iter().map(|p| u32::from(*p)).collect(),
        }
    }
}

// ── Validation errors ─────────────────────────────────────────────────────────

/// Identifies which descriptor field a problem refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorField {
    Id,
    DisplayName,
    Address,
    Username,
    Resolution(CapabilityKind),
    Port,
}

impl fmt::Display for DescriptorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorField::Id => f.write_str("id"),
            DescriptorField::DisplayName => f.write_str("name"),
            DescriptorField::Address => f.write_str("address"),
            DescriptorField::Username => f.write_str("username"),
            DescriptorField::Resolution(kind) => write!(f, "{kind} resolution"),
            DescriptorField::Port => f.write_str("ports"),
        }
    }
}

/// One problem with one field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldProblem {
    pub field: DescriptorField,
    pub message: String,
}

impl FieldProblem {
    pub fn new(field: DescriptorField, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every problem found in a user-supplied descriptor.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid device: {}", join_problems(.problems))]
pub struct ValidationError {
    pub problems: Vec<FieldProblem>,
}

impl ValidationError {
    fn from_problems(problems: Vec<FieldProblem>) -> Result<(), ValidationError> {
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { problems })
        }
    }

    /// Returns `true` if any problem refers to `field`.
    pub fn has_problem_with(&self, field: DescriptorField) -> bool {
        self.problems.iter().any(|p| p.field == field)
    }
}

fn join_problems(problems: &[FieldProblem]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ── Field rules ───────────────────────────────────────────────────────────────

fn check_id(id: &str, problems: &mut Vec<FieldProblem>) {
    let id = id.trim();
    if id.is_empty() {
        problems.push(FieldProblem::new(DescriptorField::Id, "must not be empty"));
    } else if id.contains(ID_SEPARATOR) {
        problems.push(FieldProblem::new(
            DescriptorField::Id,
            format!("must not contain '{ID_SEPARATOR}'"),
        ));
    } else if id.eq_ignore_ascii_case(DEFAULT_SECTION) {
        problems.push(FieldProblem::new(
            DescriptorField::Id,
            format!("'{DEFAULT_SECTION}' is reserved"),
        ));
    }
}

/// Stored ids and names are read back trimmed, so they must already be.
fn check_trimmed(field: DescriptorField, value: &str, problems: &mut Vec<FieldProblem>) {
    let trimmed = value.trim();
    if !trimmed.is_empty() && trimmed != value {
        problems.push(FieldProblem::new(field, "must not start or end with whitespace"));
    }
}

fn check_display_name(name: &str, problems: &mut Vec<FieldProblem>) {
    if name.trim().is_empty() {
        problems.push(FieldProblem::new(DescriptorField::DisplayName, "must not be empty"));
    }
}

fn check_username(username: &str, problems: &mut Vec<FieldProblem>) {
    if username.trim().is_empty() {
        problems.push(FieldProblem::new(DescriptorField::Username, "must not be empty"));
    }
}

fn check_resolution(kind: CapabilityKind, value: f64, problems: &mut Vec<FieldProblem>) -> bool {
    if value.is_finite() && value > 0.0 {
        true
    } else {
        problems.push(FieldProblem::new(
            DescriptorField::Resolution(kind),
            format!("must be greater than zero, got {value}"),
        ));
        false
    }
}

fn check_port(port: u32, problems: &mut Vec<FieldProblem>) -> bool {
    if (1..=u32::from(MAX_PORTS)).contains(&port) {
        true
    } else {
        problems.push(FieldProblem::new(
            DescriptorField::Port,
            format!("port {port} is outside 1..={MAX_PORTS}"),
        ));
        false
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
