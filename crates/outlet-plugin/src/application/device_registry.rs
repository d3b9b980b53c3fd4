//! DeviceRegistry: the persisted store of managed devices.
//!
//! The registry is the plugin's single source of truth for which power strips
//! it manages and how each is configured.  It is shared by the settings page,
//! the polling workers, and the session supervisor, so every operation is safe
//! to call from any thread.
//!
//! # How a write works (for beginners)
//!
//! Every mutation follows the same four steps:
//!
//! ```text
//! 1. validate the input            (no lock held)
//! 2. take the write lock, copy the settings document and device map
//! 3. edit the copies and save the document through the SettingsStore
//! 4. only if the save succeeded, swap the copies in and release the lock
//! ```
//!
//! A failed save therefore leaves both memory and storage exactly as they
//! were.  After the lock is released, every change observer is invoked.
//!
//! Readers never block on I/O: the device map is held behind an `Arc`, and
//! [`DeviceRegistry::get_all`] just clones the `Arc`.  A snapshot taken before
//! a write keeps showing the old map.
//!
//! # Persisted layout
//!
//! ```text
//! [Settings]
//! DebugLogging = "false"
//! DeviceIds    = "dev1|dev2"
//!
//! [dev1]
//! Name            = "Rack PDU"
//! IPAddress       = "10.0.0.5"
//! Username        = "admin"
//! Password        = "<encoded>"
//! PowerResolution = "0.05"      one key per enabled capability
//! PortsEnabled    = "1,2,3"
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use outlet_core::domain::capability::CapabilityKind;
use outlet_core::domain::device::{
    Credentials, DeviceDescriptor, ValidationError, DEFAULT_SECTION, ID_SEPARATOR, MAX_PORTS,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::observers::{ChangeObservers, ChangeSubscription};
use super::secret::SecretCodec;
use super::settings::{PersistenceError, SettingsDocument, SettingsStore};

// ── Persisted keys ────────────────────────────────────────────────────────────

pub const DEBUG_LOGGING_KEY: &str = "DebugLogging";
pub const DEVICE_IDS_KEY: &str = "DeviceIds";
pub const NAME_KEY: &str = "Name";
pub const ADDRESS_KEY: &str = "IPAddress";
pub const USERNAME_KEY: &str = "Username";
pub const PASSWORD_KEY: &str = "Password";
pub const PORTS_KEY: &str = "PortsEnabled";

const PORT_SEPARATOR: char = ',';

/// Key under which the resolution of `kind` is stored, e.g. `PowerResolution`.
pub fn resolution_key(kind: CapabilityKind) -> String {
    format!("{}Resolution", kind.as_str())
}

/// Immutable view of every device at one point in time.
pub type DeviceSnapshot = Arc<BTreeMap<String, DeviceDescriptor>>;

/// Errors returned by registry mutations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The descriptor failed validation; nothing was changed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The settings store failed; nothing was changed.
    #[error("settings could not be persisted: {0}")]
    Persistence(#[from] PersistenceError),

    /// The registry was closed during plugin shutdown.
    #[error("device registry is closed")]
    Closed,
}

struct RegistryState {
    devices: DeviceSnapshot,
    debug_logging: bool,
    document: SettingsDocument,
    closed: bool,
}

/// Concurrency-safe, persisted collection of [`DeviceDescriptor`]s.
pub struct DeviceRegistry {
    state: RwLock<RegistryState>,
    store: Arc<dyn SettingsStore>,
    codec: Arc<dyn SecretCodec>,
    observers: ChangeObservers,
}

impl DeviceRegistry {
    /// Reads the persisted document and rebuilds every listed device.
    ///
    /// Missing or malformed per-device values fall back to defaults; only a
    /// failure of the store itself is an error.
    pub fn load(
        store: Arc<dyn SettingsStore>,
        codec: Arc<dyn SecretCodec>,
    ) -> Result<Self, PersistenceError> {
        let document = store.load()?;

        let debug_logging = match document.get(DEFAULT_SECTION, DEBUG_LOGGING_KEY) {
            Some(raw) => parse_flag(raw).unwrap_or_else(|| {
                warn!(value = raw, "unreadable debug logging flag; treating as off");
                false
            }),
            None => false,
        };

        let mut devices: BTreeMap<String, DeviceDescriptor> = BTreeMap::new();
        let ids = document
            .get(DEFAULT_SECTION, DEVICE_IDS_KEY)
            .unwrap_or_default();
        for id in parse_id_list(ids) {
            if devices.contains_key(id) {
                warn!(device_id = id, "duplicate device id in settings; ignoring");
                continue;
            }
            let device = read_device(&document, id, codec.as_ref());
            devices.insert(id.to_string(), device);
        }

        info!(devices = devices.len(), debug_logging, "device registry loaded");

        Ok(Self {
            state: RwLock::new(RegistryState {
                devices: Arc::new(devices),
                debug_logging,
                document,
                closed: false,
            }),
            store,
            codec,
            observers: ChangeObservers::new(),
        })
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    /// Returns a snapshot of every device, keyed by id.
    pub fn get_all(&self) -> DeviceSnapshot {
        Arc::clone(&self.read_state().devices)
    }

    pub fn get(&self, id: &str) -> Option<DeviceDescriptor> {
        self.read_state().devices.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read_state().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_debug_logging(&self) -> bool {
        self.read_state().debug_logging
    }

    // ── Writes ────────────────────────────────────────────────────────────────

    /// Inserts `device`, or replaces the device with the same id.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::Validation`] if the descriptor breaks a rule.
    /// - [`RegistryError::Persistence`] if the store rejects the save.
    pub fn add_or_update(&self, device: DeviceDescriptor) -> Result<(), RegistryError> {
        device.validate()?;

        {
            let mut state = self.write_state()?;

            let mut document = state.document.clone();
            write_device_section(&mut document, &device, self.codec.as_ref());
            let mut devices = (*state.devices).clone();
            let replaced = devices.insert(device.id.clone(), device).is_some();
            write_id_list(&mut document, devices.keys());

            self.store.save(&document)?;
            state.document = document;
            state.devices = Arc::new(devices);
            debug!(replaced, devices = state.devices.len(), "device stored");
        }

        self.observers.notify();
        Ok(())
    }

    /// Removes the device with `id`.
    ///
    /// Returns `Ok(false)` without persisting or notifying if no such device
    /// exists.
    pub fn remove(&self, id: &str) -> Result<bool, RegistryError> {
        {
            let mut state = self.write_state()?;
            if !state.devices.contains_key(id) {
                return Ok(false);
            }

            let mut document = state.document.clone();
            let mut devices = (*state.devices).clone();
            devices.remove(id);
            document.clear_section(id);
            write_id_list(&mut document, devices.keys());

            self.store.save(&document)?;
            state.document = document;
            state.devices = Arc::new(devices);
            debug!(device_id = id, devices = state.devices.len(), "device removed");
        }

        self.observers.notify();
        Ok(true)
    }

    /// Sets and persists the debug-logging flag.
    pub fn set_debug_logging(&self, enabled: bool) -> Result<(), RegistryError> {
        {
            let mut state = self.write_state()?;

            let mut document = state.document.clone();
            document.set(DEFAULT_SECTION, DEBUG_LOGGING_KEY, format_flag(enabled));

            self.store.save(&document)?;
            state.document = document;
            state.debug_logging = enabled;
            debug!(enabled, "debug logging flag stored");
        }

        self.observers.notify();
        Ok(())
    }

    // ── Notifications & teardown ──────────────────────────────────────────────

    /// Registers `observer` to run after every successful mutation.
    ///
    /// The observer runs on the mutating thread, after the registry lock has
    /// been released.
    pub fn subscribe<F>(&self, observer: F) -> ChangeSubscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.observers.subscribe(observer)
    }

    /// Rejects every later mutation with [`RegistryError::Closed`].
    ///
    /// Reads keep working so in-flight workers can finish with the last
    /// snapshot.
    pub fn close(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.closed {
            state.closed = true;
            info!("device registry closed");
        }
    }

    // ── Lock helpers ──────────────────────────────────────────────────────────

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        // Committed state is only ever replaced after a successful save, so
        // the data behind a poisoned lock is still consistent.
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, RegistryState>, RegistryError> {
        let state = self
            .state
            .write()
            .map_err(|_| RegistryError::Persistence(PersistenceError::Poisoned))?;
        if state.closed {
            return Err(RegistryError::Closed);
        }
        Ok(state)
    }
}

// ── Document encoding ─────────────────────────────────────────────────────────

fn format_flag(enabled: bool) -> &'static str {
    if enabled {
        "true"
    } else {
        "false"
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("true") {
        Some(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn parse_id_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(ID_SEPARATOR)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .filter(|id| {
            let reserved = id.eq_ignore_ascii_case(DEFAULT_SECTION);
            if reserved {
                warn!(device_id = *id, "reserved section name in device list; ignoring");
            }
            !reserved
        })
}

fn write_id_list<'a>(document: &mut SettingsDocument, ids: impl Iterator<Item = &'a String>) {
    let separator = ID_SEPARATOR.to_string();
    let joined = ids
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(separator.as_str());
    document.set(DEFAULT_SECTION, DEVICE_IDS_KEY, joined);
}

/// Replaces the whole section of `device`, so disabled capabilities leave no
/// stale resolution keys behind.
fn write_device_section(
    document: &mut SettingsDocument,
    device: &DeviceDescriptor,
    codec: &dyn SecretCodec,
) {
    let section = device.id.as_str();
    document.clear_section(section);
    document.set(section, NAME_KEY, device.display_name.as_str());
    document.set(section, ADDRESS_KEY, device.address.to_string());
    document.set(section, USERNAME_KEY, device.credentials.username.as_str());
    document.set(section, PASSWORD_KEY, codec.encode(&device.credentials.secret));
    for (kind, resolution) in &device.capabilities {
        document.set(section, &resolution_key(*kind), resolution.to_string());
    }
    let separator = PORT_SEPARATOR.to_string();
    let ports = device
        .enabled_ports
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(separator.as_str());
    document.set(section, PORTS_KEY, ports);
}

fn read_device(document: &SettingsDocument, id: &str, codec: &dyn SecretCodec) -> DeviceDescriptor {
    let value = |key: &str| document.get(id, key);

    let display_name = match value(NAME_KEY).map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => id.to_string(),
    };

    let address = match value(ADDRESS_KEY) {
        Some(raw) => raw.trim().parse::<IpAddr>().unwrap_or_else(|_| {
            warn!(device_id = id, value = raw, "unreadable device address; using 0.0.0.0");
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        }),
        None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    };

    let username = value(USERNAME_KEY).unwrap_or_default().to_string();
    let secret = match value(PASSWORD_KEY) {
        Some(encoded) if !encoded.is_empty() => codec.decode(encoded).unwrap_or_else(|e| {
            warn!(device_id = id, error = %e, "stored password could not be decoded; clearing it");
            String::new()
        }),
        _ => String::new(),
    };

    let mut capabilities = BTreeMap::new();
    for kind in CapabilityKind::ALL {
        if let Some(raw) = value(&resolution_key(kind)) {
            let resolution = raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|r| r.is_finite() && *r > 0.0)
                .unwrap_or_else(|| {
                    debug!(device_id = id, capability = %kind, value = raw, "unreadable resolution; using default");
                    kind.default_resolution()
                });
            capabilities.insert(kind, resolution);
        }
    }

    let enabled_ports = match value(PORTS_KEY) {
        Some(raw) => parse_ports(raw),
        None => (1..=MAX_PORTS).collect(),
    };

    DeviceDescriptor {
        id: id.to_string(),
        display_name,
        address,
        credentials: Credentials::new(username, secret),
        capabilities,
        enabled_ports,
    }
}

fn parse_ports(raw: &str) -> BTreeSet<u8> {
    raw.split(PORT_SEPARATOR)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| token.parse::<u8>().ok())
        .filter(|port| (1..=MAX_PORTS).contains(port))
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::secret::SecretCodecError;
    use crate::application::settings::{MemorySettingsStore, MockSettingsStore};
    use outlet_core::domain::device::DescriptorField;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Marks encoded values with a prefix so tests can read the stored form.
    struct PrefixCodec;

    impl SecretCodec for PrefixCodec {
        fn encode(&self, plaintext: &str) -> String {
            format!("enc:{plaintext}")
        }

        fn decode(&self, encoded: &str) -> Result<String, SecretCodecError> {
            encoded
                .strip_prefix("enc:")
                .map(str::to_string)
                .ok_or_else(|| SecretCodecError::Encoding(encoded.to_string()))
        }
    }

    fn make_device(id: &str) -> DeviceDescriptor {
        DeviceDescriptor::new(id, format!("Strip {id}"), "10.0.0.5".parse().unwrap())
            .with_credentials("admin", "hunter2")
            .with_capability(CapabilityKind::Switch, 1.0)
            .with_capability(CapabilityKind::Power, 0.05)
            .with_ports([1, 2, 3])
    }

    fn load_registry(store: &MemorySettingsStore) -> DeviceRegistry {
        DeviceRegistry::load(Arc::new(store.clone()), Arc::new(PrefixCodec)).unwrap()
    }

    fn empty_mock_store() -> MockSettingsStore {
        let mut store = MockSettingsStore::new();
        store.expect_load().returning(|| Ok(SettingsDocument::new()));
        store
    }

    #[test]
    fn test_load_from_empty_store_yields_empty_registry() {
        let registry = load_registry(&MemorySettingsStore::new());
        assert!(registry.is_empty());
        assert!(!registry.get_debug_logging());
    }

    #[test]
    fn test_add_then_get_returns_equal_descriptor() {
        // Arrange
        let registry = load_registry(&MemorySettingsStore::new());
        let device = make_device("dev1");

        // Act
        registry.add_or_update(device.clone()).unwrap();

        // Assert
        assert_eq!(registry.get("dev1"), Some(device));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_add_writes_expected_document_layout() {
        // Arrange
        let store = MemorySettingsStore::new();
        let registry = load_registry(&store);

        // Act
        registry.add_or_update(make_device("dev1")).unwrap();

        // Assert
        let doc = store.document();
        assert_eq!(doc.get(DEFAULT_SECTION, DEVICE_IDS_KEY), Some("dev1"));
        assert_eq!(doc.get("dev1", NAME_KEY), Some("Strip dev1"));
        assert_eq!(doc.get("dev1", ADDRESS_KEY), Some("10.0.0.5"));
        assert_eq!(doc.get("dev1", USERNAME_KEY), Some("admin"));
        assert_eq!(doc.get("dev1", PASSWORD_KEY), Some("enc:hunter2"));
        assert_eq!(doc.get("dev1", "PowerResolution"), Some("0.05"));
        assert_eq!(doc.get("dev1", "SwitchResolution"), Some("1"));
        assert_eq!(doc.get("dev1", "VoltageResolution"), None);
        assert_eq!(doc.get("dev1", PORTS_KEY), Some("1,2,3"));
    }

    #[test]
    fn test_update_drops_keys_of_disabled_capability() {
        // Arrange
        let store = MemorySettingsStore::new();
        let registry = load_registry(&store);
        registry.add_or_update(make_device("dev1")).unwrap();

        // Act
        let mut updated = make_device("dev1");
        updated.capabilities.remove(&CapabilityKind::Power);
        registry.add_or_update(updated).unwrap();

        // Assert
        assert_eq!(store.document().get("dev1", "PowerResolution"), None);
        assert!(!registry.get("dev1").unwrap().is_enabled(CapabilityKind::Power));
    }

    #[test]
    fn test_update_with_same_id_keeps_single_entry() {
        let registry = load_registry(&MemorySettingsStore::new());
        registry.add_or_update(make_device("dev1")).unwrap();

        let mut renamed = make_device("dev1");
        renamed.display_name = "Renamed".to_string();
        registry.add_or_update(renamed).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("dev1").unwrap().display_name, "Renamed");
    }

    #[test]
    fn test_invalid_descriptor_is_rejected_without_saving() {
        // Arrange: save must never be called.
        let mut store = empty_mock_store();
        store.expect_save().never();
        let registry = DeviceRegistry::load(Arc::new(store), Arc::new(PrefixCodec)).unwrap();
        let mut device = make_device("dev1");
        device.credentials.username.clear();
        device.enabled_ports.insert(9);

        // Act
        let err = registry.add_or_update(device).unwrap_err();

        // Assert
        match err {
            RegistryError::Validation(v) => {
                assert!(v.has_problem_with(DescriptorField::Username));
                assert!(v.has_problem_with(DescriptorField::Port));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_padded_id_or_name_is_rejected_before_it_can_be_stored() {
        // Arrange
        let store = MemorySettingsStore::new();
        let registry = load_registry(&store);
        let padded_id = DeviceDescriptor {
            id: " dev1 ".to_string(),
            ..make_device("dev1")
        };
        let padded_name = DeviceDescriptor {
            display_name: " Rack ".to_string(),
            ..make_device("dev2")
        };

        // Act
        let id_result = registry.add_or_update(padded_id);
        let name_result = registry.add_or_update(padded_name);

        // Assert
        assert!(matches!(
            id_result,
            Err(RegistryError::Validation(ref v)) if v.has_problem_with(DescriptorField::Id)
        ));
        assert!(matches!(
            name_result,
            Err(RegistryError::Validation(ref v)) if v.has_problem_with(DescriptorField::DisplayName)
        ));
        assert!(registry.is_empty());
        assert_eq!(store.document(), SettingsDocument::new());
    }

    #[test]
    fn test_every_accepted_descriptor_reloads_unchanged() {
        // Arrange: inner whitespace is kept; only surrounding whitespace is refused.
        let store = MemorySettingsStore::new();
        let device = DeviceDescriptor {
            display_name: "Rack  PDU #2".to_string(),
            ..make_device("rack pdu-2")
        };
        load_registry(&store).add_or_update(device.clone()).unwrap();

        // Act
        let reloaded = load_registry(&store);

        // Assert
        assert_eq!(reloaded.get_all().keys().collect::<Vec<_>>(), vec!["rack pdu-2"]);
        assert_eq!(reloaded.get("rack pdu-2"), Some(device));
    }

    #[test]
    fn test_failed_save_leaves_registry_unchanged_and_silent() {
        // Arrange
        let mut store = empty_mock_store();
        store
            .expect_save()
            .times(1)
            .returning(|_| Err(PersistenceError::Unavailable("disk full".to_string())));
        let registry = DeviceRegistry::load(Arc::new(store), Arc::new(PrefixCodec)).unwrap();
        let notified = Arc::new(AtomicUsize::new(0));
        let n = Arc::clone(&notified);
        let _sub = registry.subscribe(move || {
            n.fetch_add(1, Ordering::SeqCst);
        });

        // Act
        let result = registry.add_or_update(make_device("dev1"));

        // Assert
        assert!(matches!(result, Err(RegistryError::Persistence(_))));
        assert!(registry.get("dev1").is_none());
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_remove_keeps_device() {
        // Arrange: first save (the add) succeeds, the second (the remove) fails.
        let mut store = empty_mock_store();
        let mut seq = mockall::Sequence::new();
        store
            .expect_save()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        store
            .expect_save()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(PersistenceError::Unavailable("locked".to_string())));
        let registry = DeviceRegistry::load(Arc::new(store), Arc::new(PrefixCodec)).unwrap();
        registry.add_or_update(make_device("dev1")).unwrap();

        // Act
        let result = registry.remove("dev1");

        // Assert
        assert!(result.is_err());
        assert!(registry.get("dev1").is_some());
    }

    #[test]
    fn test_remove_unknown_id_returns_false_without_saving() {
        let mut store = empty_mock_store();
        store.expect_save().never();
        let registry = DeviceRegistry::load(Arc::new(store), Arc::new(PrefixCodec)).unwrap();

        assert!(!registry.remove("ghost").unwrap());
    }

    #[test]
    fn test_remove_last_device_clears_id_list_and_section() {
        // Arrange
        let store = MemorySettingsStore::new();
        let registry = load_registry(&store);
        registry.add_or_update(make_device("dev1")).unwrap();

        // Act
        let removed = registry.remove("dev1").unwrap();

        // Assert
        assert!(removed);
        let doc = store.document();
        assert_eq!(doc.get(DEFAULT_SECTION, DEVICE_IDS_KEY), Some(""));
        assert!(doc.section("dev1").is_none());
    }

    #[test]
    fn test_id_list_is_sorted_and_pipe_separated() {
        let store = MemorySettingsStore::new();
        let registry = load_registry(&store);

        registry.add_or_update(make_device("b")).unwrap();
        registry.add_or_update(make_device("a")).unwrap();

        assert_eq!(store.document().get(DEFAULT_SECTION, DEVICE_IDS_KEY), Some("a|b"));
    }

    #[test]
    fn test_debug_logging_flag_round_trips_through_store() {
        let store = MemorySettingsStore::new();
        let registry = load_registry(&store);

        registry.set_debug_logging(true).unwrap();

        assert_eq!(store.document().get(DEFAULT_SECTION, DEBUG_LOGGING_KEY), Some("true"));
        assert!(load_registry(&store).get_debug_logging());
    }

    #[test]
    fn test_debug_logging_parse_is_case_insensitive_and_defaults_to_false() {
        let cases = [("TRUE", true), ("False", false), ("yes", false), ("", false)];
        for (raw, expected) in cases {
            let mut doc = SettingsDocument::new();
            doc.set(DEFAULT_SECTION, DEBUG_LOGGING_KEY, raw);
            let registry = load_registry(&MemorySettingsStore::with_document(doc));
            assert_eq!(registry.get_debug_logging(), expected, "raw value {raw:?}");
        }
    }

    #[test]
    fn test_load_applies_defaults_for_missing_and_garbled_values() {
        // Arrange: a section with only a bad address and a bad resolution.
        let mut doc = SettingsDocument::new();
        doc.set(DEFAULT_SECTION, DEVICE_IDS_KEY, "dev1");
        doc.set("dev1", ADDRESS_KEY, "not-an-ip");
        doc.set("dev1", "VoltageResolution", "abc");
        doc.set("dev1", PASSWORD_KEY, "garbage");

        // Act
        let registry = load_registry(&MemorySettingsStore::with_document(doc));

        // Assert
        let device = registry.get("dev1").unwrap();
        assert_eq!(device.display_name, "dev1");
        assert_eq!(device.address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(device.credentials.username, "");
        assert_eq!(device.credentials.secret, "");
        assert_eq!(device.resolution(CapabilityKind::Voltage), Some(0.1));
        assert!(!device.is_enabled(CapabilityKind::Power));
        assert_eq!(device.enabled_ports, (1..=MAX_PORTS).collect());
    }

    #[test]
    fn test_load_drops_out_of_range_port_tokens() {
        let mut doc = SettingsDocument::new();
        doc.set(DEFAULT_SECTION, DEVICE_IDS_KEY, "dev1");
        doc.set("dev1", PORTS_KEY, "0, 2,x,8,9,300");

        let registry = load_registry(&MemorySettingsStore::with_document(doc));

        assert_eq!(registry.get("dev1").unwrap().enabled_ports, BTreeSet::from([2, 8]));
    }

    #[test]
    fn test_load_ignores_empty_duplicate_and_reserved_ids() {
        let mut doc = SettingsDocument::new();
        doc.set(DEFAULT_SECTION, DEVICE_IDS_KEY, "dev1||dev1|settings| dev2 ");

        let registry = load_registry(&MemorySettingsStore::with_document(doc));

        let ids: Vec<String> = registry.get_all().keys().cloned().collect();
        assert_eq!(ids, vec!["dev1".to_string(), "dev2".to_string()]);
    }

    #[test]
    fn test_load_propagates_store_failure() {
        let mut store = MockSettingsStore::new();
        store
            .expect_load()
            .returning(|| Err(PersistenceError::Unavailable("offline".to_string())));

        let result = DeviceRegistry::load(Arc::new(store), Arc::new(PrefixCodec));

        assert!(matches!(result, Err(PersistenceError::Unavailable(_))));
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_writes() {
        let registry = load_registry(&MemorySettingsStore::new());
        registry.add_or_update(make_device("dev1")).unwrap();

        let before = registry.get_all();
        registry.remove("dev1").unwrap();

        assert!(before.contains_key("dev1"));
        assert!(registry.get_all().is_empty());
    }

    #[test]
    fn test_observer_sees_committed_state() {
        // Arrange
        let registry = Arc::new(load_registry(&MemorySettingsStore::new()));
        let seen = Arc::new(AtomicUsize::new(0));
        let (r, s) = (Arc::clone(&registry), Arc::clone(&seen));
        let _sub = registry.subscribe(move || {
            s.store(r.len(), Ordering::SeqCst);
        });

        // Act
        registry.add_or_update(make_device("dev1")).unwrap();

        // Assert
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_each_successful_mutation_notifies_once() {
        let registry = load_registry(&MemorySettingsStore::new());
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let _sub = registry.subscribe(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.add_or_update(make_device("dev1")).unwrap();
        registry.set_debug_logging(true).unwrap();
        registry.remove("dev1").unwrap();
        registry.remove("dev1").unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_closed_registry_rejects_writes_but_serves_reads() {
        let registry = load_registry(&MemorySettingsStore::new());
        registry.add_or_update(make_device("dev1")).unwrap();

        registry.close();

        assert!(matches!(
            registry.add_or_update(make_device("dev2")),
            Err(RegistryError::Closed)
        ));
        assert!(matches!(registry.set_debug_logging(true), Err(RegistryError::Closed)));
        assert!(registry.get("dev1").is_some());
    }
}
