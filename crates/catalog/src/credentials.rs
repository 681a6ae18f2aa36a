//! API key discovery across ranked channels.
//!
//! Resolution order, first valid key wins:
//!
//! 1. `apikey` / `key` query parameter of the current navigational address
//! 2. our own persisted store entry
//! 3. a cooperating host integration
//! 4. a heuristic scan of the shared key/value store (last resort)
//!
//! A key seen in the address is persisted. Persisting a different key than the stored one
//! bumps the credential generation, which tells the catalog to drop what it cached.

use crate::KeyValueStore;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Store key holding the operator's API key.
pub const CREDENTIAL_KEY: &str = "market-overlay.apiKey";

const ADDRESS_PARAMS: &[&str] = &["apikey", "key"];
const NESTED_FIELDS: &[&str] = &["apiKey", "apikey", "key"];

static KEY_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{16,64}$").expect("static regex must compile"));
static KEY_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)api.?key|key").expect("static regex must compile"));

/// A validated, opaque API key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ApiKey(String);

impl ApiKey {
    /// Returns `None` unless `raw` matches `^[A-Za-z0-9]{16,64}$`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        KEY_SHAPE.is_match(raw).then(|| Self(raw.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First and last four characters only, for logs and status output.
    #[must_use]
    pub fn masked(&self) -> String {
        let head = &self.0[..4];
        let tail = &self.0[self.0.len() - 4..];
        format!("{head}…{tail}")
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ApiKey").field(&self.masked()).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Address,
    Store,
    Host,
    SharedScan,
}

impl CredentialSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::Store => "store",
            Self::Host => "host",
            Self::SharedScan => "shared-scan",
        }
    }
}

/// A host environment that can hand out the operator's key (e.g. an embedding app).
pub trait HostIntegration: Send + Sync {
    fn api_key(&self) -> Option<String>;
}

/// Asks the operator for a replacement key. Blocks only the caller.
pub trait Prompter: Send + Sync {
    /// `None` means the operator cancelled.
    fn prompt(&self, current: Option<&ApiKey>) -> Option<String>;
}

pub struct CredentialResolver {
    store: Arc<dyn KeyValueStore>,
    host: Option<Arc<dyn HostIntegration>>,
    address: Mutex<Option<String>>,
    generation: watch::Sender<u64>,
}

impl CredentialResolver {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, host: Option<Arc<dyn HostIntegration>>) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            store,
            host,
            address: Mutex::new(None),
            generation,
        }
    }

    /// Records the current navigational address for the address channel.
    pub fn observe_address(&self, url: &str) {
        if let Ok(mut guard) = self.address.lock() {
            *guard = Some(url.to_string());
        }
    }

    #[must_use]
    pub fn resolve(&self) -> Option<ApiKey> {
        self.resolve_with_source().map(|(key, _)| key)
    }

    #[must_use]
    pub fn resolve_with_source(&self) -> Option<(ApiKey, CredentialSource)> {
        let stored = self.stored_key();

        if let Some(key) = self.from_address() {
            if stored.as_ref() != Some(&key) {
                info!("Using API key {} from the page address", key.masked());
                self.persist(&key);
            }
            return Some((key, CredentialSource::Address));
        }

        if let Some(key) = stored {
            return Some((key, CredentialSource::Store));
        }

        if let Some(key) = self
            .host
            .as_ref()
            .and_then(|host| host.api_key())
            .and_then(|raw| ApiKey::parse(raw.trim()))
        {
            return Some((key, CredentialSource::Host));
        }

        self.scan_shared_store()
            .map(|key| (key, CredentialSource::SharedScan))
    }

    /// Prompts for a new key, persists it when valid and invalidates cached catalog data.
    pub fn prompt_and_store(&self, prompter: &dyn Prompter) -> Option<ApiKey> {
        let current = self.resolve();
        let raw = prompter.prompt(current.as_ref())?;
        let Some(key) = ApiKey::parse(raw.trim()) else {
            warn!("Rejected API key input: expected 16-64 alphanumeric characters");
            return None;
        };
        self.persist(&key);
        info!("Stored API key {}", key.masked());
        Some(key)
    }

    /// Replaces the stored key without prompting.
    pub fn replace(&self, key: &ApiKey) {
        self.persist(key);
    }

    /// Drops the stored key. Counts as a credential change.
    pub fn clear(&self) {
        if let Err(err) = self.store.remove(CREDENTIAL_KEY) {
            warn!("Failed to remove stored API key: {err}");
        }
        self.bump_generation();
    }

    /// Monotonic counter bumped on every credential replacement.
    #[must_use]
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    fn persist(&self, key: &ApiKey) {
        if let Err(err) = self.store.set(CREDENTIAL_KEY, key.as_str()) {
            warn!("Failed to persist API key: {err}");
        }
        self.bump_generation();
    }

    fn bump_generation(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    fn stored_key(&self) -> Option<ApiKey> {
        match self.store.get(CREDENTIAL_KEY) {
            Ok(value) => value.as_deref().and_then(ApiKey::parse),
            Err(err) => {
                warn!("Failed to read stored API key: {err}");
                None
            }
        }
    }

    fn from_address(&self) -> Option<ApiKey> {
        let address = self.address.lock().ok()?.clone()?;
        key_from_address(&address)
    }

    fn scan_shared_store(&self) -> Option<ApiKey> {
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(err) => {
                debug!("Shared store scan skipped: {err}");
                return None;
            }
        };
        for name in keys {
            let Ok(Some(value)) = self.store.get(&name) else {
                continue;
            };
            if let Some(key) = scan_entry(&name, &value) {
                debug!("API key found in shared store entry `{name}`");
                return Some(key);
            }
        }
        None
    }
}

/// Reads `apikey` or `key` from a URL's query string.
#[must_use]
pub fn key_from_address(address: &str) -> Option<ApiKey> {
    let url = Url::parse(address).ok()?;
    ADDRESS_PARAMS.iter().find_map(|param| {
        url.query_pairs()
            .find(|(name, _)| name == *param)
            .and_then(|(_, value)| ApiKey::parse(&value))
    })
}

fn scan_entry(name: &str, value: &str) -> Option<ApiKey> {
    if KEY_NAME.is_match(name) {
        if let Some(key) = ApiKey::parse(value) {
            return Some(key);
        }
    }
    if !(value.starts_with('{') && value.ends_with('}')) {
        return None;
    }
    let parsed: Value = serde_json::from_str(value).ok()?;
    let candidate = NESTED_FIELDS.iter().find_map(|field| {
        parsed
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    })?;
    ApiKey::parse(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use pretty_assertions::assert_eq;

    const KEY_A: &str = "AAAAbbbbCCCCdddd";
    const KEY_B: &str = "ZZZZyyyyXXXXwwww1234";

    struct FixedHost(Option<String>);

    impl HostIntegration for FixedHost {
        fn api_key(&self) -> Option<String> {
            self.0.clone()
        }
    }

    struct FixedPrompt(Option<&'static str>);

    impl Prompter for FixedPrompt {
        fn prompt(&self, _current: Option<&ApiKey>) -> Option<String> {
            self.0.map(ToString::to_string)
        }
    }

    fn resolver(store: Arc<MemoryStore>, host: Option<&str>) -> CredentialResolver {
        let host = host.map(|k| Arc::new(FixedHost(Some(k.to_string()))) as Arc<dyn HostIntegration>);
        CredentialResolver::new(store, host)
    }

    #[test]
    fn key_shape_validation() {
        assert!(ApiKey::parse(KEY_A).is_some());
        assert!(ApiKey::parse("short").is_none());
        assert!(ApiKey::parse("has-dash-in-the-key").is_none());
        assert!(ApiKey::parse(&"a".repeat(65)).is_none());
        assert!(ApiKey::parse(&"a".repeat(64)).is_some());
    }

    #[test]
    fn masked_key_hides_middle() {
        let key = ApiKey::parse(KEY_A).unwrap();
        assert_eq!(key.masked(), "AAAA…dddd");
        assert!(!format!("{key:?}").contains("bbbb"));
    }

    #[test]
    fn address_overrides_stored_key_and_is_persisted() {
        let store = Arc::new(MemoryStore::with_entries([(CREDENTIAL_KEY, KEY_A)]));
        let resolver = resolver(store.clone(), None);
        resolver.observe_address(&format!("https://www.torn.com/item.php?apikey={KEY_B}"));

        let (key, source) = resolver.resolve_with_source().expect("key");
        assert_eq!(key.as_str(), KEY_B);
        assert_eq!(source, CredentialSource::Address);
        assert_eq!(store.get(CREDENTIAL_KEY).unwrap().as_deref(), Some(KEY_B));
        assert_eq!(resolver.generation(), 1);

        // Same key again is not a replacement.
        let _ = resolver.resolve();
        assert_eq!(resolver.generation(), 1);
    }

    #[test]
    fn invalid_address_key_falls_through_to_store() {
        let store = Arc::new(MemoryStore::with_entries([(CREDENTIAL_KEY, KEY_A)]));
        let resolver = resolver(store, None);
        resolver.observe_address("https://www.torn.com/shops.php?key=nope");

        let (key, source) = resolver.resolve_with_source().expect("key");
        assert_eq!(key.as_str(), KEY_A);
        assert_eq!(source, CredentialSource::Store);
    }

    #[test]
    fn host_integration_precedes_shared_scan() {
        let store = Arc::new(MemoryStore::with_entries([("someApiKey", KEY_B)]));
        let resolver = resolver(store, Some(KEY_A));

        let (key, source) = resolver.resolve_with_source().expect("key");
        assert_eq!(key.as_str(), KEY_A);
        assert_eq!(source, CredentialSource::Host);
    }

    #[test]
    fn shared_scan_matches_key_names_and_nested_json() {
        let store = Arc::new(MemoryStore::with_entries([
            ("theme", "darkmodeenabled12345"),
            ("tornpda_settings", &*format!(r#"{{"apikey":"{KEY_B}","v":2}}"#)),
        ]));
        let resolver = resolver(store, None);
        let (key, source) = resolver.resolve_with_source().expect("key");
        assert_eq!(key.as_str(), KEY_B);
        assert_eq!(source, CredentialSource::SharedScan);
    }

    #[test]
    fn shared_scan_ignores_unrelated_values() {
        let store = Arc::new(MemoryStore::with_entries([
            ("theme", "darkmodeenabled12345"),
            ("prefs", r#"{"apiKey":"bad key!"}"#),
        ]));
        assert!(resolver(store, None).resolve().is_none());
    }

    #[test]
    fn prompt_stores_valid_key_and_bumps_generation() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(store.clone(), None);
        let mut rx = resolver.subscribe();

        let key = resolver.prompt_and_store(&FixedPrompt(Some(KEY_A)));
        assert_eq!(key.map(|k| k.as_str().to_string()), Some(KEY_A.to_string()));
        assert_eq!(store.get(CREDENTIAL_KEY).unwrap().as_deref(), Some(KEY_A));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);
    }

    #[test]
    fn prompt_rejects_invalid_or_cancelled_input() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(store.clone(), None);

        assert!(resolver.prompt_and_store(&FixedPrompt(Some("not valid"))).is_none());
        assert!(resolver.prompt_and_store(&FixedPrompt(None)).is_none());
        assert_eq!(store.get(CREDENTIAL_KEY).unwrap(), None);
        assert_eq!(resolver.generation(), 0);
    }
}
