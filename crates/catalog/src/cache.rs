use crate::{Clock, CatalogError, CredentialResolver, KeyValueStore, Result, StoreError};
use log::{debug, info, warn};
use overlay_transport::{Transport, TransportError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

/// Store key holding the persisted [`CacheEnvelope`].
pub const CATALOG_KEY: &str = "market-overlay.catalog";

pub const DEFAULT_TTL: Duration = Duration::from_secs(12 * 60 * 60);

pub const DEFAULT_API_BASE: &str = "https://api.torn.com";

pub type EntityId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CatalogRecord {
    pub entity_id: EntityId,
    pub reference_value: f64,
}

/// Persisted form of the full catalog, written in one store operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEnvelope {
    pub captured_at: u64,
    pub records: BTreeMap<EntityId, f64>,
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub api_base: String,
    pub ttl: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            ttl: DEFAULT_TTL,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogStatus {
    pub records: usize,
    pub captured_at_unix_ms: Option<u64>,
    pub age_ms: Option<u64>,
    pub fresh: bool,
    pub fetching: bool,
}

type FetchOutcome = Option<Result<()>>;

struct CatalogState {
    records: BTreeMap<EntityId, f64>,
    captured_at: Option<u64>,
    seen_generation: u64,
    in_flight: Option<watch::Receiver<FetchOutcome>>,
}

/// TTL-bound map from entity id to reference value, backed by a single-flight fetch of the
/// whole remote catalog.
pub struct CatalogCache {
    config: CatalogConfig,
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialResolver>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<CatalogState>,
}

enum Role {
    Lead(watch::Sender<FetchOutcome>),
    Wait(watch::Receiver<FetchOutcome>),
}

/// Clears the in-flight slot even if the leading future is dropped mid-fetch.
struct FlightGuard<'a> {
    cache: &'a CatalogCache,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.cache.lock_state().in_flight = None;
    }
}

impl CatalogCache {
    #[must_use]
    pub fn new(
        config: CatalogConfig,
        transport: Arc<dyn Transport>,
        credentials: Arc<CredentialResolver>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let seen_generation = credentials.generation();
        Self {
            config,
            transport,
            credentials,
            store,
            clock,
            state: Mutex::new(CatalogState {
                records: BTreeMap::new(),
                captured_at: None,
                seen_generation,
                in_flight: None,
            }),
        }
    }

    #[must_use]
    pub fn credentials(&self) -> &Arc<CredentialResolver> {
        &self.credentials
    }

    /// Makes sure reference values for `ids` are loaded and fresh.
    ///
    /// Concurrent callers share one outstanding fetch. On failure the in-memory catalog is
    /// left as it was.
    pub async fn ensure_resolved(&self, ids: &HashSet<EntityId>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.single_flight(ids).await
    }

    /// Makes sure a fresh catalog is loaded, regardless of which ids will be asked for.
    pub async fn ensure_fresh(&self) -> Result<()> {
        self.single_flight(&HashSet::new()).await
    }

    /// Loads the persisted envelope into memory if it is newer and still fresh.
    pub fn warm_from_store(&self) -> bool {
        let mut state = self.lock_state();
        self.sync_generation(&mut state);
        self.hydrate(&mut state)
    }

    async fn single_flight(&self, ids: &HashSet<EntityId>) -> Result<()> {
        loop {
            let role = {
                let mut state = self.lock_state();
                self.sync_generation(&mut state);
                if self.covers(&state, ids) {
                    return Ok(());
                }
                if let Some(rx) = &state.in_flight {
                    Role::Wait(rx.clone())
                } else {
                    if self.hydrate(&mut state) && self.covers(&state, ids) {
                        return Ok(());
                    }
                    let (tx, rx) = watch::channel(None);
                    state.in_flight = Some(rx);
                    Role::Lead(tx)
                }
            };

            match role {
                Role::Wait(mut rx) => {
                    debug!("Catalog fetch already in flight; waiting");
                    match rx.wait_for(Option::is_some).await {
                        Ok(outcome) => {
                            if let Some(outcome) = outcome.clone() {
                                return outcome;
                            }
                        }
                        // The leader was dropped before finishing; try again.
                        Err(_) => continue,
                    }
                }
                Role::Lead(tx) => {
                    let outcome = {
                        let _guard = FlightGuard { cache: self };
                        self.fetch_and_commit().await
                    };
                    let _ = tx.send(Some(outcome.clone()));
                    return outcome;
                }
            }
        }
    }

    #[must_use]
    pub fn reference_value(&self, id: EntityId) -> Option<f64> {
        self.lock_state().records.get(&id).copied()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<CatalogRecord> {
        self.lock_state()
            .records
            .iter()
            .map(|(&entity_id, &reference_value)| CatalogRecord {
                entity_id,
                reference_value,
            })
            .collect()
    }

    #[must_use]
    pub fn status(&self) -> CatalogStatus {
        let state = self.lock_state();
        let now = self.clock.now_ms();
        CatalogStatus {
            records: state.records.len(),
            captured_at_unix_ms: state.captured_at,
            age_ms: state.captured_at.map(|at| now.saturating_sub(at)),
            fresh: state.captured_at.is_some_and(|at| self.is_fresh(at)),
            fetching: state.in_flight.is_some(),
        }
    }

    /// Drops the in-memory catalog and the persisted envelope.
    pub fn invalidate(&self) -> std::result::Result<(), StoreError> {
        let mut state = self.lock_state();
        state.records.clear();
        state.captured_at = None;
        self.store.remove(CATALOG_KEY)
    }

    fn lock_state(&self) -> MutexGuard<'_, CatalogState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn is_fresh(&self, captured_at: u64) -> bool {
        let ttl_ms = u64::try_from(self.config.ttl.as_millis()).unwrap_or(u64::MAX);
        self.clock.now_ms().saturating_sub(captured_at) < ttl_ms
    }

    /// The catalog is always loaded whole, so a fresh catalog answers every id; ids it lacks
    /// are unknown to the service rather than missing locally.
    fn covers(&self, state: &CatalogState, ids: &HashSet<EntityId>) -> bool {
        let Some(captured_at) = state.captured_at else {
            return false;
        };
        if !self.is_fresh(captured_at) {
            return false;
        }
        let unknown = ids.iter().filter(|id| !state.records.contains_key(id)).count();
        if unknown > 0 {
            debug!("{unknown} requested id(s) are not in the catalog");
        }
        true
    }

    fn sync_generation(&self, state: &mut CatalogState) {
        let generation = self.credentials.generation();
        if generation == state.seen_generation {
            return;
        }
        info!("Credential changed; discarding cached catalog");
        state.seen_generation = generation;
        state.records.clear();
        state.captured_at = None;
        if let Err(err) = self.store.remove(CATALOG_KEY) {
            warn!("Failed to drop persisted catalog: {err}");
        }
    }

    fn hydrate(&self, state: &mut CatalogState) -> bool {
        let raw = match self.store.get(CATALOG_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(err) => {
                warn!("Failed to read persisted catalog: {err}");
                return false;
            }
        };
        let envelope: CacheEnvelope = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("Persisted catalog corrupted, ignoring: {err}");
                return false;
            }
        };
        if !self.is_fresh(envelope.captured_at) {
            debug!("Persisted catalog expired");
            return false;
        }
        if state
            .captured_at
            .is_some_and(|current| current >= envelope.captured_at)
        {
            return false;
        }
        debug!("Hydrated {} catalog records from store", envelope.records.len());
        state.records = envelope.records;
        state.captured_at = Some(envelope.captured_at);
        true
    }

    async fn fetch_and_commit(&self) -> Result<()> {
        let key = self.credentials.resolve().ok_or(CatalogError::NoCredential)?;
        let generation = {
            let mut state = self.lock_state();
            self.sync_generation(&mut state);
            state.seen_generation
        };

        let url = format!(
            "{}/torn/?selections=items&key={}",
            self.config.api_base.trim_end_matches('/'),
            key.as_str()
        );
        let payload = self.transport.get_json(&url).await?;
        let records = parse_catalog(&payload)?;

        let captured_at = self.clock.now_ms();
        let mut state = self.lock_state();
        if self.credentials.generation() != generation {
            warn!("Credential changed during catalog fetch; dropping result");
            return Err(CatalogError::Superseded);
        }

        info!("Fetched catalog with {} records", records.len());
        let envelope = CacheEnvelope {
            captured_at,
            records,
        };
        match serde_json::to_string(&envelope) {
            Ok(raw) => {
                if let Err(err) = self.store.set(CATALOG_KEY, &raw) {
                    warn!("Failed to persist catalog: {err}");
                }
            }
            Err(err) => warn!("Failed to serialize catalog: {err}"),
        }
        state.records = envelope.records;
        state.captured_at = Some(captured_at);
        Ok(())
    }
}

/// Reads `items: { "<id>": { "market_value": n } }`; non-numeric values count as 0.
pub fn parse_catalog(payload: &Value) -> std::result::Result<BTreeMap<EntityId, f64>, TransportError> {
    let items = payload
        .get("items")
        .and_then(Value::as_object)
        .ok_or_else(|| TransportError::Malformed("payload has no `items` object".to_string()))?;

    let mut records = BTreeMap::new();
    for (raw_id, item) in items {
        let Ok(id) = raw_id.trim().parse::<EntityId>() else {
            debug!("Skipping catalog entry with non-numeric id `{raw_id}`");
            continue;
        };
        let value = match item.get("market_value") {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
            _ => 0.0,
        };
        records.insert(id, if value.is_finite() { value } else { 0.0 });
    }
    Ok(records)
}
