//! # Overlay Catalog
//!
//! Resolves the operator's API key and keeps the remote reference value catalog cached.
//!
//! ## Lookup path
//!
//! ```text
//! ensure_resolved(ids)
//!     │
//!     ├──> in-memory catalog (fresh) ──────────> done
//!     │
//!     ├──> persisted envelope (within TTL) ────> hydrate, done
//!     │
//!     └──> CredentialResolver::resolve
//!            └─> one full-catalog fetch (single-flight)
//!                  └─> replace memory + persist envelope
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use overlay_catalog::{
//!     CatalogCache, CatalogConfig, CredentialResolver, MemoryStore, SystemClock,
//! };
//! use overlay_transport::{DirectFetcher, FallbackTransport};
//! use std::collections::HashSet;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let credentials = Arc::new(CredentialResolver::new(store.clone(), None));
//!     let transport = FallbackTransport::new(Arc::new(DirectFetcher::new(Duration::from_secs(10))?), None);
//!     let catalog = CatalogCache::new(
//!         CatalogConfig::default(),
//!         Arc::new(transport),
//!         credentials,
//!         store,
//!         Arc::new(SystemClock),
//!     );
//!     catalog.ensure_resolved(&HashSet::from([206])).await?;
//!     println!("{:?}", catalog.reference_value(206));
//!     Ok(())
//! }
//! ```

mod cache;
mod clock;
pub mod credentials;
mod error;
mod store;

pub use cache::{
    parse_catalog, CacheEnvelope, CatalogCache, CatalogConfig, CatalogRecord, CatalogStatus,
    EntityId, CATALOG_KEY, DEFAULT_API_BASE, DEFAULT_TTL,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credentials::{
    ApiKey, CredentialResolver, CredentialSource, HostIntegration, Prompter, CREDENTIAL_KEY,
};
pub use error::{CatalogError, ErrorKind, Result, StoreError};
pub use store::{FileStore, KeyValueStore, MemoryStore};
