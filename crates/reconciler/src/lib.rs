//! # Overlay Reconciler
//!
//! Keeps engine-owned labels attached to entries of a document the engine does not own.
//!
//! ## Pass lifecycle
//!
//! ```text
//!   trigger (boot / navigation / debounced mutation / refresh / retry)
//!       │
//!       ▼
//!   ScanPending ──no candidates──> Idle
//!       │
//!       ▼
//!   Resolving (CatalogCache::ensure_resolved, document unlocked)
//!       │
//!       ├──ok──> re-scan + label every entry ───────> Rendered
//!       └──err─> re-scan + `unresolved` marker each ─> Errored
//! ```
//!
//! Labels carry a `data-overlay` marker, so each pass replaces the previous label instead of
//! stacking a new one.
//!
//! ## Example
//!
//! ```no_run
//! use overlay_catalog::{CatalogCache, CatalogConfig, CredentialResolver, MemoryStore, SystemClock};
//! use overlay_reconciler::{DocumentTree, NodeSpec, Reconciler};
//! use overlay_transport::{DirectFetcher, FallbackTransport};
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let credentials = Arc::new(CredentialResolver::new(store.clone(), None));
//!     let direct = DirectFetcher::new(Duration::from_secs(10))?;
//!     let catalog = Arc::new(CatalogCache::new(
//!         CatalogConfig::default(),
//!         Arc::new(FallbackTransport::new(Arc::new(direct), None)),
//!         credentials,
//!         store,
//!         Arc::new(SystemClock),
//!     ));
//!     let document = Mutex::new(DocumentTree::from_spec(&NodeSpec::new("body")));
//!     let report = Reconciler::new(catalog)
//!         .run_once(&document, "https://www.torn.com/item.php")
//!         .await;
//!     println!("{report:?}");
//!     Ok(())
//! }
//! ```

pub mod annotate;
mod context;
pub mod document;
mod driver;
mod error;
mod pass;
pub mod selector;

pub use annotate::{
    format_money, format_percent, AnnotationAction, Annotator, Candidate, DeltaAnnotator,
    DeltaClass, Observed, TotalValueAnnotator, UNRESOLVED_MARKER,
};
pub use context::PageContext;
pub use document::{
    Annotation, DocumentTree, ForeignDocument, NodeId, NodeSpec, ACTION_ATTR, MARKER_ATTR,
};
pub use driver::{ReconcilerConfig, ReconcilerHandle, ReconcilerStatus};
pub use error::{ReconcilerError, Result};
pub use pass::{PassOutcome, PassReport, ReconcileState, Reconciler};
pub use selector::Selector;
