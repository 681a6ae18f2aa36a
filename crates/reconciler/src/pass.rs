use crate::annotate::{
    apply_annotation, prune_stale, unresolved_annotation, Annotator, DeltaAnnotator,
    TotalValueAnnotator, UNRESOLVED_MARKER,
};
use crate::context::PageContext;
use crate::document::{ForeignDocument, NodeId};
use log::{debug, info, warn};
use overlay_catalog::{CatalogCache, EntityId, ErrorKind};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

/// Per-context reconciliation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileState {
    Idle,
    ScanPending,
    Resolving,
    Rendered,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PassOutcome {
    /// No context or no candidates; the catalog was not consulted.
    Idle,
    Rendered,
    Errored { kind: ErrorKind, message: String },
}

impl PassOutcome {
    #[must_use]
    pub const fn state(&self) -> ReconcileState {
        match self {
            Self::Idle => ReconcileState::Idle,
            Self::Rendered => ReconcileState::Rendered,
            Self::Errored { .. } => ReconcileState::Errored,
        }
    }
}

/// Summary of one finished reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub completed_at: SystemTime,
    pub duration_ms: u64,
    pub reason: String,
    pub context: Option<PageContext>,
    pub candidates: usize,
    pub annotated: usize,
    #[serde(flatten)]
    pub outcome: PassOutcome,
}

/// Runs scan → resolve → annotate passes against one catalog.
///
/// Holds no document handles between passes; every pass starts from a fresh scan.
pub struct Reconciler {
    catalog: Arc<CatalogCache>,
    annotators: Vec<Arc<dyn Annotator>>,
}

impl Reconciler {
    /// A reconciler with the inventory and merchant annotators.
    #[must_use]
    pub fn new(catalog: Arc<CatalogCache>) -> Self {
        Self::with_annotators(
            catalog,
            vec![Arc::new(TotalValueAnnotator), Arc::new(DeltaAnnotator)],
        )
    }

    #[must_use]
    pub fn with_annotators(catalog: Arc<CatalogCache>, annotators: Vec<Arc<dyn Annotator>>) -> Self {
        Self {
            catalog,
            annotators,
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<CatalogCache> {
        &self.catalog
    }

    fn annotator_for(&self, context: PageContext) -> Option<&Arc<dyn Annotator>> {
        self.annotators.iter().find(|a| a.context() == context)
    }

    /// Markers of every label this reconciler can produce.
    fn markers(&self) -> Vec<&'static str> {
        self.annotators
            .iter()
            .map(|a| a.marker())
            .chain(std::iter::once(UNRESOLVED_MARKER))
            .collect()
    }

    /// Drops our labels that no longer sit under one of `entries`.
    fn prune<D: ForeignDocument>(&self, doc: &mut D, entries: &HashSet<NodeId>) {
        let removed = prune_stale(doc, &self.markers(), entries);
        if removed > 0 {
            debug!("Removed {removed} stale labels");
        }
    }

    /// One pass over `document` as seen at `address`.
    ///
    /// `on_state` observes the `Resolving` transition; the final state is in the report.
    /// The document lock is never held across the catalog await.
    pub async fn run_pass<D>(
        &self,
        document: &Mutex<D>,
        address: &str,
        reason: &str,
        on_state: &mut (dyn FnMut(ReconcileState) + Send),
    ) -> PassReport
    where
        D: ForeignDocument,
    {
        let started = Instant::now();
        let context = PageContext::detect(address);
        self.catalog.credentials().observe_address(address);

        let finish = |candidates: usize, annotated: usize, outcome: PassOutcome| PassReport {
            completed_at: SystemTime::now(),
            duration_ms: millis(started.elapsed()),
            reason: reason.to_string(),
            context,
            candidates,
            annotated,
            outcome,
        };

        let Some(annotator) = context.and_then(|c| self.annotator_for(c)) else {
            debug!("No annotator for {address}");
            self.prune(&mut *lock(document), &HashSet::new());
            return finish(0, 0, PassOutcome::Idle);
        };

        let ids: HashSet<EntityId> = {
            let mut doc = lock(document);
            let ids: HashSet<EntityId> = annotator
                .scan(&*doc)
                .into_iter()
                .map(|c| c.entity_id)
                .collect();
            if ids.is_empty() {
                self.prune(&mut *doc, &HashSet::new());
            }
            ids
        };
        if ids.is_empty() {
            debug!("No {} entries to annotate", annotator.context());
            return finish(0, 0, PassOutcome::Idle);
        }

        on_state(ReconcileState::Resolving);
        let resolved = self.catalog.ensure_resolved(&ids).await;

        // The foreign owner may have rebuilt the tree while we waited; scan again.
        let mut doc = lock(document);
        let candidates = annotator.scan(&*doc);
        let entries: HashSet<NodeId> = candidates.iter().map(|c| c.entry).collect();
        self.prune(&mut *doc, &entries);
        let mut annotated = 0;
        let outcome = match resolved {
            Ok(()) => {
                for candidate in &candidates {
                    let label =
                        annotator.label(candidate, self.catalog.reference_value(candidate.entity_id));
                    if apply_annotation(&mut *doc, candidate, &label).is_some() {
                        annotated += 1;
                    } else {
                        warn!("Entry for item {} vanished before annotation", candidate.entity_id);
                    }
                }
                info!(
                    "Annotated {annotated}/{} {} entries",
                    candidates.len(),
                    annotator.context()
                );
                PassOutcome::Rendered
            }
            Err(err) => {
                warn!("Catalog unavailable: {err}");
                let marker = unresolved_annotation(&err.to_string());
                for candidate in &candidates {
                    if apply_annotation(&mut *doc, candidate, &marker).is_some() {
                        annotated += 1;
                    }
                }
                PassOutcome::Errored {
                    kind: err.kind(),
                    message: err.to_string(),
                }
            }
        };
        finish(candidates.len(), annotated, outcome)
    }

    /// Convenience wrapper for a single pass without a state observer.
    pub async fn run_once<D: ForeignDocument>(
        &self,
        document: &Mutex<D>,
        address: &str,
    ) -> PassReport {
        self.run_pass(document, address, "manual", &mut |_| {}).await
    }
}

pub(crate) fn lock<D>(document: &Mutex<D>) -> MutexGuard<'_, D> {
    document
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
