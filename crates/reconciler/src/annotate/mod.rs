//! Per-context scanning and idempotent label rendering.

mod delta;
mod total;

pub use delta::{price_delta, DeltaAnnotator, DeltaClass, PriceDelta};
pub use total::{stack_total, TotalValueAnnotator};

use crate::context::PageContext;
use crate::document::{Annotation, ForeignDocument, NodeId, MARKER_ATTR};
use crate::selector::Selector;
use overlay_catalog::EntityId;
use serde::Serialize;
use std::collections::HashSet;

/// Marker value of the placeholder shown when the catalog could not be resolved.
pub const UNRESOLVED_MARKER: &str = "unresolved";

/// Actions an annotation can carry back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnnotationAction {
    /// Ask the operator for a replacement API key, then re-run the pass.
    SetCredential,
}

impl AnnotationAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SetCredential => "set-credential",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "set-credential" => Some(Self::SetCredential),
            _ => None,
        }
    }
}

/// The observation a candidate carries besides its id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observed {
    Quantity(u64),
    Price(f64),
}

/// One annotatable entry found by a scan.
///
/// `entry` is the row or tile the label belongs to; `anchor` is where inside it the label
/// goes (possibly `entry` itself). Both are only valid until the document is next mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub entity_id: EntityId,
    pub observed: Observed,
    pub entry: NodeId,
    pub anchor: NodeId,
    pub name: Option<String>,
}

pub trait Annotator: Send + Sync {
    fn context(&self) -> PageContext;

    /// The marker value this annotator stamps on its labels.
    fn marker(&self) -> &'static str;

    fn scan(&self, doc: &dyn ForeignDocument) -> Vec<Candidate>;

    /// Builds the label for a resolved candidate. A missing reference value counts as 0.
    fn label(&self, candidate: &Candidate, reference: Option<f64>) -> Annotation;
}

/// Replaces whatever engine label the candidate's entry carries with `annotation`.
///
/// Labels anywhere under the entry are removed first, so a label left on a different node
/// of the same entry (e.g. before the owner added a wrapper) does not survive.
/// Returns `None` when the anchor has disappeared since the scan.
pub fn apply_annotation(
    doc: &mut dyn ForeignDocument,
    candidate: &Candidate,
    annotation: &Annotation,
) -> Option<NodeId> {
    if !doc.contains(candidate.anchor) {
        return None;
    }
    clear_annotations(doc, candidate.entry);
    doc.append_annotation(candidate.anchor, annotation)
}

/// Removes every engine-owned node under `scope`; returns how many were removed.
pub fn clear_annotations(doc: &mut dyn ForeignDocument, scope: NodeId) -> usize {
    engine_nodes(doc, scope)
        .into_iter()
        .filter(|node| doc.remove_node(*node))
        .count()
}

/// Removes labels stamped with one of `markers` that no longer sit under any of `entries`.
pub fn prune_stale(
    doc: &mut dyn ForeignDocument,
    markers: &[&str],
    entries: &HashSet<NodeId>,
) -> usize {
    let root = doc.root();
    let stale: Vec<NodeId> = engine_nodes(doc, root)
        .into_iter()
        .filter(|node| {
            doc.attr(*node, MARKER_ATTR)
                .is_some_and(|marker| markers.contains(&marker))
        })
        .filter(|node| !has_ancestor_in(doc, *node, entries))
        .collect();
    stale
        .into_iter()
        .filter(|node| doc.remove_node(*node))
        .count()
}

/// Engine-owned descendants of `scope`, without descending into them.
fn engine_nodes(doc: &dyn ForeignDocument, scope: NodeId) -> Vec<NodeId> {
    let mut found = Vec::new();
    let mut stack = doc.children(scope);
    while let Some(node) = stack.pop() {
        if doc.is_annotation(node) {
            found.push(node);
        } else {
            stack.extend(doc.children(node));
        }
    }
    found
}

fn has_ancestor_in(doc: &dyn ForeignDocument, node: NodeId, entries: &HashSet<NodeId>) -> bool {
    let mut cursor = doc.parent(node);
    while let Some(current) = cursor {
        if entries.contains(&current) {
            return true;
        }
        cursor = doc.parent(current);
    }
    false
}

/// Inert placeholder shown instead of a value after a failed resolution.
#[must_use]
pub fn unresolved_annotation(reason: &str) -> Annotation {
    Annotation {
        marker: UNRESOLVED_MARKER,
        classes: vec!["overlay-unresolved".to_string()],
        text: "?".to_string(),
        title: Some(format!("Market value unavailable: {reason}\nClick to set API key")),
        action: Some(AnnotationAction::SetCredential.as_str()),
    }
}

/// `$1,234`, rounding half up like the host's number formatting.
#[must_use]
pub fn format_money(value: f64) -> String {
    let rounded = if value.is_finite() {
        (value + 0.5).floor()
    } else {
        0.0
    };
    #[allow(clippy::cast_possible_truncation)]
    let whole = rounded as i64;
    let digits = whole.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if whole < 0 {
        format!("$-{grouped}")
    } else {
        format!("${grouped}")
    }
}

/// `+$20`, `-$20`, `$0`.
#[must_use]
pub fn format_signed_money(value: f64) -> String {
    let magnitude = format_money(value.abs());
    if magnitude == "$0" {
        magnitude
    } else if value > 0.0 {
        format!("+{magnitude}")
    } else {
        format!("-{magnitude}")
    }
}

/// `+20.0%` for a ratio of `0.2`.
#[must_use]
pub fn format_percent(ratio: f64) -> String {
    let percent = if ratio == 0.0 || !ratio.is_finite() {
        0.0
    } else {
        ratio * 100.0
    };
    let sign = if percent > 0.0 { "+" } else { "" };
    format!("{sign}{percent:.1}%")
}

/// Reads a positive integer from text, ignoring every non-digit.
pub(crate) fn digits_only(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse::<u64>().ok().filter(|n| *n > 0)
}

pub(crate) fn first_text(
    doc: &dyn ForeignDocument,
    scope: NodeId,
    selector: &Selector,
) -> Option<String> {
    selector
        .select_first(doc, scope)
        .map(|node| crate::document::text_content(doc, node).trim().to_string())
        .filter(|text| !text.is_empty())
}
