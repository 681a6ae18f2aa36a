use super::{digits_only, first_text, format_money, Annotator, Candidate, Observed};
use crate::context::PageContext;
use crate::document::{text_content, Annotation, ForeignDocument, NodeId};
use crate::selector::Selector;
use log::debug;
use once_cell::sync::Lazy;
use overlay_catalog::EntityId;
use regex::Regex;

const MARKER: &str = "stack-value";

static CATEGORY_WRAP: Lazy<Selector> =
    Lazy::new(|| Selector::parse("#category-wrap").expect("static selector"));
static CATEGORY_PANES: Lazy<Selector> =
    Lazy::new(|| Selector::parse("#category-wrap > .items-cont").expect("static selector"));
static FALLBACK_ROWS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("li[data-item]").expect("static selector"));
static NAME_WRAP: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".name-wrap").expect("static selector"));
static QTY: Lazy<Selector> = Lazy::new(|| Selector::parse(".qty").expect("static selector"));
static INLINE_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)x\s?(\d+)").expect("static regex must compile"));

/// `quantity * reference`, with an unknown reference counted as 0.
#[must_use]
pub fn stack_total(quantity: u64, reference: Option<f64>) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let quantity = quantity as f64;
    quantity * reference.unwrap_or(0.0)
}

/// Labels inventory rows with the market value of the whole stack.
#[derive(Debug, Default, Clone, Copy)]
pub struct TotalValueAnnotator;

impl TotalValueAnnotator {
    /// Rows of the visible category pane. Without a category wrapper at all, every
    /// `li[data-item]` counts; with one but no visible pane, there is nothing to label.
    fn rows(doc: &dyn ForeignDocument) -> Vec<NodeId> {
        if CATEGORY_WRAP.select_first(doc, doc.root()).is_none() {
            return FALLBACK_ROWS.select_all(doc, doc.root());
        }
        CATEGORY_PANES
            .select_all(doc, doc.root())
            .into_iter()
            .find(|node| !doc.is_hidden(*node))
            .map(|pane| {
                doc.children(pane)
                    .into_iter()
                    .filter(|row| doc.attr(*row, "data-item").is_some())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// First match wins: count attribute, nested count element, `x<digits>` in the row text, 1.
pub(crate) fn extract_quantity(doc: &dyn ForeignDocument, row: NodeId) -> u64 {
    ["data-qty", "data-quantity"]
        .iter()
        .find_map(|name| doc.attr(row, name).and_then(digits_only))
        .or_else(|| first_text(doc, row, &QTY).as_deref().and_then(digits_only))
        .or_else(|| {
            let text = text_content(doc, row);
            INLINE_COUNT
                .captures(&text)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .filter(|n| *n > 0)
        })
        .unwrap_or(1)
}

impl Annotator for TotalValueAnnotator {
    fn context(&self) -> PageContext {
        PageContext::Inventory
    }

    fn marker(&self) -> &'static str {
        MARKER
    }

    fn scan(&self, doc: &dyn ForeignDocument) -> Vec<Candidate> {
        let mut out = Vec::new();
        for row in Self::rows(doc) {
            let Some(entity_id) = doc
                .attr(row, "data-item")
                .and_then(|raw| raw.trim().parse::<EntityId>().ok())
                .filter(|id| *id > 0)
            else {
                debug!("Skipping inventory row without a usable id");
                continue;
            };
            let anchor = NAME_WRAP.select_first(doc, row).unwrap_or(row);
            out.push(Candidate {
                entity_id,
                observed: Observed::Quantity(extract_quantity(doc, row)),
                entry: row,
                anchor,
                name: None,
            });
        }
        out
    }

    fn label(&self, candidate: &Candidate, reference: Option<f64>) -> Annotation {
        let quantity = match candidate.observed {
            Observed::Quantity(n) => n,
            Observed::Price(_) => 1,
        };
        let total = stack_total(quantity, reference);
        Annotation {
            marker: MARKER,
            classes: vec!["overlay-stack-value".to_string()],
            text: format_money(total),
            title: Some(format!(
                "{quantity} x {}",
                format_money(reference.unwrap_or(0.0))
            )),
            action: None,
        }
    }
}
