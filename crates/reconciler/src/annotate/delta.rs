use super::{
    digits_only, first_text, format_money, format_percent, format_signed_money, Annotator,
    Candidate, Observed,
};
use crate::context::PageContext;
use crate::document::{Annotation, ForeignDocument, NodeId};
use crate::selector::Selector;
use log::debug;
use once_cell::sync::Lazy;
use overlay_catalog::EntityId;
use reqwest::Url;
use serde::Serialize;

const MARKER: &str = "delta-badge";

static TILES: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        ".city-shop, .shop, .items .item, .shop-list .item, .imarket-list .item, li[data-item]",
    )
    .expect("static selector")
});
static FALLBACK_TILES: Lazy<Selector> =
    Lazy::new(|| Selector::parse("li[data-item], div[data-item]").expect("static selector"));
static ID_BUTTON: Lazy<Selector> =
    Lazy::new(|| Selector::parse("button[data-item]").expect("static selector"));
static ID_LINK: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("a[href*=\"XID=\"], a[href*=\"xid=\"]").expect("static selector")
});
static PRICE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        ".price, .cost, .value, .buyPrice, .sellPrice, .right .number, .details .right, \
         .rt .price, .rt .number",
    )
    .expect("static selector")
});
static NAME: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".name, .title, .name-wrap .name, .info .name, .c-name, .desc .name")
        .expect("static selector")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaClass {
    /// The local price is above the reference.
    Unfavorable,
    /// The local price is below the reference.
    Favorable,
    Neutral,
}

impl DeltaClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unfavorable => "unfavorable",
            Self::Favorable => "favorable",
            Self::Neutral => "neutral",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceDelta {
    pub delta: f64,
    pub ratio: f64,
    pub class: DeltaClass,
}

/// Compares an observed price against the reference; a missing reference counts as 0.
#[must_use]
pub fn price_delta(observed: f64, reference: Option<f64>) -> PriceDelta {
    let reference = reference.unwrap_or(0.0);
    let delta = observed - reference;
    let ratio = if reference == 0.0 { 0.0 } else { delta / reference };
    let class = if delta > 0.0 {
        DeltaClass::Unfavorable
    } else if delta < 0.0 {
        DeltaClass::Favorable
    } else {
        DeltaClass::Neutral
    };
    PriceDelta {
        delta,
        ratio,
        class,
    }
}

/// Badges merchant tiles with the difference between the asking price and the reference.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeltaAnnotator;

impl DeltaAnnotator {
    fn tiles(doc: &dyn ForeignDocument) -> Vec<NodeId> {
        let mut tiles = TILES.select_all(doc, doc.root());
        if tiles.is_empty() {
            tiles = FALLBACK_TILES.select_all(doc, doc.root());
        }
        // A container that also matched (e.g. `.shop` around `li[data-item]`) would
        // otherwise borrow the first inner tile's id and price.
        let nested: Vec<NodeId> = tiles
            .iter()
            .copied()
            .filter(|tile| {
                tiles
                    .iter()
                    .any(|other| other != tile && is_ancestor(doc, *tile, *other))
            })
            .collect();
        tiles.retain(|tile| !nested.contains(tile));
        tiles
    }
}

fn is_ancestor(doc: &dyn ForeignDocument, ancestor: NodeId, node: NodeId) -> bool {
    let mut cursor = doc.parent(node);
    while let Some(current) = cursor {
        if current == ancestor {
            return true;
        }
        cursor = doc.parent(current);
    }
    false
}

pub(crate) fn tile_entity_id(doc: &dyn ForeignDocument, tile: NodeId) -> Option<EntityId> {
    let parse = |raw: &str| raw.trim().parse::<EntityId>().ok().filter(|id| *id > 0);
    if let Some(raw) = doc.attr(tile, "data-item") {
        return parse(raw);
    }
    if let Some(button) = ID_BUTTON.select_first(doc, tile) {
        return doc.attr(button, "data-item").and_then(parse);
    }
    let link = ID_LINK.select_first(doc, tile)?;
    let href = doc.attr(link, "href")?;
    let base = Url::parse("https://localhost/").ok()?;
    let url = base.join(href).ok()?;
    let xid = url
        .query_pairs()
        .find(|(name, _)| name == "XID" || name == "xid")
        .map(|(_, value)| value.into_owned())?;
    parse(&xid)
}

impl Annotator for DeltaAnnotator {
    fn context(&self) -> PageContext {
        PageContext::Merchant
    }

    fn marker(&self) -> &'static str {
        MARKER
    }

    fn scan(&self, doc: &dyn ForeignDocument) -> Vec<Candidate> {
        let mut out = Vec::new();
        for tile in Self::tiles(doc) {
            let Some(entity_id) = tile_entity_id(doc, tile) else {
                continue;
            };
            let Some(price) = first_text(doc, tile, &PRICE).as_deref().and_then(digits_only) else {
                debug!("Skipping tile for item {entity_id}: no price");
                continue;
            };
            #[allow(clippy::cast_precision_loss)]
            let price = price as f64;
            out.push(Candidate {
                entity_id,
                observed: Observed::Price(price),
                entry: tile,
                anchor: tile,
                name: first_text(doc, tile, &NAME),
            });
        }
        out
    }

    fn label(&self, candidate: &Candidate, reference: Option<f64>) -> Annotation {
        let price = match candidate.observed {
            Observed::Price(p) => p,
            Observed::Quantity(_) => 0.0,
        };
        let result = price_delta(price, reference);
        let summary = format!(
            "{} ({})",
            format_signed_money(result.delta),
            format_percent(result.ratio)
        );
        let mut title = String::new();
        if let Some(name) = &candidate.name {
            title.push_str(name);
            title.push('\n');
        }
        title.push_str(&format!(
            "Shop: {}\nMarket: {}\nΔ: {summary}",
            format_money(price),
            format_money(reference.unwrap_or(0.0)),
        ));
        Annotation {
            marker: MARKER,
            classes: vec![
                "overlay-delta-badge".to_string(),
                result.class.as_str().to_string(),
            ],
            text: summary,
            title: Some(title),
            action: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentTree, NodeSpec};
    use pretty_assertions::assert_eq;

    #[test]
    fn delta_classification() {
        let above = price_delta(120.0, Some(100.0));
        assert_eq!(above.delta, 20.0);
        assert!((above.ratio - 0.2).abs() < 1e-12);
        assert_eq!(above.class, DeltaClass::Unfavorable);

        let below = price_delta(80.0, Some(100.0));
        assert_eq!(below.delta, -20.0);
        assert_eq!(below.class, DeltaClass::Favorable);

        let equal = price_delta(100.0, Some(100.0));
        assert_eq!(equal.class, DeltaClass::Neutral);
        assert_eq!(equal.ratio, 0.0);

        let unknown = price_delta(50.0, None);
        assert_eq!(unknown.ratio, 0.0);
        assert_eq!(unknown.delta, 50.0);
    }

    #[test]
    fn badge_label_and_tooltip() {
        let tree = DocumentTree::from_spec(&NodeSpec::new("li"));
        let candidate = Candidate {
            entity_id: 2,
            observed: Observed::Price(120.0),
            entry: tree.root(),
            anchor: tree.root(),
            name: Some("Hammer".to_string()),
        };
        let badge = DeltaAnnotator.label(&candidate, Some(100.0));
        assert_eq!(badge.text, "+$20 (+20.0%)");
        assert_eq!(badge.classes, vec!["overlay-delta-badge", "unfavorable"]);
        assert_eq!(
            badge.title.as_deref(),
            Some("Hammer\nShop: $120\nMarket: $100\nΔ: +$20 (+20.0%)")
        );
    }

    #[test]
    fn tile_ids_fall_back_through_sources() {
        let tree = DocumentTree::from_spec(&NodeSpec::new("div").children([
            NodeSpec::new("div").attr("data-item", "5"),
            NodeSpec::new("div").child(NodeSpec::new("button").attr("data-item", "6")),
            NodeSpec::new("div").child(NodeSpec::new("a").attr("href", "/item.php?XID=7&x=1")),
            NodeSpec::new("div").child(NodeSpec::new("a").attr("href", "/profiles.php")),
        ]));
        let ids: Vec<_> = tree
            .children(tree.root())
            .into_iter()
            .map(|tile| tile_entity_id(&tree, tile))
            .collect();
        assert_eq!(ids, vec![Some(5), Some(6), Some(7), None]);
    }

    #[test]
    fn scan_prefers_innermost_tiles_and_requires_price() {
        let tree = DocumentTree::from_spec(
            &NodeSpec::new("body").child(NodeSpec::new("ul").class("shop").children([
                NodeSpec::new("li")
                    .attr("data-item", "1")
                    .child(NodeSpec::new("span").class("name").text("Hammer"))
                    .child(NodeSpec::new("span").class("price").text("$1,200")),
                NodeSpec::new("li")
                    .attr("data-item", "2")
                    .child(NodeSpec::new("span").class("price").text("sold out")),
            ])),
        );
        let candidates = DeltaAnnotator.scan(&tree);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].entity_id, 1);
        assert_eq!(candidates[0].observed, Observed::Price(1200.0));
        assert_eq!(candidates[0].name.as_deref(), Some("Hammer"));
    }
}
