#![allow(dead_code)]

use async_trait::async_trait;
use overlay_catalog::{
    ApiKey, CatalogCache, CatalogConfig, CredentialResolver, ManualClock, MemoryStore, Prompter,
    CREDENTIAL_KEY,
};
use overlay_reconciler::{DocumentTree, ForeignDocument, NodeId, NodeSpec, MARKER_ATTR};
use overlay_transport::{Transport, TransportError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const KEY: &str = "TestKey0123456789";
pub const INVENTORY_URL: &str = "https://www.torn.com/item.php";
pub const MERCHANT_URL: &str = "https://www.torn.com/shops.php?step=bitsnbobs";

pub struct MockTransport {
    calls: AtomicUsize,
    pub urls: Mutex<Vec<String>>,
    reply: Mutex<Result<Value, TransportError>>,
    delay: Mutex<Duration>,
}

impl MockTransport {
    pub fn set_reply(&self, reply: Result<Value, TransportError>) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get_json(&self, url: &str) -> Result<Value, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        let delay = *self.delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.reply.lock().unwrap().clone()
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub transport: Arc<MockTransport>,
    pub credentials: Arc<CredentialResolver>,
    pub catalog: Arc<CatalogCache>,
}

pub fn catalog_payload() -> Value {
    json!({
        "items": {
            "1": {"market_value": 250},
            "2": {"market_value": 100},
            "3": {"market_value": 7}
        }
    })
}

pub fn harness(with_key: bool) -> Harness {
    let store = Arc::new(if with_key {
        MemoryStore::with_entries([(CREDENTIAL_KEY, KEY)])
    } else {
        MemoryStore::new()
    });
    let transport = Arc::new(MockTransport {
        calls: AtomicUsize::new(0),
        urls: Mutex::new(Vec::new()),
        reply: Mutex::new(Ok(catalog_payload())),
        delay: Mutex::new(Duration::from_millis(20)),
    });
    let credentials = Arc::new(CredentialResolver::new(store.clone(), None));
    let catalog = Arc::new(CatalogCache::new(
        CatalogConfig {
            api_base: "https://api.test".to_string(),
            ..CatalogConfig::default()
        },
        transport.clone(),
        credentials.clone(),
        store.clone(),
        Arc::new(ManualClock::at(1_700_000_000_000)),
    ));
    Harness {
        store,
        transport,
        credentials,
        catalog,
    }
}

pub fn inventory_row(id: u64, quantity: u64) -> NodeSpec {
    NodeSpec::new("li").attr("data-item", id.to_string()).child(
        NodeSpec::new("span")
            .class("name-wrap")
            .child(NodeSpec::new("span").class("name").text(format!("Item {id}")))
            .child(NodeSpec::new("span").class("qty").text(format!("x{quantity}"))),
    )
}

/// `#category-wrap` with a hidden pane and a visible one holding `rows`.
pub fn inventory_page(rows: &[(u64, u64)]) -> NodeSpec {
    NodeSpec::new("body").child(
        NodeSpec::new("div").attr("id", "category-wrap").children([
            NodeSpec::new("ul")
                .class("items-cont")
                .attr("style", "display:none")
                .child(inventory_row(3, 9)),
            NodeSpec::new("ul")
                .class("items-cont")
                .children(rows.iter().map(|(id, qty)| inventory_row(*id, *qty))),
        ]),
    )
}

pub fn merchant_page(tiles: &[(u64, u64)]) -> NodeSpec {
    NodeSpec::new("body").child(NodeSpec::new("ul").class("shop-list").children(
        tiles.iter().map(|(id, price)| {
            NodeSpec::new("li")
                .class("item")
                .child(NodeSpec::new("button").attr("data-item", id.to_string()))
                .child(NodeSpec::new("span").class("name").text(format!("Item {id}")))
                .child(NodeSpec::new("span").class("price").text(format!("${price}")))
        }),
    ))
}

/// Every engine-owned node, in document order.
pub fn annotations(tree: &DocumentTree) -> Vec<NodeId> {
    tree.descendants(tree.root())
        .into_iter()
        .filter(|node| tree.attr(*node, MARKER_ATTR).is_some())
        .collect()
}

pub fn annotation_texts(tree: &DocumentTree) -> Vec<String> {
    annotations(tree)
        .into_iter()
        .map(|node| tree.own_text(node).unwrap_or_default().to_string())
        .collect()
}

pub struct FixedPrompt(pub &'static str);

impl Prompter for FixedPrompt {
    fn prompt(&self, _current: Option<&ApiKey>) -> Option<String> {
        Some(self.0.to_string())
    }
}
