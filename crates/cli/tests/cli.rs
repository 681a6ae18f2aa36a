use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::tempdir;

const KEY: &str = "TestKey0123456789";
// Nothing listens here, so any accidental fetch fails fast.
const DEAD_API: &str = "http://127.0.0.1:9";

#[allow(deprecated)]
fn overlay(store: &Path) -> Command {
    let mut cmd = Command::cargo_bin("market-overlay").expect("binary");
    cmd.env_remove("MARKET_OVERLAY_API_KEY")
        .env_remove("MARKET_OVERLAY_RELAY")
        .arg("--quiet")
        .arg("--store")
        .arg(store)
        .arg("--api-base")
        .arg(DEAD_API)
        .arg("--timeout-secs")
        .arg("2");
    cmd
}

fn stdout_json(cmd: &mut Command) -> Value {
    let output = cmd.output().expect("command run");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("valid json")
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_millis() as u64
}

fn write_store(path: &Path, key: Option<&str>) {
    let envelope = json!({
        "capturedAt": now_ms(),
        "records": { "1": 250.0, "2": 100.0 },
    });
    let mut entries = serde_json::Map::new();
    entries.insert(
        "market-overlay.catalog".to_string(),
        Value::String(envelope.to_string()),
    );
    if let Some(key) = key {
        entries.insert("market-overlay.apiKey".to_string(), Value::String(key.to_string()));
    }
    fs::write(path, serde_json::to_vec_pretty(&entries).unwrap()).unwrap();
}

fn inventory_document(path: &Path) {
    let row = |id: u64, qty: u64| {
        json!({
            "tag": "li",
            "attrs": { "data-item": id.to_string() },
            "children": [{
                "tag": "span",
                "attrs": { "class": "name-wrap" },
                "children": [
                    { "tag": "span", "attrs": { "class": "name" }, "text": format!("Item {id}") },
                    { "tag": "span", "attrs": { "class": "qty" }, "text": format!("x{qty}") },
                ],
            }],
        })
    };
    let page = json!({
        "tag": "body",
        "children": [{
            "attrs": { "id": "category-wrap" },
            "children": [{
                "tag": "ul",
                "attrs": { "class": "items-cont" },
                "children": [row(1, 4), row(2, 1)],
            }],
        }],
    });
    fs::write(path, serde_json::to_vec_pretty(&page).unwrap()).unwrap();
}

fn annotation_texts(node: &Value, out: &mut Vec<String>) {
    if node["attrs"]["data-overlay"].is_string() {
        out.push(node["text"].as_str().unwrap_or_default().to_string());
    }
    if let Some(children) = node["children"].as_array() {
        for child in children {
            annotation_texts(child, out);
        }
    }
}

#[test]
fn credential_set_then_show_reports_store_source() {
    let temp = tempdir().unwrap();
    let store = temp.path().join("store.json");

    let stored = stdout_json(overlay(&store).args(["credential", "set", KEY]));
    assert_eq!(stored["stored"], true);

    let shown = stdout_json(overlay(&store).args(["credential", "show"]));
    assert_eq!(shown["present"], true);
    assert_eq!(shown["source"], "store");
    assert_eq!(shown["key"], "Test…6789");
}

#[test]
fn credential_set_rejects_malformed_key() {
    let temp = tempdir().unwrap();
    let store = temp.path().join("store.json");

    overlay(&store)
        .args(["credential", "set", "short"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid API key"));

    let shown = stdout_json(overlay(&store).args(["credential", "show"]));
    assert_eq!(shown["present"], false);
}

#[test]
fn credential_from_environment_is_reported_as_host() {
    let temp = tempdir().unwrap();
    let store = temp.path().join("store.json");

    let shown = stdout_json(
        overlay(&store)
            .env("MARKET_OVERLAY_API_KEY", KEY)
            .args(["credential", "show"]),
    );
    assert_eq!(shown["source"], "host");
}

#[test]
fn annotate_without_key_marks_entries_unresolved() {
    let temp = tempdir().unwrap();
    let store = temp.path().join("store.json");
    let document = temp.path().join("page.json");
    inventory_document(&document);

    let body = stdout_json(overlay(&store).args([
        "annotate",
        "--document",
        document.to_str().unwrap(),
        "--url",
        "https://www.torn.com/item.php",
    ]));

    assert_eq!(body["report"]["outcome"], "errored");
    assert_eq!(body["report"]["kind"], "credential_missing");
    let mut texts = Vec::new();
    annotation_texts(&body["document"], &mut texts);
    assert_eq!(texts, vec!["?", "?"]);
}

#[test]
fn annotate_uses_persisted_catalog_and_writes_out() {
    let temp = tempdir().unwrap();
    let store = temp.path().join("store.json");
    let document = temp.path().join("page.json");
    let out = temp.path().join("annotated.json");
    write_store(&store, Some(KEY));
    inventory_document(&document);

    let report = stdout_json(overlay(&store).args([
        "annotate",
        "--document",
        document.to_str().unwrap(),
        "--url",
        "https://www.torn.com/item.php",
        "--out",
        out.to_str().unwrap(),
    ]));

    assert_eq!(report["outcome"], "rendered");
    assert_eq!(report["context"], "inventory");
    let annotated: Value = serde_json::from_slice(&fs::read(&out).unwrap()).unwrap();
    let mut texts = Vec::new();
    annotation_texts(&annotated, &mut texts);
    assert_eq!(texts, vec!["$1,000", "$100"]);
}

#[test]
fn annotate_on_unrelated_page_is_idle() {
    let temp = tempdir().unwrap();
    let store = temp.path().join("store.json");
    let document = temp.path().join("page.json");
    inventory_document(&document);

    let body = stdout_json(overlay(&store).args([
        "annotate",
        "--document",
        document.to_str().unwrap(),
        "--url",
        "https://www.torn.com/profiles.php?XID=1",
    ]));

    assert_eq!(body["report"]["outcome"], "idle");
    assert!(body["report"]["context"].is_null());
}

#[test]
fn catalog_status_and_lookup_read_the_store() {
    let temp = tempdir().unwrap();
    let store = temp.path().join("store.json");
    write_store(&store, Some(KEY));

    let status = stdout_json(overlay(&store).args(["catalog", "status"]));
    assert_eq!(status["catalog"]["records"], 2);
    assert_eq!(status["catalog"]["fresh"], true);

    let values = stdout_json(overlay(&store).args(["catalog", "lookup", "2", "5"]));
    assert_eq!(values[0]["reference_value"], 100.0);
    assert!(values[1]["reference_value"].is_null());
}

#[test]
fn credential_clear_drops_cached_catalog() {
    let temp = tempdir().unwrap();
    let store = temp.path().join("store.json");
    write_store(&store, Some(KEY));

    let cleared = stdout_json(overlay(&store).args(["credential", "clear"]));
    assert_eq!(cleared["cleared"], true);

    let status = stdout_json(overlay(&store).args(["catalog", "status"]));
    assert_eq!(status["catalog"]["records"], 0);
}

#[test]
fn catalog_fetch_against_unreachable_api_fails() {
    let temp = tempdir().unwrap();
    let store = temp.path().join("store.json");

    overlay(&store)
        .env("MARKET_OVERLAY_API_KEY", KEY)
        .args(["catalog", "fetch"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty());
}
