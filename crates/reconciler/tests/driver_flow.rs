mod common;

use common::{annotation_texts, harness, inventory_page, FixedPrompt, Harness, INVENTORY_URL, KEY};
use overlay_catalog::ErrorKind;
use overlay_reconciler::{
    AnnotationAction, DocumentTree, PassOutcome, PassReport, ReconcileState, Reconciler,
    ReconcilerConfig, ReconcilerHandle,
};
use overlay_transport::TransportError;
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{timeout, Instant};

fn start(
    h: &Harness,
    document: &Arc<Mutex<DocumentTree>>,
    prompter: Option<Arc<FixedPrompt>>,
) -> ReconcilerHandle {
    ReconcilerHandle::start(
        Arc::new(Reconciler::new(h.catalog.clone())),
        document.clone(),
        INVENTORY_URL,
        prompter.map(|p| p as Arc<dyn overlay_catalog::Prompter>),
        ReconcilerConfig::default(),
    )
}

fn page() -> Arc<Mutex<DocumentTree>> {
    Arc::new(Mutex::new(DocumentTree::from_spec(&inventory_page(&[(1, 4), (2, 1)]))))
}

async fn next_report(updates: &mut broadcast::Receiver<PassReport>) -> PassReport {
    timeout(Duration::from_secs(600), updates.recv())
        .await
        .expect("a pass should finish")
        .expect("update channel open")
}

async fn assert_quiet(updates: &mut broadcast::Receiver<PassReport>, window: Duration) {
    if let Ok(report) = timeout(window, updates.recv()).await {
        panic!("unexpected pass: {report:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn boot_pass_runs_without_a_trigger() {
    let h = harness(true);
    let document = page();
    let handle = start(&h, &document, None);
    let mut updates = handle.subscribe_updates();

    let report = next_report(&mut updates).await;

    assert_eq!(report.reason, "boot");
    assert_eq!(report.outcome, PassOutcome::Rendered);
    assert_eq!(handle.status_snapshot().state, ReconcileState::Rendered);
    assert_eq!(handle.status_snapshot().passes, 1);
    assert_eq!(annotation_texts(&document.lock().unwrap()), vec!["$1,000", "$100"]);
}

#[tokio::test(start_paused = true)]
async fn mutation_burst_is_coalesced_into_one_pass() {
    let h = harness(true);
    let document = page();
    let handle = start(&h, &document, None);
    let mut updates = handle.subscribe_updates();
    next_report(&mut updates).await;

    for _ in 0..10 {
        handle.notify_mutation().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let report = next_report(&mut updates).await;
    assert_eq!(report.reason, "mutation");
    assert_quiet(&mut updates, Duration::from_secs(5)).await;
    assert_eq!(annotation_texts(&document.lock().unwrap()).len(), 2);
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn navigation_during_resolving_runs_exactly_one_more_pass() {
    let h = harness(true);
    h.transport.set_delay(Duration::from_millis(500));
    let document = page();
    let handle = start(&h, &document, None);
    let mut updates = handle.subscribe_updates();
    let mut status = handle.status_stream();

    status
        .wait_for(|s| s.state == ReconcileState::Resolving)
        .await
        .unwrap();
    handle
        .navigate("https://www.torn.com/item.php#/category=Melee")
        .await
        .unwrap();
    handle.notify_mutation().await.unwrap();

    let boot = next_report(&mut updates).await;
    assert_eq!(boot.reason, "boot");
    let follow_up = next_report(&mut updates).await;
    assert_eq!(follow_up.reason, "navigation");
    assert_quiet(&mut updates, Duration::from_secs(5)).await;
    assert_eq!(
        handle.status_snapshot().address,
        "https://www.torn.com/item.php#/category=Melee"
    );
}

#[tokio::test(start_paused = true)]
async fn blocked_transport_is_retried_on_a_timer() {
    let h = harness(true);
    h.transport
        .set_reply(Err(TransportError::Blocked("connection refused".to_string())));
    let document = page();
    let handle = start(&h, &document, None);
    let mut updates = handle.subscribe_updates();

    let failed = next_report(&mut updates).await;
    assert!(matches!(
        failed.outcome,
        PassOutcome::Errored {
            kind: ErrorKind::TransportBlocked,
            ..
        }
    ));
    assert!(handle.status_snapshot().retry_scheduled);
    assert_eq!(handle.status_snapshot().consecutive_failures, 1);

    h.transport.set_reply(Ok(common::catalog_payload()));
    let started = Instant::now();
    let retried = next_report(&mut updates).await;

    assert_eq!(retried.reason, "retry");
    assert_eq!(retried.outcome, PassOutcome::Rendered);
    assert!(started.elapsed() >= Duration::from_secs(59));
    assert_eq!(handle.status_snapshot().consecutive_failures, 0);
    assert_eq!(annotation_texts(&document.lock().unwrap()), vec!["$1,000", "$100"]);
}

#[tokio::test(start_paused = true)]
async fn application_errors_are_not_retried() {
    let h = harness(true);
    h.transport.set_reply(Err(TransportError::Application(
        "Incorrect key (code 2)".to_string(),
    )));
    let document = page();
    let handle = start(&h, &document, None);
    let mut updates = handle.subscribe_updates();

    let failed = next_report(&mut updates).await;
    assert!(matches!(
        failed.outcome,
        PassOutcome::Errored {
            kind: ErrorKind::RemoteApplicationError,
            ..
        }
    ));
    assert!(!handle.status_snapshot().retry_scheduled);
    assert_quiet(&mut updates, Duration::from_secs(300)).await;
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn interaction_prompts_and_repaints() {
    let h = harness(false);
    let document = page();
    let handle = start(&h, &document, Some(Arc::new(FixedPrompt(KEY))));
    let mut updates = handle.subscribe_updates();

    let failed = next_report(&mut updates).await;
    assert!(matches!(
        failed.outcome,
        PassOutcome::Errored {
            kind: ErrorKind::CredentialMissing,
            ..
        }
    ));

    handle
        .interact(AnnotationAction::SetCredential)
        .await
        .unwrap();

    let mut report = next_report(&mut updates).await;
    while report.outcome != PassOutcome::Rendered {
        report = next_report(&mut updates).await;
    }
    assert_eq!(
        h.credentials.resolve().map(|k| k.as_str().to_string()),
        Some(KEY.to_string())
    );
    assert_eq!(annotation_texts(&document.lock().unwrap()), vec!["$1,000", "$100"]);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_stops_the_loop() {
    let h = harness(true);
    let document = page();
    let handle = start(&h, &document, None);
    let mut updates = handle.subscribe_updates();
    next_report(&mut updates).await;

    drop(handle);

    let closed = timeout(Duration::from_secs(5), updates.recv())
        .await
        .expect("loop should stop");
    assert!(matches!(closed, Err(broadcast::error::RecvError::Closed)));
}
