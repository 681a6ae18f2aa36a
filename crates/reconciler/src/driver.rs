use crate::annotate::AnnotationAction;
use crate::context::PageContext;
use crate::document::ForeignDocument;
use crate::pass::{PassOutcome, PassReport, ReconcileState, Reconciler};
use crate::{ReconcilerError, Result};
use log::{debug, error, info, warn};
use overlay_catalog::{ErrorKind, Prompter};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{self, Instant};

const BOOT_REASON: &str = "boot";
const MUTATION_REASON: &str = "mutation";
const RETRY_REASON: &str = "retry";

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    /// Quiet period that closes a burst of foreign mutations.
    pub debounce: Duration,
    /// Upper bound on how long a continuous burst can postpone a pass.
    pub max_batch_wait: Duration,
    /// Delay before retrying after the transport was blocked.
    pub retry_after: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(120),
            max_batch_wait: Duration::from_secs(1),
            retry_after: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcilerStatus {
    pub state: ReconcileState,
    pub context: Option<PageContext>,
    pub address: String,
    pub passes: u64,
    pub pending_triggers: usize,
    pub last_pass_at: Option<SystemTime>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub retry_scheduled: bool,
}

impl ReconcilerStatus {
    fn initial(address: &str) -> Self {
        Self {
            state: ReconcileState::Idle,
            context: PageContext::detect(address),
            address: address.to_string(),
            passes: 0,
            pending_triggers: 0,
            last_pass_at: None,
            last_error: None,
            consecutive_failures: 0,
            retry_scheduled: false,
        }
    }
}

enum Command {
    Mutation,
    Navigate { address: String },
    Refresh { reason: String },
    Interact { action: AnnotationAction },
    Shutdown,
}

/// Handle to a running reconciliation loop over one foreign document.
///
/// Dropping the last clone stops the loop.
#[derive(Clone)]
pub struct ReconcilerHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    command_tx: mpsc::Sender<Command>,
    update_tx: broadcast::Sender<PassReport>,
    status_tx: watch::Sender<ReconcilerStatus>,
    _status_guard: watch::Receiver<ReconcilerStatus>,
}

impl ReconcilerHandle {
    /// Spawns the loop; it runs a boot pass straight away.
    pub fn start<D>(
        reconciler: Arc<Reconciler>,
        document: Arc<Mutex<D>>,
        address: impl Into<String>,
        prompter: Option<Arc<dyn Prompter>>,
        config: ReconcilerConfig,
    ) -> Self
    where
        D: ForeignDocument + 'static,
    {
        let address = address.into();
        let (command_tx, command_rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(ReconcilerStatus::initial(&address));
        let (update_tx, _) = broadcast::channel(32);

        let worker = Worker {
            reconciler,
            document,
            prompter,
            config,
            address,
            command_tx: command_tx.downgrade(),
            update_tx: update_tx.clone(),
            status_tx: status_tx.clone(),
        };
        tokio::spawn(worker.run(command_rx));

        Self {
            inner: Arc::new(HandleInner {
                command_tx,
                update_tx,
                status_tx,
                _status_guard: status_rx,
            }),
        }
    }

    /// The foreign document changed; coalesced with other mutations before a pass runs.
    pub async fn notify_mutation(&self) -> Result<()> {
        self.send(Command::Mutation).await
    }

    /// Client-side navigation to `address`.
    pub async fn navigate(&self, address: impl Into<String>) -> Result<()> {
        self.send(Command::Navigate {
            address: address.into(),
        })
        .await
    }

    /// Requests an immediate pass, e.g. after the host reloaded a listing.
    pub async fn refresh(&self, reason: impl Into<String>) -> Result<()> {
        self.send(Command::Refresh {
            reason: reason.into(),
        })
        .await
    }

    /// The operator activated an annotation carrying `action`.
    pub async fn interact(&self, action: AnnotationAction) -> Result<()> {
        self.send(Command::Interact { action }).await
    }

    #[must_use]
    pub fn subscribe_updates(&self) -> broadcast::Receiver<PassReport> {
        self.inner.update_tx.subscribe()
    }

    #[must_use]
    pub fn status_snapshot(&self) -> ReconcilerStatus {
        self.inner.status_tx.borrow().clone()
    }

    #[must_use]
    pub fn status_stream(&self) -> watch::Receiver<ReconcilerStatus> {
        self.inner.status_tx.subscribe()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.inner
            .command_tx
            .send(command)
            .await
            .map_err(|e| ReconcilerError::ChannelClosed(format!("failed to send command: {e}")))
    }
}

impl Drop for ReconcilerHandle {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            let _ = self.inner.command_tx.try_send(Command::Shutdown);
        }
    }
}

struct Worker<D> {
    reconciler: Arc<Reconciler>,
    document: Arc<Mutex<D>>,
    prompter: Option<Arc<dyn Prompter>>,
    config: ReconcilerConfig,
    address: String,
    command_tx: mpsc::WeakSender<Command>,
    update_tx: broadcast::Sender<PassReport>,
    status_tx: watch::Sender<ReconcilerStatus>,
}

impl<D> Worker<D>
where
    D: ForeignDocument + 'static,
{
    async fn run(self, mut command_rx: mpsc::Receiver<Command>) {
        let mut queue = TriggerQueue::new(self.config.debounce, self.config.max_batch_wait);
        let mut status = ReconcilerStatus::initial(&self.address);
        let mut address = self.address.clone();
        let mut generation_rx = self.reconciler.catalog().credentials().subscribe();

        queue.immediate(BOOT_REASON);
        self.publish_pending(&mut status, &queue);

        loop {
            let next_deadline = queue.next_deadline();

            tokio::select! {
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(Command::Mutation) => queue.mutation(),
                        Some(Command::Navigate { address: next }) => {
                            debug!("Navigation to {next}");
                            address = next;
                            status.address.clone_from(&address);
                            status.context = PageContext::detect(&address);
                            queue.immediate("navigation");
                        }
                        Some(Command::Refresh { reason }) => queue.immediate(reason),
                        Some(Command::Interact { action }) => self.handle_interaction(action),
                        Some(Command::Shutdown) | None => break,
                    }
                    self.publish_pending(&mut status, &queue);
                }
                Ok(()) = generation_rx.changed() => {
                    info!("Credential changed; scheduling a fresh pass");
                    queue.immediate("credential-changed");
                    self.publish_pending(&mut status, &queue);
                }
                () = async {
                    if let Some(deadline) = next_deadline {
                        time::sleep_until(deadline).await;
                    }
                }, if next_deadline.is_some() => {
                    let reason = queue.take();

                    let report = {
                        let status_tx = &self.status_tx;
                        let status_ref = &mut status;
                        let mut on_state = |next: ReconcileState| {
                            status_ref.state = next;
                            let _ = status_tx.send(status_ref.clone());
                        };
                        self.reconciler
                            .run_pass(&self.document, &address, &reason, &mut on_state)
                            .await
                    };
                    self.record_report(&mut status, &mut queue, &report);
                    let _ = self.update_tx.send(report);
                }
            }
        }
        debug!("Reconciler loop stopped");
    }

    fn handle_interaction(&self, action: AnnotationAction) {
        match action {
            AnnotationAction::SetCredential => {
                let Some(prompter) = self.prompter.clone() else {
                    warn!("No prompter available; cannot set credential");
                    return;
                };
                let credentials = self.reconciler.catalog().credentials().clone();
                let Some(command_tx) = self.command_tx.upgrade() else {
                    return;
                };
                // The prompt blocks its caller only; passes keep running meanwhile.
                tokio::spawn(async move {
                    let prompted = tokio::task::spawn_blocking(move || {
                        credentials.prompt_and_store(prompter.as_ref()).is_some()
                    })
                    .await;
                    match prompted {
                        Ok(true) => info!("API key updated"),
                        Ok(false) => debug!("Credential prompt dismissed"),
                        Err(err) => error!("Credential prompt failed: {err}"),
                    }
                    let _ = command_tx
                        .send(Command::Refresh {
                            reason: "credential-prompt".to_string(),
                        })
                        .await;
                });
            }
        }
    }

    fn publish_pending(&self, status: &mut ReconcilerStatus, queue: &TriggerQueue) {
        status.pending_triggers = queue.triggers();
        if queue.has_pending() && status.state != ReconcileState::Resolving {
            status.state = ReconcileState::ScanPending;
        }
        let _ = self.status_tx.send(status.clone());
    }

    fn record_report(
        &self,
        status: &mut ReconcilerStatus,
        queue: &mut TriggerQueue,
        report: &PassReport,
    ) {
        status.passes += 1;
        status.last_pass_at = Some(report.completed_at);
        status.context = report.context;
        status.state = report.outcome.state();
        status.retry_scheduled = false;
        match &report.outcome {
            PassOutcome::Errored { kind, message } => {
                status.last_error = Some(message.clone());
                status.consecutive_failures += 1;
                if *kind == ErrorKind::TransportBlocked {
                    queue.schedule_retry(Instant::now() + self.config.retry_after);
                    status.retry_scheduled = true;
                    info!(
                        "Transport blocked; retrying in {}s",
                        self.config.retry_after.as_secs()
                    );
                }
            }
            PassOutcome::Rendered | PassOutcome::Idle => {
                status.last_error = None;
                status.consecutive_failures = 0;
            }
        }
        // Triggers that arrived during the pass are already queued for the next one.
        if queue.has_pending() {
            status.state = ReconcileState::ScanPending;
        }
        status.pending_triggers = queue.triggers();
        let _ = self.status_tx.send(status.clone());
    }
}

/// Coalesces triggers into passes.
///
/// A burst of mutations runs once it has been quiet for `debounce`, or `max_batch` after
/// its first mutation. Navigation, refreshes and credential changes run as soon as the
/// loop is free. A retry only fires when nothing else is queued.
struct TriggerQueue {
    debounce: Duration,
    max_batch: Duration,
    triggers: usize,
    burst: Option<Burst>,
    immediate: Option<String>,
    retry_at: Option<Instant>,
}

#[derive(Clone, Copy)]
struct Burst {
    first: Instant,
    last: Instant,
}

impl TriggerQueue {
    const fn new(debounce: Duration, max_batch: Duration) -> Self {
        Self {
            debounce,
            max_batch,
            triggers: 0,
            burst: None,
            immediate: None,
            retry_at: None,
        }
    }

    fn mutation(&mut self) {
        let now = Instant::now();
        self.triggers += 1;
        self.burst = Some(match self.burst {
            Some(burst) => Burst { last: now, ..burst },
            None => Burst {
                first: now,
                last: now,
            },
        });
    }

    /// Queues a pass that skips the debounce; the latest reason wins.
    fn immediate(&mut self, reason: impl Into<String>) {
        self.triggers += 1;
        self.immediate = Some(reason.into());
    }

    fn schedule_retry(&mut self, at: Instant) {
        self.retry_at = Some(at);
    }

    const fn triggers(&self) -> usize {
        self.triggers
    }

    const fn has_pending(&self) -> bool {
        self.immediate.is_some() || self.burst.is_some()
    }

    fn next_deadline(&self) -> Option<Instant> {
        if self.immediate.is_some() {
            return Some(Instant::now());
        }
        match self.burst {
            Some(burst) => Some((burst.last + self.debounce).min(burst.first + self.max_batch)),
            None => self.retry_at,
        }
    }

    /// Empties the queue, including any retry, and names the pass that replaces it.
    fn take(&mut self) -> String {
        let reason = match (self.immediate.take(), self.burst.take()) {
            (Some(reason), _) => reason,
            (None, Some(_)) => MUTATION_REASON.to_string(),
            (None, None) => RETRY_REASON.to_string(),
        };
        self.triggers = 0;
        self.retry_at = None;
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn quiet_period_sets_the_deadline() {
        let mut queue = TriggerQueue::new(Duration::from_millis(100), Duration::from_secs(1));
        queue.mutation();
        time::advance(Duration::from_millis(40)).await;
        queue.mutation();
        assert!(queue.has_pending());
        assert_eq!(
            queue.next_deadline(),
            Some(Instant::now() + Duration::from_millis(100))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn steady_mutations_run_after_max_batch() {
        let mut queue = TriggerQueue::new(Duration::from_millis(100), Duration::from_millis(250));
        let start = Instant::now();
        for _ in 0..5 {
            queue.mutation();
            time::advance(Duration::from_millis(80)).await;
        }
        assert_eq!(queue.next_deadline(), Some(start + Duration::from_millis(250)));
        assert_eq!(queue.triggers(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_trigger_skips_debounce_and_names_the_pass() {
        let mut queue = TriggerQueue::new(Duration::from_secs(5), Duration::from_secs(10));
        queue.mutation();
        queue.immediate("navigation");
        queue.mutation();
        assert_eq!(queue.next_deadline(), Some(Instant::now()));
        assert_eq!(queue.take(), "navigation");
        assert!(!queue.has_pending());
        assert_eq!(queue.triggers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_waits_behind_queued_triggers() {
        let mut queue = TriggerQueue::new(Duration::from_millis(100), Duration::from_secs(1));
        let at = Instant::now() + Duration::from_secs(60);
        queue.schedule_retry(at);
        assert!(!queue.has_pending());
        assert_eq!(queue.next_deadline(), Some(at));

        queue.mutation();
        assert_eq!(
            queue.next_deadline(),
            Some(Instant::now() + Duration::from_millis(100))
        );
        assert_eq!(queue.take(), MUTATION_REASON);
        assert_eq!(queue.next_deadline(), None);

        queue.schedule_retry(at);
        assert_eq!(queue.take(), RETRY_REASON);
    }
}
