use super::{load_document, write_document};
use crate::config::Overlay;
use crate::host::QueuedPrompter;
use anyhow::{bail, Context as AnyhowContext, Result};
use clap::Args;
use console::style;
use log::{debug, info, warn};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use overlay_catalog::Prompter;
use overlay_reconciler::{
    AnnotationAction, DocumentTree, PassOutcome, PassReport, Reconciler, ReconcilerConfig,
    ReconcilerHandle,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Document tree as JSON; rewritten by some other process
    #[arg(long)]
    pub document: PathBuf,

    /// Address of the page the document belongs to
    #[arg(long)]
    pub url: String,

    /// Where the annotated document is written after every pass
    #[arg(long)]
    pub out: PathBuf,

    /// Quiet period that closes a burst of document changes
    #[arg(long, default_value_t = 120)]
    pub debounce_ms: u64,

    /// Delay before retrying after the catalog API was unreachable
    #[arg(long, default_value_t = 60)]
    pub retry_secs: u64,
}

enum StdinCommand {
    Navigate(String),
    Refresh,
    SetKey(Option<String>),
    Quit,
}

fn parse_stdin_line(line: &str) -> Option<StdinCommand> {
    let mut parts = line.split_whitespace();
    let command = parts.next()?;
    let argument = parts.next().map(str::to_string);
    match command {
        "navigate" => argument.map(StdinCommand::Navigate),
        "refresh" => Some(StdinCommand::Refresh),
        "set-key" => Some(StdinCommand::SetKey(argument)),
        "quit" | "exit" => Some(StdinCommand::Quit),
        _ => None,
    }
}

pub async fn run(args: WatchArgs, overlay: &Overlay) -> Result<()> {
    if args.out == args.document {
        bail!("--out must differ from --document, otherwise every write retriggers the watcher");
    }
    let document = Arc::new(Mutex::new(load_document(&args.document)?));
    let prompter = Arc::new(QueuedPrompter::default());
    let config = ReconcilerConfig {
        debounce: Duration::from_millis(args.debounce_ms),
        retry_after: Duration::from_secs(args.retry_secs.max(1)),
        ..ReconcilerConfig::default()
    };

    let handle = ReconcilerHandle::start(
        Arc::new(Reconciler::new(overlay.catalog.clone())),
        document.clone(),
        args.url.clone(),
        Some(prompter.clone() as Arc<dyn Prompter>),
        config,
    );
    let mut updates = handle.subscribe_updates();

    let (event_tx, mut event_rx) = mpsc::channel::<notify::Result<Event>>(64);
    let _watcher = create_document_watcher(&args.document, event_tx)?;
    let file_name = args.document.file_name().map(|name| name.to_os_string());

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    info!(
        "Watching {} for {} (commands: navigate <url>, refresh, set-key [KEY], quit)",
        args.document.display(),
        args.url
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            update = updates.recv() => match update {
                Ok(report) => {
                    publish(&document, &args.out, &report);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Skipped {skipped} pass reports");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            Some(event) = event_rx.recv() => {
                let touches_document = match event {
                    Ok(event) => event
                        .paths
                        .iter()
                        .any(|path| path.file_name() == file_name.as_deref()),
                    Err(err) => {
                        warn!("Watch error: {err}");
                        false
                    }
                };
                if touches_document {
                    reload(&document, &args.document, &handle).await;
                }
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_stdin_line(&line) {
                    Some(StdinCommand::Navigate(address)) => handle.navigate(address).await?,
                    Some(StdinCommand::Refresh) => handle.refresh("manual").await?,
                    Some(StdinCommand::SetKey(key)) => {
                        prompter.offer(key);
                        handle.interact(AnnotationAction::SetCredential).await?;
                    }
                    Some(StdinCommand::Quit) => break,
                    None if line.trim().is_empty() => {}
                    None => warn!("Unknown command: {}", line.trim()),
                },
                Ok(None) => stdin_open = false,
                Err(err) => {
                    warn!("Failed to read stdin: {err}");
                    stdin_open = false;
                }
            },
        }
    }

    Ok(())
}

fn create_document_watcher(
    document: &Path,
    sender: mpsc::Sender<notify::Result<Event>>,
) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = sender.blocking_send(res);
        },
        NotifyConfig::default(),
    )
    .context("Failed to start file watcher")?;
    let dir = match document.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {}", dir.display()))?;
    Ok(watcher)
}

async fn reload(document: &Arc<Mutex<DocumentTree>>, path: &Path, handle: &ReconcilerHandle) {
    let tree = match load_document(path) {
        Ok(tree) => tree,
        Err(err) => {
            // Half-written files show up mid-save; the next event brings the full one.
            debug!("Skipping reload: {err:#}");
            return;
        }
    };
    match document.lock() {
        Ok(mut current) => *current = tree,
        Err(_) => {
            warn!("Document lock poisoned; reload skipped");
            return;
        }
    }
    if let Err(err) = handle.notify_mutation().await {
        warn!("Reconciler stopped: {err}");
    }
}

fn publish(document: &Arc<Mutex<DocumentTree>>, out: &Path, report: &PassReport) {
    let written = match document.lock() {
        Ok(tree) => write_document(out, &tree),
        Err(_) => Err(anyhow::anyhow!("document lock poisoned")),
    };
    if let Err(err) = written {
        warn!("Failed to write {}: {err:#}", out.display());
    }

    let context = report.context.map(|c| c.as_str()).unwrap_or("-");
    let line = match &report.outcome {
        PassOutcome::Rendered => format!(
            "{} {} ({}) {} annotated in {}ms",
            style("rendered").green().bold(),
            context,
            report.reason,
            report.annotated,
            report.duration_ms
        ),
        PassOutcome::Idle => format!(
            "{} {} ({}) nothing to annotate",
            style("idle").dim(),
            context,
            report.reason
        ),
        PassOutcome::Errored { kind, message } => format!(
            "{} {} ({}) {:?}: {}",
            style("errored").red().bold(),
            context,
            report.reason,
            kind,
            message
        ),
    };
    eprintln!("{line}");
}
