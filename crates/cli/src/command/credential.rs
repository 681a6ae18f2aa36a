use crate::config::Overlay;
use crate::host::TerminalPrompter;
use crate::print_json;
use anyhow::{bail, Context as AnyhowContext, Result};
use clap::Subcommand;
use log::warn;
use overlay_catalog::ApiKey;
use serde_json::json;

#[derive(Subcommand, Debug)]
pub enum CredentialCommand {
    /// Show which source the API key currently resolves from
    Show,

    /// Store a new API key (prompts when KEY is omitted)
    Set {
        /// 16-64 letters or digits
        key: Option<String>,
    },

    /// Forget the stored API key
    Clear,
}

pub async fn run(command: CredentialCommand, overlay: &Overlay) -> Result<()> {
    match command {
        CredentialCommand::Show => {
            let resolved = overlay.credentials.resolve_with_source();
            print_json(&json!({
                "present": resolved.is_some(),
                "source": resolved.as_ref().map(|(_, source)| source.as_str()),
                "key": resolved.as_ref().map(|(key, _)| key.masked()),
            }))
        }
        CredentialCommand::Set { key } => {
            let stored = match key {
                Some(raw) => {
                    let Some(key) = ApiKey::parse(raw.trim()) else {
                        bail!("Invalid API key: expected 16-64 letters or digits");
                    };
                    overlay.credentials.replace(&key);
                    key
                }
                None => {
                    let credentials = overlay.credentials.clone();
                    tokio::task::spawn_blocking(move || {
                        credentials.prompt_and_store(&TerminalPrompter)
                    })
                    .await
                    .context("Prompt task failed")?
                    .context("No valid API key entered")?
                }
            };
            drop_catalog(overlay);
            print_json(&json!({ "stored": true, "key": stored.masked() }))
        }
        CredentialCommand::Clear => {
            overlay.credentials.clear();
            drop_catalog(overlay);
            print_json(&json!({ "cleared": true }))
        }
    }
}

/// The persisted catalog belongs to the previous key.
fn drop_catalog(overlay: &Overlay) {
    if let Err(err) = overlay.catalog.invalidate() {
        warn!("Failed to drop cached catalog: {err}");
    }
}
