use dialoguer::{theme::ColorfulTheme, Input};
use log::warn;
use overlay_catalog::{ApiKey, HostIntegration, Prompter};
use std::sync::Mutex;

pub const API_KEY_ENV: &str = "MARKET_OVERLAY_API_KEY";

/// Exposes a key provided by the surrounding environment.
pub struct EnvHost;

impl HostIntegration for EnvHost {
    fn api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }
}

/// Asks on the terminal; an empty answer or a closed terminal counts as cancel.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn prompt(&self, current: Option<&ApiKey>) -> Option<String> {
        let theme = ColorfulTheme::default();
        let mut input = Input::<String>::with_theme(&theme)
            .with_prompt("API key (16-64 letters or digits)")
            .allow_empty(true);
        if let Some(current) = current {
            input = input.with_initial_text(current.as_str());
        }
        match input.interact_text() {
            Ok(value) if !value.trim().is_empty() => Some(value),
            Ok(_) => None,
            Err(err) => {
                warn!("Prompt failed: {err}");
                None
            }
        }
    }
}

/// Answers the next prompt with a value typed earlier on the command stream.
#[derive(Default)]
pub struct QueuedPrompter {
    next: Mutex<Option<String>>,
}

impl QueuedPrompter {
    pub fn offer(&self, value: Option<String>) {
        if let Ok(mut next) = self.next.lock() {
            *next = value;
        }
    }
}

impl Prompter for QueuedPrompter {
    fn prompt(&self, _current: Option<&ApiKey>) -> Option<String> {
        self.next.lock().ok()?.take()
    }
}
