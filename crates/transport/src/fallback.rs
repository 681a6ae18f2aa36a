use crate::{redact_url, Fetcher, Result, Transport, TransportError};
use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;

/// Direct fetch first, then at most one attempt through the host relay.
#[derive(Clone)]
pub struct FallbackTransport {
    primary: Arc<dyn Fetcher>,
    relay: Option<Arc<dyn Fetcher>>,
}

impl FallbackTransport {
    #[must_use]
    pub fn new(primary: Arc<dyn Fetcher>, relay: Option<Arc<dyn Fetcher>>) -> Self {
        Self { primary, relay }
    }

    #[must_use]
    pub fn has_relay(&self) -> bool {
        self.relay.is_some()
    }
}

async fn attempt(fetcher: &dyn Fetcher, url: &str) -> Result<Value> {
    let body = fetcher.fetch_text(url).await?;
    serde_json::from_str(&body).map_err(|e| {
        TransportError::Malformed(format!("{} returned unparseable JSON: {e}", fetcher.name()))
    })
}

/// Extracts the message of a top-level `error` member, if any.
///
/// Accepts a bare string or an object shaped like `{"code": 2, "error": "Incorrect key"}`.
#[must_use]
pub fn application_error(payload: &Value) -> Option<String> {
    let error = payload.get("error")?;
    let message = match error {
        Value::Null => return None,
        Value::String(message) => message.clone(),
        Value::Object(map) => match (map.get("error").and_then(Value::as_str), map.get("code")) {
            (Some(message), Some(code)) => format!("{message} (code {code})"),
            (Some(message), None) => message.to_string(),
            _ => error.to_string(),
        },
        other => other.to_string(),
    };
    Some(message)
}

#[async_trait]
impl Transport for FallbackTransport {
    async fn get_json(&self, url: &str) -> Result<Value> {
        let payload = match attempt(self.primary.as_ref(), url).await {
            Ok(payload) => payload,
            Err(primary_err) => {
                let Some(relay) = &self.relay else {
                    warn!("{} failed with no relay available: {primary_err}", redact_url(url));
                    return Err(primary_err);
                };
                warn!(
                    "{} failed ({primary_err}); retrying through relay `{}`",
                    redact_url(url),
                    relay.name()
                );
                attempt(relay.as_ref(), url)
                    .await
                    .map_err(|relay_err| relay_err.after_primary(&primary_err))?
            }
        };

        if let Some(message) = application_error(&payload) {
            debug!("{} answered with application error: {message}", redact_url(url));
            return Err(TransportError::Application(message));
        }
        Ok(payload)
    }
}
