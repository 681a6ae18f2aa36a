//! # Overlay Transport
//!
//! JSON over HTTP with a two-tier strategy.
//!
//! ```text
//! get_json(url)
//!     │
//!     ├──> Direct fetch (reqwest)
//!     │      └─> ok + parseable ──────────────┐
//!     │                                       │
//!     └──> on error / bad status / bad JSON   │
//!            └─> Host relay (if configured) ──┤
//!                                             ▼
//!                                   top-level `error` check
//! ```
//!
//! The direct path may be blocked by cross-origin policy in some hosts, while the relay is
//! only present in others, so neither is assumed to exist. Retries are the caller's job.
//!
//! ## Example
//!
//! ```no_run
//! use overlay_transport::{DirectFetcher, FallbackTransport, Transport};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), overlay_transport::TransportError> {
//!     let direct = DirectFetcher::new(Duration::from_secs(10))?;
//!     let transport = FallbackTransport::new(Arc::new(direct), None);
//!     let payload = transport.get_json("https://api.example.com/items").await?;
//!     println!("{payload}");
//!     Ok(())
//! }
//! ```

mod direct;
mod error;
mod fallback;
mod relay;

pub use direct::DirectFetcher;
pub use error::{Result, TransportError};
pub use fallback::{application_error, FallbackTransport};
pub use relay::CommandRelay;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// One way of turning a URL into a response body.
///
/// Implementations report a failed request or a non-success status as
/// [`TransportError::Blocked`]; payload parsing happens in [`FallbackTransport`].
#[async_trait]
pub trait Fetcher: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_text(&self, url: &str) -> Result<String>;
}

/// Fetches a URL and returns its JSON payload.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<Value>;
}

static SECRET_PARAM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([?&](?:api)?key=)[^&#]*").expect("static regex must compile")
});

/// Masks credential query parameters so URLs can be logged.
#[must_use]
pub fn redact_url(url: &str) -> String {
    SECRET_PARAM.replace_all(url, "${1}***").into_owned()
}

#[cfg(test)]
mod tests {
    use super::redact_url;

    #[test]
    fn redact_masks_key_parameters() {
        assert_eq!(
            redact_url("https://api.torn.com/torn/?selections=items&key=abcDEF1234567890"),
            "https://api.torn.com/torn/?selections=items&key=***"
        );
        assert_eq!(
            redact_url("https://x.test/?apikey=abc&other=1"),
            "https://x.test/?apikey=***&other=1"
        );
    }

    #[test]
    fn redact_leaves_plain_urls_alone() {
        assert_eq!(redact_url("https://x.test/item.php"), "https://x.test/item.php");
    }
}
