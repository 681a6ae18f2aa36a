use crate::host::EnvHost;
use anyhow::{Context as AnyhowContext, Result};
use clap::Args;
use log::debug;
use overlay_catalog::{
    CatalogCache, CatalogConfig, CredentialResolver, FileStore, SystemClock, DEFAULT_API_BASE,
};
use overlay_transport::{CommandRelay, DirectFetcher, FallbackTransport, Fetcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const STORE_ENV: &str = "MARKET_OVERLAY_STORE";
pub const API_BASE_ENV: &str = "MARKET_OVERLAY_API_BASE";
pub const RELAY_ENV: &str = "MARKET_OVERLAY_RELAY";

/// Settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct OverlayArgs {
    /// Store file for the API key and the cached catalog
    #[arg(long, global = true, env = STORE_ENV)]
    pub store: Option<PathBuf>,

    /// Base URL of the catalog API
    #[arg(long, global = true, env = API_BASE_ENV, default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Relay command tried when the direct request fails (URL is passed as last argument)
    #[arg(long, global = true, env = RELAY_ENV)]
    pub relay: Option<String>,

    /// Catalog time-to-live in seconds
    #[arg(long, global = true, default_value_t = 12 * 60 * 60)]
    pub ttl_secs: u64,

    /// Timeout for a single catalog request in seconds
    #[arg(long, global = true, default_value_t = 10)]
    pub timeout_secs: u64,
}

/// The wired-up engine: one store, one credential resolver, one catalog.
pub struct Overlay {
    pub store_path: PathBuf,
    pub credentials: Arc<CredentialResolver>,
    pub catalog: Arc<CatalogCache>,
}

impl OverlayArgs {
    pub fn store_path(&self) -> PathBuf {
        self.store.clone().unwrap_or_else(default_store_path)
    }

    pub fn build(&self) -> Result<Overlay> {
        let store_path = self.store_path();
        let store = Arc::new(
            FileStore::open(&store_path)
                .with_context(|| format!("Failed to open store {}", store_path.display()))?,
        );
        debug!("Using store {}", store_path.display());

        let credentials = Arc::new(CredentialResolver::new(
            store.clone(),
            Some(Arc::new(EnvHost)),
        ));

        let timeout = Duration::from_secs(self.timeout_secs.max(1));
        let direct = DirectFetcher::new(timeout).context("Failed to build HTTP client")?;
        let relay = self
            .relay
            .as_deref()
            .and_then(|line| CommandRelay::from_command_line(line, timeout))
            .map(|relay| Arc::new(relay) as Arc<dyn Fetcher>);
        if relay.is_some() {
            debug!("Relay fallback enabled");
        }
        let transport = FallbackTransport::new(Arc::new(direct), relay);

        let catalog = Arc::new(CatalogCache::new(
            CatalogConfig {
                api_base: self.api_base.clone(),
                ttl: Duration::from_secs(self.ttl_secs),
            },
            Arc::new(transport),
            credentials.clone(),
            store,
            Arc::new(SystemClock),
        ));

        Ok(Overlay {
            store_path,
            credentials,
            catalog,
        })
    }
}

fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("market-overlay"))
        .unwrap_or_else(|| PathBuf::from(".market-overlay"))
        .join("store.json")
}
