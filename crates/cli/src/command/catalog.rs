use crate::config::Overlay;
use crate::print_json;
use anyhow::{Context as AnyhowContext, Result};
use clap::Subcommand;
use overlay_catalog::EntityId;
use serde_json::json;
use std::collections::HashSet;

#[derive(Subcommand, Debug)]
pub enum CatalogCommand {
    /// Fetch the catalog unless a fresh copy is cached
    Fetch {
        /// Refetch even if the cached copy is fresh
        #[arg(long)]
        force: bool,
    },

    /// Show what is cached
    Status,

    /// Print reference values for item ids
    Lookup {
        #[arg(required = true)]
        ids: Vec<EntityId>,
    },

    /// Drop the cached catalog
    Clear,
}

pub async fn run(command: CatalogCommand, overlay: &Overlay) -> Result<()> {
    let catalog = &overlay.catalog;
    match command {
        CatalogCommand::Fetch { force } => {
            if force {
                catalog.invalidate().context("Failed to drop cached catalog")?;
            } else {
                catalog.warm_from_store();
            }
            catalog.ensure_fresh().await.context("Catalog fetch failed")?;
            print_json(&catalog.status())
        }
        CatalogCommand::Status => {
            catalog.warm_from_store();
            print_json(&json!({
                "store": overlay.store_path.display().to_string(),
                "catalog": catalog.status(),
            }))
        }
        CatalogCommand::Lookup { ids } => {
            catalog.warm_from_store();
            let wanted: HashSet<EntityId> = ids.iter().copied().collect();
            catalog
                .ensure_resolved(&wanted)
                .await
                .context("Catalog lookup failed")?;
            let values: Vec<_> = ids
                .iter()
                .map(|id| json!({ "entity_id": id, "reference_value": catalog.reference_value(*id) }))
                .collect();
            print_json(&values)
        }
        CatalogCommand::Clear => {
            catalog.invalidate().context("Failed to drop cached catalog")?;
            print_json(&json!({ "cleared": true }))
        }
    }
}
