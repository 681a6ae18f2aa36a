use super::{load_document, write_document};
use crate::config::Overlay;
use crate::print_json;
use anyhow::Result;
use clap::Args;
use overlay_reconciler::Reconciler;
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

#[derive(Args, Debug)]
pub struct AnnotateArgs {
    /// Document tree as JSON (`{"tag", "attrs", "text", "children"}`)
    #[arg(long)]
    pub document: PathBuf,

    /// Address of the page the document was captured from
    #[arg(long)]
    pub url: String,

    /// Write the annotated document here; otherwise it is printed with the report
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub async fn run(args: AnnotateArgs, overlay: &Overlay) -> Result<()> {
    let document = Mutex::new(load_document(&args.document)?);
    let reconciler = Reconciler::new(overlay.catalog.clone());
    let report = reconciler.run_once(&document, &args.url).await;
    let tree = document.into_inner().unwrap_or_else(PoisonError::into_inner);

    match args.out {
        Some(out) => {
            write_document(&out, &tree)?;
            print_json(&report)
        }
        None => print_json(&json!({
            "report": report,
            "document": tree.to_spec(),
        })),
    }
}
