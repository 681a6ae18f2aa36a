use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    overlay_cli::main_entry().await
}
