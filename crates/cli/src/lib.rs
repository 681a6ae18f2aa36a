use anyhow::Result;
use clap::{Parser, Subcommand};
use command::annotate::AnnotateArgs;
use command::catalog::CatalogCommand;
use command::credential::CredentialCommand;
use command::watch::WatchArgs;
use config::OverlayArgs;
use serde::Serialize;
use std::io;

mod command;
mod config;
mod host;

fn print_stdout(text: &str) -> Result<()> {
    use std::io::Write;

    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    print_stdout(&serde_json::to_string_pretty(value)?)
}

#[derive(Parser)]
#[command(name = "market-overlay")]
#[command(about = "Annotate marketplace pages with cached reference values", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(long, global = true)]
    quiet: bool,

    #[command(flatten)]
    overlay: OverlayArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single reconcile pass over a document file
    Annotate(AnnotateArgs),

    /// Keep a document file annotated while it changes
    Watch(WatchArgs),

    /// Manage the stored API key
    Credential {
        #[command(subcommand)]
        command: CredentialCommand,
    },

    /// Inspect or refresh the cached catalog
    Catalog {
        #[command(subcommand)]
        command: CatalogCommand,
    },
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    // reqwest and hyper are chatty at debug
    if !cli.verbose {
        builder.filter_module("hyper", log::LevelFilter::Warn);
    }
    builder.target(env_logger::Target::Stderr).init();

    let overlay = cli.overlay.build()?;

    match cli.command {
        Commands::Annotate(args) => command::annotate::run(args, &overlay).await?,
        Commands::Watch(args) => command::watch::run(args, &overlay).await?,
        Commands::Credential { command } => command::credential::run(command, &overlay).await?,
        Commands::Catalog { command } => command::catalog::run(command, &overlay).await?,
    }

    Ok(())
}
