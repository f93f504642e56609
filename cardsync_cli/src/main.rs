mod commands;
mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use cardsync_lib::cardportal::DumpDir;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cardsync")]
#[command(about = "Mirror credit-card portal transactions into local records and lexoffice")]
struct Cli {
    /// Write every fetched page to this directory
    #[arg(long, global = true)]
    dump_pages: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch new transactions and upload them
    Sync(commands::sync::SyncArgs),
    /// List the cards each configuration can reach
    Cards(commands::cards::CardsArgs),
    /// Show parsed configurations with credentials hidden
    Config(commands::config::ConfigArgs),
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cardsync=info".parse()?),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let sink = cli.dump_pages.map(|dir| Arc::new(DumpDir::new(dir)));

    match &cli.command {
        Commands::Sync(args) => commands::sync::run(args, sink)?,
        Commands::Cards(args) => commands::cards::run(args, sink)?,
        Commands::Config(args) => commands::config::run(args)?,
    }

    Ok(())
}
