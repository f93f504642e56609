//! The `cards` subcommand: log in everywhere and list the cards found.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use cardsync_lib::cardportal::DumpDir;
use cardsync_lib::discover_cards;
use clap::Args;

use crate::output::{build_card_rows, print_cards_table, print_json, OutputFormat};

#[derive(Args)]
pub struct CardsArgs {
    /// Configuration files (YAML)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format: table or json
    #[arg(long, value_enum, default_value = "table")]
    pub output: OutputFormat,
}

pub fn run(args: &CardsArgs, sink: Option<Arc<DumpDir>>) -> Result<()> {
    let mut rows = Vec::new();
    let mut failed = 0;

    for config in super::load_configurations(&args.files)? {
        let mut manager = super::manager_for(&config, sink.as_ref());
        let (cards, errors) = discover_cards(&mut manager)?;
        for error in &errors {
            eprintln!("{}: {}", config.name, error);
        }
        failed += errors.len();
        rows.extend(build_card_rows(&config.name, &cards));
    }

    match args.output {
        OutputFormat::Table => print_cards_table(rows),
        OutputFormat::Json => print_json(&rows),
    }
    if failed > 0 {
        eprintln!("{} bank(s) could not be reached", failed);
    }
    Ok(())
}
