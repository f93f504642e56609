//! The `config` subcommand: show what the YAML files parse to.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::output::print_json;

#[derive(Args)]
pub struct ConfigArgs {
    /// Configuration files (YAML)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

pub fn run(args: &ConfigArgs) -> Result<()> {
    let redacted: Vec<_> = super::load_configurations(&args.files)?
        .iter()
        .map(|c| c.redacted())
        .collect();
    print_json(&redacted);
    Ok(())
}
