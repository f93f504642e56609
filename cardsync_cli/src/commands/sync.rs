//! The `sync` subcommand: crawl, record and upload.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cardsync_lib::cardportal::DumpDir;
use cardsync_lib::{Bookkeeping, Configuration, LexofficeClient, SyncReport, Synchronizer};
use clap::Args;

use crate::output::{build_report_rows, print_reports_table};

#[derive(Args)]
pub struct SyncArgs {
    /// Configuration files (YAML)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Only update the local records; never contact lexoffice
    #[arg(long)]
    pub local_only: bool,
}

pub fn run(args: &SyncArgs, sink: Option<Arc<DumpDir>>) -> Result<()> {
    let mut rows = Vec::new();
    let mut errors = 0;

    for config in super::load_configurations(&args.files)? {
        eprintln!("Synchronizing {}", config.name);
        let report = sync_one(&config, args.local_only, sink.as_ref())
            .with_context(|| format!("configuration {}", config.name))?;
        for error in &report.errors {
            eprintln!("{}: {}", config.name, error);
        }
        errors += report.errors.len();
        rows.extend(build_report_rows(&config.name, &report));
    }

    print_reports_table(rows);
    if errors > 0 {
        bail!("{} bank(s) or card(s) were skipped", errors);
    }
    Ok(())
}

fn sync_one(config: &Configuration, local_only: bool, sink: Option<&Arc<DumpDir>>) -> Result<SyncReport> {
    let client = match (&config.lexoffice, local_only) {
        (Some(lexoffice), false) => Some(
            LexofficeClient::connect(&config.lexoffice_instance, &lexoffice.auth)
                .context("lexoffice login")?,
        ),
        _ => None,
    };

    let mut manager = super::manager_for(config, sink);
    let mut synchronizer = Synchronizer::new(config)?;
    let report = synchronizer.run(
        &mut manager,
        client.as_ref().map(|c| c as &dyn Bookkeeping),
    )?;

    if let Some(client) = &client {
        if let Err(e) = client.logout() {
            tracing::warn!("lexoffice logout failed: {}", e);
        }
    }
    Ok(report)
}
