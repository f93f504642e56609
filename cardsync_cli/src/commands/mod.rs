//! CLI subcommand implementations.

pub mod cards;
pub mod config;
pub mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cardsync_lib::cardportal::DumpDir;
use cardsync_lib::{Configuration, ConfigurationManager, Manager};

/// Loads every file in order; later files may replace earlier names.
pub fn load_configurations(paths: &[PathBuf]) -> Result<Vec<Configuration>> {
    let mut manager = ConfigurationManager::new();
    for path in paths {
        manager
            .load_path(path)
            .with_context(|| format!("loading {}", path.display()))?;
    }
    Ok(manager.configurations().to_vec())
}

pub fn manager_for(config: &Configuration, sink: Option<&Arc<DumpDir>>) -> Manager {
    let manager = Manager::new(config.banks.clone());
    match sink {
        Some(sink) => manager.with_sink(sink.clone()),
        None => manager,
    }
}
