//! YAML configuration files.
//!
//! A file holds either one configuration mapping, named after the file
//! stem, or a list of `{name, config}` entries.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yml::Value;

use cardportal::OptionChoice;

use crate::crawler::Bank;

pub const DEFAULT_LEXOFFICE_INSTANCE: &str = "app.lexoffice.de";
const REDACTED: &str = "***";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error("invalid configuration layout: {0}")]
    Shape(String),
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Which option the SSO card chooser picks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Choice {
    #[default]
    First,
    Last,
}

impl From<Choice> for OptionChoice {
    fn from(choice: Choice) -> Self {
        match choice {
            Choice::First => OptionChoice::First,
            Choice::Last => OptionChoice::Last,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SsoConfig {
    pub entry_url: String,
    pub auth: BTreeMap<String, String>,
    #[serde(default)]
    pub choose: Choice,
}

/// One card-service login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankConfig {
    pub bank: Bank,
    #[serde(default)]
    pub auth: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_url: Option<String>,
    /// Only cards equal to one of these are crawled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cards: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso: Option<SsoConfig>,
}

impl BankConfig {
    pub fn entry_url(&self) -> &str {
        self.entry_url.as_deref().unwrap_or_else(|| self.bank.entry_url())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSeed {
    pub name: String,
    pub card: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LexofficeConfig {
    /// Posted verbatim as the login body.
    #[serde(default)]
    pub auth: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            poll_attempts: default_poll_attempts(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

fn default_poll_attempts() -> u32 {
    30
}

fn default_poll_interval() -> u64 {
    2
}

fn default_instance() -> String {
    DEFAULT_LEXOFFICE_INSTANCE.to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(skip_deserializing, default)]
    pub name: String,
    #[serde(default = "default_instance", alias = "lexofficeInstance")]
    pub lexoffice_instance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lexoffice: Option<LexofficeConfig>,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub banks: Vec<BankConfig>,
    #[serde(default)]
    pub accounts: Vec<AccountSeed>,
    #[serde(default)]
    pub upload: UploadConfig,
}

impl Configuration {
    pub fn records_dir(&self) -> PathBuf {
        self.data_dir.join("records")
    }

    pub fn statements_dir(&self) -> PathBuf {
        self.data_dir.join("statements")
    }

    /// A copy with every credential value replaced.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for bank in &mut copy.banks {
            redact_map(&mut bank.auth);
            if let Some(sso) = &mut bank.sso {
                redact_map(&mut sso.auth);
            }
        }
        if let Some(lexoffice) = &mut copy.lexoffice {
            for value in lexoffice.auth.values_mut() {
                *value = serde_json::Value::String(REDACTED.into());
            }
        }
        copy
    }
}

fn redact_map(map: &mut BTreeMap<String, String>) {
    for value in map.values_mut() {
        *value = REDACTED.into();
    }
}

/// Configurations loaded from any number of files, in load order.
///
/// Loading a name twice replaces the earlier configuration in place.
#[derive(Debug, Default)]
pub struct ConfigurationManager {
    configs: Vec<Configuration>,
}

impl ConfigurationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_path(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("default");
        self.load_str(&content, stem)
    }

    /// Parses `content`; `default_name` names a single-mapping file.
    pub fn load_str(&mut self, content: &str, default_name: &str) -> Result<(), ConfigError> {
        let root: Value = serde_yml::from_str(content)?;
        let entries = match root {
            Value::Mapping(_) => vec![(default_name.to_string(), root)],
            Value::Sequence(items) => items
                .into_iter()
                .map(named_entry)
                .collect::<Result<Vec<_>, _>>()?,
            _ => {
                return Err(ConfigError::Shape(
                    "expected a mapping or a list of mappings".into(),
                ))
            }
        };

        for (name, value) in entries {
            let mut config: Configuration = serde_yml::from_value(value)?;
            config.name = name;
            tracing::debug!("Loaded configuration {}", config.name);
            match self.configs.iter_mut().find(|c| c.name == config.name) {
                Some(existing) => *existing = config,
                None => self.configs.push(config),
            }
        }
        Ok(())
    }

    pub fn configurations(&self) -> &[Configuration] {
        &self.configs
    }

    pub fn get(&self, name: &str) -> Option<&Configuration> {
        self.configs.iter().find(|c| c.name == name)
    }
}

fn named_entry(item: Value) -> Result<(String, Value), ConfigError> {
    let Value::Mapping(mut map) = item else {
        return Err(ConfigError::Shape("list entries must be mappings".into()));
    };
    let name = match map.remove("name") {
        Some(Value::String(name)) => name,
        Some(other) => return Err(ConfigError::Shape(format!("invalid name {:?}", other))),
        None => return Err(ConfigError::Shape("list entry without \"name\"".into())),
    };
    let config = map
        .remove("config")
        .ok_or_else(|| ConfigError::Shape(format!("entry {} without \"config\"", name)))?;
    Ok((name, config))
}
