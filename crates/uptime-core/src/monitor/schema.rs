//! JSON import/export envelope for monitor definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::EngineConfig;

use super::error::ConfigError;
use super::model::{Monitor, MonitorSettings};

pub const EXPORT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Malformed monitor JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported export version {0}")]
    UnsupportedVersion(u32),
    #[error("Monitor {index} ('{name}') is invalid: {source}")]
    Invalid {
        index: usize,
        name: String,
        #[source]
        source: ConfigError,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorExport {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub monitors: Vec<MonitorSettings>,
}

impl MonitorExport {
    pub fn from_monitors<'a>(monitors: impl IntoIterator<Item = &'a Monitor>, now: DateTime<Utc>) -> Self {
        Self {
            version: EXPORT_VERSION,
            exported_at: now,
            monitors: monitors.into_iter().map(|m| m.settings.clone()).collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, ImportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ImportDocument {
    Envelope {
        #[serde(default)]
        version: Option<u32>,
        monitors: Vec<MonitorSettings>,
    },
    Bare(Vec<MonitorSettings>),
}

/// Parses either an export envelope or a bare array, then normalizes and
/// validates every entry. The first invalid entry fails the whole import.
pub fn parse_import(json: &str, config: &EngineConfig) -> Result<Vec<MonitorSettings>, ImportError> {
    let entries = match serde_json::from_str::<ImportDocument>(json)? {
        ImportDocument::Envelope { version, monitors } => {
            if let Some(v) = version.filter(|v| *v != EXPORT_VERSION) {
                return Err(ImportError::UnsupportedVersion(v));
            }
            monitors
        }
        ImportDocument::Bare(monitors) => monitors,
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, settings)| {
            let settings = settings.normalized();
            settings.validate(config).map_err(|source| ImportError::Invalid {
                index,
                name: settings.name.clone(),
                source,
            })?;
            Ok(settings)
        })
        .collect()
}
