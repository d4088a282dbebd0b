use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::{ProjectConfig, Result};

/// A configuration snapshot as published by the host.
#[derive(Debug)]
pub struct Configuration {
    /// Timestamp when the snapshot was built.
    pub fetched_at: DateTime<Utc>,
    /// Indexed datafile.
    pub project_config: ProjectConfig,
}

impl Configuration {
    /// Snapshot of `project_config`, stamped with the current time.
    pub fn new(project_config: ProjectConfig) -> Configuration {
        Configuration {
            fetched_at: Utc::now(),
            project_config,
        }
    }

    /// Parse and index a datafile.
    pub fn from_datafile(json: &str) -> Result<Configuration> {
        ProjectConfig::from_datafile(json).map(Configuration::new)
    }
}

/// `ConfigurationStore` provides a Sync storage for the configuration snapshot that allows
/// concurrent access for readers and writers.
///
/// Readers get an `Arc` to the whole snapshot, so a decision in progress keeps seeing the
/// snapshot it started with while a new one is published.
#[derive(Debug, Default)]
pub struct ConfigurationStore {
    configuration: RwLock<Option<Arc<Configuration>>>,
}

impl ConfigurationStore {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            configuration: RwLock::new(None),
        }
    }

    /// Current snapshot, if one has been set.
    pub fn get_configuration(&self) -> Option<Arc<Configuration>> {
        // Err() is only possible if a writer panicked while holding the lock. Treat that as a
        // missing configuration rather than crashing the host.
        let configuration = self.configuration.read().ok()?;
        configuration.clone()
    }

    /// Set new configuration, returning the previous one.
    pub fn set_configuration(&self, configuration: Configuration) -> Option<Arc<Configuration>> {
        // Constructing new value before requesting the lock to minimize lock span.
        let new_value = Some(Arc::new(configuration));

        let mut configuration_slot = self.configuration.write().ok()?;
        log::debug!(target: "feature_decide",
                    revision = new_value.as_ref().map_or("", |c| c.project_config.revision());
                    "publishing configuration");
        std::mem::replace(&mut configuration_slot, new_value)
    }
}
