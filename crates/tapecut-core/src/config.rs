//! Engine configuration
//!
//! Runtime tunables that are not compile-time constants, plus a generic
//! YAML load/save pair. Missing or unparseable files fall back to defaults
//! so a bad config never prevents startup.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables fixed at engine construction
///
/// Buffer storage is always `sample_rate x 350 s` per buffer, allocated
/// once; only the rate and the queue geometry are configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine sample rate in Hz
    pub sample_rate: u32,
    /// Capacity of the control-to-audio command queue
    pub command_queue_capacity: usize,
    /// Capacity of the audio-to-control event queue
    pub event_queue_capacity: usize,
    /// Maximum buffer reads in flight before `Capacity` is returned
    pub max_pending_reads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::types::SAMPLE_RATE,
            command_queue_capacity: 1024,
            event_queue_capacity: 1024,
            max_pending_reads: 4,
        }
    }
}

/// Load configuration from a YAML file
///
/// If the file doesn't exist, returns default config. If the file exists
/// but is invalid, logs a warning and returns default config.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("load_config: {:?} doesn't exist, using defaults", path);
        return T::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<T>(&contents) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("load_config: failed to parse {:?}: {}, using defaults", path, e);
                T::default()
            }
        },
        Err(e) => {
            log::warn!("load_config: failed to read {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Save configuration to a YAML file
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    let contents = serde_yaml::to_string(config).context("serializing config")?;
    std::fs::write(path, contents).with_context(|| format!("writing config to {:?}", path))?;
    Ok(())
}
