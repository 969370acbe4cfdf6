//! # Minne Configuration System
//!
//! Hierarchical configuration for the memory subsystem: registry sizing, the
//! allocator installed at startup, the zone table, queue sizing and telemetry.
//!
//! ## Features
//! - **Layered Sources**: defaults, base file, environment file, environment variables
//! - **Validation**: field ranges through `validator`, plus zone table consistency
//! - **Typed Budgets**: zone policies deserialize straight into `minne-core` types

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use validator::Validate;

mod error;
mod memory;
mod queue;
mod telemetry;
mod validation;
mod zones;

pub use error::ConfigError;
pub use memory::{AllocatorKind, MemoryConfig};
pub use queue::QueueConfig;
pub use telemetry::{LogFormat, TelemetryConfig};
pub use zones::{default_zones, ZoneConfig};

const BASE_FILE: &str = "config/minne.yaml";
const ENV_PREFIX: &str = "MINNE_";

/// Top‑level configuration container.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct MinneConfig {
    #[validate(nested)]
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Zones registered at startup.
    #[validate(nested)]
    #[serde(default = "default_zones")]
    pub zones: Vec<ZoneConfig>,

    #[validate(nested)]
    #[serde(default)]
    pub queue: QueueConfig,

    #[validate(nested)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for MinneConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            zones: default_zones(),
            queue: QueueConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl MinneConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default Values
    /// 2. `config/minne.yaml` - Base settings. If missing, defaults are used.
    /// 3. `config/<MINNE_ENV>.yaml` - Environment‑specific overrides.
    /// 4. `MINNE_*` environment variables, `__` separating nested keys.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(MinneConfig::default()));

        if Path::new(BASE_FILE).exists() {
            figment = figment.merge(Yaml::file(BASE_FILE));
        } else {
            debug!("{BASE_FILE} not found, using default configuration");
        }

        let env = std::env::var("MINNE_ENV").unwrap_or_else(|_| "production".into());
        let env_file = format!("config/{}.yaml", env);
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::finish(figment)
    }

    /// Load configuration from a specific file plus the environment.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        let figment = Figment::from(Serialized::defaults(MinneConfig::default()))
            .merge(Yaml::file(path));
        Self::finish(figment)
    }

    fn finish(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                config.check_zone_table()?;
                Ok(config)
            })
    }

    /// Checks what field validation cannot see: every zone id fits the
    /// registry, ids and names are unique, and the minimum alignment is a
    /// power of two.
    pub fn check_zone_table(&self) -> Result<(), ConfigError> {
        if !self.memory.min_align.is_power_of_two() {
            return Err(ConfigError::ZoneTable(format!(
                "min_align {} is not a power of two",
                self.memory.min_align
            )));
        }

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for zone in &self.zones {
            if usize::from(zone.id) >= self.memory.registry_capacity {
                return Err(ConfigError::ZoneTable(format!(
                    "zone '{}' has id {} but the registry holds {} zones",
                    zone.name, zone.id, self.memory.registry_capacity
                )));
            }
            if !ids.insert(zone.id) {
                return Err(ConfigError::ZoneTable(format!(
                    "zone id {} is used more than once",
                    zone.id
                )));
            }
            if !names.insert(zone.name.as_str()) {
                return Err(ConfigError::ZoneTable(format!(
                    "zone name '{}' is used more than once",
                    zone.name
                )));
            }
        }
        Ok(())
    }
}
