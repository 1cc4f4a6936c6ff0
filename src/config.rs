//! Configuration management for schemaforge
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (schemaforge.toml)
//! - Environment variables (SCHEMAFORGE__SECTION__KEY)
//!
//! ## Example config file (schemaforge.toml):
//! ```toml
//! [registry]
//! backend = "local"
//! path = "./registry"
//! default_author = "Schema Bot"
//! compatibility = "backward"
//!
//! [registry.subjects]
//! AuditTrail = "full_transitive"
//!
//! [artifacts]
//! output_dir = "./artifacts"
//!
//! [broker]
//! address = "localhost:9092"
//! send_timeout_ms = 5000
//!
//! [codegen]
//! default_language = "python"
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::codegen::{Language, RuntimeDefaults};
use crate::compatibility::CompatibilityMode;
use crate::error::{ForgeError, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForgeConfig {
    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub artifacts: ArtifactsConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub codegen: CodegenConfig,
}

/// Which schema store the service talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Git-backed directory
    #[default]
    Local,
    /// Process memory, lost on exit
    Memory,
    /// Confluent-compatible REST registry
    Http,
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub backend: Backend,

    /// Store root for `local`, resolver state for every persistent backend
    #[serde(default = "default_registry_path")]
    pub path: PathBuf,

    /// Base URL for `http`
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Author for registration commits
    #[serde(default)]
    pub default_author: Option<String>,

    /// Mode for subjects without an override
    #[serde(default)]
    pub compatibility: CompatibilityMode,

    /// Per-subject mode overrides
    #[serde(default)]
    pub subjects: BTreeMap<String, CompatibilityMode>,
}

/// Artifact output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

/// Broker defaults baked into generated packages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_address")]
    pub address: String,

    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

/// Code generation defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodegenConfig {
    #[serde(default = "default_language")]
    pub default_language: Language,
}

// Default value functions
fn default_registry_path() -> PathBuf {
    PathBuf::from("./registry")
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./artifacts")
}

fn default_broker_address() -> String {
    "localhost:9092".to_string()
}

fn default_send_timeout_ms() -> u64 {
    5_000
}

fn default_language() -> Language {
    Language::Python
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Local,
            path: default_registry_path(),
            url: None,
            timeout_secs: default_timeout_secs(),
            default_author: None,
            compatibility: CompatibilityMode::default(),
            subjects: BTreeMap::new(),
        }
    }
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: default_broker_address(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            default_language: default_language(),
        }
    }
}

impl RegistryConfig {
    /// Mode in force for `subject`.
    ///
    /// Override keys match case-insensitively; the config loader may fold them.
    pub fn mode_for(&self, subject: &str) -> CompatibilityMode {
        self.subjects
            .get(subject)
            .or_else(|| {
                self.subjects
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(subject))
                    .map(|(_, mode)| mode)
            })
            .copied()
            .unwrap_or(self.compatibility)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl BrokerConfig {
    pub fn runtime_defaults(&self) -> RuntimeDefaults {
        RuntimeDefaults {
            broker_address: self.address.clone(),
            send_timeout_ms: self.send_timeout_ms,
        }
    }
}

impl ForgeConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, with `config_path` as a required extra source
    pub fn load_from(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = [
            "schemaforge.toml",
            ".schemaforge.toml",
            "config/schemaforge.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "schemaforge", "schemaforge") {
            let xdg_config = config_dir.config_dir().join("schemaforge.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (SCHEMAFORGE__REGISTRY__PATH, ...)
        builder = builder.add_source(
            Environment::with_prefix("SCHEMAFORGE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject combinations that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.registry.backend == Backend::Http && self.registry.url.is_none() {
            return Err(ForgeError::Config(
                "registry.backend = \"http\" requires registry.url".to_string(),
            ));
        }
        if self.registry.timeout_secs == 0 {
            return Err(ForgeError::Config(
                "registry.timeout_secs must be positive".to_string(),
            ));
        }
        if self.broker.address.trim().is_empty() {
            return Err(ForgeError::Config("broker.address must not be empty".to_string()));
        }
        if self.broker.send_timeout_ms == 0 {
            return Err(ForgeError::Config(
                "broker.send_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ForgeError::Config(e.to_string()))
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }
}
