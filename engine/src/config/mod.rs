//! Configuration management
//!
//! This module handles loading, validation, and management of the Hive configuration.
//! Configuration is stored in TOML format at ~/.hive/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: log level, data directory
//! - **llm**: model provider settings and the hard invocation timeout
//! - **memory**: memory backend, embedding dimensions, recall tuning, TTLs
//! - **bus**: message history capacity
//! - **orchestrator**: trace retention
//!
//! # Examples
//!
//! ```no_run
//! use hive_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Provider: {}", config.llm.provider);
//! println!("Memory backend: {:?}", config.memory.backend);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// Model provider configuration
    pub llm: LLMConfig,

    /// Memory configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Communication bus configuration
    #[serde(default)]
    pub bus: BusConfig,

    /// Orchestrator configuration
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Model provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Provider name (ollama)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Hard timeout for every model invocation, in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// Storage backend for task memories, patterns and episodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    /// Process-local, lost on exit
    Memory,
    /// SQLite file under the data directory
    Sqlite,
}

/// Memory system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_backend")]
    pub backend: MemoryBackend,

    /// SQLite file name, relative to `core.data_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Embedding vector length
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,

    /// Number of similar tasks and episodes returned by recall
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,

    /// Semantic hits must score strictly above this similarity
    #[serde(default)]
    pub min_similarity: f32,

    /// Maximum number of patterns returned by recall
    #[serde(default = "default_pattern_limit")]
    pub pattern_limit: usize,

    /// TTL for context snapshots in short-term memory, in seconds
    #[serde(default = "default_context_ttl")]
    pub context_ttl_secs: u64,

    /// Capacity of the recent-interaction log
    #[serde(default = "default_interaction_log_capacity")]
    pub interaction_log_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            database_file: default_database_file(),
            embedding_dimensions: default_embedding_dimensions(),
            recall_limit: default_recall_limit(),
            min_similarity: 0.0,
            pattern_limit: default_pattern_limit(),
            context_ttl_secs: default_context_ttl(),
            interaction_log_capacity: default_interaction_log_capacity(),
        }
    }
}

/// Communication bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Maximum number of messages kept in history
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Number of session traces kept for lookup
    #[serde(default = "default_trace_retention")]
    pub trace_retention: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            trace_retention: default_trace_retention(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.hive")
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_memory_backend() -> MemoryBackend {
    MemoryBackend::Memory
}

fn default_database_file() -> String {
    "memory.db".to_string()
}

fn default_embedding_dimensions() -> usize {
    384
}

fn default_recall_limit() -> usize {
    5
}

fn default_pattern_limit() -> usize {
    3
}

fn default_context_ttl() -> u64 {
    3600
}

fn default_interaction_log_capacity() -> usize {
    100
}

fn default_history_capacity() -> usize {
    1000
}

fn default_trace_retention() -> usize {
    256
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            timeout_secs: default_llm_timeout(),
            ollama: OllamaConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.hive/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.hive/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".hive").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig {
                log_level: default_log_level(),
                data_dir: default_data_dir(),
            },
            llm: LLMConfig::default(),
            memory: MemoryConfig::default(),
            bus: BusConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }

    /// Absolute path of the SQLite memory database
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join(&self.memory.database_file)
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates enumerated and numeric fields
    /// - Expands ~ in the data directory
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["ollama"];
        if !valid_providers.contains(&self.llm.provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid provider '{}'. Must be one of: {}",
                self.llm.provider,
                valid_providers.join(", ")
            )));
        }

        if self.llm.timeout_secs == 0 {
            return Err(EngineError::Config(
                "llm.timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.memory.embedding_dimensions == 0 {
            return Err(EngineError::Config(
                "memory.embedding_dimensions must be greater than 0".to_string(),
            ));
        }

        if !(-1.0..=1.0).contains(&self.memory.min_similarity) {
            return Err(EngineError::Config(
                "memory.min_similarity must be between -1.0 and 1.0".to_string(),
            ));
        }

        if self.bus.history_capacity == 0 {
            return Err(EngineError::Config(
                "bus.history_capacity must be greater than 0".to_string(),
            ));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
