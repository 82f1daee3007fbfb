//! # Weft Config
//!
//! Unified single-file configuration for the weft engine. A single
//! `weft.yaml` configures the bus, the chain interpreter, the scheduler,
//! and the backing stores. Every field has a default; an empty file is a
//! valid configuration.

mod loader;

pub use loader::{load_config, ConfigError};

use serde::Deserialize;

/// Top-level configuration schema.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WeftConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub bus: BusSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub stores: StoresSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_env(),
        }
    }
}

fn default_app_name() -> String {
    "weft".to_string()
}

fn default_env() -> String {
    "development".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusSection {
    /// Maximum number of events retained in the in-memory history.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Per-handler timeout in seconds; unset means no limit.
    #[serde(default)]
    pub handler_timeout_secs: Option<u64>,
    /// When set, every published event is also appended to this JSONL file
    /// and replayed into history at startup.
    #[serde(default)]
    pub persist_history_path: Option<String>,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            handler_timeout_secs: None,
            persist_history_path: None,
        }
    }
}

fn default_max_history() -> usize {
    1_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeSection {
    /// Per-step timeout in seconds; a timeout is a step failure.
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,
    /// Whole-chain timeout in seconds.
    #[serde(default)]
    pub chain_timeout_secs: Option<u64>,
    /// Prefix for the ephemeral threads hook chains run against.
    #[serde(default = "default_scratch_prefix")]
    pub scratch_thread_prefix: String,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            step_timeout_secs: None,
            chain_timeout_secs: None,
            scratch_thread_prefix: default_scratch_prefix(),
        }
    }
}

fn default_scratch_prefix() -> String {
    "scratch".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// Capacity of the bounded ingress channel between timers and the
    /// execution context. Interval fires that cannot enqueue are coalesced.
    #[serde(default = "default_ingress_capacity")]
    pub ingress_capacity: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            ingress_capacity: default_ingress_capacity(),
        }
    }
}

fn default_ingress_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoresSection {
    /// `memory` or `file`.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Data directory for the file backend.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoresSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
        }
    }
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_store_path() -> String {
    "data".to_string()
}
