//! Runtime configuration
//!
//! Every knob of a [`Vm`](crate::vm::Vm) lives in [`RuntimeConfig`]. It is
//! plain data with serde support so it can come from a `tinyrb.toml` file:
//!
//! ```toml
//! arena_size = 65536
//! max_tasks = 8
//! timeslice_tick_count = 10
//!
//! [tick_mode]
//! simulated = { instructions_per_tick = 200 }
//! ```
//!
//! Missing keys take their defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::runtime::memory::DEFAULT_ARENA_SIZE;

/// Default config file name looked up by the CLI
pub const CONFIG_FILE_NAME: &str = "tinyrb.toml";

/// How the tick counter advances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickMode {
    /// A timer thread ticks every `tick_unit_ms`
    External,
    /// The interpreter ticks after every `instructions_per_tick` instructions
    Simulated { instructions_per_tick: u32 },
}

impl Default for TickMode {
    fn default() -> Self {
        TickMode::Simulated {
            instructions_per_tick: 1000,
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Bytes in the object arena
    pub arena_size: usize,
    /// Task table slots
    pub max_tasks: usize,
    /// Registers per task
    pub max_regs: usize,
    /// Maximum call-info depth per task
    pub max_call_depth: usize,
    /// Milliseconds per tick
    pub tick_unit_ms: u64,
    /// Ticks per timeslice
    pub timeslice_tick_count: u32,
    pub tick_mode: TickMode,
    /// Log every executed instruction at trace level
    pub trace_execution: bool,
    /// Priority of tasks created without one
    pub default_priority: u8,
    /// Seed of the `rand` builtin
    pub rng_seed: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            arena_size: DEFAULT_ARENA_SIZE,
            max_tasks: 16,
            max_regs: 256,
            max_call_depth: 64,
            tick_unit_ms: 4,
            timeslice_tick_count: 10,
            tick_mode: TickMode::default(),
            trace_execution: false,
            default_priority: 128,
            rng_seed: 0x7262_7262,
        }
    }
}

impl RuntimeConfig {
    /// Simulated ticks every `instructions_per_tick` instructions
    pub fn simulated(instructions_per_tick: u32) -> Self {
        Self {
            tick_mode: TickMode::Simulated {
                instructions_per_tick,
            },
            ..Self::default()
        }
    }

    /// Parse a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load `path` when it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.arena_size < 1024 {
            return Err(ConfigError::Invalid(format!(
                "arena_size {} is below the 1024 byte minimum",
                self.arena_size
            )));
        }
        if self.arena_size > u32::MAX as usize {
            return Err(ConfigError::Invalid("arena_size exceeds 4 GiB".to_string()));
        }
        if self.max_tasks == 0 || self.max_tasks > u16::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max_tasks {} out of range",
                self.max_tasks
            )));
        }
        if self.max_regs < 16 {
            return Err(ConfigError::Invalid(format!(
                "max_regs {} is below 16",
                self.max_regs
            )));
        }
        if self.max_call_depth == 0 {
            return Err(ConfigError::Invalid("max_call_depth must be positive".to_string()));
        }
        if self.tick_unit_ms == 0 || self.timeslice_tick_count == 0 {
            return Err(ConfigError::Invalid(
                "tick_unit_ms and timeslice_tick_count must be positive".to_string(),
            ));
        }
        if let TickMode::Simulated {
            instructions_per_tick: 0,
        } = self.tick_mode
        {
            return Err(ConfigError::Invalid(
                "instructions_per_tick must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}
