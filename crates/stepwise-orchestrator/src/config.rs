// Orchestration configuration
//
// Loaded from TOML. The settings may sit at the top level of the file or under
// an [orchestration] section; every field has a default.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{OrchestrationError, Result};
use crate::orchestration::plan_tools::EXECUTE_MULTI_STEP;

/// Orchestration configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Completion enforcer settings
    pub enforcer: EnforcerConfig,
    /// Multi-step executor settings
    pub executor: ExecutorConfig,
    /// Workflow scheduler settings
    pub scheduler: SchedulerConfig,
}

impl OrchestrationConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load_from_toml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestrationError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from TOML string
    ///
    /// # Errors
    /// Returns error if TOML cannot be parsed
    pub fn from_toml_str(toml_content: &str) -> Result<Self> {
        let toml: toml::Value = toml::from_str(toml_content)
            .map_err(|e| OrchestrationError::Config(format!("Failed to parse TOML: {}", e)))?;

        let section = match toml.get("orchestration") {
            Some(orchestration) => orchestration.clone(),
            None => toml,
        };

        section.try_into().map_err(|e: toml::de::Error| {
            OrchestrationError::Config(format!("Failed to deserialize orchestration config: {}", e))
        })
    }

    /// Save configuration to a TOML file under an [orchestration] section
    ///
    /// # Errors
    /// Returns error if file cannot be written
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        #[derive(Serialize)]
        struct ConfigWrapper<'a> {
            orchestration: &'a OrchestrationConfig,
        }

        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(&ConfigWrapper { orchestration: self })
            .map_err(|e| OrchestrationError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Default configuration file path, `~/.stepwise/orchestration.toml`
    ///
    /// `None` when `HOME` is not set.
    pub fn default_config_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".stepwise").join("orchestration.toml"))
    }
}

/// Completion enforcer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcerConfig {
    /// Whether action tools are wrapped at all
    pub enabled: bool,
    /// Tools the enforcer wraps
    pub action_tools: Vec<String>,
    /// Tool the model is redirected to
    pub executor_tool: String,
    /// Additional repeated-action patterns for the detector
    pub extra_patterns: Vec<String>,
    /// Override of the confirmation-phrase pattern
    pub confirmation_pattern: Option<String>,
    /// Return the earlier confirmation for an identical repeated action
    pub block_duplicate_actions: bool,
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            action_tools: Vec::new(),
            executor_tool: EXECUTE_MULTI_STEP.to_string(),
            extra_patterns: Vec::new(),
            confirmation_pattern: None,
            block_duplicate_actions: true,
        }
    }
}

impl EnforcerConfig {
    /// Compile `extra_patterns`
    ///
    /// # Errors
    /// `Config` naming the first invalid pattern
    pub fn compiled_extra_patterns(&self) -> Result<Vec<Regex>> {
        self.extra_patterns.iter().map(|p| compile_pattern(p)).collect()
    }

    /// Compile `confirmation_pattern`, if set
    ///
    /// # Errors
    /// `Config` if the pattern is invalid
    pub fn compiled_confirmation_pattern(&self) -> Result<Option<Regex>> {
        self.confirmation_pattern.as_deref().map(compile_pattern).transpose()
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| OrchestrationError::Config(format!("invalid pattern '{}': {}", pattern, e)))
}

/// Multi-step executor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Per-step deadline in seconds
    pub step_timeout_secs: u64,
    /// Minimum score gap between best and runner-up fuzzy match
    pub fuzzy_margin: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { step_timeout_secs: 120, fuzzy_margin: 0.2 }
    }
}

impl ExecutorConfig {
    /// Per-step deadline
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

/// Workflow scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Timezone used when a request names none
    pub default_timezone: String,
    /// Deadline for one firing in seconds
    pub firing_deadline_secs: u64,
    /// Flat JSON file holding stored workflows
    pub workflows_path: Option<PathBuf>,
    /// Capacity of the scheduler event channel
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_timezone: "UTC".to_string(),
            firing_deadline_secs: 900,
            workflows_path: None,
            event_capacity: 64,
        }
    }
}

impl SchedulerConfig {
    /// Deadline for one firing
    pub fn firing_deadline(&self) -> Duration {
        Duration::from_secs(self.firing_deadline_secs)
    }
}
