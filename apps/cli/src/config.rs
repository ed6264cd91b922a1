//! CLI configuration loading and merging.

use anyhow::Context;
use std::path::{Path, PathBuf};
use stepwise_orchestrator::OrchestrationConfig;

/// Workflow file used when neither the flag nor the config names one
const DEFAULT_WORKFLOWS_FILE: &str = "workflows.json";

/// Settings shared by every command
#[derive(Debug, Clone)]
pub struct CliSettings {
    /// Orchestration settings
    pub config: OrchestrationConfig,
    /// Workflow store file
    pub workflows_path: PathBuf,
    /// Print command output as JSON
    pub json: bool,
    /// Print tracker events on stderr
    pub telemetry: bool,
}

impl CliSettings {
    /// Load and merge configuration.
    ///
    /// Precedence:
    /// 1. CLI arguments
    /// 2. Config file given with `--config`
    /// 3. Global config file (~/.stepwise/orchestration.toml), if present
    /// 4. Defaults
    pub fn load(
        config_path: Option<&Path>,
        workflows: Option<PathBuf>,
        json: bool,
        telemetry: bool,
    ) -> anyhow::Result<Self> {
        let config = match config_path {
            Some(path) => OrchestrationConfig::load_from_toml(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => match OrchestrationConfig::default_config_path().filter(|p| p.exists()) {
                Some(path) => OrchestrationConfig::load_from_toml(&path)
                    .with_context(|| format!("Failed to load config: {}", path.display()))?,
                None => OrchestrationConfig::default(),
            },
        };

        let workflows_path = workflows
            .or_else(|| config.scheduler.workflows_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKFLOWS_FILE));

        Ok(Self { config, workflows_path, json, telemetry })
    }
}
