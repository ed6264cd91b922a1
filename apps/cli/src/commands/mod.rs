//! Command implementations for the Stepwise CLI.

pub mod run;
pub mod schedule;
pub mod validate_cron;
pub mod workflows;

use anyhow::Context;
use serde_json::{Map, Value};

/// Parse a `--context` argument into a JSON object
pub fn parse_context(raw: Option<&str>) -> anyhow::Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw).context("--context must be valid JSON")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("--context must be a JSON object, got {}", other),
    }
}
