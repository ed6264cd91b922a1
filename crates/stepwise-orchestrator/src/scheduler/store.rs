//! Workflow stores.
//!
//! The scheduler only needs `id -> {name, steps}`; the step graph itself is
//! opaque here and interpreted by the workflow executor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;

/// A stored, replayable step graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Opaque identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Step graph, interpreted by the executor
    #[serde(default)]
    pub steps: Value,
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Resolves workflow ids to workflows
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Workflow with `id`, if stored
    async fn get(&self, id: &str) -> Result<Option<Workflow>>;

    /// Every stored workflow
    async fn list(&self) -> Result<Vec<Workflow>>;
}

/// Workflows kept in one flat JSON file
///
/// The file holds either an array of workflows or `{"workflows": [...]}`. It is
/// re-read on every lookup so edits are picked up without a restart.
#[derive(Debug, Clone)]
pub struct JsonFileWorkflowStore {
    path: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WorkflowFile {
    List(Vec<Workflow>),
    Wrapped { workflows: Vec<Workflow> },
}

impl JsonFileWorkflowStore {
    /// Store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<Workflow>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Workflow file missing, treating as empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(match serde_json::from_str::<WorkflowFile>(&content)? {
            WorkflowFile::List(workflows) | WorkflowFile::Wrapped { workflows } => workflows,
        })
    }
}

#[async_trait]
impl WorkflowStore for JsonFileWorkflowStore {
    async fn get(&self, id: &str) -> Result<Option<Workflow>> {
        Ok(self.load().await?.into_iter().find(|w| w.id == id))
    }

    async fn list(&self) -> Result<Vec<Workflow>> {
        self.load().await
    }
}

/// Workflows held in memory
#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    workflows: RwLock<BTreeMap<String, Workflow>>,
}

impl InMemoryWorkflowStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with `workflows`
    pub fn with_workflows(workflows: impl IntoIterator<Item = Workflow>) -> Self {
        Self { workflows: RwLock::new(workflows.into_iter().map(|w| (w.id.clone(), w)).collect()) }
    }

    /// Add or replace a workflow
    pub async fn insert(&self, workflow: Workflow) {
        self.workflows.write().await.insert(workflow.id.clone(), workflow);
    }

    /// Remove a workflow
    pub async fn remove(&self, id: &str) -> Option<Workflow> {
        self.workflows.write().await.remove(id)
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn get(&self, id: &str) -> Result<Option<Workflow>> {
        Ok(self.workflows.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Workflow>> {
        Ok(self.workflows.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_json_file_store_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflows.json");
        std::fs::write(
            &path,
            json!([
                {"id": "wf-1", "name": "Morning digest", "steps": []},
                {"id": "wf-2", "name": "Weekly report"}
            ])
            .to_string(),
        )
        .unwrap();

        let store = JsonFileWorkflowStore::new(&path);
        assert_eq!(store.list().await.unwrap().len(), 2);
        assert_eq!(store.get("wf-2").await.unwrap().unwrap().name, "Weekly report");
        assert!(store.get("wf-3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_file_store_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflows.json");
        std::fs::write(&path, json!({"workflows": [{"id": "wf-1", "name": "A"}]}).to_string()).unwrap();
        assert!(JsonFileWorkflowStore::new(&path).get("wf-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_json_file_store_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let missing = JsonFileWorkflowStore::new(dir.path().join("none.json"));
        assert!(missing.list().await.unwrap().is_empty());

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(JsonFileWorkflowStore::new(&path).list().await.is_err());
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryWorkflowStore::new();
        store.insert(Workflow { id: "wf-1".to_string(), name: "A".to_string(), steps: json!([]), description: None }).await;
        assert!(store.get("wf-1").await.unwrap().is_some());
        assert!(store.remove("wf-1").await.is_some());
        assert!(store.list().await.unwrap().is_empty());
    }
}
