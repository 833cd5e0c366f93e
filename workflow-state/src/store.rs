//! ABOUTME: The instance store abstraction, plus an in-memory and a backend-backed implementation

use crate::backend::StorageBackend;
use crate::error::{StateError, StateResult};
use crate::instance::{InstanceStatus, WorkflowInstance};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use workflow_core::types::{RunId, WorkflowId};

/// Filter applied by [`InstanceStore::list`].
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub workflow_id: Option<WorkflowId>,
    pub status: Option<InstanceStatus>,
}

impl InstanceFilter {
    fn matches(&self, instance: &WorkflowInstance) -> bool {
        if let Some(workflow_id) = &self.workflow_id {
            if &instance.header.workflow_id != workflow_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if instance.header.status != status {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self { offset: 0, limit: 50 }
    }
}

/// Abstract instance persistence. Durability is
/// pluggable: in-memory for tests, a [`StorageBackend`]-backed store for
/// production.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn create(&self, instance: WorkflowInstance) -> StateResult<()>;
    async fn load(&self, run_id: RunId) -> StateResult<Option<WorkflowInstance>>;
    async fn save(&self, instance: WorkflowInstance) -> StateResult<()>;
    async fn list(&self, filter: InstanceFilter, page: Page) -> StateResult<Vec<WorkflowInstance>>;
    async fn delete(&self, run_id: RunId) -> StateResult<()>;
}

/// Reference in-memory store used by tests and `workflow-testing`.
#[derive(Default)]
pub struct InMemoryInstanceStore {
    instances: DashMap<RunId, WorkflowInstance>,
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn create(&self, instance: WorkflowInstance) -> StateResult<()> {
        self.instances.insert(instance.header.run_id, instance);
        Ok(())
    }

    async fn load(&self, run_id: RunId) -> StateResult<Option<WorkflowInstance>> {
        Ok(self.instances.get(&run_id).map(|e| e.clone()))
    }

    async fn save(&self, instance: WorkflowInstance) -> StateResult<()> {
        self.instances.insert(instance.header.run_id, instance);
        Ok(())
    }

    async fn list(&self, filter: InstanceFilter, page: Page) -> StateResult<Vec<WorkflowInstance>> {
        let mut matched: Vec<_> = self
            .instances
            .iter()
            .map(|e| e.value().clone())
            .filter(|instance| filter.matches(instance))
            .collect();
        matched.sort_by_key(|instance| instance.header.created_at);
        Ok(matched.into_iter().skip(page.offset).take(page.limit).collect())
    }

    async fn delete(&self, run_id: RunId) -> StateResult<()> {
        self.instances.remove(&run_id);
        Ok(())
    }
}

/// Store backed by a pluggable [`StorageBackend`]: instances encode to
/// JSON bytes under a `run_id` key ("encoding is
/// store-specific but must round-trip... semantic equality is [enough]").
pub struct BackendInstanceStore {
    backend: Arc<dyn StorageBackend>,
    namespace: String,
}

impl BackendInstanceStore {
    pub fn new(backend: Arc<dyn StorageBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    fn key(&self, run_id: RunId) -> String {
        format!("{}:instance:{}", self.namespace, run_id)
    }

    fn index_prefix(&self) -> String {
        format!("{}:instance:", self.namespace)
    }
}

#[async_trait]
impl InstanceStore for BackendInstanceStore {
    async fn create(&self, instance: WorkflowInstance) -> StateResult<()> {
        self.save(instance).await
    }

    async fn load(&self, run_id: RunId) -> StateResult<Option<WorkflowInstance>> {
        let bytes = self
            .backend
            .get(&self.key(run_id))
            .await
            .map_err(StateError::StorageError)?;
        match bytes {
            Some(bytes) => {
                let instance = serde_json::from_slice(&bytes)
                    .map_err(|e| StateError::DeserializationError(e.to_string()))?;
                Ok(Some(instance))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, instance: WorkflowInstance) -> StateResult<()> {
        let key = self.key(instance.header.run_id);
        let bytes = serde_json::to_vec(&instance)
            .map_err(|e| StateError::SerializationError(e.to_string()))?;
        self.backend.set(&key, bytes).await.map_err(StateError::StorageError)
    }

    async fn list(&self, filter: InstanceFilter, page: Page) -> StateResult<Vec<WorkflowInstance>> {
        let keys = self
            .backend
            .list_keys(&self.index_prefix())
            .await
            .map_err(StateError::StorageError)?;
        let mut matched = Vec::new();
        for key in keys {
            if let Some(bytes) = self.backend.get(&key).await.map_err(StateError::StorageError)? {
                let instance: WorkflowInstance = serde_json::from_slice(&bytes)
                    .map_err(|e| StateError::DeserializationError(e.to_string()))?;
                if filter.matches(&instance) {
                    matched.push(instance);
                }
            }
        }
        matched.sort_by_key(|instance| instance.header.created_at);
        Ok(matched.into_iter().skip(page.offset).take(page.limit).collect())
    }

    async fn delete(&self, run_id: RunId) -> StateResult<()> {
        self.backend
            .delete(&self.key(run_id))
            .await
            .map_err(StateError::StorageError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use workflow_core::types::WorkflowId;

    fn instance() -> WorkflowInstance {
        WorkflowInstance::new(RunId::new(), WorkflowId::new("wf"), "1.0")
    }

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryInstanceStore::new();
        let instance = instance();
        let run_id = instance.header.run_id;
        store.create(instance).await.unwrap();
        let loaded = store.load(run_id).await.unwrap().unwrap();
        assert_eq!(loaded.header.run_id, run_id);
    }

    #[tokio::test]
    async fn backend_store_round_trips_through_json() {
        let store = BackendInstanceStore::new(MemoryBackend::shared(), "wf-engine");
        let instance = instance();
        let run_id = instance.header.run_id;
        store.create(instance).await.unwrap();
        let loaded = store.load(run_id).await.unwrap().unwrap();
        assert_eq!(loaded.header.run_id, run_id);
        assert_eq!(loaded.header.status, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let store = InMemoryInstanceStore::new();
        let mut running = instance();
        running.header.status = InstanceStatus::Running;
        let mut completed = instance();
        completed.header.status = InstanceStatus::Completed;
        store.create(running).await.unwrap();
        store.create(completed).await.unwrap();

        let filter = InstanceFilter {
            workflow_id: None,
            status: Some(InstanceStatus::Completed),
        };
        let results = store.list(filter, Page::default()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].header.status, InstanceStatus::Completed);
    }

    #[tokio::test]
    async fn delete_removes_instance() {
        let store = InMemoryInstanceStore::new();
        let instance = instance();
        let run_id = instance.header.run_id;
        store.create(instance).await.unwrap();
        store.delete(run_id).await.unwrap();
        assert!(store.load(run_id).await.unwrap().is_none());
    }
}
