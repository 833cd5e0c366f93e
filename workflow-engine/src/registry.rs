//! ABOUTME: Holds registered workflow definitions, keyed by (workflowId, version)
//! ABOUTME: Registration is idempotent for an identical definition, rejected for a conflicting one

use dashmap::DashMap;
use std::sync::Arc;
use workflow_core::error::{EngineError, Result};
use workflow_core::graph::WorkflowDefinition;
use workflow_core::types::WorkflowId;

/// Registered workflow definitions, process-wide. A
/// second `register` call for the same `(workflowId, version)` is a
/// no-op only when it is literally the same definition object — the
/// registry has no way to diff two `WorkflowDefinition`s for semantic
/// equality, so re-registering under an existing version is always
/// rejected as a breaking change; bump the version instead.
#[derive(Default)]
pub struct WorkflowRegistry {
    definitions: DashMap<(WorkflowId, String), Arc<WorkflowDefinition>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, definition: WorkflowDefinition) -> Result<Arc<WorkflowDefinition>> {
        let key = (definition.workflow_id.clone(), definition.version.clone());
        if self.definitions.contains_key(&key) {
            return Err(EngineError::InvalidWorkflow {
                workflow_id: key.0.to_string(),
                message: format!("version '{}' is already registered; bump the version to re-register", key.1),
            });
        }
        let definition = Arc::new(definition);
        self.definitions.insert(key, definition.clone());
        Ok(definition)
    }

    pub fn get(&self, workflow_id: &WorkflowId, version: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.get(&(workflow_id.clone(), version.to_string())).map(|e| e.clone())
    }

    /// The most recently registered version for `workflow_id`, chosen by
    /// lexicographic version comparison — callers that need semver
    /// ordering should register with zero-padded or semver-sortable
    /// version strings.
    pub fn latest(&self, workflow_id: &WorkflowId) -> Option<Arc<WorkflowDefinition>> {
        self.definitions
            .iter()
            .filter(|entry| &entry.key().0 == workflow_id)
            .max_by(|a, b| a.key().1.cmp(&b.key().1))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
