//! ABOUTME: Suspend/resume bookkeeping: validates resume values and serializes concurrent resumes
//! ABOUTME: Only one concurrent resume for a given run can win; the rest see NotSuspended

use std::collections::BTreeMap;
use std::sync::Arc;
use workflow_core::error::{EngineError, Result};
use workflow_core::result::SuspendRequest;
use workflow_core::types::{RunId, StepId, TypeTag, TypedValue};
use workflow_state::instance::{InstanceStatus, SuspensionRecord, WorkflowInstance};
use workflow_state::store::InstanceStore;

/// Validates a value offered to `resume(runId, value)` against the
/// suspension's declared `expected_input_type`. Optional: a run with no
/// registered provider accepts any resume value — schema reflection is
/// out of scope, so this is deliberately a nullable hook, not a required
/// one.
pub trait SchemaProvider: Send + Sync {
    /// Returns `true` if `value`'s declared tag chain satisfies `expected`.
    fn validate(&self, expected: &TypeTag, value: &TypedValue) -> bool;
}

/// Accepts any resume value whose own tag or ancestor chain contains the
/// expected type — the default when no [`SchemaProvider`] is configured.
pub struct AncestorSchemaProvider;

impl SchemaProvider for AncestorSchemaProvider {
    fn validate(&self, expected: &TypeTag, value: &TypedValue) -> bool {
        value.ancestors.contains(expected)
    }
}

/// Suspends and resumes runs against the instance store. Per-run mutual
/// exclusion during resume is the caller's job
/// (the core executor holds the run lock before calling `resume`); this
/// type only checks the persisted state is actually SUSPENDED.
pub struct SuspensionManager {
    store: Arc<dyn InstanceStore>,
    schema: Arc<dyn SchemaProvider>,
}

impl SuspensionManager {
    pub fn new(store: Arc<dyn InstanceStore>) -> Self {
        Self {
            store,
            schema: Arc::new(AncestorSchemaProvider),
        }
    }

    pub fn with_schema_provider(mut self, schema: Arc<dyn SchemaProvider>) -> Self {
        self.schema = schema;
        self
    }

    /// Writes a suspension record and flips the instance to SUSPENDED.
    pub async fn suspend(&self, run_id: RunId, step_id: StepId, request: SuspendRequest) -> Result<()> {
        let mut instance = self.load(run_id).await?;
        instance.suspension = Some(SuspensionRecord {
            run_id,
            step_id: step_id.clone(),
            prompt: request.prompt,
            expected_input_type: request.expected_input_type,
            metadata: request.metadata.into_iter().collect::<BTreeMap<_, _>>(),
            created_at: chrono::Utc::now(),
        });
        instance.header.status = InstanceStatus::Suspended;
        instance.header.current_step_id = Some(step_id);
        instance.touch();
        self.store.save(instance).await.map_err(|e| EngineError::Persistence(e.into()))
    }

    /// Validates `value` against the pending suspension's expected type,
    /// clears the suspension, and returns the step to resume with its
    /// input. Errors `NotSuspended` if the run has no pending suspension
    /// (already resumed by a racing caller, or never suspended) and
    /// `ResumeTypeMismatch` if the value's type does not satisfy the
    /// schema.
    pub async fn resume(&self, run_id: RunId, value: TypedValue) -> Result<(StepId, TypedValue)> {
        let mut instance = self.load(run_id).await?;
        let Some(suspension) = instance.suspension.take() else {
            return Err(EngineError::NotSuspended {
                run_id: run_id.to_string(),
            });
        };

        if !self.schema.validate(&suspension.expected_input_type, &value) {
            instance.suspension = Some(suspension);
            self.store.save(instance).await.map_err(|e| EngineError::Persistence(e.into()))?;
            return Err(EngineError::ResumeTypeMismatch {
                run_id: run_id.to_string(),
                expected: suspension.expected_input_type.to_string(),
            });
        }

        instance.header.status = InstanceStatus::Running;
        instance.touch();
        self.store.save(instance).await.map_err(|e| EngineError::Persistence(e.into()))?;
        Ok((suspension.step_id, value))
    }

    pub async fn is_suspended(&self, run_id: RunId) -> Result<bool> {
        Ok(self.load(run_id).await?.suspension.is_some())
    }

    async fn load(&self, run_id: RunId) -> Result<WorkflowInstance> {
        self.store
            .load(run_id)
            .await
            .map_err(|e| EngineError::Persistence(e.into()))?
            .ok_or_else(|| EngineError::NotSuspended {
                run_id: run_id.to_string(),
            })
    }
}
