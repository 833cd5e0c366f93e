//! ABOUTME: Recording and mock Interceptors for asserting hook ordering and stubbing step results

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use workflow_core::error::{EngineError, Result};
use workflow_core::result::StepResult;
use workflow_core::types::{RunId, StepId, TypedValue, WorkflowId};
use workflow_hooks::traits::Interceptor;

/// An [`Interceptor`] that logs every hook invocation as `"<name>:before"` /
/// `"<name>:after"` / `"<name>:error"`, and can optionally replace a
/// step's result or fail on `before_step` — for asserting chain ordering,
/// short-circuiting, and critical/non-critical propagation without
/// standing up a real step.
pub struct RecordingInterceptor {
    name: String,
    calls: Mutex<Vec<String>>,
    replacement: Option<StepResult>,
    critical: bool,
    fails: bool,
}

impl RecordingInterceptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: Mutex::new(Vec::new()),
            replacement: None,
            critical: false,
            fails: false,
        }
    }

    pub fn with_replacement(mut self, replacement: StepResult) -> Self {
        self.replacement = Some(replacement);
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fails = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Interceptor for RecordingInterceptor {
    async fn before_step(
        &self,
        _run_id: RunId,
        _step_id: &StepId,
        _input: &TypedValue,
    ) -> Result<Option<StepResult>> {
        self.calls.lock().push(format!("{}:before", self.name));
        if self.fails {
            return Err(EngineError::internal(format!("{} failed in before_step", self.name)));
        }
        Ok(self.replacement.clone())
    }

    async fn after_step(&self, _run_id: RunId, _step_id: &StepId, _result: &StepResult) -> Result<()> {
        self.calls.lock().push(format!("{}:after", self.name));
        Ok(())
    }

    async fn on_step_error(&self, _run_id: RunId, _step_id: &StepId, _error: &EngineError) -> Result<()> {
        self.calls.lock().push(format!("{}:error", self.name));
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_critical(&self) -> bool {
        self.critical
    }
}

type Predicate = Box<dyn Fn(&TypedValue) -> bool + Send + Sync>;

struct MockEntry {
    workflow_id: WorkflowId,
    step_id: StepId,
    predicate: Option<Predicate>,
    result: StepResult,
}

/// Stubs step results for tests: a registration keyed by `(workflowId,
/// stepId)`, with an optional predicate over the step's input, returned
/// from `before_step` in place of actually running the step.
///
/// Step ids composed of `::`-joined segments (e.g. a branch-qualified
/// `"retry-branch::search"`) match a registration for any trailing
/// subsequence of those segments — `resolve` picks the registration
/// whose pattern covers the most segments, breaking ties by
/// registration order, the same ordered-matching shape as
/// [`crate::router`]'s `resolve_successor` in workflow-engine.
pub struct MockRegistry {
    entries: Mutex<Vec<MockEntry>>,
    run_workflows: Mutex<HashMap<RunId, WorkflowId>>,
}

impl Default for MockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            run_workflows: Mutex::new(HashMap::new()),
        }
    }

    /// Associates `run_id` with `workflow_id` so `before_step` knows which
    /// workflow's registrations apply. Call once before starting or
    /// resuming the run this registry is wired into.
    pub fn bind_run(&self, run_id: RunId, workflow_id: WorkflowId) {
        self.run_workflows.lock().insert(run_id, workflow_id);
    }

    /// Registers an unconditional replacement for `step_id` under `workflow_id`.
    pub fn register(&self, workflow_id: WorkflowId, step_id: StepId, result: StepResult) {
        self.entries.lock().push(MockEntry {
            workflow_id,
            step_id,
            predicate: None,
            result,
        });
    }

    /// Registers a replacement that only applies when `predicate` accepts
    /// the step's input.
    pub fn register_when(
        &self,
        workflow_id: WorkflowId,
        step_id: StepId,
        predicate: impl Fn(&TypedValue) -> bool + Send + Sync + 'static,
        result: StepResult,
    ) {
        self.entries.lock().push(MockEntry {
            workflow_id,
            step_id,
            predicate: Some(Box::new(predicate)),
            result,
        });
    }

    fn resolve(&self, workflow_id: &WorkflowId, step_id: &StepId, input: &TypedValue) -> Option<StepResult> {
        let entries = self.entries.lock();
        let mut best: Option<(usize, usize)> = None; // (suffix_len, declared_idx)
        let mut chosen: Option<&StepResult> = None;
        for (idx, entry) in entries.iter().enumerate() {
            if &entry.workflow_id != workflow_id {
                continue;
            }
            let Some(suffix_len) = suffix_match_len(step_id.as_str(), entry.step_id.as_str()) else {
                continue;
            };
            if let Some(predicate) = &entry.predicate {
                if !predicate(input) {
                    continue;
                }
            }
            let better = match best {
                None => true,
                Some((best_len, best_idx)) => suffix_len > best_len || (suffix_len == best_len && idx < best_idx),
            };
            if better {
                best = Some((suffix_len, idx));
                chosen = Some(&entry.result);
            }
        }
        chosen.cloned()
    }
}

#[async_trait]
impl Interceptor for MockRegistry {
    async fn before_step(&self, run_id: RunId, step_id: &StepId, input: &TypedValue) -> Result<Option<StepResult>> {
        let Some(workflow_id) = self.run_workflows.lock().get(&run_id).cloned() else {
            return Ok(None);
        };
        Ok(self.resolve(&workflow_id, step_id, input))
    }

    fn name(&self) -> &str {
        "mock-registry"
    }
}

/// Segments on either side of `::` are compared from the tail; `pattern`
/// matches if its segments equal `actual`'s trailing segments of the same
/// count. Returns the number of matched segments, used to rank competing
/// registrations by specificity.
fn suffix_match_len(actual: &str, pattern: &str) -> Option<usize> {
    let actual_segments: Vec<&str> = actual.split("::").collect();
    let pattern_segments: Vec<&str> = pattern.split("::").collect();
    if pattern_segments.len() > actual_segments.len() {
        return None;
    }
    let tail = &actual_segments[actual_segments.len() - pattern_segments.len()..];
    if tail == pattern_segments.as_slice() {
        Some(pattern_segments.len())
    } else {
        None
    }
}

#[cfg(test)]
mod mock_registry_tests {
    use super::*;
    use workflow_core::result::StepResult;

    fn wf(id: &str) -> WorkflowId {
        WorkflowId::new(id)
    }

    #[tokio::test]
    async fn unbound_run_is_left_alone() {
        let registry = MockRegistry::new();
        let input = TypedValue::new("In", serde_json::json!(1));
        let result = registry
            .before_step(RunId::new(), &StepId::new("step1"), &input)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn exact_match_returns_the_registered_result() {
        let registry = MockRegistry::new();
        let run_id = RunId::new();
        registry.bind_run(run_id, wf("wf"));
        registry.register(wf("wf"), StepId::new("step1"), StepResult::finish(serde_json::json!("mocked")));

        let input = TypedValue::new("In", serde_json::json!(1));
        let result = registry.before_step(run_id, &StepId::new("step1"), &input).await.unwrap();
        assert!(matches!(result, Some(StepResult::Finish(v)) if v == serde_json::json!("mocked")));
    }

    #[tokio::test]
    async fn longest_suffix_wins_over_a_shorter_registered_pattern() {
        let registry = MockRegistry::new();
        let run_id = RunId::new();
        registry.bind_run(run_id, wf("wf"));
        registry.register(wf("wf"), StepId::new("search"), StepResult::finish(serde_json::json!("short")));
        registry.register(
            wf("wf"),
            StepId::new("retry-branch::search"),
            StepResult::finish(serde_json::json!("long")),
        );

        let input = TypedValue::new("In", serde_json::json!(1));
        let result = registry
            .before_step(run_id, &StepId::new("retry-branch::search"), &input)
            .await
            .unwrap();
        assert!(matches!(result, Some(StepResult::Finish(v)) if v == serde_json::json!("long")));
    }

    #[tokio::test]
    async fn predicate_gates_the_replacement() {
        let registry = MockRegistry::new();
        let run_id = RunId::new();
        registry.bind_run(run_id, wf("wf"));
        registry.register_when(
            wf("wf"),
            StepId::new("step1"),
            |input| input.value == serde_json::json!(42),
            StepResult::finish(serde_json::json!("matched")),
        );

        let miss = TypedValue::new("In", serde_json::json!(1));
        assert!(registry.before_step(run_id, &StepId::new("step1"), &miss).await.unwrap().is_none());

        let hit = TypedValue::new("In", serde_json::json!(42));
        let result = registry.before_step(run_id, &StepId::new("step1"), &hit).await.unwrap();
        assert!(matches!(result, Some(StepResult::Finish(v)) if v == serde_json::json!("matched")));
    }

    #[tokio::test]
    async fn different_workflow_ids_do_not_cross_match() {
        let registry = MockRegistry::new();
        let run_id = RunId::new();
        registry.bind_run(run_id, wf("wf-a"));
        registry.register(wf("wf-b"), StepId::new("step1"), StepResult::finish(serde_json::json!("wrong workflow")));

        let input = TypedValue::new("In", serde_json::json!(1));
        let result = registry.before_step(run_id, &StepId::new("step1"), &input).await.unwrap();
        assert!(result.is_none());
    }
}
