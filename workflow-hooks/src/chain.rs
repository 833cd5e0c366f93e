//! ABOUTME: Ordered, snapshot-on-write interceptor chain consulted around every step
//! ABOUTME: A read takes a cheap Arc-clone snapshot so execution never blocks on registration

use crate::traits::Interceptor;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{error, warn};
use workflow_core::error::{EngineError, Result};
use workflow_core::result::StepResult;
use workflow_core::types::{RunId, StepId, TypedValue};

/// Registration-ordered chain of interceptors. The instance store,
/// suspension store, and metrics are process-wide;
/// this chain follows the same "snapshot-on-write" rule so a step's
/// hook pass never contends with `add`/`remove`.
pub struct InterceptorChain {
    interceptors: RwLock<Vec<Arc<dyn Interceptor>>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self {
            interceptors: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.write().push(interceptor);
    }

    pub fn remove(&self, name: &str) {
        self.interceptors.write().retain(|i| i.name() != name);
    }

    fn snapshot(&self) -> Vec<Arc<dyn Interceptor>> {
        self.interceptors.read().clone()
    }

    /// Runs `beforeStep` in registration order. The first interceptor
    /// to return `Some` short-circuits the rest.
    pub async fn run_before_step(
        &self,
        run_id: RunId,
        step_id: &StepId,
        input: &TypedValue,
    ) -> Result<Option<StepResult>> {
        for interceptor in self.snapshot() {
            match interceptor.before_step(run_id, step_id, input).await {
                Ok(Some(replacement)) => return Ok(Some(replacement)),
                Ok(None) => continue,
                Err(err) => self.handle_interceptor_error(interceptor.as_ref(), run_id, step_id, &err)?,
            }
        }
        Ok(None)
    }

    pub async fn run_after_step(&self, run_id: RunId, step_id: &StepId, result: &StepResult) -> Result<()> {
        for interceptor in self.snapshot() {
            if let Err(err) = interceptor.after_step(run_id, step_id, result).await {
                self.handle_interceptor_error(interceptor.as_ref(), run_id, step_id, &err)?;
            }
        }
        Ok(())
    }

    pub async fn run_on_step_error(&self, run_id: RunId, step_id: &StepId, error: &EngineError) -> Result<()> {
        for interceptor in self.snapshot() {
            if let Err(err) = interceptor.on_step_error(run_id, step_id, error).await {
                self.handle_interceptor_error(interceptor.as_ref(), run_id, step_id, &err)?;
            }
        }
        Ok(())
    }

    fn handle_interceptor_error(
        &self,
        interceptor: &dyn Interceptor,
        run_id: RunId,
        step_id: &StepId,
        err: &EngineError,
    ) -> Result<()> {
        if interceptor.is_critical() {
            error!(
                interceptor = interceptor.name(),
                %run_id, %step_id, %err, "critical interceptor failed; failing run"
            );
            return Err(EngineError::internal(format!(
                "critical interceptor '{}' failed: {err}",
                interceptor.name()
            )));
        }
        warn!(
            interceptor = interceptor.name(),
            %run_id, %step_id, %err, "non-critical interceptor failed; continuing"
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.interceptors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InterceptorChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use workflow_core::types::TypeTag;

    struct RecordingInterceptor {
        name: String,
        calls: Arc<Mutex<Vec<String>>>,
        replacement: Option<StepResult>,
        critical: bool,
        fails: bool,
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
                return Err(EngineError::internal("boom"));
            }
            Ok(self.replacement.clone())
        }

        async fn after_step(&self, _run_id: RunId, _step_id: &StepId, _result: &StepResult) -> Result<()> {
            self.calls.lock().push(format!("{}:after", self.name));
            Ok(())
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn is_critical(&self) -> bool {
            self.critical
        }
    }

    fn interceptor(name: &str, calls: Arc<Mutex<Vec<String>>>) -> Arc<dyn Interceptor> {
        Arc::new(RecordingInterceptor {
            name: name.to_string(),
            calls,
            replacement: None,
            critical: false,
            fails: false,
        })
    }

    #[tokio::test]
    async fn runs_before_step_hooks_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new();
        chain.add(interceptor("a", calls.clone()));
        chain.add(interceptor("b", calls.clone()));

        let input = TypedValue::new("In", serde_json::json!(1));
        chain
            .run_before_step(RunId::new(), &StepId::new("s"), &input)
            .await
            .unwrap();

        assert_eq!(calls.lock().as_slice(), ["a:before", "b:before"]);
    }

    #[tokio::test]
    async fn replacement_short_circuits_remaining_hooks() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new();
        chain.add(Arc::new(RecordingInterceptor {
            name: "a".to_string(),
            calls: calls.clone(),
            replacement: Some(StepResult::finish(serde_json::json!("done"))),
            critical: false,
            fails: false,
        }));
        chain.add(interceptor("b", calls.clone()));

        let input = TypedValue::new("In", serde_json::json!(1));
        let result = chain
            .run_before_step(RunId::new(), &StepId::new("s"), &input)
            .await
            .unwrap();

        assert!(result.is_some());
        assert_eq!(calls.lock().as_slice(), ["a:before"]);
    }

    #[tokio::test]
    async fn non_critical_failure_logs_and_continues() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new();
        chain.add(Arc::new(RecordingInterceptor {
            name: "a".to_string(),
            calls: calls.clone(),
            replacement: None,
            critical: false,
            fails: true,
        }));
        chain.add(interceptor("b", calls.clone()));

        let input = TypedValue::new("In", serde_json::json!(1));
        let result = chain
            .run_before_step(RunId::new(), &StepId::new("s"), &input)
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(calls.lock().as_slice(), ["a:before", "b:before"]);
    }

    #[tokio::test]
    async fn critical_failure_fails_the_run() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new();
        chain.add(Arc::new(RecordingInterceptor {
            name: "a".to_string(),
            calls: calls.clone(),
            replacement: None,
            critical: true,
            fails: true,
        }));

        let input = TypedValue::new("In", serde_json::json!(1));
        let err = chain
            .run_before_step(RunId::new(), &StepId::new("s"), &input)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Internal { .. }));
    }

    #[tokio::test]
    async fn remove_drops_interceptor_from_future_runs() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new();
        chain.add(interceptor("a", calls.clone()));
        chain.remove("a");
        assert!(chain.is_empty());
        let _ = TypeTag::any();
    }
}
