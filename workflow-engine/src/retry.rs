//! ABOUTME: Wraps step invocation with invocation-limit enforcement and retry-policy evaluation
//! ABOUTME: Delay is injected via Sleeper so tests can assert backoff without sleeping real time

use crate::metrics::RetryMetricsRegistry;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use workflow_core::context::{Context, RetryContext};
use workflow_core::error::{EngineError, Result};
use workflow_core::graph::{JitterMode, OnLimitBehavior, RetryPolicy, StepNode};
use workflow_core::result::{StepFailure, StepResult};
use workflow_core::types::{RunId, TypeTag, TypedValue};

/// Injectable delay so retry/backoff tests run instantly while still
/// observing the computed delays ("deterministic
/// clock-free delay stub").
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio scheduled-task pool.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub struct RetryExecutor {
    metrics: Arc<RetryMetricsRegistry>,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryExecutor {
    pub fn new(metrics: Arc<RetryMetricsRegistry>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { metrics, sleeper }
    }

    /// Invoke `node`'s executor, applying the invocation limit and retry
    /// policy. Returns the first non-`Fail` [`StepResult`] the step
    /// produces together with the 1-based attempt number that produced
    /// it, or a terminal [`EngineError`] once retries (or the invocation
    /// limit) are exhausted.
    pub async fn invoke(
        &self,
        node: &StepNode,
        input: TypedValue,
        ctx: &dyn Context,
        _run_id: RunId,
    ) -> Result<(StepResult, u32)> {
        ctx.set_current_step(node.step_id.clone());
        let max_attempts = node.retry_policy.as_ref().map(|p| p.max_attempts).unwrap_or(1);

        let mut attempt_number = 1u32;
        loop {
            let invocation_count = ctx.record_step_execution(&node.step_id);
            if invocation_count > node.invocation_limit {
                match node.on_limit {
                    OnLimitBehavior::Error => {
                        return Err(EngineError::InvocationLimitExceeded {
                            step_id: node.step_id.to_string(),
                            limit: node.invocation_limit,
                        })
                    }
                    OnLimitBehavior::Stop => return Ok((StepResult::Finish(serde_json::Value::Null), attempt_number)),
                    OnLimitBehavior::Continue => {
                        debug!(step = %node.step_id, limit = node.invocation_limit, "invocation limit exceeded, continuing (advisory)");
                    }
                }
            }

            self.metrics.record_attempt(&node.step_id, attempt_number);
            let start = Instant::now();
            let outcome = node.executor.execute(input.clone(), ctx).await;
            let duration = start.elapsed();

            let failure = match outcome {
                Ok(StepResult::Fail(failure)) => {
                    let treat_as_retryable = node
                        .retry_policy
                        .as_ref()
                        .map(|p| p.retry_on_fail_result)
                        .unwrap_or(false);
                    if !treat_as_retryable {
                        self.metrics.record_failure(&node.step_id, &failure.kind, duration);
                        ctx.clear_retry_context(&node.step_id);
                        return Err(EngineError::StepInvocation {
                            step_id: node.step_id.to_string(),
                            message: failure.message,
                        });
                    }
                    failure
                }
                Ok(other) => {
                    self.metrics.record_success(&node.step_id, duration);
                    ctx.clear_retry_context(&node.step_id);
                    return Ok((other, attempt_number));
                }
                Err(err) => StepFailure::new(err.to_string(), TypeTag::new("StepInvocationError")),
            };

            self.metrics.record_failure(&node.step_id, &failure.kind, duration);

            let Some(policy) = node.retry_policy.as_ref() else {
                ctx.clear_retry_context(&node.step_id);
                return Err(EngineError::StepInvocation {
                    step_id: node.step_id.to_string(),
                    message: failure.message,
                });
            };

            let retry_ctx = ctx
                .retry_context(&node.step_id)
                .unwrap_or_else(|| RetryContext::first_attempt(node.step_id.clone(), max_attempts));

            if !should_retry(&failure, &retry_ctx, policy) {
                self.metrics.record_exhaustion(&node.step_id);
                warn!(step = %node.step_id, attempts = attempt_number, "retry exhausted or aborted by policy");
                ctx.clear_retry_context(&node.step_id);
                return Err(EngineError::RetryExhausted {
                    step_id: node.step_id.to_string(),
                    attempts: attempt_number,
                });
            }

            let mut updated = retry_ctx;
            updated.record_failure(failure.kind.clone(), failure.message.clone(), duration);
            ctx.update_retry_context(&node.step_id, updated);

            let next_attempt = attempt_number + 1;
            let delay = delay_with_jitter(policy, next_attempt);
            self.metrics.record_delay(&node.step_id, delay);
            info!(step = %node.step_id, attempt = next_attempt, ?delay, "retrying step after failure");
            self.sleeper.sleep(delay).await;

            attempt_number = next_attempt;
        }
    }
}

/// The design `shouldRetry(error, retryContext, policy)`: `abortOn`
/// wins over `retryOn`; an empty `retryOn` means "everything else is
/// retryable".
fn should_retry(failure: &StepFailure, retry_ctx: &RetryContext, policy: &RetryPolicy) -> bool {
    if retry_ctx.attempt_number >= policy.max_attempts {
        return false;
    }
    if let Some(abort_on) = &policy.abort_on {
        if failure.kinds().any(|k| abort_on.contains(k)) {
            return false;
        }
    }
    if let Some(retry_on) = &policy.retry_on {
        if !retry_on.is_empty() && !failure.kinds().any(|k| retry_on.contains(k)) {
            return false;
        }
    }
    true
}

/// `delay * backoffMultiplier^(k-1)` clipped to `maxDelay`, plus
/// optional jitter ( jitter disabled by default).
fn delay_with_jitter(policy: &RetryPolicy, k: u32) -> Duration {
    let base = policy.delay_for_attempt(k);
    match policy.jitter {
        Some(JitterMode::Uniform { factor }) => {
            let max_extra_ms = (base.as_millis() as f64 * factor).max(0.0) as u64;
            if max_extra_ms == 0 {
                base
            } else {
                let extra = rand::thread_rng().gen_range(0..=max_extra_ms);
                base + Duration::from_millis(extra)
            }
        }
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait as async_trait_attr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use workflow_core::context::InMemoryContext;
    use workflow_core::types::StepId;

    struct RecordingSleeper {
        delays: parking_lot::Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        fn new() -> Self {
            Self {
                delays: parking_lot::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait_attr]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.delays.lock().push(duration);
        }
    }

    struct FlakyStep {
        fail_until_attempt: u32,
        calls: AtomicU32,
    }

    #[async_trait_attr]
    impl workflow_core::step::Step for FlakyStep {
        async fn execute(&self, input: TypedValue, _ctx: &dyn Context) -> Result<StepResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call < self.fail_until_attempt {
                Ok(StepResult::Fail(StepFailure::new("boom", "IoError")))
            } else {
                Ok(StepResult::Continue(input))
            }
        }
    }

    fn node_with_policy(fail_until: u32, policy: RetryPolicy) -> StepNode {
        let step = Arc::new(FlakyStep {
            fail_until_attempt: fail_until,
            calls: AtomicU32::new(0),
        });
        StepNode::new(
            StepId::new("r"),
            TypeTag::any(),
            TypeTag::any(),
            step,
        )
        .with_retry_policy(policy)
    }

    #[tokio::test]
    async fn retries_then_succeeds_within_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), 2.0);
        let node = node_with_policy(3, policy);
        let ctx = InMemoryContext::new(RunId::new(), serde_json::json!({}));
        let metrics = Arc::new(RetryMetricsRegistry::new());
        let sleeper = Arc::new(RecordingSleeper::new());
        let executor = RetryExecutor::new(metrics.clone(), sleeper.clone());

        let input = TypedValue::new("In", serde_json::json!(1));
        let (result, attempt) = executor.invoke(&node, input, &ctx, RunId::new()).await.unwrap();
        assert!(matches!(result, StepResult::Continue(_)));
        assert_eq!(attempt, 3);

        let snap = metrics.step_metrics(&node.step_id);
        assert_eq!(snap.attempts, 3);
        assert_eq!(snap.successes, 1);
        assert!(ctx.retry_context(&node.step_id).is_none());

        let delays = sleeper.delays.lock();
        assert_eq!(delays.len(), 2);
        assert!(delays[0] >= Duration::from_millis(10));
        assert!(delays[1] >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn exhausts_retries_and_reports_retry_exhausted() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), 1.0);
        let node = node_with_policy(u32::MAX, policy);
        let ctx = InMemoryContext::new(RunId::new(), serde_json::json!({}));
        let metrics = Arc::new(RetryMetricsRegistry::new());
        let sleeper = Arc::new(RecordingSleeper::new());
        let executor = RetryExecutor::new(metrics.clone(), sleeper);

        let input = TypedValue::new("In", serde_json::json!(1));
        let err = executor.invoke(&node, input, &ctx, RunId::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::RetryExhausted { attempts: 3, .. }));
        assert_eq!(metrics.step_metrics(&node.step_id).exhaustions, 1);
    }

    #[tokio::test]
    async fn abort_on_prevents_retry() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), 1.0)
            .with_abort_on(vec![TypeTag::new("IoError")]);
        let node = node_with_policy(u32::MAX, policy);
        let ctx = InMemoryContext::new(RunId::new(), serde_json::json!({}));
        let metrics = Arc::new(RetryMetricsRegistry::new());
        let sleeper = Arc::new(RecordingSleeper::new());
        let executor = RetryExecutor::new(metrics.clone(), sleeper);

        let input = TypedValue::new("In", serde_json::json!(1));
        let err = executor.invoke(&node, input, &ctx, RunId::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::RetryExhausted { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn invocation_limit_error_fails_second_call() {
        let step = Arc::new(FlakyStep {
            fail_until_attempt: 0,
            calls: AtomicU32::new(0),
        });
        let node = StepNode::new(StepId::new("once"), TypeTag::any(), TypeTag::any(), step)
            .with_invocation_limit(1, OnLimitBehavior::Error);
        let ctx = InMemoryContext::new(RunId::new(), serde_json::json!({}));
        let metrics = Arc::new(RetryMetricsRegistry::new());
        let sleeper = Arc::new(RecordingSleeper::new());
        let executor = RetryExecutor::new(metrics, sleeper);

        let input = TypedValue::new("In", serde_json::json!(1));
        executor.invoke(&node, input.clone(), &ctx, RunId::new()).await.unwrap();
        let err = executor.invoke(&node, input, &ctx, RunId::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvocationLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn invocation_limit_stop_returns_finish_null() {
        let step = Arc::new(FlakyStep {
            fail_until_attempt: 0,
            calls: AtomicU32::new(0),
        });
        let node = StepNode::new(StepId::new("once"), TypeTag::any(), TypeTag::any(), step)
            .with_invocation_limit(1, OnLimitBehavior::Stop);
        let ctx = InMemoryContext::new(RunId::new(), serde_json::json!({}));
        let metrics = Arc::new(RetryMetricsRegistry::new());
        let sleeper = Arc::new(RecordingSleeper::new());
        let executor = RetryExecutor::new(metrics, sleeper);

        let input = TypedValue::new("In", serde_json::json!(1));
        executor.invoke(&node, input.clone(), &ctx, RunId::new()).await.unwrap();
        let (result, _attempt) = executor.invoke(&node, input, &ctx, RunId::new()).await.unwrap();
        assert!(matches!(result, StepResult::Finish(serde_json::Value::Null)));
    }

    #[tokio::test]
    async fn no_retry_policy_propagates_first_failure() {
        let step = Arc::new(FlakyStep {
            fail_until_attempt: 100,
            calls: AtomicU32::new(0),
        });
        let node = StepNode::new(StepId::new("no-retry"), TypeTag::any(), TypeTag::any(), step);
        let ctx = InMemoryContext::new(RunId::new(), serde_json::json!({}));
        let metrics = Arc::new(RetryMetricsRegistry::new());
        let sleeper = Arc::new(RecordingSleeper::new());
        let executor = RetryExecutor::new(metrics, sleeper);

        let input = TypedValue::new("In", serde_json::json!(1));
        let err = executor.invoke(&node, input, &ctx, RunId::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::StepInvocation { .. }));
    }
}
