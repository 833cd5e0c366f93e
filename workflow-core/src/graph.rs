//! ABOUTME: The static workflow graph: step nodes, edges, retry policy, and registration validation
//! ABOUTME: A definition is immutable and frozen once `WorkflowDefinition::try_new` accepts it

use crate::error::{EngineError, Result};
use crate::step::BoxedStep;
use crate::types::{StepId, TypeTag, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// What happens once a step's invocation limit is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnLimitBehavior {
    /// Raise `InvocationLimitExceeded`, a terminal `Fail`.
    Error,
    /// Return `Finish(null)` without invoking the step.
    Stop,
    /// Invoke normally; the limit becomes advisory.
    Continue,
}

/// Backoff jitter mode. The design leaves jitter off by default; this
/// is the one open question this spec resolves with an explicit knob.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum JitterMode {
    /// Uniform random jitter in `[0, delay * factor]` added to the
    /// computed backoff delay.
    Uniform { factor: f64 },
}

/// Declarative retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Option<Duration>,
    pub retry_on: Option<Vec<TypeTag>>,
    pub abort_on: Option<Vec<TypeTag>>,
    pub retry_on_fail_result: bool,
    pub jitter: Option<JitterMode>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts,
            delay,
            backoff_multiplier,
            max_delay: None,
            retry_on: None,
            abort_on: None,
            retry_on_fail_result: true,
            jitter: None,
        }
    }

    pub fn with_retry_on(mut self, kinds: Vec<TypeTag>) -> Self {
        self.retry_on = Some(kinds);
        self
    }

    pub fn with_abort_on(mut self, kinds: Vec<TypeTag>) -> Self {
        self.abort_on = Some(kinds);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Delay before attempt `k` (1-based next attempt, k >= 2), per
    /// `delay * backoff_multiplier^(k-1)`, clipped to
    /// `max_delay`.
    pub fn delay_for_attempt(&self, k: u32) -> Duration {
        debug_assert!(k >= 2, "delay_for_attempt is only defined for k >= 2");
        let exponent = (k - 1) as i32;
        let factor = self.backoff_multiplier.powi(exponent);
        let millis = (self.delay.as_millis() as f64) * factor;
        let computed = Duration::from_millis(millis.max(0.0) as u64);
        match self.max_delay {
            Some(max) if computed > max => max,
            _ => computed,
        }
    }
}

/// One node in a workflow's graph.
pub struct StepNode {
    pub step_id: StepId,
    pub input_type: TypeTag,
    pub output_type: TypeTag,
    pub executor: BoxedStep,
    pub is_initial: bool,
    pub is_async_handler: bool,
    /// Declared for the static infinite-loop guard in registration:
    /// a step that may return Suspend/Async breaks an otherwise-illegal
    /// cycle. Async handlers are implicitly suspend-capable.
    pub may_suspend: bool,
    pub retry_policy: Option<RetryPolicy>,
    pub invocation_limit: u32,
    pub on_limit: OnLimitBehavior,
    /// Declared successors in order, each tagged with the output/event
    /// type it accepts. A catch-all successor is tagged `TypeTag::any()`.
    pub next_classes: Vec<(TypeTag, StepId)>,
}

impl StepNode {
    pub fn new(step_id: StepId, input_type: TypeTag, output_type: TypeTag, executor: BoxedStep) -> Self {
        Self {
            step_id,
            input_type,
            output_type,
            executor,
            is_initial: false,
            is_async_handler: false,
            may_suspend: false,
            retry_policy: None,
            invocation_limit: u32::MAX,
            on_limit: OnLimitBehavior::Continue,
            next_classes: Vec::new(),
        }
    }

    pub fn initial(mut self) -> Self {
        self.is_initial = true;
        self
    }

    pub fn async_handler(mut self) -> Self {
        self.is_async_handler = true;
        self.may_suspend = true;
        self
    }

    pub fn may_suspend(mut self) -> Self {
        self.may_suspend = true;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_invocation_limit(mut self, limit: u32, on_limit: OnLimitBehavior) -> Self {
        assert!(limit >= 1, "invocation limit must be >= 1");
        self.invocation_limit = limit;
        self.on_limit = on_limit;
        self
    }

    pub fn with_successor(mut self, tag: impl Into<TypeTag>, step_id: StepId) -> Self {
        self.next_classes.push((tag.into(), step_id));
        self
    }
}

/// An immutable, registered workflow graph.
pub struct WorkflowDefinition {
    pub workflow_id: WorkflowId,
    pub version: String,
    steps: HashMap<StepId, StepNode>,
    step_order: Vec<StepId>,
    pub initial_step_id: StepId,
}

impl WorkflowDefinition {
    /// Validate and freeze a workflow definition:
    /// rejects a missing initial step, duplicate step ids, `nextClasses`
    /// referencing unreachable steps, and cycles with no suspend/async
    /// escape.
    pub fn try_new(
        workflow_id: WorkflowId,
        version: impl Into<String>,
        nodes: Vec<StepNode>,
    ) -> Result<Self> {
        if nodes.is_empty() {
            return Err(EngineError::InvalidWorkflow {
                workflow_id: workflow_id.to_string(),
                message: "workflow has no steps".to_string(),
            });
        }

        let mut steps = HashMap::new();
        let mut step_order = Vec::new();
        let mut initial_step_id = None;

        for node in nodes {
            if steps.contains_key(&node.step_id) {
                return Err(EngineError::InvalidWorkflow {
                    workflow_id: workflow_id.to_string(),
                    message: format!("duplicate step id '{}'", node.step_id),
                });
            }
            if node.is_initial {
                if initial_step_id.is_some() {
                    return Err(EngineError::InvalidWorkflow {
                        workflow_id: workflow_id.to_string(),
                        message: "workflow declares more than one initial step".to_string(),
                    });
                }
                initial_step_id = Some(node.step_id.clone());
            }
            step_order.push(node.step_id.clone());
            steps.insert(node.step_id.clone(), node);
        }

        let initial_step_id = initial_step_id.ok_or_else(|| EngineError::InvalidWorkflow {
            workflow_id: workflow_id.to_string(),
            message: "workflow declares no initial step".to_string(),
        })?;

        for node in steps.values() {
            for (_, target) in &node.next_classes {
                if !steps.contains_key(target) {
                    return Err(EngineError::InvalidWorkflow {
                        workflow_id: workflow_id.to_string(),
                        message: format!(
                            "step '{}' declares a successor to unknown step '{}'",
                            node.step_id, target
                        ),
                    });
                }
            }
        }

        let definition = Self {
            workflow_id: workflow_id.clone(),
            version: version.into(),
            steps,
            step_order,
            initial_step_id,
        };

        definition.check_for_unguarded_cycles()?;
        Ok(definition)
    }

    fn check_for_unguarded_cycles(&self) -> Result<()> {
        // Depth-first search over declared successor edges; a cycle is
        // illegal only if every step participating in it is incapable
        // of suspending.
        let mut visiting: HashSet<StepId> = HashSet::new();
        let mut visited: HashSet<StepId> = HashSet::new();
        let mut stack: Vec<StepId> = Vec::new();

        for start in &self.step_order {
            if !visited.contains(start) {
                self.dfs_cycle_check(start, &mut visiting, &mut visited, &mut stack)?;
            }
        }
        Ok(())
    }

    fn dfs_cycle_check(
        &self,
        step_id: &StepId,
        visiting: &mut HashSet<StepId>,
        visited: &mut HashSet<StepId>,
        stack: &mut Vec<StepId>,
    ) -> Result<()> {
        visiting.insert(step_id.clone());
        stack.push(step_id.clone());

        if let Some(node) = self.steps.get(step_id) {
            for (_, successor) in &node.next_classes {
                if visiting.contains(successor) {
                    let cycle_start = stack.iter().position(|s| s == successor).unwrap_or(0);
                    let cycle = &stack[cycle_start..];
                    let guarded = cycle.iter().any(|s| {
                        self.steps
                            .get(s)
                            .map(|n| n.may_suspend || n.is_async_handler)
                            .unwrap_or(false)
                    });
                    if !guarded {
                        return Err(EngineError::InvalidWorkflow {
                            workflow_id: self.workflow_id.to_string(),
                            message: format!(
                                "cycle through steps {:?} has no suspend/async escape",
                                cycle.iter().map(|s| s.as_str()).collect::<Vec<_>>()
                            ),
                        });
                    }
                } else if !visited.contains(successor) {
                    self.dfs_cycle_check(successor, visiting, visited, stack)?;
                }
            }
        }

        stack.pop();
        visiting.remove(step_id);
        visited.insert(step_id.clone());
        Ok(())
    }

    pub fn step(&self, step_id: &StepId) -> Option<&StepNode> {
        self.steps.get(step_id)
    }

    pub fn steps(&self) -> impl Iterator<Item = &StepNode> {
        self.step_order.iter().filter_map(|id| self.steps.get(id))
    }
}
