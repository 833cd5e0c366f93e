//! ABOUTME: Selects the next step from a completed step's result, the graph, and branch events
//! ABOUTME: Pure and deterministic — identical (graph, result) always yields the same outcome

use workflow_core::error::{EngineError, Result};
use workflow_core::graph::{StepNode, WorkflowDefinition};
use workflow_core::result::{AsyncRequest, StepResult, SuspendRequest};
use workflow_core::types::{StepId, TypedValue};

/// What the core executor should do next.
pub enum RouteOutcome {
    /// Advance to `step_id` with `input` as its argument.
    Advance { step_id: StepId, input: TypedValue },
    /// Pause the run; a suspension record must be written.
    Suspend(SuspendRequest),
    /// Schedule a deferred handler; the run goes SUSPENDED.
    Async(AsyncRequest),
    /// Terminal success for the run.
    Finish(serde_json::Value),
}

/// Route from `current`'s result. `result` must
/// already be resolved by the retry executor — a `Fail` never reaches
/// the router; retry exhaustion is reported as a terminal error before
/// routing is attempted.
pub fn route(def: &WorkflowDefinition, current: &StepNode, result: StepResult) -> Result<RouteOutcome> {
    match result {
        StepResult::Continue(value) => {
            let (step_id, _rank) = resolve_successor(def, current, &value)?;
            Ok(RouteOutcome::Advance { step_id, input: value })
        }
        StepResult::Branch(event) => {
            let (step_id, _rank) = resolve_successor(def, current, &event)?;
            Ok(RouteOutcome::Advance { step_id, input: event })
        }
        StepResult::Finish(value) => Ok(RouteOutcome::Finish(value)),
        StepResult::Suspend(request) => Ok(RouteOutcome::Suspend(request)),
        StepResult::Async(request) => Ok(RouteOutcome::Async(request)),
        StepResult::Fail(failure) => Err(EngineError::internal(format!(
            "router received an unresolved Fail for step '{}': {}",
            current.step_id, failure.message
        ))),
    }
}

/// Picks the unique successor whose declared tag is the most specific
/// supertype of `value`'s runtime type: the
/// candidate whose tag has the lowest position in `value.ancestors`.
/// Ties are broken by declared order (first `with_successor` call wins);
/// a step with no declared successors is `MissingSuccessor`.
fn resolve_successor(
    def: &WorkflowDefinition,
    current: &StepNode,
    value: &TypedValue,
) -> Result<(StepId, usize)> {
    if current.next_classes.is_empty() {
        return Err(EngineError::MissingSuccessor {
            step_id: current.step_id.to_string(),
        });
    }

    let mut best: Option<(usize, usize, &StepId)> = None; // (ancestor_rank, declared_idx, target)
    for (idx, (tag, target)) in current.next_classes.iter().enumerate() {
        let Some(rank) = value.ancestors.iter().position(|a| a == tag) else {
            continue;
        };
        let better = match best {
            None => true,
            Some((best_rank, best_idx, _)) => (rank, idx) < (best_rank, best_idx),
        };
        if better {
            best = Some((rank, idx, target));
        }
    }

    let Some((rank, _, target)) = best else {
        return Err(EngineError::MissingSuccessor {
            step_id: current.step_id.to_string(),
        });
    };

    if def.step(target).is_none() {
        return Err(EngineError::UnknownStep {
            workflow_id: def.workflow_id.to_string(),
            step_id: target.to_string(),
        });
    }

    Ok((target.clone(), rank))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use workflow_core::context::Context;
    use workflow_core::types::{TypeTag, WorkflowId};

    struct NoopStep;

    #[async_trait]
    impl workflow_core::step::Step for NoopStep {
        async fn execute(&self, input: TypedValue, _ctx: &dyn Context) -> Result<StepResult> {
            Ok(StepResult::Continue(input))
        }
    }

    fn node(id: &str) -> StepNode {
        StepNode::new(StepId::new(id), TypeTag::any(), TypeTag::any(), Arc::new(NoopStep))
    }

    fn two_step_def() -> WorkflowDefinition {
        let nodes = vec![
            node("a")
                .initial()
                .with_successor("UserInput", StepId::new("b"))
                .with_successor(TypeTag::any(), StepId::new("c")),
            node("b"),
            node("c"),
        ];
        WorkflowDefinition::try_new(WorkflowId::new("wf"), "1.0", nodes).unwrap()
    }

    #[test]
    fn continue_picks_most_specific_declared_successor() {
        let def = two_step_def();
        let a = def.step(&StepId::new("a")).unwrap();
        let value = TypedValue::new("UserInput", serde_json::json!({"name": "ada"}));
        let outcome = route(&def, a, StepResult::Continue(value)).unwrap();
        match outcome {
            RouteOutcome::Advance { step_id, .. } => assert_eq!(step_id, StepId::new("b")),
            _ => panic!("expected Advance"),
        }
    }

    #[test]
    fn continue_falls_back_to_any_successor() {
        let def = two_step_def();
        let a = def.step(&StepId::new("a")).unwrap();
        let value = TypedValue::new("SomethingElse", serde_json::json!(1));
        let outcome = route(&def, a, StepResult::Continue(value)).unwrap();
        match outcome {
            RouteOutcome::Advance { step_id, .. } => assert_eq!(step_id, StepId::new("c")),
            _ => panic!("expected Advance"),
        }
    }

    #[test]
    fn missing_successor_is_an_error() {
        let def = two_step_def();
        let b = def.step(&StepId::new("b")).unwrap();
        let value = TypedValue::new("Anything", serde_json::json!(1));
        let err = route(&def, b, StepResult::Continue(value)).unwrap_err();
        assert!(matches!(err, EngineError::MissingSuccessor { .. }));
    }

    #[test]
    fn finish_is_terminal() {
        let def = two_step_def();
        let a = def.step(&StepId::new("a")).unwrap();
        let outcome = route(&def, a, StepResult::Finish(serde_json::json!("done"))).unwrap();
        assert!(matches!(outcome, RouteOutcome::Finish(_)));
    }

    #[test]
    fn routing_is_deterministic_for_identical_inputs() {
        let def = two_step_def();
        let a = def.step(&StepId::new("a")).unwrap();
        let value = TypedValue::new("UserInput", serde_json::json!(1));
        let first = route(&def, a, StepResult::Continue(value.clone())).unwrap();
        let second = route(&def, a, StepResult::Continue(value)).unwrap();
        let step_id = |o: &RouteOutcome| match o {
            RouteOutcome::Advance { step_id, .. } => step_id.clone(),
            _ => panic!(),
        };
        assert_eq!(step_id(&first), step_id(&second));
    }
}
