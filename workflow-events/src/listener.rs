//! ABOUTME: Listener trait implemented by callers of addListener/removeListener

use crate::event::WorkflowEvent;
use async_trait::async_trait;

/// A named subscriber to workflow lifecycle events (
/// `addListener(name, listener)` / `removeListener(name)`).
#[async_trait]
pub trait Listener: Send + Sync {
    async fn on_event(&self, event: &WorkflowEvent);
}

/// Adapts a plain closure into a [`Listener`] for callers who don't
/// need a named struct.
pub struct FnListener<F>(F);

impl<F> FnListener<F>
where
    F: Fn(&WorkflowEvent) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> Listener for FnListener<F>
where
    F: Fn(&WorkflowEvent) + Send + Sync,
{
    async fn on_event(&self, event: &WorkflowEvent) {
        (self.0)(event)
    }
}
