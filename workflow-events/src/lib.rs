//! ABOUTME: Lifecycle event bus fanning workflow-level events out to named listeners

pub mod bus;
pub mod event;
pub mod listener;

pub mod prelude {
    pub use crate::bus::EventBus;
    pub use crate::event::WorkflowEvent;
    pub use crate::listener::{FnListener, Listener};
}
