//! ABOUTME: Interceptor chain wrapping step execution: before/after/error hooks for testing and ops

pub mod chain;
pub mod traits;

pub mod prelude {
    pub use crate::chain::InterceptorChain;
    pub use crate::traits::Interceptor;
}
