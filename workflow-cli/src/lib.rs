//! ABOUTME: Command-line adapter library over the in-process workflow engine
//! ABOUTME: Thin by design — argument parsing and formatting only, no logic beyond Engine calls

pub mod cli;
pub mod commands;
pub mod config;
pub mod demo_workflows;
pub mod output;

pub use cli::{Cli, Commands, OutputFormat};
