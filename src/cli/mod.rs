//! Command-line interface of the headless runner

/// Argument definitions
pub mod commands;

pub use commands::{Action, Commands, ConfigOptions, StartOptions};
