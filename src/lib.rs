#![allow(clippy::collapsible_if)]

pub mod config;
pub mod diagnostics;
pub mod language;
pub mod pipeline;
pub mod runtime;

pub use config::Options;
pub use diagnostics::{CompileError, RunError};
pub use pipeline::{check_source, check_source_with, run_source};

#[cfg(test)]
mod tests;
