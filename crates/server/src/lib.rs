//! The lifecycle orchestrator and tool surface: the pieces of the
//! `infractl` binary that are useful to exercise without the stdio loop
//! around them.

pub mod cli;
pub mod config;
pub mod logging;
pub mod orchestrator;
pub mod shutdown;
pub mod tools;

pub use orchestrator::Orchestrator;
