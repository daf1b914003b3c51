//! Typed value/schema model and shared data types for the infractl
//! infrastructure-management server.
//!
//! This crate has no knowledge of gRPC, subprocesses, or SQL — it is the
//! pure translation layer (value conversion, schema conversion) plus the
//! data model that the provider and state crates build on.

pub mod error;
pub mod model;
pub mod schema;
pub mod value;

pub use error::{Error, Result};
