//! Operand Lifecycle Operator
//!
//! Installs operators through OLM on behalf of tenant namespaces, renders and
//! maintains their operand resources, and shares operand credentials with the
//! namespaces that consume them, using four Custom Resource Definitions.

pub mod adapters;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod reconcilers;

pub use error::{Error, Result};
