//! Reconciliation logic, one module per custom resource plus the shared
//! install and reference-tracking helpers

pub mod bind_info;
pub mod config;
pub mod install;
pub mod registry;
pub mod request;
pub mod tracker;
