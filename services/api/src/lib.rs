//! services/api/src/lib.rs
//!
//! The HTTP service around the discussion core: configuration, adapters for
//! every port, the REST layer and the background workers.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
pub mod workers;
