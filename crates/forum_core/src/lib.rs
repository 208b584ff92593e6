//! crates/forum_core/src/lib.rs
//!
//! The discussion subsystem: domain model, ports and the services that
//! implement the forum's rules on top of them.

#[macro_use]
pub mod domain;
pub mod error;
pub mod ports;
pub mod services;
pub mod settings;

pub use error::{ErrorKind, ForumError, ForumResult};
pub use services::{Forum, Ports};
pub use settings::ForumSettings;
