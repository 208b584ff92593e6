//! services/api/src/web/state.rs
//!
//! Defines the application state shared by every handler.

use crate::adapters::JwtAuthenticator;
use crate::config::Config;
use forum_core::Forum;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub forum: Forum,
    pub auth: Arc<JwtAuthenticator>,
    pub config: Arc<Config>,
}
