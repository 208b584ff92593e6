//! services/api/src/web/middleware.rs
//!
//! Authentication middleware. Resolves the bearer credential to a
//! [`Principal`] and inserts it into the request extensions.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use forum_core::domain::Principal;
use forum_core::ForumError;
use std::sync::Arc;
use tracing::debug;

use crate::web::error::HttpError;
use crate::web::state::AppState;

/// Requests without an `Authorization` header proceed as a guest; a header
/// that does not carry a valid bearer token is rejected with 401.
pub async fn authenticate(State(state): State<Arc<AppState>>, mut req: Request, next: Next) -> Response {
    let principal = match req.headers().get(header::AUTHORIZATION) {
        None => Principal::guest(),
        Some(value) => {
            let token = value
                .to_str()
                .ok()
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::trim);
            let resolved = token.and_then(|t| state.auth.authenticate(t).ok());
            match resolved {
                Some(principal) => principal,
                None => {
                    debug!("Rejected an invalid bearer credential");
                    return HttpError(ForumError::Unauthenticated).into_response();
                }
            }
        }
    };

    req.extensions_mut().insert(principal);
    next.run(req).await
}
