//! Middleware used for checking that callers of the API hold the shared token.
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::state::AppState;

/// The header carrying the shared API token.
pub const API_TOKEN_HEADER: &str = "X-Api-Token";

/// Reject requests without the configured API token. Does nothing when no
/// token is configured.
pub async fn api_token_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.config.api_token.as_ref() else {
        return Ok(next.run(req).await);
    };
    let token = req
        .headers()
        .get(API_TOKEN_HEADER)
        .ok_or_else(|| {
            warn!("Request is missing {API_TOKEN_HEADER}");
            StatusCode::UNAUTHORIZED
        })?
        .to_str()
        .map_err(|_err| {
            warn!("{API_TOKEN_HEADER} contains non-ASCII.");
            StatusCode::BAD_REQUEST
        })?;
    if !tokens_match(token.as_bytes(), expected.expose().as_bytes()) {
        warn!("Incorrect {API_TOKEN_HEADER} in request");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

/// Compare without short-circuiting on the first differing byte.
fn tokens_match(given: &[u8], expected: &[u8]) -> bool {
    given.len() == expected.len()
        && given
            .iter()
            .zip(expected)
            .fold(0_u8, |diff, (left, right)| diff | (left ^ right))
            == 0
}
