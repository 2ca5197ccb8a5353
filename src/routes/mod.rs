//! API routes within the application. Mainly exposes sub-routers which are
//! nested with the main Axum router in [`app`].
pub mod collage;
pub mod images;

use axum::{middleware::from_fn_with_state, routing::get, Json, Router};
use tower_http::trace::TraceLayer;

use crate::{middleware::auth::api_token_middleware, state::AppState};

/// The complete application router, including the health check and the
/// configured URI prefix.
pub fn app(state: AppState) -> Router {
    let api = collage::create_router()
        .merge(images::create_router(state.config.max_upload_bytes))
        .layer(from_fn_with_state(state.clone(), api_token_middleware));
    let router = Router::new().route("/", get(root)).nest("/api", api);
    let router = match state.config.api_uri_prefix.as_str() {
        "/" => router,
        prefix => Router::new().nest(prefix, router),
    };
    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Simply a healthcheck that this component is functional.
async fn root() -> Json<String> {
    Json("Graphic tools service is running".to_owned())
}
