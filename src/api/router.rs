//! HTTP router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! Routes are nested under `/api/`.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post};
use axum::Router;

use crate::api::endpoints;
use crate::api::types::ApiContext;

/// Multipart bodies carry the PDF plus form fields; leave headroom over
/// the 10 MiB file limit enforced by the upload handler.
const BODY_LIMIT_BYTES: usize = 12 * 1024 * 1024;

/// Build the API router.
///
/// Endpoint handlers use `State<ApiContext>` (provided via `with_state`).
///
/// NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
pub fn build_router(ctx: ApiContext) -> Router {
    let api = Router::new()
        .route("/health", get(endpoints::health::health))
        .route(
            "/documents",
            get(endpoints::documents::list).post(endpoints::documents::upload),
        )
        .route("/documents/:id", get(endpoints::documents::detail))
        .route("/documents/:id/status", get(endpoints::documents::status))
        .route(
            "/documents/:id/classify",
            post(endpoints::documents::classify),
        )
        .route(
            "/documents/:id/mappings",
            get(endpoints::mappings::list_for_document),
        )
        .route("/mappings/:id", patch(endpoints::mappings::update))
        .route("/mappings/:id/approve", post(endpoints::mappings::approve))
        .with_state(ctx)
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES));

    Router::new().nest("/api", api)
}
