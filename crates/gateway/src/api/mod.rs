pub mod admin;
pub mod envelope;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Builds the router. State is attached with `.with_state()` by the
/// caller; the `AdminGuard` extractor reads `AppState` straight off the
/// request rather than needing a separate middleware layer.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(admin::health))
        .route("/v1/envelope", post(envelope::handle))
        .route("/v1/metrics", get(admin::metrics))
        .route("/v1/admin/system", get(admin::system_info))
        .layer(TraceLayer::new_for_http())
}
