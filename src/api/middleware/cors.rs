use axum::Router;
use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};

/// Restricts cross-origin access to `allowed_origin` when one is configured.
pub fn add_cors(router: Router, allowed_origin: Option<&str>) -> Router {
    let layer = match allowed_origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        Some(Err(err)) => {
            tracing::warn!("Ignoring invalid allowed origin: {}", err);
            CorsLayer::permissive()
        }
        None => CorsLayer::permissive(),
    };
    router.layer(layer)
}
