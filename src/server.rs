use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;

/// Builds the demo `Router`: one greeting route, instrumented by DEX.
pub fn create_router(dex: &dex::Dex) -> Router {
    let routes = Router::new()
        // ── Demo endpoint ───────────────────────────────────────
        .route("/", get(hello));

    // ── Global middleware (applied bottom-up) ───────────────────
    dex.instrument(routes).layer(CorsLayer::permissive())
}

async fn hello() -> &'static str {
    "Hello"
}
