use axum::{Router, http::header, response::IntoResponse};
use tower_http::trace::TraceLayer;

/// Router answering every method and path with the greeting
pub fn create_router() -> Router {
    Router::new()
        .fallback(hello)
        .layer(TraceLayer::new_for_http())
}

async fn hello() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], "Hello World!")
}
