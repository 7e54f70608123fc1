//! HTTP server for the chat relay API.
//!
//! Provides REST endpoints for:
//! - Chat turns, stored or ephemeral
//! - Conversation history and listing
//! - Renaming conversations

pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Router with the CORS and tracing layers applied.
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server with graceful shutdown support.
///
/// The server will stop accepting new connections when `shutdown_signal` completes.
///
/// # Errors
/// Returns an error if the listener cannot be bound or serving fails.
pub async fn run_server_with_shutdown<F>(
    state: Arc<AppState>,
    port: u16,
    shutdown_signal: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Chat relay listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamErrorPolicy;
    use crate::test_support::{self, ScriptedCompletion};
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let (orchestrator, _store) = test_support::orchestrator(ScriptedCompletion::echo()).await;
        let app = build_app(AppState::new(orchestrator, UpstreamErrorPolicy::Strict));

        let request = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://localhost:3000")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn test_server_stops_on_shutdown_signal() {
        let (orchestrator, _store) = test_support::orchestrator(ScriptedCompletion::echo()).await;
        let state = AppState::new(orchestrator, UpstreamErrorPolicy::Strict);

        // Port 0 lets the OS pick a free port.
        let result = run_server_with_shutdown(state, 0, async {}).await;
        assert!(result.is_ok());
    }
}
