pub mod handlers;
pub mod state;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;

use crate::relay::RelayService;
use state::AppState;

/// Build the gateway router.
///
/// `GET /health` probes the store; the three `POST /event/*` routes are
/// the process surface the chat glue and payment rail talk to.
pub fn build_router(relay: Arc<RelayService>) -> Router {
    let state = Arc::new(AppState::new(relay));
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/event/chat", post(handlers::chat_event))
        .route("/event/pre-checkout", post(handlers::pre_checkout))
        .route("/event/settlement", post(handlers::settlement))
        .with_state(state)
}

/// Start HTTP gateway server
pub async fn run_server(host: &str, port: u16, relay: Arc<RelayService>) {
    let app = build_router(relay);

    let addr = format!("{host}:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("FATAL: Failed to bind to {}: {}", addr, e);
            eprintln!(
                "   Hint: Port {} may already be in use. Check with: lsof -i :{}",
                port, port
            );
            std::process::exit(1);
        }
    };

    tracing::info!("gateway listening on http://{addr}");

    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("FATAL: Server error: {}", e);
        std::process::exit(1);
    }
}
