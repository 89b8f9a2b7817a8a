pub mod error;
pub mod poller;
pub mod routes;
pub mod scheduler;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tagwatch_core::telegram::TelegramBot;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the axum Router with all routes and middleware.
/// Used by `serve_on()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(routes::health::healthz))
        // Read-only views of the store
        .route(
            "/api/repositories",
            get(routes::repositories::list_repositories),
        )
        .route("/api/actions", get(routes::actions::list_actions))
        // Manual cycle
        .route("/api/scan", post(routes::scan::trigger_scan))
        // Inbound callbacks in webhook mode
        .route("/telegram/webhook", post(routes::telegram::webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// How button presses reach the process when no webhook is configured.
pub struct PollerOptions {
    pub bot: Arc<TelegramBot>,
    pub poll_timeout: Duration,
}

/// Start the scheduler, the optional long-poll loop and the HTTP server on a
/// pre-bound listener. Returns after Ctrl-C.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    app_state: AppState,
    interval: Duration,
    poller: Option<PollerOptions>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let engine = app_state.engine.clone();

    let mut background = vec![tokio::spawn(scheduler::run_scheduler(
        engine.clone(),
        interval,
    ))];
    if let Some(p) = poller {
        background.push(tokio::spawn(poller::run_poller(
            engine,
            p.bot,
            p.poll_timeout,
        )));
    }

    tracing::info!("tagwatch listening on http://{addr}");
    let app = build_router(app_state);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    for task in background {
        task.abort();
    }
    served?;
    tracing::info!("tagwatch stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
