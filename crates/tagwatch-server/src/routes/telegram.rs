use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use tagwatch_core::callback::dispatch_callback;
use tagwatch_core::command::dispatch_command;
use tagwatch_core::telegram::Update;
use tagwatch_core::transport::Inbound;

use crate::error::AppError;
use crate::state::AppState;

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// POST /telegram/webhook: Telegram pushes one update per request.
///
/// Any update that passed the secret check is answered with 200, including
/// ones that were ignored, so Telegram does not redeliver it.
pub async fn webhook(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Some(expected) = &app.webhook_secret {
        let given = headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if given != expected {
            tracing::warn!(update = update.update_id, "webhook secret mismatch");
            return Err(AppError::unauthorized("invalid webhook secret"));
        }
    }

    let update_id = update.update_id;
    let engine = app.engine.clone();
    match update.into_inbound() {
        Some(Inbound::Callback(callback)) => {
            let reply = tokio::task::spawn_blocking(move || dispatch_callback(&engine, &callback))
                .await
                .map_err(AppError::join)?;
            Ok(Json(serde_json::json!({
                "ok": true,
                "handled": true,
                "outcome": reply.outcome,
            })))
        }
        Some(Inbound::Command(command)) => {
            let reply = tokio::task::spawn_blocking(move || dispatch_command(&engine, &command))
                .await
                .map_err(AppError::join)?;
            Ok(Json(serde_json::json!({
                "ok": true,
                "handled": reply.is_some(),
                "command": reply.map(|r| r.command),
            })))
        }
        None => {
            tracing::debug!(update = update_id, "ignoring update without callback or command");
            Ok(Json(serde_json::json!({ "ok": true, "handled": false })))
        }
    }
}
