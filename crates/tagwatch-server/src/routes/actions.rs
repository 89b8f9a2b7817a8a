use axum::extract::State;
use axum::Json;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/actions: stored deploy actions, newest first, with expiry.
pub async fn list_actions(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let engine = app.engine.clone();
    let result = tokio::task::spawn_blocking(move || {
        let now = chrono::Utc::now();
        let ttl = engine.action_ttl();
        let actions: Vec<serde_json::Value> = engine
            .store()
            .actions()?
            .into_iter()
            .map(|a| {
                serde_json::json!({
                    "id": a.id,
                    "repository": a.repository,
                    "tag": a.tag,
                    "created_at": a.created_at,
                    "consumed": a.consumed,
                    "consumed_at": a.consumed_at,
                    "expired": a.is_expired(now, ttl),
                })
            })
            .collect();
        Ok::<_, tagwatch_core::TagwatchError>(serde_json::Value::Array(actions))
    })
    .await
    .map_err(AppError::join)??;

    Ok(Json(result))
}
