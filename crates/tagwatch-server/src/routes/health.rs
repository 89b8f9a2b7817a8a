use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// GET /healthz: liveness plus the size of the watch list.
pub async fn healthz(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "repositories": app.engine.watched().len(),
        "time": chrono::Utc::now(),
    }))
}
