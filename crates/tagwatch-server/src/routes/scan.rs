use axum::extract::State;
use axum::Json;

use tagwatch_core::engine::CycleReport;

use crate::error::AppError;
use crate::state::AppState;

/// POST /api/scan: run one cycle now. Waits for an in-flight cycle first.
pub async fn trigger_scan(State(app): State<AppState>) -> Result<Json<CycleReport>, AppError> {
    let engine = app.engine.clone();
    let report = tokio::task::spawn_blocking(move || engine.run_cycle())
        .await
        .map_err(AppError::join)?;
    Ok(Json(report))
}
