use axum::extract::State;
use axum::Json;

use tagwatch_core::engine::RepositoryOverview;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/repositories: every watched repository with its recorded tags.
///
/// Repositories that have not been scanned yet are listed with `scanned: false`.
pub async fn list_repositories(
    State(app): State<AppState>,
) -> Result<Json<Vec<RepositoryOverview>>, AppError> {
    let engine = app.engine.clone();
    let overview = tokio::task::spawn_blocking(move || engine.overview())
        .await
        .map_err(AppError::join)??;
    Ok(Json(overview))
}
