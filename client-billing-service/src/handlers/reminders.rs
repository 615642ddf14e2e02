use super::track;
use crate::dtos::RunRemindersRequest;
use crate::startup::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;
use service_core::error::AppError;

/// Cron entry point. Evaluates every sent invoice with a due date.
pub async fn run_reminders(
    State(state): State<AppState>,
    body: Option<Json<RunRemindersRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let now = req.now.unwrap_or_else(Utc::now);

    let summary = state.reminders.run(now).await.map_err(track)?;

    tracing::info!(
        evaluated = summary.evaluated,
        sent = summary.sent,
        failed = summary.failed,
        "Reminder run finished"
    );

    Ok(Json(summary))
}
