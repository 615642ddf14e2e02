use super::track;
use crate::dtos::{
    CreateUnpaidAmountRequest, InvoiceResponse, InvoiceUnpaidAmountsRequest,
    ListUnpaidAmountsQuery, UpdateUnpaidAmountRequest,
};
use crate::middleware::UserId;
use crate::models::UnpaidAmountChanges;
use crate::services::{AddEntryInput, InvoiceEntriesInput};
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

pub async fn create_unpaid_amount(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(req): Json<CreateUnpaidAmountRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let entry = state
        .ledger
        .add(
            user_id,
            AddEntryInput {
                client_id: req.client_id,
                amount: req.amount,
                description: req.description,
                entry_date: req.entry_date,
                due_date: req.due_date,
            },
        )
        .await
        .map_err(track)?;

    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn list_unpaid_amounts(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(query): Query<ListUnpaidAmountsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let entries = state
        .ledger
        .list(user_id, query.client_id)
        .await
        .map_err(track)?;
    Ok(Json(entries))
}

pub async fn get_unpaid_amount(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(unpaid_amount_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let entry = state
        .ledger
        .get(user_id, unpaid_amount_id)
        .await
        .map_err(track)?;
    Ok(Json(entry))
}

pub async fn update_unpaid_amount(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(unpaid_amount_id): Path<Uuid>,
    Json(req): Json<UpdateUnpaidAmountRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let changes = UnpaidAmountChanges {
        amount: req.amount,
        description: req.description,
        entry_date: req.entry_date,
        due_date: req.due_date,
    };

    let entry = state
        .ledger
        .edit(user_id, unpaid_amount_id, changes)
        .await
        .map_err(track)?;
    Ok(Json(entry))
}

/// Bundle selected ledger entries of one client into a new draft invoice.
pub async fn invoice_unpaid_amounts(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(req): Json<InvoiceUnpaidAmountsRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let detail = state
        .ledger
        .invoice_entries(
            user_id,
            InvoiceEntriesInput {
                unpaid_amount_ids: req.unpaid_amount_ids,
                project_id: req.project_id,
                due_date: req.due_date,
            },
        )
        .await
        .map_err(track)?;

    Ok((StatusCode::CREATED, Json(InvoiceResponse::from(detail))))
}
