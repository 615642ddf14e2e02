use super::track;
use crate::dtos::{
    CreateInvoiceRequest, InvoiceResponse, ListInvoicesQuery, UpdateInvoiceRequest,
};
use crate::middleware::UserId;
use crate::models::{ListInvoicesFilter, NewInvoiceItem};
use crate::services::{CreateInvoiceInput, UpdateInvoiceInput};
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

pub async fn create_invoice(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(req): Json<CreateInvoiceRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    req.items.iter().try_for_each(Validate::validate)?;

    let input = CreateInvoiceInput {
        client_id: req.client_id,
        project_id: req.project_id,
        items: req.items.into_iter().map(NewInvoiceItem::from).collect(),
        unpaid_amount_ids: req.unpaid_amount_ids,
        created_at: req.created_at,
        due_date: req.due_date,
    };

    let detail = state
        .invoices
        .create(user_id, input)
        .await
        .map_err(track)?;

    Ok((StatusCode::CREATED, Json(InvoiceResponse::from(detail))))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(query): Query<ListInvoicesQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = ListInvoicesFilter {
        status: query.status,
        client_id: query.client_id,
    };
    let invoices = state
        .invoices
        .list(user_id, &filter)
        .await
        .map_err(track)?;
    Ok(Json(invoices))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(invoice_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let detail = state
        .invoices
        .get(user_id, invoice_id)
        .await
        .map_err(track)?;
    Ok(Json(InvoiceResponse::from(detail)))
}

pub async fn update_invoice(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(invoice_id): Path<Uuid>,
    Json(req): Json<UpdateInvoiceRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    if let Some(items) = &req.items {
        items.iter().try_for_each(Validate::validate)?;
    }

    let input = UpdateInvoiceInput {
        items: req
            .items
            .map(|items| items.into_iter().map(NewInvoiceItem::from).collect()),
        created_at: req.created_at,
        due_date: req.due_date,
    };

    let detail = state
        .invoices
        .update(user_id, invoice_id, input)
        .await
        .map_err(track)?;
    Ok(Json(InvoiceResponse::from(detail)))
}

pub async fn delete_invoice(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(invoice_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state
        .invoices
        .delete(user_id, invoice_id)
        .await
        .map_err(track)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn send_invoice(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(invoice_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let detail = state
        .invoices
        .send(user_id, invoice_id)
        .await
        .map_err(track)?;
    Ok(Json(InvoiceResponse::from(detail)))
}

pub async fn mark_invoice_paid(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(invoice_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let detail = state
        .invoices
        .mark_paid(user_id, invoice_id)
        .await
        .map_err(track)?;
    Ok(Json(InvoiceResponse::from(detail)))
}

pub async fn archive_invoice(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(invoice_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let detail = state
        .invoices
        .archive(user_id, invoice_id)
        .await
        .map_err(track)?;
    Ok(Json(InvoiceResponse::from(detail)))
}

pub async fn unarchive_invoice(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(invoice_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let detail = state
        .invoices
        .unarchive(user_id, invoice_id)
        .await
        .map_err(track)?;
    Ok(Json(InvoiceResponse::from(detail)))
}

/// Four-checkpoint reminder view for one invoice.
pub async fn invoice_reminders(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(invoice_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let view = state
        .reminders
        .timeline(user_id, invoice_id)
        .await
        .map_err(track)?;
    Ok(Json(view))
}
