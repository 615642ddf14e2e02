use super::track;
use crate::dtos::{CreateClientRequest, CreateProjectRequest, CreateUserRequest};
use crate::middleware::UserId;
use crate::models::{CreateClient, CreateProject, User};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

/// Provision an account owner. Called by the BFF on sign-up.
pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let mut user = User::new(req.email.trim(), req.name.trim(), req.charges_taxes);
    user.tps_number = req.tps_number;
    user.tvq_number = req.tvq_number;
    user.gateway_customer_id = req.gateway_customer_id;

    let user = state.store.insert_user(&user).await.map_err(track)?;
    tracing::info!(user_id = %user.user_id, "User provisioned");

    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn get_current_user(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .store
        .get_user(user_id)
        .await
        .map_err(track)?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User {} not found", user_id)))?;
    Ok(Json(user))
}

pub async fn create_client(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(req): Json<CreateClientRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    state
        .store
        .get_user(user_id)
        .await
        .map_err(track)?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User {} not found", user_id)))?;

    let client = state
        .store
        .create_client(&CreateClient {
            user_id,
            name: req.name.trim().to_string(),
            email: req.email.map(|e| e.trim().to_string()),
        })
        .await
        .map_err(track)?;

    Ok((StatusCode::CREATED, Json(client)))
}

pub async fn get_client(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(client_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let client = state
        .store
        .get_client(user_id, client_id)
        .await
        .map_err(track)?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Client {} not found", client_id)))?;
    Ok(Json(client))
}

pub async fn create_project(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    state
        .store
        .get_client(user_id, req.client_id)
        .await
        .map_err(track)?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Client {} not found", req.client_id))
        })?;

    let project = state
        .store
        .create_project(&CreateProject {
            user_id,
            client_id: req.client_id,
            name: req.name.trim().to_string(),
        })
        .await
        .map_err(track)?;

    Ok((StatusCode::CREATED, Json(project)))
}
