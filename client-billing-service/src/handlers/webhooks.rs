use super::track;
use crate::dtos::WebhookLogsQuery;
use crate::services::webhooks::{InboundWebhook, SIGNATURE_HEADER};
use crate::startup::AppState;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{Map, Value};
use service_core::error::AppError;

pub const PAYMENT_WEBHOOK_PATH: &str = "/webhooks/payments";

fn headers_json(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        map.insert(name.as_str().to_string(), Value::String(value));
    }
    Value::Object(map)
}

/// Gateway callback. Unauthenticated by tenant; optionally signed.
pub async fn receive_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string());

    let inbound = InboundWebhook {
        endpoint: PAYMENT_WEBHOOK_PATH.to_string(),
        method: "POST".to_string(),
        headers: headers_json(&headers),
        body: body.to_vec(),
        signature,
    };

    let reply = state.webhooks.handle(inbound).await.map_err(track)?;
    let status =
        StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    Ok((status, Json(reply.body)))
}

pub async fn list_webhook_logs(
    State(state): State<AppState>,
    Query(query): Query<WebhookLogsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let logs = state
        .store
        .list_webhook_logs(query.limit())
        .await
        .map_err(track)?;
    Ok(Json(logs))
}
