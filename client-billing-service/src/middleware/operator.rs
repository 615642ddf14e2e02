use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use secrecy::{ExposeSecret, Secret};
use service_core::error::AppError;
use service_core::utils::signature::tokens_match;

pub const OPERATOR_TOKEN_HEADER: &str = "X-Operator-Token";

/// Guard for cross-tenant forensic routes.
///
/// Without a configured token the route does not exist for callers. With one,
/// the request must present it in `X-Operator-Token`.
pub async fn require_operator(
    State(token): State<Option<Secret<String>>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(token) = token else {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "Resource not found: {}",
            request.uri().path()
        )));
    };

    let presented = request
        .headers()
        .get(OPERATOR_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !tokens_match(token.expose_secret(), presented) {
        tracing::warn!(path = %request.uri().path(), "Operator route called without a valid token");
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Missing or invalid operator token"
        )));
    }

    Ok(next.run(request).await)
}
