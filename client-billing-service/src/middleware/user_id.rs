use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "X-User-ID";

/// Account owner the request acts for.
///
/// Set by the trusted BFF after authenticating the caller. Every store query
/// is scoped by it, so entities of other users resolve as not found.
#[derive(Debug, Clone, Copy)]
pub struct UserId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::AuthError(anyhow::anyhow!(
                    "Missing X-User-ID header (required from BFF)"
                ))
            })?;

        let user_id = Uuid::parse_str(raw.trim()).map_err(|_| {
            AppError::AuthError(anyhow::anyhow!("X-User-ID header is not a valid UUID"))
        })?;

        tracing::Span::current().record("user_id", raw);

        Ok(UserId(user_id))
    }
}
