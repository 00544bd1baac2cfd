use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

/// Header carrying the authenticated user, set by the gateway in front of
/// this service.
pub const USER_ID_HEADER: &str = "X-User-ID";

/// UserId extractor for import-service.
///
/// Every ledger read and write is scoped to this id. Authentication happens
/// upstream; the header is trusted as-is.
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
            .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Missing X-User-ID header")))?;

        let user_id = Uuid::parse_str(raw.trim())
            .map_err(|_| AppError::AuthError(anyhow::anyhow!("Invalid X-User-ID header")))?;

        // Add to tracing span for observability
        tracing::Span::current().record("user_id", raw);

        Ok(UserId(user_id))
    }
}
