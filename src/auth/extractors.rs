use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
};
use tracing::{debug, error, warn};

use super::{identity::Identity, jwt::JwtKeys};
use crate::state::AppState;

/// Extracts and validates the bearer JWT, then loads the caller's account so
/// the role reflects the stored row, not the one baked into the token.
pub struct AuthUser(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let keys = JwtKeys::from_ref(&state);
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or((
                StatusCode::UNAUTHORIZED,
                "Missing Authorization header".to_string(),
            ))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .or_else(|| auth_header.strip_prefix("bearer "))
            .ok_or((
                StatusCode::UNAUTHORIZED,
                "Invalid Authorization header".to_string(),
            ))?;

        let claims = match keys.verify(token) {
            Ok(c) => c,
            Err(_) => {
                warn!("invalid or expired token");
                return Err((
                    StatusCode::UNAUTHORIZED,
                    "Invalid or expired token".to_string(),
                ));
            }
        };

        let user = match state.users.find_by_id(claims.sub).await {
            Ok(Some(u)) => u,
            Ok(None) => {
                warn!(user_id = claims.sub, "token for a deleted account");
                return Err((
                    StatusCode::UNAUTHORIZED,
                    "Account no longer exists".to_string(),
                ));
            }
            Err(e) => {
                error!(error = %e, user_id = claims.sub, "load caller account");
                return Err((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                ));
            }
        };

        if user.role != claims.role {
            debug!(user_id = user.id, token_role = ?claims.role, role = ?user.role, "role changed since login");
        }
        Ok(AuthUser(user.identity()))
    }
}
