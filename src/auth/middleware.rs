use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::claims::Role;
use crate::{error::ApiError, state::AppState};

/// Identity attached to the request by [`authenticate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: Uuid,
    pub role: Role,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Authentication gate: requires `Authorization: Bearer <token>`, validates
/// the token and stores a [`CurrentUser`] in the request extensions.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| {
            warn!("authorization header not found");
            ApiError::Unauthorized("token not found")
        })?;

    let token = header
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| {
            warn!("authorization header format invalid");
            ApiError::Unauthorized("token not valid")
        })?;

    let claims = state.tokens.validate(token).map_err(|e| {
        warn!(error = %e, "invalid token");
        ApiError::Unauthorized("token not valid")
    })?;

    debug!(user_id = %claims.sub, role = %claims.role, "authenticated request");
    req.extensions_mut().insert(CurrentUser {
        id: claims.sub,
        role: claims.role,
    });
    Ok(next.run(req).await)
}

/// Authorization gate: plain membership test of the authenticated role
/// against `allowed`. Must be layered inside [`authenticate`].
pub async fn require_roles(
    allowed: &'static [Role],
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(user) = req.extensions().get::<CurrentUser>().copied() else {
        warn!("authorization failed: role not found in request");
        return Err(ApiError::Unauthorized("role not found"));
    };

    if !allowed.contains(&user.role) {
        warn!(user_id = %user.id, role = %user.role, ?allowed, "forbidden access attempt");
        return Err(ApiError::Forbidden(
            "you don't have access to this resource",
        ));
    }

    Ok(next.run(req).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .copied()
            .ok_or(ApiError::Unauthorized("token not found"))
    }
}
