use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::dto::{
    CreateUserRequest, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse,
    UpdateUserRequest, UserListQuery, UserResponse,
};
use crate::{
    auth::{
        claims::Role,
        middleware::{authenticate, require_roles, CurrentUser},
    },
    error::ApiError,
    state::AppState,
};

const ADMIN_ONLY: &[Role] = &[Role::Admin];
const ANY_ROLE: &[Role] = &[Role::Admin, Role::User];

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

pub fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/create-user", post(create_user))
        .route("/admin/get-all-users", get(get_all_users))
        .route_layer(middleware::from_fn(|req: Request, next: Next| {
            require_roles(ADMIN_ONLY, req, next)
        }))
        .route_layer(middleware::from_fn_with_state(state, authenticate))
}

pub fn user_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/users/:id",
            get(get_user).patch(update_user).delete(delete_user),
        )
        .route_layer(middleware::from_fn(|req: Request, next: Next| {
            require_roles(ANY_ROLE, req, next)
        }))
        .route_layer(middleware::from_fn_with_state(state, authenticate))
}

/// Role `user` may only address its own record.
fn ensure_self_or_admin(caller: CurrentUser, id: &str) -> Result<(), ApiError> {
    if caller.is_admin() {
        return Ok(());
    }
    match Uuid::parse_str(id.trim()) {
        Ok(target) if target == caller.id => Ok(()),
        _ => {
            warn!(user_id = %caller.id, target = %id, "access to other user's record denied");
            Err(ApiError::Forbidden(
                "you don't have access to this resource",
            ))
        }
    }
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let Json(req) = payload?;
    let user = state.users.register(req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(req) = payload?;
    Ok(Json(state.users.login(req).await?))
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let Json(req) = payload?;
    let user = state.users.create_user(req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[instrument(skip(state))]
pub async fn get_all_users(
    State(state): State<AppState>,
    query: Result<Query<UserListQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(q) = query?;
    if q.pagination == Some(false) {
        let users = state.users.get_all_users(q.search.as_deref()).await?;
        return Ok(Json(users).into_response());
    }
    let page = state.users.get_all_users_paginated(q.into()).await?;
    Ok(Json(page).into_response())
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    ensure_self_or_admin(caller, &id)?;
    Ok(Json(state.users.get_user_by_id(&id).await?))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(id): Path<String>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    ensure_self_or_admin(caller, &id)?;
    let Json(req) = payload?;
    Ok(Json(state.users.update_user(&id, req).await?))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    ensure_self_or_admin(caller, &id)?;
    Ok(Json(state.users.delete_user(&id).await?))
}
