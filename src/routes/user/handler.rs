use axum::{
    Extension,
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
};
use validator::Validate;

use crate::AppState;
use crate::common::{Address, CreateAddressRequest, Tag};
use crate::error::AppError;
use crate::middleware::AuthUser;
use crate::utils::{generate_token, success_to_api_response, verify_password};

use super::model::{
    AuthResponse, LoginRequest, RegisterRequest, UpdateProfileRequest, User, UserInfo,
};

#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    if User::find_active_by_email(&state.pool, &req.email)
        .await?
        .is_some()
    {
        return Err(AppError::Validation("email is already registered".into()));
    }

    let user = User::create(&state.pool, req).await?;
    let (token, expires_at) = generate_token(user.uuid, user.is_superuser, &state.config)
        .map_err(|e| {
            tracing::error!("failed to issue token: {}", e);
            AppError::Invariant("token generation failed")
        })?;

    Ok((
        StatusCode::CREATED,
        success_to_api_response(AuthResponse {
            user: UserInfo::from(user),
            token,
            expires_at,
        }),
    ))
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = User::find_active_by_email(&state.pool, &req.email)
        .await?
        .ok_or(AppError::Unauthorized)?;

    let valid = verify_password(&req.password, &user.password_hash).map_err(|e| {
        tracing::error!("password verification failed: {}", e);
        AppError::Unauthorized
    })?;

    if !valid {
        return Err(AppError::Unauthorized);
    }

    let (token, expires_at) =
        generate_token(user.uuid, user.is_superuser, &state.config).map_err(|e| {
            tracing::error!("failed to issue token: {}", e);
            AppError::Invariant("token generation failed")
        })?;

    Ok(success_to_api_response(AuthResponse {
        user: UserInfo::from(user),
        token,
        expires_at,
    }))
}

#[axum::debug_handler]
pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let user = User::find_active_by_uuid(&state.pool, auth.user_id)
        .await?
        .ok_or(AppError::NotFound("user not found"))?;

    Ok(success_to_api_response(UserInfo::from(user)))
}

#[axum::debug_handler]
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let user = User::find_active_by_uuid(&state.pool, auth.user_id)
        .await?
        .ok_or(AppError::NotFound("user not found"))?;

    let updated = user.update_profile(&state.pool, &req).await?;

    Ok(success_to_api_response(UserInfo::from(updated)))
}

#[axum::debug_handler]
pub async fn get_address(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let user = User::find_active_by_uuid(&state.pool, auth.user_id)
        .await?
        .ok_or(AppError::NotFound("user not found"))?;

    let address = match user.address_uuid {
        Some(uuid) => Address::find_active(&state.pool, uuid).await?,
        None => None,
    };

    let address = address.ok_or(AppError::NotFound("user has no address"))?;

    Ok(success_to_api_response(address))
}

#[axum::debug_handler]
pub async fn set_address(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<CreateAddressRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = User::find_active_by_uuid(&state.pool, auth.user_id)
        .await?
        .ok_or(AppError::NotFound("user not found"))?;

    let address = Address::create(&state.pool, &req, auth.user_id).await?;
    user.set_address(&state.pool, address.uuid).await?;

    Ok((StatusCode::CREATED, success_to_api_response(address)))
}

#[derive(Debug, serde::Deserialize)]
pub struct FollowTagsRequest {
    pub tags: Vec<String>,
}

/// 整体替换用户关注的标签，按标题 get-or-create
#[axum::debug_handler]
pub async fn follow_tags(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<FollowTagsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = User::find_active_by_uuid(&state.pool, auth.user_id)
        .await?
        .ok_or(AppError::NotFound("user not found"))?;

    let mut tags = Vec::with_capacity(req.tags.len());
    for title in &req.tags {
        tags.push(Tag::get_or_create(&state.pool, title).await?);
    }

    let uuids: Vec<_> = tags.iter().map(|t| t.uuid).collect();
    user.replace_tags(&state.pool, &uuids).await?;

    Ok(success_to_api_response(tags))
}
