use axum::{
    Extension,
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::common::{ActivityFormat, Address, CreateAddressRequest};
use crate::error::AppError;
use crate::middleware::AuthUser;
use crate::policy::{self, GroupAccess};
use crate::utils::success_to_api_response;

use super::model::{Activity, CreateActivityRequest, UpdateActivityRequest};
use crate::routes::group::model::{Group, Membership};

/// 挂到群组下的活动要求创建者有群组内部访问权
async fn ensure_group_member(
    state: &AppState,
    auth: &AuthUser,
    group_uuid: Option<Uuid>,
) -> Result<(), AppError> {
    let Some(group_uuid) = group_uuid else {
        return Ok(());
    };

    let group = Group::get_active(&state.pool, group_uuid).await?;
    let membership = Membership::find_active(&state.pool, group.uuid, auth.user_id).await?;
    if !policy::has_group_access(auth, GroupAccess::new(&group, membership.as_ref())) {
        return Err(AppError::Forbidden(
            "only group members can create activities in a group",
        ));
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: Option<f64>,
    pub exclude_uuid: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct TagsRequest {
    pub tags: Vec<String>,
}

#[axum::debug_handler]
pub async fn create_individual(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<CreateActivityRequest>,
) -> Result<impl IntoResponse, AppError> {
    ensure_group_member(&state, &auth, req.group_uuid).await?;

    let activity =
        Activity::create(&state.pool, req, ActivityFormat::Individual, &auth).await?;

    Ok((StatusCode::CREATED, success_to_api_response(activity)))
}

#[axum::debug_handler]
pub async fn create_group_activity(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<CreateActivityRequest>,
) -> Result<impl IntoResponse, AppError> {
    ensure_group_member(&state, &auth, req.group_uuid).await?;

    let activity = Activity::create(&state.pool, req, ActivityFormat::Group, &auth).await?;

    Ok((StatusCode::CREATED, success_to_api_response(activity)))
}

#[axum::debug_handler]
pub async fn get_activity(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let activity = Activity::get_active(&state.pool, uuid).await?;

    let group_access = activity.group_access(&state.pool, &auth).await?;
    policy::ensure_can_view_activity(
        &auth,
        &activity,
        group_access
            .as_ref()
            .map(|(g, m)| GroupAccess::new(g, m.as_ref())),
    )?;

    Ok(success_to_api_response(activity))
}

#[axum::debug_handler]
pub async fn update_activity(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
    Json(req): Json<UpdateActivityRequest>,
) -> Result<impl IntoResponse, AppError> {
    let activity = Activity::get_active(&state.pool, uuid).await?;
    policy::ensure_can_edit_activity(&auth, &activity)?;

    let updated = activity.update(&state.pool, req).await?;

    Ok(success_to_api_response(updated))
}

#[axum::debug_handler]
pub async fn delete_activity(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let activity = Activity::get_active(&state.pool, uuid).await?;
    policy::ensure_can_edit_activity(&auth, &activity)?;

    activity.soft_delete(&state.pool).await?;

    Ok(success_to_api_response(serde_json::json!({ "deleted": true })))
}

/// 整体替换活动标签
#[axum::debug_handler]
pub async fn replace_tags(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
    Json(req): Json<TagsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let activity = Activity::get_active(&state.pool, uuid).await?;
    policy::ensure_can_edit_activity(&auth, &activity)?;

    let tags = activity.replace_tags(&state.pool, &req.tags).await?;

    Ok(success_to_api_response(tags))
}

#[axum::debug_handler]
pub async fn get_address(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let activity = Activity::get_active(&state.pool, uuid).await?;

    let group_access = activity.group_access(&state.pool, &auth).await?;
    policy::ensure_can_view_activity(
        &auth,
        &activity,
        group_access
            .as_ref()
            .map(|(g, m)| GroupAccess::new(g, m.as_ref())),
    )?;

    let address = activity
        .address(&state.pool)
        .await?
        .ok_or(AppError::NotFound("activity has no address"))?;

    Ok(success_to_api_response(address))
}

/// 创建地址并挂到活动上，地址归创建它的用户所有
#[axum::debug_handler]
pub async fn set_address(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
    Json(req): Json<CreateAddressRequest>,
) -> Result<impl IntoResponse, AppError> {
    let activity = Activity::get_active(&state.pool, uuid).await?;
    policy::ensure_can_edit_activity(&auth, &activity)?;

    let address = Address::create(&state.pool, &req, auth.user_id).await?;
    activity.set_address(&state.pool, address.uuid).await?;

    Ok((StatusCode::CREATED, success_to_api_response(address)))
}

/// 用户即将参加的活动
#[axum::debug_handler]
pub async fn list_user_activities(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let activities = Activity::list_upcoming_for_user(&state.pool, auth.user_id).await?;

    Ok(success_to_api_response(activities))
}

/// 附近的公开活动
#[axum::debug_handler]
pub async fn find_nearby(
    State(state): State<AppState>,
    Query(query): Query<NearbyQuery>,
) -> Result<impl IntoResponse, AppError> {
    let radius = query
        .radius_km
        .unwrap_or(state.config.default_search_radius_km)
        .min(state.config.max_search_radius_km);

    let activities = Activity::find_nearby(
        &state.pool,
        query.latitude,
        query.longitude,
        radius,
        query.exclude_uuid,
    )
    .await?;

    Ok(success_to_api_response(activities))
}
