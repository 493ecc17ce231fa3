use axum::{
    Extension,
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::error::AppError;
use crate::middleware::AuthUser;
use crate::policy::{self, GroupAccess};
use crate::routes::activity::model::Activity;
use crate::utils::success_to_api_response;

use super::model::{
    AddMembershipRequest, CreateGroupRequest, Group, Membership, UpdateGroupRequest,
    UpdateMembershipRequest,
};

#[axum::debug_handler]
pub async fn create_group(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let group = Group::create(&state.pool, req, &auth).await?;

    Ok((StatusCode::CREATED, success_to_api_response(group)))
}

/// 用户拥有或已加入的群组
#[axum::debug_handler]
pub async fn list_user_groups(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let groups = Group::list_for_user(&state.pool, auth.user_id).await?;

    Ok(success_to_api_response(groups))
}

#[axum::debug_handler]
pub async fn get_group(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let group = Group::get_active(&state.pool, uuid).await?;
    let membership = Membership::find_active(&state.pool, group.uuid, auth.user_id).await?;
    policy::ensure_can_view_group(&auth, GroupAccess::new(&group, membership.as_ref()))?;

    Ok(success_to_api_response(group))
}

#[axum::debug_handler]
pub async fn update_group(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
    Json(req): Json<UpdateGroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let group = Group::get_active(&state.pool, uuid).await?;
    let membership = Membership::find_active(&state.pool, group.uuid, auth.user_id).await?;
    policy::ensure_can_edit_group(&auth, GroupAccess::new(&group, membership.as_ref()))?;

    let updated = group.update(&state.pool, req).await?;

    Ok(success_to_api_response(updated))
}

/// 删群比编辑更严格，只有群主能删
#[axum::debug_handler]
pub async fn delete_group(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let group = Group::get_active(&state.pool, uuid).await?;
    if group.user_uuid != Some(auth.user_id) {
        return Err(AppError::Forbidden("only the group owner can delete it"));
    }

    group.soft_delete(&state.pool).await?;

    Ok(success_to_api_response(serde_json::json!({ "deleted": true })))
}

#[axum::debug_handler]
pub async fn list_memberships(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let group = Group::get_active(&state.pool, uuid).await?;
    let membership = Membership::find_active(&state.pool, group.uuid, auth.user_id).await?;
    policy::ensure_can_view_group(&auth, GroupAccess::new(&group, membership.as_ref()))?;

    let memberships = Membership::list_for_group(&state.pool, uuid).await?;

    Ok(success_to_api_response(memberships))
}

/// 把用户拉进群，要求群组可见权；已有活跃成员行时直接返回它
#[axum::debug_handler]
pub async fn add_membership(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
    Json(req): Json<AddMembershipRequest>,
) -> Result<impl IntoResponse, AppError> {
    let group = Group::get_active(&state.pool, uuid).await?;
    let membership = Membership::find_active(&state.pool, group.uuid, auth.user_id).await?;
    policy::ensure_can_view_group(&auth, GroupAccess::new(&group, membership.as_ref()))?;

    let result = Membership::add(&state.pool, &group, &req).await?;

    let status = if result.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, success_to_api_response(result)))
}

#[axum::debug_handler]
pub async fn get_membership(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let membership = Membership::find_active_by_uuid(&state.pool, uuid)
        .await?
        .ok_or(AppError::NotFound("membership not found"))?;

    let group = Group::get_active(&state.pool, membership.group_uuid).await?;
    let own = Membership::find_active(&state.pool, group.uuid, auth.user_id).await?;

    // 成员本人也能看自己的成员行
    if membership.user_uuid != auth.user_id {
        policy::ensure_can_view_group(&auth, GroupAccess::new(&group, own.as_ref()))?;
    }

    Ok(success_to_api_response(membership))
}

/// 管理员改成员状态或角色（批准申请、提升管理员等）
#[axum::debug_handler]
pub async fn update_membership(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
    Json(req): Json<UpdateMembershipRequest>,
) -> Result<impl IntoResponse, AppError> {
    let membership = Membership::find_active_by_uuid(&state.pool, uuid)
        .await?
        .ok_or(AppError::NotFound("membership not found"))?;

    let group = Group::get_active(&state.pool, membership.group_uuid).await?;
    let own = Membership::find_active(&state.pool, group.uuid, auth.user_id).await?;
    policy::ensure_can_edit_group(&auth, GroupAccess::new(&group, own.as_ref()))?;

    let updated = membership.update(&state.pool, &req).await?;

    Ok(success_to_api_response(updated))
}

/// 管理员移除成员，或成员自己退出
#[axum::debug_handler]
pub async fn delete_membership(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let membership = Membership::find_active_by_uuid(&state.pool, uuid)
        .await?
        .ok_or(AppError::NotFound("membership not found"))?;

    if membership.user_uuid != auth.user_id {
        let group = Group::get_active(&state.pool, membership.group_uuid).await?;
        let own = Membership::find_active(&state.pool, group.uuid, auth.user_id).await?;
        policy::ensure_can_edit_group(&auth, GroupAccess::new(&group, own.as_ref()))?;
    }

    membership.soft_delete(&state.pool).await?;

    Ok(success_to_api_response(serde_json::json!({ "deleted": true })))
}

/// 用户自己的成员关系（已批准的）
#[axum::debug_handler]
pub async fn list_user_memberships(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let memberships = Membership::list_approved_for_user(&state.pool, auth.user_id).await?;

    Ok(success_to_api_response(memberships))
}

/// 群组内的活动，对有群组访问权的人开放
#[axum::debug_handler]
pub async fn list_group_activities(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let group = Group::get_active(&state.pool, uuid).await?;
    let membership = Membership::find_active(&state.pool, group.uuid, auth.user_id).await?;
    policy::ensure_can_view_group(&auth, GroupAccess::new(&group, membership.as_ref()))?;

    let activities = Activity::list_for_group(&state.pool, uuid).await?;

    Ok(success_to_api_response(activities))
}
