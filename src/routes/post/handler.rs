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
use crate::routes::group::model::{Group, Membership};
use crate::utils::success_to_api_response;

use super::model::{Comment, CreateCommentRequest, CreatePostRequest, Post};

/// 在群组里发帖，要求群组内部访问权（群主或已批准成员）
#[axum::debug_handler]
pub async fn create_group_post(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let group = Group::get_active(&state.pool, uuid).await?;
    let membership = Membership::find_active(&state.pool, group.uuid, auth.user_id).await?;
    if !policy::has_group_access(&auth, GroupAccess::new(&group, membership.as_ref())) {
        return Err(AppError::Forbidden("only group members can post here"));
    }

    let post = Post::create_in_group(&state.pool, uuid, &auth, &req.body).await?;

    Ok((StatusCode::CREATED, success_to_api_response(post)))
}

/// 在活动下发帖，要求活动可见
#[axum::debug_handler]
pub async fn create_activity_post(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let activity = Activity::get_active(&state.pool, uuid).await?;
    let group_access = activity.group_access(&state.pool, &auth).await?;
    policy::ensure_can_view_activity(
        &auth,
        &activity,
        group_access
            .as_ref()
            .map(|(g, m)| GroupAccess::new(g, m.as_ref())),
    )?;

    let post = Post::create_in_activity(&state.pool, uuid, &auth, &req.body).await?;

    Ok((StatusCode::CREATED, success_to_api_response(post)))
}

#[axum::debug_handler]
pub async fn list_group_posts(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let group = Group::get_active(&state.pool, uuid).await?;
    let membership = Membership::find_active(&state.pool, group.uuid, auth.user_id).await?;
    if !policy::has_group_access(&auth, GroupAccess::new(&group, membership.as_ref())) {
        return Err(AppError::Forbidden("only group members can read posts here"));
    }

    let posts = Post::list_for_group(&state.pool, uuid).await?;

    Ok(success_to_api_response(posts))
}

#[axum::debug_handler]
pub async fn list_activity_posts(
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

    let posts = Post::list_for_activity(&state.pool, uuid).await?;

    Ok(success_to_api_response(posts))
}

#[axum::debug_handler]
pub async fn get_post(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let loaded = Post::load(&state.pool, uuid, &auth).await?;
    policy::ensure_can_view_post(&auth, &loaded.post, loaded.access())?;

    let comments = Comment::list_for_post(&state.pool, loaded.post.uuid).await?;

    Ok(success_to_api_response(serde_json::json!({
        "post": loaded.post,
        "comments": comments,
    })))
}

#[axum::debug_handler]
pub async fn delete_post(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let loaded = Post::load(&state.pool, uuid, &auth).await?;
    policy::ensure_can_delete_post(&auth, &loaded.post, loaded.access())?;

    loaded.post.soft_delete(&state.pool).await?;

    Ok(success_to_api_response(serde_json::json!({ "deleted": true })))
}

/// 评论挂在帖子下，能看到帖子就能评论
#[axum::debug_handler]
pub async fn create_comment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let loaded = Post::load(&state.pool, uuid, &auth).await?;
    policy::ensure_can_view_post(&auth, &loaded.post, loaded.access())?;

    let comment = Comment::create(&state.pool, loaded.post.uuid, &auth, &req.body).await?;

    Ok((StatusCode::CREATED, success_to_api_response(comment)))
}

/// 评论作者或对帖子有删除权的人可以删评论
#[axum::debug_handler]
pub async fn delete_comment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let comment = Comment::find_active(&state.pool, uuid)
        .await?
        .ok_or(AppError::NotFound("comment not found"))?;

    if comment.user_uuid != Some(auth.user_id) {
        let loaded = Post::load(&state.pool, comment.post_uuid, &auth).await?;
        // 帖子作者可以清理自己帖子下的评论
        if loaded.post.user_uuid != auth.user_id {
            policy::ensure_can_delete_post(&auth, &loaded.post, loaded.access())?;
        }
    }

    comment.soft_delete(&state.pool).await?;

    Ok(success_to_api_response(serde_json::json!({ "deleted": true })))
}
