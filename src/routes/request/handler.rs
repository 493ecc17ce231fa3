use axum::{
    Extension,
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::error::AppError;
use crate::middleware::AuthUser;
use crate::policy::{self, GroupAccess};
use crate::routes::activity::model::Activity;
use crate::utils::success_to_api_response;

use super::model::{AttendeeInfo, JoinActivityRequest, JoinOutcome, JoinRequest, ReviewDecision};

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub decision: ReviewDecision,
}

/// 报名活动；重复提交等价于退出
#[axum::debug_handler]
pub async fn join_activity(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
    Json(req): Json<JoinActivityRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = JoinRequest::join(&state.pool, uuid, &auth, req.message).await?;

    let status = match &outcome {
        JoinOutcome::Created { .. } => StatusCode::CREATED,
        JoinOutcome::Removed => StatusCode::OK,
    };

    Ok((status, success_to_api_response(outcome)))
}

/// 创建者看到全部活跃请求（含留言），其他有活动可见权的人只看到已批准的名单
#[axum::debug_handler]
pub async fn list_requests(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(uuid): Path<Uuid>,
) -> Result<Response, AppError> {
    let activity = Activity::get_active(&state.pool, uuid).await?;

    if activity.user_uuid == auth.user_id {
        let requests = JoinRequest::list_for_activity(&state.pool, uuid).await?;
        return Ok(success_to_api_response(requests).into_response());
    }

    let group_access = activity.group_access(&state.pool, &auth).await?;
    policy::ensure_can_view_activity(
        &auth,
        &activity,
        group_access
            .as_ref()
            .map(|(g, m)| GroupAccess::new(g, m.as_ref())),
    )?;

    let roster: Vec<AttendeeInfo> = JoinRequest::list_approved_for_activity(&state.pool, uuid)
        .await?
        .into_iter()
        .map(AttendeeInfo::from)
        .collect();

    Ok(success_to_api_response(roster).into_response())
}

/// 活动创建者批准或拒绝报名
#[axum::debug_handler]
pub async fn review_request(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path((activity_uuid, request_uuid)): Path<(Uuid, Uuid)>,
    Json(req): Json<ReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    let request =
        JoinRequest::review(&state.pool, activity_uuid, request_uuid, &auth, req.decision).await?;

    Ok(success_to_api_response(request))
}
