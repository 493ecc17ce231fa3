use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::utils::error_codes;

/// 全局错误类型
///
/// 策略判定和工作流函数都同步快速失败；
/// 多步写入在一个事务里执行，出错整体回滚。
#[derive(Debug, Error)]
pub enum AppError {
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("capacity exceeded: activity is full")]
    CapacityExceeded,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    // 预期之外的状态，比如切换路径之外出现重复的活跃请求
    #[error("invariant violated: {0}")]
    Invariant(&'static str),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: i32,
    msg: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, error_codes::PERMISSION_DENIED),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, error_codes::NOT_FOUND),
            AppError::CapacityExceeded => (StatusCode::CONFLICT, error_codes::CAPACITY_EXCEEDED),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, error_codes::VALIDATION_ERROR),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, error_codes::AUTH_FAILED),
            AppError::Invariant(_) => {
                tracing::error!("invariant violation: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_codes::INTERNAL_ERROR,
                )
            }
            AppError::Database(e) => {
                tracing::error!("database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_codes::INTERNAL_ERROR,
                )
            }
        };

        let msg = match &self {
            // 内部细节不往外暴露
            AppError::Invariant(_) | AppError::Database(_) => "internal server error".to_string(),
            other => other.to_string(),
        };

        (status, Json(ErrorBody { code, msg })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_expected_codes() {
        let cases = [
            (
                AppError::Forbidden("nope").into_response().status(),
                StatusCode::FORBIDDEN,
            ),
            (
                AppError::NotFound("activity").into_response().status(),
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::CapacityExceeded.into_response().status(),
                StatusCode::CONFLICT,
            ),
            (
                AppError::Validation("bad".into()).into_response().status(),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::Unauthorized.into_response().status(),
                StatusCode::UNAUTHORIZED,
            ),
        ];

        for (got, want) in cases {
            assert_eq!(got, want);
        }
    }
}
