use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::{AppState, error::AppError, utils::verify_token};

/// 认证之后挂到请求扩展上的用户身份
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub is_superuser: bool,
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    let claims = verify_token(token, &state.config).map_err(|e| {
        tracing::debug!("token verification failed: {}", e);
        AppError::Unauthorized
    })?;

    request.extensions_mut().insert(AuthUser {
        user_id: claims.sub,
        is_superuser: claims.is_superuser,
    });

    Ok(next.run(request).await)
}
