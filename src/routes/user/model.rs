use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::utils::hash_password;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub uuid: Uuid,
    pub email: String,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_superuser: bool,
    pub address_uuid: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub is_deleted: bool,
}

/// 对外展示的用户信息，不带敏感字段
#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub uuid: Uuid,
    pub email: String,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: String,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        Self {
            uuid: user.uuid,
            email: user.email,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
        }
    }
}

#[derive(Debug, Deserialize, validator::Validate)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(length(min = 1, max = 30))]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserInfo,
    pub token: String,
    pub expires_at: i64,
}

#[derive(Debug, Deserialize, validator::Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 30))]
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

const USER_COLUMNS: &str = "uuid, email, username, first_name, last_name, password_hash, \
     is_superuser, address_uuid, created_at, updated_at, is_deleted";

impl User {
    pub async fn create(pool: &PgPool, req: RegisterRequest) -> Result<Self, AppError> {
        let password_hash = hash_password(&req.password)
            .map_err(|e| AppError::Validation(format!("failed to hash password: {}", e)))?;

        let query = format!(
            "INSERT INTO users (uuid, email, username, first_name, last_name, password_hash) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&query)
            .bind(Uuid::new_v4())
            .bind(&req.email)
            .bind(&req.username)
            .bind(&req.first_name)
            .bind(&req.last_name)
            .bind(&password_hash)
            .fetch_one(pool)
            .await?;

        Ok(user)
    }

    pub async fn find_active_by_uuid(pool: &PgPool, uuid: Uuid) -> Result<Option<Self>, AppError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE uuid = $1 AND NOT is_deleted");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(uuid)
            .fetch_optional(pool)
            .await?;

        Ok(user)
    }

    pub async fn find_active_by_email(
        pool: &PgPool,
        email: &str,
    ) -> Result<Option<Self>, AppError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND NOT is_deleted");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(email)
            .fetch_optional(pool)
            .await?;

        Ok(user)
    }

    pub async fn find_active_by_username(
        pool: &PgPool,
        username: &str,
    ) -> Result<Option<Self>, AppError> {
        let query =
            format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1 AND NOT is_deleted");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(username)
            .fetch_optional(pool)
            .await?;

        Ok(user)
    }

    /// 按 uuid / email / username 依次解析目标用户，先到先得
    ///
    /// 一个标识都没给是参数错误，给了但找不到是 404
    pub async fn resolve(
        pool: &PgPool,
        uuid: Option<Uuid>,
        email: Option<&str>,
        username: Option<&str>,
    ) -> Result<Self, AppError> {
        let user = if let Some(uuid) = uuid {
            Self::find_active_by_uuid(pool, uuid).await?
        } else if let Some(email) = email {
            Self::find_active_by_email(pool, email).await?
        } else if let Some(username) = username {
            Self::find_active_by_username(pool, username).await?
        } else {
            return Err(AppError::Validation(
                "specify user_uuid, user_email or user_username".into(),
            ));
        };

        user.ok_or(AppError::NotFound("user not found"))
    }

    pub async fn update_profile(
        &self,
        pool: &PgPool,
        req: &UpdateProfileRequest,
    ) -> Result<Self, AppError> {
        let query = format!(
            "UPDATE users SET \
                username = COALESCE($2, username), \
                first_name = COALESCE($3, first_name), \
                last_name = COALESCE($4, last_name), \
                updated_at = NOW() \
             WHERE uuid = $1 AND NOT is_deleted \
             RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&query)
            .bind(self.uuid)
            .bind(&req.username)
            .bind(&req.first_name)
            .bind(&req.last_name)
            .fetch_one(pool)
            .await?;

        Ok(user)
    }

    pub async fn set_address(&self, pool: &PgPool, address_uuid: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET address_uuid = $2, updated_at = NOW() WHERE uuid = $1")
            .bind(self.uuid)
            .bind(address_uuid)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// 整体替换用户关注的标签
    pub async fn replace_tags(&self, pool: &PgPool, tag_uuids: &[Uuid]) -> Result<(), AppError> {
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM user_tags WHERE user_uuid = $1")
            .bind(self.uuid)
            .execute(&mut *tx)
            .await?;

        for tag_uuid in tag_uuids {
            sqlx::query(
                "INSERT INTO user_tags (user_uuid, tag_uuid) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(self.uuid)
            .bind(tag_uuid)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }
}
