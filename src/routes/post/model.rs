use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::AuthUser;
use crate::policy::{GroupAccess, PostAccess};
use crate::routes::activity::model::Activity;
use crate::routes::group::model::{Group, Membership};
use crate::routes::request::model::JoinRequest;

/// 帖子，挂在群组或活动下（两者互斥），也可以都不挂
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub uuid: Uuid,
    pub body: String,
    pub user_uuid: Uuid,
    pub group_uuid: Option<Uuid>,
    pub activity_uuid: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub uuid: Uuid,
    pub body: Option<String>,
    pub user_uuid: Option<Uuid>,
    pub post_uuid: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub is_deleted: bool,
}

#[derive(Debug, Deserialize, validator::Validate)]
pub struct CreatePostRequest {
    #[validate(length(min = 1, max = 5000))]
    pub body: String,
}

#[derive(Debug, Deserialize, validator::Validate)]
pub struct CreateCommentRequest {
    #[validate(length(min = 1, max = 2000))]
    pub body: String,
}

/// 帖子及其策略判定所需的全部关联实体
///
/// 一次性加载，之后借引用构建 `PostAccess` 交给策略引擎
pub struct LoadedPost {
    pub post: Post,
    pub group: Option<Group>,
    pub membership: Option<Membership>,
    pub activity: Option<Activity>,
    pub activity_group: Option<Group>,
    pub activity_membership: Option<Membership>,
    pub request: Option<JoinRequest>,
}

impl LoadedPost {
    pub fn access(&self) -> PostAccess<'_> {
        PostAccess {
            group: self
                .group
                .as_ref()
                .map(|g| GroupAccess::new(g, self.membership.as_ref())),
            activity: self.activity.as_ref(),
            activity_group: self
                .activity_group
                .as_ref()
                .map(|g| GroupAccess::new(g, self.activity_membership.as_ref())),
            request_status: self.request.as_ref().map(|r| r.status),
        }
    }
}

const POST_COLUMNS: &str = "uuid, body, user_uuid, group_uuid, activity_uuid, \
     created_at, updated_at, is_deleted";

const COMMENT_COLUMNS: &str = "uuid, body, user_uuid, post_uuid, created_at, updated_at, is_deleted";

impl Post {
    pub async fn create_in_group(
        pool: &PgPool,
        group_uuid: Uuid,
        author: &AuthUser,
        body: &str,
    ) -> Result<Self, AppError> {
        let query = format!(
            "INSERT INTO posts (uuid, body, user_uuid, group_uuid) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {POST_COLUMNS}"
        );
        let post = sqlx::query_as::<_, Post>(&query)
            .bind(Uuid::new_v4())
            .bind(body)
            .bind(author.user_id)
            .bind(group_uuid)
            .fetch_one(pool)
            .await?;

        Ok(post)
    }

    pub async fn create_in_activity(
        pool: &PgPool,
        activity_uuid: Uuid,
        author: &AuthUser,
        body: &str,
    ) -> Result<Self, AppError> {
        let query = format!(
            "INSERT INTO posts (uuid, body, user_uuid, activity_uuid) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {POST_COLUMNS}"
        );
        let post = sqlx::query_as::<_, Post>(&query)
            .bind(Uuid::new_v4())
            .bind(body)
            .bind(author.user_id)
            .bind(activity_uuid)
            .fetch_one(pool)
            .await?;

        Ok(post)
    }

    pub async fn find_active<'e, E: PgExecutor<'e>>(
        db: E,
        uuid: Uuid,
    ) -> Result<Option<Self>, AppError> {
        let query = format!("SELECT {POST_COLUMNS} FROM posts WHERE uuid = $1 AND NOT is_deleted");
        let post = sqlx::query_as::<_, Post>(&query)
            .bind(uuid)
            .fetch_optional(db)
            .await?;

        Ok(post)
    }

    /// 加载帖子和策略判定需要的周边关系
    pub async fn load(pool: &PgPool, uuid: Uuid, user: &AuthUser) -> Result<LoadedPost, AppError> {
        let post = Self::find_active(pool, uuid)
            .await?
            .ok_or(AppError::NotFound("post not found"))?;

        let mut loaded = LoadedPost {
            post,
            group: None,
            membership: None,
            activity: None,
            activity_group: None,
            activity_membership: None,
            request: None,
        };

        if let Some(group_uuid) = loaded.post.group_uuid {
            loaded.group = Group::find_active(pool, group_uuid).await?;
            if let Some(group) = &loaded.group {
                loaded.membership =
                    Membership::find_active(pool, group.uuid, user.user_id).await?;
            }
        }

        if let Some(activity_uuid) = loaded.post.activity_uuid {
            loaded.activity = Activity::find_active(pool, activity_uuid).await?;
            if let Some(activity) = &loaded.activity {
                loaded.request =
                    JoinRequest::find_active(pool, activity.uuid, user.user_id).await?;

                if let Some(group_uuid) = activity.group_uuid {
                    loaded.activity_group = Group::find_active(pool, group_uuid).await?;
                    if let Some(group) = &loaded.activity_group {
                        loaded.activity_membership =
                            Membership::find_active(pool, group.uuid, user.user_id).await?;
                    }
                }
            }
        }

        Ok(loaded)
    }

    pub async fn list_for_group(pool: &PgPool, group_uuid: Uuid) -> Result<Vec<Self>, AppError> {
        let query = format!(
            "SELECT {POST_COLUMNS} FROM posts \
             WHERE group_uuid = $1 AND NOT is_deleted \
             ORDER BY created_at DESC"
        );
        let posts = sqlx::query_as::<_, Post>(&query)
            .bind(group_uuid)
            .fetch_all(pool)
            .await?;

        Ok(posts)
    }

    pub async fn list_for_activity(
        pool: &PgPool,
        activity_uuid: Uuid,
    ) -> Result<Vec<Self>, AppError> {
        let query = format!(
            "SELECT {POST_COLUMNS} FROM posts \
             WHERE activity_uuid = $1 AND NOT is_deleted \
             ORDER BY created_at DESC"
        );
        let posts = sqlx::query_as::<_, Post>(&query)
            .bind(activity_uuid)
            .fetch_all(pool)
            .await?;

        Ok(posts)
    }

    pub async fn soft_delete(&self, pool: &PgPool) -> Result<(), AppError> {
        sqlx::query("UPDATE posts SET is_deleted = TRUE, updated_at = NOW() WHERE uuid = $1")
            .bind(self.uuid)
            .execute(pool)
            .await?;

        Ok(())
    }
}

impl Comment {
    pub async fn create(
        pool: &PgPool,
        post_uuid: Uuid,
        author: &AuthUser,
        body: &str,
    ) -> Result<Self, AppError> {
        let query = format!(
            "INSERT INTO comments (uuid, body, user_uuid, post_uuid) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COMMENT_COLUMNS}"
        );
        let comment = sqlx::query_as::<_, Comment>(&query)
            .bind(Uuid::new_v4())
            .bind(body)
            .bind(author.user_id)
            .bind(post_uuid)
            .fetch_one(pool)
            .await?;

        Ok(comment)
    }

    pub async fn find_active(pool: &PgPool, uuid: Uuid) -> Result<Option<Self>, AppError> {
        let query =
            format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE uuid = $1 AND NOT is_deleted");
        let comment = sqlx::query_as::<_, Comment>(&query)
            .bind(uuid)
            .fetch_optional(pool)
            .await?;

        Ok(comment)
    }

    pub async fn list_for_post(pool: &PgPool, post_uuid: Uuid) -> Result<Vec<Self>, AppError> {
        let query = format!(
            "SELECT {COMMENT_COLUMNS} FROM comments \
             WHERE post_uuid = $1 AND NOT is_deleted \
             ORDER BY created_at"
        );
        let comments = sqlx::query_as::<_, Comment>(&query)
            .bind(post_uuid)
            .fetch_all(pool)
            .await?;

        Ok(comments)
    }

    pub async fn soft_delete(&self, pool: &PgPool) -> Result<(), AppError> {
        sqlx::query("UPDATE comments SET is_deleted = TRUE, updated_at = NOW() WHERE uuid = $1")
            .bind(self.uuid)
            .execute(pool)
            .await?;

        Ok(())
    }
}
