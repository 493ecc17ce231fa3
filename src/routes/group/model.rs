use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::common::{MembershipType, RequestStatus};
use crate::error::AppError;
use crate::middleware::AuthUser;
use crate::routes::user::model::User;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Group {
    pub uuid: Uuid,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "public")]
    pub is_public: bool,
    pub needs_approval: bool,
    pub user_uuid: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Membership {
    pub uuid: Uuid,
    pub group_uuid: Uuid,
    pub user_uuid: Uuid,
    pub status: RequestStatus,
    pub membership_type: MembershipType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub is_deleted: bool,
}

#[derive(Debug, Deserialize, validator::Validate)]
pub struct CreateGroupRequest {
    #[validate(length(min = 1, max = 100))]
    pub title: String,
    pub description: Option<String>,
    #[serde(default = "default_true", rename = "public")]
    pub is_public: bool,
    #[serde(default)]
    pub needs_approval: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, validator::Validate)]
pub struct UpdateGroupRequest {
    #[validate(length(min = 1, max = 100))]
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "public")]
    pub is_public: Option<bool>,
    pub needs_approval: Option<bool>,
}

/// 添加成员时的目标用户定位方式，按 uuid / email / username 先到先得
#[derive(Debug, Deserialize)]
pub struct AddMembershipRequest {
    pub user_uuid: Option<Uuid>,
    pub user_email: Option<String>,
    pub user_username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMembershipRequest {
    pub status: Option<RequestStatus>,
    pub membership_type: Option<MembershipType>,
}

#[derive(Debug, Serialize)]
pub struct MembershipCreated {
    pub membership: Membership,
    pub created: bool,
}

const GROUP_COLUMNS: &str = "uuid, title, description, is_public, needs_approval, user_uuid, \
     created_at, updated_at, is_deleted";

const MEMBERSHIP_COLUMNS: &str = "uuid, group_uuid, user_uuid, status, membership_type, \
     created_at, updated_at, is_deleted";

impl Group {
    /// 建群并在同一事务里给群主写入已批准的管理员成员关系
    pub async fn create(
        pool: &PgPool,
        req: CreateGroupRequest,
        owner: &AuthUser,
    ) -> Result<Self, AppError> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO groups (uuid, title, description, is_public, needs_approval, user_uuid) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {GROUP_COLUMNS}"
        );
        let group = sqlx::query_as::<_, Group>(&query)
            .bind(Uuid::new_v4())
            .bind(&req.title)
            .bind(&req.description)
            .bind(req.is_public)
            .bind(req.needs_approval)
            .bind(owner.user_id)
            .fetch_one(&mut *tx)
            .await?;

        let query = format!(
            "INSERT INTO memberships (uuid, group_uuid, user_uuid, status, membership_type) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {MEMBERSHIP_COLUMNS}"
        );
        sqlx::query_as::<_, Membership>(&query)
            .bind(Uuid::new_v4())
            .bind(group.uuid)
            .bind(owner.user_id)
            .bind(RequestStatus::Approved)
            .bind(MembershipType::Admin)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(group)
    }

    pub async fn find_active<'e, E: PgExecutor<'e>>(
        db: E,
        uuid: Uuid,
    ) -> Result<Option<Self>, AppError> {
        let query = format!("SELECT {GROUP_COLUMNS} FROM groups WHERE uuid = $1 AND NOT is_deleted");
        let group = sqlx::query_as::<_, Group>(&query)
            .bind(uuid)
            .fetch_optional(db)
            .await?;

        Ok(group)
    }

    pub async fn get_active<'e, E: PgExecutor<'e>>(db: E, uuid: Uuid) -> Result<Self, AppError> {
        Self::find_active(db, uuid)
            .await?
            .ok_or(AppError::NotFound("group not found"))
    }

    pub async fn update(&self, pool: &PgPool, req: UpdateGroupRequest) -> Result<Self, AppError> {
        let query = format!(
            "UPDATE groups SET \
                title = COALESCE($2, title), \
                description = COALESCE($3, description), \
                is_public = COALESCE($4, is_public), \
                needs_approval = COALESCE($5, needs_approval), \
                updated_at = NOW() \
             WHERE uuid = $1 AND NOT is_deleted \
             RETURNING {GROUP_COLUMNS}"
        );
        let group = sqlx::query_as::<_, Group>(&query)
            .bind(self.uuid)
            .bind(&req.title)
            .bind(&req.description)
            .bind(req.is_public)
            .bind(req.needs_approval)
            .fetch_one(pool)
            .await?;

        Ok(group)
    }

    pub async fn soft_delete(&self, pool: &PgPool) -> Result<(), AppError> {
        sqlx::query("UPDATE groups SET is_deleted = TRUE, updated_at = NOW() WHERE uuid = $1")
            .bind(self.uuid)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// 用户拥有的和已批准加入的群组
    pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, AppError> {
        let query = format!(
            "SELECT DISTINCT {columns} FROM groups g \
             LEFT JOIN memberships m ON m.group_uuid = g.uuid AND NOT m.is_deleted \
             WHERE NOT g.is_deleted \
               AND (g.user_uuid = $1 OR (m.user_uuid = $1 AND m.status = $2)) \
             ORDER BY g.created_at DESC",
            columns = "g.uuid, g.title, g.description, g.is_public, g.needs_approval, \
                       g.user_uuid, g.created_at, g.updated_at, g.is_deleted"
        );
        let groups = sqlx::query_as::<_, Group>(&query)
            .bind(user_id)
            .bind(RequestStatus::Approved)
            .fetch_all(pool)
            .await?;

        Ok(groups)
    }
}

impl Membership {
    pub async fn find_active<'e, E: PgExecutor<'e>>(
        db: E,
        group_uuid: Uuid,
        user_uuid: Uuid,
    ) -> Result<Option<Self>, AppError> {
        let query = format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships \
             WHERE group_uuid = $1 AND user_uuid = $2 AND NOT is_deleted"
        );
        let membership = sqlx::query_as::<_, Membership>(&query)
            .bind(group_uuid)
            .bind(user_uuid)
            .fetch_optional(db)
            .await?;

        Ok(membership)
    }

    pub async fn find_active_by_uuid(pool: &PgPool, uuid: Uuid) -> Result<Option<Self>, AppError> {
        let query =
            format!("SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE uuid = $1 AND NOT is_deleted");
        let membership = sqlx::query_as::<_, Membership>(&query)
            .bind(uuid)
            .fetch_optional(pool)
            .await?;

        Ok(membership)
    }

    pub async fn list_for_group(pool: &PgPool, group_uuid: Uuid) -> Result<Vec<Self>, AppError> {
        let query = format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships \
             WHERE group_uuid = $1 AND NOT is_deleted \
             ORDER BY created_at"
        );
        let memberships = sqlx::query_as::<_, Membership>(&query)
            .bind(group_uuid)
            .fetch_all(pool)
            .await?;

        Ok(memberships)
    }

    /// 用户的全部已批准成员关系
    pub async fn list_approved_for_user(
        pool: &PgPool,
        user_id: Uuid,
    ) -> Result<Vec<Self>, AppError> {
        let query = format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships \
             WHERE user_uuid = $1 AND status = $2 AND NOT is_deleted \
             ORDER BY created_at"
        );
        let memberships = sqlx::query_as::<_, Membership>(&query)
            .bind(user_id)
            .bind(RequestStatus::Approved)
            .fetch_all(pool)
            .await?;

        Ok(memberships)
    }

    /// 幂等的 get-or-create
    ///
    /// 插入直接对活跃行唯一索引做冲突让位，再由 `resolve_add` 收敛结果，
    /// 并发的重复 add 不会以数据库错误冒出来。
    pub async fn add(
        pool: &PgPool,
        group: &Group,
        req: &AddMembershipRequest,
    ) -> Result<MembershipCreated, AppError> {
        let target = User::resolve(
            pool,
            req.user_uuid,
            req.user_email.as_deref(),
            req.user_username.as_deref(),
        )
        .await?;

        let query = format!(
            "INSERT INTO memberships (uuid, group_uuid, user_uuid, status, membership_type) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (group_uuid, user_uuid) WHERE NOT is_deleted DO NOTHING \
             RETURNING {MEMBERSHIP_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, Membership>(&query)
            .bind(Uuid::new_v4())
            .bind(group.uuid)
            .bind(target.uuid)
            .bind(RequestStatus::Approved)
            .bind(MembershipType::Participant)
            .fetch_optional(pool)
            .await?;

        let existing = match &inserted {
            Some(_) => None,
            None => Self::find_active(pool, group.uuid, target.uuid).await?,
        };

        resolve_add(inserted, existing)
    }

    pub async fn update(
        &self,
        pool: &PgPool,
        req: &UpdateMembershipRequest,
    ) -> Result<Self, AppError> {
        let query = format!(
            "UPDATE memberships SET \
                status = COALESCE($2, status), \
                membership_type = COALESCE($3, membership_type), \
                updated_at = NOW() \
             WHERE uuid = $1 AND NOT is_deleted \
             RETURNING {MEMBERSHIP_COLUMNS}"
        );
        let membership = sqlx::query_as::<_, Membership>(&query)
            .bind(self.uuid)
            .bind(req.status)
            .bind(req.membership_type)
            .fetch_one(pool)
            .await?;

        Ok(membership)
    }

    pub async fn soft_delete(&self, pool: &PgPool) -> Result<(), AppError> {
        sqlx::query("UPDATE memberships SET is_deleted = TRUE, updated_at = NOW() WHERE uuid = $1")
            .bind(self.uuid)
            .execute(pool)
            .await?;

        Ok(())
    }
}

/// add 的纯收敛：插入成功即新建，冲突让位后用已有活跃行兜底
///
/// 两头都空意味着冲突的那行在让位和回查之间被删掉了，按不变量违例上报
pub fn resolve_add(
    inserted: Option<Membership>,
    existing: Option<Membership>,
) -> Result<MembershipCreated, AppError> {
    match (inserted, existing) {
        (Some(membership), _) => Ok(MembershipCreated {
            membership,
            created: true,
        }),
        (None, Some(membership)) => Ok(MembershipCreated {
            membership,
            created: false,
        }),
        (None, None) => Err(AppError::Invariant(
            "membership insert conflicted but no active row was found",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn membership(group_uuid: Uuid, user_uuid: Uuid) -> Membership {
        Membership {
            uuid: Uuid::new_v4(),
            group_uuid,
            user_uuid,
            status: RequestStatus::Approved,
            membership_type: MembershipType::Participant,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            is_deleted: false,
        }
    }

    #[test]
    fn fresh_insert_reports_created() {
        let m = membership(Uuid::new_v4(), Uuid::new_v4());
        let result = resolve_add(Some(m.clone()), None).unwrap();

        assert!(result.created);
        assert_eq!(result.membership.uuid, m.uuid);
    }

    #[test]
    fn duplicate_add_returns_the_existing_row_uncreated() {
        // 冲突让位后插入不返回行，回查到的原行原样返回
        let existing = membership(Uuid::new_v4(), Uuid::new_v4());
        let result = resolve_add(None, Some(existing.clone())).unwrap();

        assert!(!result.created);
        assert_eq!(result.membership.uuid, existing.uuid);
    }

    #[test]
    fn conflict_without_an_active_row_is_an_invariant_violation() {
        assert_matches!(resolve_add(None, None), Err(AppError::Invariant(_)));
    }
}
