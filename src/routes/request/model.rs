use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::common::RequestStatus;
use crate::error::AppError;
use crate::middleware::AuthUser;
use crate::policy::{self, GroupAccess};
use crate::routes::activity::model::Activity;
use crate::routes::group::model::{Group, Membership};

/// 用户对活动的报名请求
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JoinRequest {
    pub uuid: Uuid,
    pub activity_uuid: Uuid,
    pub user_uuid: Uuid,
    pub status: RequestStatus,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub is_deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct JoinActivityRequest {
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approve,
    Deny,
}

/// 参加者名单条目；报名留言只对活动创建者可见，这里不带
#[derive(Debug, Serialize)]
pub struct AttendeeInfo {
    pub uuid: Uuid,
    pub user_uuid: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<JoinRequest> for AttendeeInfo {
    fn from(request: JoinRequest) -> Self {
        Self {
            uuid: request.uuid,
            user_uuid: request.user_uuid,
            created_at: request.created_at,
        }
    }
}

/// Join 的结果：新建了请求，或者把已有请求当作退出做了软删除
#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum JoinOutcome {
    Created { request: JoinRequest },
    Removed,
}

/// Join 的纯决策：重复提交切换为退出，否则过容量闸门后定默认状态
///
/// 把决策从持久化里拆出来，容量语义可以脱离数据库单测
#[derive(Debug, PartialEq)]
pub enum JoinDecision {
    /// 已有活跃请求，软删除它（等价于退出/取消）
    Toggle,
    /// 容量已满，拒绝
    Reject,
    /// 新建请求，带默认状态
    Create(RequestStatus),
}

pub fn decide_join(
    activity: &Activity,
    existing: Option<&JoinRequest>,
    approved_count: i64,
) -> Result<JoinDecision, AppError> {
    if existing.is_some() {
        return Ok(JoinDecision::Toggle);
    }

    if approved_count >= activity.capacity()? {
        return Ok(JoinDecision::Reject);
    }

    let status = if activity.needs_approval {
        RequestStatus::Pending
    } else {
        RequestStatus::Approved
    };

    Ok(JoinDecision::Create(status))
}

/// 审批的纯决策：approve 受容量闸门约束，deny 不受
///
/// approved/denied 都不是终态，活动创建者可以来回改判（设计取舍，见 DESIGN.md）
pub fn decide_review(
    decision: &ReviewDecision,
    request: &JoinRequest,
    activity: &Activity,
    approved_count_excluding_request: i64,
) -> Result<RequestStatus, AppError> {
    match decision {
        ReviewDecision::Deny => Ok(RequestStatus::Denied),
        ReviewDecision::Approve => {
            if request.status == RequestStatus::Approved {
                // 重复批准是幂等的
                return Ok(RequestStatus::Approved);
            }
            if approved_count_excluding_request >= activity.capacity()? {
                return Err(AppError::CapacityExceeded);
            }
            Ok(RequestStatus::Approved)
        }
    }
}

const REQUEST_COLUMNS: &str = "uuid, activity_uuid, user_uuid, status, message, \
     created_at, updated_at, is_deleted";

impl JoinRequest {
    /// 报名 / 取消报名
    ///
    /// 容量检查和写入在同一个事务里，并对活动行加锁，
    /// 并发报名不会把已批准人数挤过上限。
    pub async fn join(
        pool: &PgPool,
        activity_uuid: Uuid,
        user: &AuthUser,
        message: Option<String>,
    ) -> Result<JoinOutcome, AppError> {
        let mut tx = pool.begin().await?;

        let activity = Activity::lock_active(&mut tx, activity_uuid)
            .await?
            .ok_or(AppError::NotFound("activity not found"))?;

        if activity.user_uuid == user.user_id {
            return Err(AppError::Validation(
                "the activity owner cannot join their own activity".into(),
            ));
        }

        // 不可见的活动也不能报名
        let group_access = Self::load_group_access(&mut tx, &activity, user).await?;
        policy::ensure_can_view_activity(
            user,
            &activity,
            group_access
                .as_ref()
                .map(|(g, m)| GroupAccess::new(g, m.as_ref())),
        )?;

        let existing = Self::find_active(&mut *tx, activity.uuid, user.user_id).await?;
        let approved = Self::count_approved(&mut *tx, activity.uuid).await?;

        match decide_join(&activity, existing.as_ref(), approved)? {
            JoinDecision::Toggle => {
                let existing = existing.ok_or(AppError::Invariant(
                    "toggle decision without an existing request",
                ))?;
                sqlx::query(
                    "UPDATE requests SET is_deleted = TRUE, updated_at = NOW() WHERE uuid = $1",
                )
                .bind(existing.uuid)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;

                Ok(JoinOutcome::Removed)
            }
            JoinDecision::Reject => Err(AppError::CapacityExceeded),
            JoinDecision::Create(status) => {
                let query = format!(
                    "INSERT INTO requests (uuid, activity_uuid, user_uuid, status, message) \
                     VALUES ($1, $2, $3, $4, $5) \
                     RETURNING {REQUEST_COLUMNS}"
                );
                let request = sqlx::query_as::<_, JoinRequest>(&query)
                    .bind(Uuid::new_v4())
                    .bind(activity.uuid)
                    .bind(user.user_id)
                    .bind(status)
                    .bind(&message)
                    .fetch_one(&mut *tx)
                    .await?;
                tx.commit().await?;

                Ok(JoinOutcome::Created { request })
            }
        }
    }

    /// 活动创建者审批报名请求
    ///
    /// approve 在同一把活动行锁下重算容量，批准不会把人数挤过上限
    pub async fn review(
        pool: &PgPool,
        activity_uuid: Uuid,
        request_uuid: Uuid,
        actor: &AuthUser,
        decision: ReviewDecision,
    ) -> Result<Self, AppError> {
        let mut tx = pool.begin().await?;

        let activity = Activity::lock_active(&mut tx, activity_uuid)
            .await?
            .ok_or(AppError::NotFound("activity not found"))?;

        if activity.user_uuid != actor.user_id {
            return Err(AppError::Forbidden(
                "only the activity owner can review requests",
            ));
        }

        let request = Self::find_active_by_uuid(&mut *tx, request_uuid)
            .await?
            .filter(|r| r.activity_uuid == activity.uuid)
            .ok_or(AppError::NotFound("request not found"))?;

        let approved_excluding = Self::count_approved_excluding(
            &mut *tx,
            activity.uuid,
            request.uuid,
        )
        .await?;

        let next = decide_review(&decision, &request, &activity, approved_excluding)?;

        let query = format!(
            "UPDATE requests SET status = $2, updated_at = NOW() \
             WHERE uuid = $1 AND NOT is_deleted \
             RETURNING {REQUEST_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, JoinRequest>(&query)
            .bind(request.uuid)
            .bind(next)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(updated)
    }

    /// 活跃的已批准报名数，即 number_of_attendees
    ///
    /// 每次判定现算，不落库，避免并发下的陈旧计数
    pub async fn count_approved<'e, E: PgExecutor<'e>>(
        db: E,
        activity_uuid: Uuid,
    ) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM requests \
             WHERE activity_uuid = $1 AND status = 'approved' AND NOT is_deleted",
        )
        .bind(activity_uuid)
        .fetch_one(db)
        .await?;

        Ok(count)
    }

    async fn count_approved_excluding<'e, E: PgExecutor<'e>>(
        db: E,
        activity_uuid: Uuid,
        request_uuid: Uuid,
    ) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM requests \
             WHERE activity_uuid = $1 AND uuid <> $2 \
               AND status = 'approved' AND NOT is_deleted",
        )
        .bind(activity_uuid)
        .bind(request_uuid)
        .fetch_one(db)
        .await?;

        Ok(count)
    }

    pub async fn find_active<'e, E: PgExecutor<'e>>(
        db: E,
        activity_uuid: Uuid,
        user_uuid: Uuid,
    ) -> Result<Option<Self>, AppError> {
        let query = format!(
            "SELECT {REQUEST_COLUMNS} FROM requests \
             WHERE activity_uuid = $1 AND user_uuid = $2 AND NOT is_deleted"
        );
        let request = sqlx::query_as::<_, JoinRequest>(&query)
            .bind(activity_uuid)
            .bind(user_uuid)
            .fetch_optional(db)
            .await?;

        Ok(request)
    }

    pub async fn find_active_by_uuid<'e, E: PgExecutor<'e>>(
        db: E,
        uuid: Uuid,
    ) -> Result<Option<Self>, AppError> {
        let query =
            format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE uuid = $1 AND NOT is_deleted");
        let request = sqlx::query_as::<_, JoinRequest>(&query)
            .bind(uuid)
            .fetch_optional(db)
            .await?;

        Ok(request)
    }

    pub async fn list_for_activity(
        pool: &PgPool,
        activity_uuid: Uuid,
    ) -> Result<Vec<Self>, AppError> {
        let query = format!(
            "SELECT {REQUEST_COLUMNS} FROM requests \
             WHERE activity_uuid = $1 AND NOT is_deleted \
             ORDER BY created_at"
        );
        let requests = sqlx::query_as::<_, JoinRequest>(&query)
            .bind(activity_uuid)
            .fetch_all(pool)
            .await?;

        Ok(requests)
    }

    pub async fn list_approved_for_activity(
        pool: &PgPool,
        activity_uuid: Uuid,
    ) -> Result<Vec<Self>, AppError> {
        let query = format!(
            "SELECT {REQUEST_COLUMNS} FROM requests \
             WHERE activity_uuid = $1 AND status = 'approved' AND NOT is_deleted \
             ORDER BY created_at"
        );
        let requests = sqlx::query_as::<_, JoinRequest>(&query)
            .bind(activity_uuid)
            .fetch_all(pool)
            .await?;

        Ok(requests)
    }

    async fn load_group_access(
        tx: &mut Transaction<'_, Postgres>,
        activity: &Activity,
        user: &AuthUser,
    ) -> Result<Option<(Group, Option<Membership>)>, AppError> {
        let Some(group_uuid) = activity.group_uuid else {
            return Ok(None);
        };

        let Some(group) = Group::find_active(&mut **tx, group_uuid).await? else {
            return Ok(None);
        };

        let membership = Membership::find_active(&mut **tx, group.uuid, user.user_id).await?;

        Ok(Some((group, membership)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal::Decimal;

    use crate::common::Currency;

    fn activity_base(owner: Uuid) -> Activity {
        Activity {
            uuid: Uuid::new_v4(),
            title: "Dinner club".into(),
            description: None,
            time: Utc::now(),
            duration: 120,
            address_uuid: None,
            group_uuid: None,
            activity_type_uuid: None,
            user_uuid: owner,
            is_public: true,
            needs_approval: true,
            is_group: false,
            max_attendees: None,
            price: None,
            currency: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            is_deleted: false,
        }
    }

    fn group_activity(owner: Uuid, max_attendees: i32, needs_approval: bool) -> Activity {
        Activity {
            is_group: true,
            needs_approval,
            max_attendees: Some(max_attendees),
            price: Some(Decimal::ZERO),
            currency: Some(Currency::Dkk),
            ..activity_base(owner)
        }
    }

    fn request(activity: &Activity, user: Uuid, status: RequestStatus) -> JoinRequest {
        JoinRequest {
            uuid: Uuid::new_v4(),
            activity_uuid: activity.uuid,
            user_uuid: user,
            status,
            message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            is_deleted: false,
        }
    }

    // ------------------------------------------------------------------
    // decide_join
    // ------------------------------------------------------------------

    #[test]
    fn join_without_approval_gate_is_approved_directly() {
        let mut a = group_activity(Uuid::new_v4(), 5, false);
        assert_matches!(
            decide_join(&a, None, 0),
            Ok(JoinDecision::Create(RequestStatus::Approved))
        );

        a.needs_approval = true;
        assert_matches!(
            decide_join(&a, None, 0),
            Ok(JoinDecision::Create(RequestStatus::Pending))
        );
    }

    #[test]
    fn rejoin_toggles_instead_of_duplicating() {
        let a = group_activity(Uuid::new_v4(), 5, true);
        let existing = request(&a, Uuid::new_v4(), RequestStatus::Pending);

        assert_matches!(
            decide_join(&a, Some(&existing), 0),
            Ok(JoinDecision::Toggle)
        );

        // 已批准的请求同样走切换路径（= 退出活动）
        let approved = request(&a, Uuid::new_v4(), RequestStatus::Approved);
        assert_matches!(
            decide_join(&a, Some(&approved), 3),
            Ok(JoinDecision::Toggle)
        );
    }

    #[test]
    fn full_group_activity_rejects_new_joins() {
        let a = group_activity(Uuid::new_v4(), 3, false);

        assert_matches!(decide_join(&a, None, 2), Ok(JoinDecision::Create(_)));
        assert_matches!(decide_join(&a, None, 3), Ok(JoinDecision::Reject));
    }

    #[test]
    fn individual_activity_has_a_single_slot() {
        let a = activity_base(Uuid::new_v4());

        assert_matches!(decide_join(&a, None, 0), Ok(JoinDecision::Create(_)));
        assert_matches!(decide_join(&a, None, 1), Ok(JoinDecision::Reject));
    }

    #[test]
    fn attendee_roster_entries_carry_no_message() {
        let a = group_activity(Uuid::new_v4(), 5, true);
        let mut approved = request(&a, Uuid::new_v4(), RequestStatus::Approved);
        approved.message = Some("let me in".into());

        let entry = serde_json::to_value(AttendeeInfo::from(approved)).unwrap();
        assert!(entry.get("message").is_none());
        assert!(entry.get("user_uuid").is_some());
    }

    // ------------------------------------------------------------------
    // decide_review
    // ------------------------------------------------------------------

    #[test]
    fn approval_respects_capacity() {
        let a = group_activity(Uuid::new_v4(), 2, true);
        let pending = request(&a, Uuid::new_v4(), RequestStatus::Pending);

        assert_matches!(
            decide_review(&ReviewDecision::Approve, &pending, &a, 1),
            Ok(RequestStatus::Approved)
        );
        assert_matches!(
            decide_review(&ReviewDecision::Approve, &pending, &a, 2),
            Err(AppError::CapacityExceeded)
        );
    }

    #[test]
    fn deny_has_no_capacity_guard() {
        let a = group_activity(Uuid::new_v4(), 2, true);
        let pending = request(&a, Uuid::new_v4(), RequestStatus::Pending);

        assert_matches!(
            decide_review(&ReviewDecision::Deny, &pending, &a, 99),
            Ok(RequestStatus::Denied)
        );
    }

    #[test]
    fn denied_request_can_be_approved_later() {
        // 改判不是终态：拒绝后仍可批准
        let a = group_activity(Uuid::new_v4(), 2, true);
        let denied = request(&a, Uuid::new_v4(), RequestStatus::Denied);

        assert_matches!(
            decide_review(&ReviewDecision::Approve, &denied, &a, 0),
            Ok(RequestStatus::Approved)
        );
    }

    #[test]
    fn re_approving_an_approved_request_is_idempotent() {
        let a = group_activity(Uuid::new_v4(), 1, true);
        let approved = request(&a, Uuid::new_v4(), RequestStatus::Approved);

        // 它自己就是那个占位者，重复批准不触发容量拒绝
        assert_matches!(
            decide_review(&ReviewDecision::Approve, &approved, &a, 0),
            Ok(RequestStatus::Approved)
        );
    }

    // ------------------------------------------------------------------
    // §容量走查：max_attendees=2 的完整序列
    // ------------------------------------------------------------------

    #[test]
    fn capacity_walkthrough_with_two_slots() {
        let owner = Uuid::new_v4();
        let a = group_activity(owner, 2, true);
        let mut approved_count: i64 = 0;

        // B 报名 -> pending，计数不变
        let decision = decide_join(&a, None, approved_count).unwrap();
        assert_eq!(decision, JoinDecision::Create(RequestStatus::Pending));
        let b = request(&a, Uuid::new_v4(), RequestStatus::Pending);

        // 批准 B -> 计数 1
        assert_matches!(
            decide_review(&ReviewDecision::Approve, &b, &a, approved_count),
            Ok(RequestStatus::Approved)
        );
        approved_count += 1;

        // C 和 E 也报名 -> 都进 pending，计数还是 1
        assert_matches!(
            decide_join(&a, None, approved_count),
            Ok(JoinDecision::Create(RequestStatus::Pending))
        );
        let e = request(&a, Uuid::new_v4(), RequestStatus::Pending);

        // D 报名并获批 -> 计数 2，满员
        let d = request(&a, Uuid::new_v4(), RequestStatus::Pending);
        assert_matches!(
            decide_review(&ReviewDecision::Approve, &d, &a, approved_count),
            Ok(RequestStatus::Approved)
        );
        approved_count += 1;

        // 满员后新报名被拒，批准挂着的 E 也被容量闸门拒绝，计数保持 2
        assert_matches!(
            decide_join(&a, None, approved_count),
            Ok(JoinDecision::Reject)
        );
        assert_matches!(
            decide_review(&ReviewDecision::Approve, &e, &a, approved_count),
            Err(AppError::CapacityExceeded)
        );
        assert_eq!(approved_count, 2);
    }
}
