use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::common::{Address, ActivityFormat, Currency, Tag};
use crate::error::AppError;
use crate::middleware::AuthUser;
use crate::routes::group::model::{Group, Membership};
use crate::utils::geo::{BoundingBox, haversine_km};

/// 活动行，单表存两种变体，is_group 为判别字段
///
/// 群组变体的三个字段对个人活动为 NULL，读取时经 `variant()` 收敛成枚举，
/// 代码里只按判别字段分支，不做类型试探。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Activity {
    pub uuid: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub time: DateTime<Utc>,
    pub duration: i32,
    pub address_uuid: Option<Uuid>,
    pub group_uuid: Option<Uuid>,
    pub activity_type_uuid: Option<Uuid>,
    pub user_uuid: Uuid,
    #[serde(rename = "public")]
    pub is_public: bool,
    pub needs_approval: bool,
    pub is_group: bool,
    pub max_attendees: Option<i32>,
    pub price: Option<Decimal>,
    pub currency: Option<Currency>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActivityVariant {
    Individual,
    Group {
        max_attendees: i32,
        price: Decimal,
        currency: Currency,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActivityType {
    pub uuid: Uuid,
    pub title: String,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub is_deleted: bool,
}

#[derive(Debug, Deserialize, validator::Validate)]
pub struct CreateActivityRequest {
    #[validate(length(min = 1, max = 100))]
    pub title: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub time: DateTime<Utc>,
    #[validate(range(min = 5, max = 600))]
    pub duration: i32,
    pub activity_type: Option<String>,
    pub address_uuid: Option<Uuid>,
    pub group_uuid: Option<Uuid>,
    #[serde(default = "default_true", rename = "public")]
    pub is_public: bool,
    #[serde(default = "default_true")]
    pub needs_approval: bool,
    pub tags: Option<Vec<String>>,
    // 群组变体字段，仅在创建群组活动时使用
    #[validate(range(min = 2, max = 500))]
    pub max_attendees: Option<i32>,
    pub price: Option<Decimal>,
    pub currency: Option<Currency>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, validator::Validate)]
pub struct UpdateActivityRequest {
    #[validate(length(min = 1, max = 100))]
    pub title: Option<String>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub time: Option<DateTime<Utc>>,
    #[validate(range(min = 5, max = 600))]
    pub duration: Option<i32>,
    pub activity_type: Option<String>,
    #[serde(rename = "public")]
    pub is_public: Option<bool>,
    pub needs_approval: Option<bool>,
    #[validate(range(min = 2, max = 500))]
    pub max_attendees: Option<i32>,
    pub price: Option<Decimal>,
    pub currency: Option<Currency>,
}

pub const ACTIVITY_COLUMNS: &str = "uuid, title, description, time, duration, address_uuid, \
     group_uuid, activity_type_uuid, user_uuid, is_public, needs_approval, is_group, \
     max_attendees, price, currency, created_at, updated_at, is_deleted";

const ACTIVITY_TYPE_COLUMNS: &str = "uuid, title, approved, created_at, updated_at, is_deleted";

impl Activity {
    /// 按判别字段还原活动变体
    ///
    /// 群组活动缺了变体字段属于数据损坏，按不变量违例处理
    pub fn variant(&self) -> Result<ActivityVariant, AppError> {
        if !self.is_group {
            return Ok(ActivityVariant::Individual);
        }

        match (self.max_attendees, self.price, self.currency) {
            (Some(max_attendees), Some(price), Some(currency)) => Ok(ActivityVariant::Group {
                max_attendees,
                price,
                currency,
            }),
            _ => Err(AppError::Invariant(
                "group activity row is missing variant columns",
            )),
        }
    }

    pub fn format(&self) -> ActivityFormat {
        if self.is_group {
            ActivityFormat::Group
        } else {
            ActivityFormat::Individual
        }
    }

    /// 审批通过的报名上限：个人活动容量恒为 1（不含创建者）
    pub fn capacity(&self) -> Result<i64, AppError> {
        match self.variant()? {
            ActivityVariant::Individual => Ok(1),
            ActivityVariant::Group { max_attendees, .. } => Ok(i64::from(max_attendees)),
        }
    }

    pub async fn create(
        pool: &PgPool,
        req: CreateActivityRequest,
        format: ActivityFormat,
        owner: &AuthUser,
    ) -> Result<Self, AppError> {
        use validator::Validate;
        req.validate()?;

        let is_group = format == ActivityFormat::Group;

        // 群组变体强制填充变体字段，个人变体强制置空
        let (max_attendees, price, currency) = if is_group {
            let price = req.price.unwrap_or(Decimal::ZERO);
            if price < Decimal::ZERO {
                return Err(AppError::Validation("price must be non-negative".into()));
            }
            (
                Some(req.max_attendees.unwrap_or(5)),
                Some(price),
                Some(req.currency.unwrap_or_default()),
            )
        } else {
            (None, None, None)
        };

        let mut tx = pool.begin().await?;

        let activity_type_uuid = match &req.activity_type {
            Some(title) => Some(ActivityType::get_or_create(&mut tx, title).await?.uuid),
            None => None,
        };

        let query = format!(
            "INSERT INTO activities (uuid, title, description, time, duration, address_uuid, \
                 group_uuid, activity_type_uuid, user_uuid, is_public, needs_approval, is_group, \
                 max_attendees, price, currency) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             RETURNING {ACTIVITY_COLUMNS}"
        );
        let activity = sqlx::query_as::<_, Activity>(&query)
            .bind(Uuid::new_v4())
            .bind(&req.title)
            .bind(&req.description)
            .bind(req.time)
            .bind(req.duration)
            .bind(req.address_uuid)
            .bind(req.group_uuid)
            .bind(activity_type_uuid)
            .bind(owner.user_id)
            .bind(req.is_public)
            .bind(req.needs_approval)
            .bind(is_group)
            .bind(max_attendees)
            .bind(price)
            .bind(currency)
            .fetch_one(&mut *tx)
            .await?;

        if let Some(tags) = &req.tags {
            activity.replace_tags_tx(&mut tx, tags).await?;
        }

        tx.commit().await?;

        Ok(activity)
    }

    pub async fn find_active<'e, E: PgExecutor<'e>>(
        db: E,
        uuid: Uuid,
    ) -> Result<Option<Self>, AppError> {
        let query =
            format!("SELECT {ACTIVITY_COLUMNS} FROM activities WHERE uuid = $1 AND NOT is_deleted");
        let activity = sqlx::query_as::<_, Activity>(&query)
            .bind(uuid)
            .fetch_optional(db)
            .await?;

        Ok(activity)
    }

    pub async fn get_active<'e, E: PgExecutor<'e>>(db: E, uuid: Uuid) -> Result<Self, AppError> {
        Self::find_active(db, uuid)
            .await?
            .ok_or(AppError::NotFound("activity not found"))
    }

    /// 行级锁加载，容量检查和写入要在同一把锁下进行
    pub async fn lock_active(
        tx: &mut Transaction<'_, Postgres>,
        uuid: Uuid,
    ) -> Result<Option<Self>, AppError> {
        let query = format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities \
             WHERE uuid = $1 AND NOT is_deleted FOR UPDATE"
        );
        let activity = sqlx::query_as::<_, Activity>(&query)
            .bind(uuid)
            .fetch_optional(&mut **tx)
            .await?;

        Ok(activity)
    }

    /// 活动所属群组及请求者在其中的成员关系，没有群组时为 None
    pub async fn group_access(
        &self,
        pool: &PgPool,
        user: &AuthUser,
    ) -> Result<Option<(Group, Option<Membership>)>, AppError> {
        let Some(group_uuid) = self.group_uuid else {
            return Ok(None);
        };

        // 群组被删时按无群组处理，交给策略层得出 false 而不是报错
        let Some(group) = Group::find_active(pool, group_uuid).await? else {
            return Ok(None);
        };

        let membership = Membership::find_active(pool, group.uuid, user.user_id).await?;

        Ok(Some((group, membership)))
    }

    pub async fn update(&self, pool: &PgPool, req: UpdateActivityRequest) -> Result<Self, AppError> {
        use validator::Validate;
        req.validate()?;

        if let Some(price) = req.price {
            if price < Decimal::ZERO {
                return Err(AppError::Validation("price must be non-negative".into()));
            }
        }

        // 变体字段只允许群组活动更新
        if !self.is_group
            && (req.max_attendees.is_some() || req.price.is_some() || req.currency.is_some())
        {
            return Err(AppError::Validation(
                "individual activities have no attendee limit, price or currency".into(),
            ));
        }

        let mut tx = pool.begin().await?;

        let activity_type_uuid = match &req.activity_type {
            Some(title) => Some(ActivityType::get_or_create(&mut tx, title).await?.uuid),
            None => self.activity_type_uuid,
        };

        let query = format!(
            "UPDATE activities SET \
                title = COALESCE($2, title), \
                description = COALESCE($3, description), \
                time = COALESCE($4, time), \
                duration = COALESCE($5, duration), \
                is_public = COALESCE($6, is_public), \
                needs_approval = COALESCE($7, needs_approval), \
                max_attendees = COALESCE($8, max_attendees), \
                price = COALESCE($9, price), \
                currency = COALESCE($10, currency), \
                activity_type_uuid = $11, \
                updated_at = NOW() \
             WHERE uuid = $1 AND NOT is_deleted \
             RETURNING {ACTIVITY_COLUMNS}"
        );
        let activity = sqlx::query_as::<_, Activity>(&query)
            .bind(self.uuid)
            .bind(&req.title)
            .bind(&req.description)
            .bind(req.time)
            .bind(req.duration)
            .bind(req.is_public)
            .bind(req.needs_approval)
            .bind(req.max_attendees)
            .bind(req.price)
            .bind(req.currency)
            .bind(activity_type_uuid)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(activity)
    }

    pub async fn soft_delete(&self, pool: &PgPool) -> Result<(), AppError> {
        sqlx::query("UPDATE activities SET is_deleted = TRUE, updated_at = NOW() WHERE uuid = $1")
            .bind(self.uuid)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn set_address(&self, pool: &PgPool, address_uuid: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE activities SET address_uuid = $2, updated_at = NOW() WHERE uuid = $1")
            .bind(self.uuid)
            .bind(address_uuid)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// 整体替换活动标签，按标题 get-or-create
    pub async fn replace_tags(&self, pool: &PgPool, titles: &[String]) -> Result<Vec<Tag>, AppError> {
        let mut tx = pool.begin().await?;
        let tags = self.replace_tags_tx(&mut tx, titles).await?;
        tx.commit().await?;

        Ok(tags)
    }

    async fn replace_tags_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        titles: &[String],
    ) -> Result<Vec<Tag>, AppError> {
        sqlx::query("DELETE FROM activity_tags WHERE activity_uuid = $1")
            .bind(self.uuid)
            .execute(&mut **tx)
            .await?;

        let mut tags = Vec::with_capacity(titles.len());
        for title in titles {
            let tag = Tag::get_or_create(&mut **tx, title).await?;
            sqlx::query(
                "INSERT INTO activity_tags (activity_uuid, tag_uuid) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(self.uuid)
            .bind(tag.uuid)
            .execute(&mut **tx)
            .await?;
            tags.push(tag);
        }

        Ok(tags)
    }

    /// 用户即将参加的活动：自己创建的，或报名已获批准的
    pub async fn list_upcoming_for_user(
        pool: &PgPool,
        user_id: Uuid,
    ) -> Result<Vec<Self>, AppError> {
        let query = format!(
            "SELECT DISTINCT {columns} FROM activities a \
             LEFT JOIN requests r ON r.activity_uuid = a.uuid AND NOT r.is_deleted \
             WHERE NOT a.is_deleted AND a.time >= NOW() \
               AND (a.user_uuid = $1 OR (r.user_uuid = $1 AND r.status = 'approved')) \
             ORDER BY a.time",
            columns = "a.uuid, a.title, a.description, a.time, a.duration, a.address_uuid, \
                       a.group_uuid, a.activity_type_uuid, a.user_uuid, a.is_public, \
                       a.needs_approval, a.is_group, a.max_attendees, a.price, a.currency, \
                       a.created_at, a.updated_at, a.is_deleted"
        );
        let activities = sqlx::query_as::<_, Activity>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await?;

        Ok(activities)
    }

    pub async fn list_for_group(pool: &PgPool, group_uuid: Uuid) -> Result<Vec<Self>, AppError> {
        let query = format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities \
             WHERE group_uuid = $1 AND NOT is_deleted \
             ORDER BY time"
        );
        let activities = sqlx::query_as::<_, Activity>(&query)
            .bind(group_uuid)
            .fetch_all(pool)
            .await?;

        Ok(activities)
    }

    /// 附近的公开活动：包围盒粗过滤 + haversine 精确过滤
    ///
    /// 没有坐标的活动直接排除，指定的当前活动不出现在自己的结果里
    pub async fn find_nearby(
        pool: &PgPool,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Self>, AppError> {
        if radius_km <= 0.0 {
            return Err(AppError::Validation("radius must be positive".into()));
        }

        let bbox = BoundingBox::around(latitude, longitude, radius_km);

        let query = format!(
            "SELECT {columns} FROM activities a \
             JOIN addresses addr ON addr.uuid = a.address_uuid AND NOT addr.is_deleted \
             WHERE NOT a.is_deleted AND a.is_public \
               AND addr.latitude IS NOT NULL AND addr.longitude IS NOT NULL \
               AND addr.latitude BETWEEN $1 AND $2 \
               AND addr.longitude BETWEEN $3 AND $4",
            columns = "a.uuid, a.title, a.description, a.time, a.duration, a.address_uuid, \
                       a.group_uuid, a.activity_type_uuid, a.user_uuid, a.is_public, \
                       a.needs_approval, a.is_group, a.max_attendees, a.price, a.currency, \
                       a.created_at, a.updated_at, a.is_deleted, \
                       addr.latitude AS addr_latitude, addr.longitude AS addr_longitude"
        );
        let rows = sqlx::query_as::<_, NearbyRow>(&query)
            .bind(bbox.min_lat)
            .bind(bbox.max_lat)
            .bind(bbox.min_lon)
            .bind(bbox.max_lon)
            .fetch_all(pool)
            .await?;

        let activities = rows
            .into_iter()
            .filter(|row| Some(row.activity.uuid) != exclude)
            .filter(|row| {
                haversine_km(latitude, longitude, row.addr_latitude, row.addr_longitude)
                    <= radius_km
            })
            .map(|row| row.activity)
            .collect();

        Ok(activities)
    }

    pub async fn address<'e, E: PgExecutor<'e>>(&self, db: E) -> Result<Option<Address>, AppError> {
        match self.address_uuid {
            Some(uuid) => Address::find_active(db, uuid).await,
            None => Ok(None),
        }
    }
}

#[derive(sqlx::FromRow)]
struct NearbyRow {
    #[sqlx(flatten)]
    activity: Activity,
    addr_latitude: f64,
    addr_longitude: f64,
}

impl ActivityType {
    pub async fn get_or_create<'e>(
        tx: &mut Transaction<'e, Postgres>,
        title: &str,
    ) -> Result<Self, AppError> {
        let query = format!(
            "INSERT INTO activity_types (uuid, title) VALUES ($1, $2) \
             ON CONFLICT (title) DO UPDATE SET updated_at = activity_types.updated_at \
             RETURNING {ACTIVITY_TYPE_COLUMNS}"
        );
        let activity_type = sqlx::query_as::<_, ActivityType>(&query)
            .bind(Uuid::new_v4())
            .bind(title.to_lowercase())
            .fetch_one(&mut **tx)
            .await?;

        Ok(activity_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn individual_activity(owner: Uuid) -> Activity {
        Activity {
            uuid: Uuid::new_v4(),
            title: "Morning run".into(),
            description: None,
            time: Utc::now(),
            duration: 60,
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

    fn group_activity(owner: Uuid, max_attendees: i32) -> Activity {
        Activity {
            is_group: true,
            max_attendees: Some(max_attendees),
            price: Some(Decimal::ZERO),
            currency: Some(Currency::Dkk),
            ..individual_activity(owner)
        }
    }

    #[test]
    fn individual_variant_has_capacity_one() {
        let activity = individual_activity(Uuid::new_v4());
        assert_matches!(activity.variant(), Ok(ActivityVariant::Individual));
        assert_eq!(activity.capacity().unwrap(), 1);
    }

    #[test]
    fn group_variant_exposes_its_fields() {
        let activity = group_activity(Uuid::new_v4(), 12);
        assert_matches!(
            activity.variant(),
            Ok(ActivityVariant::Group { max_attendees: 12, .. })
        );
        assert_eq!(activity.capacity().unwrap(), 12);
    }

    #[test]
    fn group_row_without_variant_columns_is_an_invariant_violation() {
        let mut activity = group_activity(Uuid::new_v4(), 12);
        activity.max_attendees = None;

        assert_matches!(activity.variant(), Err(AppError::Invariant(_)));
    }
}
