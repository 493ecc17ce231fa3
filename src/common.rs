use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::error::AppError;

/// 报名请求 / 成员关系共用的审批状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "request_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "membership_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MembershipType {
    Admin,
    Participant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "currency", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    #[default]
    Dkk,
    Sek,
    Nok,
    Eur,
    Gbp,
    Usd,
    Cad,
}

/// 活动形式：个人活动容量固定为 1，群组变体带 max_attendees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityFormat {
    Individual,
    Group,
}

/// 地理编码后的地址，可被用户和活动共享引用，生命周期独立
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Address {
    pub uuid: Uuid,
    pub address: Option<String>,
    pub street: Option<String>,
    pub street_number: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
    pub place_id: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub user_uuid: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub is_deleted: bool,
}

#[derive(Debug, Deserialize, validator::Validate)]
pub struct CreateAddressRequest {
    #[validate(length(min = 1, max = 200))]
    pub address: Option<String>,
    pub street: Option<String>,
    pub street_number: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
    pub place_id: Option<String>,
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
}

const ADDRESS_COLUMNS: &str = "uuid, address, street, street_number, city, country, postal_code, \
     place_id, latitude, longitude, user_uuid, created_at, updated_at, is_deleted";

impl Address {
    /// 地址要么带格式化文本，要么带坐标，二者都缺直接拒绝
    pub fn validate_request(req: &CreateAddressRequest) -> Result<(), AppError> {
        use validator::Validate;
        req.validate()?;

        if req.address.is_none() && (req.latitude.is_none() || req.longitude.is_none()) {
            return Err(AppError::Validation(
                "address or latitude and longitude has to be defined".into(),
            ));
        }

        Ok(())
    }

    pub async fn create<'e, E: PgExecutor<'e>>(
        db: E,
        req: &CreateAddressRequest,
        owner: Uuid,
    ) -> Result<Self, AppError> {
        Self::validate_request(req)?;

        let query = format!(
            "INSERT INTO addresses (uuid, address, street, street_number, city, country, \
                 postal_code, place_id, latitude, longitude, user_uuid) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {ADDRESS_COLUMNS}"
        );
        let address = sqlx::query_as::<_, Address>(&query)
            .bind(Uuid::new_v4())
            .bind(&req.address)
            .bind(&req.street)
            .bind(&req.street_number)
            .bind(&req.city)
            .bind(&req.country)
            .bind(&req.postal_code)
            .bind(&req.place_id)
            .bind(req.latitude)
            .bind(req.longitude)
            .bind(owner)
            .fetch_one(db)
            .await?;

        Ok(address)
    }

    pub async fn find_active<'e, E: PgExecutor<'e>>(
        db: E,
        uuid: Uuid,
    ) -> Result<Option<Self>, AppError> {
        let query =
            format!("SELECT {ADDRESS_COLUMNS} FROM addresses WHERE uuid = $1 AND NOT is_deleted");
        let address = sqlx::query_as::<_, Address>(&query)
            .bind(uuid)
            .fetch_optional(db)
            .await?;

        Ok(address)
    }
}

/// 标题即键的标签，按标题 get-or-create
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tag {
    pub uuid: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub is_deleted: bool,
}

const TAG_COLUMNS: &str = "uuid, title, created_at, updated_at, is_deleted";

impl Tag {
    pub async fn get_or_create<'e, E: PgExecutor<'e>>(
        db: E,
        title: &str,
    ) -> Result<Self, AppError> {
        let query = format!(
            "INSERT INTO tags (uuid, title) VALUES ($1, $2) \
             ON CONFLICT (title) DO UPDATE SET updated_at = tags.updated_at \
             RETURNING {TAG_COLUMNS}"
        );
        let tag = sqlx::query_as::<_, Tag>(&query)
            .bind(Uuid::new_v4())
            .bind(title)
            .fetch_one(db)
            .await?;

        Ok(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&RequestStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::to_string(&MembershipType::Admin).unwrap(),
            "\"admin\""
        );
        assert_eq!(serde_json::to_string(&Currency::Dkk).unwrap(), "\"dkk\"");
    }

    #[test]
    fn default_currency_is_dkk() {
        assert_eq!(Currency::default(), Currency::Dkk);
    }

    fn empty_address_request() -> CreateAddressRequest {
        CreateAddressRequest {
            address: None,
            street: None,
            street_number: None,
            city: None,
            country: None,
            postal_code: None,
            place_id: None,
            latitude: None,
            longitude: None,
        }
    }

    #[test]
    fn address_requires_text_or_coordinates() {
        let empty = empty_address_request();
        assert!(Address::validate_request(&empty).is_err());

        let with_text = CreateAddressRequest {
            address: Some("Rådhuspladsen 1, København".into()),
            ..empty_address_request()
        };
        assert!(Address::validate_request(&with_text).is_ok());

        // 只有纬度没有经度仍然不够
        let half_coords = CreateAddressRequest {
            latitude: Some(55.6761),
            ..empty_address_request()
        };
        assert!(Address::validate_request(&half_coords).is_err());

        let full_coords = CreateAddressRequest {
            latitude: Some(55.6761),
            longitude: Some(12.5683),
            ..empty_address_request()
        };
        assert!(Address::validate_request(&full_coords).is_ok());
    }

    #[test]
    fn address_rejects_out_of_range_coordinates() {
        let bad = CreateAddressRequest {
            latitude: Some(123.0),
            longitude: Some(12.5683),
            ..empty_address_request()
        };
        assert!(Address::validate_request(&bad).is_err());
    }
}
