use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::content::ContentKind;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize, ToSchema)]
pub struct Tenant {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize, ToSchema)]
pub struct Course {
    pub id: i64,
    pub tenant_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub passing_score: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// One piece of course content. `item_order` defines delivery order; the
/// engine addresses items by 0-based rank within that order, not by the raw
/// `item_order` value, so gaps in the stored order are harmless.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize, ToSchema)]
pub struct CourseItem {
    pub id: i64,
    pub course_id: i64,
    pub tenant_id: i64,
    pub item_order: i64,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub item_type: String,
    pub title: String,
    pub content_url: Option<String>,
    pub metadata: Option<String>,
    pub required: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl CourseItem {
    pub fn kind(&self) -> ContentKind {
        ContentKind::parse(&self.item_type)
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize, ToSchema)]
pub struct Participant {
    pub id: i64,
    pub tenant_id: i64,
    pub phone_e164: String,
    pub name: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize, ToSchema)]
pub struct Enrollment {
    pub id: i64,
    pub participant_id: i64,
    pub course_id: i64,
    pub tenant_id: i64,
    pub status: EnrollmentStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub enrolled_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

/// Persisted delivery-log row. At most one row exists per
/// `(enrollment_id, item_index)`; `user_responded_at` is set exactly when the
/// participant's next accepted command advances past the row's index.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize, ToSchema)]
pub struct DeliveryLogEntry {
    pub enrollment_id: i64,
    pub item_index: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub delivered_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub user_responded_at: Option<OffsetDateTime>,
}
