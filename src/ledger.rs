//! Delivery ledger and catalog access.
//!
//! The engine depends on the [`Ledger`] trait only; [`SqliteLedger`] is the
//! sqlite adapter. All SQL is runtime-checked (`sqlx::query`, not the
//! compile-time macros) so the crate builds without a database on hand.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::model::{Course, CourseItem, Enrollment, EnrollmentStatus, Participant};
use crate::utils::now_utc;

/// Storage operations the progression engine consumes. The engine treats the
/// store as the source of truth; nothing is cached across invocations.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// The single active enrollment for a phone number, if any. Completed
    /// enrollments are invisible here, which is what makes `advance` a no-op
    /// at the terminal state.
    async fn find_active_enrollment(&self, phone: &str) -> anyhow::Result<Option<Enrollment>>;

    /// Highest item index delivered so far, or `None` for a fresh enrollment.
    /// This is the progression cursor: the next ordinal to deliver is always
    /// one past it.
    async fn max_delivered_index(&self, enrollment_id: i64) -> anyhow::Result<Option<i64>>;

    /// Highest item index the participant has responded to, or `None` if
    /// nothing has been responded to yet. Trails `max_delivered_index` by one
    /// for an in-flight enrollment.
    async fn max_responded_index(&self, enrollment_id: i64) -> anyhow::Result<Option<i64>>;

    /// Item at the 0-based rank `ordinal` among the course's items ordered by
    /// `item_order` ascending. Gaps in `item_order` compact away.
    async fn item_at_ordinal(&self, course_id: i64, ordinal: i64)
    -> anyhow::Result<Option<CourseItem>>;

    /// Idempotent: a second insert for the same `(enrollment, index)` pair is
    /// ignored, which de-duplicates concurrent duplicate webhook deliveries.
    async fn record_delivery(
        &self,
        enrollment_id: i64,
        index: i64,
        delivered_at: OffsetDateTime,
    ) -> anyhow::Result<()>;

    async fn record_response(
        &self,
        enrollment_id: i64,
        index: i64,
        responded_at: OffsetDateTime,
    ) -> anyhow::Result<()>;

    async fn complete_enrollment(
        &self,
        enrollment_id: i64,
        completed_at: OffsetDateTime,
    ) -> anyhow::Result<()>;

    async fn find_or_create_participant(
        &self,
        tenant_id: i64,
        phone: &str,
        name: Option<&str>,
    ) -> anyhow::Result<Participant>;

    async fn create_enrollment(
        &self,
        participant_id: i64,
        course_id: i64,
        tenant_id: i64,
        enrolled_at: OffsetDateTime,
    ) -> anyhow::Result<Enrollment>;
}

#[derive(Debug, Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn find_active_enrollment(&self, phone: &str) -> anyhow::Result<Option<Enrollment>> {
        let enrollment = sqlx::query_as::<_, Enrollment>(
            "SELECT e.id, e.participant_id, e.course_id, e.tenant_id, e.status, \
                    e.enrolled_at, e.completed_at \
             FROM enrollments e \
             JOIN participants p ON e.participant_id = p.id \
             WHERE p.phone_e164 = ? AND e.status = ? \
             ORDER BY e.enrolled_at DESC LIMIT 1",
        )
        .bind(phone)
        .bind(EnrollmentStatus::Active)
        .fetch_optional(&self.pool)
        .await?;
        Ok(enrollment)
    }

    async fn max_delivered_index(&self, enrollment_id: i64) -> anyhow::Result<Option<i64>> {
        let max = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(item_index) FROM delivery_log WHERE enrollment_id = ?",
        )
        .bind(enrollment_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(max)
    }

    async fn max_responded_index(&self, enrollment_id: i64) -> anyhow::Result<Option<i64>> {
        let max = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(item_index) FROM delivery_log \
             WHERE enrollment_id = ? AND user_responded_at IS NOT NULL",
        )
        .bind(enrollment_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(max)
    }

    async fn item_at_ordinal(
        &self,
        course_id: i64,
        ordinal: i64,
    ) -> anyhow::Result<Option<CourseItem>> {
        let item = sqlx::query_as::<_, CourseItem>(
            "SELECT id, course_id, tenant_id, item_order, type, title, content_url, \
                    metadata, required, created_at \
             FROM course_items WHERE course_id = ? \
             ORDER BY item_order ASC LIMIT 1 OFFSET ?",
        )
        .bind(course_id)
        .bind(ordinal)
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    async fn record_delivery(
        &self,
        enrollment_id: i64,
        index: i64,
        delivered_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO delivery_log (enrollment_id, item_index, delivered_at) \
             VALUES (?, ?, ?)",
        )
        .bind(enrollment_id)
        .bind(index)
        .bind(delivered_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_response(
        &self,
        enrollment_id: i64,
        index: i64,
        responded_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE delivery_log SET user_responded_at = ? \
             WHERE enrollment_id = ? AND item_index = ? AND user_responded_at IS NULL",
        )
        .bind(responded_at)
        .bind(enrollment_id)
        .bind(index)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_enrollment(
        &self,
        enrollment_id: i64,
        completed_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE enrollments SET status = ?, completed_at = ? WHERE id = ?")
            .bind(EnrollmentStatus::Completed)
            .bind(completed_at)
            .bind(enrollment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_or_create_participant(
        &self,
        tenant_id: i64,
        phone: &str,
        name: Option<&str>,
    ) -> anyhow::Result<Participant> {
        let existing = sqlx::query_as::<_, Participant>(
            "SELECT id, tenant_id, phone_e164, name, created_at FROM participants \
             WHERE phone_e164 = ? AND tenant_id = ?",
        )
        .bind(phone)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(participant) = existing {
            return Ok(participant);
        }
        let created_at = now_utc();
        let id = sqlx::query(
            "INSERT INTO participants (phone_e164, tenant_id, name, created_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(phone)
        .bind(tenant_id)
        .bind(name)
        .bind(created_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(Participant {
            id,
            tenant_id,
            phone_e164: phone.to_string(),
            name: name.map(str::to_string),
            created_at,
        })
    }

    async fn create_enrollment(
        &self,
        participant_id: i64,
        course_id: i64,
        tenant_id: i64,
        enrolled_at: OffsetDateTime,
    ) -> anyhow::Result<Enrollment> {
        let id = sqlx::query(
            "INSERT INTO enrollments (participant_id, course_id, tenant_id, status, enrolled_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(participant_id)
        .bind(course_id)
        .bind(tenant_id)
        .bind(EnrollmentStatus::Active)
        .bind(enrolled_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(Enrollment {
            id,
            participant_id,
            course_id,
            tenant_id,
            status: EnrollmentStatus::Active,
            enrolled_at,
            completed_at: None,
        })
    }
}

/// One dashboard row per enrollment under a tenant.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, ToSchema)]
pub struct DashboardRow {
    pub phone_number: String,
    pub name: Option<String>,
    pub course_title: String,
    pub status: EnrollmentStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub total_items: i64,
    pub completed_items: i64,
}

/// Catalog and dashboard queries used by the HTTP API, not by the engine.
impl SqliteLedger {
    pub async fn courses_for_tenant(&self, tenant_id: i64) -> anyhow::Result<Vec<Course>> {
        let courses = sqlx::query_as::<_, Course>(
            "SELECT id, tenant_id, title, description, passing_score, created_at \
             FROM courses WHERE tenant_id = ? ORDER BY created_at DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(courses)
    }

    pub async fn create_course(
        &self,
        tenant_id: i64,
        title: &str,
        description: Option<&str>,
        passing_score: i64,
    ) -> anyhow::Result<Course> {
        let created_at = now_utc();
        let id = sqlx::query(
            "INSERT INTO courses (tenant_id, title, description, passing_score, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(tenant_id)
        .bind(title)
        .bind(description)
        .bind(passing_score)
        .bind(created_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(Course {
            id,
            tenant_id,
            title: title.to_string(),
            description: description.map(str::to_string),
            passing_score,
            created_at,
        })
    }

    pub async fn course(&self, course_id: i64) -> anyhow::Result<Option<Course>> {
        let course = sqlx::query_as::<_, Course>(
            "SELECT id, tenant_id, title, description, passing_score, created_at \
             FROM courses WHERE id = ?",
        )
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(course)
    }

    pub async fn course_items(&self, course_id: i64) -> anyhow::Result<Vec<CourseItem>> {
        let items = sqlx::query_as::<_, CourseItem>(
            "SELECT id, course_id, tenant_id, item_order, type, title, content_url, \
                    metadata, required, created_at \
             FROM course_items WHERE course_id = ? ORDER BY item_order ASC",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    pub async fn update_course(
        &self,
        course_id: i64,
        title: &str,
        description: Option<&str>,
        passing_score: i64,
    ) -> anyhow::Result<Option<Course>> {
        let updated = sqlx::query(
            "UPDATE courses SET title = ?, description = ?, passing_score = ? WHERE id = ?",
        )
        .bind(title)
        .bind(description)
        .bind(passing_score)
        .bind(course_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Ok(None);
        }
        self.course(course_id).await
    }

    /// Items and enrollments go first; sqlite here has no cascade.
    pub async fn delete_course(&self, course_id: i64) -> anyhow::Result<bool> {
        sqlx::query("DELETE FROM delivery_log WHERE enrollment_id IN \
                     (SELECT id FROM enrollments WHERE course_id = ?)")
            .bind(course_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM course_items WHERE course_id = ?")
            .bind(course_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM enrollments WHERE course_id = ?")
            .bind(course_id)
            .execute(&self.pool)
            .await?;
        let deleted = sqlx::query("DELETE FROM courses WHERE id = ?")
            .bind(course_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    /// Append an item. When `item_order` is omitted the item goes after the
    /// current maximum; `tenant_id` always comes from the course row.
    pub async fn add_item(
        &self,
        course: &Course,
        item_type: &str,
        title: &str,
        content_url: Option<&str>,
        metadata: Option<&str>,
        required: bool,
        item_order: Option<i64>,
    ) -> anyhow::Result<CourseItem> {
        let item_order = match item_order {
            Some(order) => order,
            None => {
                let max = sqlx::query_scalar::<_, Option<i64>>(
                    "SELECT MAX(item_order) FROM course_items WHERE course_id = ?",
                )
                .bind(course.id)
                .fetch_one(&self.pool)
                .await?;
                max.unwrap_or(0) + 1
            }
        };
        let created_at = now_utc();
        let id = sqlx::query(
            "INSERT INTO course_items \
             (course_id, tenant_id, item_order, type, title, content_url, metadata, required, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(course.id)
        .bind(course.tenant_id)
        .bind(item_order)
        .bind(item_type)
        .bind(title)
        .bind(content_url)
        .bind(metadata)
        .bind(required)
        .bind(created_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(CourseItem {
            id,
            course_id: course.id,
            tenant_id: course.tenant_id,
            item_order,
            item_type: item_type.to_string(),
            title: title.to_string(),
            content_url: content_url.map(str::to_string),
            metadata: metadata.map(str::to_string),
            required,
            created_at,
        })
    }

    pub async fn active_users(&self, tenant_id: i64) -> anyhow::Result<Vec<DashboardRow>> {
        let rows = sqlx::query_as::<_, DashboardRow>(
            "SELECT p.phone_e164 AS phone_number, p.name, c.title AS course_title, \
                    e.status, e.completed_at, \
                    (SELECT COUNT(*) FROM course_items WHERE course_id = c.id) AS total_items, \
                    (SELECT COUNT(DISTINCT item_index) FROM delivery_log dl \
                     WHERE dl.enrollment_id = e.id AND dl.user_responded_at IS NOT NULL) \
                        AS completed_items \
             FROM enrollments e \
             JOIN participants p ON e.participant_id = p.id \
             JOIN courses c ON e.course_id = c.id \
             WHERE p.tenant_id = ? \
             ORDER BY e.enrolled_at DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    use sqlx::sqlite::SqlitePoolOptions;
    // single connection so every test statement sees the same :memory: db
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::raw_sql(include_str!("../schema.sql"))
        .execute(&pool)
        .await
        .unwrap();
    pool
}
