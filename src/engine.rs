//! Enrollment progression engine.
//!
//! Tracks a participant's position in a course as the highest delivered item
//! index in the ledger. An accepted "next" marks the previously delivered
//! entry as responded and delivers the ordinal after it; running past the
//! last ordinal completes the enrollment.
//!
//! Transport failures never block ledger progress: a delivery-log row records
//! an attempt, not a confirmed receipt, so a transient send failure cannot
//! leave a participant permanently stuck. Duplicate webhook deliveries may
//! re-send a message (at-least-once delivery) but the idempotent delivery
//! insert keeps the stored state single-sourced.

use std::sync::Arc;

use tracing::{info, warn};

use crate::content;
use crate::error::Error;
use crate::ledger::Ledger;
use crate::model::CourseItem;
use crate::transport::{Button, ButtonOptions, SendOutcome, Transport};
use crate::utils::now_utc;

const NO_ENROLLMENT_MESSAGE: &str =
    "You don't have an active course right now. Please contact your administrator to get enrolled.";
const COMPLETION_MESSAGE: &str = "🎉 Congratulations! You have completed the course.";
const START_FOOTER: &str = "Or reply START to begin";
const NEXT_FOOTER: &str = "Reply NEXT to continue";

#[derive(Debug)]
pub enum AdvanceOutcome {
    /// No active enrollment for the phone number; an informational message
    /// was attempted, nothing was written.
    NoActiveEnrollment,
    /// Delivered the item at `index` and moved the cursor.
    Delivered {
        enrollment_id: i64,
        index: i64,
        item: CourseItem,
        send: SendOutcome,
    },
    /// No further item existed; the enrollment is now completed.
    Completed {
        enrollment_id: i64,
        send: SendOutcome,
    },
}

#[derive(Debug)]
pub struct EnrollReceipt {
    pub enrollment_id: i64,
    pub send: SendOutcome,
}

pub struct Engine {
    ledger: Arc<dyn Ledger>,
    transport: Arc<dyn Transport>,
    /// Deliver items as interactive messages with a Next button instead of
    /// plain text.
    next_button: bool,
}

impl Engine {
    pub fn new(ledger: Arc<dyn Ledger>, transport: Arc<dyn Transport>) -> Self {
        Self {
            ledger,
            transport,
            next_button: false,
        }
    }

    pub fn with_next_button(mut self) -> Self {
        self.next_button = true;
        self
    }

    /// Advance the phone number's active enrollment by one item. The caller
    /// has already classified the inbound event as an accept command.
    pub async fn advance(&self, phone: &str) -> Result<AdvanceOutcome, Error> {
        let enrollment = self
            .ledger
            .find_active_enrollment(phone)
            .await
            .map_err(Error::Ledger)?;
        let Some(enrollment) = enrollment else {
            let send = self.transport.send(phone, NO_ENROLLMENT_MESSAGE).await;
            if let SendOutcome::Failed(reason) = &send {
                warn!(phone, %reason, "failed to send no-enrollment notice");
            }
            return Ok(AdvanceOutcome::NoActiveEnrollment);
        };

        let cursor = self
            .ledger
            .max_delivered_index(enrollment.id)
            .await
            .map_err(Error::Ledger)?;
        let next = cursor.map_or(0, |i| i + 1);

        let item = self
            .ledger
            .item_at_ordinal(enrollment.course_id, next)
            .await
            .map_err(Error::Ledger)?;
        match item {
            Some(item) => {
                let send = self.deliver(phone, &item, false).await;
                let now = now_utc();
                if next > 0 {
                    self.ledger
                        .record_response(enrollment.id, next - 1, now)
                        .await
                        .map_err(Error::Ledger)?;
                }
                self.ledger
                    .record_delivery(enrollment.id, next, now)
                    .await
                    .map_err(Error::Ledger)?;
                info!(
                    enrollment_id = enrollment.id,
                    index = next,
                    item_id = item.id,
                    "delivered course item"
                );
                Ok(AdvanceOutcome::Delivered {
                    enrollment_id: enrollment.id,
                    index: next,
                    item,
                    send,
                })
            }
            None => {
                let send = self.transport.send(phone, COMPLETION_MESSAGE).await;
                let now = now_utc();
                self.ledger
                    .complete_enrollment(enrollment.id, now)
                    .await
                    .map_err(Error::Ledger)?;
                if next > 0 {
                    self.ledger
                        .record_response(enrollment.id, next - 1, now)
                        .await
                        .map_err(Error::Ledger)?;
                }
                info!(enrollment_id = enrollment.id, "enrollment completed");
                Ok(AdvanceOutcome::Completed {
                    enrollment_id: enrollment.id,
                    send,
                })
            }
        }
    }

    /// Enroll a phone number into a course and deliver the first item.
    ///
    /// The enrollment row is created before the first-item lookup, so
    /// enrolling into an empty course leaves an active enrollment behind and
    /// returns [`Error::NoItemsInCourse`] with no ledger write. Transport
    /// failure does not roll anything back; the receipt carries the outcome.
    pub async fn enroll(
        &self,
        tenant_id: i64,
        phone: &str,
        name: Option<&str>,
        course_id: i64,
        with_start_button: bool,
    ) -> Result<EnrollReceipt, Error> {
        let participant = self
            .ledger
            .find_or_create_participant(tenant_id, phone, name)
            .await
            .map_err(Error::Ledger)?;
        let enrollment = self
            .ledger
            .create_enrollment(participant.id, course_id, tenant_id, now_utc())
            .await
            .map_err(Error::Ledger)?;

        let item = self
            .ledger
            .item_at_ordinal(course_id, 0)
            .await
            .map_err(Error::Ledger)?
            .ok_or(Error::NoItemsInCourse(course_id))?;

        let send = self.deliver(phone, &item, with_start_button).await;
        if let SendOutcome::Failed(reason) = &send {
            warn!(
                enrollment_id = enrollment.id,
                %reason,
                "first item send failed, recording delivery anyway"
            );
        }
        self.ledger
            .record_delivery(enrollment.id, 0, now_utc())
            .await
            .map_err(Error::Ledger)?;
        info!(
            enrollment_id = enrollment.id,
            participant_id = participant.id,
            course_id,
            "participant enrolled"
        );
        Ok(EnrollReceipt {
            enrollment_id: enrollment.id,
            send,
        })
    }

    async fn deliver(&self, phone: &str, item: &CourseItem, start: bool) -> SendOutcome {
        let body = content::render(item);
        if start {
            let buttons = [Button::new("accept", "Start")];
            let options = ButtonOptions {
                footer: Some(START_FOOTER.to_string()),
            };
            self.transport
                .send_with_buttons(phone, &body, &buttons, &options)
                .await
        } else if self.next_button {
            let buttons = [Button::new("next", "Next")];
            let options = ButtonOptions {
                footer: Some(NEXT_FOOTER.to_string()),
            };
            self.transport
                .send_with_buttons(phone, &body, &buttons, &options)
                .await
        } else {
            self.transport.send(phone, &body).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::ledger::{SqliteLedger, memory_pool};
    use crate::model::{Course, DeliveryLogEntry, EnrollmentStatus};

    /// Transport stub that records every send and answers with a fixed
    /// outcome.
    struct StubTransport {
        outcome: SendOutcome,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl StubTransport {
        fn new(outcome: SendOutcome) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Transport for StubTransport {
        async fn send(&self, phone: &str, body: &str) -> SendOutcome {
            self.sent
                .lock()
                .unwrap()
                .push((phone.to_string(), body.to_string()));
            self.outcome.clone()
        }

        async fn send_with_buttons(
            &self,
            phone: &str,
            body: &str,
            _buttons: &[Button],
            _options: &ButtonOptions,
        ) -> SendOutcome {
            self.send(phone, body).await
        }
    }

    const PHONE: &str = "15550001111";

    async fn course_with_items(ledger: &SqliteLedger, n: usize) -> Course {
        let course = ledger
            .create_course(1, "Onboarding", None, 70)
            .await
            .unwrap();
        for i in 0..n {
            ledger
                .add_item(
                    &course,
                    "text",
                    &format!("lesson {i}"),
                    Some(&format!("Lesson {i} content")),
                    None,
                    true,
                    None,
                )
                .await
                .unwrap();
        }
        course
    }

    async fn log_rows(ledger: &SqliteLedger, enrollment_id: i64) -> Vec<DeliveryLogEntry> {
        sqlx::query_as::<_, DeliveryLogEntry>(
            "SELECT enrollment_id, item_index, delivered_at, user_responded_at \
             FROM delivery_log WHERE enrollment_id = ? ORDER BY item_index",
        )
        .bind(enrollment_id)
        .fetch_all(ledger.pool())
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn enroll_delivers_first_item_once() {
        let ledger = Arc::new(SqliteLedger::new(memory_pool().await));
        let course = course_with_items(&ledger, 3).await;
        let transport = StubTransport::new(SendOutcome::Delivered);
        let engine = Engine::new(ledger.clone(), transport.clone());

        let receipt = engine
            .enroll(1, PHONE, Some("Ana"), course.id, false)
            .await
            .unwrap();
        assert_eq!(receipt.send, SendOutcome::Delivered);

        let rows = log_rows(&ledger, receipt.enrollment_id).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].item_index, 0);
        assert!(rows[0].user_responded_at.is_none());
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(transport.sent()[0].1, "Lesson 0 content");
    }

    #[tokio::test]
    async fn enroll_into_empty_course_fails_without_ledger_write() {
        let ledger = Arc::new(SqliteLedger::new(memory_pool().await));
        let course = course_with_items(&ledger, 0).await;
        let transport = StubTransport::new(SendOutcome::Delivered);
        let engine = Engine::new(ledger.clone(), transport.clone());

        let err = engine.enroll(1, PHONE, None, course.id, false).await;
        assert!(matches!(err, Err(Error::NoItemsInCourse(_))));
        assert!(transport.sent().is_empty());

        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM delivery_log")
            .fetch_one(ledger.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn full_course_walk_to_completion() {
        let ledger = Arc::new(SqliteLedger::new(memory_pool().await));
        let course = course_with_items(&ledger, 3).await;
        let transport = StubTransport::new(SendOutcome::Delivered);
        let engine = Engine::new(ledger.clone(), transport.clone());

        let receipt = engine.enroll(1, PHONE, None, course.id, false).await.unwrap();
        let eid = receipt.enrollment_id;

        // "next": index 0 marked responded, ordinal 1 delivered
        match engine.advance(PHONE).await.unwrap() {
            AdvanceOutcome::Delivered { index, ref item, .. } => {
                assert_eq!(index, 1);
                assert_eq!(item.title, "lesson 1");
            }
            other => panic!("expected Delivered, got {other:?}"),
        }
        let rows = log_rows(&ledger, eid).await;
        assert_eq!(rows.len(), 2);
        assert!(rows[0].user_responded_at.is_some());
        assert!(rows[1].user_responded_at.is_none());

        // "ok": ordinal 2 delivered
        match engine.advance(PHONE).await.unwrap() {
            AdvanceOutcome::Delivered { index, .. } => assert_eq!(index, 2),
            other => panic!("expected Delivered, got {other:?}"),
        }

        // "siguiente": no ordinal 3, enrollment completes
        match engine.advance(PHONE).await.unwrap() {
            AdvanceOutcome::Completed { enrollment_id, .. } => assert_eq!(enrollment_id, eid),
            other => panic!("expected Completed, got {other:?}"),
        }

        let status = sqlx::query_scalar::<_, EnrollmentStatus>(
            "SELECT status FROM enrollments WHERE id = ?",
        )
        .bind(eid)
        .fetch_one(ledger.pool())
        .await
        .unwrap();
        assert_eq!(status, EnrollmentStatus::Completed);

        // responded indices are strictly increasing from 0 with no holes
        let rows = log_rows(&ledger, eid).await;
        let responded: Vec<i64> = rows
            .iter()
            .filter(|r| r.user_responded_at.is_some())
            .map(|r| r.item_index)
            .collect();
        assert_eq!(responded, vec![0, 1, 2]);

        // a further advance finds no active enrollment
        match engine.advance(PHONE).await.unwrap() {
            AdvanceOutcome::NoActiveEnrollment => {}
            other => panic!("expected NoActiveEnrollment, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn advance_without_enrollment_sends_notice_and_writes_nothing() {
        let ledger = Arc::new(SqliteLedger::new(memory_pool().await));
        let transport = StubTransport::new(SendOutcome::Delivered);
        let engine = Engine::new(ledger.clone(), transport.clone());

        match engine.advance(PHONE).await.unwrap() {
            AdvanceOutcome::NoActiveEnrollment => {}
            other => panic!("expected NoActiveEnrollment, got {other:?}"),
        }
        assert_eq!(transport.sent().len(), 1);
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM delivery_log")
            .fetch_one(ledger.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    /// Delegating ledger that pins the cursor, standing in for two advances
    /// that both read the same state before either writes.
    struct StaleCursorLedger {
        inner: Arc<SqliteLedger>,
        cursor: Option<i64>,
    }

    #[async_trait::async_trait]
    impl Ledger for StaleCursorLedger {
        async fn find_active_enrollment(
            &self,
            phone: &str,
        ) -> anyhow::Result<Option<crate::model::Enrollment>> {
            self.inner.find_active_enrollment(phone).await
        }
        async fn max_delivered_index(&self, _enrollment_id: i64) -> anyhow::Result<Option<i64>> {
            Ok(self.cursor)
        }
        async fn max_responded_index(&self, enrollment_id: i64) -> anyhow::Result<Option<i64>> {
            self.inner.max_responded_index(enrollment_id).await
        }
        async fn item_at_ordinal(
            &self,
            course_id: i64,
            ordinal: i64,
        ) -> anyhow::Result<Option<CourseItem>> {
            self.inner.item_at_ordinal(course_id, ordinal).await
        }
        async fn record_delivery(
            &self,
            enrollment_id: i64,
            index: i64,
            delivered_at: time::OffsetDateTime,
        ) -> anyhow::Result<()> {
            self.inner.record_delivery(enrollment_id, index, delivered_at).await
        }
        async fn record_response(
            &self,
            enrollment_id: i64,
            index: i64,
            responded_at: time::OffsetDateTime,
        ) -> anyhow::Result<()> {
            self.inner.record_response(enrollment_id, index, responded_at).await
        }
        async fn complete_enrollment(
            &self,
            enrollment_id: i64,
            completed_at: time::OffsetDateTime,
        ) -> anyhow::Result<()> {
            self.inner.complete_enrollment(enrollment_id, completed_at).await
        }
        async fn find_or_create_participant(
            &self,
            tenant_id: i64,
            phone: &str,
            name: Option<&str>,
        ) -> anyhow::Result<crate::model::Participant> {
            self.inner.find_or_create_participant(tenant_id, phone, name).await
        }
        async fn create_enrollment(
            &self,
            participant_id: i64,
            course_id: i64,
            tenant_id: i64,
            enrolled_at: time::OffsetDateTime,
        ) -> anyhow::Result<crate::model::Enrollment> {
            self.inner
                .create_enrollment(participant_id, course_id, tenant_id, enrolled_at)
                .await
        }
    }

    #[tokio::test]
    async fn duplicate_advance_keeps_single_row_per_index() {
        let sqlite = Arc::new(SqliteLedger::new(memory_pool().await));
        let course = course_with_items(&sqlite, 3).await;
        let transport = StubTransport::new(SendOutcome::Delivered);

        let engine = Engine::new(sqlite.clone(), transport.clone());
        let receipt = engine.enroll(1, PHONE, None, course.id, false).await.unwrap();
        let eid = receipt.enrollment_id;

        // both duplicate webhook deliveries observe cursor = 0
        let stale = Arc::new(StaleCursorLedger {
            inner: sqlite.clone(),
            cursor: Some(0),
        });
        let racing = Engine::new(stale, transport.clone());
        racing.advance(PHONE).await.unwrap();
        racing.advance(PHONE).await.unwrap();

        // the item was re-sent (at-least-once) but the ledger holds one row
        assert_eq!(transport.sent().len(), 3);
        let rows = log_rows(&sqlite, eid).await;
        let indices: Vec<i64> = rows.iter().map(|r| r.item_index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[tokio::test]
    async fn transport_failure_still_records_delivery() {
        let ledger = Arc::new(SqliteLedger::new(memory_pool().await));
        let course = course_with_items(&ledger, 3).await;
        let transport = StubTransport::new(SendOutcome::Failed("boom".into()));
        let engine = Engine::new(ledger.clone(), transport.clone());

        let receipt = engine.enroll(1, PHONE, None, course.id, false).await.unwrap();
        assert!(matches!(receipt.send, SendOutcome::Failed(_)));

        match engine.advance(PHONE).await.unwrap() {
            AdvanceOutcome::Delivered { index, send, .. } => {
                assert_eq!(index, 1);
                assert!(matches!(send, SendOutcome::Failed(_)));
            }
            other => panic!("expected Delivered, got {other:?}"),
        }
        let rows = log_rows(&ledger, receipt.enrollment_id).await;
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.item_index == 0 || r.item_index == 1));
    }

    #[tokio::test]
    async fn simulated_send_counts_as_sent() {
        let ledger = Arc::new(SqliteLedger::new(memory_pool().await));
        let course = course_with_items(&ledger, 1).await;
        let transport = StubTransport::new(SendOutcome::Simulated);
        let engine = Engine::new(ledger.clone(), transport.clone());

        let receipt = engine.enroll(1, PHONE, None, course.id, true).await.unwrap();
        assert_eq!(receipt.send, SendOutcome::Simulated);
        assert!(receipt.send.is_sent());
        assert_eq!(log_rows(&ledger, receipt.enrollment_id).await.len(), 1);
    }
}
