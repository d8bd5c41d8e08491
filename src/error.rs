#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("course {0} has no items")]
    NoItemsInCourse(i64),
    #[error("ledger operation failed: {0}")]
    Ledger(#[source] anyhow::Error),
}
