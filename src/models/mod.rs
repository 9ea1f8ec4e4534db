pub mod call;
pub mod chat_message;
pub mod customer;
pub mod summary;
pub mod transcript;
pub mod user;

pub use call::{Call, CallStatus, CallType};
pub use chat_message::ChatMessage;
pub use customer::Customer;
pub use summary::{Summary, SummaryContent};
pub use transcript::Transcript;
pub use user::User;

/// True when the error came from a unique constraint in the database.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db)) => db.is_unique_violation(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_database_errors_are_unique_violations() {
        assert!(!is_unique_violation(&anyhow::anyhow!("boom")));
        assert!(!is_unique_violation(&anyhow::Error::from(
            sqlx::Error::RowNotFound
        )));
    }
}
