use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

pub type BillingResult<T> = Result<T, BillingError>;

/// Failures surfaced to the caller of a billing operation.
///
/// Document rendering and notification failures are not listed here; they are
/// reported through [`DispatchError`] and only ever logged.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("{0}")]
    Validation(String),

    #[error("A bill already exists for room {room_id}, tenant {tenant_id} and month {billing_month}.")]
    DuplicateBill {
        room_id: Uuid,
        tenant_id: Uuid,
        billing_month: NaiveDate,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyPaid(String),

    #[error("{0}")]
    Dependency(String),

    #[error("{0}")]
    Internal(String),
}

impl BillingError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::DuplicateBill { .. } => "duplicate_bill",
            Self::NotFound(_) => "not_found",
            Self::AlreadyPaid(_) => "already_paid",
            Self::Dependency(_) => "dependency",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<validator::ValidationErrors> for BillingError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(format!("Validation failed: {errors}"))
    }
}

/// Failure of a best-effort side effect (document render or notification).
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("document rendering failed: {0}")]
    Render(String),

    #[error("notification queue failed: {0}")]
    Queue(String),

    #[error("document storage failed: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::BillingError;

    #[test]
    fn duplicate_bill_message_names_the_triple() {
        let room_id = uuid::Uuid::nil();
        let tenant_id = uuid::Uuid::nil();
        let error = BillingError::DuplicateBill {
            room_id,
            tenant_id,
            billing_month: chrono::NaiveDate::from_ymd_opt(2026, 4, 1).expect("valid date"),
        };
        assert_eq!(error.kind(), "duplicate_bill");
        assert!(error.to_string().contains("2026-04-01"));
    }
}
