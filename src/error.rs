// Error taxonomy for the registration core
//
// Validation and duplicate-ID failures are recoverable by the caller.
// Storage failures abort the current transition. Notification failures are
// advisory and never leave the notify module as a workflow error.

use thiserror::Error;

/// One failing applicant field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: &str) -> Self {
        FieldError {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Invalid applicant data: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("Member ID already registered: {0}")]
    DuplicateId(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Admin notification failed: {0}")]
    NotificationFailure(String),

    #[error("Cannot {action} while registration is {state}")]
    InvalidTransition { state: String, action: String },
}

impl RegistryError {
    /// Message suitable for showing to the applicant
    pub fn user_message(&self) -> String {
        match self {
            RegistryError::Validation(fields) => format!(
                "Please fill in all required fields: {}",
                fields
                    .iter()
                    .map(|f| f.field.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            RegistryError::DuplicateId(_) | RegistryError::StorageUnavailable(_) => {
                "Payment could not be completed. Please try again.".to_string()
            }
            RegistryError::NotificationFailure(_) => {
                "Registration complete. The admin notification may be delayed.".to_string()
            }
            RegistryError::InvalidTransition { .. } => self.to_string(),
        }
    }

    /// Whether retrying the same step can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegistryError::DuplicateId(_) | RegistryError::StorageUnavailable(_)
        )
    }
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<rusqlite::Error> for RegistryError {
    fn from(err: rusqlite::Error) -> Self {
        RegistryError::StorageUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::StorageUnavailable(format!("corrupt stored value: {}", err))
    }
}

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_lists_fields() {
        let err = RegistryError::Validation(vec![
            FieldError::new("full_name", "Required field is empty"),
            FieldError::new("custom_ministry", "Please specify your ministry"),
        ]);

        assert_eq!(
            err.to_string(),
            "Invalid applicant data: full_name: Required field is empty; custom_ministry: Please specify your ministry"
        );
        assert_eq!(
            err.user_message(),
            "Please fill in all required fields: full_name, custom_ministry"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_storage_errors_are_retryable() {
        let err: RegistryError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, RegistryError::StorageUnavailable(_)));
        assert!(err.is_retryable());
        assert!(RegistryError::DuplicateId("SGC-0001".to_string()).is_retryable());
    }
}
