use thiserror::Error;

/// Failure of the underlying key-value store or of (de)serializing a collection.
///
/// Read, write, quota and corruption failures all surface as this one kind; the
/// message carries the cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StorageError {
    message: String,
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn read(cause: impl std::fmt::Display) -> Self {
        Self::new(format!("Failed to read from storage: {cause}"))
    }

    pub fn write(cause: impl std::fmt::Display) -> Self {
        Self::new(format!("Failed to write to storage: {cause}"))
    }

    pub fn clear(cause: impl std::fmt::Display) -> Self {
        Self::new(format!("Failed to clear storage: {cause}"))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Company with id {0} not found")]
    CompanyNotFound(String),

    #[error("Application with id {0} not found")]
    ApplicationNotFound(String),

    #[error("Contact with id {0} not found")]
    ContactNotFound(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_messages() {
        assert_eq!(
            StorageError::read("disk gone").to_string(),
            "Failed to read from storage: disk gone"
        );
        assert_eq!(
            StorageError::write("quota exceeded").message(),
            "Failed to write to storage: quota exceeded"
        );
    }

    #[test]
    fn test_service_error_wraps_storage_verbatim() {
        let err: ServiceError = StorageError::clear("locked").into();
        assert_eq!(err.to_string(), "Failed to clear storage: locked");
    }

    #[test]
    fn test_not_found_carries_id() {
        let err = ServiceError::ContactNotFound("c-42".to_string());
        assert!(err.to_string().contains("c-42"));
    }
}
