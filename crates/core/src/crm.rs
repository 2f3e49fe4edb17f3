use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entity::{EntityRecord, EntityType, FieldSet, ObjectId, PropertyDefinition};
use crate::domain::execution::ExecutionStatus;
use crate::retry::RetryableError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("CRM responded with HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("CRM call timed out")]
    Timeout,
    #[error("CRM transport failure: {0}")]
    Transport(String),
    #[error("CRM response could not be decoded: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http { status, message: message.into() }
    }

    /// 429, 5xx, timeouts and connection failures may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || (500..=599).contains(status),
            Self::Timeout | Self::Transport(_) => true,
            Self::Decode(_) => false,
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::Http { status: 401 | 403, .. } => ExecutionStatus::AuthError,
            Self::Http { status: 400, .. } => ExecutionStatus::ValidationError,
            Self::Http { status: 404, .. } => ExecutionStatus::NotFound,
            error if error.is_transient() => ExecutionStatus::TransientError,
            _ => ExecutionStatus::UnknownError,
        }
    }

    /// Text surfaced to the user. Validation messages are passed through verbatim.
    pub fn detail(&self) -> String {
        match self {
            Self::Http { status: 400, message } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl RetryableError for BackendError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }

    fn timed_out() -> Self {
        Self::Timeout
    }
}

/// CRM object API consumed by the resolver and executor.
#[async_trait]
pub trait CrmBackend: Send + Sync {
    async fn create_record(
        &self,
        entity_type: EntityType,
        fields: &FieldSet,
    ) -> Result<EntityRecord, BackendError>;

    async fn update_record(
        &self,
        entity_type: EntityType,
        id: &ObjectId,
        fields: &FieldSet,
    ) -> Result<EntityRecord, BackendError>;

    async fn delete_record(&self, entity_type: EntityType, id: &ObjectId)
        -> Result<(), BackendError>;

    /// Equality search on every criterion (AND).
    async fn search(
        &self,
        entity_type: EntityType,
        criteria: &FieldSet,
    ) -> Result<Vec<EntityRecord>, BackendError>;

    async fn get_record(
        &self,
        entity_type: EntityType,
        id: &ObjectId,
    ) -> Result<EntityRecord, BackendError>;

    /// Links two records with the CRM's default association label.
    async fn associate(
        &self,
        from_type: EntityType,
        from_id: &ObjectId,
        to_type: EntityType,
        to_id: &ObjectId,
    ) -> Result<(), BackendError>;

    async fn list_properties(
        &self,
        entity_type: EntityType,
    ) -> Result<Vec<PropertyDefinition>, BackendError>;
}
