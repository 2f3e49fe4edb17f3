use serde::{Deserialize, Serialize};

use crate::domain::entity::{EntityRecord, EntityType, ObjectId, Operation, PropertyDefinition};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    NotFound,
    AmbiguousMatch,
    ValidationError,
    AuthError,
    TransientError,
    UnknownError,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NotFound => "not_found",
            Self::AmbiguousMatch => "ambiguous_match",
            Self::ValidationError => "validation_error",
            Self::AuthError => "auth_error",
            Self::TransientError => "transient_error",
            Self::UnknownError => "unknown_error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// What the user should do next, per failure class.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::Success => None,
            Self::AuthError => Some("Check the CRM access token and its scopes."),
            Self::ValidationError => Some("Check the field names and value formats."),
            Self::AmbiguousMatch => {
                Some("Narrow the search or repeat the request with one of the IDs listed.")
            }
            Self::NotFound => Some("Verify the record ID or the search values."),
            Self::TransientError => Some("The CRM is busy or unreachable; retry in a moment."),
            Self::UnknownError => Some("Inspect the CRM response details and logs."),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub operation: Option<Operation>,
    pub entity_type: Option<EntityType>,
    pub status: ExecutionStatus,
    pub record: Option<EntityRecord>,
    pub candidates: Vec<EntityRecord>,
    /// Property definitions returned by `Operation::ListProperties`.
    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
    pub error_detail: Option<String>,
    pub attempts: u32,
}

impl ExecutionResult {
    pub fn success(operation: Operation, record: EntityRecord, attempts: u32) -> Self {
        Self {
            operation: Some(operation),
            entity_type: Some(record.entity_type),
            status: ExecutionStatus::Success,
            record: Some(record),
            candidates: Vec::new(),
            properties: Vec::new(),
            error_detail: None,
            attempts,
        }
    }

    pub fn listing(
        operation: Operation,
        entity_type: EntityType,
        records: Vec<EntityRecord>,
        attempts: u32,
    ) -> Self {
        Self {
            operation: Some(operation),
            entity_type: Some(entity_type),
            status: ExecutionStatus::Success,
            record: records.first().cloned(),
            candidates: records,
            properties: Vec::new(),
            error_detail: None,
            attempts,
        }
    }

    pub fn property_listing(
        entity_type: EntityType,
        properties: Vec<PropertyDefinition>,
        attempts: u32,
    ) -> Self {
        Self {
            operation: Some(Operation::ListProperties),
            entity_type: Some(entity_type),
            status: ExecutionStatus::Success,
            record: None,
            candidates: Vec::new(),
            properties,
            error_detail: None,
            attempts,
        }
    }

    /// Operation and entity type are optional because a query that failed to parse may
    /// not have produced either.
    pub fn failure(
        operation: impl Into<Option<Operation>>,
        entity_type: impl Into<Option<EntityType>>,
        status: ExecutionStatus,
        detail: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            operation: operation.into(),
            entity_type: entity_type.into(),
            status,
            record: None,
            candidates: Vec::new(),
            properties: Vec::new(),
            error_detail: Some(detail.into()),
            attempts,
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<EntityRecord>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn object_id(&self) -> Option<&ObjectId> {
        self.record.as_ref().map(|record| &record.id)
    }

    /// True when the backend was never asked to do anything for this run.
    pub fn backend_untouched(&self) -> bool {
        self.attempts == 0
    }
}
