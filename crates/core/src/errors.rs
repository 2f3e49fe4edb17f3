use thiserror::Error;

use crate::domain::entity::{EntityRecord, EntityType, Operation};
use crate::domain::execution::{ExecutionResult, ExecutionStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseFailureReason {
    Unrecognized,
    InvalidEnumValue,
    LowConfidence,
    ProviderUnavailable,
}

impl ParseFailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unrecognized => "unrecognized",
            Self::InvalidEnumValue => "invalid_enum_value",
            Self::LowConfidence => "low_confidence",
            Self::ProviderUnavailable => "provider_unavailable",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("could not parse request ({}): {detail}", reason.as_str())]
pub struct ParseFailure {
    pub reason: ParseFailureReason,
    pub detail: String,
    pub operation: Option<Operation>,
    pub entity_type: Option<EntityType>,
}

impl ParseFailure {
    pub fn new(reason: ParseFailureReason, detail: impl Into<String>) -> Self {
        Self { reason, detail: detail.into(), operation: None, entity_type: None }
    }

    pub fn unrecognized(detail: impl Into<String>) -> Self {
        Self::new(ParseFailureReason::Unrecognized, detail)
    }

    pub fn invalid_enum_value(detail: impl Into<String>) -> Self {
        Self::new(ParseFailureReason::InvalidEnumValue, detail)
    }

    pub fn scoped(mut self, operation: Option<Operation>, entity_type: Option<EntityType>) -> Self {
        self.operation = operation;
        self.entity_type = entity_type;
        self
    }

    pub fn status(&self) -> ExecutionStatus {
        match self.reason {
            ParseFailureReason::Unrecognized
            | ParseFailureReason::InvalidEnumValue
            | ParseFailureReason::LowConfidence => ExecutionStatus::ValidationError,
            ParseFailureReason::ProviderUnavailable => ExecutionStatus::TransientError,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResolutionFailure {
    #[error("no {entity_type} matched {criteria}")]
    NotFound { entity_type: EntityType, criteria: String },
    #[error("{} {entity_type} records matched {criteria}", candidates.len())]
    AmbiguousMatch { entity_type: EntityType, criteria: String, candidates: Vec<EntityRecord> },
    #[error("no identifier or search values were given to locate the {entity_type}")]
    MissingCriteria { entity_type: EntityType },
    #[error("search for {entity_type} failed: {detail}")]
    Backend { entity_type: EntityType, status: ExecutionStatus, detail: String, attempts: u32 },
}

impl ResolutionFailure {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::NotFound { .. } => ExecutionStatus::NotFound,
            Self::AmbiguousMatch { .. } => ExecutionStatus::AmbiguousMatch,
            Self::MissingCriteria { .. } => ExecutionStatus::ValidationError,
            Self::Backend { status, .. } => *status,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::NotFound { .. } | Self::AmbiguousMatch { .. } => 1,
            Self::MissingCriteria { .. } => 0,
            Self::Backend { attempts, .. } => *attempts,
        }
    }
}

/// A failure that stopped a run before the executor could be called with a complete intent.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StageFailure {
    #[error(transparent)]
    Parse(#[from] ParseFailure),
    #[error(transparent)]
    Resolution(#[from] ResolutionFailure),
}

impl StageFailure {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::Parse(failure) => failure.status(),
            Self::Resolution(failure) => failure.status(),
        }
    }

    /// The ExecutionResult a run records when it never reached the backend mutation.
    pub fn into_execution_result(
        self,
        operation: Option<Operation>,
        entity_type: Option<EntityType>,
    ) -> ExecutionResult {
        let status = self.status();
        match self {
            Self::Parse(failure) => ExecutionResult::failure(
                failure.operation.or(operation),
                failure.entity_type.or(entity_type),
                status,
                failure.to_string(),
                0,
            ),
            Self::Resolution(failure) => {
                let attempts = failure.attempts();
                let detail = failure.to_string();
                let candidates = match failure {
                    ResolutionFailure::AmbiguousMatch { candidates, .. } => candidates,
                    _ => Vec::new(),
                };
                ExecutionResult::failure(operation, entity_type, status, detail, attempts)
                    .with_candidates(candidates)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::entity::{EntityRecord, EntityType, FieldSet, Operation};
    use crate::domain::execution::ExecutionStatus;
    use crate::errors::{ParseFailure, ParseFailureReason, ResolutionFailure, StageFailure};

    #[test]
    fn parse_failures_never_count_as_backend_attempts() {
        let failure = StageFailure::from(
            ParseFailure::invalid_enum_value("dealstage `closed won` is not a known stage")
                .scoped(Some(Operation::Update), Some(EntityType::Deal)),
        );
        let result = failure.into_execution_result(None, None);

        assert_eq!(result.status, ExecutionStatus::ValidationError);
        assert_eq!(result.attempts, 0);
        assert_eq!(result.operation, Some(Operation::Update));
        assert_eq!(result.entity_type, Some(EntityType::Deal));
        assert!(result.error_detail.unwrap_or_default().contains("closed won"));
    }

    #[test]
    fn provider_outage_maps_to_transient_status() {
        let failure = ParseFailure::new(ParseFailureReason::ProviderUnavailable, "timeout");
        assert_eq!(failure.status(), ExecutionStatus::TransientError);
    }

    #[test]
    fn ambiguous_resolution_keeps_every_candidate() {
        let candidates = vec![
            EntityRecord::new("101", EntityType::Contact, FieldSet::new()),
            EntityRecord::new("102", EntityType::Contact, FieldSet::new()),
        ];
        let failure = StageFailure::from(ResolutionFailure::AmbiguousMatch {
            entity_type: EntityType::Contact,
            criteria: "firstname=Jane".to_string(),
            candidates,
        });
        let result =
            failure.into_execution_result(Some(Operation::Delete), Some(EntityType::Contact));

        assert_eq!(result.status, ExecutionStatus::AmbiguousMatch);
        assert_eq!(result.candidates.len(), 2);
        assert_eq!(
            result.error_detail.as_deref(),
            Some("2 contact records matched firstname=Jane")
        );
    }
}
