pub mod audit;
pub mod config;
pub mod crm;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod notify;
pub mod retry;

pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, NoopAuditSink};
pub use crm::{BackendError, CrmBackend};
pub use domain::entity::{
    AssociationTarget, DealStage, EntityRecord, EntityType, FieldName, FieldSet, ObjectId,
    Operation, PropertyDefinition,
};
pub use domain::execution::{ExecutionResult, ExecutionStatus};
pub use domain::intent::Intent;
pub use domain::notification::{NotificationKind, NotificationRequest};
pub use errors::{ParseFailure, ParseFailureReason, ResolutionFailure, StageFailure};
pub use flows::{FlowEngine, FlowTransitionError, PipelineState};
pub use notify::{NotificationTransport, TransportError};
pub use retry::{RetryPolicy, RetryableError};
