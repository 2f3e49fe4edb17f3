use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    Received,
    Parsed,
    Resolved,
    Executed,
    Notified,
    Responded,
    Errored,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Parsed => "parsed",
            Self::Resolved => "resolved",
            Self::Executed => "executed",
            Self::Notified => "notified",
            Self::Responded => "responded",
            Self::Errored => "errored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Responded)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineEvent {
    ParseSucceeded,
    ParseFailed,
    ResolutionSucceeded,
    ResolutionFailed,
    ExecutionRecorded,
    NotificationAttempted,
    ResponseSent,
}

/// Facts about the run that the transition function needs but cannot derive from state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PipelineContext {
    pub needs_resolution: bool,
}

impl PipelineContext {
    pub fn new(needs_resolution: bool) -> Self {
        Self { needs_resolution }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineAction {
    ResolveEntity,
    ExecuteOperation,
    RecordFailure,
    ComposeNotification,
    SynthesizeResponse,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: PipelineState,
    pub to: PipelineState,
    pub event: PipelineEvent,
    pub actions: Vec<PipelineAction>,
}
