use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{
    PipelineAction, PipelineContext, PipelineEvent, PipelineState, TransitionOutcome,
};

pub trait FlowDefinition {
    fn initial_state(&self) -> PipelineState;
    fn transition(
        &self,
        current: &PipelineState,
        event: &PipelineEvent,
        context: &PipelineContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// The query pipeline: parse, optionally resolve, execute, notify, respond.
#[derive(Clone, Debug, Default)]
pub struct QueryPipelineFlow;

impl FlowDefinition for QueryPipelineFlow {
    fn initial_state(&self) -> PipelineState {
        PipelineState::Received
    }

    fn transition(
        &self,
        current: &PipelineState,
        event: &PipelineEvent,
        context: &PipelineContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_query_pipeline(current, event, context)
    }
}

#[derive(Clone, Debug)]
pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> PipelineState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &PipelineState,
        event: &PipelineEvent,
        context: &PipelineContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &PipelineState,
        event: &PipelineEvent,
        context: &PipelineContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        AuditOutcome::Success,
                    )
                    .with_detail("from", outcome.from.as_str())
                    .with_detail("to", outcome.to.as_str())
                    .with_detail("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        AuditOutcome::Rejected,
                    )
                    .with_detail("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<QueryPipelineFlow> {
    fn default() -> Self {
        Self::new(QueryPipelineFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("run in state {state:?} needs entity resolution before execution")]
    ResolutionSkipped { state: PipelineState },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: PipelineState, event: PipelineEvent },
}

fn transition_query_pipeline(
    current: &PipelineState,
    event: &PipelineEvent,
    context: &PipelineContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use PipelineAction::{
        ComposeNotification, ExecuteOperation, RecordFailure, ResolveEntity, SynthesizeResponse,
    };
    use PipelineEvent::{
        ExecutionRecorded, NotificationAttempted, ParseFailed, ParseSucceeded, ResolutionFailed,
        ResolutionSucceeded, ResponseSent,
    };
    use PipelineState::{Errored, Executed, Notified, Parsed, Received, Resolved, Responded};

    let (to, actions) = match (current, event) {
        (Received, ParseSucceeded) => {
            let next = if context.needs_resolution { ResolveEntity } else { ExecuteOperation };
            (Parsed, vec![next])
        }
        (Received, ParseFailed) => (Errored, vec![RecordFailure]),
        (Parsed, ResolutionSucceeded) if context.needs_resolution => {
            (Resolved, vec![ExecuteOperation])
        }
        (Parsed, ResolutionFailed) if context.needs_resolution => (Errored, vec![RecordFailure]),
        (Parsed, ExecutionRecorded) if context.needs_resolution => {
            return Err(FlowTransitionError::ResolutionSkipped { state: *current });
        }
        (Parsed, ExecutionRecorded) | (Resolved, ExecutionRecorded) => {
            (Executed, vec![ComposeNotification])
        }
        (Errored, ExecutionRecorded) => (Executed, vec![ComposeNotification]),
        (Executed, NotificationAttempted) => (Notified, vec![SynthesizeResponse]),
        (Notified, ResponseSent) => (Responded, Vec::new()),
        _ => {
            return Err(FlowTransitionError::InvalidTransition { state: *current, event: *event });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, actions })
}
