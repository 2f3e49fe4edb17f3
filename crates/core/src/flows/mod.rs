pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, QueryPipelineFlow};
pub use states::{
    PipelineAction, PipelineContext, PipelineEvent, PipelineState, TransitionOutcome,
};
