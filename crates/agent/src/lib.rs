//! Query pipeline runtime.
//!
//! Turns one free-text CRM request into a backend call, a notification and a reply:
//!
//! 1. **Parsing** (`parser`) - free text to a typed `Intent` via a `LanguageProvider`
//! 2. **Resolution** (`resolver`) - search criteria to exactly one record ID
//! 3. **Execution** (`executor`) - guarded, retried backend call producing an `ExecutionResult`
//! 4. **Notification** (`composer`) - templated message handed to the transport
//! 5. **Orchestration** (`runtime`) - `PipelineController` drives the state machine
//!
//! The language model only extracts. Vocabulary checks, record resolution and failure
//! classification are deterministic.

pub mod composer;
pub mod executor;
pub mod guardrails;
pub mod llm;
pub mod parser;
pub mod resolver;
pub mod runtime;

pub use composer::{ComposeError, DeliveryOutcome, NotificationComposer};
pub use executor::OperationExecutor;
pub use guardrails::{GuardrailDecision, GuardrailPolicy};
pub use llm::{ChatCompletionsClient, LlmClient, ProviderError};
pub use parser::{
    AssociationExtraction, Extraction, IntentParser, KeywordProvider, LanguageProvider,
    ModelProvider,
};
pub use resolver::EntityResolver;
pub use runtime::{PipelineController, PipelineReport};
