use std::sync::Arc;

use crmflow_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crmflow_core::crm::CrmBackend;
use crmflow_core::domain::execution::ExecutionResult;
use crmflow_core::domain::intent::Intent;
use crmflow_core::domain::notification::NotificationRequest;
use crmflow_core::errors::StageFailure;
use crmflow_core::flows::{
    FlowEngine, FlowTransitionError, PipelineAction, PipelineContext, PipelineEvent,
    PipelineState, QueryPipelineFlow,
};
use crmflow_core::notify::NotificationTransport;
use crmflow_core::retry::RetryPolicy;
use crmflow_core::NoopAuditSink;
use uuid::Uuid;

use crate::composer::{ComposeError, DeliveryOutcome, NotificationComposer};
use crate::executor::OperationExecutor;
use crate::guardrails::GuardrailPolicy;
use crate::parser::IntentParser;
use crate::resolver::EntityResolver;

const AUDIT_COMPONENT: &str = "pipeline";

/// Everything one query produced.
#[derive(Clone, Debug)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub intent: Option<Intent>,
    pub result: ExecutionResult,
    pub notification: Option<NotificationRequest>,
    pub delivery: DeliveryOutcome,
    pub trail: Vec<PipelineState>,
    pub response: String,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }

    pub fn final_state(&self) -> Option<PipelineState> {
        self.trail.last().copied()
    }
}

struct RunState {
    audit: AuditContext,
    state: PipelineState,
    context: PipelineContext,
    trail: Vec<PipelineState>,
}

/// Owns one run at a time: parse, resolve, execute, notify, respond.
pub struct PipelineController {
    parser: IntentParser,
    resolver: EntityResolver,
    executor: OperationExecutor,
    composer: NotificationComposer,
    transport: Arc<dyn NotificationTransport>,
    audit_sink: Arc<dyn AuditSink>,
    flow: FlowEngine<QueryPipelineFlow>,
}

impl PipelineController {
    pub fn new(
        parser: IntentParser,
        resolver: EntityResolver,
        executor: OperationExecutor,
        composer: NotificationComposer,
        transport: Arc<dyn NotificationTransport>,
    ) -> Self {
        Self {
            parser,
            resolver,
            executor,
            composer,
            transport,
            audit_sink: Arc::new(NoopAuditSink),
            flow: FlowEngine::default(),
        }
    }

    /// Wires resolver and executor onto one backend with a shared retry policy.
    pub fn assemble(
        parser: IntentParser,
        backend: Arc<dyn CrmBackend>,
        transport: Arc<dyn NotificationTransport>,
        retry: RetryPolicy,
        guardrails: GuardrailPolicy,
        recipient: impl Into<String>,
    ) -> Result<Self, ComposeError> {
        let resolver = EntityResolver::new(backend.clone(), retry.clone());
        let executor = OperationExecutor::new(backend, retry, guardrails);
        let composer = NotificationComposer::new(recipient)?;
        Ok(Self::new(parser, resolver, executor, composer, transport))
    }

    pub fn with_audit_sink(mut self, audit_sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = audit_sink;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.parser.provider_name()
    }

    pub async fn handle_query(&self, query: &str) -> Result<PipelineReport, FlowTransitionError> {
        let run_id = Uuid::new_v4();
        let initial = self.flow.initial_state();
        let mut run = RunState {
            audit: AuditContext::new(run_id, AUDIT_COMPONENT),
            state: initial,
            context: PipelineContext::new(false),
            trail: vec![initial],
        };

        tracing::info!(
            event_name = "pipeline.query_received",
            correlation_id = %run_id,
            provider = self.parser.provider_name(),
            query_len = query.len(),
            "query received"
        );
        self.audit_sink.emit(
            AuditEvent::new(
                &run.audit,
                "pipeline.query_received",
                AuditCategory::Ingress,
                AuditOutcome::Success,
            )
            .with_detail("provider", self.parser.provider_name()),
        );

        let (intent, result) = match self.parser.parse(query).await {
            Ok(intent) => {
                let blocked = self.executor.preflight(&intent);
                run.context = PipelineContext::new(blocked.is_none() && intent.needs_resolution());
                let next = self.advance(&mut run, PipelineEvent::ParseSucceeded)?;
                tracing::info!(
                    event_name = "pipeline.intent_parsed",
                    correlation_id = %run_id,
                    operation = intent.operation.as_str(),
                    entity_type = intent.entity_type.as_str(),
                    needs_resolution = run.context.needs_resolution,
                    "query parsed"
                );

                match blocked {
                    Some(result) => (Some(intent), result),
                    None if next.contains(&PipelineAction::ResolveEntity) => {
                        self.resolve_and_execute(&mut run, intent).await?
                    }
                    None => {
                        let result = self.executor.execute(&intent).await;
                        (Some(intent), result)
                    }
                }
            }
            Err(failure) => {
                tracing::warn!(
                    event_name = "pipeline.parse_failed",
                    correlation_id = %run_id,
                    reason = failure.reason.as_str(),
                    detail = failure.detail.as_str(),
                    "query could not be parsed"
                );
                self.advance(&mut run, PipelineEvent::ParseFailed)?;
                (None, StageFailure::from(failure).into_execution_result(None, None))
            }
        };

        self.advance(&mut run, PipelineEvent::ExecutionRecorded)?;
        self.audit_sink.emit(
            AuditEvent::new(
                &run.audit,
                "pipeline.execution_recorded",
                AuditCategory::Backend,
                if result.is_success() { AuditOutcome::Success } else { AuditOutcome::Failed },
            )
            .with_detail("status", result.status.as_str())
            .with_detail("attempts", result.attempts.to_string()),
        );

        let (notification, delivery) = self.notify(&run, &result, intent.as_ref()).await;
        self.advance(&mut run, PipelineEvent::NotificationAttempted)?;

        let response = match self.composer.respond(&result, intent.as_ref(), &delivery) {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(
                    event_name = "pipeline.response_render_failed",
                    correlation_id = %run_id,
                    error = %error,
                    "falling back to plain response"
                );
                plain_response(&result)
            }
        };
        self.advance(&mut run, PipelineEvent::ResponseSent)?;

        tracing::info!(
            event_name = "pipeline.run_completed",
            correlation_id = %run_id,
            status = result.status.as_str(),
            attempt = result.attempts,
            notified = delivery.is_delivered(),
            "run completed"
        );

        Ok(PipelineReport {
            run_id,
            intent,
            result,
            notification,
            delivery,
            trail: run.trail,
            response,
        })
    }

    async fn resolve_and_execute(
        &self,
        run: &mut RunState,
        intent: Intent,
    ) -> Result<(Option<Intent>, ExecutionResult), FlowTransitionError> {
        let (operation, entity_type) = (intent.operation, intent.entity_type);
        let unresolved = intent.clone();
        match self.resolver.resolve(intent).await {
            Ok(resolved) => {
                self.advance(run, PipelineEvent::ResolutionSucceeded)?;
                let result = self.executor.execute(&resolved).await;
                Ok((Some(resolved), result))
            }
            Err(failure) => {
                tracing::warn!(
                    event_name = "pipeline.resolution_failed",
                    correlation_id = %run.audit.run_id,
                    entity_type = entity_type.as_str(),
                    status = failure.status().as_str(),
                    "record reference could not be resolved"
                );
                self.advance(run, PipelineEvent::ResolutionFailed)?;
                let result = StageFailure::from(failure)
                    .into_execution_result(Some(operation), Some(entity_type));
                Ok((Some(unresolved), result))
            }
        }
    }

    async fn notify(
        &self,
        run: &RunState,
        result: &ExecutionResult,
        intent: Option<&Intent>,
    ) -> (Option<NotificationRequest>, DeliveryOutcome) {
        let request = match self.composer.compose(result, intent) {
            Ok(request) => request,
            Err(error) => {
                tracing::warn!(
                    event_name = "pipeline.notification_failed",
                    correlation_id = %run.audit.run_id,
                    error = %error,
                    "notification could not be rendered"
                );
                return (None, DeliveryOutcome::Failed { reason: error.to_string() });
            }
        };

        let delivery =
            match self.transport.send(&request.recipient, &request.subject, &request.body).await {
                Ok(()) => {
                    tracing::info!(
                        event_name = "pipeline.notification_sent",
                        correlation_id = %run.audit.run_id,
                        kind = request.kind.as_str(),
                        "notification delivered"
                    );
                    DeliveryOutcome::Delivered { recipient: request.recipient.clone() }
                }
                Err(error) => {
                    tracing::warn!(
                        event_name = "pipeline.notification_failed",
                        correlation_id = %run.audit.run_id,
                        kind = request.kind.as_str(),
                        error = %error,
                        "notification delivery failed"
                    );
                    DeliveryOutcome::Failed { reason: error.to_string() }
                }
            };

        self.audit_sink.emit(
            AuditEvent::new(
                &run.audit,
                "notification.dispatched",
                AuditCategory::Notification,
                if delivery.is_delivered() { AuditOutcome::Success } else { AuditOutcome::Failed },
            )
            .with_detail("kind", request.kind.as_str()),
        );
        (Some(request), delivery)
    }

    /// Applies `event` and returns the actions the flow schedules next.
    fn advance(
        &self,
        run: &mut RunState,
        event: PipelineEvent,
    ) -> Result<Vec<PipelineAction>, FlowTransitionError> {
        let outcome = self.flow.apply_with_audit(
            &run.state,
            &event,
            &run.context,
            self.audit_sink.as_ref(),
            &run.audit,
        )?;
        tracing::debug!(
            event_name = "pipeline.state_changed",
            correlation_id = %run.audit.run_id,
            from = outcome.from.as_str(),
            to = outcome.to.as_str(),
            "state transition"
        );
        run.state = outcome.to;
        run.trail.push(outcome.to);
        Ok(outcome.actions)
    }
}

fn plain_response(result: &ExecutionResult) -> String {
    match (&result.error_detail, result.object_id()) {
        (Some(detail), _) => format!("Request failed [{}]: {detail}", result.status.as_str()),
        (None, Some(id)) => format!("Request completed (ID {id})."),
        (None, None) => "Request completed.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use crmflow_core::audit::InMemoryAuditSink;
    use crmflow_core::crm::{BackendError, CrmBackend};
    use crmflow_core::domain::entity::{
        EntityRecord, EntityType, FieldName, FieldSet, ObjectId, PropertyDefinition,
    };
    use crmflow_core::domain::execution::ExecutionStatus;
    use crmflow_core::flows::PipelineState;
    use crmflow_core::notify::RecordingTransport;
    use crmflow_core::retry::RetryPolicy;

    use super::PipelineController;
    use crate::guardrails::GuardrailPolicy;
    use crate::parser::IntentParser;

    struct EchoBackend;

    #[async_trait]
    impl CrmBackend for EchoBackend {
        async fn create_record(
            &self,
            entity_type: EntityType,
            fields: &FieldSet,
        ) -> Result<EntityRecord, BackendError> {
            Ok(EntityRecord::new("42", entity_type, fields.clone()))
        }

        async fn update_record(
            &self,
            entity_type: EntityType,
            id: &ObjectId,
            fields: &FieldSet,
        ) -> Result<EntityRecord, BackendError> {
            Ok(EntityRecord::new(id.0.clone(), entity_type, fields.clone()))
        }

        async fn delete_record(&self, _: EntityType, _: &ObjectId) -> Result<(), BackendError> {
            Ok(())
        }

        async fn search(
            &self,
            _: EntityType,
            _: &FieldSet,
        ) -> Result<Vec<EntityRecord>, BackendError> {
            Ok(Vec::new())
        }

        async fn get_record(
            &self,
            entity_type: EntityType,
            id: &ObjectId,
        ) -> Result<EntityRecord, BackendError> {
            Ok(EntityRecord::new(id.0.clone(), entity_type, FieldSet::new()))
        }

        async fn associate(
            &self,
            _: EntityType,
            _: &ObjectId,
            _: EntityType,
            _: &ObjectId,
        ) -> Result<(), BackendError> {
            Ok(())
        }

        async fn list_properties(
            &self,
            _: EntityType,
        ) -> Result<Vec<PropertyDefinition>, BackendError> {
            Ok(Vec::new())
        }
    }

    fn controller(transport: RecordingTransport) -> PipelineController {
        PipelineController::assemble(
            IntentParser::keyword(),
            Arc::new(EchoBackend),
            Arc::new(transport),
            RetryPolicy::immediate(3),
            GuardrailPolicy::default(),
            "ops@example.com",
        )
        .expect("controller")
    }

    #[tokio::test]
    async fn successful_run_walks_every_state_and_audits_transitions() {
        let sink = InMemoryAuditSink::default();
        let transport = RecordingTransport::default();
        let controller = controller(transport.clone()).with_audit_sink(Arc::new(sink.clone()));

        let report = controller
            .handle_query("Create a company called Acme Corp with domain acme.com")
            .await
            .expect("run");

        assert!(report.is_success());
        assert_eq!(
            report.trail,
            vec![
                PipelineState::Received,
                PipelineState::Parsed,
                PipelineState::Executed,
                PipelineState::Notified,
                PipelineState::Responded,
            ]
        );
        assert_eq!(transport.sent().len(), 1);

        let transitions = sink
            .events_for(report.run_id)
            .into_iter()
            .filter(|event| event.name == "flow.transition_applied")
            .count();
        assert_eq!(transitions, 4);
    }

    #[tokio::test]
    async fn gated_delete_never_searches_or_calls_backend() {
        let transport = RecordingTransport::default();
        let report = controller(transport)
            .handle_query("delete contact jane@example.com")
            .await
            .expect("run");

        assert_eq!(report.result.status, ExecutionStatus::ValidationError);
        assert!(report.result.backend_untouched());
        assert_eq!(report.final_state(), Some(PipelineState::Responded));
        assert!(!report.trail.contains(&PipelineState::Resolved));
    }

    #[tokio::test]
    async fn association_by_id_executes_without_resolution() {
        let transport = RecordingTransport::default();
        let report = controller(transport.clone())
            .handle_query("Associate deal 1 with contact 2")
            .await
            .expect("run");

        assert!(report.is_success());
        assert!(!report.trail.contains(&PipelineState::Resolved));
        assert_eq!(report.result.object_id(), Some(&ObjectId("1".to_string())));
        assert!(report.response.contains("contact 2"), "{}", report.response);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn association_by_reference_takes_the_resolution_path() {
        let report = controller(RecordingTransport::default())
            .handle_query("Link contact jane@example.com to company 42")
            .await
            .expect("run");

        let intent = report.intent.as_ref().expect("parsed");
        assert_eq!(intent.search_criteria.get(FieldName::Email), Some("jane@example.com"));
        assert_eq!(report.result.status, ExecutionStatus::NotFound);
        assert_eq!(report.final_state(), Some(PipelineState::Responded));
        assert!(report.trail.contains(&PipelineState::Errored));
    }
}
