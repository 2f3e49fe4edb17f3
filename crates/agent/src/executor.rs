use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use crmflow_core::crm::{BackendError, CrmBackend};
use crmflow_core::domain::entity::{EntityRecord, FieldSet, Operation};
use crmflow_core::domain::execution::{ExecutionResult, ExecutionStatus};
use crmflow_core::domain::intent::Intent;
use crmflow_core::retry::{RetryDecision, RetryPolicy, RetryableError};

use crate::guardrails::{GuardrailDecision, GuardrailPolicy};

/// Runs `call` under the per-call timeout, repeating transient failures per `policy`.
/// Returns the final outcome and the number of calls issued.
pub(crate) async fn call_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut call: F,
) -> (Result<T, E>, u32)
where
    E: RetryableError + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(policy.call_timeout, call()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(E::timed_out()),
        };

        let error = match outcome {
            Ok(value) => return (Ok(value), attempt),
            Err(error) => error,
        };

        match policy.decide(attempt, error.is_retryable()) {
            RetryDecision::Retry => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    event_name = "outbound.call_retry",
                    call = label,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "transient failure; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            RetryDecision::FailTerminal => return (Err(error), attempt),
        }
    }
}

pub struct OperationExecutor {
    backend: Arc<dyn CrmBackend>,
    retry: RetryPolicy,
    guardrails: GuardrailPolicy,
}

impl OperationExecutor {
    pub fn new(
        backend: Arc<dyn CrmBackend>,
        retry: RetryPolicy,
        guardrails: GuardrailPolicy,
    ) -> Self {
        Self { backend, retry, guardrails }
    }

    /// Fails a run whose operation is disabled, before any lookup is attempted.
    pub fn preflight(&self, intent: &Intent) -> Option<ExecutionResult> {
        match self.guardrails.capability(intent.operation, intent.entity_type) {
            GuardrailDecision::Deny { reason_code, user_message, fallback_path } => {
                tracing::warn!(
                    event_name = "executor.guardrail_denied",
                    operation = intent.operation.as_str(),
                    entity_type = intent.entity_type.as_str(),
                    reason_code,
                    fallback_path,
                    "operation blocked before resolution"
                );
                Some(ExecutionResult::failure(
                    intent.operation,
                    intent.entity_type,
                    ExecutionStatus::ValidationError,
                    user_message,
                    0,
                ))
            }
            _ => None,
        }
    }

    pub async fn execute(&self, intent: &Intent) -> ExecutionResult {
        match self.guardrails.evaluate(intent) {
            GuardrailDecision::Allow => {}
            GuardrailDecision::Deny { reason_code, user_message, fallback_path } => {
                tracing::warn!(
                    event_name = "executor.guardrail_denied",
                    operation = intent.operation.as_str(),
                    entity_type = intent.entity_type.as_str(),
                    reason_code,
                    fallback_path,
                    "operation blocked before dispatch"
                );
                return ExecutionResult::failure(
                    intent.operation,
                    intent.entity_type,
                    ExecutionStatus::ValidationError,
                    user_message,
                    0,
                );
            }
            GuardrailDecision::Degrade { reason_code, user_message, fallback_path } => {
                tracing::warn!(
                    event_name = "executor.guardrail_degraded",
                    operation = intent.operation.as_str(),
                    entity_type = intent.entity_type.as_str(),
                    reason_code,
                    fallback_path,
                    "{user_message}"
                );
            }
        }

        let entity_type = intent.entity_type;
        let backend = &self.backend;
        let label = format!("{} {}", intent.operation, entity_type);

        match (intent.operation, &intent.identifier) {
            (Operation::Create, _) => {
                let (outcome, attempts) = call_with_retry(&self.retry, &label, || {
                    backend.create_record(entity_type, &intent.fields)
                })
                .await;
                self.settle(intent, outcome, attempts)
            }
            (Operation::Update, Some(id)) => {
                let (outcome, attempts) = call_with_retry(&self.retry, &label, || {
                    backend.update_record(entity_type, id, &intent.fields)
                })
                .await;
                self.settle(intent, outcome, attempts)
            }
            (Operation::Delete, Some(id)) => {
                let (outcome, attempts) = call_with_retry(&self.retry, &label, || {
                    backend.delete_record(entity_type, id)
                })
                .await;
                let outcome =
                    outcome.map(|()| EntityRecord::new(id.0.clone(), entity_type, FieldSet::new()));
                self.settle(intent, outcome, attempts)
            }
            (Operation::Read, Some(id)) => {
                let (outcome, attempts) = call_with_retry(&self.retry, &label, || {
                    backend.get_record(entity_type, id)
                })
                .await;
                self.settle(intent, outcome, attempts)
            }
            (Operation::Associate, Some(id)) => {
                let Some(target) = &intent.association else {
                    return ExecutionResult::failure(
                        Operation::Associate,
                        entity_type,
                        ExecutionStatus::ValidationError,
                        format!("associate {entity_type} {id} needs a record to link to"),
                        0,
                    );
                };
                let (outcome, attempts) = call_with_retry(&self.retry, &label, || {
                    backend.associate(entity_type, id, target.entity_type, &target.id)
                })
                .await;
                let outcome =
                    outcome.map(|()| EntityRecord::new(id.0.clone(), entity_type, FieldSet::new()));
                self.settle(intent, outcome, attempts)
            }
            (Operation::ListProperties, _) => {
                let (outcome, attempts) = call_with_retry(&self.retry, &label, || {
                    backend.list_properties(entity_type)
                })
                .await;
                match outcome {
                    Ok(properties) => {
                        let result =
                            ExecutionResult::property_listing(entity_type, properties, attempts);
                        self.log_outcome(intent, &result);
                        result
                    }
                    Err(error) => self.settle(intent, Err(error), attempts),
                }
            }
            (Operation::Read, None) if !intent.search_criteria.is_empty() => {
                let (outcome, attempts) = call_with_retry(&self.retry, &label, || {
                    backend.search(entity_type, &intent.search_criteria)
                })
                .await;
                match outcome {
                    Ok(records) if records.is_empty() => {
                        let criteria = describe_criteria(&intent.search_criteria);
                        let result = ExecutionResult::failure(
                            Operation::Read,
                            entity_type,
                            ExecutionStatus::NotFound,
                            format!("no {entity_type} matched {criteria}"),
                            attempts,
                        );
                        self.log_outcome(intent, &result);
                        result
                    }
                    Ok(records) => {
                        let result = ExecutionResult::listing(
                            Operation::Read,
                            entity_type,
                            records,
                            attempts,
                        );
                        self.log_outcome(intent, &result);
                        result
                    }
                    Err(error) => self.settle(intent, Err(error), attempts),
                }
            }
            (operation, _) => ExecutionResult::failure(
                operation,
                entity_type,
                ExecutionStatus::ValidationError,
                format!("{operation} {entity_type} needs a record ID or search values"),
                0,
            ),
        }
    }

    fn settle(
        &self,
        intent: &Intent,
        outcome: Result<EntityRecord, BackendError>,
        attempts: u32,
    ) -> ExecutionResult {
        let result = match outcome {
            Ok(record) => ExecutionResult::success(intent.operation, record, attempts),
            Err(error) => ExecutionResult::failure(
                intent.operation,
                intent.entity_type,
                error.status(),
                error.detail(),
                attempts,
            ),
        };
        self.log_outcome(intent, &result);
        result
    }

    fn log_outcome(&self, intent: &Intent, result: &ExecutionResult) {
        if result.is_success() {
            tracing::info!(
                event_name = "executor.operation_succeeded",
                operation = intent.operation.as_str(),
                entity_type = intent.entity_type.as_str(),
                object_id = result.object_id().map(|id| id.0.as_str()).unwrap_or_default(),
                attempt = result.attempts,
                "CRM operation succeeded"
            );
        } else {
            tracing::warn!(
                event_name = "executor.operation_failed",
                operation = intent.operation.as_str(),
                entity_type = intent.entity_type.as_str(),
                status = result.status.as_str(),
                attempt = result.attempts,
                "CRM operation failed"
            );
        }
    }
}

/// `firstname=Jane, lastname=Doe`
pub(crate) fn describe_criteria(criteria: &FieldSet) -> String {
    criteria
        .iter_pairs()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use crmflow_core::crm::{BackendError, CrmBackend};
    use crmflow_core::domain::entity::{
        EntityRecord, EntityType, FieldName, FieldSet, ObjectId, Operation, PropertyDefinition,
    };
    use crmflow_core::domain::execution::ExecutionStatus;
    use crmflow_core::domain::intent::Intent;
    use crmflow_core::retry::RetryPolicy;

    use super::{call_with_retry, OperationExecutor};
    use crate::guardrails::GuardrailPolicy;

    /// Fails the first `failures` calls with `error`, then succeeds.
    struct FlakyBackend {
        calls: AtomicU32,
        failures: u32,
        error: BackendError,
    }

    impl FlakyBackend {
        fn new(failures: u32, error: BackendError) -> Self {
            Self { calls: AtomicU32::new(0), failures, error }
        }

        fn step(&self) -> Result<(), BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CrmBackend for FlakyBackend {
        async fn create_record(
            &self,
            entity_type: EntityType,
            fields: &FieldSet,
        ) -> Result<EntityRecord, BackendError> {
            self.step()?;
            Ok(EntityRecord::new("42", entity_type, fields.clone()))
        }

        async fn update_record(
            &self,
            entity_type: EntityType,
            id: &ObjectId,
            fields: &FieldSet,
        ) -> Result<EntityRecord, BackendError> {
            self.step()?;
            Ok(EntityRecord::new(id.0.clone(), entity_type, fields.clone()))
        }

        async fn delete_record(&self, _: EntityType, _: &ObjectId) -> Result<(), BackendError> {
            self.step()
        }

        async fn search(
            &self,
            _: EntityType,
            _: &FieldSet,
        ) -> Result<Vec<EntityRecord>, BackendError> {
            self.step()?;
            Ok(Vec::new())
        }

        async fn get_record(
            &self,
            entity_type: EntityType,
            id: &ObjectId,
        ) -> Result<EntityRecord, BackendError> {
            self.step()?;
            Ok(EntityRecord::new(id.0.clone(), entity_type, FieldSet::new()))
        }

        async fn associate(
            &self,
            _: EntityType,
            _: &ObjectId,
            _: EntityType,
            _: &ObjectId,
        ) -> Result<(), BackendError> {
            self.step()
        }

        async fn list_properties(
            &self,
            _: EntityType,
        ) -> Result<Vec<PropertyDefinition>, BackendError> {
            self.step()?;
            Ok(vec![PropertyDefinition {
                name: "dealname".to_string(),
                label: "Deal Name".to_string(),
                value_type: "string".to_string(),
                field_type: "text".to_string(),
                description: String::new(),
            }])
        }
    }

    fn executor(backend: Arc<FlakyBackend>, allow_delete: bool) -> OperationExecutor {
        let guardrails = GuardrailPolicy::new(allow_delete);
        OperationExecutor::new(backend, RetryPolicy::immediate(3), guardrails)
    }

    fn update_phone() -> Intent {
        let mut intent =
            Intent::new(Operation::Update, EntityType::Contact).with_identifier("234567");
        intent.fields.set(FieldName::Phone, "555-9876");
        intent
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let backend = Arc::new(FlakyBackend::new(2, BackendError::http(503, "unavailable")));
        let result = executor(backend.clone(), false).execute(&update_phone()).await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.object_id(), Some(&ObjectId("234567".to_string())));
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_transient_error() {
        let backend = Arc::new(FlakyBackend::new(10, BackendError::http(429, "rate limited")));
        let result = executor(backend.clone(), false).execute(&update_phone()).await;

        assert_eq!(result.status, ExecutionStatus::TransientError);
        assert_eq!(result.attempts, 3);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn auth_failures_are_never_retried() {
        let backend = Arc::new(FlakyBackend::new(10, BackendError::http(401, "expired token")));
        let result = executor(backend.clone(), false).execute(&update_phone()).await;

        assert_eq!(result.status, ExecutionStatus::AuthError);
        assert_eq!(result.attempts, 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn validation_detail_is_surfaced_verbatim() {
        let backend = Arc::new(FlakyBackend::new(
            10,
            BackendError::http(400, "Property values were not valid: phone"),
        ));
        let result = executor(backend, false).execute(&update_phone()).await;

        assert_eq!(result.status, ExecutionStatus::ValidationError);
        assert_eq!(result.error_detail.as_deref(), Some("Property values were not valid: phone"));
    }

    #[tokio::test]
    async fn update_without_identifier_fails_closed() {
        let backend = Arc::new(FlakyBackend::new(0, BackendError::Timeout));
        let mut intent = update_phone();
        intent.identifier = None;

        let result = executor(backend.clone(), false).execute(&intent).await;
        assert_eq!(result.status, ExecutionStatus::ValidationError);
        assert!(result.backend_untouched());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delete_respects_configuration_gate() {
        let intent = Intent::new(Operation::Delete, EntityType::Deal).with_identifier("77");

        let backend = Arc::new(FlakyBackend::new(0, BackendError::Timeout));
        let blocked = executor(backend.clone(), false).execute(&intent).await;
        assert_eq!(blocked.status, ExecutionStatus::ValidationError);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);

        let allowed = executor(backend.clone(), true).execute(&intent).await;
        assert_eq!(allowed.status, ExecutionStatus::Success);
        assert_eq!(allowed.object_id(), Some(&ObjectId("77".to_string())));
    }

    #[tokio::test]
    async fn read_search_with_no_matches_is_not_found() {
        let backend = Arc::new(FlakyBackend::new(0, BackendError::Timeout));
        let mut intent = Intent::new(Operation::Read, EntityType::Contact);
        intent.search_criteria.set(FieldName::Email, "nobody@example.com");

        let result = executor(backend, false).execute(&intent).await;
        assert_eq!(result.status, ExecutionStatus::NotFound);
        assert_eq!(result.attempts, 1);
        assert!(result.error_detail.unwrap_or_default().contains("email=nobody@example.com"));
    }

    #[tokio::test]
    async fn slow_calls_time_out_as_transient() {
        let policy = RetryPolicy::immediate(2).with_call_timeout(Duration::from_millis(50));
        let (outcome, attempts) = call_with_retry(&policy, "get contact", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, BackendError>(())
        })
        .await;

        assert_eq!(outcome, Err(BackendError::Timeout));
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn association_retries_transient_failures() {
        let backend = Arc::new(FlakyBackend::new(1, BackendError::Timeout));
        let intent = Intent::new(Operation::Associate, EntityType::Deal)
            .with_identifier("1")
            .with_association(EntityType::Contact, "2");

        let result = executor(backend.clone(), false).execute(&intent).await;
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.object_id(), Some(&ObjectId("1".to_string())));
    }

    #[tokio::test]
    async fn property_listing_carries_definitions() {
        let backend = Arc::new(FlakyBackend::new(0, BackendError::Timeout));
        let intent = Intent::new(Operation::ListProperties, EntityType::Deal);

        let result = executor(backend, false).execute(&intent).await;
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.operation, Some(Operation::ListProperties));
        assert_eq!(result.properties.len(), 1);
        assert_eq!(result.properties[0].name, "dealname");
    }
}
