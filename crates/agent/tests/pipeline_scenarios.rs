use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use crmflow_agent::{GuardrailPolicy, IntentParser, PipelineController};
use crmflow_core::notify::{RecordingTransport, TransportError};
use crmflow_core::{
    BackendError, CrmBackend, EntityRecord, EntityType, ExecutionStatus, FieldName, FieldSet,
    NotificationKind, ObjectId, PipelineState, PropertyDefinition, RetryPolicy,
};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Call {
    Create(EntityType),
    Update(EntityType, String),
    Delete(EntityType, String),
    Search(EntityType),
    Get(EntityType, String),
    Associate(EntityType, String, EntityType, String),
    ListProperties(EntityType),
}

impl Call {
    fn mutates(&self) -> bool {
        matches!(
            self,
            Self::Create(_) | Self::Update(..) | Self::Delete(..) | Self::Associate(..)
        )
    }
}

#[derive(Default)]
struct Store {
    records: BTreeMap<(String, String), EntityRecord>,
    calls: Vec<Call>,
    next_id: u64,
    failures: Vec<BackendError>,
}

/// In-memory CRM that records every call and can be told to fail the next calls.
#[derive(Clone, Default)]
struct FakeCrm {
    store: Arc<Mutex<Store>>,
}

impl FakeCrm {
    fn with_next_id(next_id: u64) -> Self {
        let crm = Self::default();
        crm.with_store(|store| store.next_id = next_id);
        crm
    }

    fn with_store<T>(&self, f: impl FnOnce(&mut Store) -> T) -> T {
        let mut guard = match self.store.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn seed(&self, id: &str, entity_type: EntityType, pairs: &[(&str, &str)]) {
        let fields = FieldSet::from_properties(entity_type, pairs.iter().copied());
        self.with_store(|store| {
            store.records.insert(
                (entity_type.as_str().to_string(), id.to_string()),
                EntityRecord::new(id, entity_type, fields),
            );
        });
    }

    fn fail_next(&self, errors: Vec<BackendError>) {
        self.with_store(|store| store.failures = errors);
    }

    fn calls(&self) -> Vec<Call> {
        self.with_store(|store| store.calls.clone())
    }

    fn record(&self, entity_type: EntityType, id: &str) -> Option<EntityRecord> {
        self.with_store(|store| {
            store.records.get(&(entity_type.as_str().to_string(), id.to_string())).cloned()
        })
    }

    fn begin(&self, call: Call) -> Result<(), BackendError> {
        self.with_store(|store| {
            store.calls.push(call);
            if store.failures.is_empty() {
                Ok(())
            } else {
                Err(store.failures.remove(0))
            }
        })
    }
}

#[async_trait]
impl CrmBackend for FakeCrm {
    async fn create_record(
        &self,
        entity_type: EntityType,
        fields: &FieldSet,
    ) -> Result<EntityRecord, BackendError> {
        self.begin(Call::Create(entity_type))?;
        Ok(self.with_store(|store| {
            let id = store.next_id.to_string();
            store.next_id += 1;
            let record = EntityRecord::new(id.clone(), entity_type, fields.clone());
            store.records.insert((entity_type.as_str().to_string(), id), record.clone());
            record
        }))
    }

    async fn update_record(
        &self,
        entity_type: EntityType,
        id: &ObjectId,
        fields: &FieldSet,
    ) -> Result<EntityRecord, BackendError> {
        self.begin(Call::Update(entity_type, id.0.clone()))?;
        self.with_store(|store| {
            let key = (entity_type.as_str().to_string(), id.0.clone());
            let Some(record) = store.records.get_mut(&key) else {
                return Err(BackendError::http(404, "resource not found"));
            };
            for (name, value) in fields.iter_pairs() {
                record.fields.insert(entity_type, &name, value);
            }
            Ok(record.clone())
        })
    }

    async fn delete_record(
        &self,
        entity_type: EntityType,
        id: &ObjectId,
    ) -> Result<(), BackendError> {
        self.begin(Call::Delete(entity_type, id.0.clone()))?;
        self.with_store(|store| {
            store
                .records
                .remove(&(entity_type.as_str().to_string(), id.0.clone()))
                .map(|_| ())
                .ok_or_else(|| BackendError::http(404, "resource not found"))
        })
    }

    async fn search(
        &self,
        entity_type: EntityType,
        criteria: &FieldSet,
    ) -> Result<Vec<EntityRecord>, BackendError> {
        self.begin(Call::Search(entity_type))?;
        Ok(self.with_store(|store| {
            store
                .records
                .values()
                .filter(|record| record.entity_type == entity_type)
                .filter(|record| {
                    criteria.iter_pairs().all(|(name, value)| {
                        record.fields.to_properties().get(&name).map(String::as_str) == Some(value)
                    })
                })
                .cloned()
                .collect()
        }))
    }

    async fn get_record(
        &self,
        entity_type: EntityType,
        id: &ObjectId,
    ) -> Result<EntityRecord, BackendError> {
        self.begin(Call::Get(entity_type, id.0.clone()))?;
        self.record(entity_type, &id.0).ok_or_else(|| BackendError::http(404, "resource not found"))
    }

    async fn associate(
        &self,
        from_type: EntityType,
        from_id: &ObjectId,
        to_type: EntityType,
        to_id: &ObjectId,
    ) -> Result<(), BackendError> {
        self.begin(Call::Associate(from_type, from_id.0.clone(), to_type, to_id.0.clone()))?;
        match (self.record(from_type, &from_id.0), self.record(to_type, &to_id.0)) {
            (Some(_), Some(_)) => Ok(()),
            _ => Err(BackendError::http(404, "One or more objects were not found")),
        }
    }

    async fn list_properties(
        &self,
        entity_type: EntityType,
    ) -> Result<Vec<PropertyDefinition>, BackendError> {
        self.begin(Call::ListProperties(entity_type))?;
        Ok(entity_type
            .recognized_fields()
            .iter()
            .map(|field| PropertyDefinition {
                name: field.as_str().to_string(),
                label: field.as_str().to_string(),
                value_type: "string".to_string(),
                field_type: "text".to_string(),
                description: String::new(),
            })
            .collect())
    }
}

fn pipeline(
    crm: &FakeCrm,
    transport: &RecordingTransport,
    allow_delete: bool,
) -> PipelineController {
    PipelineController::assemble(
        IntentParser::keyword(),
        Arc::new(crm.clone()),
        Arc::new(transport.clone()),
        RetryPolicy::immediate(3),
        GuardrailPolicy::new(allow_delete),
        "ops@example.com",
    )
    .expect("pipeline")
}

#[tokio::test]
async fn create_contact_reports_new_id_and_sends_creation_notice() {
    let crm = FakeCrm::with_next_id(42);
    let transport = RecordingTransport::default();

    let report = pipeline(&crm, &transport, false)
        .handle_query("Create a contact for Test User with email testuser@example.com")
        .await
        .expect("run");

    let intent = report.intent.clone().expect("intent");
    assert_eq!(intent.fields.get(FieldName::FirstName), Some("Test"));
    assert_eq!(intent.fields.get(FieldName::LastName), Some("User"));
    assert_eq!(intent.fields.get(FieldName::Email), Some("testuser@example.com"));

    assert_eq!(report.result.status, ExecutionStatus::Success);
    assert!(report.response.contains("42"), "{}", report.response);
    let kind = report.notification.as_ref().map(|notification| notification.kind);
    assert_eq!(kind, Some(NotificationKind::CreationSuccess));

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, "ops@example.com");
    assert_eq!(sent[0].subject, "[crmflow] Contact created: 42");
}

#[tokio::test]
async fn update_with_identifier_skips_resolution() {
    let crm = FakeCrm::default();
    crm.seed("234567", EntityType::Contact, &[("firstname", "Ada"), ("phone", "555-0000")]);
    let transport = RecordingTransport::default();

    let report = pipeline(&crm, &transport, false)
        .handle_query("Update contact 234567 with phone 555-9876")
        .await
        .expect("run");

    assert_eq!(report.result.status, ExecutionStatus::Success);
    assert_eq!(crm.calls(), vec![Call::Update(EntityType::Contact, "234567".to_string())]);
    assert!(!report.trail.contains(&PipelineState::Resolved));
    assert!(report.response.starts_with("Contact updated (ID 234567)."), "{}", report.response);

    let stored = crm.record(EntityType::Contact, "234567").expect("record");
    assert_eq!(stored.fields.get(FieldName::Phone), Some("555-9876"));
}

#[tokio::test]
async fn deal_stage_in_vocabulary_reaches_backend() {
    let crm = FakeCrm::default();
    crm.seed("12345678", EntityType::Deal, &[("dealname", "Enterprise Sale")]);
    let transport = RecordingTransport::default();

    let report = pipeline(&crm, &transport, false)
        .handle_query("Update deal 12345678 with dealstage closedwon")
        .await
        .expect("run");

    assert_eq!(report.result.status, ExecutionStatus::Success);
    let stored = crm.record(EntityType::Deal, "12345678").expect("record");
    assert_eq!(stored.fields.get(FieldName::DealStage), Some("closedwon"));
}

#[tokio::test]
async fn deal_stage_outside_vocabulary_fails_before_any_backend_call() {
    let crm = FakeCrm::default();
    let transport = RecordingTransport::default();

    for query in [
        "Update deal 12345678 with dealstage closed won",
        "Update deal 12345678 with dealstage won",
        "Update deal 12345678 with dealstage Closed-Won",
    ] {
        let report = pipeline(&crm, &transport, false).handle_query(query).await.expect("run");
        assert_eq!(report.result.status, ExecutionStatus::ValidationError, "{query}");
        assert_eq!(report.result.attempts, 0, "{query}");
        let detail = report.result.error_detail.clone().unwrap_or_default();
        assert!(detail.contains("invalid_enum_value"), "{detail}");
        assert_eq!(report.final_state(), Some(PipelineState::Responded));
    }
    assert!(crm.calls().is_empty());
}

#[tokio::test]
async fn auth_failure_is_not_retried_and_points_at_credentials() {
    let crm = FakeCrm::default();
    crm.seed("234567", EntityType::Contact, &[("firstname", "Ada")]);
    crm.fail_next(vec![
        BackendError::http(401, "Authentication credentials not found"),
        BackendError::http(401, "Authentication credentials not found"),
    ]);
    let transport = RecordingTransport::default();

    let report = pipeline(&crm, &transport, false)
        .handle_query("Update contact 234567 with phone 555-9876")
        .await
        .expect("run");

    assert_eq!(report.result.status, ExecutionStatus::AuthError);
    assert_eq!(report.result.attempts, 1);
    assert_eq!(crm.calls().len(), 1);
    assert!(report.response.contains("access token"), "{}", report.response);
    assert_eq!(transport.sent()[0].subject, "[crmflow] Contact update failed");
}

#[tokio::test]
async fn single_search_match_is_attached_before_execution() {
    let crm = FakeCrm::default();
    crm.seed("501", EntityType::Contact, &[("firstname", "Jane"), ("email", "jane@example.com")]);
    crm.seed("502", EntityType::Contact, &[("firstname", "John"), ("email", "john@example.com")]);
    let transport = RecordingTransport::default();
    let controller = pipeline(&crm, &transport, false);

    let report = controller
        .handle_query("update contact jane@example.com with phone 555-0100")
        .await
        .expect("run");

    assert_eq!(report.result.status, ExecutionStatus::Success);
    assert_eq!(report.intent.and_then(|intent| intent.identifier), Some(ObjectId("501".into())));
    assert_eq!(
        report.trail,
        vec![
            PipelineState::Received,
            PipelineState::Parsed,
            PipelineState::Resolved,
            PipelineState::Executed,
            PipelineState::Notified,
            PipelineState::Responded,
        ]
    );
    assert_eq!(
        crm.calls(),
        vec![Call::Search(EntityType::Contact), Call::Update(EntityType::Contact, "501".into())]
    );
}

#[tokio::test]
async fn ambiguous_match_mutates_nothing_and_lists_every_candidate() {
    let crm = FakeCrm::default();
    crm.seed("601", EntityType::Contact, &[("firstname", "Jane"), ("lastname", "Doe")]);
    crm.seed("602", EntityType::Contact, &[("firstname", "Jane"), ("lastname", "Doe")]);
    crm.seed("603", EntityType::Contact, &[("firstname", "Jane"), ("lastname", "Doe")]);
    let transport = RecordingTransport::default();

    let report = pipeline(&crm, &transport, true)
        .handle_query("delete contact Jane Doe")
        .await
        .expect("run");

    assert_eq!(report.result.status, ExecutionStatus::AmbiguousMatch);
    assert!(!crm.calls().iter().any(Call::mutates));
    for id in ["601", "602", "603"] {
        assert!(report.response.contains(id), "{id} missing from {}", report.response);
        assert!(transport.sent()[0].body.contains(id));
    }
    assert_eq!(report.final_state(), Some(PipelineState::Responded));
    assert!(report.trail.contains(&PipelineState::Errored));
}

#[tokio::test]
async fn no_search_match_is_not_found() {
    let crm = FakeCrm::default();
    let transport = RecordingTransport::default();

    let report = pipeline(&crm, &transport, false)
        .handle_query("update deal called Phantom with amount 10")
        .await
        .expect("run");

    assert_eq!(report.result.status, ExecutionStatus::NotFound);
    assert_eq!(crm.calls(), vec![Call::Search(EntityType::Deal)]);
}

#[tokio::test]
async fn notification_failure_keeps_classification() {
    let crm = FakeCrm::with_next_id(7);
    let failing = RecordingTransport::failing(TransportError::Delivery("relay refused".into()));
    let working = RecordingTransport::default();

    let query = "create deal called Enterprise Sale with amount $100,000";
    let failed = pipeline(&crm, &failing, false).handle_query(query).await.expect("run");
    let delivered = pipeline(&crm, &working, false).handle_query(query).await.expect("run");

    assert_eq!(failed.result.status, delivered.result.status);
    assert!(failed.is_success());
    assert!(!failed.delivery.is_delivered());
    assert_eq!(failed.final_state(), Some(PipelineState::Responded));
    assert!(failed.response.contains("relay refused"));
    let deal = crm.record(EntityType::Deal, "7").expect("deal");
    assert_eq!(deal.fields.get(FieldName::Amount), Some("100000"));
}

#[tokio::test]
async fn every_run_yields_exactly_one_result_and_a_terminal_state() {
    let crm = FakeCrm::default();
    crm.seed("1", EntityType::Company, &[("name", "Acme")]);
    let transport = RecordingTransport::default();
    let controller = pipeline(&crm, &transport, false);

    let queries = [
        "",
        "please do something",
        "create a ticket with subject Bug",
        "find companies with name Acme",
        "find companies with name Nobody",
        "update company with domain acme.com",
        "delete company 1",
        "get company 1",
    ];

    for query in queries {
        let report = controller.handle_query(query).await.expect("run");
        assert_eq!(report.final_state(), Some(PipelineState::Responded), "{query}");
        let executed = report.trail.iter().filter(|state| **state == PipelineState::Executed);
        assert_eq!(executed.count(), 1, "{query}");
        assert!(!report.response.is_empty());
    }
    assert_eq!(transport.sent().len(), queries.len());
    assert!(crm.record(EntityType::Company, "1").is_some());
}

#[tokio::test]
async fn transient_failures_are_retried_before_succeeding() {
    let crm = FakeCrm::default();
    crm.seed("88", EntityType::Company, &[("name", "Globex")]);
    crm.fail_next(vec![BackendError::http(429, "rate limited"), BackendError::Timeout]);
    let transport = RecordingTransport::default();

    let report = pipeline(&crm, &transport, false)
        .handle_query("update company 88 with domain globex.com")
        .await
        .expect("run");

    assert_eq!(report.result.status, ExecutionStatus::Success);
    assert_eq!(report.result.attempts, 3);
}

#[tokio::test]
async fn association_resolves_the_source_before_linking() {
    let crm = FakeCrm::default();
    crm.seed("501", EntityType::Contact, &[("firstname", "Jane"), ("email", "jane@example.com")]);
    crm.seed("42", EntityType::Company, &[("name", "Acme")]);
    let transport = RecordingTransport::default();

    let report = pipeline(&crm, &transport, false)
        .handle_query("Link contact jane@example.com to company 42")
        .await
        .expect("run");

    assert_eq!(report.result.status, ExecutionStatus::Success);
    assert!(report.trail.contains(&PipelineState::Resolved));
    assert_eq!(
        crm.calls(),
        vec![
            Call::Search(EntityType::Contact),
            Call::Associate(EntityType::Contact, "501".into(), EntityType::Company, "42".into()),
        ]
    );
    assert_eq!(transport.sent()[0].subject, "[crmflow] Contact 501 associated with company 42");
}

#[tokio::test]
async fn association_with_missing_target_is_not_found_without_retry() {
    let crm = FakeCrm::default();
    crm.seed("1", EntityType::Deal, &[("dealname", "Enterprise Sale")]);
    let transport = RecordingTransport::default();

    let report = pipeline(&crm, &transport, false)
        .handle_query("Associate deal 1 with contact 999")
        .await
        .expect("run");

    assert_eq!(report.result.status, ExecutionStatus::NotFound);
    assert_eq!(report.result.attempts, 1);
    assert_eq!(transport.sent()[0].subject, "[crmflow] Deal associate failed");
}

#[tokio::test]
async fn property_listing_reads_definitions_without_mutating() {
    let crm = FakeCrm::default();
    let transport = RecordingTransport::default();

    let report = pipeline(&crm, &transport, false)
        .handle_query("List properties for deals")
        .await
        .expect("run");

    assert_eq!(report.result.status, ExecutionStatus::Success);
    assert_eq!(crm.calls(), vec![Call::ListProperties(EntityType::Deal)]);
    assert!(!crm.calls().iter().any(Call::mutates));
    assert!(report.result.properties.iter().any(|property| property.name == "dealname"));
    assert!(report.response.contains("dealname"), "{}", report.response);
}
