//! Notification and final-response rendering.
//!
//! Templates are plain text, embedded at build time and keyed by
//! [`NotificationKind`]. Failure bodies carry the backend detail verbatim together with
//! the remediation hint for the status.

use crmflow_core::domain::entity::{EntityRecord, FieldSet, Operation};
use crmflow_core::domain::execution::ExecutionResult;
use crmflow_core::domain::intent::Intent;
use crmflow_core::domain::notification::{NotificationKind, NotificationRequest};
use serde::Serialize;
use tera::{Context, Tera};
use thiserror::Error;

const SUBJECT_PREFIX: &str = "[crmflow]";
const RESPONSE_TEMPLATE: &str = "response.txt";

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("notification template `{name}` failed to render: {message}")]
    Render { name: String, message: String },
    #[error("notification templates failed to load: {0}")]
    Load(String),
}

/// How the notification step ended. Never changes the run's classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { recipient: String },
    Failed { reason: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

#[derive(Serialize)]
struct SummaryField {
    name: String,
    value: String,
}

#[derive(Serialize)]
struct CandidateView {
    id: String,
    summary: String,
}

pub struct NotificationComposer {
    templates: Tera,
    recipient: String,
}

impl NotificationComposer {
    pub fn new(recipient: impl Into<String>) -> Result<Self, ComposeError> {
        let mut templates = Tera::default();
        templates
            .add_raw_templates(vec![
                (
                    template_name(NotificationKind::CreationSuccess),
                    include_str!("../templates/notifications/creation_success.txt"),
                ),
                (
                    template_name(NotificationKind::UpdateSuccess),
                    include_str!("../templates/notifications/update_success.txt"),
                ),
                (
                    template_name(NotificationKind::ReadSuccess),
                    include_str!("../templates/notifications/read_success.txt"),
                ),
                (
                    template_name(NotificationKind::DeleteSuccess),
                    include_str!("../templates/notifications/delete_success.txt"),
                ),
                (
                    template_name(NotificationKind::AssociationSuccess),
                    include_str!("../templates/notifications/association_success.txt"),
                ),
                (
                    template_name(NotificationKind::PropertyListing),
                    include_str!("../templates/notifications/property_listing.txt"),
                ),
                (
                    template_name(NotificationKind::OperationFailure),
                    include_str!("../templates/notifications/operation_failure.txt"),
                ),
                (RESPONSE_TEMPLATE, include_str!("../templates/notifications/response.txt")),
            ])
            .map_err(|error| ComposeError::Load(error.to_string()))?;
        Ok(Self { templates, recipient: recipient.into() })
    }

    pub fn compose(
        &self,
        result: &ExecutionResult,
        intent: Option<&Intent>,
    ) -> Result<NotificationRequest, ComposeError> {
        let kind = NotificationKind::select(result.operation, result.status);
        let summary = summary_fields(result, intent);

        let mut context = self.base_context(result, intent, &summary);
        context.insert("operation_label", &operation_label(result));
        let body = self.render(template_name(kind), &context)?;

        Ok(NotificationRequest {
            kind,
            entity_type: result.entity_type,
            object_id: result.object_id().cloned(),
            summary_fields: summary.into_iter().map(|field| (field.name, field.value)).collect(),
            recipient: self.recipient.clone(),
            subject: subject(kind, result, intent),
            body,
        })
    }

    /// The text handed back to the user once the run is over.
    pub fn respond(
        &self,
        result: &ExecutionResult,
        intent: Option<&Intent>,
        delivery: &DeliveryOutcome,
    ) -> Result<String, ComposeError> {
        let summary = summary_fields(result, intent);
        let mut context = self.base_context(result, intent, &summary);
        context.insert("success", &result.is_success());
        context.insert("headline", &headline(result, intent));
        match delivery {
            DeliveryOutcome::Delivered { recipient } => {
                context.insert("notification_sent", &true);
                context.insert("recipient", recipient);
                context.insert("notification_error", "");
            }
            DeliveryOutcome::Failed { reason } => {
                context.insert("notification_sent", &false);
                context.insert("recipient", "");
                context.insert("notification_error", reason);
            }
        }
        self.render(RESPONSE_TEMPLATE, &context).map(|text| text.trim_end().to_string())
    }

    fn base_context(
        &self,
        result: &ExecutionResult,
        intent: Option<&Intent>,
        summary: &[SummaryField],
    ) -> Context {
        let candidates = result
            .candidates
            .iter()
            .map(|record| CandidateView {
                id: record.id.0.clone(),
                summary: record.distinguishing_summary(),
            })
            .collect::<Vec<_>>();

        let mut context = Context::new();
        context.insert(
            "entity_name",
            result.entity_type.map(|entity_type| entity_type.as_str()).unwrap_or("record"),
        );
        context.insert(
            "object_id",
            &result.object_id().map(|id| id.0.clone()).unwrap_or_default(),
        );
        context.insert("summary_fields", summary);
        context.insert("candidates", &candidates);
        context.insert("properties", &result.properties);
        context.insert("linked_to", &linked_to(intent).unwrap_or_default());
        context.insert("status", result.status.as_str());
        context.insert("attempts", &result.attempts);
        context.insert("detail", result.error_detail.as_deref().unwrap_or_default());
        context.insert("remediation", result.status.remediation().unwrap_or_default());
        context
    }

    fn render(&self, name: &str, context: &Context) -> Result<String, ComposeError> {
        self.templates.render(name, context).map_err(|error| ComposeError::Render {
            name: name.to_string(),
            message: error.to_string(),
        })
    }
}

fn template_name(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::CreationSuccess => "creation_success.txt",
        NotificationKind::UpdateSuccess => "update_success.txt",
        NotificationKind::ReadSuccess => "read_success.txt",
        NotificationKind::DeleteSuccess => "delete_success.txt",
        NotificationKind::AssociationSuccess => "association_success.txt",
        NotificationKind::PropertyListing => "property_listing.txt",
        NotificationKind::OperationFailure => "operation_failure.txt",
    }
}

/// `[crmflow] Contact created: 42`, `[crmflow] Deal update failed`
fn subject(kind: NotificationKind, result: &ExecutionResult, intent: Option<&Intent>) -> String {
    let label = result.entity_type.map(|entity_type| entity_type.label()).unwrap_or("Request");
    match (kind, result.operation, result.object_id()) {
        (NotificationKind::PropertyListing, _, _) => {
            format!("{SUBJECT_PREFIX} {label} properties: {}", result.properties.len())
        }
        (NotificationKind::AssociationSuccess, _, Some(id)) if linked_to(intent).is_some() => {
            let target = linked_to(intent).unwrap_or_default();
            format!("{SUBJECT_PREFIX} {label} {id} associated with {target}")
        }
        (NotificationKind::OperationFailure, Some(operation), _)
            if result.entity_type.is_some() =>
        {
            format!("{SUBJECT_PREFIX} {label} {operation} failed")
        }
        (NotificationKind::OperationFailure, _, _) => format!("{SUBJECT_PREFIX} Request failed"),
        (NotificationKind::ReadSuccess, _, _) if result.candidates.len() > 1 => {
            format!("{SUBJECT_PREFIX} {label} search: {} matches", result.candidates.len())
        }
        (_, Some(operation), Some(id)) => {
            format!("{SUBJECT_PREFIX} {label} {}: {id}", operation.past_tense())
        }
        (_, Some(operation), None) => {
            format!("{SUBJECT_PREFIX} {label} {}", operation.past_tense())
        }
        (_, None, _) => format!("{SUBJECT_PREFIX} {label}"),
    }
}

fn headline(result: &ExecutionResult, intent: Option<&Intent>) -> String {
    let label = result.entity_type.map(|entity_type| entity_type.label()).unwrap_or("Request");
    match (result.is_success(), result.operation, result.object_id()) {
        (true, Some(Operation::ListProperties), _) => {
            format!("Found {} {} properties.", result.properties.len(), label.to_lowercase())
        }
        (true, Some(Operation::Associate), Some(id)) if linked_to(intent).is_some() => {
            let target = linked_to(intent).unwrap_or_default();
            format!("{label} {id} associated with {target}.")
        }
        (true, Some(Operation::Read), _) if result.candidates.len() > 1 => {
            format!("{label} search completed.")
        }
        (true, Some(operation), Some(id)) => {
            format!("{label} {} (ID {id}).", operation.past_tense())
        }
        (true, Some(operation), None) => format!("{label} {}.", operation.past_tense()),
        (false, Some(operation), _) if result.entity_type.is_some() => {
            format!("{label} {operation} failed")
        }
        _ if result.is_success() => "Request completed.".to_string(),
        _ => "Request failed".to_string(),
    }
}

/// `contact 2` for an association run.
fn linked_to(intent: Option<&Intent>) -> Option<String> {
    intent.and_then(|intent| intent.association.as_ref()).map(ToString::to_string)
}

fn operation_label(result: &ExecutionResult) -> String {
    match (result.operation, result.entity_type) {
        (Some(operation), Some(entity_type)) => format!("{operation} {entity_type}"),
        (Some(operation), None) => operation.to_string(),
        _ => "unrecognized request".to_string(),
    }
}

/// Fields worth repeating back: what was written for mutations, what was found for reads.
fn summary_fields(result: &ExecutionResult, intent: Option<&Intent>) -> Vec<SummaryField> {
    let source: Option<&FieldSet> = match (result.operation, &result.record, intent) {
        (Some(Operation::Delete | Operation::Associate | Operation::ListProperties), _, _) => {
            None
        }
        (Some(Operation::Read), Some(record), _) if result.candidates.len() <= 1 => {
            Some(&record.fields)
        }
        (Some(Operation::Create), Some(record), _) if !record.fields.is_empty() => {
            Some(&record.fields)
        }
        (_, _, Some(intent)) if !intent.fields.is_empty() => Some(&intent.fields),
        (_, Some(EntityRecord { fields, .. }), _) => Some(fields),
        _ => None,
    };

    source
        .map(|fields| {
            fields
                .iter_pairs()
                .map(|(name, value)| SummaryField { name, value: value.to_string() })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use crmflow_core::domain::entity::{
        EntityRecord, EntityType, FieldName, FieldSet, Operation, PropertyDefinition,
    };
    use crmflow_core::domain::execution::{ExecutionResult, ExecutionStatus};
    use crmflow_core::domain::intent::Intent;
    use crmflow_core::domain::notification::NotificationKind;

    use super::{DeliveryOutcome, NotificationComposer};

    fn composer() -> NotificationComposer {
        NotificationComposer::new("ops@example.com").expect("templates load")
    }

    fn delivered() -> DeliveryOutcome {
        DeliveryOutcome::Delivered { recipient: "ops@example.com".to_string() }
    }

    fn created_contact() -> (Intent, ExecutionResult) {
        let mut intent = Intent::new(Operation::Create, EntityType::Contact);
        intent.fields.set(FieldName::FirstName, "Test");
        intent.fields.set(FieldName::LastName, "User");
        intent.fields.set(FieldName::Email, "testuser@example.com");
        let record = EntityRecord::new("42", EntityType::Contact, intent.fields.clone());
        (intent, ExecutionResult::success(Operation::Create, record, 1))
    }

    #[test]
    fn creation_notification_names_the_new_record() {
        let (intent, result) = created_contact();
        let request = composer().compose(&result, Some(&intent)).expect("compose");

        assert_eq!(request.kind, NotificationKind::CreationSuccess);
        assert_eq!(request.subject, "[crmflow] Contact created: 42");
        assert_eq!(request.recipient, "ops@example.com");
        assert!(request.body.contains("Record ID: 42"));
        assert!(request.body.contains("- email: testuser@example.com"));
        assert_eq!(request.summary_fields.len(), 3);
    }

    #[test]
    fn failure_notification_keeps_detail_and_remediation() {
        let result = ExecutionResult::failure(
            Operation::Update,
            EntityType::Deal,
            ExecutionStatus::ValidationError,
            "Property values were not valid: amount",
            1,
        );
        let request = composer().compose(&result, None).expect("compose");

        assert_eq!(request.kind, NotificationKind::OperationFailure);
        assert_eq!(request.subject, "[crmflow] Deal update failed");
        assert!(request.body.contains("Property values were not valid: amount"));
        assert!(request.body.contains("Check the field names and value formats."));
    }

    #[test]
    fn ambiguous_failure_lists_every_candidate() {
        let candidates = ["101", "102", "103"]
            .iter()
            .map(|id| {
                let fields =
                    FieldSet::from_properties(EntityType::Contact, [("firstname", "Jane")]);
                EntityRecord::new(*id, EntityType::Contact, fields)
            })
            .collect::<Vec<_>>();
        let result = ExecutionResult::failure(
            Operation::Delete,
            EntityType::Contact,
            ExecutionStatus::AmbiguousMatch,
            "3 contact records matched firstname=Jane",
            1,
        )
        .with_candidates(candidates);

        let composer = composer();
        let request = composer.compose(&result, None).expect("compose");
        let response = composer
            .respond(&result, None, &delivered())
            .expect("respond");

        for id in ["101", "102", "103"] {
            assert!(request.body.contains(&format!("- {id}: firstname=Jane")), "{id}");
            assert!(response.contains(&format!("- {id}: firstname=Jane")), "{id}");
        }
        assert!(response.contains("Narrow the search"));
    }

    #[test]
    fn response_reports_failed_delivery_without_changing_outcome() {
        let (intent, result) = created_contact();
        let response = composer()
            .respond(
                &result,
                Some(&intent),
                &DeliveryOutcome::Failed { reason: "SMTP timed out".to_string() },
            )
            .expect("respond");

        assert!(response.starts_with("Contact created (ID 42)."));
        assert!(response.contains("notification was not delivered (SMTP timed out)"));
    }

    #[test]
    fn association_names_both_records() {
        let intent = Intent::new(Operation::Associate, EntityType::Deal)
            .with_identifier("1")
            .with_association(EntityType::Contact, "2");
        let record = EntityRecord::new("1", EntityType::Deal, FieldSet::new());
        let result = ExecutionResult::success(Operation::Associate, record, 1);

        let composer = composer();
        let request = composer.compose(&result, Some(&intent)).expect("compose");
        assert_eq!(request.kind, NotificationKind::AssociationSuccess);
        assert_eq!(request.subject, "[crmflow] Deal 1 associated with contact 2");
        assert!(request.body.contains("Linked to: contact 2"));

        let response = composer.respond(&result, Some(&intent), &delivered()).expect("respond");
        assert!(response.starts_with("Deal 1 associated with contact 2."), "{response}");
    }

    #[test]
    fn property_listing_shows_each_definition() {
        let properties = vec![PropertyDefinition {
            name: "dealname".to_string(),
            label: "Deal Name".to_string(),
            value_type: "string".to_string(),
            field_type: "text".to_string(),
            description: String::new(),
        }];
        let result = ExecutionResult::property_listing(EntityType::Deal, properties, 1);
        let intent = Intent::new(Operation::ListProperties, EntityType::Deal);

        let composer = composer();
        let request = composer.compose(&result, Some(&intent)).expect("compose");
        assert_eq!(request.kind, NotificationKind::PropertyListing);
        assert_eq!(request.subject, "[crmflow] Deal properties: 1");
        assert!(request.body.contains("- dealname (Deal Name): string/text"));

        let response = composer.respond(&result, Some(&intent), &delivered()).expect("respond");
        assert!(response.starts_with("Found 1 deal properties."), "{response}");
        assert!(response.contains("dealname (Deal Name): string"));
    }

    #[test]
    fn unparsed_request_still_gets_a_failure_message() {
        let result = ExecutionResult::failure(
            None,
            None,
            ExecutionStatus::ValidationError,
            "no CRM operation was found",
            0,
        );
        let composer = composer();
        let request = composer.compose(&result, None).expect("compose");
        assert_eq!(request.subject, "[crmflow] Request failed");
        assert!(request.body.contains("unrecognized request"));

        let response = composer
            .respond(&result, None, &delivered())
            .expect("respond");
        assert!(response.starts_with("Request failed [validation_error]: no CRM operation"));
    }
}
