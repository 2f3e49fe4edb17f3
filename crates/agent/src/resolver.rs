use std::sync::Arc;

use crmflow_core::crm::CrmBackend;
use crmflow_core::domain::intent::Intent;
use crmflow_core::errors::ResolutionFailure;
use crmflow_core::retry::RetryPolicy;

use crate::executor::{call_with_retry, describe_criteria};

/// Turns search criteria into a single record ID. Never picks among several matches.
pub struct EntityResolver {
    backend: Arc<dyn CrmBackend>,
    retry: RetryPolicy,
}

impl EntityResolver {
    pub fn new(backend: Arc<dyn CrmBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    pub async fn resolve(&self, mut intent: Intent) -> Result<Intent, ResolutionFailure> {
        if intent.identifier.is_some() {
            return Ok(intent);
        }

        let entity_type = intent.entity_type;
        if intent.search_criteria.is_empty() {
            return Err(ResolutionFailure::MissingCriteria { entity_type });
        }

        let criteria = describe_criteria(&intent.search_criteria);
        let backend = &self.backend;
        let search_criteria = &intent.search_criteria;
        let label = format!("search {entity_type}");
        let (outcome, attempts) = call_with_retry(&self.retry, &label, || {
            backend.search(entity_type, search_criteria)
        })
        .await;

        let mut matches = outcome.map_err(|error| ResolutionFailure::Backend {
            entity_type,
            status: error.status(),
            detail: error.detail(),
            attempts,
        })?;

        match matches.len() {
            0 => Err(ResolutionFailure::NotFound { entity_type, criteria }),
            1 => {
                let record = matches.remove(0);
                tracing::info!(
                    event_name = "resolver.match_found",
                    entity_type = entity_type.as_str(),
                    object_id = record.id.0.as_str(),
                    criteria = criteria.as_str(),
                    "resolved record reference"
                );
                intent.identifier = Some(record.id);
                Ok(intent)
            }
            count => {
                tracing::warn!(
                    event_name = "resolver.ambiguous_match",
                    entity_type = entity_type.as_str(),
                    candidates = count,
                    criteria = criteria.as_str(),
                    "search matched more than one record"
                );
                Err(ResolutionFailure::AmbiguousMatch {
                    entity_type,
                    criteria,
                    candidates: matches,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use crmflow_core::crm::{BackendError, CrmBackend};
    use crmflow_core::domain::entity::{
        EntityRecord, EntityType, FieldName, FieldSet, ObjectId, Operation, PropertyDefinition,
    };
    use crmflow_core::domain::execution::ExecutionStatus;
    use crmflow_core::domain::intent::Intent;
    use crmflow_core::errors::ResolutionFailure;
    use crmflow_core::retry::RetryPolicy;

    use super::EntityResolver;

    struct SearchOnly {
        results: Result<Vec<EntityRecord>, BackendError>,
        searches: Mutex<u32>,
    }

    impl SearchOnly {
        fn new(results: Result<Vec<EntityRecord>, BackendError>) -> Arc<Self> {
            Arc::new(Self { results, searches: Mutex::new(0) })
        }

        fn searches(&self) -> u32 {
            self.searches.lock().map(|count| *count).unwrap_or_default()
        }
    }

    #[async_trait]
    impl CrmBackend for SearchOnly {
        async fn create_record(
            &self,
            _: EntityType,
            _: &FieldSet,
        ) -> Result<EntityRecord, BackendError> {
            Err(BackendError::http(500, "unexpected create"))
        }

        async fn update_record(
            &self,
            _: EntityType,
            _: &ObjectId,
            _: &FieldSet,
        ) -> Result<EntityRecord, BackendError> {
            Err(BackendError::http(500, "unexpected update"))
        }

        async fn delete_record(&self, _: EntityType, _: &ObjectId) -> Result<(), BackendError> {
            Err(BackendError::http(500, "unexpected delete"))
        }

        async fn search(
            &self,
            _: EntityType,
            _: &FieldSet,
        ) -> Result<Vec<EntityRecord>, BackendError> {
            if let Ok(mut count) = self.searches.lock() {
                *count += 1;
            }
            self.results.clone()
        }

        async fn get_record(
            &self,
            _: EntityType,
            _: &ObjectId,
        ) -> Result<EntityRecord, BackendError> {
            Err(BackendError::http(500, "unexpected get"))
        }

        async fn associate(
            &self,
            _: EntityType,
            _: &ObjectId,
            _: EntityType,
            _: &ObjectId,
        ) -> Result<(), BackendError> {
            Err(BackendError::http(500, "unexpected associate"))
        }

        async fn list_properties(
            &self,
            _: EntityType,
        ) -> Result<Vec<PropertyDefinition>, BackendError> {
            Err(BackendError::http(500, "unexpected property listing"))
        }
    }

    fn contact(id: &str, first: &str, email: &str) -> EntityRecord {
        let fields = FieldSet::from_properties(
            EntityType::Contact,
            [("firstname", first), ("email", email)],
        );
        EntityRecord::new(id, EntityType::Contact, fields)
    }

    fn update_jane() -> Intent {
        let mut intent = Intent::new(Operation::Update, EntityType::Contact);
        intent.search_criteria.set(FieldName::FirstName, "Jane");
        intent.fields.set(FieldName::Phone, "555-0100");
        intent
    }

    #[tokio::test]
    async fn single_match_attaches_identifier() {
        let backend = SearchOnly::new(Ok(vec![contact("101", "Jane", "jane@example.com")]));
        let resolver = EntityResolver::new(backend.clone(), RetryPolicy::immediate(3));

        let intent = resolver.resolve(update_jane()).await.expect("resolved");
        assert_eq!(intent.identifier, Some(ObjectId("101".to_string())));
        assert_eq!(intent.fields.get(FieldName::Phone), Some("555-0100"));

        let again = resolver.resolve(update_jane()).await.expect("resolved");
        assert_eq!(again.identifier, intent.identifier);
        assert_eq!(backend.searches(), 2);
    }

    #[tokio::test]
    async fn several_matches_are_never_guessed() {
        let backend = SearchOnly::new(Ok(vec![
            contact("101", "Jane", "jane@example.com"),
            contact("102", "Jane", "jane.d@example.com"),
        ]));
        let resolver = EntityResolver::new(backend, RetryPolicy::immediate(3));

        let failure = resolver.resolve(update_jane()).await.expect_err("ambiguous");
        let ids = match &failure {
            ResolutionFailure::AmbiguousMatch { candidates, .. } => {
                candidates.iter().map(|record| record.id.0.clone()).collect::<Vec<_>>()
            }
            _ => Vec::new(),
        };
        assert_eq!(ids, vec!["101".to_string(), "102".to_string()]);
        assert_eq!(failure.status(), ExecutionStatus::AmbiguousMatch);
    }

    #[tokio::test]
    async fn no_match_and_missing_criteria() {
        let backend = SearchOnly::new(Ok(Vec::new()));
        let resolver = EntityResolver::new(backend.clone(), RetryPolicy::immediate(3));

        let failure = resolver.resolve(update_jane()).await.expect_err("not found");
        assert_eq!(failure.status(), ExecutionStatus::NotFound);
        assert!(failure.to_string().contains("firstname=Jane"));

        let bare = Intent::new(Operation::Delete, EntityType::Deal);
        let failure = resolver.resolve(bare).await.expect_err("no criteria");
        assert_eq!(failure, ResolutionFailure::MissingCriteria { entity_type: EntityType::Deal });
        assert_eq!(backend.searches(), 1);
    }

    #[tokio::test]
    async fn backend_failures_keep_their_classification() {
        let backend = SearchOnly::new(Err(BackendError::http(403, "missing scopes")));
        let resolver = EntityResolver::new(backend.clone(), RetryPolicy::immediate(3));

        let failure = resolver.resolve(update_jane()).await.expect_err("auth");
        assert_eq!(failure.status(), ExecutionStatus::AuthError);
        assert_eq!(failure.attempts(), 1);

        let backend = SearchOnly::new(Err(BackendError::Timeout));
        let resolver = EntityResolver::new(backend.clone(), RetryPolicy::immediate(2));
        let failure = resolver.resolve(update_jane()).await.expect_err("transient");
        assert_eq!(failure.status(), ExecutionStatus::TransientError);
        assert_eq!(backend.searches(), 2);
    }
}
