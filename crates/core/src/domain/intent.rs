use serde::{Deserialize, Serialize};

use crate::domain::entity::{AssociationTarget, EntityType, FieldSet, ObjectId, Operation};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub operation: Operation,
    pub entity_type: EntityType,
    pub identifier: Option<ObjectId>,
    pub search_criteria: FieldSet,
    pub fields: FieldSet,
    /// Record to link to; only set for `Operation::Associate`.
    pub association: Option<AssociationTarget>,
}

impl Intent {
    pub fn new(operation: Operation, entity_type: EntityType) -> Self {
        Self {
            operation,
            entity_type,
            identifier: None,
            search_criteria: FieldSet::new(),
            fields: FieldSet::new(),
            association: None,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(ObjectId(identifier.into()));
        self
    }

    pub fn with_association(mut self, entity_type: EntityType, id: impl Into<String>) -> Self {
        self.association = Some(AssociationTarget { entity_type, id: ObjectId(id.into()) });
        self
    }

    /// Update/Delete/Associate without an identifier has to go through resolution first.
    pub fn needs_resolution(&self) -> bool {
        self.operation.mutates_existing() && self.identifier.is_none()
    }
}
