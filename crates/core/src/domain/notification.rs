use serde::{Deserialize, Serialize};

use crate::domain::entity::{EntityType, ObjectId, Operation};
use crate::domain::execution::ExecutionStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    CreationSuccess,
    UpdateSuccess,
    ReadSuccess,
    DeleteSuccess,
    AssociationSuccess,
    PropertyListing,
    OperationFailure,
}

impl NotificationKind {
    pub fn select(operation: Option<Operation>, status: ExecutionStatus) -> Self {
        match (operation, status) {
            (Some(Operation::Create), ExecutionStatus::Success) => Self::CreationSuccess,
            (Some(Operation::Update), ExecutionStatus::Success) => Self::UpdateSuccess,
            (Some(Operation::Read), ExecutionStatus::Success) => Self::ReadSuccess,
            (Some(Operation::Delete), ExecutionStatus::Success) => Self::DeleteSuccess,
            (Some(Operation::Associate), ExecutionStatus::Success) => Self::AssociationSuccess,
            (Some(Operation::ListProperties), ExecutionStatus::Success) => Self::PropertyListing,
            _ => Self::OperationFailure,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreationSuccess => "creation_success",
            Self::UpdateSuccess => "update_success",
            Self::ReadSuccess => "read_success",
            Self::DeleteSuccess => "delete_success",
            Self::AssociationSuccess => "association_success",
            Self::PropertyListing => "property_listing",
            Self::OperationFailure => "operation_failure",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub kind: NotificationKind,
    pub entity_type: Option<EntityType>,
    pub object_id: Option<ObjectId>,
    pub summary_fields: Vec<(String, String)>,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::NotificationKind;
    use crate::domain::entity::Operation;
    use crate::domain::execution::ExecutionStatus;

    #[test]
    fn template_kind_is_keyed_by_operation_and_status() {
        assert_eq!(
            NotificationKind::select(Some(Operation::Create), ExecutionStatus::Success),
            NotificationKind::CreationSuccess
        );
        assert_eq!(
            NotificationKind::select(Some(Operation::Update), ExecutionStatus::Success),
            NotificationKind::UpdateSuccess
        );
        assert_eq!(
            NotificationKind::select(Some(Operation::Create), ExecutionStatus::ValidationError),
            NotificationKind::OperationFailure
        );
        assert_eq!(
            NotificationKind::select(Some(Operation::Delete), ExecutionStatus::AmbiguousMatch),
            NotificationKind::OperationFailure
        );
        assert_eq!(
            NotificationKind::select(Some(Operation::Associate), ExecutionStatus::Success),
            NotificationKind::AssociationSuccess
        );
        assert_eq!(
            NotificationKind::select(Some(Operation::ListProperties), ExecutionStatus::Success),
            NotificationKind::PropertyListing
        );
    }
}
