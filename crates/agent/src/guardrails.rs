use crmflow_core::domain::entity::{EntityType, Operation};
use crmflow_core::domain::intent::Intent;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String, fallback_path: &'static str },
    Degrade { reason_code: &'static str, user_message: String, fallback_path: &'static str },
}

impl GuardrailDecision {
    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::Allow => None,
            Self::Deny { reason_code, .. } | Self::Degrade { reason_code, .. } => {
                Some(*reason_code)
            }
        }
    }
}

/// Checks an intent before it reaches the backend. Denials fail closed; degradations
/// are logged and the call proceeds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub allow_delete: bool,
}

impl GuardrailPolicy {
    pub fn new(allow_delete: bool) -> Self {
        Self { allow_delete }
    }

    /// Operation-level gate that does not depend on the record. Checked before resolution
    /// so a disabled operation never reaches the backend.
    pub fn capability(&self, operation: Operation, entity_type: EntityType) -> GuardrailDecision {
        match operation {
            Operation::Delete if !self.allow_delete => GuardrailDecision::Deny {
                reason_code: "delete_disabled",
                user_message: format!(
                    "Deleting {entity_type} records is disabled. Set crm.allow_delete = true to \
                     enable it."
                ),
                fallback_path: "enable_delete_in_config",
            },
            _ => GuardrailDecision::Allow,
        }
    }

    pub fn evaluate(&self, intent: &Intent) -> GuardrailDecision {
        let gate = self.capability(intent.operation, intent.entity_type);
        if gate != GuardrailDecision::Allow {
            return gate;
        }

        match intent.operation {
            Operation::Update | Operation::Delete | Operation::Associate
                if intent.identifier.is_none() =>
            {
                GuardrailDecision::Deny {
                    reason_code: "identifier_missing",
                    user_message: format!(
                        "Cannot {} a {} without a resolved record ID.",
                        intent.operation, intent.entity_type
                    ),
                    fallback_path: "provide_record_id",
                }
            }
            Operation::Update if intent.fields.is_empty() => GuardrailDecision::Deny {
                reason_code: "update_without_fields",
                user_message: format!(
                    "No fields to change were given for {} {}.",
                    intent.entity_type,
                    intent.identifier.as_ref().map(ToString::to_string).unwrap_or_default()
                ),
                fallback_path: "provide_field_values",
            },
            Operation::Associate if intent.association.is_none() => GuardrailDecision::Deny {
                reason_code: "association_target_missing",
                user_message: format!(
                    "No record to link the {} to was given.",
                    intent.entity_type
                ),
                fallback_path: "provide_association_target",
            },
            Operation::Create if intent.fields.is_empty() => GuardrailDecision::Deny {
                reason_code: "create_without_fields",
                user_message: format!(
                    "No field values were given for the new {}.",
                    intent.entity_type
                ),
                fallback_path: "provide_field_values",
            },
            Operation::Create | Operation::Update if !intent.fields.extra.is_empty() => {
                let names = intent.fields.extra.keys().cloned().collect::<Vec<_>>().join(", ");
                GuardrailDecision::Degrade {
                    reason_code: "unrecognized_fields",
                    user_message: format!(
                        "Passing fields that are not standard for a {} through as-is: {names}.",
                        intent.entity_type
                    ),
                    fallback_path: "forward_extra_fields",
                }
            }
            _ => GuardrailDecision::Allow,
        }
    }
}
