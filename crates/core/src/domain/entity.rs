use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub String);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Contact,
    Company,
    Deal,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [Self::Contact, Self::Company, Self::Deal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contact => "contact",
            Self::Company => "company",
            Self::Deal => "deal",
        }
    }

    /// Object type segment used by the CRM REST API.
    pub fn object_path(&self) -> &'static str {
        match self {
            Self::Contact => "contacts",
            Self::Company => "companies",
            Self::Deal => "deals",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Contact => "Contact",
            Self::Company => "Company",
            Self::Deal => "Deal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "contact" | "contacts" => Some(Self::Contact),
            "company" | "companies" => Some(Self::Company),
            "deal" | "deals" => Some(Self::Deal),
            _ => None,
        }
    }

    pub fn accepts(&self, field: FieldName) -> bool {
        self.recognized_fields().contains(&field)
    }

    pub fn recognized_fields(&self) -> &'static [FieldName] {
        use FieldName::*;
        match self {
            Self::Contact => &[FirstName, LastName, Email, Phone, Company],
            Self::Company => &[Name, Domain, Phone],
            Self::Deal => &[DealName, Amount, DealStage, CloseDate],
        }
    }

    /// Fields that tell two records of this type apart when a search is ambiguous.
    pub fn distinguishing_fields(&self) -> &'static [FieldName] {
        use FieldName::*;
        match self {
            Self::Contact => &[FirstName, LastName, Email],
            Self::Company => &[Name, Domain],
            Self::Deal => &[DealName, Amount, DealStage],
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    /// Links an existing record to another record of any type.
    Associate,
    /// Lists the property definitions of a record type.
    ListProperties,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Associate => "associate",
            Self::ListProperties => "list_properties",
        }
    }

    /// Accepts the canonical names plus the verbs people actually type.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "create" | "add" | "new" | "make" | "create_object" => Some(Self::Create),
            "read" | "get" | "find" | "search" | "show" | "list" | "lookup" | "look" | "fetch"
            | "get_object" | "search_object" => Some(Self::Read),
            "update" | "change" | "set" | "modify" | "edit" | "update_object" => {
                Some(Self::Update)
            }
            "delete" | "remove" | "delete_object" => Some(Self::Delete),
            "associate" | "link" | "connect" | "attach" | "create_association" => {
                Some(Self::Associate)
            }
            "list_properties" | "get_properties" | "describe" => Some(Self::ListProperties),
            _ => None,
        }
    }

    pub fn mutates_existing(&self) -> bool {
        matches!(self, Self::Update | Self::Delete | Self::Associate)
    }

    pub fn past_tense(&self) -> &'static str {
        match self {
            Self::Create => "created",
            Self::Read => "retrieved",
            Self::Update => "updated",
            Self::Delete => "deleted",
            Self::Associate => "associated",
            Self::ListProperties => "listed",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldName {
    #[serde(rename = "firstname")]
    FirstName,
    #[serde(rename = "lastname")]
    LastName,
    #[serde(rename = "email")]
    Email,
    #[serde(rename = "phone")]
    Phone,
    #[serde(rename = "company")]
    Company,
    #[serde(rename = "name")]
    Name,
    #[serde(rename = "domain")]
    Domain,
    #[serde(rename = "amount")]
    Amount,
    #[serde(rename = "dealname")]
    DealName,
    #[serde(rename = "dealstage")]
    DealStage,
    #[serde(rename = "closedate")]
    CloseDate,
}

impl FieldName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstName => "firstname",
            Self::LastName => "lastname",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Company => "company",
            Self::Name => "name",
            Self::Domain => "domain",
            Self::Amount => "amount",
            Self::DealName => "dealname",
            Self::DealStage => "dealstage",
            Self::CloseDate => "closedate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "firstname" => Some(Self::FirstName),
            "lastname" => Some(Self::LastName),
            "email" => Some(Self::Email),
            "phone" => Some(Self::Phone),
            "company" => Some(Self::Company),
            "name" => Some(Self::Name),
            "domain" => Some(Self::Domain),
            "amount" => Some(Self::Amount),
            "dealname" => Some(Self::DealName),
            "dealstage" => Some(Self::DealStage),
            "closedate" => Some(Self::CloseDate),
            _ => None,
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Property bag for one entity type: recognized fields plus an explicit bucket for
/// anything the backend or the user supplied that is not part of the closed set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSet {
    pub known: BTreeMap<FieldName, String>,
    pub extra: BTreeMap<String, String>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files `key` under the recognized set when it belongs to `entity_type`, otherwise
    /// under `extra`.
    pub fn insert(&mut self, entity_type: EntityType, key: &str, value: impl Into<String>) {
        let value = value.into();
        match FieldName::parse(key) {
            Some(field) if entity_type.accepts(field) => {
                self.known.insert(field, value);
            }
            _ => {
                self.extra.insert(key.trim().to_ascii_lowercase(), value);
            }
        }
    }

    pub fn set(&mut self, field: FieldName, value: impl Into<String>) {
        self.known.insert(field, value.into());
    }

    pub fn get(&self, field: FieldName) -> Option<&str> {
        self.known.get(&field).map(String::as_str)
    }

    pub fn remove(&mut self, field: FieldName) -> Option<String> {
        self.known.remove(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty() && self.extra.is_empty()
    }

    pub fn len(&self) -> usize {
        self.known.len() + self.extra.len()
    }

    /// Wire view: recognized fields first, then extras, keyed by property name.
    pub fn to_properties(&self) -> BTreeMap<String, String> {
        let mut properties = self.extra.clone();
        for (field, value) in &self.known {
            properties.insert(field.as_str().to_string(), value.clone());
        }
        properties
    }

    pub fn from_properties<'a, I>(entity_type: EntityType, properties: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut set = Self::new();
        for (key, value) in properties {
            set.insert(entity_type, key, value);
        }
        set
    }

    pub fn iter_pairs(&self) -> impl Iterator<Item = (String, &str)> + '_ {
        self.known
            .iter()
            .map(|(field, value)| (field.as_str().to_string(), value.as_str()))
            .chain(self.extra.iter().map(|(key, value)| (key.clone(), value.as_str())))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: ObjectId,
    pub entity_type: EntityType,
    pub fields: FieldSet,
}

impl EntityRecord {
    pub fn new(id: impl Into<String>, entity_type: EntityType, fields: FieldSet) -> Self {
        Self { id: ObjectId(id.into()), entity_type, fields }
    }

    /// `firstname=Jane, email=jane@example.com` style summary of the distinguishing fields.
    pub fn distinguishing_summary(&self) -> String {
        let parts = self
            .entity_type
            .distinguishing_fields()
            .iter()
            .filter_map(|field| self.fields.get(*field).map(|value| format!("{field}={value}")))
            .collect::<Vec<_>>();
        if parts.is_empty() {
            "no distinguishing fields".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// The other end of an association.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationTarget {
    pub entity_type: EntityType,
    pub id: ObjectId,
}

impl fmt::Display for AssociationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.entity_type, self.id)
    }
}

/// One property the CRM defines for a record type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: String,
    pub label: String,
    pub value_type: String,
    pub field_type: String,
    pub description: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealStage {
    AppointmentScheduled,
    QualifiedToBuy,
    PresentationScheduled,
    DecisionMakerBoughtIn,
    ContractSent,
    ClosedWon,
    ClosedLost,
}

impl DealStage {
    pub const ALL: [DealStage; 7] = [
        Self::AppointmentScheduled,
        Self::QualifiedToBuy,
        Self::PresentationScheduled,
        Self::DecisionMakerBoughtIn,
        Self::ContractSent,
        Self::ClosedWon,
        Self::ClosedLost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppointmentScheduled => "appointmentscheduled",
            Self::QualifiedToBuy => "qualifiedtobuy",
            Self::PresentationScheduled => "presentationscheduled",
            Self::DecisionMakerBoughtIn => "decisionmakerboughtin",
            Self::ContractSent => "contractsent",
            Self::ClosedWon => "closedwon",
            Self::ClosedLost => "closedlost",
        }
    }

    /// Lowercases and trims the surrounding whitespace. Inner whitespace is kept, so
    /// `"closed won"` does not match `closedwon`.
    pub fn normalize(raw: &str) -> String {
        raw.trim().to_lowercase()
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = Self::normalize(raw);
        Self::ALL.into_iter().find(|stage| stage.as_str() == normalized)
    }

    pub fn vocabulary() -> Vec<&'static str> {
        Self::ALL.iter().map(DealStage::as_str).collect()
    }
}

/// Canonical decimal text for a monetary amount such as `$5,000` or `1 250.50`.
/// Returns `None` when the text is not a number.
pub fn normalize_amount(raw: &str) -> Option<String> {
    let cleaned = raw
        .trim()
        .chars()
        .filter(|ch| !matches!(ch, '$' | ',' | ' '))
        .collect::<String>();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<Decimal>().ok().map(|amount| amount.normalize().to_string())
}

#[cfg(test)]
mod tests {
    use super::{
        normalize_amount, DealStage, EntityRecord, EntityType, FieldName, FieldSet, Operation,
    };

    #[test]
    fn deal_stage_normalization_keeps_inner_whitespace() {
        assert_eq!(DealStage::parse("closedwon"), Some(DealStage::ClosedWon));
        assert_eq!(DealStage::parse("  ClosedWon \t"), Some(DealStage::ClosedWon));
        assert_eq!(DealStage::parse("closed won"), None);
        assert_eq!(DealStage::parse("won"), None);
    }

    #[test]
    fn amounts_are_normalized_to_plain_decimals() {
        assert_eq!(normalize_amount("$5,000").as_deref(), Some("5000"));
        assert_eq!(normalize_amount("1 250.50").as_deref(), Some("1250.5"));
        assert_eq!(normalize_amount("75000").as_deref(), Some("75000"));
        assert_eq!(normalize_amount("lots"), None);
        assert_eq!(normalize_amount("$"), None);
    }

    #[test]
    fn field_set_routes_foreign_fields_to_extra_bucket() {
        let mut fields = FieldSet::new();
        fields.insert(EntityType::Deal, "amount", "5000");
        fields.insert(EntityType::Deal, "email", "x@example.com");
        fields.insert(EntityType::Deal, "Priority", "high");

        assert_eq!(fields.get(FieldName::Amount), Some("5000"));
        assert_eq!(fields.get(FieldName::Email), None);
        assert_eq!(fields.extra.get("email").map(String::as_str), Some("x@example.com"));
        assert_eq!(fields.extra.get("priority").map(String::as_str), Some("high"));

        let properties = fields.to_properties();
        assert_eq!(properties.len(), 3);
        assert_eq!(properties.get("amount").map(String::as_str), Some("5000"));
    }

    #[test]
    fn operation_synonyms_map_to_canonical_operations() {
        assert_eq!(Operation::parse("Add"), Some(Operation::Create));
        assert_eq!(Operation::parse("lookup"), Some(Operation::Read));
        assert_eq!(Operation::parse("modify"), Some(Operation::Update));
        assert_eq!(Operation::parse("remove"), Some(Operation::Delete));
        assert_eq!(Operation::parse("link"), Some(Operation::Associate));
        assert_eq!(Operation::parse("get_properties"), Some(Operation::ListProperties));
        assert_eq!(Operation::parse("archive"), None);
        assert_eq!(EntityType::parse("Companies"), Some(EntityType::Company));
        assert_eq!(EntityType::parse("ticket"), None);
    }

    #[test]
    fn distinguishing_summary_lists_only_present_fields() {
        let fields = FieldSet::from_properties(
            EntityType::Contact,
            [("firstname", "Jane"), ("email", "jane@example.com"), ("phone", "555")],
        );
        let record = EntityRecord::new("7", EntityType::Contact, fields);
        assert_eq!(record.distinguishing_summary(), "firstname=Jane, email=jane@example.com");

        let bare = EntityRecord::new("8", EntityType::Contact, FieldSet::new());
        assert_eq!(bare.distinguishing_summary(), "no distinguishing fields");
    }
}
