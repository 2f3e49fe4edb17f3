//! Free text to [`Intent`].
//!
//! A [`LanguageProvider`] turns the raw request into a loose [`Extraction`]; the
//! [`IntentParser`] then canonicalizes it against the closed vocabulary of operations,
//! record types, field names and deal stages. Providers may be fuzzy. Canonicalization
//! is deterministic.

use std::sync::Arc;

use async_trait::async_trait;
use crmflow_core::domain::entity::{
    normalize_amount, AssociationTarget, DealStage, EntityType, FieldName, FieldSet, ObjectId,
    Operation,
};
use crmflow_core::domain::intent::Intent;
use crmflow_core::errors::{ParseFailure, ParseFailureReason};
use crmflow_core::retry::RetryPolicy;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use crate::executor::call_with_retry;
use crate::llm::{LlmClient, ProviderError};

const CLAUSE_MARKERS: [&str; 3] = ["with", "having", "where"];
const NAME_MARKERS: [&str; 3] = ["for", "called", "named"];
const CONNECTORS: [&str; 7] = ["of", "to", "as", "is", "set", "=", ":"];
const LEADING_FILLERS: [&str; 4] = ["the", "a", "an", "named"];
const LINK_WORDS: [&str; 4] = ["with", "to", "and", "for"];
const PROPERTY_WORDS: [&str; 2] = ["properties", "schema"];

/// What a provider pulled out of a request, before any validation.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Extraction {
    #[serde(default, deserialize_with = "optional_text")]
    pub operation: Option<String>,
    #[serde(default, alias = "object_type", deserialize_with = "optional_text")]
    pub entity_type: Option<String>,
    #[serde(default, alias = "object_id", deserialize_with = "optional_text")]
    pub identifier: Option<String>,
    #[serde(default, alias = "properties", deserialize_with = "text_pairs")]
    pub fields: Vec<(String, String)>,
    #[serde(default, deserialize_with = "text_pairs")]
    pub search_criteria: Vec<(String, String)>,
    #[serde(default)]
    pub association: Option<AssociationExtraction>,
    #[serde(default = "full_confidence", deserialize_with = "confidence_field")]
    pub confidence: u8,
}

/// The record an `associate` request links to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AssociationExtraction {
    #[serde(
        default,
        alias = "object_type",
        alias = "to_object_type",
        deserialize_with = "optional_text"
    )]
    pub entity_type: Option<String>,
    #[serde(
        default,
        alias = "object_id",
        alias = "to_object_id",
        deserialize_with = "optional_text"
    )]
    pub identifier: Option<String>,
}

impl Default for Extraction {
    fn default() -> Self {
        Self {
            operation: None,
            entity_type: None,
            identifier: None,
            fields: Vec::new(),
            search_criteria: Vec::new(),
            association: None,
            confidence: full_confidence(),
        }
    }
}

fn full_confidence() -> u8 {
    100
}

#[async_trait]
pub trait LanguageProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn extract(&self, query: &str) -> Result<Extraction, ProviderError>;
}

/// Deterministic token grammar. Needs no network and never fails.
#[derive(Clone, Debug, Default)]
pub struct KeywordProvider;

#[async_trait]
impl LanguageProvider for KeywordProvider {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn extract(&self, query: &str) -> Result<Extraction, ProviderError> {
        Ok(self.scan(query))
    }
}

impl KeywordProvider {
    pub fn scan(&self, query: &str) -> Extraction {
        let words = query.split_whitespace().collect::<Vec<_>>();
        let lowered = words.iter().map(|word| bare_word(word)).collect::<Vec<_>>();

        let operation_index = lowered.iter().position(|word| Operation::parse(word).is_some());
        let search_from = operation_index.map_or(0, |index| index + 1);
        let entity_index = lowered
            .iter()
            .enumerate()
            .skip(search_from)
            .find(|(_, word)| EntityType::parse(word).is_some())
            .or_else(|| {
                lowered.iter().enumerate().find(|(_, word)| EntityType::parse(word).is_some())
            })
            .map(|(index, _)| index);

        let mut operation = operation_index.and_then(|index| Operation::parse(&lowered[index]));
        let entity_type = entity_index.and_then(|index| EntityType::parse(&lowered[index]));

        let mut extraction = Extraction {
            operation: operation_index.map(|index| lowered[index].clone()),
            entity_type: entity_index.map(|index| lowered[index].clone()),
            ..Extraction::default()
        };

        let asks_for_properties =
            lowered.iter().any(|word| PROPERTY_WORDS.contains(&word.as_str()));
        if asks_for_properties && matches!(operation, None | Some(Operation::Read)) {
            operation = Some(Operation::ListProperties);
            extraction.operation = Some(Operation::ListProperties.as_str().to_string());
        }

        match (operation, entity_type, entity_index) {
            (Some(Operation::ListProperties), ..) => {}
            (Some(Operation::Associate), Some(entity_type), Some(entity_index)) => self
                .scan_association(
                    &mut extraction,
                    entity_type,
                    &words[entity_index + 1..],
                    &lowered[entity_index + 1..],
                ),
            (Some(operation), Some(entity_type), Some(entity_index)) => self.scan_details(
                &mut extraction,
                operation,
                entity_type,
                &words[entity_index + 1..],
                &lowered[entity_index + 1..],
            ),
            _ => {}
        }

        extraction.confidence = confidence_score(
            extraction.operation.is_some(),
            extraction.entity_type.is_some(),
            extraction.identifier.is_some()
                || !extraction.fields.is_empty()
                || !extraction.search_criteria.is_empty(),
        );
        extraction
    }

    fn scan_details(
        &self,
        extraction: &mut Extraction,
        operation: Operation,
        entity_type: EntityType,
        words: &[&str],
        lowered: &[String],
    ) {
        let clause_at = lowered
            .iter()
            .position(|word| CLAUSE_MARKERS.contains(&word.as_str()))
            .unwrap_or(words.len());
        let (head, head_lowered) = (&words[..clause_at], &lowered[..clause_at]);
        let mut clause_text = words.get(clause_at + 1..).unwrap_or_default().join(" ");

        let mut cursor = 0;
        if head_lowered.first().is_some_and(|word| matches!(word.as_str(), "id" | "number")) {
            cursor += 1;
        }
        if let Some(candidate) = head_lowered.get(cursor) {
            let candidate = candidate.trim_start_matches('#');
            if !candidate.is_empty() && candidate.chars().all(|ch| ch.is_ascii_digit()) {
                extraction.identifier = Some(candidate.to_string());
                cursor += 1;
            }
        }

        let remaining = &head[cursor..];
        let remaining_lowered = &head_lowered[cursor..];
        let mut reference = Vec::new();
        match remaining_lowered.first() {
            None => {}
            Some(word) if NAME_MARKERS.contains(&word.as_str()) => {
                reference = remaining[1..].to_vec();
            }
            Some(_) if known_alias_prefix(remaining_lowered).is_some() => {
                let inline = remaining.join(" ");
                clause_text = if clause_text.is_empty() {
                    inline
                } else {
                    format!("{inline}, {clause_text}")
                };
            }
            Some(_) => reference = remaining.to_vec(),
        }

        while reference
            .first()
            .is_some_and(|word| LEADING_FILLERS.contains(&bare_word(word).as_str()))
        {
            reference.remove(0);
        }

        let locates_existing = !matches!(operation, Operation::Create);
        let reference_pairs = reference_pairs(entity_type, &reference);
        if locates_existing {
            extraction.search_criteria.extend(reference_pairs);
        } else {
            extraction.fields.extend(reference_pairs);
        }

        let clause_pairs =
            split_clauses(&clause_text).into_iter().filter_map(|clause| parse_clause(&clause));
        if matches!(operation, Operation::Read | Operation::Delete) {
            extraction.search_criteria.extend(clause_pairs);
        } else {
            extraction.fields.extend(clause_pairs);
        }
    }

    /// `<source ref> (with|to) <entity> <id>`: the source is an id or a search reference.
    fn scan_association(
        &self,
        extraction: &mut Extraction,
        entity_type: EntityType,
        words: &[&str],
        lowered: &[String],
    ) {
        let target_at = lowered
            .iter()
            .position(|word| EntityType::parse(word).is_some())
            .unwrap_or(words.len());

        let mut source = &words[..target_at];
        while source.last().is_some_and(|word| {
            let word = bare_word(word);
            LINK_WORDS.contains(&word.as_str()) || LEADING_FILLERS.contains(&word.as_str())
        }) {
            source = &source[..source.len() - 1];
        }
        let source = strip_id_marker(source);
        match source {
            [single] if is_record_id(single) => {
                extraction.identifier = Some(bare_word(single).trim_start_matches('#').to_string());
            }
            _ => {
                let mut reference = source;
                while reference.first().is_some_and(|word| {
                    let word = bare_word(word);
                    [LEADING_FILLERS.as_slice(), NAME_MARKERS.as_slice()]
                        .iter()
                        .any(|markers| markers.contains(&word.as_str()))
                }) {
                    reference = &reference[1..];
                }
                extraction.search_criteria.extend(reference_pairs(entity_type, reference));
            }
        }

        let Some(target_word) = lowered.get(target_at) else {
            return;
        };
        let target_id = strip_id_marker(&words[target_at + 1..])
            .first()
            .map(|word| bare_word(word).trim_start_matches('#').to_string())
            .filter(|word| is_record_id(word));
        extraction.association = Some(AssociationExtraction {
            entity_type: Some(target_word.clone()),
            identifier: target_id,
        });
    }
}

/// Drops a leading `id` or `number` before a record id.
fn strip_id_marker<'a, 'b>(words: &'a [&'b str]) -> &'a [&'b str] {
    match words.first() {
        Some(word) if matches!(bare_word(word).as_str(), "id" | "number") => &words[1..],
        _ => words,
    }
}

fn is_record_id(word: &str) -> bool {
    let digits = bare_word(word);
    let digits = digits.trim_start_matches('#');
    !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit())
}

/// LLM-backed provider speaking JSON against a published schema.
#[derive(Clone)]
pub struct ModelProvider {
    client: Arc<dyn LlmClient>,
    retry: RetryPolicy,
}

impl ModelProvider {
    /// Timeouts and transport failures are retried per `retry` before the parse is failed.
    pub fn new(client: Arc<dyn LlmClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn extraction_schema() -> Value {
        let known_fields = [
            FieldName::FirstName,
            FieldName::LastName,
            FieldName::Email,
            FieldName::Phone,
            FieldName::Company,
            FieldName::Name,
            FieldName::Domain,
            FieldName::Amount,
            FieldName::DealName,
            FieldName::DealStage,
            FieldName::CloseDate,
        ]
        .iter()
        .map(FieldName::as_str)
        .collect::<Vec<_>>();

        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["create", "read", "update", "delete", "associate", "list_properties"]
                },
                "entity_type": {"type": "string", "enum": ["contact", "company", "deal"]},
                "identifier": {
                    "type": ["string", "null"],
                    "description": "numeric CRM object id when the user gave one"
                },
                "fields": {
                    "type": "object",
                    "description": format!(
                        "values to set; prefer these names: {}",
                        known_fields.join(", ")
                    ),
                    "additionalProperties": {"type": "string"}
                },
                "search_criteria": {
                    "type": "object",
                    "description": "values that identify an existing record when no id was given",
                    "additionalProperties": {"type": "string"}
                },
                "association": {
                    "type": ["object", "null"],
                    "description": "for associate: the record to link to",
                    "properties": {
                        "entity_type": {"type": "string", "enum": ["contact", "company", "deal"]},
                        "identifier": {"type": "string"}
                    }
                },
                "dealstage_vocabulary": {"type": "string", "enum": DealStage::vocabulary()},
                "confidence": {"type": "integer", "minimum": 0, "maximum": 100}
            },
            "required": ["operation", "entity_type", "confidence"]
        })
    }

    fn prompt(query: &str) -> String {
        format!(
            "Extract the CRM operation from this request. Lookups and searches are `read`. \
             Put values that locate an existing record in `search_criteria` and values to \
             write in `fields`. Linking two records is `associate` with the record to link \
             to in `association`. Questions about which fields exist are `list_properties`. \
             Copy deal stages exactly as written.\n\nRequest: {query}"
        )
    }
}

#[async_trait]
impl LanguageProvider for ModelProvider {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn extract(&self, query: &str) -> Result<Extraction, ProviderError> {
        let (prompt, schema) = (Self::prompt(query), Self::extraction_schema());
        let (prompt, schema, client) = (&prompt, &schema, &self.client);
        let (reply, attempts) =
            call_with_retry(&self.retry, "llm extract", || client.complete(prompt, schema)).await;
        let reply = reply?;
        tracing::debug!(event_name = "parser.llm_replied", attempt = attempts, "model replied");
        serde_json::from_str::<Extraction>(strip_code_fences(&reply))
            .map_err(|error| ProviderError::Malformed(error.to_string()))
    }
}

pub struct IntentParser {
    provider: Arc<dyn LanguageProvider>,
    min_confidence: u8,
}

impl IntentParser {
    pub fn new(provider: Arc<dyn LanguageProvider>, min_confidence: u8) -> Self {
        Self { provider, min_confidence }
    }

    pub fn keyword() -> Self {
        Self::new(Arc::new(KeywordProvider), 0)
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub async fn parse(&self, query: &str) -> Result<Intent, ParseFailure> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ParseFailure::unrecognized("the request is empty"));
        }

        let extraction = self.provider.extract(query).await.map_err(provider_failure)?;
        canonicalize(extraction, self.min_confidence)
    }
}

fn provider_failure(error: ProviderError) -> ParseFailure {
    match error {
        ProviderError::Malformed(detail) => {
            ParseFailure::unrecognized(format!("unusable language provider reply: {detail}"))
        }
        other => ParseFailure::new(ParseFailureReason::ProviderUnavailable, other.to_string()),
    }
}

enum CanonicalKey {
    Identifier,
    FullName,
    Field(String),
}

/// Validates an extraction and maps it onto the closed vocabulary.
pub fn canonicalize(extraction: Extraction, min_confidence: u8) -> Result<Intent, ParseFailure> {
    let operation_word = non_empty(extraction.operation.as_deref()).ok_or_else(|| {
        ParseFailure::unrecognized(
            "no CRM operation (create, read, update, delete, associate) was found",
        )
    })?;
    let operation = Operation::parse(operation_word).ok_or_else(|| {
        ParseFailure::unrecognized(format!("`{operation_word}` is not a supported operation"))
    })?;

    let entity_word = non_empty(extraction.entity_type.as_deref()).ok_or_else(|| {
        ParseFailure::unrecognized("no record type (contact, company, deal) was found")
            .scoped(Some(operation), None)
    })?;
    let entity_type = EntityType::parse(entity_word).ok_or_else(|| {
        ParseFailure::unrecognized(format!("`{entity_word}` is not a supported record type"))
            .scoped(Some(operation), None)
    })?;

    if extraction.confidence < min_confidence {
        return Err(ParseFailure::new(
            ParseFailureReason::LowConfidence,
            format!(
                "extraction confidence {} is below the required {min_confidence}",
                extraction.confidence
            ),
        )
        .scoped(Some(operation), Some(entity_type)));
    }

    let scope = |failure: ParseFailure| failure.scoped(Some(operation), Some(entity_type));
    let association = match operation {
        Operation::Associate => Some(association_target(extraction.association).map_err(scope)?),
        _ => None,
    };
    let mut identifier = non_empty(extraction.identifier.as_deref())
        .map(|value| value.trim_start_matches('#').to_string());
    let mut fields = FieldSet::new();
    let mut criteria = FieldSet::new();

    for (target, pairs) in
        [(&mut fields, extraction.fields), (&mut criteria, extraction.search_criteria)]
    {
        for (key, value) in pairs {
            let value = clean_value(&value);
            if value.is_empty() {
                continue;
            }
            match canonical_key(entity_type, &key) {
                CanonicalKey::Identifier => {
                    identifier.get_or_insert_with(|| value.trim_start_matches('#').to_string());
                }
                CanonicalKey::FullName => {
                    for (name, part) in split_person_name(&value) {
                        target.insert(entity_type, name, part);
                    }
                }
                CanonicalKey::Field(name) => {
                    let value = normalize_value(&name, value).map_err(scope)?;
                    target.insert(entity_type, &name, value);
                }
            }
        }
    }

    match operation {
        Operation::Create => {
            identifier = None;
            criteria = FieldSet::new();
        }
        Operation::ListProperties => {
            identifier = None;
            criteria = FieldSet::new();
            fields = FieldSet::new();
        }
        Operation::Read | Operation::Delete | Operation::Associate => {
            for (key, value) in fields.iter_pairs() {
                criteria.insert(entity_type, &key, value);
            }
            fields = FieldSet::new();
        }
        Operation::Update => {
            if identifier.is_none() && criteria.is_empty() && entity_type == EntityType::Contact {
                if let Some(email) = fields.remove(FieldName::Email) {
                    criteria.set(FieldName::Email, email);
                }
            }
        }
    }

    let mut intent = Intent::new(operation, entity_type);
    intent.identifier = identifier.map(ObjectId);
    intent.fields = fields;
    intent.search_criteria = criteria;
    intent.association = association;
    Ok(intent)
}

fn association_target(
    extraction: Option<AssociationExtraction>,
) -> Result<AssociationTarget, ParseFailure> {
    let extraction = extraction.unwrap_or_default();
    let entity_word = non_empty(extraction.entity_type.as_deref()).ok_or_else(|| {
        ParseFailure::unrecognized("no record type to link to (contact, company, deal) was found")
    })?;
    let entity_type = EntityType::parse(entity_word).ok_or_else(|| {
        ParseFailure::unrecognized(format!("`{entity_word}` is not a supported record type"))
    })?;
    let id = non_empty(extraction.identifier.as_deref())
        .map(|value| value.trim_start_matches('#'))
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            ParseFailure::unrecognized(format!("no ID was given for the {entity_type} to link to"))
        })?;
    Ok(AssociationTarget { entity_type, id: ObjectId(id.to_string()) })
}

fn normalize_value(field: &str, value: String) -> Result<String, ParseFailure> {
    match field {
        "amount" => Ok(normalize_amount(&value).unwrap_or(value)),
        "dealstage" => DealStage::parse(&value).map(|stage| stage.as_str().to_string()).ok_or_else(
            || {
                ParseFailure::invalid_enum_value(format!(
                    "`{value}` is not a recognized deal stage (expected one of: {})",
                    DealStage::vocabulary().join(", ")
                ))
            },
        ),
        _ => Ok(value),
    }
}

fn canonical_key(entity_type: EntityType, raw: &str) -> CanonicalKey {
    let normalized = normalize_key(raw);
    match (field_alias(&normalized), entity_type) {
        (Some("id"), _) => CanonicalKey::Identifier,
        (Some("name"), EntityType::Contact) => CanonicalKey::FullName,
        (Some("name"), EntityType::Deal) => CanonicalKey::Field("dealname".to_string()),
        (Some("company"), EntityType::Company) => CanonicalKey::Field("name".to_string()),
        (Some(alias), _) => CanonicalKey::Field(alias.to_string()),
        (None, _) => CanonicalKey::Field(normalized.replace(' ', "_")),
    }
}

fn field_alias(normalized: &str) -> Option<&'static str> {
    let canonical = match normalized {
        "id" | "objectid" | "object id" | "record id" | "hs object id" => "id",
        "first name" | "firstname" | "given name" => "firstname",
        "last name" | "lastname" | "surname" | "family name" => "lastname",
        "email" | "email address" | "e mail" | "mail" => "email",
        "phone" | "phone number" | "mobile" | "telephone" => "phone",
        "company" | "company name" => "company",
        "name" | "full name" => "name",
        "domain" | "company domain" => "domain",
        "amount" | "value" | "deal amount" | "deal value" => "amount",
        "dealname" | "deal name" | "title" => "dealname",
        "dealstage" | "deal stage" | "stage" | "pipeline stage" => "dealstage",
        "closedate" | "close date" | "closing date" => "closedate",
        _ => return None,
    };
    Some(canonical)
}

fn normalize_key(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(':')
        .to_lowercase()
        .split(|ch: char| ch.is_whitespace() || ch == '_' || ch == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Longest known field alias (up to three words) at the start of `words`.
fn known_alias_prefix(words: &[String]) -> Option<usize> {
    (1..=words.len().min(3))
        .rev()
        .find(|count| field_alias(&normalize_key(&words[..*count].join(" "))).is_some())
}

fn reference_pairs(entity_type: EntityType, words: &[&str]) -> Vec<(String, String)> {
    let text = clean_value(&words.join(" "));
    if text.is_empty() {
        return Vec::new();
    }
    if words.len() == 1 && looks_like_email(&text) {
        return vec![("email".to_string(), text)];
    }
    match entity_type {
        EntityType::Contact => split_person_name(&text)
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect(),
        EntityType::Deal => vec![("dealname".to_string(), text)],
        EntityType::Company => vec![("name".to_string(), text)],
    }
}

fn split_person_name(text: &str) -> Vec<(&'static str, String)> {
    let mut parts = text.split_whitespace();
    let mut pairs = Vec::new();
    if let Some(first) = parts.next() {
        pairs.push(("firstname", first.to_string()));
    }
    let rest = parts.collect::<Vec<_>>().join(" ");
    if !rest.is_empty() {
        pairs.push(("lastname", rest));
    }
    pairs
}

/// Splits on `,` (but not inside numbers such as `5,000`) and on an `and` that is
/// followed by another field name, so `Research and Development` stays one value.
fn split_clauses(text: &str) -> Vec<String> {
    let chars = text.chars().collect::<Vec<_>>();
    let mut segments = Vec::new();
    let mut current = String::new();
    for (index, ch) in chars.iter().enumerate() {
        let inside_number = index > 0
            && chars[index - 1].is_ascii_digit()
            && chars.get(index + 1).is_some_and(char::is_ascii_digit);
        if *ch == ',' && !inside_number {
            segments.push(std::mem::take(&mut current));
        } else {
            current.push(*ch);
        }
    }
    segments.push(current);

    let mut clauses = Vec::new();
    for segment in segments {
        let words = segment.split_whitespace().collect::<Vec<_>>();
        let mut clause = Vec::new();
        for (index, word) in words.iter().enumerate() {
            if word.eq_ignore_ascii_case("and") && starts_new_clause(&words[index + 1..]) {
                clauses.push(clause.join(" "));
                clause.clear();
            } else {
                clause.push(*word);
            }
        }
        clauses.push(clause.join(" "));
    }
    clauses.into_iter().filter(|clause| !clause.trim().is_empty()).collect()
}

fn starts_new_clause(following: &[&str]) -> bool {
    let Some(next) = following.first() else {
        return false;
    };
    if next.contains('=') || next.ends_with(':') {
        return true;
    }
    let lowered = following.iter().take(3).map(|word| bare_word(word)).collect::<Vec<_>>();
    known_alias_prefix(&lowered).is_some_and(|key_len| following.len() > key_len)
}

fn parse_clause(clause: &str) -> Option<(String, String)> {
    let clause = clause.trim().trim_end_matches(['.', '!', '?', ';']);
    for separator in ["=", ": "] {
        if let Some((key, value)) = clause.split_once(separator) {
            let (key, value) = (key.trim(), value.trim());
            if !key.is_empty() && !value.is_empty() && key.split_whitespace().count() <= 3 {
                return Some((key.to_string(), value.to_string()));
            }
        }
    }

    let words = clause.split_whitespace().collect::<Vec<_>>();
    let lowered = words.iter().map(|word| bare_word(word)).collect::<Vec<_>>();
    let key_len = known_alias_prefix(&lowered).unwrap_or(1);
    if words.len() <= key_len {
        return None;
    }

    let key = lowered[..key_len].join(" ");
    let mut value_words = &words[key_len..];
    while value_words
        .first()
        .is_some_and(|word| CONNECTORS.contains(&bare_word(word).as_str()))
    {
        value_words = &value_words[1..];
    }
    let value = clean_value(&value_words.join(" "));
    (!value.is_empty()).then_some((key, value))
}

fn bare_word(word: &str) -> String {
    word.trim_matches(|ch: char| matches!(ch, ',' | '.' | '?' | '!' | ':' | ';' | '"' | '\''))
        .to_lowercase()
}

fn clean_value(value: &str) -> String {
    value
        .trim()
        .trim_end_matches(['.', ',', '!', '?', ';'])
        .trim_matches(|ch: char| matches!(ch, '"' | '\'' | '`'))
        .trim()
        .to_string()
}

fn looks_like_email(value: &str) -> bool {
    value.split_once('@').is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn confidence_score(has_operation: bool, has_entity: bool, has_details: bool) -> u8 {
    let mut score = 10u8;
    if has_operation {
        score += 40;
    }
    if has_entity {
        score += 30;
    }
    if has_details {
        score += 20;
    }
    score.min(100)
}

/// Strips a surrounding Markdown code fence (```json ... ```) from a model reply.
pub fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    match inner.split_once('\n') {
        Some((language, body)) if !language.trim_start().starts_with('{') => body.trim(),
        _ => inner.trim(),
    }
}

fn text_value(value: Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(text_value).filter(|text| !text.trim().is_empty()))
}

fn text_pairs<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Object(map)) = value else {
        return Ok(Vec::new());
    };
    Ok(map
        .into_iter()
        .filter_map(|(key, value)| text_value(value).map(|text| (key, text)))
        .collect())
}

/// Accepts 0..=100 integers as well as 0.0..=1.0 fractions.
fn confidence_score_from(value: f64) -> u8 {
    let scaled = if value <= 1.0 { value * 100.0 } else { value };
    scaled.clamp(0.0, 100.0).round() as u8
}

fn confidence_field<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.map(confidence_score_from).unwrap_or_else(full_confidence))
}
