use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use crmflow_core::config::CrmConfig;
use crmflow_core::crm::{BackendError, CrmBackend};
use crmflow_core::domain::entity::{
    EntityRecord, EntityType, FieldSet, ObjectId, PropertyDefinition,
};
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

const SEARCH_PAGE_SIZE: usize = 100;
/// The search endpoint stops paging at 10,000 results.
const MAX_SEARCH_PAGES: usize = 100;

/// Client for the `/crm/v3` object and property APIs and the `/crm/v4` association API,
/// with bearer-token auth.
#[derive(Clone)]
pub struct HubSpotClient {
    http: Client,
    base_url: String,
    access_token: SecretString,
}

#[derive(Deserialize)]
struct ObjectPayload {
    id: String,
    #[serde(default)]
    properties: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<ObjectPayload>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Deserialize)]
struct Paging {
    next: Option<NextPage>,
}

#[derive(Deserialize)]
struct NextPage {
    after: String,
}

#[derive(Deserialize)]
struct PropertyList {
    #[serde(default)]
    results: Vec<PropertyPayload>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertyPayload {
    name: String,
    #[serde(default)]
    label: String,
    #[serde(default, rename = "type")]
    value_type: String,
    #[serde(default)]
    field_type: String,
    #[serde(default)]
    description: String,
}

impl From<PropertyPayload> for PropertyDefinition {
    fn from(payload: PropertyPayload) -> Self {
        Self {
            name: payload.name,
            label: payload.label,
            value_type: payload.value_type,
            field_type: payload.field_type,
            description: payload.description,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl HubSpotClient {
    pub fn new(
        base_url: impl Into<String>,
        access_token: SecretString,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| BackendError::Transport(error.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
        })
    }

    pub fn from_config(config: &CrmConfig) -> Result<Self, BackendError> {
        Self::new(
            config.base_url.clone(),
            config.access_token.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn objects_url(&self, entity_type: EntityType) -> String {
        format!("{}/crm/v3/objects/{}", self.base_url, entity_type.object_path())
    }

    fn object_url(&self, entity_type: EntityType, id: &ObjectId) -> String {
        format!("{}/{}", self.objects_url(entity_type), id)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let response = request
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let raw = response.text().await.unwrap_or_default();
        let message = error_message(&raw)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
        tracing::debug!(
            event_name = "crm.http_error",
            status = status.as_u16(),
            message = message.as_str(),
            "CRM request rejected"
        );
        Err(BackendError::http(status.as_u16(), message))
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
        response.json::<T>().await.map_err(|error| BackendError::Decode(error.to_string()))
    }

    fn into_record(entity_type: EntityType, payload: ObjectPayload) -> EntityRecord {
        let mut fields = FieldSet::new();
        for (name, value) in payload.properties {
            let text = match value {
                Value::String(text) => text,
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                _ => continue,
            };
            fields.insert(entity_type, &name, text);
        }
        EntityRecord::new(payload.id, entity_type, fields)
    }

    fn requested_properties(entity_type: EntityType, extra: &FieldSet) -> Vec<String> {
        let mut names = entity_type
            .recognized_fields()
            .iter()
            .map(|field| field.as_str().to_string())
            .collect::<Vec<_>>();
        for key in extra.extra.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
        names
    }
}

#[async_trait]
impl CrmBackend for HubSpotClient {
    async fn create_record(
        &self,
        entity_type: EntityType,
        fields: &FieldSet,
    ) -> Result<EntityRecord, BackendError> {
        let body = json!({ "properties": fields.to_properties() });
        let response = self.send(self.http.post(self.objects_url(entity_type)).json(&body)).await?;
        let payload = Self::decode::<ObjectPayload>(response).await?;
        Ok(Self::into_record(entity_type, payload))
    }

    async fn update_record(
        &self,
        entity_type: EntityType,
        id: &ObjectId,
        fields: &FieldSet,
    ) -> Result<EntityRecord, BackendError> {
        let body = json!({ "properties": fields.to_properties() });
        let response =
            self.send(self.http.patch(self.object_url(entity_type, id)).json(&body)).await?;
        let payload = Self::decode::<ObjectPayload>(response).await?;
        Ok(Self::into_record(entity_type, payload))
    }

    async fn delete_record(
        &self,
        entity_type: EntityType,
        id: &ObjectId,
    ) -> Result<(), BackendError> {
        self.send(self.http.delete(self.object_url(entity_type, id))).await?;
        Ok(())
    }

    async fn search(
        &self,
        entity_type: EntityType,
        criteria: &FieldSet,
    ) -> Result<Vec<EntityRecord>, BackendError> {
        let filters = criteria
            .iter_pairs()
            .map(|(name, value)| json!({"propertyName": name, "operator": "EQ", "value": value}))
            .collect::<Vec<_>>();
        let mut body = json!({
            "filterGroups": [{ "filters": filters }],
            "properties": Self::requested_properties(entity_type, criteria),
            "limit": SEARCH_PAGE_SIZE,
        });

        let url = format!("{}/search", self.objects_url(entity_type));
        let mut records = Vec::new();
        let mut after: Option<String> = None;
        for _ in 0..MAX_SEARCH_PAGES {
            if let Some(cursor) = &after {
                body["after"] = json!(cursor);
            }
            let response = self.send(self.http.post(&url).json(&body)).await?;
            let page = Self::decode::<SearchPage>(response).await?;
            let fetched = page.results.len();
            records.extend(
                page.results.into_iter().map(|payload| Self::into_record(entity_type, payload)),
            );

            let next = page.paging.and_then(|paging| paging.next).map(|next| next.after);
            match next {
                Some(cursor) if fetched > 0 && after.as_ref() != Some(&cursor) => {
                    after = Some(cursor);
                }
                _ => return Ok(records),
            }
        }

        tracing::warn!(
            event_name = "crm.search_truncated",
            entity_type = entity_type.as_str(),
            returned = records.len(),
            "search stopped at the page limit"
        );
        Ok(records)
    }

    async fn get_record(
        &self,
        entity_type: EntityType,
        id: &ObjectId,
    ) -> Result<EntityRecord, BackendError> {
        let properties = Self::requested_properties(entity_type, &FieldSet::new()).join(",");
        let request =
            self.http.get(self.object_url(entity_type, id)).query(&[("properties", properties)]);
        let response = self.send(request).await?;
        let payload = Self::decode::<ObjectPayload>(response).await?;
        Ok(Self::into_record(entity_type, payload))
    }

    async fn associate(
        &self,
        from_type: EntityType,
        from_id: &ObjectId,
        to_type: EntityType,
        to_id: &ObjectId,
    ) -> Result<(), BackendError> {
        let url = format!(
            "{}/crm/v4/objects/{}/{}/associations/default/{}/{}",
            self.base_url,
            from_type.object_path(),
            from_id,
            to_type.object_path(),
            to_id
        );
        self.send(self.http.put(url)).await?;
        Ok(())
    }

    async fn list_properties(
        &self,
        entity_type: EntityType,
    ) -> Result<Vec<PropertyDefinition>, BackendError> {
        let url = format!("{}/crm/v3/properties/{}", self.base_url, entity_type.object_path());
        let response = self.send(self.http.get(url)).await?;
        let list = Self::decode::<PropertyList>(response).await?;
        Ok(list.results.into_iter().map(PropertyDefinition::from).collect())
    }
}

fn transport_error(error: reqwest::Error) -> BackendError {
    if error.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Transport(error.to_string())
    }
}

/// The API reports failures as `{"status": "error", "message": "..."}`.
fn error_message(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<ErrorBody>(trimmed) {
        Ok(ErrorBody { message: Some(message) }) if !message.trim().is_empty() => Some(message),
        Ok(_) => None,
        Err(_) => Some(trimmed.to_string()),
    }
}
