//! Notion REST client

use super::{ContainerSchema, Destination, FieldKind, FieldValue, ResourceHandle};
use crate::config::DestinationConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Notion caps a rich text object's content length
const MAX_TEXT_LEN: usize = 2000;

#[derive(Debug, Deserialize)]
struct CreatedObject {
    id: String,
}

/// Destination backed by Notion databases (containers) and pages (entries)
pub struct NotionClient {
    config: DestinationConfig,
    secret: String,
    client: reqwest::Client,
}

impl NotionClient {
    pub fn new(config: DestinationConfig, secret: impl Into<String>) -> Self {
        Self {
            config,
            secret: secret.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str, body: &Value) -> Result<CreatedObject> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret)
            .header("Notion-Version", &self.config.api_version)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Collaborator(format!("Destination request {} failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::from_status(
                &format!("Destination request {}", path),
                status,
                &text,
            ));
        }

        response.json().await.map_err(|e| {
            Error::Collaborator(format!("Failed to parse destination response: {}", e))
        })
    }
}

#[async_trait]
impl Destination for NotionClient {
    async fn create_container(
        &self,
        parent_id: &str,
        name: &str,
        schema: &ContainerSchema,
    ) -> Result<ResourceHandle> {
        let created = self
            .post("databases", &database_body(parent_id, name, schema))
            .await?;
        Ok(ResourceHandle::new(created.id))
    }

    async fn create_entry(
        &self,
        container: &ResourceHandle,
        fields: &[(String, FieldValue)],
    ) -> Result<String> {
        let created = self.post("pages", &page_body(container, fields)).await?;
        Ok(created.id)
    }
}

fn rich_text(content: &str) -> Value {
    let truncated: String = content.chars().take(MAX_TEXT_LEN).collect();
    json!([{ "type": "text", "text": { "content": truncated } }])
}

fn database_body(parent_id: &str, name: &str, schema: &ContainerSchema) -> Value {
    let mut properties = Map::new();
    for (field, kind) in &schema.fields {
        let property = match kind {
            FieldKind::Title => json!({ "title": {} }),
            FieldKind::Date => json!({ "date": {} }),
            FieldKind::RichText => json!({ "rich_text": {} }),
        };
        properties.insert(field.clone(), property);
    }

    json!({
        "parent": { "type": "page_id", "page_id": parent_id },
        "title": [{
            "type": "text",
            "text": { "content": name },
            "annotations": { "bold": true },
            "plain_text": name,
        }],
        "properties": properties,
    })
}

fn page_body(container: &ResourceHandle, fields: &[(String, FieldValue)]) -> Value {
    let mut properties = Map::new();
    for (field, value) in fields {
        let property = match value {
            FieldValue::Title(text) => json!({ "title": rich_text(text) }),
            FieldValue::RichText(text) => json!({ "rich_text": rich_text(text) }),
            FieldValue::Date(start) => json!({ "date": { "start": start } }),
        };
        properties.insert(field.clone(), property);
    }

    json!({
        "parent": { "type": "database_id", "database_id": container.as_str() },
        "properties": properties,
    })
}
