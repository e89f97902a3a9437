//! Gmail REST client

use super::text::{extract_text, plain_lines};
use super::{MailItem, MailSource};
use crate::auth::CredentialGuardian;
use crate::config::MailConfig;
use crate::error::{Error, Result};
use crate::sync::{Delta, Watermark};
use async_trait::async_trait;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryList {
    #[serde(default)]
    history: Vec<HistoryEntry>,
    history_id: String,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryEntry {
    #[serde(default)]
    messages_added: Vec<MessageAdded>,
}

#[derive(Debug, Deserialize)]
struct MessageAdded {
    message: MessageRef,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Message {
    id: String,
    #[serde(default)]
    history_id: Option<String>,
    #[serde(default)]
    payload: Option<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct PartBody {
    #[serde(default)]
    data: Option<String>,
}

/// Gmail API client authenticated through the [`CredentialGuardian`].
pub struct GmailClient {
    config: MailConfig,
    guardian: Arc<CredentialGuardian>,
    client: reqwest::Client,
}

impl GmailClient {
    pub fn new(config: MailConfig, guardian: Arc<CredentialGuardian>) -> Self {
        Self {
            config,
            guardian,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/users/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.user,
            path
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let credential = self.guardian.acquire().await?;
        let response = self
            .client
            .get(self.url(path))
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Collaborator(format!("Mail request {} failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status(
                &format!("Mail request {}", path),
                status,
                &body,
            ));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Collaborator(format!("Failed to parse mail response {}: {}", path, e)))
    }

    async fn get_message(&self, id: &str, format: &str) -> Result<Message> {
        self.get_json(
            &format!("messages/{}", id),
            &[("format", format.to_string())],
        )
        .await
    }
}

#[async_trait]
impl MailSource for GmailClient {
    async fn latest_marker(&self) -> Result<Watermark> {
        let list: MessageList = self
            .get_json("messages", &[("maxResults", "1".to_string())])
            .await?;
        let latest = list
            .messages
            .first()
            .ok_or_else(|| Error::Collaborator("no messages found".to_string()))?;

        let message = self.get_message(&latest.id, "minimal").await?;
        message
            .history_id
            .as_deref()
            .and_then(parse_history_id)
            .ok_or_else(|| {
                Error::Collaborator(format!("Message {} has no usable historyId", message.id))
            })
    }

    async fn list_since(&self, watermark: Watermark) -> Result<Delta> {
        let mut ids = Vec::new();
        let mut latest = watermark;
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("startHistoryId", watermark.to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let page: HistoryList = self.get_json("history", &query).await?;
            for entry in page.history {
                ids.extend(entry.messages_added.into_iter().map(|m| m.message.id));
            }
            if let Some(history_id) = parse_history_id(&page.history_id) {
                latest = latest.max(history_id);
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(Delta {
            ids,
            watermark: latest,
        })
    }

    async fn get(&self, id: &str) -> Result<MailItem> {
        let message = self.get_message(id, "full").await?;
        message_to_item(message)
    }
}

fn parse_history_id(raw: &str) -> Option<Watermark> {
    raw.parse::<u64>().ok().and_then(Watermark::new)
}

fn message_to_item(message: Message) -> Result<MailItem> {
    let payload = message.payload.unwrap_or_default();
    let mut item = MailItem {
        id: message.id,
        ..Default::default()
    };

    for header in &payload.headers {
        match header.name.as_str() {
            "From" => item.from = header.value.clone(),
            "To" => item.to = header.value.clone(),
            "Subject" => item.subject = header.value.clone(),
            "Date" => item.date = header.value.clone(),
            _ => {}
        }
    }

    let mut html = String::new();
    let mut plain = String::new();
    collect_bodies(&payload, &mut html, &mut plain)?;

    item.body = if !html.is_empty() {
        extract_text(&html)
    } else {
        plain_lines(&plain)
    };
    Ok(item)
}

/// Concatenate decoded `text/html` and `text/plain` parts, depth first.
fn collect_bodies(part: &MessagePart, html: &mut String, plain: &mut String) -> Result<()> {
    let data = part.body.as_ref().and_then(|b| b.data.as_deref());
    if let Some(data) = data {
        match part.mime_type.as_str() {
            "text/html" => html.push_str(&decode_part(data)?),
            "text/plain" => plain.push_str(&decode_part(data)?),
            _ => {}
        }
    }
    for child in &part.parts {
        collect_bodies(child, html, plain)?;
    }
    Ok(())
}

fn decode_part(data: &str) -> Result<String> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .map_err(|e| Error::Collaborator(format!("Invalid message part encoding: {}", e)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
