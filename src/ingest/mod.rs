//! Ingest collaborator
//!
//! Read-only access to the mailbox: the newest item's marker (for
//! bootstrapping), the ids added since a watermark, and full items.

mod gmail;
mod text;

pub use gmail::GmailClient;
pub use text::{extract_text, plain_lines};

use crate::error::Result;
use crate::record::{normalize_date, Record};
use crate::sync::{Delta, Watermark};
use async_trait::async_trait;

/// A fetched mailbox item before conversion to a [`Record`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailItem {
    pub id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    /// Raw `Date` header
    pub date: String,
    /// Rendered text lines of the body
    pub body: Vec<String>,
}

impl MailItem {
    pub fn into_record(self) -> Record {
        Record {
            timestamp: normalize_date(&self.date),
            id: self.id,
            sender: self.from,
            recipient: self.to,
            subject: self.subject,
            body: self.body,
            summary: None,
        }
    }
}

/// Mailbox read capability
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Position marker of the most recent item.
    async fn latest_marker(&self) -> Result<Watermark>;

    /// Ids added after `watermark` and the current marker.
    async fn list_since(&self, watermark: Watermark) -> Result<Delta>;

    /// Full content of one item.
    async fn get(&self, id: &str) -> Result<MailItem>;
}
