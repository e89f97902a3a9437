//! Records flowing through the pipeline and their partition keys

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Partition used for records whose timestamp could not be parsed
pub const UNDATED_PARTITION: &str = "undated";

/// A harvested inbox item.
///
/// Created by the ingest stage, given a summary once by the enrich stage,
/// consumed by the publish stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    /// Ordered text lines of the rendered body
    pub body: Vec<String>,
    /// RFC 3339 UTC timestamp, empty when the source date was unparseable
    pub timestamp: String,
    pub summary: Option<String>,
}

impl Record {
    /// Text handed to the language model: headers followed by body lines.
    pub fn text_content(&self) -> String {
        let mut text = format!(
            "From: {}\nTo: {}\nSubject: {}",
            self.sender, self.recipient, self.subject
        );
        for line in &self.body {
            text.push('\n');
            text.push_str(line);
        }
        text
    }

    /// Attach the enrichment summary built from the extracted items.
    pub fn with_summary(mut self, items: &[String]) -> Self {
        self.summary = Some(items.join("\n"));
        self
    }

    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey::from_timestamp(&self.timestamp)
    }
}

/// Deterministic bucket (calendar day, UTC) a record is routed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(String);

impl PartitionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// `YYYY-MM-DD` of an RFC 3339 timestamp, or [`UNDATED_PARTITION`].
    pub fn from_timestamp(timestamp: &str) -> Self {
        match DateTime::parse_from_rfc3339(timestamp) {
            Ok(dt) => Self::from_date(dt.with_timezone(&Utc).date_naive()),
            Err(_) => Self(UNDATED_PARTITION.to_string()),
        }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.format("%Y-%m-%d").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn parenthesized() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*\(.*?\)\s*").expect("static regex"))
}

/// Normalize a mail `Date` header to RFC 3339 UTC.
///
/// Parenthesized comments such as `(UTC)` are removed first. Returns an
/// empty string when no known layout matches.
pub fn normalize_date(raw: &str) -> String {
    let cleaned = parenthesized().replace_all(raw, "");
    let cleaned = cleaned.trim();

    let parsed = DateTime::parse_from_rfc2822(cleaned)
        .or_else(|_| DateTime::parse_from_rfc3339(cleaned))
        .or_else(|_| DateTime::parse_from_str(cleaned, "%a, %e %b %Y %H:%M:%S %z"));

    match parsed {
        Ok(dt) => dt
            .with_timezone(&Utc)
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        Err(e) => {
            tracing::warn!(date = %raw, "Unparseable date header: {}", e);
            String::new()
        }
    }
}
