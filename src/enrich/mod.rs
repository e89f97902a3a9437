//! Enrichment collaborator
//!
//! Formats the fixed instruction template around a record's text, sends it
//! to a language model and recovers the structured action-item payload.

mod huggingface;
mod prompt;

pub use huggingface::HuggingFaceClient;
pub use prompt::{parse_action_items, render, INSTRUCTION_END};

use crate::error::{Error, Result};
use crate::record::Record;
use async_trait::async_trait;
use std::sync::Arc;

/// Free-form text completion
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Attaches a machine-generated summary to records.
pub struct Enricher {
    model: Arc<dyn LanguageModel>,
}

impl Enricher {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Summarize one record.
    ///
    /// Fails with `PayloadParse` when the response carries no items, and
    /// with the model's error when the call itself fails.
    pub async fn enrich(&self, record: Record) -> Result<Record> {
        let prompt = render(&record.text_content());
        let response = self.model.complete(&prompt).await?;

        let items = parse_action_items(&response);
        if items.is_empty() {
            return Err(Error::PayloadParse(format!(
                "No ActionItems payload in response for record {}",
                record.id
            )));
        }
        Ok(record.with_summary(&items))
    }
}
