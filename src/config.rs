//! Jot configuration management

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main Jot configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JotConfig {
    /// Local state files
    #[serde(default)]
    pub storage: StorageConfig,

    /// Mail (ingest) API configuration
    #[serde(default)]
    pub mail: MailConfig,

    /// Language model configuration
    #[serde(default)]
    pub model: ModelConfig,

    /// Destination record store configuration
    #[serde(default)]
    pub destination: DestinationConfig,

    /// Pipeline tuning
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl JotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.queue_capacity == 0 {
            return Err(Error::Config("pipeline.queue_capacity must be > 0".to_string()));
        }
        if self.pipeline.enrich_workers == 0 || self.pipeline.publish_workers == 0 {
            return Err(Error::Config(
                "pipeline worker counts must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Storage configuration
///
/// Relative file names are resolved against `base_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for local state
    pub base_dir: PathBuf,

    /// Credential store (access/refresh token + expiry)
    pub credential_file: PathBuf,

    /// Checkpoint store (single watermark value)
    pub checkpoint_file: PathBuf,

    /// Registry store (partition key → destination handle)
    pub registry_file: PathBuf,
}

impl StorageConfig {
    pub fn credential_path(&self) -> PathBuf {
        self.base_dir.join(&self.credential_file)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.base_dir.join(&self.checkpoint_file)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.base_dir.join(&self.registry_file)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: dirs_next::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("jot"),
            credential_file: PathBuf::from("token.json"),
            checkpoint_file: PathBuf::from("config.json"),
            registry_file: PathBuf::from("databases.json"),
        }
    }
}

/// Mail API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// REST base URL
    pub base_url: String,

    /// Mailbox user id
    pub user: String,

    /// OAuth client id
    pub client_id: String,

    /// OAuth client secret reference (env var name)
    pub client_secret_ref: String,

    /// OAuth consent URL
    pub auth_url: String,

    /// OAuth token endpoint
    pub token_url: String,

    /// Redirect URL registered for the client
    pub redirect_url: String,

    /// Requested scope
    pub scope: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gmail.googleapis.com/gmail/v1".to_string(),
            user: "me".to_string(),
            client_id: String::new(),
            client_secret_ref: "gmail_client_secret".to_string(),
            auth_url: "https://accounts.google.com/o/oauth2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            redirect_url: "http://localhost".to_string(),
            scope: "https://www.googleapis.com/auth/gmail.readonly".to_string(),
        }
    }
}

/// Language model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Inference API base URL
    pub base_url: String,

    /// Model id
    pub model: String,

    /// API key reference (env var name)
    pub api_key_ref: String,

    /// Minimum generated length
    pub min_length: u32,

    /// Maximum generated length
    pub max_length: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api-inference.huggingface.co/models".to_string(),
            model: "mistralai/Mistral-7B-Instruct-v0.1".to_string(),
            api_key_ref: "huggingfacehub_api_token".to_string(),
            min_length: 50,
            max_length: 400,
        }
    }
}

/// Destination record store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// REST base URL
    pub base_url: String,

    /// Protocol version header value
    pub api_version: String,

    /// Parent page under which per-day containers are created
    pub parent_page_id: String,

    /// Integration secret reference (env var name)
    pub secret_ref: String,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.notion.com/v1/".to_string(),
            api_version: "2021-05-13".to_string(),
            parent_page_id: String::new(),
            secret_ref: "notion_api_key".to_string(),
        }
    }
}

/// When the new watermark is written relative to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Commit once every stage has drained (at-least-once)
    #[default]
    AfterCompletion,

    /// Commit right after the delta is fetched (at-most-once)
    BeforePipeline,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of each inter-stage queue
    pub queue_capacity: usize,

    /// Concurrent enrich workers
    pub enrich_workers: usize,

    /// Concurrent publish workers
    pub publish_workers: usize,

    /// Watermark commit timing
    #[serde(default)]
    pub commit_policy: CommitPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            enrich_workers: 1,
            publish_workers: 1,
            commit_policy: CommitPolicy::AfterCompletion,
        }
    }
}

/// Resolve a secret from an environment variable reference.
///
/// Tries the exact name first, then the UPPER_CASE form.
pub fn resolve_secret(secret_ref: &str) -> Result<String> {
    std::env::var(secret_ref)
        .or_else(|_| std::env::var(secret_ref.to_uppercase()))
        .map_err(|_| {
            Error::Config(format!(
                "Secret '{}' not found in environment",
                secret_ref
            ))
        })
}
