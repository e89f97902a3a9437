//! Jot - Inbox to Action-Item Journal
//!
//! Jot incrementally harvests new inbox items since a persisted checkpoint,
//! asks a language model for each item's action items, and files the result
//! into a date-partitioned external record store, creating one destination
//! container per day on first use.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          Pipeline Orchestrator                       │
//! │                                                                      │
//! │  ┌──────────────┐   load / fetch_delta / commit   ┌──────────────┐   │
//! │  │ Incremental  │◄───────────────────────────────►│  Checkpoint  │   │
//! │  │    Sync      │                                 │    Store     │   │
//! │  └──────┬───────┘                                 └──────────────┘   │
//! │         │ ids                                                        │
//! │  ┌──────▼───────┐  bounded  ┌──────────────┐  bounded  ┌──────────┐  │
//! │  │    Ingest    ├──────────►│    Enrich    ├──────────►│ Publish  │  │
//! │  │   (mail)     │   queue   │   (model)    │   queue   │          │  │
//! │  └──────┬───────┘           └──────────────┘           └────┬─────┘  │
//! │         │                                                   │        │
//! │  ┌──────▼───────┐                                  ┌────────▼─────┐  │
//! │  │  Credential  │                                  │   Resource   │  │
//! │  │   Guardian   │                                  │    Router    │  │
//! │  │ - refresh    │                                  │ - registry   │  │
//! │  │ - authorize  │                                  │ - find/create│  │
//! │  └──────────────┘                                  └──────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`auth`]: Credential lifecycle (load, refresh, interactive authorization)
//! - [`sync`]: Checkpoint store and incremental delta fetching
//! - [`ingest`]: Mail source and message decoding
//! - [`enrich`]: Instruction template, model client and payload parsing
//! - [`router`]: Partition → destination container registry
//! - [`pipeline`]: Three-stage run orchestration
//! - [`config`]: Configuration management
//! - [`state`]: Atomic local state files

pub mod auth;
pub mod config;
pub mod enrich;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod record;
pub mod router;
pub mod state;
pub mod sync;

pub use config::JotConfig;
pub use error::{Error, Result};
pub use pipeline::{Pipeline, RunReport, RunState};
pub use record::{PartitionKey, Record};
