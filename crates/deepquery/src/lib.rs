// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # DeepQuery
//!
//! A multi-agent research pipeline: given a free-text query, a staged
//! orchestrator drives five specialized agents - clarify, retrieve,
//! analyze, verify, report - each consulting a language model and/or a
//! set of external search providers, persisting intermediate artifacts
//! to a durable store and streaming weighted progress to subscribers.
//!
//! ## Architecture
//!
//! - [`orchestrator::Orchestrator`] - the pipeline executor: per-stage
//!   timeouts, cooperative cancellation, fatal-vs-degraded failure
//!   classification, supervised checkpoints, weighted progress.
//! - [`agents`] - the five stages behind a common
//!   [`agents::PipelineAgent`] trait.
//! - [`fanout::SearchFanout`] - parallel querying of the configured
//!   [`providers::SearchProvider`]s with failure isolation and a
//!   read-through [`cache::ProviderCache`].
//! - [`progress::ProgressBus`] - per-session subscriber fan-out plus an
//!   optional cross-process channel.
//! - [`store::ResearchStore`] - the persistence seam all stage hand-off
//!   goes through; [`store::MemoryStore`] for in-process use.
//!
//! Integrations live in sibling crates: `deepquery-openrouter` (LLM),
//! `deepquery-serpapi` / `deepquery-newsapi` / `deepquery-arxiv` /
//! `deepquery-pubmed` / `deepquery-wikipedia` (search providers) and
//! `deepquery-redis` (cache backend + cross-process progress channel).
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use deepquery::cache::ProviderCache;
//! use deepquery::config::ResearchConfig;
//! use deepquery::fanout::SearchFanout;
//! use deepquery::models::ResearchParams;
//! use deepquery::orchestrator::Orchestrator;
//! use deepquery::progress::ProgressBus;
//! use deepquery::providers::ProviderSet;
//! use deepquery::service::ResearchService;
//! use deepquery::store::{MemoryStore, ResearchStore};
//! use deepquery::testing::MockLanguageModel;
//!
//! # tokio_test::block_on(async {
//! let store: Arc<dyn ResearchStore> = Arc::new(MemoryStore::new());
//! let fanout = SearchFanout::new(ProviderSet::new(), ProviderCache::disabled());
//! let orchestrator = Arc::new(Orchestrator::new(
//!     Arc::clone(&store),
//!     Arc::new(MockLanguageModel::new()),
//!     fanout,
//!     Arc::new(ProgressBus::new()),
//!     ResearchConfig::default(),
//! ));
//! let service = ResearchService::new(orchestrator, store);
//! let session_id = service.start("battery recycling in the EU", ResearchParams::default())
//!     .await
//!     .unwrap();
//! let outcome = service.wait(&session_id).await.unwrap().unwrap();
//! println!("finished: {:?}", outcome.status);
//! # });
//! ```

pub mod agents;
pub mod approval;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod constants;
pub mod credibility;
pub mod error;
pub mod fanout;
pub mod json;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod providers;
pub mod service;
pub mod store;
pub mod testing;

pub use constants::{DEFAULT_HTTP_CONNECT_TIMEOUT, DEFAULT_HTTP_REQUEST_TIMEOUT};
pub use error::{Error, Result};
