//! Composition root for the recommendation pipeline. External collaborators
//! (embedding, rerank, chat, vector index) sit behind small trait seams so
//! tests substitute recorded fixtures; everything between the seams is
//! deterministic.

pub mod agent;
pub mod constraints;
pub mod facts;
pub mod ingest;
pub mod prompts;
pub mod reflect;
pub mod retrieve;
pub mod verify;

mod error;

pub use self::{
	agent::{AgentMode, AgentOutcome, AgentState},
	constraints::{Constraint, ConstraintSet, split_query},
	error::{Error, Result},
	ingest::{IngestReport, StatusReport},
	prompts::PromptRegistry,
	reflect::Reflection,
	retrieve::{RetrieveOptions, RetrieveOutcome, RetrievedItem},
	verify::{VerifiedItem, resolve_time_conflicts},
};

use std::{future::Future, pin::Pin, sync::Arc};

use serde_json::Value;

use mira_config::{Config, EmbeddingProviderConfig, LlmProviderConfig, ProviderConfig};
use mira_providers::{chat, embedding, rerank};
use mira_storage::{CatalogFilter, CatalogHit, CatalogIndex, CatalogRecord};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;
}

pub trait RerankProvider
where
	Self: Send + Sync,
{
	fn rerank<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, Result<Vec<f32>>>;
}

pub trait ChatProvider
where
	Self: Send + Sync,
{
	fn chat<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
		temperature: f32,
	) -> BoxFuture<'a, Result<Value>>;
}

/// Read-only handle to the catalog collection.
pub trait VectorIndex
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		vector: Vec<f32>,
		filter: Option<&'a CatalogFilter>,
		limit: u64,
	) -> BoxFuture<'a, Result<Vec<CatalogHit>>>;

	fn upsert<'a>(
		&'a self,
		records: Vec<(CatalogRecord, Vec<f32>)>,
	) -> BoxFuture<'a, Result<u64>>;

	fn recreate<'a>(&'a self) -> BoxFuture<'a, Result<()>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub rerank: Arc<dyn RerankProvider>,
	pub chat: Arc<dyn ChatProvider>,
}
impl Providers {
	pub fn new(
		embedding: Arc<dyn EmbeddingProvider>,
		rerank: Arc<dyn RerankProvider>,
		chat: Arc<dyn ChatProvider>,
	) -> Self {
		Self { embedding, rerank, chat }
	}
}

impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { embedding: provider.clone(), rerank: provider.clone(), chat: provider }
	}
}

pub struct MiraService {
	pub cfg: Config,
	pub index: Arc<dyn VectorIndex>,
	pub providers: Providers,
	pub prompts: PromptRegistry,
}
impl MiraService {
	pub fn new(cfg: Config, index: CatalogIndex) -> Self {
		Self {
			cfg,
			index: Arc::new(index),
			providers: Providers::default(),
			prompts: PromptRegistry::default(),
		}
	}

	pub fn with_parts(cfg: Config, index: Arc<dyn VectorIndex>, providers: Providers) -> Self {
		Self { cfg, index, providers, prompts: PromptRegistry::default() }
	}
}

struct DefaultProviders;
impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move { embedding::embed(cfg, texts).await.map_err(Error::from) })
	}
}

impl RerankProvider for DefaultProviders {
	fn rerank<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, Result<Vec<f32>>> {
		Box::pin(async move { rerank::rerank(cfg, query, docs).await.map_err(Error::from) })
	}
}

impl ChatProvider for DefaultProviders {
	fn chat<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
		temperature: f32,
	) -> BoxFuture<'a, Result<Value>> {
		Box::pin(async move { chat::chat(cfg, messages, temperature).await.map_err(Error::from) })
	}
}

impl VectorIndex for CatalogIndex {
	fn search<'a>(
		&'a self,
		vector: Vec<f32>,
		filter: Option<&'a CatalogFilter>,
		limit: u64,
	) -> BoxFuture<'a, Result<Vec<CatalogHit>>> {
		Box::pin(async move {
			CatalogIndex::search(self, vector, filter, limit).await.map_err(Error::from)
		})
	}

	fn upsert<'a>(
		&'a self,
		records: Vec<(CatalogRecord, Vec<f32>)>,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move {
			CatalogIndex::upsert_records(self, records).await.map_err(Error::from)
		})
	}

	fn recreate<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move { CatalogIndex::recreate(self).await.map_err(Error::from) })
	}
}
