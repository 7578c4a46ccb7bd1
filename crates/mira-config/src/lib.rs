mod types;

use std::{fs, path::Path};

use color_eyre::eyre;

pub use types::{
	Agent, Config, EmbeddingProviderConfig, Ingest, LlmProviderConfig, ProviderConfig, Providers,
	Qdrant, Retrieval, Security, Service, Storage,
};

pub const CANDIDATE_POOL_MIN: u32 = 30;
pub const CANDIDATE_POOL_MAX: u32 = 200;
pub const REFLECTION_RERANK_TOP_MIN: u32 = 5;
pub const REFLECTION_RERANK_TOP_MAX: u32 = 25;

pub fn load(path: &Path) -> color_eyre::Result<Config> {
	let raw = fs::read_to_string(path)?;

	let mut cfg: Config = toml::from_str(&raw)?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

fn normalize(cfg: &mut Config) {
	cfg.retrieval.candidate_pool =
		cfg.retrieval.candidate_pool.clamp(CANDIDATE_POOL_MIN, CANDIDATE_POOL_MAX);
	cfg.retrieval.reflection_rerank_top = cfg
		.retrieval
		.reflection_rerank_top
		.clamp(REFLECTION_RERANK_TOP_MIN, REFLECTION_RERANK_TOP_MAX);
}

pub fn validate(cfg: &Config) -> color_eyre::Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(eyre::eyre!("service.http_bind must be non-empty."));
	}
	if cfg.storage.qdrant.collection.trim().is_empty() {
		return Err(eyre::eyre!("storage.qdrant.collection must be non-empty."));
	}
	if cfg.providers.embedding.dimensions == 0 {
		return Err(eyre::eyre!("providers.embedding.dimensions must be greater than zero."));
	}
	if cfg.providers.embedding.dimensions != cfg.storage.qdrant.vector_dim {
		return Err(eyre::eyre!(
			"providers.embedding.dimensions must match storage.qdrant.vector_dim."
		));
	}
	if !matches!(cfg.providers.embedding.provider_id.as_str(), "mistral" | "openai") {
		return Err(eyre::eyre!("providers.embedding.provider_id must be mistral or openai."));
	}
	if cfg.agent.default_top == 0 {
		return Err(eyre::eyre!("agent.default_top must be greater than zero."));
	}
	if cfg.agent.proposal_retries == 0 {
		return Err(eyre::eyre!("agent.proposal_retries must be greater than zero."));
	}
	if cfg.agent.max_refinements > 2 {
		return Err(eyre::eyre!("agent.max_refinements must be 2 or less."));
	}
	if cfg.ingest.batch_size == 0 {
		return Err(eyre::eyre!("ingest.batch_size must be greater than zero."));
	}
	if cfg.security.admin_token.trim().is_empty() {
		return Err(eyre::eyre!("security.admin_token must be non-empty."));
	}

	Ok(())
}
