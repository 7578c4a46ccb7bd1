use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	pub retrieval: Retrieval,
	pub agent: Agent,
	pub ingest: Ingest,
	pub security: Security,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub qdrant: Qdrant,
}

#[derive(Debug, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub collection: String,
	pub vector_dim: u32,
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub rerank: ProviderConfig,
	pub chat: LlmProviderConfig,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	/// "mistral" or "openai"; both speak the same embeddings wire format.
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
	/// "off" disables the stage, "local" uses the in-process fallback.
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub timeout_ms: u64,
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct Retrieval {
	/// Neighbor pool requested from the vector index; normalized into [30, 200].
	pub candidate_pool: u32,
	/// Enables the local constraint-aware rerank after the cross-encoder stage.
	pub stage2_reflection: bool,
	/// Enables the secondary LLM rerank of the reflection stage.
	pub reflection_llm_rerank: bool,
	/// How many head candidates the LLM rerank reorders; normalized into [5, 25].
	pub reflection_rerank_top: u32,
}

#[derive(Debug, Deserialize)]
pub struct Agent {
	pub default_top: u32,
	pub max_refinements: u32,
	pub proposal_retries: u32,
}

#[derive(Debug, Deserialize)]
pub struct Ingest {
	/// Catalog file used by refresh when the request names none.
	pub default_catalog: Option<String>,
	pub batch_size: u32,
}

#[derive(Debug, Deserialize)]
pub struct Security {
	pub admin_token: String,
}
