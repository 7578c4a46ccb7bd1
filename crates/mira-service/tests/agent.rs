//! Agent pipeline acceptance tests against stub providers and an in-memory
//! index. Every LLM, embedding, rerank, and vector-search call goes through
//! the service's trait seams, so these runs are fully deterministic.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use mira_config::{
	Agent, Config, EmbeddingProviderConfig, Ingest, LlmProviderConfig, ProviderConfig, Providers,
	Qdrant, Retrieval, Security, Service, Storage,
};
use mira_service::{
	AgentMode, BoxFuture, ChatProvider, EmbeddingProvider, Error, MiraService,
	Providers as ServiceProviders, RerankProvider, Result, RetrieveOptions, VectorIndex,
};
use mira_storage::{CatalogFilter, CatalogHit, CatalogRecord};

fn test_config() -> Config {
	Config {
		service: Service { http_bind: "127.0.0.1:0".to_string(), log_level: "info".to_string() },
		storage: Storage {
			qdrant: Qdrant {
				url: "http://127.0.0.1:6334".to_string(),
				collection: "mbs_items_test".to_string(),
				vector_dim: 4,
			},
		},
		providers: Providers {
			embedding: EmbeddingProviderConfig {
				provider_id: "mistral".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/v1/embeddings".to_string(),
				model: "test".to_string(),
				dimensions: 4,
				timeout_ms: 1_000,
				default_headers: serde_json::Map::new(),
			},
			rerank: ProviderConfig {
				provider_id: "off".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: String::new(),
				path: "/".to_string(),
				model: "none".to_string(),
				timeout_ms: 1_000,
				default_headers: serde_json::Map::new(),
			},
			chat: LlmProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/v1/chat/completions".to_string(),
				model: "test".to_string(),
				temperature: 0.0,
				timeout_ms: 1_000,
				default_headers: serde_json::Map::new(),
			},
		},
		retrieval: Retrieval {
			candidate_pool: 150,
			stage2_reflection: true,
			reflection_llm_rerank: false,
			reflection_rerank_top: 10,
		},
		agent: Agent { default_top: 5, max_refinements: 2, proposal_retries: 3 },
		ingest: Ingest { default_catalog: None, batch_size: 64 },
		security: Security { admin_token: "secret".to_string() },
	}
}

fn record(code: &str, description: &str, window: Option<(u32, u32)>) -> CatalogRecord {
	CatalogRecord {
		item_num: code.to_string(),
		description: description.to_string(),
		group: Some("A1".to_string()),
		schedule_fee: Some(41.4),
		duration_min_minutes: window.map(|(min, _)| min),
		duration_max_minutes: window.map(|(_, max)| max),
		duration_min_inclusive: window.map(|_| true),
		duration_max_inclusive: window.map(|_| false),
		..Default::default()
	}
}

struct StubEmbedding;
impl EmbeddingProvider for StubEmbedding {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move { Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3, 0.4]).collect()) })
	}
}

struct FailingEmbedding;
impl EmbeddingProvider for FailingEmbedding {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		_texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move {
			Err(Error::Provider { message: "embedding backend down".to_string() })
		})
	}
}

struct StubRerank;
impl RerankProvider for StubRerank {
	fn rerank<'a>(
		&'a self,
		_cfg: &'a ProviderConfig,
		_query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, Result<Vec<f32>>> {
		Box::pin(async move { Ok(vec![0.5; docs.len()]) })
	}
}

/// Dispatches on the rendered template and records every prompt it sees.
struct ScriptedChat {
	prompts: Arc<Mutex<Vec<String>>>,
}
impl ScriptedChat {
	fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
		let prompts = Arc::new(Mutex::new(Vec::new()));

		(Self { prompts: prompts.clone() }, prompts)
	}

	fn synthesis_items(prompt: &str) -> Vec<Value> {
		prompt
			.lines()
			.filter_map(|line| {
				let rest = line.strip_prefix("Item ")?;
				let code = rest.split_whitespace().next()?;

				Some(serde_json::json!({
					"item_num": code,
					"title": format!("Item {code}"),
					"match_score": 0.5,
				}))
			})
			.collect()
	}
}

impl ChatProvider for ScriptedChat {
	fn chat<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
		_temperature: f32,
	) -> BoxFuture<'a, Result<Value>> {
		Box::pin(async move {
			let prompt = messages
				.first()
				.and_then(|message| message.get("content"))
				.and_then(|content| content.as_str())
				.unwrap_or_default()
				.to_string();

			self.prompts.lock().expect("Prompt log poisoned.").push(prompt.clone());

			if prompt.contains("billing-relevant facts") {
				return Ok(serde_json::json!({}));
			}
			if prompt.contains("rewrite clinical notes") {
				return Ok(serde_json::json!({
					"enhanced_query": "precise gp attendance query",
					"added_constraints": [],
					"confidence": 0.9,
				}));
			}
			if prompt.contains("re-order candidate") {
				return Ok(serde_json::json!({ "order": [] }));
			}

			Ok(serde_json::json!({ "items": Self::synthesis_items(&prompt) }))
		})
	}
}

/// In-memory stand-in for the catalog collection. Scores fall off by rank so
/// ordering is stable.
struct StubIndex {
	records: Vec<CatalogRecord>,
}
impl VectorIndex for StubIndex {
	fn search<'a>(
		&'a self,
		_vector: Vec<f32>,
		filter: Option<&'a CatalogFilter>,
		limit: u64,
	) -> BoxFuture<'a, Result<Vec<CatalogHit>>> {
		Box::pin(async move {
			let hits = self
				.records
				.iter()
				.filter(|record| {
					let Some(filter) = filter else {
						return true;
					};

					(filter.codes.is_empty() || filter.codes.contains(&record.item_num))
						&& (filter.groups.is_empty()
							|| record
								.group
								.as_ref()
								.is_some_and(|group| filter.groups.contains(group)))
				})
				.enumerate()
				.map(|(rank, record)| CatalogHit {
					record: record.clone(),
					score: 1.0 - rank as f32 * 0.05,
				})
				.take(limit as usize)
				.collect();

			Ok(hits)
		})
	}

	fn upsert<'a>(
		&'a self,
		records: Vec<(CatalogRecord, Vec<f32>)>,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move { Ok(records.len() as u64) })
	}

	fn recreate<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move { Ok(()) })
	}
}

fn service_with(
	records: Vec<CatalogRecord>,
) -> (MiraService, Arc<Mutex<Vec<String>>>) {
	let (chat, prompts) = ScriptedChat::new();
	let providers = ServiceProviders::new(
		Arc::new(StubEmbedding),
		Arc::new(StubRerank),
		Arc::new(chat),
	);
	let service =
		MiraService::with_parts(test_config(), Arc::new(StubIndex { records }), providers);

	(service, prompts)
}

const NOTE: &str = "gp consult about chest pain, exactly 25 minutes, in person at the clinic, 40 y/o";

#[tokio::test]
async fn deep_mode_accepts_passing_items_and_bounds_the_result() {
	let records = (0..8)
		.map(|index| record(&format!("4{index}"), "Professional attendance", None))
		.collect();
	let (service, _) = service_with(records);
	let outcome = service
		.run_agent(NOTE, 3, AgentMode::Deep)
		.await
		.expect("Expected the agent run to succeed.");

	assert_eq!(outcome.items.len(), 3);

	let mut codes: Vec<&str> = outcome.items.iter().map(|item| item.code.as_str()).collect();

	codes.dedup();

	assert_eq!(codes.len(), 3, "Accepted codes must be unique.");
	assert!(outcome.items.iter().all(|item| {
		item.verify.as_ref().is_some_and(|report| report.passes)
	}));
	assert!(outcome.iterations <= 2);
}

#[tokio::test]
async fn refinement_excludes_previously_seen_codes() {
	let records = vec![
		record("36", "Professional attendance", None),
		record("44", "Professional attendance lasting at least 40 minutes", Some((40, 60))),
		record("47", "Professional attendance lasting at least 60 minutes", Some((60, 120))),
	];
	let (service, prompts) = service_with(records);
	let outcome = service
		.run_agent(NOTE, 2, AgentMode::Deep)
		.await
		.expect("Expected the agent run to succeed.");

	// Only item 36 survives verification: the others' metadata windows are
	// disjoint from the note's 25 minutes.
	assert_eq!(outcome.items.len(), 1);
	assert_eq!(outcome.items[0].code, "36");
	assert_eq!(outcome.iterations, 1);

	let prompts = prompts.lock().expect("Prompt log poisoned.");
	let banned_round = prompts.iter().any(|prompt| {
		prompt.contains("recommend Australian MBS items")
			&& prompt.contains("banned item numbers: 36, 44, 47")
	});

	assert!(banned_round, "Refinement must ban every previously seen code.");
}

#[tokio::test]
async fn smart_mode_emits_items_without_verification() {
	let records = vec![
		record("36", "Professional attendance", None),
		record("44", "Professional attendance, prolonged", None),
	];
	let (service, _) = service_with(records);
	let outcome = service
		.run_agent(NOTE, 2, AgentMode::Smart)
		.await
		.expect("Expected the agent run to succeed.");

	assert_eq!(outcome.items.len(), 2);
	assert!(outcome.items.iter().all(|item| item.verify.is_none()));
	assert!(outcome.items.iter().all(|item| {
		item.match_reason.as_deref() == Some("Enhanced by query self-reflection")
	}));
	assert_eq!(outcome.iterations, 0);
}

#[tokio::test]
async fn empty_note_is_rejected_at_the_boundary() {
	let (service, _) = service_with(Vec::new());
	let result = service.run_agent("   ", 3, AgentMode::Deep).await;

	assert!(matches!(result, Err(Error::InvalidRequest { .. })));
}

#[tokio::test]
async fn embedding_failure_degrades_to_empty_results() {
	let (chat, _) = ScriptedChat::new();
	let providers = ServiceProviders::new(
		Arc::new(FailingEmbedding),
		Arc::new(StubRerank),
		Arc::new(chat),
	);
	let service = MiraService::with_parts(
		test_config(),
		Arc::new(StubIndex { records: vec![record("36", "Professional attendance", None)] }),
		providers,
	);
	let outcome = service
		.retrieve("gp consult", &RetrieveOptions {
			top_k: 3,
			exclude_codes: Vec::new(),
			stage2_reflection: false,
			llm_reflection: false,
		})
		.await
		.expect("Embedding failure must not raise.");

	assert!(outcome.results.is_empty());
}

#[tokio::test]
async fn single_shot_retrieval_respects_exclusions() {
	let records = vec![
		record("36", "Professional attendance", None),
		record("44", "Professional attendance, prolonged", None),
	];
	let (service, _) = service_with(records);
	let outcome = service
		.retrieve("gp attendance\n#constraints\n-code:36", &RetrieveOptions {
			top_k: 5,
			exclude_codes: Vec::new(),
			stage2_reflection: true,
			llm_reflection: false,
		})
		.await
		.expect("Expected retrieval to succeed.");

	assert_eq!(outcome.results.len(), 1);
	assert_eq!(outcome.results[0].item_num, "44");
}
