//! The retrieval pipeline: vector search with an optional metadata prefilter,
//! cross-encoder rerank, constraint-aware local rerank, optional LLM rerank,
//! and LLM answer synthesis. Upstream failures degrade to best-effort; only a
//! caller error (empty query) raises.

use std::{
	cmp::Ordering,
	collections::{BTreeMap, BTreeSet},
};

use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::{
	Error, MiraService, Result,
	constraints::{ConstraintSet, bucket_accepts, parse_duration_bucket, split_query},
	prompts,
};
use mira_domain::Interval;
use mira_storage::CatalogRecord;

const RERANK_KEEP_FLOOR: usize = 12;
const SYNTHESIS_CONTEXT_EXTRA: usize = 6;
const CANDIDATE_SNIPPET_CHARS: usize = 160;

const STAGE2_BASE_WEIGHT: f32 = 0.5;
const STAGE2_CODE_BONUS: f32 = 3.0;
const STAGE2_GROUP_BONUS: f32 = 2.0;
const STAGE2_SUBGROUP_BONUS: f32 = 1.5;
const STAGE2_DURATION_BONUS: f32 = 1.5;

#[derive(Clone, Debug)]
pub struct RetrieveOptions {
	pub top_k: usize,
	pub exclude_codes: Vec<String>,
	pub stage2_reflection: bool,
	pub llm_reflection: bool,
}

#[derive(Clone, Debug)]
pub struct RetrievedItem {
	pub item_num: String,
	pub title: String,
	pub match_reason: Option<String>,
	pub match_score: Option<f32>,
	pub fee: Option<f64>,
	pub meta: CatalogRecord,
}

#[derive(Clone, Debug, Default)]
pub struct RetrieveOutcome {
	pub results: Vec<RetrievedItem>,
}

#[derive(Clone, Debug)]
struct Candidate {
	record: CatalogRecord,
	/// Best upstream relevance seen so far: vector score, replaced by the
	/// cross-encoder score when reranking runs.
	upstream: f32,
}

#[derive(Debug, Deserialize)]
struct SynthesizedItem {
	#[serde(alias = "itemNum")]
	item_num: Value,
	title: Option<String>,
	match_reason: Option<String>,
	fee: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RerankOrder {
	order: Vec<Value>,
}

impl MiraService {
	pub async fn retrieve(&self, query: &str, opts: &RetrieveOptions) -> Result<RetrieveOutcome> {
		let (clean_query, constraint_set) = split_query(query);

		if clean_query.is_empty() {
			return Err(Error::InvalidRequest { message: "Query must be non-empty.".to_string() });
		}

		let mut banned: BTreeSet<String> = constraint_set.banned_codes().into_iter().collect();

		banned.extend(opts.exclude_codes.iter().cloned());

		let candidates = self.gather_candidates(&clean_query, &constraint_set).await?;

		if candidates.is_empty() {
			return Ok(RetrieveOutcome::default());
		}

		let mut candidates = self.rerank_candidates(&clean_query, candidates, opts.top_k).await;

		if opts.stage2_reflection {
			candidates = stage2_rerank(candidates, &constraint_set);
		}
		if opts.llm_reflection {
			candidates = self.llm_rerank(&clean_query, &constraint_set, candidates).await;
		}

		let results = self.synthesize(&clean_query, &candidates, &banned, opts.top_k).await;

		Ok(RetrieveOutcome { results })
	}

	async fn gather_candidates(
		&self,
		clean_query: &str,
		constraint_set: &ConstraintSet,
	) -> Result<Vec<Candidate>> {
		let embedded = self
			.providers
			.embedding
			.embed(&self.cfg.providers.embedding, &[clean_query.to_string()])
			.await;
		let vector = match embedded {
			Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
			Ok(_) => {
				tracing::warn!("Embedding provider returned no vectors; no candidates.");

				return Ok(Vec::new());
			},
			Err(err) => {
				tracing::warn!(error = %err, "Embedding backend unavailable; no candidates.");

				return Ok(Vec::new());
			},
		};
		let filter = constraint_set.compile_filter();
		let pool = u64::from(self.cfg.retrieval.candidate_pool);
		let hits = if filter.is_empty() {
			self.index.search(vector, None, pool).await.unwrap_or_else(|err| {
				tracing::warn!(error = %err, "Vector search failed; no candidates.");

				Vec::new()
			})
		} else {
			match self.index.search(vector.clone(), Some(&filter), pool).await {
				Ok(hits) => hits,
				Err(err) => {
					tracing::warn!(error = %err, "Filtered search failed; retrying without filter.");

					self.index.search(vector, None, pool).await.unwrap_or_else(|err| {
						tracing::warn!(error = %err, "Vector search failed; no candidates.");

						Vec::new()
					})
				},
			}
		};

		Ok(hits
			.into_iter()
			.map(|hit| Candidate { record: hit.record, upstream: hit.score })
			.collect())
	}

	/// Cross-encoder rerank, keeping the `max(top_k + 5, 12)` most relevant.
	/// Provider id "off" or any failure leaves the vector order untouched.
	async fn rerank_candidates(
		&self,
		clean_query: &str,
		mut candidates: Vec<Candidate>,
		top_k: usize,
	) -> Vec<Candidate> {
		if self.cfg.providers.rerank.provider_id == "off" {
			return candidates;
		}

		let docs: Vec<String> = candidates
			.iter()
			.map(|candidate| {
				format!("Item {}: {}", candidate.record.item_num, candidate.record.description)
			})
			.collect();
		let scores = match self
			.providers
			.rerank
			.rerank(&self.cfg.providers.rerank, clean_query, &docs)
			.await
		{
			Ok(scores) if scores.len() == candidates.len() => scores,
			Ok(_) => {
				tracing::warn!("Rerank returned a mismatched score count; keeping vector order.");

				return candidates;
			},
			Err(err) => {
				tracing::warn!(error = %err, "Rerank failed; keeping vector order.");

				return candidates;
			},
		};

		for (candidate, score) in candidates.iter_mut().zip(scores) {
			candidate.upstream = score;
		}

		sort_by_upstream(&mut candidates);
		candidates.truncate((top_k + 5).max(RERANK_KEEP_FLOOR));

		candidates
	}

	/// Secondary small-model rerank of the head of the list. Codes the model
	/// does not mention sink to the bottom of the reordered head.
	async fn llm_rerank(
		&self,
		clean_query: &str,
		constraint_set: &ConstraintSet,
		candidates: Vec<Candidate>,
	) -> Vec<Candidate> {
		if candidates.len() <= 1 {
			return candidates;
		}

		let top = (self.cfg.retrieval.reflection_rerank_top as usize).clamp(5, 25);
		let head_len = top.min(candidates.len());
		let listing = candidates[..head_len]
			.iter()
			.map(|candidate| {
				format!(
					"{} | score {:.3} | {}",
					candidate.record.item_num,
					candidate.upstream,
					snippet(&candidate.record.description)
				)
			})
			.collect::<Vec<_>>()
			.join("\n");
		let constraints_text =
			constraint_set.format_block().unwrap_or_else(|| "none".to_string());
		let Some(prompt) = self.prompts.render(prompts::RERANK_RUBRIC, &[
			("{query}", clean_query),
			("{constraints}", constraints_text.as_str()),
			("{candidates}", listing.as_str()),
		]) else {
			return candidates;
		};
		let messages = prompts::user_message(prompt);
		let raw =
			match self.providers.chat.chat(&self.cfg.providers.chat, &messages, 0.0).await {
				Ok(value) => value,
				Err(err) => {
					tracing::warn!(error = %err, "LLM rerank failed; keeping current order.");

					return candidates;
				},
			};
		let Ok(parsed) = serde_json::from_value::<RerankOrder>(raw) else {
			tracing::warn!("LLM rerank returned an unexpected shape; keeping current order.");

			return candidates;
		};
		let mut head: Vec<Option<Candidate>> =
			candidates[..head_len].iter().cloned().map(Some).collect();
		let tail = candidates[head_len..].to_vec();
		let mut reordered = Vec::with_capacity(candidates.len());

		for code_value in parsed.order {
			let Some(code) = value_to_code(&code_value) else {
				continue;
			};
			let Some(slot) =
				head.iter_mut().find(|slot| {
					slot.as_ref().is_some_and(|candidate| candidate.record.item_num == code)
				})
			else {
				continue;
			};

			if let Some(candidate) = slot.take() {
				reordered.push(candidate);
			}
		}

		reordered.extend(head.into_iter().flatten());
		reordered.extend(tail);

		reordered
	}

	/// Answer synthesis over the head of the candidate list. Any failure
	/// yields an empty result set, never an error.
	async fn synthesize(
		&self,
		clean_query: &str,
		candidates: &[Candidate],
		banned: &BTreeSet<String>,
		top_k: usize,
	) -> Vec<RetrievedItem> {
		let context_len = (top_k + SYNTHESIS_CONTEXT_EXTRA).min(candidates.len());
		let context = candidates[..context_len]
			.iter()
			.map(|candidate| {
				let record = &candidate.record;
				let group = record.group.as_deref().unwrap_or("-");
				let fee = record
					.schedule_fee
					.map(|fee| format!("${fee:.2}"))
					.unwrap_or_else(|| "n/a".to_string());

				format!("Item {} (group {group}, fee {fee}): {}", record.item_num, record.description)
			})
			.collect::<Vec<_>>()
			.join("\n");
		let banned_text = if banned.is_empty() {
			"none".to_string()
		} else {
			banned.iter().cloned().collect::<Vec<_>>().join(", ")
		};
		let date = OffsetDateTime::now_utc().date().to_string();
		let top_k_text = top_k.to_string();
		let Some(prompt) = self.prompts.render(prompts::ANSWER_SYNTHESIS, &[
			("{query}", clean_query),
			("{context}", context.as_str()),
			("{date}", date.as_str()),
			("{banned}", banned_text.as_str()),
			("{top_k}", top_k_text.as_str()),
		]) else {
			return Vec::new();
		};
		let messages = prompts::user_message(prompt);
		let raw = match self
			.providers
			.chat
			.chat(&self.cfg.providers.chat, &messages, self.cfg.providers.chat.temperature)
			.await
		{
			Ok(value) => value,
			Err(err) => {
				tracing::warn!(error = %err, "Answer synthesis failed; returning no results.");

				return Vec::new();
			},
		};
		let items = raw
			.get("items")
			.cloned()
			.or_else(|| raw.as_array().map(|_| raw.clone()))
			.and_then(|value| value.as_array().cloned())
			.unwrap_or_default();
		let by_code: BTreeMap<&str, &Candidate> = candidates
			.iter()
			.map(|candidate| (candidate.record.item_num.as_str(), candidate))
			.collect();
		let mut results = Vec::new();

		for item in items {
			let Ok(synthesized) = serde_json::from_value::<SynthesizedItem>(item) else {
				continue;
			};
			let Some(code) = value_to_code(&synthesized.item_num) else {
				continue;
			};

			if banned.contains(&code) {
				continue;
			}

			let Some(candidate) = by_code.get(code.as_str()) else {
				tracing::warn!(%code, "Synthesis named an item outside the candidate pool; dropped.");

				continue;
			};
			let title = synthesized
				.title
				.filter(|title| !title.trim().is_empty())
				.unwrap_or_else(|| snippet(&candidate.record.description).to_string());

			// The best upstream rerank score wins over whatever relevance the
			// synthesis model claimed for itself.
			results.push(RetrievedItem {
				item_num: code,
				title,
				match_reason: synthesized.match_reason,
				match_score: Some(candidate.upstream),
				fee: synthesized.fee.or(candidate.record.schedule_fee),
				meta: candidate.record.clone(),
			});

			if results.len() >= top_k {
				break;
			}
		}

		results
	}
}

/// Local constraint-aware rerank. Composite scores replace the order; the
/// stored upstream relevance is untouched.
fn stage2_rerank(candidates: Vec<Candidate>, constraint_set: &ConstraintSet) -> Vec<Candidate> {
	let (min, max) = candidates.iter().fold((f32::MAX, f32::MIN), |(min, max), candidate| {
		(min.min(candidate.upstream), max.max(candidate.upstream))
	});
	let span = (max - min).max(f32::EPSILON);
	let dropped: BTreeSet<&str> = constraint_set
		.must_not
		.iter()
		.filter(|constraint| constraint.key == "code")
		.map(|constraint| constraint.value.as_str())
		.collect();
	let mut scored: Vec<(f32, Candidate)> = candidates
		.into_iter()
		.filter(|candidate| !dropped.contains(candidate.record.item_num.as_str()))
		.map(|candidate| {
			let base = (candidate.upstream - min) / span;
			let mut composite = STAGE2_BASE_WEIGHT * base;

			for constraint in &constraint_set.must {
				match constraint.key.as_str() {
					"code" if candidate.record.item_num == constraint.value => {
						composite += STAGE2_CODE_BONUS;
					},
					"group"
						if candidate
							.record
							.group
							.as_deref()
							.is_some_and(|group| group.eq_ignore_ascii_case(&constraint.value)) =>
					{
						composite += STAGE2_GROUP_BONUS;
					},
					"subgroup"
						if candidate.record.subgroup.as_deref().is_some_and(|subgroup| {
							subgroup.eq_ignore_ascii_case(&constraint.value)
						}) =>
					{
						composite += STAGE2_SUBGROUP_BONUS;
					},
					"duration" => {
						let accepted = parse_duration_bucket(&constraint.value)
							.map(|bucket| {
								bucket_accepts(bucket, record_interval(&candidate.record).as_ref())
							})
							.unwrap_or(false);

						if accepted {
							composite += STAGE2_DURATION_BONUS;
						}
					},
					_ => {},
				}
			}

			(composite, candidate)
		})
		.collect();

	scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

	scored.into_iter().map(|(_, candidate)| candidate).collect()
}

fn record_interval(record: &CatalogRecord) -> Option<Interval> {
	if record.duration_min_minutes.is_none() && record.duration_max_minutes.is_none() {
		return None;
	}

	Some(Interval {
		min: record.duration_min_minutes,
		max: record.duration_max_minutes,
		left_closed: record.duration_min_inclusive.unwrap_or(true),
		right_closed: record.duration_max_inclusive.unwrap_or(false),
	})
}

fn sort_by_upstream(candidates: &mut [Candidate]) {
	candidates.sort_by(|a, b| b.upstream.partial_cmp(&a.upstream).unwrap_or(Ordering::Equal));
}

fn snippet(description: &str) -> &str {
	if description.len() <= CANDIDATE_SNIPPET_CHARS {
		return description;
	}

	let mut end = CANDIDATE_SNIPPET_CHARS;

	while !description.is_char_boundary(end) {
		end -= 1;
	}

	&description[..end]
}

/// Item numbers come back from models as strings or bare numbers.
fn value_to_code(value: &Value) -> Option<String> {
	match value {
		Value::String(code) if !code.trim().is_empty() => Some(code.trim().to_string()),
		Value::Number(code) => Some(code.to_string()),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::constraints::split_query;

	fn candidate(code: &str, group: Option<&str>, upstream: f32) -> Candidate {
		Candidate {
			record: CatalogRecord {
				item_num: code.to_string(),
				description: format!("Item {code}"),
				group: group.map(str::to_string),
				..Default::default()
			},
			upstream,
		}
	}

	#[test]
	fn stage2_prefers_constraint_matches_over_base_score() {
		let (_, constraints) = split_query("q\n#constraints\n+group:a1");
		let ranked = stage2_rerank(
			vec![candidate("36", Some("A3"), 0.9), candidate("23", Some("A1"), 0.2)],
			&constraints,
		);

		assert_eq!(ranked[0].record.item_num, "23");
	}

	#[test]
	fn stage2_drops_must_not_codes() {
		let (_, constraints) = split_query("q\n#constraints\n-code:36");
		let ranked = stage2_rerank(
			vec![candidate("36", None, 0.9), candidate("23", None, 0.2)],
			&constraints,
		);

		assert_eq!(ranked.len(), 1);
		assert_eq!(ranked[0].record.item_num, "23");
	}

	#[test]
	fn stage2_rewards_matching_duration_buckets() {
		let (_, constraints) = split_query("q\n#constraints\n+duration:>=20");
		let mut short = candidate("3", None, 0.9);
		let mut long = candidate("36", None, 0.2);

		short.record.duration_min_minutes = Some(5);
		short.record.duration_max_minutes = Some(10);
		long.record.duration_min_minutes = Some(20);
		long.record.duration_max_minutes = Some(40);

		let ranked = stage2_rerank(vec![short, long], &constraints);

		assert_eq!(ranked[0].record.item_num, "36");
	}

	#[test]
	fn snippet_never_splits_a_char_boundary() {
		let text = "é".repeat(200);

		let _ = snippet(&text);
	}

	#[test]
	fn value_to_code_accepts_numbers_and_strings() {
		assert_eq!(value_to_code(&serde_json::json!(36)), Some("36".to_string()));
		assert_eq!(value_to_code(&serde_json::json!(" 36 ")), Some("36".to_string()));
		assert_eq!(value_to_code(&serde_json::json!(null)), None);
	}
}
