//! Query reflection: a heuristic completeness score decides whether an LLM
//! rewrite is worth a call. Outputs are advisory only; they become `+must`
//! tokens on the next retrieval and never filter here.

use serde::{Deserialize, Serialize};

use crate::{MiraService, constraints, prompts};
use mira_domain::{Modality, NoteFacts};

const REFLECTION_TEMPERATURE: f32 = 0.1;
const BASE_COMPLETENESS: f32 = 0.6;
const COMPLETENESS_INCREMENT: f32 = 0.1;
const LLM_THRESHOLD: f32 = 0.8;

/// Common clinical abbreviations that usually need expanding before embedding.
const CLINICAL_ABBREVIATIONS: &[&str] = &["mi", "copd", "dm", "htn", "af", "dvt", "pe"];

/// Vocabulary whose absence marks a note as missing clinical context.
const CLINICAL_VOCAB: &[&str] = &[
	"pain",
	"fracture",
	"diabetes",
	"asthma",
	"consult",
	"assessment",
	"review",
	"infection",
	"hypertension",
	"injury",
	"rash",
	"cough",
	"chest",
	"abdominal",
	"mental",
	"diagnosis",
	"procedure",
	"wound",
];

#[derive(Clone, Debug, Serialize)]
pub struct Reflection {
	pub enhanced_query: String,
	/// `key:value` tokens for the retriever's `+must` side.
	pub constraints: Vec<String>,
	pub standardized_terms: Vec<String>,
	pub removed_noise: Vec<String>,
	pub confidence: f32,
	pub reasoning: Option<String>,
	pub used_llm: bool,
}

#[derive(Debug, Deserialize)]
struct ReflectionOutput {
	enhanced_query: Option<String>,
	standardized_terms: Option<Vec<String>>,
	added_constraints: Option<Vec<String>>,
	removed_noise: Option<Vec<String>>,
	confidence: Option<f32>,
	reasoning: Option<String>,
}

struct Completeness {
	score: f32,
	needs_llm: bool,
}

impl MiraService {
	pub async fn reflect(&self, note: &str, facts: &NoteFacts) -> Reflection {
		let completeness = assess_completeness(note, facts);
		let key_constraints = constraints::key_constraints(facts);

		if completeness.score >= LLM_THRESHOLD && !completeness.needs_llm {
			return Reflection {
				enhanced_query: note.to_string(),
				constraints: key_constraints,
				standardized_terms: Vec::new(),
				removed_noise: Vec::new(),
				confidence: completeness.score,
				reasoning: None,
				used_llm: false,
			};
		}

		self.reflect_with_llm(note, key_constraints, completeness.score).await
	}

	async fn reflect_with_llm(
		&self,
		note: &str,
		key_constraints: Vec<String>,
		heuristic_score: f32,
	) -> Reflection {
		let fallback = |constraints: Vec<String>| Reflection {
			enhanced_query: note.to_string(),
			constraints,
			standardized_terms: Vec::new(),
			removed_noise: Vec::new(),
			confidence: heuristic_score,
			reasoning: None,
			used_llm: false,
		};
		let Some(prompt) = self.prompts.render(prompts::QUERY_REFLECTION, &[("{note}", note)])
		else {
			return fallback(key_constraints);
		};
		let messages = prompts::user_message(prompt);
		let raw = match self
			.providers
			.chat
			.chat(&self.cfg.providers.chat, &messages, REFLECTION_TEMPERATURE)
			.await
		{
			Ok(value) => value,
			Err(err) => {
				tracing::warn!(error = %err, "Query reflection failed; falling back to the original note.");

				return fallback(key_constraints);
			},
		};
		let output: ReflectionOutput = match serde_json::from_value(raw) {
			Ok(output) => output,
			Err(err) => {
				tracing::warn!(error = %err, "Query reflection returned invalid JSON; falling back to the original note.");

				return fallback(key_constraints);
			},
		};
		let enhanced_query = output
			.enhanced_query
			.filter(|query| !query.trim().is_empty())
			.unwrap_or_else(|| note.to_string());
		let mut constraints = key_constraints;

		for token in output.added_constraints.unwrap_or_default() {
			let normalized = token.trim().trim_start_matches('+').to_lowercase();

			if normalized.contains(':') && !constraints.contains(&normalized) {
				constraints.push(normalized);
			}
		}

		Reflection {
			enhanced_query,
			constraints,
			standardized_terms: output.standardized_terms.unwrap_or_default(),
			removed_noise: output.removed_noise.unwrap_or_default(),
			confidence: output.confidence.unwrap_or(heuristic_score).clamp(0.0, 1.0),
			reasoning: output.reasoning,
			used_llm: true,
		}
	}
}

fn assess_completeness(note: &str, facts: &NoteFacts) -> Completeness {
	let text = note.to_lowercase();
	let mut score = BASE_COMPLETENESS;

	if facts.duration_min.is_some() {
		score += COMPLETENESS_INCREMENT;
	}
	if facts.age.is_some() {
		score += COMPLETENESS_INCREMENT;
	}
	if matches!(facts.modality, Some(Modality::Video | Modality::Phone)) {
		score += COMPLETENESS_INCREMENT;
	}

	let has_abbreviation = CLINICAL_ABBREVIATIONS
		.iter()
		.any(|abbr| text.split(|c: char| !c.is_ascii_alphanumeric()).any(|token| token == *abbr));
	let has_context = CLINICAL_VOCAB.iter().any(|word| text.contains(word));

	Completeness { score: score.min(1.0), needs_llm: has_abbreviation || !has_context }
}

#[cfg(test)]
mod tests {
	use super::*;
	use mira_domain::extract_heuristic;

	#[test]
	fn complete_notes_score_above_the_llm_threshold() {
		let note = "video consult for chest pain, exactly 25 minutes, 40 y/o";
		let facts = extract_heuristic(note);
		let completeness = assess_completeness(note, &facts);

		assert!(completeness.score >= LLM_THRESHOLD);
		assert!(!completeness.needs_llm);
	}

	#[test]
	fn abbreviations_force_the_llm_path() {
		let note = "pt with AF and HTN, consult for review";
		let facts = extract_heuristic(note);
		let completeness = assess_completeness(note, &facts);

		assert!(completeness.needs_llm);
	}

	#[test]
	fn missing_clinical_context_forces_the_llm_path() {
		let note = "saw them briefly today";
		let facts = extract_heuristic(note);
		let completeness = assess_completeness(note, &facts);

		assert!(completeness.needs_llm);
	}
}
