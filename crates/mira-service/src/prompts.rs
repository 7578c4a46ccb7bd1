//! Prompt templates as data. Registering them by name keeps prompt changes
//! regression-testable without touching pipeline code.

use std::collections::BTreeMap;

pub const FACT_COMPLETION: &str = "fact_completion";
pub const QUERY_REFLECTION: &str = "query_reflection";
pub const RERANK_RUBRIC: &str = "rerank_rubric";
pub const ANSWER_SYNTHESIS: &str = "answer_synthesis";

const FACT_COMPLETION_TEMPLATE: &str = r#"You extract billing-relevant facts from an Australian clinical note.
Return a single JSON object with exactly these keys: duration_min, duration_max,
duration_min_inclusive, duration_max_inclusive, age, modality, setting,
first_or_review, referral_present, specialty, is_gp, is_specialist, is_emergency,
keywords. Use null for anything the note does not state. modality is one of
"in_person", "video", "phone". setting is one of "consulting_rooms", "hospital",
"residential_care", "home", "other". first_or_review is "first" or "review".
keywords is an array of lowercase evidence tokens.

Note:
{note}"#;

const QUERY_REFLECTION_TEMPLATE: &str = r#"You rewrite clinical notes into precise retrieval queries for the Australian MBS.
Expand clinical abbreviations, keep every billing-relevant detail (duration, age,
modality, setting, visit type, referral), and drop narrative noise. Return a JSON
object: {"enhanced_query": string, "standardized_terms": [string],
"added_constraints": [string], "removed_noise": [string], "confidence": number,
"reasoning": string}. Constraints use key:value tokens with keys duration,
modality, setting, specialty, visit.

Note:
{note}"#;

const RERANK_RUBRIC_TEMPLATE: &str = r#"You re-order candidate MBS items for a query. Respect the constraints strictly,
prefer items whose duration bucket matches, prefer matching group and subgroup,
bias toward the higher upstream score, and penalize obvious mismatches. Return a
JSON object {"order": [item numbers, best first]}. Only use item numbers from the
candidate list.

Query:
{query}

Constraints:
{constraints}

Candidates:
{candidates}"#;

const ANSWER_SYNTHESIS_TEMPLATE: &str = r#"You recommend Australian MBS items for a clinical note. Today is {date}.
Choose at most {top_k} items from the context below. Never recommend an item
outside the context and never recommend these banned item numbers: {banned}.
Return a JSON object {"items": [{"item_num": string, "title": string,
"match_reason": string, "match_score": number, "fee": number or null}]} with
match_score in [0, 1].

Query:
{query}

Context:
{context}"#;

pub struct PromptRegistry {
	templates: BTreeMap<&'static str, &'static str>,
}
impl PromptRegistry {
	pub fn get(&self, name: &str) -> Option<&'static str> {
		self.templates.get(name).copied()
	}

	/// Fetch a template and substitute `{placeholder}` pairs.
	pub fn render(&self, name: &str, replacements: &[(&str, &str)]) -> Option<String> {
		let mut rendered = self.get(name)?.to_string();

		for (placeholder, value) in replacements {
			rendered = rendered.replace(placeholder, value);
		}

		Some(rendered)
	}
}

impl Default for PromptRegistry {
	fn default() -> Self {
		let mut templates = BTreeMap::new();

		templates.insert(FACT_COMPLETION, FACT_COMPLETION_TEMPLATE);
		templates.insert(QUERY_REFLECTION, QUERY_REFLECTION_TEMPLATE);
		templates.insert(RERANK_RUBRIC, RERANK_RUBRIC_TEMPLATE);
		templates.insert(ANSWER_SYNTHESIS, ANSWER_SYNTHESIS_TEMPLATE);

		Self { templates }
	}
}

/// Wrap rendered user content in the chat message shape the providers expect.
pub fn user_message(content: String) -> Vec<serde_json::Value> {
	vec![serde_json::json!({ "role": "user", "content": content })]
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn registry_has_all_pipeline_prompts() {
		let registry = PromptRegistry::default();

		for name in [FACT_COMPLETION, QUERY_REFLECTION, RERANK_RUBRIC, ANSWER_SYNTHESIS] {
			assert!(registry.get(name).is_some(), "Missing template {name}.");
		}
	}

	#[test]
	fn render_substitutes_placeholders() {
		let registry = PromptRegistry::default();
		let rendered = registry
			.render(FACT_COMPLETION, &[("{note}", "chest pain, 20 minutes")])
			.expect("Expected template.");

		assert!(rendered.contains("chest pain, 20 minutes"));
		assert!(!rendered.contains("{note}"));
	}
}
