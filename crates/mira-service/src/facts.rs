//! Fact extraction: the deterministic heuristics from `mira-domain` plus a
//! conditional LLM completion pass for whatever they leave unknown.

use serde_json::Value;

use crate::{MiraService, prompts};
use mira_domain::{NoteFacts, extract_heuristic};

const FACT_COMPLETION_TEMPERATURE: f32 = 0.0;

impl MiraService {
	/// Extract structured facts from a note. Heuristic values always win; the
	/// LLM only fills gaps, and any provider failure falls back to the
	/// heuristic view.
	pub async fn extract_facts(&self, note: &str) -> NoteFacts {
		let heuristic = extract_heuristic(note);

		if !heuristic.needs_completion() {
			return heuristic;
		}

		let Some(prompt) = self.prompts.render(prompts::FACT_COMPLETION, &[("{note}", note)])
		else {
			return heuristic;
		};
		let messages = prompts::user_message(prompt);

		match self
			.providers
			.chat
			.chat(&self.cfg.providers.chat, &messages, FACT_COMPLETION_TEMPERATURE)
			.await
		{
			Ok(completion) => merge_facts(heuristic, completion),
			Err(err) => {
				tracing::warn!(error = %err, "Fact completion failed; keeping heuristic facts.");

				heuristic
			},
		}
	}
}

fn merge_facts(heuristic: NoteFacts, completion: Value) -> NoteFacts {
	let llm: NoteFacts = match serde_json::from_value(completion) {
		Ok(facts) => facts,
		Err(err) => {
			tracing::warn!(error = %err, "Fact completion returned an unexpected shape; keeping heuristic facts.");

			return heuristic;
		},
	};
	let mut keywords = heuristic.keywords.clone();

	for keyword in llm.keywords {
		let normalized = keyword.to_lowercase();

		if !keywords.contains(&normalized) {
			keywords.push(normalized);
		}
	}

	NoteFacts {
		duration_min: heuristic.duration_min.or(llm.duration_min),
		duration_max: heuristic.duration_max.or(llm.duration_max),
		duration_min_inclusive: heuristic.duration_min_inclusive.or(llm.duration_min_inclusive),
		duration_max_inclusive: heuristic.duration_max_inclusive.or(llm.duration_max_inclusive),
		age: heuristic.age.or(llm.age),
		modality: heuristic.modality.or(llm.modality),
		setting: heuristic.setting.or(llm.setting),
		first_or_review: heuristic.first_or_review.or(llm.first_or_review),
		referral_present: heuristic.referral_present.or(llm.referral_present),
		specialty: heuristic.specialty.or(llm.specialty),
		is_gp: heuristic.is_gp.or(llm.is_gp),
		is_specialist: heuristic.is_specialist.or(llm.is_specialist),
		is_emergency: heuristic.is_emergency.or(llm.is_emergency),
		keywords,
	}
}
