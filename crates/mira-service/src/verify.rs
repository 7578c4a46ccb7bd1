//! Per-candidate verification: lift a rule from the candidate's catalog
//! metadata and run the deterministic check table against the note facts.

use serde::Serialize;

use crate::retrieve::RetrievedItem;
use mira_domain::{NoteFacts, RuleHints, VerifyReport, parse_item_rule, verify};
use mira_storage::CatalogRecord;

#[derive(Clone, Debug, Serialize)]
pub struct VerifiedItem {
	pub code: String,
	pub display: String,
	pub fee: Option<f64>,
	pub score: Option<f32>,
	pub match_reason: Option<String>,
	pub verify: Option<VerifyReport>,
	pub group: Option<String>,
}

pub fn rule_hints(meta: &CatalogRecord) -> RuleHints {
	RuleHints {
		group: meta.group.clone(),
		subgroup: meta.subgroup.clone(),
		duration_min_minutes: meta.duration_min_minutes,
		duration_max_minutes: meta.duration_max_minutes,
		duration_min_inclusive: meta.duration_min_inclusive,
		duration_max_inclusive: meta.duration_max_inclusive,
	}
}

pub fn verify_candidate(facts: &NoteFacts, item: &RetrievedItem) -> VerifiedItem {
	let rule = parse_item_rule(&item.item_num, &item.meta.description, &rule_hints(&item.meta));
	let report = verify(facts, &rule, &item.title);

	VerifiedItem {
		code: item.item_num.clone(),
		display: item.title.clone(),
		fee: item.fee.or(item.meta.schedule_fee),
		score: item.match_score,
		match_reason: item.match_reason.clone(),
		verify: Some(report),
		group: item.meta.group.clone(),
	}
}

pub fn verify_candidates(facts: &NoteFacts, items: &[RetrievedItem]) -> Vec<VerifiedItem> {
	items.iter().map(|item| verify_candidate(facts, item)).collect()
}

/// Seam for pair-wise exclusivity resolution between time-tiered items.
/// Currently returns the items untouched with no notes.
pub fn resolve_time_conflicts(items: Vec<VerifiedItem>) -> (Vec<VerifiedItem>, Vec<String>) {
	(items, Vec::new())
}
