use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
	facts::{Modality, Setting},
	interval::Interval,
};

pub const DEFAULT_RULE_CONFIDENCE: f32 = 0.7;

/// Structured duration hints carried on the catalog record. When present they
/// override whatever the description text says about the time window.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RuleHints {
	pub group: Option<String>,
	pub subgroup: Option<String>,
	pub duration_min_minutes: Option<u32>,
	pub duration_max_minutes: Option<u32>,
	pub duration_min_inclusive: Option<bool>,
	pub duration_max_inclusive: Option<bool>,
}
impl RuleHints {
	fn duration_interval(&self) -> Option<Interval> {
		if self.duration_min_minutes.is_none() && self.duration_max_minutes.is_none() {
			return None;
		}

		Some(Interval {
			min: self.duration_min_minutes,
			max: self.duration_max_minutes,
			left_closed: self.duration_min_inclusive.unwrap_or(true),
			right_closed: self.duration_max_inclusive.unwrap_or(false),
		})
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeRange {
	pub min: Option<u32>,
	pub max: Option<u32>,
	#[serde(default = "default_true")]
	pub left_closed: bool,
	#[serde(default)]
	pub right_closed: bool,
}
impl AgeRange {
	pub fn contains(&self, age: u32) -> bool {
		let lower_ok = match self.min {
			Some(min) if self.left_closed => age >= min,
			Some(min) => age > min,
			None => true,
		};
		let upper_ok = match self.max {
			Some(max) if self.right_closed => age <= max,
			Some(max) => age < max,
			None => true,
		};

		lower_ok && upper_ok
	}

	pub fn describe(&self) -> String {
		match (self.min, self.max) {
			(Some(min), Some(max)) => format!("{min} to under {max} years"),
			(Some(min), None) => format!("{min} years or more"),
			(None, Some(max)) => format!("under {max} years"),
			(None, None) => "any age".to_string(),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleVisit {
	First,
	Review,
	Either,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
	RelationRequired,
}

/// A sequence constraint ("before/after/follows item N"). Never a hard fail;
/// the verifier always surfaces these as SOFT.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCondition {
	pub kind: ConditionKind,
	pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFlags {
	pub case_conference: Option<bool>,
	pub case_conference_min: Option<u32>,
	pub usual_gp_required: Option<bool>,
	pub home_only: Option<bool>,
	pub referral_gp: Option<bool>,
	pub referral_specialist: Option<bool>,
}

/// A deterministic rule lifted from one catalog item's description.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemRule {
	pub code: String,
	pub group: Option<String>,
	pub subgroup: Option<String>,
	pub time_window: Option<Interval>,
	pub age_range: Option<AgeRange>,
	pub setting_allowed: Option<BTreeSet<Setting>>,
	pub modality_allowed: Option<BTreeSet<Modality>>,
	pub specialty_required: Option<String>,
	pub referral_required: Option<bool>,
	pub first_or_review: Option<RuleVisit>,
	pub conditions: Vec<ItemCondition>,
	pub flags: ItemFlags,
	pub evidence_spans: Vec<String>,
	pub confidence: f32,
}

/// Pure, idempotent extraction of an `ItemRule` from a catalog description.
/// A description nothing matches against yields a permissive rule of `None`s,
/// which downstream checks treat as unconstrained.
pub fn parse_item_rule(code: &str, description: &str, hints: &RuleHints) -> ItemRule {
	let text = description.to_lowercase();
	let mut evidence = Vec::new();
	let time_window = hints.duration_interval().or_else(|| parse_time_window(&text, &mut evidence));
	let age_range = parse_age_range(&text, &mut evidence);
	let setting_allowed = parse_settings(&text, &mut evidence);
	let modality_allowed = Some(parse_modalities(&text, &mut evidence));
	let specialty_required = parse_specialty(&text, &mut evidence);
	let referral_required = if contains_word(&text, "referral") { Some(true) } else { None };
	let first_or_review = parse_visit(&text);
	let conditions = parse_conditions(&text, &mut evidence);
	let flags = parse_flags(&text, &mut evidence);

	ItemRule {
		code: code.to_string(),
		group: hints.group.clone(),
		subgroup: hints.subgroup.clone(),
		time_window,
		age_range,
		setting_allowed,
		modality_allowed,
		specialty_required,
		referral_required,
		first_or_review,
		conditions,
		flags,
		evidence_spans: evidence,
		confidence: DEFAULT_RULE_CONFIDENCE,
	}
}

fn parse_time_window(text: &str, evidence: &mut Vec<String>) -> Option<Interval> {
	if let Some((span, (min, max))) = find_pair(
		r"at least\s+(\d+)\s*min(?:ute)?s?\s+(?:and|but)\s+(?:lasting\s+)?less than\s+(\d+)(?:\s*min(?:ute)?s?)?",
		text,
	) {
		evidence.push(span);

		return Some(Interval::left_closed_right_open(min, max));
	}
	if let Some((span, value)) = find_u32(r"(?:at least|>=|≥)\s*(\d+)\s*min(?:ute)?s?", text) {
		evidence.push(span);

		return Some(Interval::at_least(value));
	}
	if let Some((span, value)) = find_u32(r"(?:less than|<)\s*(\d+)\s*min(?:ute)?s?", text) {
		evidence.push(span);

		return Some(Interval::less_than(value));
	}

	None
}

fn parse_age_range(text: &str, evidence: &mut Vec<String>) -> Option<AgeRange> {
	if let Some((span, (min, max))) = find_pair(
		r"aged at least\s+(\d+)(?:\s*years?)?\s+(?:and|but)\s+less than\s+(\d+)(?:\s*years?)?",
		text,
	) {
		evidence.push(span);

		return Some(AgeRange { min: Some(min), max: Some(max), left_closed: true, right_closed: false });
	}
	if let Some((span, (min, max))) =
		find_pair(r"aged between\s+(\d+)\s+and\s+(\d+)(?:\s*years?)?", text)
	{
		evidence.push(span);

		return Some(AgeRange { min: Some(min), max: Some(max), left_closed: true, right_closed: false });
	}
	if let Some((span, value)) = find_u32(r"aged\s+(\d+)\s*years? or (?:more|over)", text) {
		evidence.push(span);

		return Some(AgeRange { min: Some(value), max: None, left_closed: true, right_closed: false });
	}
	if let Some((span, value)) = find_u32(r"aged less than\s+(\d+)(?:\s*years?)?", text) {
		evidence.push(span);

		return Some(AgeRange { min: None, max: Some(value), left_closed: true, right_closed: false });
	}

	None
}

fn parse_settings(text: &str, evidence: &mut Vec<String>) -> Option<BTreeSet<Setting>> {
	let mut allowed = BTreeSet::new();

	if text.contains("consulting rooms") || text.contains("consulting room") {
		allowed.insert(Setting::ConsultingRooms);
		evidence.push("consulting rooms".to_string());
	}
	if contains_word(text, "hospital") || text.contains("in-patient") || contains_word(text, "inpatient")
	{
		allowed.insert(Setting::Hospital);
		evidence.push("hospital".to_string());
	}
	if text.contains("residential aged care") || text.contains("residential care") {
		allowed.insert(Setting::ResidentialCare);
		evidence.push("residential care".to_string());
	}

	if allowed.is_empty() { None } else { Some(allowed) }
}

fn parse_modalities(text: &str, evidence: &mut Vec<String>) -> BTreeSet<Modality> {
	let mut allowed = BTreeSet::new();

	if contains_word(text, "video") || contains_word(text, "telehealth") {
		allowed.insert(Modality::Video);
		evidence.push("video".to_string());
	}
	if contains_word(text, "telephone") || contains_word(text, "phone") {
		allowed.insert(Modality::Phone);
		evidence.push("telephone".to_string());
	}
	if allowed.is_empty() {
		allowed.insert(Modality::InPerson);
	}

	allowed
}

fn parse_specialty(text: &str, evidence: &mut Vec<String>) -> Option<String> {
	if text.contains("general practitioner") {
		evidence.push("general practitioner".to_string());

		return Some("gp".to_string());
	}
	if text.contains("sexual health medicine") {
		evidence.push("sexual health medicine".to_string());

		return Some("sexual health medicine".to_string());
	}

	None
}

fn parse_visit(text: &str) -> Option<RuleVisit> {
	if text.contains("first attendance")
		|| text.contains("initial consultation")
		|| text.contains("initial assessment")
	{
		return Some(RuleVisit::First);
	}
	if contains_word(text, "review") {
		return Some(RuleVisit::Review);
	}

	None
}

fn parse_conditions(text: &str, evidence: &mut Vec<String>) -> Vec<ItemCondition> {
	let Ok(re) = Regex::new(
		r"(?:before or after|follows)\s+(?:a\s+|an\s+|the\s+)?(?:comprehensive|initial|review)\s+assessment\s+under\s+item\s+\d+(?:\s*,\s*\d+)*",
	) else {
		return Vec::new();
	};

	re.find_iter(text)
		.map(|found| {
			let span = found.as_str().to_string();

			evidence.push(span.clone());

			ItemCondition { kind: ConditionKind::RelationRequired, description: span }
		})
		.collect()
}

fn parse_flags(text: &str, evidence: &mut Vec<String>) -> ItemFlags {
	let mut flags = ItemFlags::default();

	if text.contains("case conference") || contains_word(text, "multidisciplinary") {
		flags.case_conference = Some(true);
		evidence.push("case conference".to_string());
	}
	if let Some((span, value)) = find_u32(r"at least\s+(\d+)\s+other\s+(?:care\s+)?providers?", text) {
		// The count excludes the claiming provider, so the participant floor
		// is one higher.
		flags.case_conference_min = Some(value + 1);
		evidence.push(span);
	}
	if text.contains("usual gp") || text.contains("usual medical practitioner") {
		flags.usual_gp_required = Some(true);
		evidence.push("usual gp".to_string());
	}
	if text.contains("home visit") || text.contains("attendance at home") {
		flags.home_only = Some(true);
		evidence.push("home visit".to_string());
	}
	if text.contains("gp referral") || text.contains("referring practitioner") {
		flags.referral_gp = Some(true);
		evidence.push("gp referral".to_string());
	}
	if text.contains("specialist referral") {
		flags.referral_specialist = Some(true);
		evidence.push("specialist referral".to_string());
	}

	flags
}

fn contains_word(text: &str, word: &str) -> bool {
	Regex::new(&format!(r"\b{}\b", regex::escape(word)))
		.map(|re| re.is_match(text))
		.unwrap_or(false)
}

fn find_u32(pattern: &str, text: &str) -> Option<(String, u32)> {
	let re = Regex::new(pattern).ok()?;
	let captures = re.captures(text)?;
	let span = captures.get(0)?.as_str().to_string();
	let value = captures.get(1)?.as_str().parse().ok()?;

	Some((span, value))
}

fn find_pair(pattern: &str, text: &str) -> Option<(String, (u32, u32))> {
	let re = Regex::new(pattern).ok()?;
	let captures = re.captures(text)?;
	let span = captures.get(0)?.as_str().to_string();
	let first = captures.get(1)?.as_str().parse().ok()?;
	let second = captures.get(2)?.as_str().parse().ok()?;

	Some((span, (first, second)))
}

fn default_true() -> bool {
	true
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_half_open_time_window() {
		let rule = parse_item_rule(
			"36",
			"Professional attendance lasting at least 20 minutes and less than 40 minutes",
			&RuleHints::default(),
		);

		assert_eq!(rule.time_window, Some(Interval::left_closed_right_open(20, 40)));
	}

	#[test]
	fn metadata_overrides_text_time_window() {
		let hints = RuleHints {
			duration_min_minutes: Some(10),
			duration_max_minutes: Some(25),
			duration_min_inclusive: Some(true),
			duration_max_inclusive: Some(false),
			..Default::default()
		};
		let rule = parse_item_rule("36", "attendance lasting at least 20 minutes", &hints);

		assert_eq!(rule.time_window, Some(Interval::left_closed_right_open(10, 25)));
	}

	#[test]
	fn parses_age_floor() {
		let rule =
			parse_item_rule("703", "Health assessment for a person aged 75 years or more", &RuleHints::default());
		let age = rule.age_range.expect("Expected an age range.");

		assert!(age.contains(75));
		assert!(!age.contains(74));
	}

	#[test]
	fn parses_settings_and_modalities() {
		let rule = parse_item_rule(
			"23",
			"Attendance at consulting rooms or hospital, by video conference",
			&RuleHints::default(),
		);
		let settings = rule.setting_allowed.expect("Expected settings.");
		let modalities = rule.modality_allowed.expect("Expected modalities.");

		assert!(settings.contains(&Setting::ConsultingRooms));
		assert!(settings.contains(&Setting::Hospital));
		assert!(modalities.contains(&Modality::Video));
		assert!(!modalities.contains(&Modality::InPerson));
	}

	#[test]
	fn modality_defaults_to_in_person() {
		let rule = parse_item_rule("23", "Professional attendance", &RuleHints::default());
		let modalities = rule.modality_allowed.expect("Expected modalities.");

		assert_eq!(modalities.iter().copied().collect::<Vec<_>>(), vec![Modality::InPerson]);
	}

	#[test]
	fn referral_is_true_or_absent_never_false() {
		let with = parse_item_rule("104", "Attendance following referral", &RuleHints::default());
		let without = parse_item_rule("23", "Professional attendance", &RuleHints::default());

		assert_eq!(with.referral_required, Some(true));
		assert_eq!(without.referral_required, None);
	}

	#[test]
	fn sequence_conditions_are_captured_not_enforced() {
		let rule = parse_item_rule(
			"92025",
			"Attendance before or after a comprehensive assessment under item 701, 703",
			&RuleHints::default(),
		);

		assert_eq!(rule.conditions.len(), 1);
		assert_eq!(rule.conditions[0].kind, ConditionKind::RelationRequired);
		assert!(rule.conditions[0].description.contains("item 701"));
	}

	#[test]
	fn case_conference_minimum_counts_the_claimant() {
		let rule = parse_item_rule(
			"735",
			"Multidisciplinary case conference with at least 2 other providers",
			&RuleHints::default(),
		);

		assert_eq!(rule.flags.case_conference, Some(true));
		assert_eq!(rule.flags.case_conference_min, Some(3));
	}

	#[test]
	fn parsing_is_idempotent() {
		let description = "Professional attendance at consulting rooms lasting at least 20 minutes \
			and less than 40 minutes for a patient aged 65 years or more, following referral";
		let first = parse_item_rule("36", description, &RuleHints::default());
		let second = parse_item_rule("36", description, &RuleHints::default());

		assert_eq!(format!("{first:?}"), format!("{second:?}"));
	}
}
