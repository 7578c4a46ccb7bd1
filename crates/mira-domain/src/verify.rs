use serde::{Deserialize, Serialize};

use crate::{
	category::{ItemCategory, categories_for},
	facts::{
		BODY_REGION_KEYWORDS, Modality, NoteFacts, REMOTE_CARE_KEYWORDS, ROLE_NOUNS, Setting,
		SURGERY_KEYWORDS, ULTRASOUND_KEYWORDS, VisitKind,
	},
	rules::{ItemRule, RuleVisit},
};

/// Tri-state outcome of a single check. SOFT expresses uncertainty without
/// blocking acceptance; only FAIL blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckOutcome {
	Pass,
	Soft(String),
	Fail(String),
}
impl CheckOutcome {
	pub fn is_fail(&self) -> bool {
		matches!(self, Self::Fail(_))
	}

	pub fn detail(&self) -> &str {
		match self {
			Self::Pass => "",
			Self::Soft(detail) | Self::Fail(detail) => detail,
		}
	}

	fn soft_info_missing(what: &str) -> Self {
		Self::Soft(format!("soft_info_missing: {what}"))
	}
}

/// Flattened check for the report. `pass` stays true for SOFT outcomes; the
/// tri-state reason lives in `details`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Check {
	pub name: String,
	pub pass: bool,
	pub details: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifyReport {
	pub item_code: String,
	pub passes: bool,
	pub checks: Vec<Check>,
	pub rationale_markdown: String,
	pub categories: Vec<ItemCategory>,
}
impl VerifyReport {
	pub fn has_soft(&self) -> bool {
		self.checks.iter().any(|check| check.pass && !check.details.is_empty())
	}
}

/// Run the full check table for one note against one rule. `display` is the
/// item title used by the keyword refinement gate.
pub fn verify(facts: &NoteFacts, rule: &ItemRule, display: &str) -> VerifyReport {
	let categories = categories_for(rule.group.as_deref(), rule.subgroup.as_deref());
	let outcomes = [
		("time_window", check_time_window(facts, rule)),
		("age", check_age(facts, rule)),
		("modality", check_modality(facts, rule)),
		("setting", check_setting(facts, rule)),
		("first_or_review", check_visit(facts, rule)),
		("referral", check_referral(facts, rule)),
		("specialty", check_specialty(facts, rule)),
		("conditions", check_conditions(rule)),
		("category_context", check_category_context(facts, &categories)),
		("case_conference", check_case_conference(facts, rule)),
		("usual_gp", check_usual_gp(facts, rule)),
		("home_only", check_home_only(facts, rule)),
		("referral_gp", check_referral_gp(facts, rule)),
		("referral_specialist", check_referral_specialist(facts, rule)),
		("keyword_refine", check_keyword_refine(facts, &categories, display)),
	];
	let passes = !outcomes.iter().any(|(_, outcome)| outcome.is_fail());
	let rationale_markdown = build_rationale(&rule.code, &outcomes);
	let checks = outcomes
		.into_iter()
		.map(|(name, outcome)| Check {
			name: name.to_string(),
			pass: !outcome.is_fail(),
			details: outcome.detail().to_string(),
		})
		.collect();

	VerifyReport { item_code: rule.code.clone(), passes, checks, rationale_markdown, categories }
}

fn check_time_window(facts: &NoteFacts, rule: &ItemRule) -> CheckOutcome {
	let Some(window) = rule.time_window else {
		return CheckOutcome::Pass;
	};
	let Some(noted) = facts.duration_interval() else {
		return CheckOutcome::soft_info_missing("duration not stated");
	};

	if window.contains_interval(&noted) {
		return CheckOutcome::Pass;
	}
	if window.overlaps(&noted) {
		return CheckOutcome::Soft(format!(
			"soft_pass_overlap: note duration {} only partially overlaps required {}",
			noted.describe(),
			window.describe()
		));
	}

	CheckOutcome::Fail(format!(
		"note duration {} is outside required {}",
		noted.describe(),
		window.describe()
	))
}

fn check_age(facts: &NoteFacts, rule: &ItemRule) -> CheckOutcome {
	let Some(range) = rule.age_range else {
		return CheckOutcome::Pass;
	};
	let Some(age) = facts.age else {
		return CheckOutcome::soft_info_missing("age not stated");
	};

	if range.contains(age) {
		CheckOutcome::Pass
	} else {
		CheckOutcome::Fail(format!("age {age} is outside required {}", range.describe()))
	}
}

fn check_modality(facts: &NoteFacts, rule: &ItemRule) -> CheckOutcome {
	let Some(allowed) = rule.modality_allowed.as_ref() else {
		return CheckOutcome::Pass;
	};
	let effective = facts.modality.unwrap_or(Modality::InPerson);

	if allowed.contains(&effective) {
		return CheckOutcome::Pass;
	}

	// A clear conflict only exists when the rule is in-person exclusive and
	// the note carries positive telehealth evidence. The in-person default is
	// weak evidence, so the reverse direction stays SOFT.
	let in_person_only = allowed.len() == 1 && allowed.contains(&Modality::InPerson);

	if in_person_only && matches!(effective, Modality::Video | Modality::Phone) {
		return CheckOutcome::Fail(format!(
			"rule requires in-person attendance but note indicates {effective:?}"
		));
	}
	if allowed.contains(&Modality::Video) && !allowed.contains(&Modality::InPerson) {
		return CheckOutcome::Soft("telehealth not mentioned in note".to_string());
	}
	if allowed.contains(&Modality::Phone) && !allowed.contains(&Modality::InPerson) {
		return CheckOutcome::Soft("telephone not mentioned in note".to_string());
	}

	CheckOutcome::Soft("modality not specified".to_string())
}

fn check_setting(facts: &NoteFacts, rule: &ItemRule) -> CheckOutcome {
	let Some(allowed) = rule.setting_allowed.as_ref() else {
		return CheckOutcome::Pass;
	};
	let required = allowed.iter().map(|s| format!("{s:?}")).collect::<Vec<_>>().join(", ");

	match facts.setting {
		None | Some(Setting::Other) => {
			let premises_required = allowed.contains(&Setting::Hospital)
				|| allowed.contains(&Setting::ConsultingRooms);
			let remote_evidence =
				REMOTE_CARE_KEYWORDS.iter().any(|keyword| facts.has_keyword(keyword));

			if premises_required && remote_evidence {
				CheckOutcome::Fail(format!(
					"note carries remote or home care evidence but rule requires {required}"
				))
			} else {
				CheckOutcome::Soft(format!("setting not stated; rule requires {required}"))
			}
		},
		Some(setting) if allowed.contains(&setting) => CheckOutcome::Pass,
		Some(setting @ (Setting::Hospital | Setting::ConsultingRooms)) => CheckOutcome::Fail(
			format!("note indicates {setting:?} but rule requires {required}"),
		),
		Some(setting) => {
			CheckOutcome::Soft(format!("note indicates {setting:?}; rule requires {required}"))
		},
	}
}

fn check_visit(facts: &NoteFacts, rule: &ItemRule) -> CheckOutcome {
	let required = match rule.first_or_review {
		None | Some(RuleVisit::Either) => return CheckOutcome::Pass,
		Some(RuleVisit::First) => VisitKind::First,
		Some(RuleVisit::Review) => VisitKind::Review,
	};
	let Some(noted) = facts.first_or_review else {
		return CheckOutcome::soft_info_missing("first or review attendance not stated");
	};

	if noted == required {
		CheckOutcome::Pass
	} else {
		CheckOutcome::Fail(format!("rule requires {required:?} attendance but note is {noted:?}"))
	}
}

fn check_referral(facts: &NoteFacts, rule: &ItemRule) -> CheckOutcome {
	if rule.referral_required != Some(true) {
		return CheckOutcome::Pass;
	}

	match facts.referral_present {
		None => CheckOutcome::soft_info_missing("referral not mentioned"),
		Some(false) => CheckOutcome::Fail("referral required but note indicates none".to_string()),
		Some(true) => CheckOutcome::Pass,
	}
}

fn check_specialty(facts: &NoteFacts, rule: &ItemRule) -> CheckOutcome {
	let Some(required) = rule.specialty_required.as_deref() else {
		return CheckOutcome::Pass;
	};
	let Some(noted) = facts.specialty.as_deref() else {
		return CheckOutcome::soft_info_missing("specialty not stated");
	};

	if noted.eq_ignore_ascii_case(required) {
		CheckOutcome::Pass
	} else {
		CheckOutcome::Fail(format!("rule requires specialty {required} but note indicates {noted}"))
	}
}

fn check_conditions(rule: &ItemRule) -> CheckOutcome {
	if rule.conditions.is_empty() {
		return CheckOutcome::Pass;
	}

	let descriptions = rule
		.conditions
		.iter()
		.map(|condition| condition.description.as_str())
		.collect::<Vec<_>>()
		.join("; ");

	CheckOutcome::Soft(format!("sequence relation not verifiable from note: {descriptions}"))
}

fn check_category_context(facts: &NoteFacts, categories: &[ItemCategory]) -> CheckOutcome {
	let mut soft = None;

	for (category, noted, role) in [
		(ItemCategory::Gp, facts.is_gp, "gp"),
		(ItemCategory::Specialist, facts.is_specialist, "specialist"),
		(ItemCategory::Emergency, facts.is_emergency, "emergency"),
	] {
		if !categories.contains(&category) {
			continue;
		}

		match noted {
			None =>
				soft = Some(CheckOutcome::soft_info_missing(&format!("{role} context unknown"))),
			Some(false) => {
				return CheckOutcome::Fail(format!(
					"item is {role}-specific but note context conflicts"
				));
			},
			Some(true) => {},
		}
	}

	soft.unwrap_or(CheckOutcome::Pass)
}

fn check_case_conference(facts: &NoteFacts, rule: &ItemRule) -> CheckOutcome {
	if rule.flags.case_conference != Some(true) {
		return CheckOutcome::Pass;
	}

	let evidenced = ["conference", "team", "multidisciplinary"]
		.iter()
		.any(|keyword| facts.has_keyword(keyword));

	if !evidenced {
		return CheckOutcome::soft_info_missing("case conference not mentioned");
	}

	if let Some(minimum) = rule.flags.case_conference_min {
		let participants =
			ROLE_NOUNS.iter().copied().filter(|role| facts.has_keyword(role)).count() as u32;

		if participants < minimum {
			return CheckOutcome::Soft(format!(
				"conference mentioned but only {participants} participants evidenced, rule requires {minimum}"
			));
		}
	}

	CheckOutcome::Pass
}

fn check_usual_gp(facts: &NoteFacts, rule: &ItemRule) -> CheckOutcome {
	if rule.flags.usual_gp_required != Some(true) {
		return CheckOutcome::Pass;
	}
	if facts.has_keyword("usual gp") {
		return CheckOutcome::Pass;
	}
	if facts.is_specialist == Some(true) {
		return CheckOutcome::Fail(
			"usual gp required but note indicates specialist care".to_string(),
		);
	}

	CheckOutcome::soft_info_missing("usual gp not mentioned")
}

fn check_home_only(facts: &NoteFacts, rule: &ItemRule) -> CheckOutcome {
	if rule.flags.home_only != Some(true) {
		return CheckOutcome::Pass;
	}
	if facts.setting == Some(Setting::Home) || facts.has_keyword("home visit") {
		return CheckOutcome::Pass;
	}
	if let Some(
		setting @ (Setting::Hospital | Setting::ConsultingRooms | Setting::ResidentialCare),
	) = facts.setting
	{
		return CheckOutcome::Fail(format!(
			"home attendance required but note indicates {setting:?}"
		));
	}

	CheckOutcome::soft_info_missing("home attendance not mentioned")
}

fn check_referral_gp(facts: &NoteFacts, rule: &ItemRule) -> CheckOutcome {
	if rule.flags.referral_gp != Some(true) {
		return CheckOutcome::Pass;
	}
	if facts.referral_present == Some(false) {
		return CheckOutcome::Fail("gp referral required but note indicates none".to_string());
	}
	if facts.has_keyword("gp referral") || facts.has_keyword("referring practitioner") {
		return CheckOutcome::Pass;
	}

	CheckOutcome::soft_info_missing("gp referral not evidenced")
}

fn check_referral_specialist(facts: &NoteFacts, rule: &ItemRule) -> CheckOutcome {
	if rule.flags.referral_specialist != Some(true) {
		return CheckOutcome::Pass;
	}
	if facts.referral_present == Some(false) {
		return CheckOutcome::Fail(
			"specialist referral required but note indicates none".to_string(),
		);
	}
	if facts.has_keyword("specialist referral") {
		return CheckOutcome::Pass;
	}

	CheckOutcome::soft_info_missing("specialist referral not evidenced")
}

fn check_keyword_refine(
	facts: &NoteFacts,
	categories: &[ItemCategory],
	display: &str,
) -> CheckOutcome {
	let title = display.to_lowercase();
	let mentions_ct = title.split(|c: char| !c.is_ascii_alphanumeric()).any(|token| token == "ct");

	if categories.contains(&ItemCategory::Surgery)
		&& !SURGERY_KEYWORDS.iter().any(|keyword| facts.has_keyword(keyword))
	{
		return CheckOutcome::Soft("surgery or anaesthesia not mentioned in note".to_string());
	}
	if mentions_ct && title.contains("contrast") && !facts.has_keyword("contrast") {
		return CheckOutcome::Soft("contrast not mentioned in note".to_string());
	}
	if mentions_ct
		&& !title.contains("contrast")
		&& BODY_REGION_KEYWORDS.iter().any(|keyword| facts.has_keyword(keyword))
	{
		return CheckOutcome::Pass;
	}
	if title.contains("ultrasound")
		&& !ULTRASOUND_KEYWORDS.iter().any(|keyword| facts.has_keyword(keyword))
	{
		return CheckOutcome::Soft("ultrasound not mentioned in note".to_string());
	}

	CheckOutcome::Pass
}

fn build_rationale(code: &str, outcomes: &[(&str, CheckOutcome)]) -> String {
	let any_fail = outcomes.iter().any(|(_, outcome)| outcome.is_fail());
	let any_soft = outcomes.iter().any(|(_, outcome)| matches!(outcome, CheckOutcome::Soft(_)));
	let emoji = if any_fail {
		"❌"
	} else if any_soft {
		"⚠️"
	} else {
		"✅"
	};
	let mut rationale = format!("## Item {code} {emoji}\n");

	if !any_fail && !any_soft {
		rationale.push_str("All checks passed.\n");

		return rationale;
	}

	for (name, outcome) in outcomes {
		match outcome {
			CheckOutcome::Pass => {},
			CheckOutcome::Soft(detail) => {
				rationale.push_str(&format!("- ⚠️ **{name}**: {detail}\n"));
			},
			CheckOutcome::Fail(detail) => {
				rationale.push_str(&format!("- ❌ **{name}**: {detail}\n"));
			},
		}
	}

	rationale
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeSet;

	use super::*;
	use crate::{
		facts::extract_heuristic,
		interval::Interval,
		rules::{ItemFlags, RuleHints, parse_item_rule},
	};

	fn bare_rule(code: &str) -> ItemRule {
		parse_item_rule(code, "", &RuleHints::default())
	}

	#[test]
	fn report_passes_iff_no_check_fails() {
		let facts = extract_heuristic("telehealth video consult, 30 min");
		let mut rule = bare_rule("23");

		rule.modality_allowed = Some(BTreeSet::from([Modality::InPerson]));

		let report = verify(&facts, &rule, "Professional attendance");
		let modality = report
			.checks
			.iter()
			.find(|check| check.name == "modality")
			.expect("Expected a modality check.");

		assert!(!modality.pass);
		assert!(!report.passes);
	}

	#[test]
	fn soft_checks_keep_pass_true_with_details() {
		let facts = extract_heuristic("face to face clinic visit, 30 minutes, gp");
		let mut rule = bare_rule("91800");

		rule.modality_allowed = Some(BTreeSet::from([Modality::Video]));

		let report = verify(&facts, &rule, "Telehealth attendance");
		let modality = report
			.checks
			.iter()
			.find(|check| check.name == "modality")
			.expect("Expected a modality check.");

		assert!(modality.pass);
		assert_eq!(modality.details, "telehealth not mentioned in note");
		assert!(report.passes);
	}

	#[test]
	fn missing_time_window_always_passes() {
		let facts = extract_heuristic("marathon consult, 500 minutes");
		let rule = bare_rule("23");

		let report = verify(&facts, &rule, "Attendance");
		let time = report
			.checks
			.iter()
			.find(|check| check.name == "time_window")
			.expect("Expected a time window check.");

		assert!(time.pass);
		assert!(time.details.is_empty());
	}

	#[test]
	fn disjoint_duration_fails() {
		let facts = extract_heuristic("consult lasted 18 minutes");
		let mut rule = bare_rule("36");

		rule.time_window = Some(Interval::left_closed_right_open(20, 40));

		let report = verify(&facts, &rule, "Attendance");

		assert!(!report.passes);
	}

	#[test]
	fn overlapping_duration_is_soft() {
		let facts = extract_heuristic("consult 19-22 minutes");
		let mut rule = bare_rule("36");

		rule.time_window = Some(Interval::left_closed_right_open(20, 40));

		let report = verify(&facts, &rule, "Attendance");
		let time = report
			.checks
			.iter()
			.find(|check| check.name == "time_window")
			.expect("Expected a time window check.");

		assert!(report.passes);
		assert!(time.details.starts_with("soft_pass_overlap"));
	}

	#[test]
	fn surgery_item_without_surgical_keywords_is_soft() {
		let facts = extract_heuristic("follow-up chest pain, 20 min");
		let mut rule = bare_rule("30071");

		rule.group = Some("T8".to_string());

		let report = verify(&facts, &rule, "Excision of lesion");
		let refine = report
			.checks
			.iter()
			.find(|check| check.name == "keyword_refine")
			.expect("Expected a keyword refine check.");

		assert!(report.passes);
		assert!(refine.pass);
		assert_eq!(refine.details, "surgery or anaesthesia not mentioned in note");
	}

	#[test]
	fn case_conference_counts_role_nouns() {
		let facts = extract_heuristic(
			"multidisciplinary case conference with nurse, physiotherapist and dietitian",
		);
		let mut rule = bare_rule("735");

		rule.flags = ItemFlags {
			case_conference: Some(true),
			case_conference_min: Some(3),
			..Default::default()
		};

		let report = verify(&facts, &rule, "Case conference");
		let conference = report
			.checks
			.iter()
			.find(|check| check.name == "case_conference")
			.expect("Expected a case conference check.");

		assert!(conference.pass);
		assert!(conference.details.is_empty());
	}

	#[test]
	fn rationale_lists_only_non_pass_checks() {
		let facts = extract_heuristic("consult 19-22 minutes at the clinic, gp review");
		let mut rule = bare_rule("36");

		rule.time_window = Some(Interval::left_closed_right_open(20, 40));

		let report = verify(&facts, &rule, "Attendance");

		assert!(report.rationale_markdown.starts_with("## Item 36"));
		assert!(report.rationale_markdown.contains("soft_pass_overlap"));
		assert!(!report.rationale_markdown.contains("**setting**"));
	}

	#[test]
	fn full_pass_rationale_is_a_single_line() {
		let facts = extract_heuristic(
			"35 y/o, exactly 25 minutes, face to face at the clinic, gp review, referred",
		);
		let rule = bare_rule("23");
		let report = verify(&facts, &rule, "Professional attendance");

		assert!(report.passes);
		assert!(report.rationale_markdown.contains("All checks passed."));
	}

	#[test]
	fn deterministic_verification_is_bit_identical() {
		let facts = extract_heuristic("consult lasted exactly 25 minutes, in person, 35 y/o");
		let rule = parse_item_rule(
			"36",
			"Attendance lasting at least 20 minutes and less than 40 minutes",
			&RuleHints::default(),
		);
		let first = verify(&facts, &rule, "Attendance");
		let second = verify(&facts, &rule, "Attendance");

		assert_eq!(format!("{first:?}"), format!("{second:?}"));
	}
}
