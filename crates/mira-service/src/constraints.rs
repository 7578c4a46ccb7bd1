//! The inline constraint DSL: a `#constraints` line in a retrieval query
//! followed by whitespace-separated `+key:value` / `-key:value` tokens.
//! Structured keys compile into the metadata prefilter; unknown keys are kept
//! and still reach the LLM context verbatim.

use mira_domain::{Interval, Modality, NoteFacts, Setting, VisitKind};
use mira_storage::{CatalogFilter, DurationFilter};

pub const CONSTRAINTS_MARKER: &str = "#constraints";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Constraint {
	pub key: String,
	pub value: String,
}
impl Constraint {
	pub fn parse(token: &str) -> Option<Self> {
		let (key, value) = token.split_once(':')?;

		if key.is_empty() || value.is_empty() {
			return None;
		}

		Some(Self { key: key.to_lowercase(), value: value.to_lowercase() })
	}

	pub fn token(&self) -> String {
		format!("{}:{}", self.key, self.value)
	}
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstraintSet {
	pub must: Vec<Constraint>,
	pub must_not: Vec<Constraint>,
}
impl ConstraintSet {
	pub fn is_empty(&self) -> bool {
		self.must.is_empty() && self.must_not.is_empty()
	}

	pub fn push_must(&mut self, token: &str) {
		if let Some(constraint) = Constraint::parse(token)
			&& !self.must.contains(&constraint)
		{
			self.must.push(constraint);
		}
	}

	pub fn push_must_not(&mut self, token: &str) {
		if let Some(constraint) = Constraint::parse(token)
			&& !self.must_not.contains(&constraint)
		{
			self.must_not.push(constraint);
		}
	}

	/// Codes excluded by `-code:X` tokens.
	pub fn banned_codes(&self) -> Vec<String> {
		self.must_not
			.iter()
			.filter(|constraint| constraint.key == "code")
			.map(|constraint| constraint.value.clone())
			.collect()
	}

	/// Compile the structured `must` keys into a metadata prefilter. Unknown
	/// keys do not filter.
	pub fn compile_filter(&self) -> CatalogFilter {
		let mut filter = CatalogFilter::default();

		for constraint in &self.must {
			match constraint.key.as_str() {
				"code" => filter.codes.push(constraint.value.clone()),
				"group" => filter.groups.push(constraint.value.to_uppercase()),
				"subgroup" => filter.subgroups.push(constraint.value.clone()),
				"duration" =>
					if filter.duration.is_none() {
						filter.duration = parse_duration_bucket(&constraint.value);
					},
				_ => {},
			}
		}

		filter
	}

	/// Render the `#constraints` block, or `None` when there is nothing to say.
	pub fn format_block(&self) -> Option<String> {
		if self.is_empty() {
			return None;
		}

		let mut tokens = Vec::with_capacity(self.must.len() + self.must_not.len());

		for constraint in &self.must {
			tokens.push(format!("+{}", constraint.token()));
		}
		for constraint in &self.must_not {
			tokens.push(format!("-{}", constraint.token()));
		}

		Some(format!("{CONSTRAINTS_MARKER}\n{}", tokens.join(" ")))
	}
}

/// Split a raw retrieval query into the clean semantic part and its inline
/// constraints.
pub fn split_query(raw: &str) -> (String, ConstraintSet) {
	let mut clean_lines = Vec::new();
	let mut constraints = ConstraintSet::default();
	let mut in_block = false;

	for line in raw.lines() {
		if line.trim().eq_ignore_ascii_case(CONSTRAINTS_MARKER) {
			in_block = true;

			continue;
		}
		if !in_block {
			clean_lines.push(line);

			continue;
		}

		for token in line.split_whitespace() {
			if let Some(rest) = token.strip_prefix('+') {
				constraints.push_must(rest);
			} else if let Some(rest) = token.strip_prefix('-') {
				constraints.push_must_not(rest);
			}
		}
	}

	(clean_lines.join("\n").trim().to_string(), constraints)
}

/// Duration buckets: `<N`, `>=N`, `A-B`.
pub fn parse_duration_bucket(value: &str) -> Option<DurationFilter> {
	if let Some(rest) = value.strip_prefix(">=") {
		return rest.trim().parse().ok().map(DurationFilter::AtLeast);
	}
	if let Some(rest) = value.strip_prefix('<') {
		return rest.trim().parse().ok().map(DurationFilter::LessThan);
	}
	if let Some((min, max)) = value.split_once('-') {
		let min = min.trim().parse().ok()?;
		let max = max.trim().parse().ok()?;

		return Some(DurationFilter::Between(min, max));
	}

	None
}

/// Bucket token for a note's duration interval, in the same syntax the DSL
/// parses back.
pub fn duration_bucket_token(interval: &Interval) -> Option<String> {
	match (interval.min, interval.max) {
		(Some(min), Some(max)) => Some(format!("{min}-{max}")),
		(Some(min), None) => Some(format!(">={min}")),
		(None, Some(max)) => Some(format!("<{max}")),
		(None, None) => None,
	}
}

/// Whether a duration bucket accepts the midpoint of a candidate interval.
pub fn bucket_accepts(bucket: DurationFilter, interval: Option<&Interval>) -> bool {
	let Some(midpoint) = interval.and_then(Interval::midpoint) else {
		return false;
	};

	match bucket {
		DurationFilter::LessThan(minutes) => midpoint < minutes,
		DurationFilter::AtLeast(minutes) => midpoint >= minutes,
		DurationFilter::Between(min, max) => midpoint >= min && midpoint <= max,
	}
}

/// Advisory constraints the reflector derives from the facts themselves:
/// duration bucket, modality, and setting.
pub fn key_constraints(facts: &NoteFacts) -> Vec<String> {
	let mut tokens = Vec::new();

	if let Some(bucket) = facts.duration_interval().as_ref().and_then(duration_bucket_token) {
		tokens.push(format!("duration:{bucket}"));
	}
	if let Some(modality) = facts.modality {
		tokens.push(format!("modality:{}", modality_token(modality)));
	}
	if let Some(setting) = facts.setting.filter(|setting| *setting != Setting::Other) {
		tokens.push(format!("setting:{}", setting_token(setting)));
	}

	tokens
}

/// The critic's `must` set: the reflector's key constraints plus specialty
/// and visit type.
pub fn critic_constraints(facts: &NoteFacts) -> Vec<String> {
	let mut tokens = key_constraints(facts);

	if let Some(specialty) = facts.specialty.as_deref() {
		tokens.push(format!("specialty:{specialty}"));
	}
	if let Some(visit) = facts.first_or_review {
		let value = match visit {
			VisitKind::First => "first",
			VisitKind::Review => "review",
		};

		tokens.push(format!("visit:{value}"));
	}

	tokens
}

fn modality_token(modality: Modality) -> &'static str {
	match modality {
		Modality::InPerson => "in_person",
		Modality::Video => "video",
		Modality::Phone => "phone",
	}
}

fn setting_token(setting: Setting) -> &'static str {
	match setting {
		Setting::ConsultingRooms => "consulting_rooms",
		Setting::Hospital => "hospital",
		Setting::ResidentialCare => "residential_care",
		Setting::Home => "home",
		Setting::Other => "other",
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn splits_query_and_constraint_block() {
		let raw = "long gp consult about chest pain\n#constraints\n+duration:>=20 +group:a1 -code:36";
		let (clean, constraints) = split_query(raw);

		assert_eq!(clean, "long gp consult about chest pain");
		assert_eq!(constraints.must.len(), 2);
		assert_eq!(constraints.must_not.len(), 1);
		assert_eq!(constraints.banned_codes(), vec!["36".to_string()]);
	}

	#[test]
	fn query_without_block_has_no_constraints() {
		let (clean, constraints) = split_query("plain query");

		assert_eq!(clean, "plain query");
		assert!(constraints.is_empty());
	}

	#[test]
	fn unknown_keys_survive_but_do_not_filter() {
		let (_, constraints) = split_query("q\n#constraints\n+vibe:good +group:a1");
		let filter = constraints.compile_filter();

		assert_eq!(constraints.must.len(), 2);
		assert_eq!(filter.groups, vec!["A1".to_string()]);
		assert!(filter.codes.is_empty());
	}

	#[test]
	fn duration_buckets_parse_all_shapes() {
		assert_eq!(parse_duration_bucket("<20"), Some(DurationFilter::LessThan(20)));
		assert_eq!(parse_duration_bucket(">=40"), Some(DurationFilter::AtLeast(40)));
		assert_eq!(parse_duration_bucket("20-40"), Some(DurationFilter::Between(20, 40)));
		assert_eq!(parse_duration_bucket("soon"), None);
	}

	#[test]
	fn bucket_acceptance_uses_the_midpoint() {
		let interval = Interval::closed(20, 40);

		assert!(bucket_accepts(DurationFilter::Between(20, 40), Some(&interval)));
		assert!(bucket_accepts(DurationFilter::AtLeast(25), Some(&interval)));
		assert!(!bucket_accepts(DurationFilter::LessThan(20), Some(&interval)));
		assert!(!bucket_accepts(DurationFilter::AtLeast(25), None));
	}

	#[test]
	fn format_block_round_trips() {
		let (_, constraints) = split_query("q\n#constraints\n+duration:>=20 -code:36");
		let block = constraints.format_block().expect("Expected a block.");
		let (_, reparsed) = split_query(&format!("q\n{block}"));

		assert_eq!(constraints, reparsed);
	}
}
