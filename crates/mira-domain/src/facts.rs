use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::interval::Interval;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
	InPerson,
	Video,
	Phone,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Setting {
	ConsultingRooms,
	Hospital,
	ResidentialCare,
	Home,
	Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitKind {
	First,
	Review,
}

/// Structured facts extracted from a clinical note. Every field is nullable;
/// `None` means the note did not state it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteFacts {
	pub duration_min: Option<u32>,
	pub duration_max: Option<u32>,
	pub duration_min_inclusive: Option<bool>,
	pub duration_max_inclusive: Option<bool>,
	pub age: Option<u32>,
	pub modality: Option<Modality>,
	pub setting: Option<Setting>,
	pub first_or_review: Option<VisitKind>,
	pub referral_present: Option<bool>,
	pub specialty: Option<String>,
	pub is_gp: Option<bool>,
	pub is_specialist: Option<bool>,
	pub is_emergency: Option<bool>,
	#[serde(default)]
	pub keywords: Vec<String>,
}
impl NoteFacts {
	pub fn duration_interval(&self) -> Option<Interval> {
		if self.duration_min.is_none() && self.duration_max.is_none() {
			return None;
		}

		Some(Interval {
			min: self.duration_min,
			max: self.duration_max,
			left_closed: self.duration_min_inclusive.unwrap_or(true),
			right_closed: self.duration_max_inclusive.unwrap_or(true),
		})
	}

	/// Whether the LLM completion pass should run: any of the core fields the
	/// verifier leans on is still unknown after heuristics.
	pub fn needs_completion(&self) -> bool {
		self.duration_min.is_none()
			|| self.modality.is_none()
			|| self.setting.is_none()
			|| self.age.is_none()
			|| (self.duration_min.is_some() && self.duration_min_inclusive.is_none())
			|| (self.duration_max.is_some() && self.duration_max_inclusive.is_none())
	}

	pub fn has_keyword(&self, keyword: &str) -> bool {
		self.keywords.iter().any(|entry| entry == keyword)
	}

	fn push_keyword(&mut self, keyword: &str) {
		if !self.has_keyword(keyword) {
			self.keywords.push(keyword.to_string());
		}
	}
}

/// Role nouns counted as case-conference participants.
pub const ROLE_NOUNS: &[&str] = &[
	"nurse",
	"physiotherapist",
	"psychologist",
	"dietitian",
	"pharmacist",
	"podiatrist",
	"occupational therapist",
	"social worker",
	"speech pathologist",
];

pub const SURGERY_KEYWORDS: &[&str] =
	&["surgery", "surgical", "operation", "anaesthesia", "anaesthetic", "procedure"];

pub const ULTRASOUND_KEYWORDS: &[&str] = &["ultrasound", "doppler", "sonogram"];

pub const BODY_REGION_KEYWORDS: &[&str] =
	&["chest", "abdomen", "head", "neck", "pelvis", "spine", "knee", "shoulder"];

/// Keywords treated as remote or home-care evidence by the setting check.
pub const REMOTE_CARE_KEYWORDS: &[&str] = &["telehealth", "video", "phone", "remote", "home visit"];

const SPECIALIST_WORDS: &[&str] = &[
	"specialist",
	"consultant",
	"surgeon",
	"physician",
	"cardiologist",
	"neurologist",
	"psychiatrist",
	"dermatologist",
	"oncologist",
	"gastroenterologist",
];

const GP_PHRASES: &[&str] = &["general practitioner", "family doctor", "gp"];

const SPECIALTY_TABLE: &[(&str, &str)] = &[
	("sexual health", "sexual health medicine"),
	("cardiolog", "cardiology"),
	("dermatolog", "dermatology"),
	("psychiatr", "psychiatry"),
	("paediatric", "paediatrics"),
	("geriatric", "geriatric medicine"),
	("general practitioner", "gp"),
];

/// Phrase → evidence token table for the keywords bag. Multi-word phrases are
/// substring matches; single words require word boundaries.
const KEYWORD_TABLE: &[(&str, &str)] = &[
	("case conference", "conference"),
	("conference", "conference"),
	("multidisciplinary", "multidisciplinary"),
	("team", "team"),
	("usual gp", "usual gp"),
	("usual medical practitioner", "usual gp"),
	("home visit", "home visit"),
	("gp referral", "gp referral"),
	("referring practitioner", "referring practitioner"),
	("specialist referral", "specialist referral"),
	("referral", "referral"),
	("referred", "referral"),
	("telehealth", "telehealth"),
	("video", "video"),
	("phone", "phone"),
	("telephone", "phone"),
	("remote", "remote"),
	("surgery", "surgery"),
	("surgical", "surgical"),
	("operation", "operation"),
	("anaesthesia", "anaesthesia"),
	("anaesthetic", "anaesthetic"),
	("procedure", "procedure"),
	("contrast", "contrast"),
	("ultrasound", "ultrasound"),
	("doppler", "doppler"),
	("sonogram", "sonogram"),
	("chest", "chest"),
	("abdomen", "abdomen"),
	("head", "head"),
	("neck", "neck"),
	("pelvis", "pelvis"),
	("spine", "spine"),
	("knee", "knee"),
	("shoulder", "shoulder"),
	("nurse", "nurse"),
	("physiotherapist", "physiotherapist"),
	("psychologist", "psychologist"),
	("dietitian", "dietitian"),
	("pharmacist", "pharmacist"),
	("podiatrist", "podiatrist"),
	("occupational therapist", "occupational therapist"),
	("social worker", "social worker"),
	("speech pathologist", "speech pathologist"),
];

/// Deterministic pre-pass over the note text. The LLM completion step only
/// fills fields this pass leaves as `None`.
pub fn extract_heuristic(note: &str) -> NoteFacts {
	let text = note.to_lowercase();
	let mut facts = NoteFacts::default();

	apply_duration(&text, &mut facts);

	facts.age = parse_age(&text);
	facts.modality = detect_modality(&text);
	facts.setting = detect_setting(&text);
	facts.first_or_review = detect_visit(&text);
	facts.referral_present = detect_referral(&text);
	facts.specialty = detect_specialty(&text);

	detect_context(&text, &mut facts);
	collect_keywords(&text, &mut facts);

	facts
}

fn set_duration(facts: &mut NoteFacts, interval: Interval) {
	facts.duration_min = interval.min;
	facts.duration_max = interval.max;
	facts.duration_min_inclusive = interval.min.map(|_| interval.left_closed);
	facts.duration_max_inclusive = interval.max.map(|_| interval.right_closed);
}

/// The duration ladder. Earlier rungs win; the bare "N min" fallback is safe
/// last because any modifier routes the text through an earlier rung.
fn apply_duration(text: &str, facts: &mut NoteFacts) {
	if let Some(value) = capture_u32(r"(?:exactly|precisely)\s+(\d+)\s*min(?:ute)?s?\b", text) {
		return set_duration(facts, Interval::closed(value, value));
	}
	if let Some((min, max)) = capture_pair(
		r"at least\s+(\d+)\s*(?:min(?:ute)?s?\s*)?(?:and|but)\s+less than\s+(\d+)\s*min(?:ute)?s?\b",
		text,
	) {
		return set_duration(facts, Interval::left_closed_right_open(min, max));
	}
	if let Some((min, max)) =
		capture_pair(r"(\d+)\s*(?:-|–|to)\s*(\d+)\s*min(?:ute)?s?\b", text)
	{
		return set_duration(facts, Interval::closed(min, max));
	}
	if let Some(value) = capture_u32(r"(?:at least|>=|≥)\s*(\d+)\s*min(?:ute)?s?\b", text) {
		return set_duration(facts, Interval::at_least(value));
	}
	if let Some(value) = capture_u32(r"(?:more than|over|>)\s*(\d+)\s*min(?:ute)?s?\b", text) {
		return set_duration(facts, Interval::more_than(value));
	}
	if let Some(value) = capture_u32(r"(?:less than|under|<)\s*(\d+)\s*min(?:ute)?s?\b", text) {
		// Deliberate widening: "less than N" reads as [max(0, N-1), N) so a
		// borderline note still overlaps neighbouring time windows.
		let min = value.saturating_sub(1);

		return set_duration(facts, Interval::left_closed_right_open(min, value));
	}
	if let Some(value) = capture_u32(r"(\d+)\s*\+\s*min(?:ute)?s?\b", text) {
		return set_duration(facts, Interval::at_least(value));
	}
	if let Some(value) = capture_u32(r"(\d+)\s*min(?:ute)?s?\b", text) {
		set_duration(facts, Interval::closed(value, value));
	}
}

fn parse_age(text: &str) -> Option<u32> {
	capture_u32(r"\baged?\s*[:=]?\s*(\d+)\b", text)
		.or_else(|| capture_u32(r"\b(\d+)\s*(?:years?\s+old\b|y/o\b|y\.o\.|yo\b)", text))
		.or_else(|| capture_u32(r"\b(\d+)\s*yrs?\b", text))
}

fn detect_modality(text: &str) -> Option<Modality> {
	if ["video", "zoom", "virtual", "webex", "teams"].iter().any(|word| has_word(text, word)) {
		return Some(Modality::Video);
	}
	if ["telephone", "phone", "call"].iter().any(|word| has_word(text, word)) {
		return Some(Modality::Phone);
	}
	if has_word(text, "telehealth") {
		return Some(Modality::Video);
	}
	if text.contains("in person")
		|| text.contains("in-person")
		|| text.contains("face to face")
		|| text.contains("face-to-face")
		|| has_word(text, "f2f")
	{
		return Some(Modality::InPerson);
	}

	None
}

fn detect_setting(text: &str) -> Option<Setting> {
	if ["hospital", "inpatient", "ward", "admitted"].iter().any(|word| has_word(text, word))
		|| text.contains("in-patient")
	{
		return Some(Setting::Hospital);
	}
	if text.contains("residential aged care")
		|| text.contains("residential care")
		|| text.contains("nursing home")
		|| text.contains("aged care facility")
		|| has_word(text, "racf")
	{
		return Some(Setting::ResidentialCare);
	}
	if text.contains("consulting room") || has_word(text, "clinic") {
		return Some(Setting::ConsultingRooms);
	}
	if text.contains("home visit") || text.contains("at home") || text.contains("patient's home") {
		return Some(Setting::Home);
	}

	None
}

fn detect_visit(text: &str) -> Option<VisitKind> {
	if text.contains("first attendance")
		|| text.contains("initial consultation")
		|| text.contains("initial assessment")
		|| text.contains("new patient")
	{
		return Some(VisitKind::First);
	}
	if has_word(text, "review") || text.contains("follow-up") || text.contains("follow up") {
		return Some(VisitKind::Review);
	}

	None
}

fn detect_referral(text: &str) -> Option<bool> {
	if text.contains("no referral")
		|| text.contains("without referral")
		|| text.contains("without a referral")
	{
		return Some(false);
	}
	if Regex::new(r"\breferr(?:al|ed|ing)\b").map(|re| re.is_match(text)).unwrap_or(false) {
		return Some(true);
	}

	None
}

fn detect_specialty(text: &str) -> Option<String> {
	for (needle, normalized) in SPECIALTY_TABLE {
		if text.contains(needle) {
			return Some((*normalized).to_string());
		}
	}

	None
}

fn detect_context(text: &str, facts: &mut NoteFacts) {
	let specialist = SPECIALIST_WORDS.iter().any(|word| has_word(text, word));
	let gp = GP_PHRASES.iter().any(|phrase| {
		if phrase.contains(' ') { text.contains(phrase) } else { has_word(text, phrase) }
	});

	// Specialist language wins over GP language.
	if specialist {
		facts.is_specialist = Some(true);
		facts.is_gp = Some(false);
	} else if gp {
		facts.is_gp = Some(true);
		facts.is_specialist = Some(false);
	}

	if ["emergency", "urgent", "triage", "resuscitation"].iter().any(|word| has_word(text, word)) {
		facts.is_emergency = Some(true);
	} else if ["routine", "elective"].iter().any(|word| has_word(text, word)) {
		facts.is_emergency = Some(false);
	}
}

fn collect_keywords(text: &str, facts: &mut NoteFacts) {
	for (phrase, token) in KEYWORD_TABLE {
		let matched = if phrase.contains(' ') { text.contains(phrase) } else { has_word(text, phrase) };

		if matched {
			facts.push_keyword(token);
		}
	}
}

fn has_word(text: &str, word: &str) -> bool {
	Regex::new(&format!(r"\b{}\b", regex::escape(word)))
		.map(|re| re.is_match(text))
		.unwrap_or(false)
}

fn capture_u32(pattern: &str, text: &str) -> Option<u32> {
	let re = Regex::new(pattern).ok()?;
	let captures = re.captures(text)?;

	captures.get(1)?.as_str().parse().ok()
}

fn capture_pair(pattern: &str, text: &str) -> Option<(u32, u32)> {
	let re = Regex::new(pattern).ok()?;
	let captures = re.captures(text)?;
	let first = captures.get(1)?.as_str().parse().ok()?;
	let second = captures.get(2)?.as_str().parse().ok()?;

	Some((first, second))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn exact_duration_yields_closed_point() {
		let facts = extract_heuristic("consult lasted exactly 25 minutes");

		assert_eq!(facts.duration_min, Some(25));
		assert_eq!(facts.duration_max, Some(25));
		assert_eq!(facts.duration_min_inclusive, Some(true));
		assert_eq!(facts.duration_max_inclusive, Some(true));
	}

	#[test]
	fn bare_duration_is_treated_as_exact() {
		let facts = extract_heuristic("consult lasted 18 minutes");

		assert_eq!(facts.duration_interval(), Some(Interval::closed(18, 18)));
	}

	#[test]
	fn range_duration_is_both_inclusive() {
		let facts = extract_heuristic("consult 19-22 minutes");

		assert_eq!(facts.duration_interval(), Some(Interval::closed(19, 22)));
	}

	#[test]
	fn at_least_and_less_than_is_half_open() {
		let facts = extract_heuristic("at least 20 and less than 40 minutes");

		assert_eq!(facts.duration_interval(), Some(Interval::left_closed_right_open(20, 40)));
	}

	#[test]
	fn at_least_is_unbounded_above() {
		let facts = extract_heuristic("spent at least 45 minutes with the patient");

		assert_eq!(facts.duration_interval(), Some(Interval::at_least(45)));
	}

	#[test]
	fn more_than_is_open_below() {
		let facts = extract_heuristic("more than 30 minutes of counselling");

		assert_eq!(facts.duration_interval(), Some(Interval::more_than(30)));
	}

	#[test]
	fn less_than_widens_by_one_minute() {
		let facts = extract_heuristic("less than 20 minutes");

		assert_eq!(facts.duration_interval(), Some(Interval::left_closed_right_open(19, 20)));
	}

	#[test]
	fn trailing_plus_is_unbounded_above() {
		let facts = extract_heuristic("long consult, 40+ minutes");

		assert_eq!(facts.duration_interval(), Some(Interval::at_least(40)));
	}

	#[test]
	fn age_parses_common_shapes() {
		assert_eq!(extract_heuristic("35 y/o patient").age, Some(35));
		assert_eq!(extract_heuristic("patient aged 72").age, Some(72));
		assert_eq!(extract_heuristic("a 9 years old child").age, Some(9));
	}

	#[test]
	fn residential_care_does_not_parse_as_an_age() {
		assert_eq!(extract_heuristic("seen in residential aged care").age, None);
	}

	#[test]
	fn telehealth_maps_to_video() {
		assert_eq!(extract_heuristic("telehealth consult").modality, Some(Modality::Video));
		assert_eq!(extract_heuristic("telephone review").modality, Some(Modality::Phone));
		assert_eq!(extract_heuristic("face to face clinic visit").modality, Some(Modality::InPerson));
		assert_eq!(extract_heuristic("chest pain follow-up").modality, None);
	}

	#[test]
	fn specialist_language_wins_over_gp() {
		let facts = extract_heuristic("consultant review in gp rooms");

		assert_eq!(facts.is_specialist, Some(true));
		assert_eq!(facts.is_gp, Some(false));
	}

	#[test]
	fn keywords_are_deduplicated_evidence_tokens() {
		let facts =
			extract_heuristic("case conference with usual gp, nurse and nurse practitioner team");

		assert!(facts.has_keyword("conference"));
		assert!(facts.has_keyword("usual gp"));
		assert!(facts.has_keyword("team"));
		assert_eq!(facts.keywords.iter().filter(|k| k.as_str() == "nurse").count(), 1);
	}

	#[test]
	fn needs_completion_when_core_fields_missing() {
		let complete = extract_heuristic(
			"35 y/o patient, consult lasted exactly 25 minutes, in person at the clinic",
		);
		let sparse = extract_heuristic("brief chat");

		assert!(!complete.needs_completion());
		assert!(sparse.needs_completion());
	}
}
