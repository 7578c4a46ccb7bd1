//! Deterministic core of the MBS item recommender: fact heuristics, rule
//! parsing, and tri-state verification. Everything in this crate is pure and
//! LLM-free; uncertainty surfaces as SOFT outcomes, never as errors.

pub mod category;
pub mod facts;
pub mod interval;
pub mod rules;
pub mod verify;

pub use category::{ItemCategory, categories_for};
pub use facts::{Modality, NoteFacts, Setting, VisitKind, extract_heuristic};
pub use interval::Interval;
pub use rules::{
	AgeRange, ConditionKind, DEFAULT_RULE_CONFIDENCE, ItemCondition, ItemFlags, ItemRule, RuleHints,
	RuleVisit, parse_item_rule,
};
pub use verify::{Check, CheckOutcome, VerifyReport, verify};
