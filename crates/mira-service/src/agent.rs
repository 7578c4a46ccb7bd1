//! The agent orchestrator: an explicit state graph over `AgentState` with
//! bounded iteration and monotonic exclusion bookkeeping. A graph failure
//! falls back to a linear pipeline capped at one refinement.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::{
	Error, MiraService, Result,
	constraints::{ConstraintSet, critic_constraints},
	reflect::Reflection,
	retrieve::{RetrieveOptions, RetrievedItem},
	verify::{VerifiedItem, resolve_time_conflicts, verify_candidates},
};
use mira_domain::NoteFacts;

const GRAPH_STEP_LIMIT: u32 = 32;
const PROPOSAL_OVERSHOOT: usize = 3;
const SMART_MATCH_REASON: &str = "Enhanced by query self-reflection";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentMode {
	Smart,
	Deep,
}

#[derive(Clone, Debug)]
pub struct AgentState {
	pub note: String,
	pub top_n: usize,
	pub iterations: u32,
	pub done: bool,
	pub facts: Option<NoteFacts>,
	pub enhanced_query: Option<String>,
	pub reflection_constraints: Vec<String>,
	pub critic_constraints: Vec<String>,
	pub proposal: Vec<RetrievedItem>,
	pub accepted: Vec<VerifiedItem>,
	pub banned_codes: BTreeSet<String>,
	pub seen_codes: BTreeSet<String>,
	pub conflicts_resolved: Vec<String>,
	pub reflection: Option<Reflection>,
}
impl AgentState {
	fn new(note: &str, top_n: usize) -> Self {
		Self {
			note: note.to_string(),
			top_n,
			iterations: 0,
			done: false,
			facts: None,
			enhanced_query: None,
			reflection_constraints: Vec::new(),
			critic_constraints: Vec::new(),
			proposal: Vec::new(),
			accepted: Vec::new(),
			banned_codes: BTreeSet::new(),
			seen_codes: BTreeSet::new(),
			conflicts_resolved: Vec::new(),
			reflection: None,
		}
	}

	fn base_query(&self) -> &str {
		self.enhanced_query.as_deref().unwrap_or(&self.note)
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct AgentOutcome {
	pub note_facts: NoteFacts,
	pub items: Vec<VerifiedItem>,
	pub conflicts_resolved: Vec<String>,
	pub iterations: u32,
	pub reflection: Option<Reflection>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Node {
	ExtractFacts,
	QueryReflection,
	Propose,
	Verify,
	Critic,
	RefinePropose,
	SmartPropose,
	End,
}

impl MiraService {
	pub async fn run_agent(
		&self,
		note: &str,
		top_n: usize,
		mode: AgentMode,
	) -> Result<AgentOutcome> {
		if note.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "Note must be non-empty.".to_string() });
		}

		let top_n = if top_n == 0 { self.cfg.agent.default_top as usize } else { top_n };
		let mut state = AgentState::new(note, top_n);

		if let Err(err) = self.run_graph(&mut state, mode).await {
			tracing::warn!(error = %err, "Agent graph failed; running the linear fallback pipeline.");

			state = AgentState::new(note, top_n);

			self.run_fallback(&mut state, mode).await?;
		}

		Ok(finish(state))
	}

	async fn run_graph(&self, state: &mut AgentState, mode: AgentMode) -> Result<()> {
		let mut node = Node::ExtractFacts;
		let mut steps = 0;

		while node != Node::End {
			steps += 1;

			if steps > GRAPH_STEP_LIMIT {
				return Err(Error::Agent {
					message: "Agent graph exceeded its step limit.".to_string(),
				});
			}

			node = self.step(node, state, mode).await?;
		}

		Ok(())
	}

	async fn step(&self, node: Node, state: &mut AgentState, mode: AgentMode) -> Result<Node> {
		match node {
			Node::ExtractFacts => {
				state.facts = Some(self.extract_facts(&state.note).await);

				Ok(Node::QueryReflection)
			},
			Node::QueryReflection => {
				let facts = state.facts.clone().unwrap_or_default();
				let reflection = self.reflect(&state.note, &facts).await;

				state.enhanced_query = Some(reflection.enhanced_query.clone());
				state.reflection_constraints = reflection.constraints.clone();
				state.reflection = Some(reflection);

				Ok(match mode {
					AgentMode::Deep => Node::Propose,
					AgentMode::Smart => Node::SmartPropose,
				})
			},
			Node::Propose => {
				let must = state.reflection_constraints.clone();

				self.propose_round(state, &must).await?;

				Ok(Node::Verify)
			},
			Node::Verify => {
				self.verify_round(state);

				if state.done || state.iterations >= self.cfg.agent.max_refinements {
					Ok(Node::End)
				} else {
					Ok(Node::Critic)
				}
			},
			Node::Critic => {
				let facts = state.facts.clone().unwrap_or_default();

				state.critic_constraints = critic_constraints(&facts);

				Ok(Node::RefinePropose)
			},
			Node::RefinePropose => {
				state.iterations += 1;

				let mut must = state.reflection_constraints.clone();

				for token in &state.critic_constraints {
					if !must.contains(token) {
						must.push(token.clone());
					}
				}

				self.propose_round(state, &must).await?;

				Ok(Node::Verify)
			},
			Node::SmartPropose => {
				self.smart_propose(state).await?;

				Ok(Node::End)
			},
			Node::End => Ok(Node::End),
		}
	}

	/// One proposal round: retry the retriever until `top_n + 3` unique
	/// non-banned codes are collected or the pool stops yielding new ones.
	async fn propose_round(&self, state: &mut AgentState, must: &[String]) -> Result<()> {
		let want = state.top_n + PROPOSAL_OVERSHOOT;
		let mut collected: Vec<RetrievedItem> = Vec::new();

		for _ in 0..self.cfg.agent.proposal_retries {
			let mut exclude: Vec<String> = state.banned_codes.iter().cloned().collect();

			exclude.extend(collected.iter().map(|item| item.item_num.clone()));

			let query = compose_query(state.base_query(), must, &exclude);
			let opts = RetrieveOptions {
				top_k: want,
				exclude_codes: exclude,
				stage2_reflection: self.cfg.retrieval.stage2_reflection,
				llm_reflection: self.cfg.retrieval.reflection_llm_rerank,
			};
			let outcome = self.retrieve(&query, &opts).await?;

			if outcome.results.is_empty() {
				break;
			}

			let mut added = 0;

			for item in outcome.results {
				if state.banned_codes.contains(&item.item_num)
					|| collected.iter().any(|existing| existing.item_num == item.item_num)
				{
					continue;
				}

				collected.push(item);

				added += 1;

				if collected.len() >= want {
					break;
				}
			}

			if collected.len() >= want || added == 0 {
				break;
			}
		}

		state.proposal = collected;

		Ok(())
	}

	/// Verify the current proposal, ban everything seen, and merge passes
	/// into the accepted set (deduplicated by code, last writer wins).
	fn verify_round(&self, state: &mut AgentState) {
		let facts = state.facts.clone().unwrap_or_default();
		let proposal = std::mem::take(&mut state.proposal);
		let fresh = proposal.iter().any(|item| !state.seen_codes.contains(&item.item_num));

		for item in &proposal {
			state.seen_codes.insert(item.item_num.clone());
			state.banned_codes.insert(item.item_num.clone());
		}

		for item in verify_candidates(&facts, &proposal) {
			if !item.verify.as_ref().is_some_and(|report| report.passes) {
				continue;
			}

			if let Some(existing) =
				state.accepted.iter_mut().find(|existing| existing.code == item.code)
			{
				*existing = item;
			} else {
				state.accepted.push(item);
			}
		}

		state.done = !fresh || state.accepted.len() >= state.top_n;
	}

	/// Smart mode: a single retrieval with both reflection knobs on, emitted
	/// without verification reports.
	async fn smart_propose(&self, state: &mut AgentState) -> Result<()> {
		let must = state.reflection_constraints.clone();
		let query = compose_query(state.base_query(), &must, &[]);
		let opts = RetrieveOptions {
			top_k: state.top_n,
			exclude_codes: Vec::new(),
			stage2_reflection: true,
			llm_reflection: true,
		};
		let outcome = self.retrieve(&query, &opts).await?;

		state.accepted = outcome
			.results
			.into_iter()
			.map(|item| VerifiedItem {
				code: item.item_num,
				display: item.title,
				fee: item.fee,
				score: item.match_score,
				match_reason: item
					.match_reason
					.or_else(|| Some(SMART_MATCH_REASON.to_string())),
				verify: None,
				group: item.meta.group,
			})
			.collect();
		state.done = true;

		Ok(())
	}

	/// Linear fallback: extract, retrieve, verify, and one critic-hinted
	/// refinement when under-filled.
	async fn run_fallback(&self, state: &mut AgentState, mode: AgentMode) -> Result<()> {
		state.facts = Some(self.extract_facts(&state.note).await);

		if mode == AgentMode::Smart {
			return self.smart_propose(state).await;
		}

		self.propose_round(state, &[]).await?;
		self.verify_round(state);

		if state.accepted.len() < state.top_n {
			let facts = state.facts.clone().unwrap_or_default();
			let hints = critic_constraints(&facts);

			state.iterations += 1;

			self.propose_round(state, &hints).await?;
			self.verify_round(state);
		}

		Ok(())
	}
}

fn compose_query(base: &str, must: &[String], exclude: &[String]) -> String {
	let mut constraints = ConstraintSet::default();

	for token in must {
		constraints.push_must(token);
	}
	for code in exclude {
		constraints.push_must_not(&format!("code:{code}"));
	}

	match constraints.format_block() {
		Some(block) => format!("{base}\n{block}"),
		None => base.to_string(),
	}
}

fn finish(mut state: AgentState) -> AgentOutcome {
	state.accepted.truncate(state.top_n);

	let (items, notes) = resolve_time_conflicts(std::mem::take(&mut state.accepted));
	let mut conflicts_resolved = state.conflicts_resolved;

	conflicts_resolved.extend(notes);

	AgentOutcome {
		note_facts: state.facts.unwrap_or_default(),
		items,
		conflicts_resolved,
		iterations: state.iterations,
		reflection: state.reflection,
	}
}
