use axum::{
	Json, Router,
	extract::State,
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use mira_service::{AgentMode, AgentOutcome, Error as ServiceError, RetrieveOptions, VerifiedItem};

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/rag/agentic", post(agentic))
		.route("/rag/smart", post(smart))
		.route("/rag/query", post(query))
		.route("/rag/ingest", post(ingest))
		.route("/rag/clear", post(clear))
		.route("/rag/refresh", post(refresh))
		.route("/rag/status", get(status))
		.route("/rag/health", get(health))
		.with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct RecommendRequest {
	pub note: String,
	pub top: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
	pub query: String,
	pub top: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
	pub filename: String,
	pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ClearRequest {
	pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
	pub filename: Option<String>,
	pub token: String,
}

#[derive(Debug, Serialize)]
pub struct ItemResponse {
	#[serde(rename = "itemNum")]
	pub item_num: String,
	pub title: String,
	pub match_reason: Option<String>,
	pub match_score: Option<f32>,
	pub fee: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct RecommendResponse {
	pub results: Vec<ItemResponse>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub mode: Option<&'static str>,
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn agentic(
	State(state): State<AppState>,
	Json(payload): Json<RecommendRequest>,
) -> Result<Json<RecommendResponse>, ApiError> {
	let outcome = state
		.service
		.run_agent(&payload.note, payload.top.unwrap_or(0), AgentMode::Deep)
		.await?;

	Ok(Json(recommend_response(outcome, None)))
}

async fn smart(
	State(state): State<AppState>,
	Json(payload): Json<RecommendRequest>,
) -> Result<Json<RecommendResponse>, ApiError> {
	let outcome = state
		.service
		.run_agent(&payload.note, payload.top.unwrap_or(0), AgentMode::Smart)
		.await?;

	Ok(Json(recommend_response(outcome, Some("smart"))))
}

async fn query(
	State(state): State<AppState>,
	Json(payload): Json<QueryRequest>,
) -> Result<Json<RecommendResponse>, ApiError> {
	let cfg = &state.service.cfg;
	let opts = RetrieveOptions {
		top_k: payload.top.unwrap_or(cfg.agent.default_top as usize),
		exclude_codes: Vec::new(),
		stage2_reflection: cfg.retrieval.stage2_reflection,
		llm_reflection: cfg.retrieval.reflection_llm_rerank,
	};
	let outcome = state.service.retrieve(&payload.query, &opts).await?;
	let results = outcome
		.results
		.into_iter()
		.map(|item| ItemResponse {
			item_num: item.item_num,
			title: item.title,
			match_reason: item.match_reason,
			match_score: item.match_score,
			fee: item.fee,
		})
		.collect();

	Ok(Json(RecommendResponse { results, mode: None }))
}

async fn ingest(
	State(state): State<AppState>,
	Json(payload): Json<IngestRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
	authorize(&state, &payload.token)?;

	let report = state.service.ingest(&payload.filename).await?;

	Ok(Json(serde_json::json!(report)))
}

async fn clear(
	State(state): State<AppState>,
	Json(payload): Json<ClearRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
	authorize(&state, &payload.token)?;

	state.service.clear().await?;

	Ok(Json(serde_json::json!({ "cleared": true })))
}

async fn refresh(
	State(state): State<AppState>,
	Json(payload): Json<RefreshRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
	authorize(&state, &payload.token)?;

	let report = state.service.refresh(payload.filename.as_deref()).await?;

	Ok(Json(serde_json::json!(report)))
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
	Json(serde_json::json!(state.service.status()))
}

fn authorize(state: &AppState, token: &str) -> Result<(), ApiError> {
	if token.is_empty() || token != state.service.cfg.security.admin_token {
		return Err(json_error(StatusCode::UNAUTHORIZED, "unauthorized", "Invalid admin token."));
	}

	Ok(())
}

fn recommend_response(outcome: AgentOutcome, mode: Option<&'static str>) -> RecommendResponse {
	let results = outcome.items.into_iter().map(item_response).collect();

	RecommendResponse { results, mode }
}

fn item_response(item: VerifiedItem) -> ItemResponse {
	ItemResponse {
		item_num: item.code,
		title: item.display,
		match_reason: item.match_reason,
		match_score: item.score,
		fee: item.fee,
	}
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
}

pub fn json_error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
	ApiError { status, error_code: code.to_string(), message: message.into() }
}

impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		match err {
			ServiceError::InvalidRequest { message } => {
				json_error(StatusCode::BAD_REQUEST, "invalid_request", message)
			},
			other => json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", other.to_string()),
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code, message: self.message };

		(self.status, Json(body)).into_response()
	}
}
