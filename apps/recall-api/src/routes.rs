// std
use std::time::Instant;

// crates.io
use axum::{
	Json, Router,
	extract::{Query, State},
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

// self
use recall_agent::{AgentOptions, AgentStep, ToolContext};
use recall_service::retrieval::SearchOptions;
use recall_storage::chunk_store::StoreStats;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/health/live", get(health))
		.route("/health/ready", get(health_ready))
		.route("/agent/query", post(agent_query))
		.route("/memory/search", post(memory_search))
		.route("/memory/stats", get(memory_stats))
		.route("/memory/recent", get(memory_recent))
		.with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct AgentQueryRequest {
	pub query: String,
	pub user_id: Option<String>,
	#[serde(default = "default_include_memory_context")]
	pub include_memory_context: bool,
}

#[derive(Debug, Serialize)]
pub struct AgentQueryResponse {
	pub response: String,
	pub duration_ms: u64,
	pub steps: Vec<AgentStep>,
	pub tools_used: Vec<String>,
	pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct MemorySearchRequest {
	pub query: String,
	pub limit: Option<u32>,
	pub min_similarity: Option<f32>,
	pub source_types: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct SearchResultItem {
	pub id: Uuid,
	pub content: String,
	pub similarity: f32,
	pub source_type: String,
	pub metadata: Value,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct MemorySearchResponse {
	pub results: Vec<SearchResultItem>,
	pub total: usize,
	pub duration_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct RecentParams {
	pub source_type: Option<String>,
	pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RecentItem {
	pub id: Uuid,
	pub content: String,
	pub source_type: String,
	pub metadata: Value,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn health_ready(State(state): State<AppState>) -> StatusCode {
	match sqlx::query("SELECT 1").execute(&state.service.db.pool).await {
		Ok(_) => StatusCode::OK,
		Err(err) => {
			tracing::warn!(error = %err, "Readiness probe failed.");

			StatusCode::SERVICE_UNAVAILABLE
		},
	}
}

async fn agent_query(
	State(state): State<AppState>,
	Json(payload): Json<AgentQueryRequest>,
) -> Result<Json<AgentQueryResponse>, ApiError> {
	if payload.query.trim().is_empty() {
		return Err(json_error(StatusCode::BAD_REQUEST, "invalid_request", "query must be non-empty."));
	}

	let started = Instant::now();
	let mut opts = AgentOptions::from_config(&state.service.cfg.agent);

	opts.include_memory_context = payload.include_memory_context;

	let ctx = ToolContext { user_id: payload.user_id };
	let outcome = state.agent.run(&payload.query, &[], &opts, &ctx).await?;

	Ok(Json(AgentQueryResponse {
		response: outcome.response,
		duration_ms: started.elapsed().as_millis() as u64,
		steps: outcome.steps,
		tools_used: outcome.tools_used,
		success: outcome.success,
	}))
}

async fn memory_search(
	State(state): State<AppState>,
	Json(payload): Json<MemorySearchRequest>,
) -> Result<Json<MemorySearchResponse>, ApiError> {
	let started = Instant::now();
	let opts = SearchOptions {
		top_k: payload.limit,
		min_similarity: payload.min_similarity,
		source_types: payload.source_types,
		rerank: None,
	};
	let response = state.service.search(&payload.query, &opts).await?;
	let results: Vec<SearchResultItem> = response
		.chunks
		.into_iter()
		.map(|chunk| SearchResultItem {
			id: chunk.chunk_id,
			content: chunk.content,
			similarity: chunk.similarity,
			source_type: chunk.source_type,
			metadata: chunk.metadata,
			created_at: chunk.created_at,
		})
		.collect();
	let total = results.len();

	Ok(Json(MemorySearchResponse {
		results,
		total,
		duration_ms: started.elapsed().as_millis() as u64,
	}))
}

async fn memory_stats(State(state): State<AppState>) -> Result<Json<StoreStats>, ApiError> {
	let stats = state.service.stats().await?;

	Ok(Json(stats))
}

async fn memory_recent(
	State(state): State<AppState>,
	Query(params): Query<RecentParams>,
) -> Result<Json<Vec<RecentItem>>, ApiError> {
	let chunks = state
		.service
		.get_recent(params.source_type.as_deref(), params.limit.unwrap_or(20))
		.await?;
	let items = chunks
		.into_iter()
		.map(|chunk| RecentItem {
			id: chunk.chunk_id,
			content: chunk.content,
			source_type: chunk.source_type,
			metadata: chunk.metadata,
			created_at: chunk.created_at,
		})
		.collect();

	Ok(Json(items))
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

impl From<recall_service::Error> for ApiError {
	fn from(err: recall_service::Error) -> Self {
		match err {
			recall_service::Error::InvalidRequest { message } =>
				json_error(StatusCode::BAD_REQUEST, "invalid_request", message),
			recall_service::Error::NotFound { message } =>
				json_error(StatusCode::NOT_FOUND, "not_found", message),
			recall_service::Error::Provider(inner) => provider_error(inner),
			recall_service::Error::Storage { message } => {
				tracing::error!(error = %message, "Storage failure.");

				json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", "Storage failure.")
			},
		}
	}
}

impl From<recall_agent::Error> for ApiError {
	fn from(err: recall_agent::Error) -> Self {
		match err {
			recall_agent::Error::Provider(inner) => provider_error(inner),
		}
	}
}

fn provider_error(err: recall_providers::Error) -> ApiError {
	use recall_providers::Error;

	match &err {
		Error::RateLimited { .. } =>
			json_error(StatusCode::TOO_MANY_REQUESTS, "rate_limited", err.to_string()),
		Error::Timeout | Error::Upstream { .. } | Error::InvalidResponse { .. } =>
			json_error(StatusCode::SERVICE_UNAVAILABLE, "upstream", err.to_string()),
		_ => {
			tracing::error!(error = %err, "Provider failure.");

			json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", "Provider failure.")
		},
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code, message: self.message };

		(self.status, Json(body)).into_response()
	}
}

fn default_include_memory_context() -> bool {
	true
}
