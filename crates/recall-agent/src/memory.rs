use std::sync::Arc;

use serde_json::{Value, json};
use uuid::Uuid;

use recall_providers::BoxFuture;
use recall_service::{
	Service,
	context::ContextOptions,
	retrieval::SearchOptions,
};

use crate::{
	agent::ContextSource,
	tool::{ParamKind, Tool, ToolContext, ToolHandler, ToolParameter, ToolRegistry},
};

const DEFAULT_SEARCH_LIMIT: u32 = 5;
const DEFAULT_RECENT_LIMIT: i64 = 10;

/// Builds the standard memory toolset backed by the retrieval service.
pub fn memory_tools(service: &Arc<Service>) -> Vec<Tool> {
	vec![
		Tool {
			name: "search_memory".to_string(),
			description: "Semantic search over the team's stored knowledge. Use this to find \
				past discussions, decisions, and changes relevant to a question."
				.to_string(),
			parameters: vec![
				ToolParameter::new("query", ParamKind::String, "Natural-language query.", true),
				ToolParameter::new(
					"limit",
					ParamKind::Number,
					"Maximum number of results.",
					false,
				),
			],
			category: Some("memory".to_string()),
			handler: Arc::new(SearchMemoryHandler { service: service.clone() }),
		},
		Tool {
			name: "get_recent_events".to_string(),
			description: "Most recent knowledge chunks from one source, newest first."
				.to_string(),
			parameters: vec![
				ToolParameter::new(
					"source",
					ParamKind::String,
					"Source tag, e.g. slack, jira, or git.",
					true,
				),
				ToolParameter::new(
					"limit",
					ParamKind::Number,
					"Maximum number of results.",
					false,
				),
			],
			category: Some("memory".to_string()),
			handler: Arc::new(RecentEventsHandler { service: service.clone() }),
		},
		Tool {
			name: "find_similar".to_string(),
			description: "Chunks semantically similar to a known chunk, excluding the chunk \
				itself."
				.to_string(),
			parameters: vec![
				ToolParameter::new("chunk_id", ParamKind::String, "Id of the anchor chunk.", true),
				ToolParameter::new(
					"limit",
					ParamKind::Number,
					"Maximum number of results.",
					false,
				),
			],
			category: Some("memory".to_string()),
			handler: Arc::new(FindSimilarHandler { service: service.clone() }),
		},
	]
}

pub fn registry_with_memory_tools(service: &Arc<Service>) -> ToolRegistry {
	let mut registry = ToolRegistry::new();

	for tool in memory_tools(service) {
		registry.register(tool);
	}

	registry
}

/// Context source that pre-retrieves knowledge through the context builder,
/// using the agent's stricter similarity floor.
pub struct ServiceContext {
	service: Arc<Service>,
}
impl ServiceContext {
	pub fn new(service: Arc<Service>) -> Self {
		Self { service }
	}
}
impl ContextSource for ServiceContext {
	fn knowledge_context<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Option<String>> {
		Box::pin(async move {
			let mut opts = ContextOptions::from_config(&self.service.cfg.context, "");

			opts.include_history = false;
			opts.relevance_threshold = self.service.cfg.agent.context_min_similarity;

			match self.service.build_context(query, &opts, &[]).await {
				Ok(built) if !built.knowledge_context.is_empty() => Some(built.knowledge_context),
				Ok(_) => None,
				Err(err) => {
					tracing::warn!(error = %err, "Context retrieval failed; continuing without it.");

					None
				},
			}
		})
	}
}

struct SearchMemoryHandler {
	service: Arc<Service>,
}
impl ToolHandler for SearchMemoryHandler {
	fn call(&self, input: Value, _ctx: ToolContext) -> BoxFuture<'static, Result<Value, String>> {
		let service = self.service.clone();

		Box::pin(async move {
			let query = require_str(&input, "query")?;
			let limit = optional_u32(&input, "limit").unwrap_or(DEFAULT_SEARCH_LIMIT);
			let opts = SearchOptions { top_k: Some(limit), ..SearchOptions::default() };
			let response =
				service.search(&query, &opts).await.map_err(|err| err.to_string())?;
			let results: Vec<Value> = response
				.chunks
				.iter()
				.map(|chunk| {
					json!({
						"chunk_id": chunk.chunk_id,
						"content": chunk.content,
						"source_type": chunk.source_type,
						"similarity": chunk.similarity,
						"relevance": chunk.relevance,
					})
				})
				.collect();

			Ok(json!({ "results": results, "total": response.total_results }))
		})
	}
}

struct RecentEventsHandler {
	service: Arc<Service>,
}
impl ToolHandler for RecentEventsHandler {
	fn call(&self, input: Value, _ctx: ToolContext) -> BoxFuture<'static, Result<Value, String>> {
		let service = self.service.clone();

		Box::pin(async move {
			let source = require_str(&input, "source")?;
			let limit =
				optional_u32(&input, "limit").map(i64::from).unwrap_or(DEFAULT_RECENT_LIMIT);
			let chunks = service
				.get_recent(Some(source.as_str()), limit)
				.await
				.map_err(|err| err.to_string())?;
			let results: Vec<Value> = chunks
				.iter()
				.map(|chunk| {
					json!({
						"chunk_id": chunk.chunk_id,
						"content": chunk.content,
						"source_type": chunk.source_type,
					})
				})
				.collect();

			Ok(json!({ "results": results, "total": results.len() }))
		})
	}
}

struct FindSimilarHandler {
	service: Arc<Service>,
}
impl ToolHandler for FindSimilarHandler {
	fn call(&self, input: Value, _ctx: ToolContext) -> BoxFuture<'static, Result<Value, String>> {
		let service = self.service.clone();

		Box::pin(async move {
			let raw_id = require_str(&input, "chunk_id")?;
			let chunk_id = Uuid::parse_str(&raw_id)
				.map_err(|_| "Parameter chunk_id must be a UUID.".to_string())?;
			let limit = optional_u32(&input, "limit").unwrap_or(DEFAULT_SEARCH_LIMIT);
			let chunks =
				service.find_similar(chunk_id, limit).await.map_err(|err| err.to_string())?;
			let results: Vec<Value> = chunks
				.iter()
				.map(|chunk| {
					json!({
						"chunk_id": chunk.chunk_id,
						"content": chunk.content,
						"source_type": chunk.source_type,
						"similarity": chunk.similarity,
					})
				})
				.collect();

			Ok(json!({ "results": results, "total": results.len() }))
		})
	}
}

fn require_str(input: &Value, key: &str) -> Result<String, String> {
	input
		.get(key)
		.and_then(Value::as_str)
		.map(|value| value.to_string())
		.filter(|value| !value.trim().is_empty())
		.ok_or_else(|| format!("Parameter {key} must be a non-empty string."))
}

fn optional_u32(input: &Value, key: &str) -> Option<u32> {
	let value = input.get(key)?;

	if let Some(number) = value.as_u64() {
		return u32::try_from(number).ok();
	}

	value.as_f64().filter(|number| *number >= 0.0).map(|number| number as u32)
}
