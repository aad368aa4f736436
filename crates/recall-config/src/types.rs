use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	#[serde(default)]
	pub service: Service,
	pub database: Database,
	#[serde(default)]
	pub queue: Queue,
	pub llm: Llm,
	pub embedding: Embedding,
	#[serde(default)]
	pub chunk: ChunkLifecycle,
	#[serde(default)]
	pub retrieval: Retrieval,
	#[serde(default)]
	pub context: ContextBudget,
	#[serde(default)]
	pub agent: Agent,
	#[serde(default)]
	pub adapter: Adapter,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}
impl Default for Service {
	fn default() -> Self {
		Self { http_bind: "127.0.0.1:8080".to_string(), log_level: "info".to_string() }
	}
}

#[derive(Debug, Deserialize)]
pub struct Database {
	pub url: String,
	#[serde(default = "default_max_connections")]
	pub max_connections: u32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Queue {
	pub concurrency: u32,
	pub poll_interval_ms: u64,
	pub lease_seconds: i64,
	pub backoff_base_ms: i64,
	pub backoff_cap_ms: i64,
	pub completed_retention_hours: i64,
	pub completed_retention_jobs: i64,
	pub failed_retention_days: i64,
	/// Optional per-worker rate limit: at most this many jobs per interval.
	pub rate_limit_max_jobs: Option<u32>,
	pub rate_limit_interval_ms: u64,
}
impl Default for Queue {
	fn default() -> Self {
		Self {
			concurrency: 4,
			poll_interval_ms: 500,
			lease_seconds: 30,
			backoff_base_ms: 2_000,
			backoff_cap_ms: 30_000,
			completed_retention_hours: 24,
			completed_retention_jobs: 1_000,
			failed_retention_days: 7,
			rate_limit_max_jobs: None,
			rate_limit_interval_ms: 60_000,
		}
	}
}

#[derive(Debug, Deserialize)]
pub struct Llm {
	#[serde(default = "default_llm_provider")]
	pub default: String,
	pub providers: HashMap<String, LlmProviderConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LlmProviderConfig {
	pub api_base: String,
	pub api_key: String,
	pub model: String,
	#[serde(default = "default_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Embedding {
	pub provider: String,
	pub api_base: String,
	pub api_key: String,
	pub model: String,
	#[serde(default = "default_dimensions")]
	pub dimensions: u32,
	#[serde(default = "default_batch_size")]
	pub batch_size: u32,
	#[serde(default = "default_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ChunkLifecycle {
	pub hot_to_warm_days: i64,
	pub warm_to_cold_days: i64,
	pub hot_min_access: i64,
	pub warm_min_access: i64,
	pub lifecycle_interval_seconds: u64,
}
impl Default for ChunkLifecycle {
	fn default() -> Self {
		Self {
			hot_to_warm_days: 7,
			warm_to_cold_days: 30,
			hot_min_access: 3,
			warm_min_access: 10,
			lifecycle_interval_seconds: 3_600,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Retrieval {
	pub top_k: u32,
	pub min_similarity: f32,
	pub similarity_weight: f32,
	pub importance_weight: f32,
	pub rerank: bool,
	pub rerank_candidates: u32,
}
impl Default for Retrieval {
	fn default() -> Self {
		Self {
			top_k: 20,
			min_similarity: 0.5,
			similarity_weight: 0.7,
			importance_weight: 0.3,
			rerank: false,
			rerank_candidates: 10,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ContextBudget {
	pub max_tokens: u32,
	pub max_history: u32,
	pub format_reserve: u32,
	pub relevance_threshold: f32,
}
impl Default for ContextBudget {
	fn default() -> Self {
		Self { max_tokens: 8_000, max_history: 10, format_reserve: 500, relevance_threshold: 0.6 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Agent {
	pub max_iterations: u32,
	pub temperature: f32,
	pub max_tokens: u32,
	pub context_min_similarity: f32,
}
impl Default for Agent {
	fn default() -> Self {
		Self { max_iterations: 5, temperature: 0.7, max_tokens: 2_000, context_min_similarity: 0.6 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Adapter {
	pub channel_capacity: usize,
	pub reconnect_base_ms: u64,
	pub reconnect_cap_ms: u64,
	pub self_id: Option<String>,
}
impl Default for Adapter {
	fn default() -> Self {
		Self {
			channel_capacity: 256,
			reconnect_base_ms: 1_000,
			reconnect_cap_ms: 60_000,
			self_id: None,
		}
	}
}

fn default_max_connections() -> u32 {
	10
}

fn default_llm_provider() -> String {
	"anthropic".to_string()
}

fn default_timeout_ms() -> u64 {
	30_000
}

fn default_dimensions() -> u32 {
	768
}

fn default_batch_size() -> u32 {
	32
}
