mod types;

use std::{fs, path::Path};

use color_eyre::eyre;

pub use types::{
	Adapter, Agent, ChunkLifecycle, Config, ContextBudget, Database, Embedding, Llm,
	LlmProviderConfig, Queue, Retrieval, Service,
};

pub fn load(path: &Path) -> color_eyre::Result<Config> {
	let raw = fs::read_to_string(path)?;

	let mut cfg: Config = toml::from_str(&raw)?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

fn normalize(cfg: &mut Config) {
	if cfg.adapter.self_id.as_deref().map(|id| id.trim().is_empty()).unwrap_or(false) {
		cfg.adapter.self_id = None;
	}
}

pub fn validate(cfg: &Config) -> color_eyre::Result<()> {
	if cfg.database.url.trim().is_empty() {
		return Err(eyre::eyre!("database.url must be non-empty."));
	}
	if cfg.database.max_connections == 0 {
		return Err(eyre::eyre!("database.max_connections must be greater than zero."));
	}
	if cfg.queue.concurrency == 0 {
		return Err(eyre::eyre!("queue.concurrency must be greater than zero."));
	}
	if cfg.queue.lease_seconds <= 0 {
		return Err(eyre::eyre!("queue.lease_seconds must be greater than zero."));
	}
	if cfg.queue.backoff_base_ms <= 0 {
		return Err(eyre::eyre!("queue.backoff_base_ms must be greater than zero."));
	}
	if cfg.queue.backoff_cap_ms < cfg.queue.backoff_base_ms {
		return Err(eyre::eyre!("queue.backoff_cap_ms must be at least queue.backoff_base_ms."));
	}
	if cfg.queue.rate_limit_max_jobs == Some(0) {
		return Err(eyre::eyre!("queue.rate_limit_max_jobs must be greater than zero when set."));
	}
	if cfg.queue.rate_limit_interval_ms == 0 {
		return Err(eyre::eyre!("queue.rate_limit_interval_ms must be greater than zero."));
	}

	if !cfg.llm.providers.contains_key(&cfg.llm.default) {
		return Err(eyre::eyre!("llm.default must name an entry in llm.providers."));
	}

	for (name, provider) in &cfg.llm.providers {
		if provider.api_key.trim().is_empty() {
			return Err(eyre::eyre!("llm.providers.{name}.api_key must be non-empty."));
		}
		if provider.model.trim().is_empty() {
			return Err(eyre::eyre!("llm.providers.{name}.model must be non-empty."));
		}
	}

	if cfg.embedding.dimensions == 0 {
		return Err(eyre::eyre!("embedding.dimensions must be greater than zero."));
	}
	if cfg.embedding.batch_size == 0 {
		return Err(eyre::eyre!("embedding.batch_size must be greater than zero."));
	}
	if cfg.embedding.api_key.trim().is_empty() {
		return Err(eyre::eyre!("embedding.api_key must be non-empty."));
	}

	if cfg.chunk.hot_to_warm_days <= 0 {
		return Err(eyre::eyre!("chunk.hot_to_warm_days must be greater than zero."));
	}
	if cfg.chunk.warm_to_cold_days <= cfg.chunk.hot_to_warm_days {
		return Err(eyre::eyre!(
			"chunk.warm_to_cold_days must be greater than chunk.hot_to_warm_days."
		));
	}

	if cfg.retrieval.top_k == 0 {
		return Err(eyre::eyre!("retrieval.top_k must be greater than zero."));
	}
	if !(0.0..=1.0).contains(&cfg.retrieval.min_similarity) {
		return Err(eyre::eyre!("retrieval.min_similarity must be in the range 0.0-1.0."));
	}

	for (label, weight) in [
		("retrieval.similarity_weight", cfg.retrieval.similarity_weight),
		("retrieval.importance_weight", cfg.retrieval.importance_weight),
	] {
		if !weight.is_finite() {
			return Err(eyre::eyre!("{label} must be a finite number."));
		}
		if !(0.0..=1.0).contains(&weight) {
			return Err(eyre::eyre!("{label} must be in the range 0.0-1.0."));
		}
	}

	let weight_sum = cfg.retrieval.similarity_weight + cfg.retrieval.importance_weight;

	if (weight_sum - 1.0).abs() > 1e-6 {
		return Err(eyre::eyre!(
			"retrieval.similarity_weight and retrieval.importance_weight must sum to 1.0."
		));
	}

	if cfg.retrieval.rerank && cfg.retrieval.rerank_candidates == 0 {
		return Err(eyre::eyre!(
			"retrieval.rerank_candidates must be greater than zero when rerank is enabled."
		));
	}

	if cfg.context.max_tokens <= cfg.context.format_reserve {
		return Err(eyre::eyre!("context.max_tokens must be greater than context.format_reserve."));
	}
	if !(0.0..=1.0).contains(&cfg.context.relevance_threshold) {
		return Err(eyre::eyre!("context.relevance_threshold must be in the range 0.0-1.0."));
	}

	if cfg.agent.max_iterations == 0 {
		return Err(eyre::eyre!("agent.max_iterations must be greater than zero."));
	}
	if cfg.agent.max_tokens == 0 {
		return Err(eyre::eyre!("agent.max_tokens must be greater than zero."));
	}
	if !(0.0..=1.0).contains(&cfg.agent.context_min_similarity) {
		return Err(eyre::eyre!("agent.context_min_similarity must be in the range 0.0-1.0."));
	}

	if cfg.adapter.channel_capacity == 0 {
		return Err(eyre::eyre!("adapter.channel_capacity must be greater than zero."));
	}
	if cfg.adapter.reconnect_cap_ms < cfg.adapter.reconnect_base_ms {
		return Err(eyre::eyre!(
			"adapter.reconnect_cap_ms must be at least adapter.reconnect_base_ms."
		));
	}

	Ok(())
}
