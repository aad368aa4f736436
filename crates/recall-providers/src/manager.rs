use std::{collections::HashMap, sync::Arc};

use crate::{
	Capability, Error, LlmProvider, Result, anthropic::AnthropicProvider, openai::OpenAiProvider,
};

/// Holds the configured providers and picks the right one per role: the
/// default for chat, the embedding back-end for vectors.
pub struct ProviderManager {
	providers: HashMap<String, Arc<dyn LlmProvider>>,
	default: String,
	embedding: String,
}
impl ProviderManager {
	pub fn from_config(cfg: &recall_config::Config) -> Result<Self> {
		let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();

		for (name, provider_cfg) in &cfg.llm.providers {
			let embed_cfg =
				(cfg.embedding.provider == *name).then(|| cfg.embedding.clone());
			let provider: Arc<dyn LlmProvider> = match name.as_str() {
				"anthropic" => {
					if embed_cfg.is_some() {
						return Err(Error::InvalidConfig {
							message: "embedding.provider must name an embeddings-capable back-end."
								.to_string(),
						});
					}

					Arc::new(AnthropicProvider::new(name.clone(), provider_cfg.clone()))
				},
				// Everything else speaks the OpenAI-compatible dialect.
				_ => Arc::new(OpenAiProvider::new(
					name.clone(),
					Some(provider_cfg.clone()),
					embed_cfg,
				)),
			};

			providers.insert(name.clone(), provider);
		}

		if !providers.contains_key(&cfg.embedding.provider) {
			providers.insert(
				cfg.embedding.provider.clone(),
				Arc::new(OpenAiProvider::new(
					cfg.embedding.provider.clone(),
					None,
					Some(cfg.embedding.clone()),
				)),
			);
		}

		let manager = Self {
			providers,
			default: cfg.llm.default.clone(),
			embedding: cfg.embedding.provider.clone(),
		};

		manager.get(&manager.default)?;
		manager.embedding_provider()?;

		Ok(manager)
	}

	/// Test seam: swap or add a provider by name.
	pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn LlmProvider>) {
		self.providers.insert(name.into(), provider);
	}

	pub fn get(&self, name: &str) -> Result<Arc<dyn LlmProvider>> {
		self.providers.get(name).cloned().ok_or_else(|| Error::UnknownProvider(name.to_string()))
	}

	/// The preferred provider when registered, otherwise the default,
	/// otherwise any chat-capable provider.
	pub fn get_with_fallback(&self, preferred: &str) -> Result<Arc<dyn LlmProvider>> {
		if let Ok(provider) = self.get(preferred) {
			return Ok(provider);
		}
		if let Ok(provider) = self.get(&self.default) {
			return Ok(provider);
		}

		self.providers
			.values()
			.find(|provider| provider.supports(Capability::Chat))
			.cloned()
			.ok_or_else(|| Error::UnknownProvider(preferred.to_string()))
	}

	pub fn default_provider(&self) -> Result<Arc<dyn LlmProvider>> {
		self.get(&self.default)
	}

	pub fn embedding_provider(&self) -> Result<Arc<dyn LlmProvider>> {
		let provider = self.get(&self.embedding)?;

		if !provider.supports(Capability::Embed) {
			return Err(Error::Unsupported {
				provider: self.embedding.clone(),
				operation: "embed",
			});
		}

		Ok(provider)
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use serde_json::Map;

	use super::*;

	fn sample_config() -> recall_config::Config {
		let provider = recall_config::LlmProviderConfig {
			api_base: "http://localhost".to_string(),
			api_key: "key".to_string(),
			model: "model".to_string(),
			timeout_ms: 1_000,
			default_headers: Map::new(),
		};
		let mut providers = HashMap::new();

		providers.insert("anthropic".to_string(), provider.clone());
		providers.insert("openai".to_string(), provider);

		toml_free_config(providers)
	}

	fn toml_free_config(
		providers: HashMap<String, recall_config::LlmProviderConfig>,
	) -> recall_config::Config {
		recall_config::Config {
			service: recall_config::Service::default(),
			database: recall_config::Database {
				url: "postgres://localhost/recall".to_string(),
				max_connections: 1,
			},
			queue: recall_config::Queue::default(),
			llm: recall_config::Llm { default: "anthropic".to_string(), providers },
			embedding: recall_config::Embedding {
				provider: "openai".to_string(),
				api_base: "http://localhost".to_string(),
				api_key: "key".to_string(),
				model: "embed".to_string(),
				dimensions: 4,
				batch_size: 2,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
			chunk: recall_config::ChunkLifecycle::default(),
			retrieval: recall_config::Retrieval::default(),
			context: recall_config::ContextBudget::default(),
			agent: recall_config::Agent::default(),
			adapter: recall_config::Adapter::default(),
		}
	}

	#[test]
	fn builds_providers_and_resolves_roles() {
		let manager = ProviderManager::from_config(&sample_config()).expect("manager");

		assert!(manager.get("anthropic").is_ok());
		assert!(manager.get("openai").is_ok());
		assert!(manager.default_provider().expect("default").supports(Capability::Chat));
		assert!(manager.embedding_provider().expect("embedding").supports(Capability::Embed));
	}

	#[test]
	fn unknown_preferred_falls_back_to_the_default() {
		let manager = ProviderManager::from_config(&sample_config()).expect("manager");
		let provider = manager.get_with_fallback("gemini").expect("fallback");

		assert_eq!(provider.name(), "anthropic");
	}

	#[test]
	fn embed_only_provider_is_synthesized_when_missing() {
		let provider = recall_config::LlmProviderConfig {
			api_base: "http://localhost".to_string(),
			api_key: "key".to_string(),
			model: "model".to_string(),
			timeout_ms: 1_000,
			default_headers: Map::new(),
		};
		let mut providers = HashMap::new();

		providers.insert("anthropic".to_string(), provider);

		let manager = ProviderManager::from_config(&toml_free_config(providers)).expect("manager");
		let embedding = manager.embedding_provider().expect("embedding");

		assert!(embedding.supports(Capability::Embed));
		assert!(!embedding.supports(Capability::Chat));
	}

	#[test]
	fn anthropic_cannot_serve_embeddings() {
		let mut cfg = sample_config();

		cfg.embedding.provider = "anthropic".to_string();

		assert!(matches!(
			ProviderManager::from_config(&cfg),
			Err(Error::InvalidConfig { .. })
		));
	}
}
