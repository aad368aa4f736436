pub mod context;
pub mod ingest;
pub mod pipeline;
pub mod prompts;
pub mod retrieval;

mod error;

pub use error::{Error, Result};

use std::sync::Arc;

use recall_config::Config;
use recall_providers::{LlmProvider, ProviderManager};
use recall_storage::db::Db;

/// Provider seams for the service: the chat model used for summarization,
/// rerank, and the agent, plus the embedding back-end.
#[derive(Clone)]
pub struct Providers {
	pub chat: Arc<dyn LlmProvider>,
	pub embedding: Arc<dyn LlmProvider>,
}
impl Providers {
	pub fn from_manager(cfg: &Config, manager: &ProviderManager) -> Result<Self> {
		let chat = manager.get_with_fallback(&cfg.llm.default)?;
		let embedding = manager.embedding_provider()?;

		Ok(Self { chat, embedding })
	}
}

pub struct Service {
	pub cfg: Config,
	pub db: Db,
	pub providers: Providers,
}
impl Service {
	pub fn new(cfg: Config, db: Db, providers: Providers) -> Self {
		Self { cfg, db, providers }
	}
}
