// std
use std::sync::Arc;

// self
use recall_agent::{Agent, ServiceContext, registry_with_memory_tools};
use recall_providers::ProviderManager;
use recall_service::{Providers, Service};
use recall_storage::db::Db;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<Service>,
	pub agent: Arc<Agent>,
}
impl AppState {
	pub async fn new(config: recall_config::Config) -> color_eyre::Result<Self> {
		let db = Db::connect(&config.database).await?;

		db.ensure_schema(config.embedding.dimensions).await?;

		let manager = ProviderManager::from_config(&config)?;
		let providers = Providers::from_manager(&config, &manager)?;
		let service = Arc::new(Service::new(config, db, providers));

		Ok(Self::from_service(service))
	}

	/// Builds the agent on top of an existing service. Tests use this to
	/// inject scripted providers.
	pub fn from_service(service: Arc<Service>) -> Self {
		let agent = Arc::new(
			Agent::new(service.providers.chat.clone(), registry_with_memory_tools(&service))
				.with_context(Arc::new(ServiceContext::new(service.clone()))),
		);

		Self { service, agent }
	}
}
