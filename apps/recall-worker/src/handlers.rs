// std
use std::sync::Arc;

// crates.io
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// self
use recall_agent::{Agent, AgentOptions, ToolContext};
use recall_service::{
	Service,
	ingest::{IngestionJob, ProcessingJob},
	pipeline::EmbeddingJob,
};
use recall_storage::{
	models::QueueJobRow,
	queue::{AGENT_TASKS_QUEUE, EMBEDDING_QUEUE, INGESTION_QUEUE, PROCESSING_QUEUE},
};

use crate::worker::{BoxFuture, JobHandler};

/// Payload of an `agent-tasks` queue job: a deferred natural-language query.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AgentTaskJob {
	pub query: String,
	pub user_id: Option<String>,
}

fn decode<T: serde::de::DeserializeOwned>(job: &QueueJobRow) -> Result<T, String> {
	serde_json::from_value(job.payload.clone())
		.map_err(|err| format!("Malformed {} payload: {err}.", job.queue))
}

/// Stages durably-enqueued adapter events into the event log.
pub struct IngestionHandler {
	pub service: Arc<Service>,
}
impl JobHandler for IngestionHandler {
	fn queue(&self) -> &'static str {
		INGESTION_QUEUE
	}

	fn handle<'a>(&'a self, job: &'a QueueJobRow) -> BoxFuture<'a, Result<(), String>> {
		Box::pin(async move {
			let payload: IngestionJob = decode(job)?;

			self.service.ingest_event(&payload.event).await.map_err(|err| err.to_string())?;

			Ok(())
		})
	}
}

/// Enrichment and summarization stage.
pub struct ProcessingHandler {
	pub service: Arc<Service>,
}
impl JobHandler for ProcessingHandler {
	fn queue(&self) -> &'static str {
		PROCESSING_QUEUE
	}

	fn handle<'a>(&'a self, job: &'a QueueJobRow) -> BoxFuture<'a, Result<(), String>> {
		Box::pin(async move {
			let payload: ProcessingJob = decode(job)?;

			self.service.process_event(payload.event_id).await.map_err(|err| err.to_string())?;

			Ok(())
		})
	}

	fn exhausted<'a>(&'a self, job: &'a QueueJobRow) -> BoxFuture<'a, ()> {
		Box::pin(async move {
			mark_event_failed(&self.service, job).await;
		})
	}
}

/// Embedding and storage stage.
pub struct EmbeddingHandler {
	pub service: Arc<Service>,
}
impl JobHandler for EmbeddingHandler {
	fn queue(&self) -> &'static str {
		EMBEDDING_QUEUE
	}

	fn handle<'a>(&'a self, job: &'a QueueJobRow) -> BoxFuture<'a, Result<(), String>> {
		Box::pin(async move {
			let payload: EmbeddingJob = decode(job)?;

			self.service.embed_and_store(&payload).await.map_err(|err| err.to_string())?;

			Ok(())
		})
	}

	fn exhausted<'a>(&'a self, job: &'a QueueJobRow) -> BoxFuture<'a, ()> {
		Box::pin(async move {
			mark_event_failed(&self.service, job).await;
		})
	}
}

/// Deferred agent queries. Delivery of the answer back to the source channel
/// is the adapter's concern; the worker records the outcome.
pub struct AgentTaskHandler {
	pub service: Arc<Service>,
	pub agent: Arc<Agent>,
}
impl JobHandler for AgentTaskHandler {
	fn queue(&self) -> &'static str {
		AGENT_TASKS_QUEUE
	}

	fn handle<'a>(&'a self, job: &'a QueueJobRow) -> BoxFuture<'a, Result<(), String>> {
		Box::pin(async move {
			let payload: AgentTaskJob = decode(job)?;
			let opts = AgentOptions::from_config(&self.service.cfg.agent);
			let ctx = ToolContext { user_id: payload.user_id.clone() };
			let outcome = self
				.agent
				.run(&payload.query, &[], &opts, &ctx)
				.await
				.map_err(|err| err.to_string())?;

			info!(
				job_id = %job.job_id,
				success = outcome.success,
				iterations = outcome.iterations,
				tools = ?outcome.tools_used,
				response = %outcome.response,
				"Agent task finished."
			);

			Ok(())
		})
	}
}

async fn mark_event_failed(service: &Service, job: &QueueJobRow) {
	let event_id = job
		.payload
		.get("event_id")
		.and_then(|value| value.as_str().map(|raw| raw.to_string()))
		.and_then(|raw| uuid::Uuid::parse_str(&raw).ok());
	let Some(event_id) = event_id else {
		warn!(job_id = %job.job_id, "Exhausted job payload has no event id.");

		return;
	};

	if let Err(err) = service.fail_event(event_id).await {
		error!(%event_id, error = %err, "Failed to mark event failed.");
	} else {
		warn!(%event_id, queue = %job.queue, "Event marked failed after retries.");
	}
}
