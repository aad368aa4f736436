use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

use recall_domain::{
	enrich::{self, Enrichment},
	event::ProcessingStatus,
	summary::truncate_summary,
};
use recall_providers::CompleteOptions;
use recall_storage::{
	chunk_store::{self, NewChunk, StoreOutcome},
	event_log,
	models::RawEventRow,
	queue::{self, EMBEDDING_QUEUE, EnqueueOptions},
};

use crate::{Error, Result, Service, prompts};

const SUMMARY_MAX_TOKENS: u32 = 200;
const SUMMARY_TEMPERATURE: f32 = 0.3;

/// Payload of an `embedding` queue job: everything the storage stage needs,
/// so a retry never repeats the summarization call.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EmbeddingJob {
	pub event_id: Uuid,
	pub summary: String,
	pub source_type: String,
	pub importance: f32,
	pub metadata: Value,
}

#[derive(Clone, Debug)]
pub struct SummaryOutcome {
	pub summary: String,
	pub tokens_used: u32,
	pub fallback: bool,
}

pub fn content_hash(text: &str) -> String {
	let digest = Sha256::digest(text.as_bytes());

	format!("{digest:x}")
}

impl Service {
	/// The `processing` stage: enrich and summarize one raw event, then hand
	/// off to the `embedding` queue. Transient provider failures inside
	/// summarization degrade to a truncation summary instead of failing.
	pub async fn process_event(&self, event_id: Uuid) -> Result<()> {
		let Some(event) = event_log::get(&self.db, event_id).await? else {
			tracing::warn!(%event_id, "Raw event missing for processing job.");

			return Ok(());
		};

		if event.processing_status == ProcessingStatus::Completed.as_str() {
			return Ok(());
		}

		let now = OffsetDateTime::now_utc();

		event_log::mark_status(&self.db, event_id, ProcessingStatus::Processing, now).await?;

		let enrichment = enrich::enrich(&event.source, &event.payload);

		if enrichment.text.trim().is_empty() {
			// Nothing to index. The event still terminates.
			tracing::debug!(%event_id, source = %event.source, "Event has no extractable text.");
			event_log::mark_status(&self.db, event_id, ProcessingStatus::Completed, now).await?;

			return Ok(());
		}

		let summary = self.summarize(&event, &enrichment).await;
		let metadata = chunk_metadata(&event, &enrichment, &summary);
		let job = EmbeddingJob {
			event_id,
			summary: summary.summary,
			source_type: event.source.clone(),
			importance: enrichment.importance,
			metadata,
		};
		let payload = serde_json::to_value(&job).map_err(|err| Error::InvalidRequest {
			message: format!("Failed to encode embedding job: {err}."),
		})?;

		queue::add(&self.db, EMBEDDING_QUEUE, &payload, EnqueueOptions::default(), now).await?;

		Ok(())
	}

	/// Summarization never fails the pipeline: any provider error falls back
	/// to a truncation summary.
	pub async fn summarize(&self, event: &RawEventRow, enrichment: &Enrichment) -> SummaryOutcome {
		let prompt = prompts::summary_prompt(
			&event.source,
			&event.event_type,
			&enrichment.text,
			&enrichment.entities,
		);
		let opts = CompleteOptions {
			max_tokens: Some(SUMMARY_MAX_TOKENS),
			temperature: Some(SUMMARY_TEMPERATURE),
			..CompleteOptions::default()
		};

		match self.providers.chat.complete(&prompt, &opts).await {
			Ok(completion) if !completion.text.trim().is_empty() => SummaryOutcome {
				summary: completion.text.trim().to_string(),
				tokens_used: completion.tokens_used,
				fallback: false,
			},
			Ok(_) => {
				tracing::warn!(event_id = %event.event_id, "Summarizer returned empty text.");

				SummaryOutcome {
					summary: truncate_summary(&enrichment.text),
					tokens_used: 0,
					fallback: true,
				}
			},
			Err(err) => {
				tracing::warn!(
					event_id = %event.event_id,
					error = %err,
					"Summarization failed; falling back to truncation."
				);

				SummaryOutcome {
					summary: truncate_summary(&enrichment.text),
					tokens_used: 0,
					fallback: true,
				}
			},
		}
	}

	/// The `embedding` stage: hash, embed, store, complete. Provider errors
	/// propagate so the queue retries; the chunk write is idempotent on the
	/// content hash.
	pub async fn embed_and_store(&self, job: &EmbeddingJob) -> Result<()> {
		let Some(event) = event_log::get(&self.db, job.event_id).await? else {
			tracing::warn!(event_id = %job.event_id, "Raw event missing for embedding job.");

			return Ok(());
		};

		if event.processing_status == ProcessingStatus::Completed.as_str() {
			return Ok(());
		}

		let hash = content_hash(&job.summary);
		let vector = self.providers.embedding.embed(&job.summary).await?;
		let expected = self.cfg.embedding.dimensions as usize;

		if vector.len() != expected {
			return Err(Error::InvalidRequest {
				message: format!(
					"Embedding dimension {} does not match the configured {expected}.",
					vector.len()
				),
			});
		}

		let chunk = NewChunk {
			content: job.summary.clone(),
			content_hash: hash,
			source_type: job.source_type.clone(),
			source_event_id: job.event_id,
			metadata: job.metadata.clone(),
			importance: job.importance.clamp(0.0, 1.0),
			embedding: vector,
			embedding_model: self.cfg.embedding.model.clone(),
		};
		let now = OffsetDateTime::now_utc();
		let outcome = chunk_store::store(&self.db, &chunk, now).await?;

		if let StoreOutcome::Deduplicated(existing) = outcome {
			tracing::debug!(
				event_id = %job.event_id,
				chunk_id = %existing,
				"Chunk content already stored."
			);
		}

		event_log::mark_status(&self.db, job.event_id, ProcessingStatus::Completed, now).await?;

		Ok(())
	}

	/// Called when a pipeline job exhausts its attempts.
	pub async fn fail_event(&self, event_id: Uuid) -> Result<()> {
		let now = OffsetDateTime::now_utc();

		event_log::mark_status(&self.db, event_id, ProcessingStatus::Failed, now).await?;

		Ok(())
	}
}

fn chunk_metadata(event: &RawEventRow, enrichment: &Enrichment, summary: &SummaryOutcome) -> Value {
	json!({
		"event_type": event.event_type,
		"external_id": event.external_id,
		"entities": enrichment.entities,
		"summary_fallback": summary.fallback,
		"summary_tokens": summary.tokens_used,
	})
}
