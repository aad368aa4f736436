use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use recall_domain::event::NewRawEvent;
use recall_storage::{
	event_log::{self, InsertOutcome},
	queue::{self, EnqueueOptions, PROCESSING_QUEUE},
};

use crate::{Result, Service};

/// Payload of an `ingestion` queue job: a full adapter event, staged durably
/// before it has a row in the event log.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct IngestionJob {
	pub event: NewRawEvent,
}

/// Payload of a `processing` queue job.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct ProcessingJob {
	pub event_id: Uuid,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IngestOutcome {
	Ingested(Uuid),
	/// The event was already on file; nothing new was written or enqueued.
	Duplicate(Uuid),
}
impl IngestOutcome {
	pub fn event_id(self) -> Uuid {
		match self {
			Self::Ingested(id) | Self::Duplicate(id) => id,
		}
	}
}

impl Service {
	/// Persists one adapter event and hands it to the pipeline. Repeat
	/// deliveries of the same `(source, external_id)` collapse onto the first
	/// row, so the at-least-once queue upstream stays safe.
	pub async fn ingest_event(&self, event: &NewRawEvent) -> Result<IngestOutcome> {
		let now = OffsetDateTime::now_utc();

		if let Some(external_id) = event.external_id.as_deref()
			&& let Some(existing) =
				event_log::find_by_external_id(&self.db, &event.source, external_id).await?
		{
			tracing::debug!(
				source = %event.source,
				external_id,
				event_id = %existing.event_id,
				"Dropping already-ingested event."
			);

			return Ok(IngestOutcome::Duplicate(existing.event_id));
		}

		let outcome = event_log::insert(&self.db, event, now).await?;
		let event_id = outcome.event_id();

		if let InsertOutcome::Duplicate(_) = outcome {
			return Ok(IngestOutcome::Duplicate(event_id));
		}

		queue::add(
			&self.db,
			PROCESSING_QUEUE,
			&json!({ "event_id": event_id }),
			EnqueueOptions::default(),
			now,
		)
		.await?;

		Ok(IngestOutcome::Ingested(event_id))
	}
}
