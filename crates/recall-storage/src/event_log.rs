use time::OffsetDateTime;
use uuid::Uuid;

use recall_domain::event::{NewRawEvent, ProcessingStatus};

use crate::{Error, Result, db::Db, models::RawEventRow};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InsertOutcome {
	Inserted(Uuid),
	/// `(source, external_id)` already exists; carries the surviving row's id.
	Duplicate(Uuid),
}
impl InsertOutcome {
	pub fn event_id(self) -> Uuid {
		match self {
			Self::Inserted(id) | Self::Duplicate(id) => id,
		}
	}
}

pub async fn insert(db: &Db, event: &NewRawEvent, now: OffsetDateTime) -> Result<InsertOutcome> {
	let event_id = Uuid::new_v4();
	let result = sqlx::query(
		"\
INSERT INTO raw_events (
	event_id,
	source,
	event_type,
	external_id,
	payload,
	metadata,
	ingested_at,
	processing_status
)
VALUES ($1,$2,$3,$4,$5,$6,$7,'pending')
ON CONFLICT (source, external_id) WHERE external_id IS NOT NULL DO NOTHING",
	)
	.bind(event_id)
	.bind(&event.source)
	.bind(&event.event_type)
	.bind(&event.external_id)
	.bind(&event.payload)
	.bind(&event.metadata)
	.bind(now)
	.execute(&db.pool)
	.await?;

	if result.rows_affected() > 0 {
		return Ok(InsertOutcome::Inserted(event_id));
	}

	let Some(external_id) = event.external_id.as_deref() else {
		// Without an external id there is no conflict target, so a zero-row
		// insert can only mean a primary-key collision.
		return Err(Error::InvalidArgument("Event id collided on insert.".to_string()));
	};
	let existing: (Uuid,) =
		sqlx::query_as("SELECT event_id FROM raw_events WHERE source = $1 AND external_id = $2")
			.bind(&event.source)
			.bind(external_id)
			.fetch_one(&db.pool)
			.await?;

	Ok(InsertOutcome::Duplicate(existing.0))
}

/// Idempotent status transition. `processed_at` is stamped once the event
/// reaches a terminal status and left untouched otherwise.
pub async fn mark_status(
	db: &Db,
	event_id: Uuid,
	status: ProcessingStatus,
	at: OffsetDateTime,
) -> Result<()> {
	sqlx::query(
		"\
UPDATE raw_events
SET processing_status = $2,
	processed_at = CASE WHEN $3 THEN COALESCE(processed_at, $4) ELSE processed_at END
WHERE event_id = $1",
	)
	.bind(event_id)
	.bind(status.as_str())
	.bind(status.is_terminal())
	.bind(at)
	.execute(&db.pool)
	.await?;

	Ok(())
}

pub async fn get(db: &Db, event_id: Uuid) -> Result<Option<RawEventRow>> {
	let row = sqlx::query_as::<_, RawEventRow>(
		"\
SELECT event_id, source, event_type, external_id, payload, metadata, ingested_at, processed_at,
	processing_status
FROM raw_events
WHERE event_id = $1",
	)
	.bind(event_id)
	.fetch_optional(&db.pool)
	.await?;

	Ok(row)
}

pub async fn find_by_external_id(
	db: &Db,
	source: &str,
	external_id: &str,
) -> Result<Option<RawEventRow>> {
	let row = sqlx::query_as::<_, RawEventRow>(
		"\
SELECT event_id, source, event_type, external_id, payload, metadata, ingested_at, processed_at,
	processing_status
FROM raw_events
WHERE source = $1 AND external_id = $2",
	)
	.bind(source)
	.bind(external_id)
	.fetch_optional(&db.pool)
	.await?;

	Ok(row)
}

/// Recovery scan over events that never reached a terminal status.
pub async fn get_pending(db: &Db, limit: i64) -> Result<Vec<RawEventRow>> {
	let rows = sqlx::query_as::<_, RawEventRow>(
		"\
SELECT event_id, source, event_type, external_id, payload, metadata, ingested_at, processed_at,
	processing_status
FROM raw_events
WHERE processing_status = 'pending'
ORDER BY ingested_at ASC
LIMIT $1",
	)
	.bind(limit)
	.fetch_all(&db.pool)
	.await?;

	Ok(rows)
}
