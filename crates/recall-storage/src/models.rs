use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct RawEventRow {
	pub event_id: Uuid,
	pub source: String,
	pub event_type: String,
	pub external_id: Option<String>,
	pub payload: Value,
	pub metadata: Value,
	pub ingested_at: OffsetDateTime,
	pub processed_at: Option<OffsetDateTime>,
	pub processing_status: String,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct KnowledgeChunkRow {
	pub chunk_id: Uuid,
	pub content: String,
	pub content_hash: String,
	pub source_type: String,
	pub source_event_id: Uuid,
	pub metadata: Value,
	pub importance: f32,
	pub embedding_model: String,
	pub tier: String,
	pub access_count: i64,
	pub last_accessed_at: Option<OffsetDateTime>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct QueueJobRow {
	pub job_id: Uuid,
	pub queue: String,
	pub payload: Value,
	pub priority: i32,
	pub state: String,
	pub attempts: i32,
	pub max_attempts: i32,
	pub last_error: Option<String>,
	pub available_at: OffsetDateTime,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
	pub completed_at: Option<OffsetDateTime>,
}
