use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use recall_domain::tier::Tier;

use crate::{
	Error, Result,
	db::Db,
	models::KnowledgeChunkRow,
	vector::{parse_pg_vector, vector_to_pg},
};

const CHUNK_COLUMNS: &str = "\
chunk_id, content, content_hash, source_type, source_event_id, metadata, importance, \
embedding_model, tier, access_count, last_accessed_at, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct NewChunk {
	pub content: String,
	pub content_hash: String,
	pub source_type: String,
	pub source_event_id: Uuid,
	pub metadata: Value,
	pub importance: f32,
	pub embedding: Vec<f32>,
	pub embedding_model: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreOutcome {
	Stored(Uuid),
	/// A chunk with the same content hash already exists; the stored row is
	/// left untouched.
	Deduplicated(Uuid),
}
impl StoreOutcome {
	pub fn chunk_id(self) -> Uuid {
		match self {
			Self::Stored(id) | Self::Deduplicated(id) => id,
		}
	}
}

#[derive(Clone, Debug)]
pub struct SearchFilter {
	pub source_types: Option<Vec<String>>,
	pub tiers: Vec<Tier>,
	pub min_similarity: f32,
	pub top_k: u32,
}
impl Default for SearchFilter {
	fn default() -> Self {
		Self {
			source_types: None,
			tiers: vec![Tier::Hot, Tier::Warm],
			min_similarity: 0.7,
			top_k: 20,
		}
	}
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ScoredChunk {
	#[sqlx(flatten)]
	pub chunk: KnowledgeChunkRow,
	pub similarity: f32,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct StoreStats {
	pub total: i64,
	pub by_tier: HashMap<String, i64>,
	pub by_source: HashMap<String, i64>,
}

#[derive(Clone, Copy, Debug)]
pub struct TierPolicy {
	pub hot_after: Duration,
	pub warm_after: Duration,
	pub hot_min_access: i64,
	pub warm_min_access: i64,
}
impl TierPolicy {
	pub fn from_config(cfg: &recall_config::ChunkLifecycle) -> Self {
		Self {
			hot_after: Duration::days(cfg.hot_to_warm_days),
			warm_after: Duration::days(cfg.warm_to_cold_days),
			hot_min_access: cfg.hot_min_access,
			warm_min_access: cfg.warm_min_access,
		}
	}
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DemotionReport {
	pub hot_to_warm: u64,
	pub warm_to_cold: u64,
}

pub async fn store(db: &Db, chunk: &NewChunk, now: OffsetDateTime) -> Result<StoreOutcome> {
	let chunk_id = Uuid::new_v4();
	let result = sqlx::query(
		"\
INSERT INTO knowledge_chunks (
	chunk_id,
	content,
	content_hash,
	source_type,
	source_event_id,
	metadata,
	importance,
	embedding,
	embedding_model,
	tier,
	access_count,
	created_at,
	updated_at
)
VALUES ($1,$2,$3,$4,$5,$6,$7,$8::text::vector,$9,'hot',0,$10,$10)
ON CONFLICT (content_hash) DO NOTHING",
	)
	.bind(chunk_id)
	.bind(&chunk.content)
	.bind(&chunk.content_hash)
	.bind(&chunk.source_type)
	.bind(chunk.source_event_id)
	.bind(&chunk.metadata)
	.bind(chunk.importance)
	.bind(vector_to_pg(&chunk.embedding))
	.bind(&chunk.embedding_model)
	.bind(now)
	.execute(&db.pool)
	.await?;

	if result.rows_affected() > 0 {
		return Ok(StoreOutcome::Stored(chunk_id));
	}

	let existing: (Uuid,) =
		sqlx::query_as("SELECT chunk_id FROM knowledge_chunks WHERE content_hash = $1")
			.bind(&chunk.content_hash)
			.fetch_one(&db.pool)
			.await?;

	Ok(StoreOutcome::Deduplicated(existing.0))
}

/// Cosine similarity search over the embedding column, strictly descending,
/// ties broken by newer `created_at` then ascending chunk id. Access stats for
/// the returned rows are bumped in one batched update.
pub async fn search(
	db: &Db,
	query: &[f32],
	filter: &SearchFilter,
	now: OffsetDateTime,
) -> Result<Vec<ScoredChunk>> {
	if filter.top_k == 0 {
		return Ok(Vec::new());
	}

	let query_text = vector_to_pg(query);
	let tiers: Vec<String> = filter.tiers.iter().map(|tier| tier.as_str().to_string()).collect();
	let mut builder = sqlx::QueryBuilder::new(format!(
		"SELECT {CHUNK_COLUMNS}, (1 - (embedding <=> "
	));

	builder.push_bind(query_text.clone());
	builder.push("::text::vector))::real AS similarity FROM knowledge_chunks WHERE tier = ANY(");
	builder.push_bind(tiers);
	builder.push(") AND (1 - (embedding <=> ");
	builder.push_bind(query_text);
	builder.push("::text::vector)) >= ");
	builder.push_bind(filter.min_similarity);

	if let Some(sources) = filter.source_types.as_ref() {
		builder.push(" AND source_type = ANY(");
		builder.push_bind(sources.clone());
		builder.push(")");
	}

	builder.push(" ORDER BY similarity DESC, created_at DESC, chunk_id ASC LIMIT ");
	builder.push_bind(filter.top_k as i64);

	let hits: Vec<ScoredChunk> = builder.build_query_as().fetch_all(&db.pool).await?;

	if !hits.is_empty() {
		let ids: Vec<Uuid> = hits.iter().map(|hit| hit.chunk.chunk_id).collect();

		sqlx::query(
			"UPDATE knowledge_chunks \
			 SET access_count = access_count + 1, last_accessed_at = $1 \
			 WHERE chunk_id = ANY($2)",
		)
		.bind(now)
		.bind(&ids[..])
		.execute(&db.pool)
		.await?;
	}

	Ok(hits)
}

pub async fn get_by_id(db: &Db, chunk_id: Uuid) -> Result<Option<KnowledgeChunkRow>> {
	let row = sqlx::query_as::<_, KnowledgeChunkRow>(&format!(
		"SELECT {CHUNK_COLUMNS} FROM knowledge_chunks WHERE chunk_id = $1"
	))
	.bind(chunk_id)
	.fetch_optional(&db.pool)
	.await?;

	Ok(row)
}

pub async fn get_by_ids(db: &Db, chunk_ids: &[Uuid]) -> Result<Vec<KnowledgeChunkRow>> {
	if chunk_ids.is_empty() {
		return Ok(Vec::new());
	}

	let rows = sqlx::query_as::<_, KnowledgeChunkRow>(&format!(
		"SELECT {CHUNK_COLUMNS} FROM knowledge_chunks WHERE chunk_id = ANY($1)"
	))
	.bind(chunk_ids)
	.fetch_all(&db.pool)
	.await?;

	Ok(rows)
}

pub async fn get_by_source(
	db: &Db,
	source_type: Option<&str>,
	limit: i64,
) -> Result<Vec<KnowledgeChunkRow>> {
	let mut builder =
		sqlx::QueryBuilder::new(format!("SELECT {CHUNK_COLUMNS} FROM knowledge_chunks"));

	if let Some(source_type) = source_type {
		builder.push(" WHERE source_type = ");
		builder.push_bind(source_type);
	}

	builder.push(" ORDER BY created_at DESC LIMIT ");
	builder.push_bind(limit);

	let rows = builder.build_query_as().fetch_all(&db.pool).await?;

	Ok(rows)
}

pub async fn get_embedding(db: &Db, chunk_id: Uuid) -> Result<Vec<f32>> {
	let row: Option<(String,)> =
		sqlx::query_as("SELECT embedding::text FROM knowledge_chunks WHERE chunk_id = $1")
			.bind(chunk_id)
			.fetch_optional(&db.pool)
			.await?;
	let Some((text,)) = row else {
		return Err(Error::NotFound(format!("No chunk with id {chunk_id}.")));
	};

	parse_pg_vector(&text)
}

pub async fn stats(db: &Db) -> Result<StoreStats> {
	let total: (i64,) =
		sqlx::query_as("SELECT COUNT(*) FROM knowledge_chunks").fetch_one(&db.pool).await?;
	let tiers: Vec<(String, i64)> =
		sqlx::query_as("SELECT tier, COUNT(*) FROM knowledge_chunks GROUP BY tier")
			.fetch_all(&db.pool)
			.await?;
	let sources: Vec<(String, i64)> =
		sqlx::query_as("SELECT source_type, COUNT(*) FROM knowledge_chunks GROUP BY source_type")
			.fetch_all(&db.pool)
			.await?;

	Ok(StoreStats {
		total: total.0,
		by_tier: tiers.into_iter().collect(),
		by_source: sources.into_iter().collect(),
	})
}

/// Lifecycle demotion: hot chunks older than the hot window with little
/// access drop to warm, and likewise warm to cold. Chunks are never deleted.
pub async fn demote(db: &Db, policy: &TierPolicy, now: OffsetDateTime) -> Result<DemotionReport> {
	let mut report = DemotionReport::default();
	let passes = [
		(Tier::Hot, policy.hot_after, policy.hot_min_access),
		(Tier::Warm, policy.warm_after, policy.warm_min_access),
	];

	for (tier, age, min_access) in passes {
		let Some(target) = tier.demoted() else {
			continue;
		};
		let cutoff = now - age;
		let result = sqlx::query(
			"\
UPDATE knowledge_chunks
SET tier = $1, updated_at = $2
WHERE tier = $3 AND created_at <= $4 AND access_count < $5",
		)
		.bind(target.as_str())
		.bind(now)
		.bind(tier.as_str())
		.bind(cutoff)
		.bind(min_access)
		.execute(&db.pool)
		.await?;

		match tier {
			Tier::Hot => report.hot_to_warm = result.rows_affected(),
			Tier::Warm => report.warm_to_cold = result.rows_affected(),
			Tier::Cold => {},
		}
	}

	Ok(report)
}
