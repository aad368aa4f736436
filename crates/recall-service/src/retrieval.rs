use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use recall_providers::CompleteOptions;
use recall_storage::{
	chunk_store::{self, ScoredChunk, SearchFilter},
	models::KnowledgeChunkRow,
};

use crate::{Result, Service, prompts};

const RERANK_MAX_TOKENS: u32 = 100;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SearchOptions {
	pub top_k: Option<u32>,
	pub min_similarity: Option<f32>,
	pub source_types: Option<Vec<String>>,
	pub rerank: Option<bool>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RetrievedChunk {
	pub chunk_id: Uuid,
	pub content: String,
	pub source_type: String,
	pub metadata: Value,
	pub importance: f32,
	pub similarity: f32,
	pub relevance: f32,
	pub tier: String,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}
impl RetrievedChunk {
	fn from_hit(hit: ScoredChunk, relevance: f32) -> Self {
		let ScoredChunk { chunk, similarity } = hit;

		Self {
			chunk_id: chunk.chunk_id,
			content: chunk.content,
			source_type: chunk.source_type,
			metadata: chunk.metadata,
			importance: chunk.importance,
			similarity,
			relevance,
			tier: chunk.tier,
			created_at: chunk.created_at,
		}
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct RecentChunk {
	pub chunk_id: Uuid,
	pub content: String,
	pub source_type: String,
	pub metadata: Value,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}
impl From<KnowledgeChunkRow> for RecentChunk {
	fn from(row: KnowledgeChunkRow) -> Self {
		Self {
			chunk_id: row.chunk_id,
			content: row.content,
			source_type: row.source_type,
			metadata: row.metadata,
			created_at: row.created_at,
		}
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct RetrievalResponse {
	pub chunks: Vec<RetrievedChunk>,
	pub query: String,
	pub total_results: usize,
	pub average_similarity: f32,
	#[serde(with = "time::serde::rfc3339")]
	pub retrieved_at: OffsetDateTime,
}

/// Blend of vector similarity and stored importance used for ordering beyond
/// raw similarity.
pub fn relevance_score(
	similarity: f32,
	importance: f32,
	similarity_weight: f32,
	importance_weight: f32,
) -> f32 {
	similarity_weight * similarity + importance_weight * importance
}

/// Reorders the first `head_len` entries by `order`; the tail is untouched.
pub fn apply_rerank_order<T>(items: Vec<T>, order: &[usize], head_len: usize) -> Vec<T> {
	let mut head: Vec<Option<T>> = Vec::new();
	let mut out = Vec::with_capacity(items.len());
	let mut tail = Vec::new();

	for (index, item) in items.into_iter().enumerate() {
		if index < head_len {
			head.push(Some(item));
		} else {
			tail.push(item);
		}
	}

	for &index in order {
		if let Some(slot) = head.get_mut(index)
			&& let Some(item) = slot.take()
		{
			out.push(item);
		}
	}

	// Anything the order missed keeps its original position ahead of the tail.
	for slot in &mut head {
		if let Some(item) = slot.take() {
			out.push(item);
		}
	}

	out.extend(tail);

	out
}

impl Service {
	pub async fn search(&self, query: &str, opts: &SearchOptions) -> Result<RetrievalResponse> {
		let query = query.trim();

		if query.is_empty() {
			return Err(crate::Error::InvalidRequest {
				message: "Search query must be non-empty.".to_string(),
			});
		}

		let vector = self.providers.embedding.embed(query).await?;
		let filter = SearchFilter {
			source_types: opts.source_types.clone(),
			min_similarity: opts.min_similarity.unwrap_or(self.cfg.retrieval.min_similarity),
			top_k: opts.top_k.unwrap_or(self.cfg.retrieval.top_k),
			..SearchFilter::default()
		};
		let now = OffsetDateTime::now_utc();
		let hits = chunk_store::search(&self.db, &vector, &filter, now).await?;
		let mut chunks: Vec<RetrievedChunk> = hits
			.into_iter()
			.map(|hit| {
				let relevance = relevance_score(
					hit.similarity,
					hit.chunk.importance,
					self.cfg.retrieval.similarity_weight,
					self.cfg.retrieval.importance_weight,
				);

				RetrievedChunk::from_hit(hit, relevance)
			})
			.collect();

		if opts.rerank.unwrap_or(self.cfg.retrieval.rerank) {
			chunks = self.rerank(query, chunks).await;
		}

		let total_results = chunks.len();
		let average_similarity = if chunks.is_empty() {
			0.0
		} else {
			chunks.iter().map(|chunk| chunk.similarity).sum::<f32>() / chunks.len() as f32
		};

		Ok(RetrievalResponse {
			chunks,
			query: query.to_string(),
			total_results,
			average_similarity,
			retrieved_at: now,
		})
	}

	/// LLM rerank of the head of the result list. Failure is non-fatal: any
	/// provider error or unparsable reply leaves the original order standing.
	async fn rerank(&self, query: &str, chunks: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
		let head_len = (self.cfg.retrieval.rerank_candidates as usize).min(chunks.len());

		if head_len < 2 {
			return chunks;
		}

		let docs: Vec<String> =
			chunks.iter().take(head_len).map(|chunk| chunk.content.clone()).collect();
		let prompt = prompts::rerank_prompt(query, &docs);
		let opts = CompleteOptions {
			max_tokens: Some(RERANK_MAX_TOKENS),
			temperature: Some(0.0),
			..CompleteOptions::default()
		};

		match self.providers.chat.complete(&prompt, &opts).await {
			Ok(completion) => {
				let order = prompts::parse_rerank_order(&completion.text, head_len);

				apply_rerank_order(chunks, &order, head_len)
			},
			Err(err) => {
				tracing::warn!(error = %err, "Rerank failed; keeping retrieval order.");

				chunks
			},
		}
	}

	pub async fn get_by_ids(&self, chunk_ids: &[Uuid]) -> Result<Vec<RecentChunk>> {
		let rows = chunk_store::get_by_ids(&self.db, chunk_ids).await?;

		Ok(rows.into_iter().map(RecentChunk::from).collect())
	}

	pub async fn get_recent(
		&self,
		source_type: Option<&str>,
		limit: i64,
	) -> Result<Vec<RecentChunk>> {
		let rows = chunk_store::get_by_source(&self.db, source_type, limit.clamp(1, 100)).await?;

		Ok(rows.into_iter().map(RecentChunk::from).collect())
	}

	/// Nearest neighbors of a stored chunk, using its stored embedding. The
	/// anchor itself is excluded from the results.
	pub async fn find_similar(&self, chunk_id: Uuid, limit: u32) -> Result<Vec<RetrievedChunk>> {
		let vector = chunk_store::get_embedding(&self.db, chunk_id).await?;
		let filter = SearchFilter {
			min_similarity: self.cfg.retrieval.min_similarity,
			top_k: limit.saturating_add(1),
			..SearchFilter::default()
		};
		let now = OffsetDateTime::now_utc();
		let hits = chunk_store::search(&self.db, &vector, &filter, now).await?;
		let chunks = hits
			.into_iter()
			.filter(|hit| hit.chunk.chunk_id != chunk_id)
			.take(limit as usize)
			.map(|hit| {
				let relevance = relevance_score(
					hit.similarity,
					hit.chunk.importance,
					self.cfg.retrieval.similarity_weight,
					self.cfg.retrieval.importance_weight,
				);

				RetrievedChunk::from_hit(hit, relevance)
			})
			.collect();

		Ok(chunks)
	}

	pub async fn stats(&self) -> Result<chunk_store::StoreStats> {
		Ok(chunk_store::stats(&self.db).await?)
	}
}
