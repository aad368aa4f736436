use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use recall_domain::tokens;
use recall_providers::Role;

use crate::{Result, Service, retrieval::{RetrievedChunk, SearchOptions}};

const CHUNK_SEPARATOR: &str = "\n---\n";
const CANDIDATE_LIMIT: u32 = 30;

#[derive(Clone, Debug)]
pub struct ContextOptions {
	pub max_tokens: u32,
	pub system_prompt: String,
	pub include_history: bool,
	pub max_history: usize,
	pub relevance_threshold: f32,
	pub format_reserve: u32,
}
impl ContextOptions {
	pub fn from_config(cfg: &recall_config::ContextBudget, system_prompt: impl Into<String>) -> Self {
		Self {
			max_tokens: cfg.max_tokens,
			system_prompt: system_prompt.into(),
			include_history: true,
			max_history: cfg.max_history as usize,
			relevance_threshold: cfg.relevance_threshold,
			format_reserve: cfg.format_reserve,
		}
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ConversationMessage {
	pub role: Role,
	pub content: String,
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
}

#[derive(Clone, Debug, Serialize)]
pub struct ContextMetadata {
	pub chunks_used: usize,
	pub total_tokens: u32,
	pub average_relevance: f32,
	pub sources: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct BuiltContext {
	pub system_prompt: String,
	pub knowledge_context: String,
	pub conversation_history: Vec<ConversationMessage>,
	pub metadata: ContextMetadata,
}

impl Service {
	/// Retrieves candidates for the query and assembles a token-bounded prompt
	/// context from them plus the trailing conversation history.
	pub async fn build_context(
		&self,
		query: &str,
		opts: &ContextOptions,
		history: &[ConversationMessage],
	) -> Result<BuiltContext> {
		let search_opts = SearchOptions {
			top_k: Some(CANDIDATE_LIMIT),
			min_similarity: Some(opts.relevance_threshold),
			..SearchOptions::default()
		};
		let retrieved = self.search(query, &search_opts).await?;

		Ok(assemble(&retrieved.chunks, opts, history))
	}
}

/// Pure assembly step: greedy selection in similarity-descending order until
/// the next chunk would break the budget, keeping a formatting reserve.
pub fn assemble(
	chunks: &[RetrievedChunk],
	opts: &ContextOptions,
	history: &[ConversationMessage],
) -> BuiltContext {
	let mut used_tokens = tokens::estimate(&opts.system_prompt);
	let conversation_history: Vec<ConversationMessage> = if opts.include_history {
		let skip = history.len().saturating_sub(opts.max_history);

		history[skip..].to_vec()
	} else {
		Vec::new()
	};

	for message in &conversation_history {
		used_tokens = used_tokens.saturating_add(tokens::estimate(&message.content));
	}

	let budget = opts.max_tokens.saturating_sub(opts.format_reserve);
	let separator_tokens = tokens::estimate(CHUNK_SEPARATOR);
	let mut blocks: Vec<String> = Vec::new();
	let mut selected: Vec<&RetrievedChunk> = Vec::new();

	for chunk in chunks {
		let block = format_chunk(chunk);
		let mut cost = tokens::estimate(&block);

		if !blocks.is_empty() {
			cost = cost.saturating_add(separator_tokens);
		}
		if used_tokens.saturating_add(cost) > budget {
			break;
		}

		used_tokens += cost;

		blocks.push(block);
		selected.push(chunk);
	}

	let average_relevance = if selected.is_empty() {
		0.0
	} else {
		selected.iter().map(|chunk| chunk.relevance).sum::<f32>() / selected.len() as f32
	};
	let mut sources: Vec<String> = Vec::new();

	for chunk in &selected {
		if !sources.iter().any(|source| source == &chunk.source_type) {
			sources.push(chunk.source_type.clone());
		}
	}

	BuiltContext {
		system_prompt: opts.system_prompt.clone(),
		knowledge_context: blocks.join(CHUNK_SEPARATOR),
		conversation_history,
		metadata: ContextMetadata {
			chunks_used: selected.len(),
			total_tokens: used_tokens,
			average_relevance,
			sources,
		},
	}
}

fn format_chunk(chunk: &RetrievedChunk) -> String {
	let relevance_pct = (chunk.relevance * 100.0).round() as i64;

	format!(
		"[Source: {} | Relevance: {relevance_pct}%]\n\n{}",
		chunk.source_type, chunk.content
	)
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use time::macros::datetime;
	use uuid::Uuid;

	use super::*;

	fn chunk(content: &str, source: &str, relevance: f32) -> RetrievedChunk {
		RetrievedChunk {
			chunk_id: Uuid::new_v4(),
			content: content.to_string(),
			source_type: source.to_string(),
			metadata: json!({}),
			importance: 0.5,
			similarity: relevance,
			relevance,
			tier: "hot".to_string(),
			created_at: datetime!(2026-07-01 12:00 UTC),
		}
	}

	fn options(max_tokens: u32) -> ContextOptions {
		ContextOptions {
			max_tokens,
			system_prompt: "You are the team's memory.".to_string(),
			include_history: true,
			max_history: 10,
			relevance_threshold: 0.6,
			format_reserve: 500,
		}
	}

	#[test]
	fn stays_inside_the_token_budget_and_omits_overflow() {
		let chunks: Vec<RetrievedChunk> =
			(0..50).map(|i| chunk(&"x".repeat(400), if i % 2 == 0 { "slack" } else { "jira" }, 0.9)).collect();
		let opts = options(1_000);
		let built = assemble(&chunks, &opts, &[]);
		let estimated = tokens::estimate(&built.system_prompt)
			+ tokens::estimate(&built.knowledge_context);

		assert!(estimated <= 1_000, "estimated {estimated} tokens");
		assert!(built.metadata.chunks_used < chunks.len(), "nothing was omitted");
		assert!(built.metadata.chunks_used > 0);
	}

	#[test]
	fn history_is_truncated_to_the_last_n_messages() {
		let history: Vec<ConversationMessage> = (0..15)
			.map(|i| ConversationMessage {
				role: if i % 2 == 0 { Role::User } else { Role::Assistant },
				content: format!("message {i}"),
				timestamp: datetime!(2026-07-01 12:00 UTC),
			})
			.collect();
		let built = assemble(&[], &options(8_000), &history);

		assert_eq!(built.conversation_history.len(), 10);
		assert_eq!(built.conversation_history[0].content, "message 5");
		assert_eq!(built.conversation_history[9].content, "message 14");
	}

	#[test]
	fn history_is_dropped_when_not_requested() {
		let history = vec![ConversationMessage {
			role: Role::User,
			content: "hello".to_string(),
			timestamp: datetime!(2026-07-01 12:00 UTC),
		}];
		let mut opts = options(8_000);

		opts.include_history = false;

		let built = assemble(&[], &opts, &history);

		assert!(built.conversation_history.is_empty());
	}

	#[test]
	fn chunk_blocks_carry_source_and_relevance() {
		let built = assemble(&[chunk("JWT won the debate", "slack", 0.82)], &options(8_000), &[]);

		assert!(built.knowledge_context.starts_with("[Source: slack | Relevance: 82%]"));
		assert!(built.knowledge_context.ends_with("JWT won the debate"));
		assert_eq!(built.metadata.sources, vec!["slack"]);
	}

	#[test]
	fn chunks_are_joined_with_the_separator() {
		let built = assemble(
			&[chunk("first", "slack", 0.9), chunk("second", "git", 0.8)],
			&options(8_000),
			&[],
		);

		assert_eq!(built.metadata.chunks_used, 2);
		assert!(built.knowledge_context.contains("\n---\n"));
		assert_eq!(built.metadata.sources, vec!["slack", "git"]);
	}

	#[test]
	fn empty_candidates_produce_an_empty_context() {
		let built = assemble(&[], &options(1_000), &[]);

		assert!(built.knowledge_context.is_empty());
		assert_eq!(built.metadata.chunks_used, 0);
		assert_eq!(built.metadata.average_relevance, 0.0);
	}
}
