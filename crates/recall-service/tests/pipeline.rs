use std::{collections::HashMap, sync::Arc};

use serde_json::{Map, json};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use recall_domain::event::NewRawEvent;
use recall_providers::LlmProvider;
use recall_service::{
	Providers, Service,
	ingest::{IngestOutcome, ProcessingJob},
	pipeline::EmbeddingJob,
	retrieval::SearchOptions,
};
use recall_storage::{
	chunk_store,
	db::Db,
	event_log,
	queue::{self, EMBEDDING_QUEUE, PROCESSING_QUEUE},
};
use recall_testkit::{
	TestDatabase,
	mock::{FailingChat, ScriptedChat, TopicEmbedding},
};

const DIM: u32 = 8;

fn test_config(dsn: String) -> recall_config::Config {
	recall_config::Config {
		service: recall_config::Service::default(),
		database: recall_config::Database { url: dsn, max_connections: 2 },
		queue: recall_config::Queue::default(),
		llm: recall_config::Llm {
			default: "test".to_string(),
			providers: HashMap::from([(
				"test".to_string(),
				recall_config::LlmProviderConfig {
					api_base: "http://127.0.0.1:1".to_string(),
					api_key: "test-key".to_string(),
					model: "test".to_string(),
					timeout_ms: 1_000,
					default_headers: Map::new(),
				},
			)]),
		},
		embedding: recall_config::Embedding {
			provider: "test".to_string(),
			api_base: "http://127.0.0.1:1".to_string(),
			api_key: "test-key".to_string(),
			model: "topic-test".to_string(),
			dimensions: DIM,
			batch_size: 8,
			timeout_ms: 1_000,
			default_headers: Map::new(),
		},
		chunk: recall_config::ChunkLifecycle::default(),
		retrieval: recall_config::Retrieval::default(),
		context: recall_config::ContextBudget::default(),
		agent: recall_config::Agent::default(),
		adapter: recall_config::Adapter::default(),
	}
}

async fn service_with(test_db: &TestDatabase, chat: Arc<dyn LlmProvider>) -> Service {
	let cfg = test_config(test_db.dsn().to_string());
	let db = Db::connect(&cfg.database).await.expect("Failed to connect to Postgres.");

	db.ensure_schema(DIM).await.expect("Failed to ensure schema.");

	let providers = Providers { chat, embedding: Arc::new(TopicEmbedding::new(DIM as usize)) };

	Service::new(cfg, db, providers)
}

fn slack_event(external_id: &str, text: &str) -> NewRawEvent {
	NewRawEvent {
		source: "slack".to_string(),
		event_type: "message".to_string(),
		external_id: Some(external_id.to_string()),
		payload: json!({ "text": text, "user": "alice" }),
		metadata: json!({}),
		timestamp: OffsetDateTime::now_utc(),
	}
}

/// Runs queued pipeline jobs inline until both stage queues are empty,
/// exercising the same handoff the worker binary drives.
async fn drain_pipeline(service: &Service) {
	let lease = Duration::seconds(30);

	loop {
		let now = OffsetDateTime::now_utc();

		if let Some(job) = queue::claim_next(&service.db, PROCESSING_QUEUE, lease, now)
			.await
			.expect("Claim failed.")
		{
			let payload: ProcessingJob =
				serde_json::from_value(job.payload.clone()).expect("Malformed processing job.");

			service.process_event(payload.event_id).await.expect("Processing stage failed.");
			queue::complete(&service.db, job.job_id, now).await.expect("Complete failed.");

			continue;
		}
		if let Some(job) = queue::claim_next(&service.db, EMBEDDING_QUEUE, lease, now)
			.await
			.expect("Claim failed.")
		{
			let payload: EmbeddingJob =
				serde_json::from_value(job.payload.clone()).expect("Malformed embedding job.");

			service.embed_and_store(&payload).await.expect("Embedding stage failed.");
			queue::complete(&service.db, job.job_id, now).await.expect("Complete failed.");

			continue;
		}

		break;
	}
}

#[tokio::test]
#[ignore = "Requires external Postgres with pgvector. Set RECALL_PG_DSN to run."]
async fn ingested_events_become_searchable_chunks() {
	let Some(base_dsn) = recall_testkit::env_dsn() else {
		eprintln!("Skipping ingested_events_become_searchable_chunks; set RECALL_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let service = service_with(&test_db, Arc::new(FailingChat)).await;
	let texts =
		["We need JWT for the API", "JWT over OAuth2 for simplicity", "Use RS256 for JWT"];

	for (index, text) in texts.iter().enumerate() {
		let outcome = service
			.ingest_event(&slack_event(&format!("171.00{index}"), text))
			.await
			.expect("Ingest failed.");

		assert!(matches!(outcome, IngestOutcome::Ingested(_)));
	}

	drain_pipeline(&service).await;

	let stats = chunk_store::stats(&service.db).await.expect("Stats failed.");

	assert_eq!(stats.total, 3);
	assert_eq!(stats.by_tier.get("hot"), Some(&3));

	let pending = event_log::get_pending(&service.db, 10).await.expect("Pending scan failed.");

	assert!(pending.is_empty(), "every event must reach a terminal status");

	let response = service
		.search("API authentication", &SearchOptions::default())
		.await
		.expect("Search failed.");

	assert!(!response.chunks.is_empty());
	assert!(response.chunks[0].similarity >= 0.7);
	assert!(response.chunks[0].content.contains("JWT"));

	let ids: Vec<Uuid> = response.chunks.iter().map(|chunk| chunk.chunk_id).collect();
	let fetched = service.get_by_ids(&ids).await.expect("get_by_ids failed.");

	assert_eq!(fetched.len(), ids.len());

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres with pgvector. Set RECALL_PG_DSN to run."]
async fn repeated_slack_messages_produce_one_event_and_one_chunk() {
	let Some(base_dsn) = recall_testkit::env_dsn() else {
		eprintln!("Skipping repeated_slack_messages_produce_one_event_and_one_chunk; set RECALL_PG_DSN.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let service = service_with(&test_db, Arc::new(FailingChat)).await;
	let event = slack_event("171.100", "the payment retries are fixed");
	let first = service.ingest_event(&event).await.expect("First ingest failed.");
	let second = service.ingest_event(&event).await.expect("Second ingest failed.");
	let IngestOutcome::Ingested(event_id) = first else {
		panic!("first ingest must create the event");
	};

	assert_eq!(second, IngestOutcome::Duplicate(event_id));

	drain_pipeline(&service).await;

	let events: i64 = sqlx::query_scalar("SELECT count(*) FROM raw_events")
		.fetch_one(&service.db.pool)
		.await
		.expect("Count failed.");
	let chunks: i64 = sqlx::query_scalar("SELECT count(*) FROM knowledge_chunks")
		.fetch_one(&service.db.pool)
		.await
		.expect("Count failed.");

	assert_eq!(events, 1);
	assert_eq!(chunks, 1);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres with pgvector. Set RECALL_PG_DSN to run."]
async fn summarizer_failure_falls_back_to_truncation() {
	let Some(base_dsn) = recall_testkit::env_dsn() else {
		eprintln!("Skipping summarizer_failure_falls_back_to_truncation; set RECALL_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let service = service_with(&test_db, Arc::new(FailingChat)).await;
	let long_text = "the incident review covered the storage outage and follow-ups ".repeat(8);
	let outcome =
		service.ingest_event(&slack_event("171.200", &long_text)).await.expect("Ingest failed.");
	let IngestOutcome::Ingested(event_id) = outcome else {
		panic!("ingest must create the event");
	};

	drain_pipeline(&service).await;

	let event = event_log::get(&service.db, event_id)
		.await
		.expect("Fetch failed.")
		.expect("Event must exist.");

	assert_eq!(event.processing_status, "completed");

	let chunks = chunk_store::get_by_source(&service.db, Some("slack"), 10)
		.await
		.expect("Fetch failed.");

	assert_eq!(chunks.len(), 1);

	let chunk = &chunks[0];
	let expected = recall_domain::summary::truncate_summary(&long_text);

	assert_eq!(chunk.content, expected);
	assert!(chunk.content.ends_with("..."));
	assert!(chunk.content.chars().count() <= 203);
	assert_eq!(chunk.metadata["summary_fallback"], json!(true));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres with pgvector. Set RECALL_PG_DSN to run."]
async fn malformed_rerank_replies_keep_the_retrieval_order() {
	let Some(base_dsn) = recall_testkit::env_dsn() else {
		eprintln!("Skipping malformed_rerank_replies_keep_the_retrieval_order; set RECALL_PG_DSN.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let chat = Arc::new(ScriptedChat::new(vec![
		ScriptedChat::text("not a list"),
		ScriptedChat::text("this reranker only speaks prose"),
	]));
	let mut service = service_with(&test_db, chat).await;

	service.cfg.retrieval.rerank = true;

	for (index, text) in
		["JWT beats OAuth2 here", "token rotation for the API", "auth middleware rewrite"]
			.iter()
			.enumerate()
	{
		let outcome = service
			.ingest_event(&slack_event(&format!("171.30{index}"), text))
			.await
			.expect("Ingest failed.");

		assert!(matches!(outcome, IngestOutcome::Ingested(_)));
	}

	drain_pipeline(&service).await;

	let baseline = service
		.search("api token auth", &SearchOptions { rerank: Some(false), ..SearchOptions::default() })
		.await
		.expect("Baseline search failed.");
	let reranked = service
		.search("api token auth", &SearchOptions::default())
		.await
		.expect("Reranked search failed.");
	let baseline_ids: Vec<Uuid> = baseline.chunks.iter().map(|chunk| chunk.chunk_id).collect();
	let reranked_ids: Vec<Uuid> = reranked.chunks.iter().map(|chunk| chunk.chunk_id).collect();

	assert_eq!(baseline_ids, reranked_ids, "a malformed rerank reply must change nothing");

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres with pgvector. Set RECALL_PG_DSN to run."]
async fn find_similar_excludes_the_anchor_chunk() {
	let Some(base_dsn) = recall_testkit::env_dsn() else {
		eprintln!("Skipping find_similar_excludes_the_anchor_chunk; set RECALL_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let service = service_with(&test_db, Arc::new(FailingChat)).await;

	for (index, text) in
		["JWT is the decision", "JWT with RS256 signatures", "OAuth2 token exchange"]
			.iter()
			.enumerate()
	{
		service
			.ingest_event(&slack_event(&format!("171.40{index}"), text))
			.await
			.expect("Ingest failed.");
	}

	drain_pipeline(&service).await;

	let anchor = service
		.search("JWT is the decision", &SearchOptions::default())
		.await
		.expect("Search failed.")
		.chunks
		.first()
		.expect("The anchor chunk must be retrievable.")
		.chunk_id;
	let neighbors = service.find_similar(anchor, 5).await.expect("find_similar failed.");

	assert!(!neighbors.is_empty());
	assert!(neighbors.iter().all(|chunk| chunk.chunk_id != anchor));
	// Without a true duplicate, nothing else reaches the anchor's
	// self-similarity.
	assert!(neighbors.iter().all(|chunk| chunk.similarity < 0.9999));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres with pgvector. Set RECALL_PG_DSN to run."]
async fn reprocessing_a_completed_event_changes_nothing() {
	let Some(base_dsn) = recall_testkit::env_dsn() else {
		eprintln!("Skipping reprocessing_a_completed_event_changes_nothing; set RECALL_PG_DSN.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let service = service_with(&test_db, Arc::new(FailingChat)).await;
	let outcome = service
		.ingest_event(&slack_event("171.500", "retry budget exhausted on checkout"))
		.await
		.expect("Ingest failed.");
	let IngestOutcome::Ingested(event_id) = outcome else {
		panic!("ingest must create the event");
	};

	drain_pipeline(&service).await;

	// At-least-once delivery means the same job can fire again.
	service.process_event(event_id).await.expect("Reprocessing failed.");
	drain_pipeline(&service).await;

	let chunks: i64 = sqlx::query_scalar("SELECT count(*) FROM knowledge_chunks")
		.fetch_one(&service.db.pool)
		.await
		.expect("Count failed.");

	assert_eq!(chunks, 1);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
