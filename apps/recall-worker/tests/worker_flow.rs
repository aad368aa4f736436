use std::{
	collections::HashMap,
	future::Future,
	sync::{
		Arc,
		atomic::{AtomicBool, AtomicU32, Ordering},
	},
	time::Duration,
};

use serde_json::{Map, json};
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};

use recall_adapters::{BoxFuture as AdapterFuture, RuntimePolicy, SourceAdapter};
use recall_domain::event::NewRawEvent;
use recall_service::{Providers, Service};
use recall_storage::{
	db::Db,
	models::QueueJobRow,
	queue::{self, AGENT_TASKS_QUEUE, EnqueueOptions, QueuePolicy},
};
use recall_testkit::{
	TestDatabase,
	mock::{FailingChat, TopicEmbedding},
};
use recall_worker::{
	handlers::{EmbeddingHandler, ProcessingHandler},
	spawn_event_channel,
	worker::{BoxFuture, JobHandler, Worker, WorkerOptions},
};

const DIM: u32 = 8;

fn test_queue_config() -> recall_config::Queue {
	recall_config::Queue {
		concurrency: 2,
		poll_interval_ms: 20,
		backoff_base_ms: 50,
		backoff_cap_ms: 200,
		..recall_config::Queue::default()
	}
}

fn test_config(dsn: String) -> recall_config::Config {
	recall_config::Config {
		service: recall_config::Service::default(),
		database: recall_config::Database { url: dsn, max_connections: 4 },
		queue: test_queue_config(),
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

async fn test_service(test_db: &TestDatabase) -> Arc<Service> {
	let cfg = test_config(test_db.dsn().to_string());
	let db = Db::connect(&cfg.database).await.expect("Failed to connect to Postgres.");

	db.ensure_schema(DIM).await.expect("Failed to ensure schema.");

	let providers = Providers {
		chat: Arc::new(FailingChat),
		embedding: Arc::new(TopicEmbedding::new(DIM as usize)),
	};

	Arc::new(Service::new(cfg, db, providers))
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

async fn wait_for<F, Fut>(label: &str, mut probe: F)
where
	F: FnMut() -> Fut,
	Fut: Future<Output = bool>,
{
	for _ in 0..200 {
		if probe().await {
			return;
		}

		tokio::time::sleep(Duration::from_millis(50)).await;
	}

	panic!("timed out waiting for {label}");
}

#[tokio::test]
#[ignore = "Requires external Postgres with pgvector. Set RECALL_PG_DSN to run."]
async fn workers_drive_events_to_completion() {
	let Some(base_dsn) = recall_testkit::env_dsn() else {
		eprintln!("Skipping workers_drive_events_to_completion; set RECALL_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let service = test_service(&test_db).await;
	let policy = QueuePolicy::from_config(&service.cfg.queue);
	let options = WorkerOptions::from_config(&service.cfg.queue);
	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let mut tasks = Vec::new();

	for handler in [
		Arc::new(ProcessingHandler { service: service.clone() }) as Arc<dyn JobHandler>,
		Arc::new(EmbeddingHandler { service: service.clone() }) as Arc<dyn JobHandler>,
	] {
		let worker = Worker::new(service.db.clone(), policy, options, handler);

		tasks.extend(worker.spawn(shutdown_rx.clone()));
	}

	service
		.ingest_event(&slack_event("500.1", "JWT rollout is complete"))
		.await
		.expect("Ingest failed.");

	wait_for("the event to complete", || {
		let db = service.db.clone();

		async move {
			let status: Option<String> = sqlx::query_scalar(
				"SELECT processing_status FROM raw_events WHERE external_id = '500.1'",
			)
			.fetch_optional(&db.pool)
			.await
			.expect("Status query failed.");

			status.as_deref() == Some("completed")
		}
	})
	.await;

	let chunks: i64 = sqlx::query_scalar("SELECT count(*) FROM knowledge_chunks")
		.fetch_one(&service.db.pool)
		.await
		.expect("Count failed.");

	assert_eq!(chunks, 1);

	shutdown_tx.send(true).expect("Shutdown signal failed.");

	for task in tasks {
		let _ = task.await;
	}

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

struct AlwaysFailing {
	hits: Arc<AtomicU32>,
	exhausted: Arc<AtomicBool>,
}
impl JobHandler for AlwaysFailing {
	fn queue(&self) -> &'static str {
		AGENT_TASKS_QUEUE
	}

	fn handle<'a>(&'a self, _job: &'a QueueJobRow) -> BoxFuture<'a, Result<(), String>> {
		Box::pin(async move {
			self.hits.fetch_add(1, Ordering::SeqCst);

			Err("synthetic failure".to_string())
		})
	}

	fn exhausted<'a>(&'a self, _job: &'a QueueJobRow) -> BoxFuture<'a, ()> {
		Box::pin(async move {
			self.exhausted.store(true, Ordering::SeqCst);
		})
	}
}

#[tokio::test]
#[ignore = "Requires external Postgres with pgvector. Set RECALL_PG_DSN to run."]
async fn failing_jobs_retry_then_park_and_fire_the_hook() {
	let Some(base_dsn) = recall_testkit::env_dsn() else {
		eprintln!("Skipping failing_jobs_retry_then_park_and_fire_the_hook; set RECALL_PG_DSN.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let service = test_service(&test_db).await;
	let policy = QueuePolicy::from_config(&service.cfg.queue);
	let options = WorkerOptions::from_config(&service.cfg.queue);
	let hits = Arc::new(AtomicU32::new(0));
	let exhausted = Arc::new(AtomicBool::new(false));
	let handler =
		Arc::new(AlwaysFailing { hits: hits.clone(), exhausted: exhausted.clone() });
	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let tasks = Worker::new(service.db.clone(), policy, options, handler).spawn(shutdown_rx);
	let opts = EnqueueOptions { max_attempts: 2, ..EnqueueOptions::default() };
	let job_id = queue::add(
		&service.db,
		AGENT_TASKS_QUEUE,
		&json!({ "query": "doomed" }),
		opts,
		OffsetDateTime::now_utc(),
	)
	.await
	.expect("Enqueue failed.");

	wait_for("the job to exhaust its attempts", || {
		let exhausted = exhausted.clone();

		async move { exhausted.load(Ordering::SeqCst) }
	})
	.await;

	let (state, attempts): (String, i32) =
		sqlx::query_as("SELECT state, attempts FROM queue_jobs WHERE job_id = $1")
			.bind(job_id)
			.fetch_one(&service.db.pool)
			.await
			.expect("Fetch failed.");

	assert_eq!(state, "failed");
	assert_eq!(attempts, 2);
	assert_eq!(hits.load(Ordering::SeqCst), 2);

	shutdown_tx.send(true).expect("Shutdown signal failed.");

	for task in tasks {
		let _ = task.await;
	}

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

struct ScriptedAdapter {
	events: Vec<NewRawEvent>,
}
impl SourceAdapter for ScriptedAdapter {
	fn name(&self) -> &str {
		"scripted"
	}

	fn connect(&mut self) -> AdapterFuture<'_, recall_adapters::Result<()>> {
		Box::pin(async move { Ok(()) })
	}

	fn disconnect(&mut self) -> AdapterFuture<'_, recall_adapters::Result<()>> {
		Box::pin(async move { Ok(()) })
	}

	fn health_check(&mut self) -> AdapterFuture<'_, recall_adapters::Result<()>> {
		Box::pin(async move { Ok(()) })
	}

	fn next_event(&mut self) -> AdapterFuture<'_, recall_adapters::Result<Option<NewRawEvent>>> {
		Box::pin(async move {
			if self.events.is_empty() {
				return Ok(None);
			}

			Ok(Some(self.events.remove(0)))
		})
	}
}

#[tokio::test]
#[ignore = "Requires external Postgres with pgvector. Set RECALL_PG_DSN to run."]
async fn adapter_events_flow_through_the_channel_into_the_log() {
	let Some(base_dsn) = recall_testkit::env_dsn() else {
		eprintln!("Skipping adapter_events_flow_through_the_channel_into_the_log; set RECALL_PG_DSN.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let service = test_service(&test_db).await;
	let (tx, rx) = mpsc::channel(8);
	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let consumer = spawn_event_channel(service.clone(), rx, shutdown_rx);
	let mut own = slack_event("600.2", "posted by the bot itself");

	own.payload = json!({ "text": "posted by the bot itself", "user": "recall-bot" });

	let adapter =
		ScriptedAdapter { events: vec![slack_event("600.1", "a human wrote this"), own] };
	let policy = RuntimePolicy {
		reconnect_base: Duration::from_millis(1),
		reconnect_cap: Duration::from_millis(4),
		self_id: Some("recall-bot".to_string()),
	};
	let handle = recall_adapters::start(adapter, policy, tx);

	wait_for("the adapter event to be staged", || {
		let db = service.db.clone();

		async move {
			let count: i64 = sqlx::query_scalar("SELECT count(*) FROM raw_events")
				.fetch_one(&db.pool)
				.await
				.expect("Count failed.");

			count == 1
		}
	})
	.await;

	let external: Option<String> =
		sqlx::query_scalar("SELECT external_id FROM raw_events LIMIT 1")
			.fetch_one(&service.db.pool)
			.await
			.expect("Fetch failed.");

	assert_eq!(external.as_deref(), Some("600.1"), "the self-authored event must be dropped");

	handle.stop().await;
	shutdown_tx.send(true).expect("Shutdown signal failed.");

	let _ = consumer.await;

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
