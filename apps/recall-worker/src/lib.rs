pub mod handlers;
pub mod worker;

// std
use std::{path::PathBuf, sync::Arc, time::Duration};

// crates.io
use clap::Parser;
use serde_json::json;
use time::{Duration as TimeDuration, OffsetDateTime};
use tokio::{
	sync::{mpsc, watch},
	task::JoinHandle,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// self
use recall_agent::{Agent, ServiceContext, registry_with_memory_tools};
use recall_domain::event::NewRawEvent;
use recall_providers::ProviderManager;
use recall_service::{Providers, Service};
use recall_storage::{
	chunk_store::{self, TierPolicy},
	db::Db,
	event_log,
	queue::{self, EnqueueOptions, PROCESSING_QUEUE, QueuePolicy},
};

use crate::{
	handlers::{AgentTaskHandler, EmbeddingHandler, IngestionHandler, ProcessingHandler},
	worker::{JobHandler, Worker, WorkerOptions},
};

#[derive(Debug, Parser)]
#[command(version, rename_all = "kebab")]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = recall_config::load(&args.config)?;
	let filter = EnvFilter::try_new(&config.service.log_level)
		.unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();

	let db = Db::connect(&config.database).await?;

	db.ensure_schema(config.embedding.dimensions).await?;

	let manager = ProviderManager::from_config(&config)?;
	let providers = Providers::from_manager(&config, &manager)?;
	let service = Arc::new(Service::new(config, db.clone(), providers));
	let agent = Arc::new(
		Agent::new(service.providers.chat.clone(), registry_with_memory_tools(&service))
			.with_context(Arc::new(ServiceContext::new(service.clone()))),
	);
	let policy = QueuePolicy::from_config(&service.cfg.queue);
	let options = WorkerOptions::from_config(&service.cfg.queue);
	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let handlers: Vec<Arc<dyn JobHandler>> = vec![
		Arc::new(IngestionHandler { service: service.clone() }),
		Arc::new(ProcessingHandler { service: service.clone() }),
		Arc::new(EmbeddingHandler { service: service.clone() }),
		Arc::new(AgentTaskHandler { service: service.clone(), agent }),
	];
	let mut tasks: Vec<JoinHandle<()>> = Vec::new();

	for handler in handlers {
		let worker = Worker::new(db.clone(), policy, options, handler);

		tasks.extend(worker.spawn(shutdown_rx.clone()));
	}

	tasks.push(spawn_lifecycle(service.clone(), policy, shutdown_rx.clone()));
	recover_pending(&service).await?;
	info!("Worker running.");

	tokio::signal::ctrl_c().await?;
	info!("Shutting down.");

	// Reverse dependency order: stop consumers and the lifecycle job, then
	// let the pool drop.
	shutdown_tx.send(true)?;

	for task in tasks {
		let _ = task.await;
	}

	Ok(())
}

const RECOVERY_BATCH: i64 = 500;
const RECOVERY_MIN_AGE_MINUTES: i64 = 10;

/// Startup recovery: events stuck in `pending` long enough that their
/// original job is clearly gone get a fresh `processing` job. The pipeline is
/// idempotent, so racing a still-live job is harmless.
async fn recover_pending(service: &Service) -> color_eyre::Result<()> {
	let now = OffsetDateTime::now_utc();
	let cutoff = now - TimeDuration::minutes(RECOVERY_MIN_AGE_MINUTES);
	let pending = event_log::get_pending(&service.db, RECOVERY_BATCH).await?;
	let stale: Vec<_> =
		pending.into_iter().filter(|event| event.ingested_at <= cutoff).collect();

	if stale.is_empty() {
		return Ok(());
	}

	info!(count = stale.len(), "Re-enqueueing stale pending events.");

	for event in stale {
		queue::add(
			&service.db,
			PROCESSING_QUEUE,
			&json!({ "event_id": event.event_id }),
			EnqueueOptions::default(),
			now,
		)
		.await?;
	}

	Ok(())
}

/// Consumes in-process adapter events and stages them through the ingestion
/// path. Ends when the channel closes or shutdown is requested.
pub fn spawn_event_channel(
	service: Arc<Service>,
	mut events: mpsc::Receiver<NewRawEvent>,
	mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		loop {
			let event = tokio::select! {
				_ = shutdown.changed() => break,
				event = events.recv() => event,
			};
			let Some(event) = event else {
				break;
			};

			if let Err(err) = service.ingest_event(&event).await {
				error!(source = %event.source, error = %err, "Event ingestion failed.");
			}
		}
	})
}

/// Periodic housekeeping: tier demotion and queue retention, on the
/// configured lifecycle interval.
fn spawn_lifecycle(
	service: Arc<Service>,
	policy: QueuePolicy,
	mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		let interval = Duration::from_secs(service.cfg.chunk.lifecycle_interval_seconds.max(1));
		let tiers = TierPolicy::from_config(&service.cfg.chunk);

		loop {
			let stop = tokio::select! {
				_ = shutdown.changed() => true,
				_ = tokio::time::sleep(interval) => false,
			};

			if stop {
				break;
			}

			let now = OffsetDateTime::now_utc();

			match chunk_store::demote(&service.db, &tiers, now).await {
				Ok(report) =>
					if report.hot_to_warm > 0 || report.warm_to_cold > 0 {
						info!(
							hot_to_warm = report.hot_to_warm,
							warm_to_cold = report.warm_to_cold,
							"Demoted chunks."
						);
					},
				Err(err) => error!(error = %err, "Tier demotion failed."),
			}

			match queue::purge(&service.db, &policy, now).await {
				Ok(purged) =>
					if purged > 0 {
						info!(purged, "Purged retained queue jobs.");
					},
				Err(err) => error!(error = %err, "Queue retention purge failed."),
			}
		}
	})
}
