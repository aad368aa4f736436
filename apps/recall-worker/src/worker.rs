// std
use std::{
	future::Future,
	pin::Pin,
	sync::Arc,
	time::{Duration, Instant},
};

// crates.io
use time::OffsetDateTime;
use tokio::{sync::watch, task::JoinHandle};
use tracing::error;

// self
use recall_storage::{
	db::Db,
	models::QueueJobRow,
	queue::{self, FailureOutcome, QueuePolicy},
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A queue consumer. `handle` must be idempotent: the queue is at-least-once.
pub trait JobHandler
where
	Self: Send + Sync,
{
	fn queue(&self) -> &'static str;

	fn handle<'a>(&'a self, job: &'a QueueJobRow) -> BoxFuture<'a, Result<(), String>>;

	/// Invoked once a job has exhausted its attempts and moved to `failed`.
	fn exhausted<'a>(&'a self, job: &'a QueueJobRow) -> BoxFuture<'a, ()> {
		let _ = job;

		Box::pin(async {})
	}
}

#[derive(Clone, Copy, Debug)]
pub struct RateLimit {
	pub max_jobs: u32,
	pub interval: Duration,
}

#[derive(Clone, Copy, Debug)]
pub struct WorkerOptions {
	pub concurrency: u32,
	pub poll_interval: Duration,
	pub rate_limit: Option<RateLimit>,
}
impl WorkerOptions {
	pub fn from_config(cfg: &recall_config::Queue) -> Self {
		Self {
			concurrency: cfg.concurrency,
			poll_interval: Duration::from_millis(cfg.poll_interval_ms),
			rate_limit: cfg.rate_limit_max_jobs.map(|max_jobs| RateLimit {
				max_jobs,
				interval: Duration::from_millis(cfg.rate_limit_interval_ms),
			}),
		}
	}
}

/// Pool of pollers over one queue. Claims with a lease, runs the handler, and
/// applies the retry/backoff contract on failure.
pub struct Worker {
	db: Db,
	policy: QueuePolicy,
	options: WorkerOptions,
	handler: Arc<dyn JobHandler>,
}
impl Worker {
	pub fn new(
		db: Db,
		policy: QueuePolicy,
		options: WorkerOptions,
		handler: Arc<dyn JobHandler>,
	) -> Self {
		Self { db, policy, options, handler }
	}

	pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
		(0..self.options.concurrency.max(1))
			.map(|_| {
				let db = self.db.clone();
				let policy = self.policy;
				let options = self.options;
				let handler = self.handler.clone();
				let shutdown = shutdown.clone();

				tokio::spawn(poll_loop(db, policy, options, handler, shutdown))
			})
			.collect()
	}
}

async fn poll_loop(
	db: Db,
	policy: QueuePolicy,
	options: WorkerOptions,
	handler: Arc<dyn JobHandler>,
	mut shutdown: watch::Receiver<bool>,
) {
	let mut limiter = options.rate_limit.map(RateLimiter::new);

	while !*shutdown.borrow() {
		if let Some(limiter) = limiter.as_mut()
			&& let Some(wait) = limiter.acquire()
		{
			if wait_or_shutdown(&mut shutdown, wait).await {
				break;
			}

			continue;
		}

		let now = OffsetDateTime::now_utc();
		let claimed = queue::claim_next(&db, handler.queue(), policy.lease, now).await;

		match claimed {
			Ok(Some(job)) => {
				run_job(&db, &policy, handler.as_ref(), &job).await;
			},
			Ok(None) =>
				if wait_or_shutdown(&mut shutdown, options.poll_interval).await {
					break;
				},
			Err(err) => {
				error!(queue = handler.queue(), error = %err, "Queue claim failed.");

				if wait_or_shutdown(&mut shutdown, options.poll_interval).await {
					break;
				}
			},
		}
	}
}

async fn run_job(db: &Db, policy: &QueuePolicy, handler: &dyn JobHandler, job: &QueueJobRow) {
	let result = handler.handle(job).await;
	let now = OffsetDateTime::now_utc();

	match result {
		Ok(()) =>
			if let Err(err) = queue::complete(db, job.job_id, now).await {
				error!(job_id = %job.job_id, error = %err, "Failed to complete job.");
			},
		Err(message) => {
			error!(
				queue = handler.queue(),
				job_id = %job.job_id,
				attempts = job.attempts + 1,
				error = %message,
				"Job handler failed."
			);

			match queue::fail(db, job, &message, policy, now).await {
				Ok(FailureOutcome::Retrying { .. }) => {},
				Ok(FailureOutcome::Exhausted) => handler.exhausted(job).await,
				Err(err) => {
					error!(job_id = %job.job_id, error = %err, "Failed to record job failure.");
				},
			}
		},
	}
}

/// Returns true when shutdown was requested while waiting.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
	tokio::select! {
		_ = shutdown.changed() => true,
		_ = tokio::time::sleep(delay) => false,
	}
}

struct RateLimiter {
	limit: RateLimit,
	window_start: Instant,
	count: u32,
}
impl RateLimiter {
	fn new(limit: RateLimit) -> Self {
		Self { limit, window_start: Instant::now(), count: 0 }
	}

	/// `None` grants a slot; `Some(wait)` asks the caller to sleep out the
	/// rest of the window.
	fn acquire(&mut self) -> Option<Duration> {
		let elapsed = self.window_start.elapsed();

		if elapsed >= self.limit.interval {
			self.window_start = Instant::now();
			self.count = 0;
		}
		if self.count < self.limit.max_jobs {
			self.count += 1;

			return None;
		}

		Some(self.limit.interval.saturating_sub(elapsed))
	}
}
