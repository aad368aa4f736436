use serde_json::Value;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{Result, db::Db, models::QueueJobRow};

pub const INGESTION_QUEUE: &str = "ingestion";
pub const PROCESSING_QUEUE: &str = "processing";
pub const EMBEDDING_QUEUE: &str = "embedding";
pub const AGENT_TASKS_QUEUE: &str = "agent-tasks";

pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Retry and retention knobs shared by every queue consumer.
#[derive(Clone, Copy, Debug)]
pub struct QueuePolicy {
	pub lease: Duration,
	pub backoff_base_ms: i64,
	pub backoff_cap_ms: i64,
	pub completed_retention: Duration,
	pub completed_retention_jobs: i64,
	pub failed_retention: Duration,
}
impl QueuePolicy {
	pub fn from_config(cfg: &recall_config::Queue) -> Self {
		Self {
			lease: Duration::seconds(cfg.lease_seconds),
			backoff_base_ms: cfg.backoff_base_ms,
			backoff_cap_ms: cfg.backoff_cap_ms,
			completed_retention: Duration::hours(cfg.completed_retention_hours),
			completed_retention_jobs: cfg.completed_retention_jobs,
			failed_retention: Duration::days(cfg.failed_retention_days),
		}
	}
}

#[derive(Clone, Debug)]
pub struct EnqueueOptions {
	pub priority: i32,
	pub delay: Option<Duration>,
	pub max_attempts: i32,
}
impl Default for EnqueueOptions {
	fn default() -> Self {
		Self { priority: 0, delay: None, max_attempts: DEFAULT_MAX_ATTEMPTS }
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureOutcome {
	Retrying { next_at: OffsetDateTime },
	Exhausted,
}

pub async fn add(
	db: &Db,
	queue: &str,
	payload: &Value,
	opts: EnqueueOptions,
	now: OffsetDateTime,
) -> Result<Uuid> {
	let job_id = Uuid::new_v4();
	let (state, available_at) = match opts.delay {
		Some(delay) if delay > Duration::ZERO => ("delayed", now + delay),
		_ => ("waiting", now),
	};

	sqlx::query(
		"\
INSERT INTO queue_jobs (
	job_id,
	queue,
	payload,
	priority,
	state,
	max_attempts,
	available_at,
	created_at,
	updated_at
)
VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$8)",
	)
	.bind(job_id)
	.bind(queue)
	.bind(payload)
	.bind(opts.priority)
	.bind(state)
	.bind(opts.max_attempts.max(1))
	.bind(available_at)
	.bind(now)
	.execute(&db.pool)
	.await?;

	Ok(job_id)
}

/// Claims the next eligible job and moves it to `active` with a lease.
///
/// An `active` row whose `available_at` has passed is a job whose worker
/// missed its lease; it becomes claimable again, which is the queue's
/// visibility timeout.
pub async fn claim_next(
	db: &Db,
	queue: &str,
	lease: Duration,
	now: OffsetDateTime,
) -> Result<Option<QueueJobRow>> {
	let mut tx = db.pool.begin().await?;
	let row = sqlx::query_as::<_, QueueJobRow>(
		"\
SELECT job_id, queue, payload, priority, state, attempts, max_attempts, last_error, available_at,
	created_at, updated_at, completed_at
FROM queue_jobs
WHERE queue = $1 AND state IN ('waiting','delayed','active') AND available_at <= $2
ORDER BY priority DESC, available_at ASC
LIMIT 1
FOR UPDATE SKIP LOCKED",
	)
	.bind(queue)
	.bind(now)
	.fetch_optional(&mut *tx)
	.await?;

	let job = if let Some(mut job) = row {
		let lease_until = now + lease;

		sqlx::query(
			"UPDATE queue_jobs SET state = 'active', available_at = $1, updated_at = $2 \
			 WHERE job_id = $3",
		)
		.bind(lease_until)
		.bind(now)
		.bind(job.job_id)
		.execute(&mut *tx)
		.await?;

		job.state = "active".to_string();
		job.available_at = lease_until;

		Some(job)
	} else {
		None
	};

	tx.commit().await?;

	Ok(job)
}

pub async fn complete(db: &Db, job_id: Uuid, now: OffsetDateTime) -> Result<()> {
	sqlx::query(
		"UPDATE queue_jobs SET state = 'completed', completed_at = $1, updated_at = $1 \
		 WHERE job_id = $2",
	)
	.bind(now)
	.bind(job_id)
	.execute(&db.pool)
	.await?;

	Ok(())
}

/// Records a handler failure: either reschedules with exponential backoff or,
/// once attempts are exhausted, parks the job as `failed` for inspection.
pub async fn fail(
	db: &Db,
	job: &QueueJobRow,
	error: &str,
	policy: &QueuePolicy,
	now: OffsetDateTime,
) -> Result<FailureOutcome> {
	let attempts = job.attempts.saturating_add(1);

	if attempts < job.max_attempts {
		let backoff =
			backoff_for_attempt(attempts, policy.backoff_base_ms, policy.backoff_cap_ms);
		let next_at = now + backoff;

		sqlx::query(
			"\
UPDATE queue_jobs
SET state = 'delayed', attempts = $1, last_error = $2, available_at = $3, updated_at = $4
WHERE job_id = $5",
		)
		.bind(attempts)
		.bind(error)
		.bind(next_at)
		.bind(now)
		.bind(job.job_id)
		.execute(&db.pool)
		.await?;

		return Ok(FailureOutcome::Retrying { next_at });
	}

	sqlx::query(
		"\
UPDATE queue_jobs
SET state = 'failed', attempts = $1, last_error = $2, updated_at = $3
WHERE job_id = $4",
	)
	.bind(attempts)
	.bind(error)
	.bind(now)
	.bind(job.job_id)
	.execute(&db.pool)
	.await?;

	Ok(FailureOutcome::Exhausted)
}

/// Exponential backoff for the given attempt count: `base * 2^(attempts - 1)`,
/// capped.
pub fn backoff_for_attempt(attempts: i32, base_ms: i64, cap_ms: i64) -> Duration {
	let exp = attempts.max(1).saturating_sub(1).min(16) as u32;
	let raw = base_ms.saturating_mul(1_i64 << exp);

	Duration::milliseconds(raw.min(cap_ms))
}

/// Drops completed jobs past the retention window (or beyond the newest
/// `completed_retention_jobs`) and failed jobs past theirs.
pub async fn purge(db: &Db, policy: &QueuePolicy, now: OffsetDateTime) -> Result<u64> {
	let completed_cutoff = now - policy.completed_retention;
	let failed_cutoff = now - policy.failed_retention;
	let mut purged = 0;
	let aged = sqlx::query(
		"DELETE FROM queue_jobs WHERE state = 'completed' AND updated_at <= $1",
	)
	.bind(completed_cutoff)
	.execute(&db.pool)
	.await?;

	purged += aged.rows_affected();

	let overflow = sqlx::query(
		"\
DELETE FROM queue_jobs
WHERE state = 'completed' AND job_id NOT IN (
	SELECT job_id FROM queue_jobs WHERE state = 'completed' ORDER BY updated_at DESC LIMIT $1
)",
	)
	.bind(policy.completed_retention_jobs)
	.execute(&db.pool)
	.await?;

	purged += overflow.rows_affected();

	let failed = sqlx::query("DELETE FROM queue_jobs WHERE state = 'failed' AND updated_at <= $1")
		.bind(failed_cutoff)
		.execute(&db.pool)
		.await?;

	purged += failed.rows_affected();

	Ok(purged)
}

/// Outstanding work for a queue: everything not yet completed or failed.
pub async fn depth(db: &Db, queue: &str) -> Result<i64> {
	let count: (i64,) = sqlx::query_as(
		"SELECT COUNT(*) FROM queue_jobs \
		 WHERE queue = $1 AND state IN ('waiting','delayed','active')",
	)
	.bind(queue)
	.fetch_one(&db.pool)
	.await?;

	Ok(count.0)
}
