//! Integration tests against a real Redis instance via testcontainers.

use std::time::Duration;

use chrono::Utc;
use pantry_domain::{Job, JobMetadata, JobResult, JobStatus, JobType};
use pantry_queue::{QueueBus, QueueError};
use testcontainers::{core::WaitFor, runners::AsyncRunner, ContainerAsync, GenericImage};

fn job(job_type: JobType, priority: u8) -> Job {
    Job::new(
        job_type,
        serde_json::json!({}),
        JobMetadata {
            scraper_id: "s_test".to_string(),
            source_url: None,
            priority,
            attempts: 0,
            created_at: Utc::now(),
        },
    )
}

async fn redis_container() -> (ContainerAsync<GenericImage>, QueueBus) {
    let image = GenericImage::new("redis", "7-alpine")
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    let container = image.start().await.expect("failed to start redis container");
    let host_port = container.get_host_port_ipv4(6379).await.expect("failed to get host port");
    let url = format!("redis://127.0.0.1:{host_port}");

    let bus = QueueBus::connect(&url, 3, Duration::from_secs(60))
        .await
        .expect("failed to connect to redis");
    (container, bus)
}

#[tokio::test]
async fn dequeue_returns_highest_priority_job_first() {
    let (_container, bus) = redis_container().await;

    let low = job(JobType::Llm, 1);
    let high = job(JobType::Llm, 9);

    bus.enqueue("llm", &low, 1).await.unwrap();
    bus.enqueue("llm", &high, 9).await.unwrap();

    let lease = bus.dequeue("llm", Duration::from_secs(30)).await.unwrap().unwrap();
    assert_eq!(lease.job.id, high.id);
}

#[tokio::test]
async fn ack_removes_job_so_it_is_not_redelivered() {
    let (_container, bus) = redis_container().await;
    let job = job(JobType::Validate, 5);
    bus.enqueue("validator", &job, 5).await.unwrap();

    let lease = bus.dequeue("validator", Duration::from_secs(30)).await.unwrap().unwrap();
    bus.ack(&lease).await.unwrap();

    let reaped = bus.reap_expired("validator").await.unwrap();
    assert_eq!(reaped, 0);
    assert_eq!(bus.depth("validator").await.unwrap(), 0);
}

#[tokio::test]
async fn nack_past_max_attempts_moves_job_to_dlq() {
    let (_container, bus) = redis_container().await;
    let job = job(JobType::Reconcile, 5);
    bus.enqueue("reconciler", &job, 5).await.unwrap();

    for _ in 0..3 {
        let lease = bus.dequeue("reconciler", Duration::from_secs(30)).await.unwrap().unwrap();
        bus.nack(&lease, "transient failure").await.unwrap();
    }

    assert_eq!(bus.depth("reconciler").await.unwrap(), 0);
    assert_eq!(bus.dlq_depth("reconciler").await.unwrap(), 1);
}

#[tokio::test]
async fn stale_lease_is_rejected_after_reap_redelivers_the_job() {
    let (_container, bus) = redis_container().await;
    let job = job(JobType::Validate, 5);
    bus.enqueue("validator", &job, 5).await.unwrap();

    // Original worker leases the job with a visibility timeout so short it
    // is already expired by the time the reaper runs.
    let stale_lease = bus.dequeue("validator", Duration::from_millis(0)).await.unwrap().unwrap();
    let reaped = bus.reap_expired("validator").await.unwrap();
    assert_eq!(reaped, 1);

    // A second worker picks the redelivered job up under a new lease token.
    let fresh_lease = bus.dequeue("validator", Duration::from_secs(30)).await.unwrap().unwrap();
    assert_eq!(fresh_lease.job.id, job.id);

    // The original worker's eventual ack/nack must not be allowed to
    // finalize a lease it no longer holds.
    let ack_err = bus.ack(&stale_lease).await.unwrap_err();
    assert!(matches!(ack_err, QueueError::StaleLease(id) if id == job.id));

    let nack_err = bus.nack(&stale_lease, "too slow").await.unwrap_err();
    assert!(matches!(nack_err, QueueError::StaleLease(id) if id == job.id));

    // The fresh lease is unaffected and can still finalize normally.
    bus.ack(&fresh_lease).await.unwrap();
}

#[tokio::test]
async fn complete_persists_a_fetchable_result() {
    let (_container, bus) = redis_container().await;
    let job = job(JobType::Record, 5);
    let result = JobResult {
        job_id: job.id,
        status: JobStatus::Succeeded,
        output: serde_json::json!({"ok": true}),
        error: None,
        produced_at: Utc::now(),
        latency_ms: 12,
        provider: None,
        confidence: None,
    };

    bus.complete(&result).await.unwrap();
    let fetched = bus.result(job.id).await.unwrap();
    assert!(fetched.is_some());
}
