//! Heartbeat service: outbound priority, envelope trust, interval negotiation
//! and registration retry.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use outpost_agent::application::services::heartbeat::{FALLBACK_INTERVAL, Heartbeat, Outbound};
use outpost_agent::application::services::queue::JobQueue;
use outpost_agent::domain::{Backoff, JobState};
use outpost_common::signature::generate_signing_key;
use outpost_common::{Event, JobResult};

use crate::mocks::{FakeControlPlane, MemoryStore, MockLastResort, host, job, signed, silent};

fn queue() -> Arc<JobQueue<MemoryStore>> {
    Arc::new(JobQueue::new(MemoryStore::default()))
}

fn event(id: &str) -> Event {
    Event {
        event_id: id.into(),
        host_uuid: "h".into(),
        hostname: "edge-1".into(),
        machine_id: "m".into(),
        time: Utc::now(),
        tag: Some("audit".into()),
        content: "login".into(),
    }
}

/// Put a finished result for `id` in the outbound spool.
fn finished(q: &JobQueue<MemoryStore>, id: i64) {
    q.enqueue(&job(id)).unwrap();
    q.peek().unwrap();
    q.submit(&JobResult::new(id, "done".into(), None, Utc::now()))
        .unwrap();
    q.remove(id).unwrap();
}

#[test]
fn test_result_takes_priority_over_events() {
    let q = queue();
    q.save_event(&event("e1")).unwrap();
    finished(&q, 4);
    let hb = Heartbeat::new(
        FakeControlPlane::default(),
        q,
        generate_signing_key().verifying_key(),
        silent(),
    );

    let (request, sent) = hb.next_request();
    assert_eq!(sent, Outbound::Result(4));
    assert_eq!(request.result.unwrap().job_id, 4);
    assert!(request.events.is_none());
}

#[tokio::test]
async fn test_trusted_envelope_enqueues_job_and_sets_interval() {
    let key = generate_signing_key();
    let q = queue();
    finished(&q, 1);
    let plane = FakeControlPlane::default();
    plane.answer_ping(signed(&key, job(2), 45));
    let mut hb = Heartbeat::new(plane.clone(), Arc::clone(&q), key.verifying_key(), silent());

    let report = hb.ping_once().await.unwrap();

    assert!(report.trusted);
    assert_eq!(report.sent, Outbound::Result(1));
    assert_eq!(report.enqueued, Some(2));
    assert_eq!(hb.interval(), Duration::from_secs(45));
    assert_eq!(q.state(2), JobState::Queued);
    assert!(q.peek_result().unwrap().is_none(), "acknowledged result must be deleted");
}

#[tokio::test]
async fn test_forged_envelope_is_ignored_but_outbound_is_acknowledged() {
    let genuine = generate_signing_key();
    let forger = generate_signing_key();
    let q = queue();
    finished(&q, 1);
    let plane = FakeControlPlane::default();
    plane.answer_ping(signed(&forger, job(66), 1));
    let mut hb = Heartbeat::new(plane, Arc::clone(&q), genuine.verifying_key(), silent());

    let report = hb.ping_once().await.unwrap();

    assert!(!report.trusted);
    assert_eq!(report.enqueued, None);
    assert_eq!(hb.interval(), FALLBACK_INTERVAL);
    assert_eq!(q.state(66), JobState::Removed);
    assert!(q.peek_result().unwrap().is_none());
}

#[tokio::test]
async fn test_tampered_envelope_is_ignored() {
    let key = generate_signing_key();
    let q = queue();
    let mut response = signed(&key, job(3), 30);
    response.envelope.value.package = "evil".into();
    let plane = FakeControlPlane::default();
    plane.answer_ping(response);
    let mut hb = Heartbeat::new(plane, Arc::clone(&q), key.verifying_key(), silent());

    let report = hb.ping_once().await.unwrap();
    assert!(!report.trusted);
    assert_eq!(q.state(3), JobState::Removed);
    assert_eq!(hb.interval(), FALLBACK_INTERVAL);
}

#[tokio::test]
async fn test_transport_failure_deletes_nothing() {
    let key = generate_signing_key();
    let q = queue();
    finished(&q, 8);
    let plane = FakeControlPlane::default();
    plane.fail_ping();
    let mut hb = Heartbeat::new(plane.clone(), Arc::clone(&q), key.verifying_key(), silent());

    assert!(hb.ping_once().await.is_err());
    assert_eq!(q.peek_result().unwrap().unwrap().job_id, 8);
    assert_eq!(hb.interval(), FALLBACK_INTERVAL);

    plane.answer_ping(signed(&key, job(0), 0));
    let report = hb.ping_once().await.unwrap();
    assert_eq!(report.sent, Outbound::Result(8));
    assert_eq!(plane.sent().len(), 2);
    assert_eq!(plane.sent()[1].result.as_ref().unwrap().job_id, 8);
}

#[tokio::test]
async fn test_rejected_result_is_dropped_and_jobs_keep_flowing() {
    let key = generate_signing_key();
    let q = queue();
    finished(&q, 999);
    let plane = FakeControlPlane::default();
    plane.reject_ping(400);
    plane.answer_ping(signed(&key, job(7), 0));
    let mut last_resort = MockLastResort::new();
    last_resort
        .expect_record()
        .withf(|m| m.contains("job 999") && m.contains("400"))
        .times(1)
        .return_const(());
    let mut hb = Heartbeat::new(plane.clone(), Arc::clone(&q), key.verifying_key(), last_resort);

    assert!(hb.ping_once().await.is_err());
    assert!(q.peek_result().unwrap().is_none());

    let report = hb.ping_once().await.unwrap();
    assert_eq!(report.sent, Outbound::Nothing);
    assert_eq!(report.enqueued, Some(7));
    assert!(plane.sent()[1].result.is_none());
}

#[tokio::test]
async fn test_auth_rejection_keeps_result() {
    let key = generate_signing_key();
    let q = queue();
    finished(&q, 8);
    let plane = FakeControlPlane::default();
    plane.reject_ping(401);
    let mut hb = Heartbeat::new(plane, Arc::clone(&q), key.verifying_key(), silent());

    assert!(hb.ping_once().await.is_err());
    assert_eq!(q.peek_result().unwrap().unwrap().job_id, 8);
}

#[tokio::test]
async fn test_events_batch_is_resent_until_acknowledged() {
    let key = generate_signing_key();
    let q = queue();
    for i in 0..7 {
        q.save_event(&event(&format!("e{i}"))).unwrap();
    }
    let plane = FakeControlPlane::default();
    plane.fail_ping();
    plane.answer_ping(signed(&key, job(0), 0));
    plane.answer_ping(signed(&key, job(0), 0));
    let mut hb = Heartbeat::new(plane.clone(), Arc::clone(&q), key.verifying_key(), silent())
        .with_events_per_ping(5);

    assert!(hb.ping_once().await.is_err());
    assert_eq!(hb.ping_once().await.unwrap().sent, Outbound::Events(5));
    assert_eq!(hb.ping_once().await.unwrap().sent, Outbound::Events(2));

    let sent = plane.sent();
    assert_eq!(sent[0].events, sent[1].events, "failed batch must be resent as is");
    assert_eq!(sent[2].events.as_ref().unwrap()[0].event_id, "e5");
    assert_eq!(q.stats().unwrap().events, 0);
}

#[tokio::test]
async fn test_zero_interval_and_no_job_leave_state_alone() {
    let key = generate_signing_key();
    let plane = FakeControlPlane::default();
    plane.answer_ping(signed(&key, job(0), 0));
    let mut hb = Heartbeat::new(plane, queue(), key.verifying_key(), silent());

    let report = hb.ping_once().await.unwrap();
    assert!(report.trusted);
    assert_eq!(report.sent, Outbound::Nothing);
    assert_eq!(report.enqueued, None);
    assert_eq!(report.interval, FALLBACK_INTERVAL);
}

#[tokio::test]
async fn test_duplicate_delivery_is_enqueued_once() {
    let key = generate_signing_key();
    let q = queue();
    let plane = FakeControlPlane::default();
    plane.answer_ping(signed(&key, job(5), 0));
    plane.answer_ping(signed(&key, job(5), 0));
    let mut hb = Heartbeat::new(plane, Arc::clone(&q), key.verifying_key(), silent());

    assert_eq!(hb.ping_once().await.unwrap().enqueued, Some(5));
    assert_eq!(hb.ping_once().await.unwrap().enqueued, None);
    assert_eq!(q.stats().unwrap().jobs, 1);
}

#[tokio::test]
async fn test_corrupt_result_goes_to_last_resort_and_events_still_flow() {
    use outpost_agent::application::ports::{Key, QueueStore};
    let key = generate_signing_key();
    let q = queue();
    q.store().write(&Key::result(12), b"not json").unwrap();
    q.save_event(&event("e0")).unwrap();
    let mut last_resort = MockLastResort::new();
    last_resort
        .expect_record()
        .withf(|m| m.contains("job_12.result"))
        .times(1)
        .return_const(());
    let hb = Heartbeat::new(FakeControlPlane::default(), q, key.verifying_key(), last_resort);

    let (_, sent) = hb.next_request();
    assert_eq!(sent, Outbound::Events(1));
}

#[tokio::test(start_paused = true)]
async fn test_register_retries_with_capped_backoff() {
    let plane = FakeControlPlane::default();
    plane.fail_register(3);
    let hb = Heartbeat::new(
        plane.clone(),
        queue(),
        generate_signing_key().verifying_key(),
        silent(),
    )
    .with_backoff(Backoff::unjittered());

    let started = tokio::time::Instant::now();
    hb.register(&host().registration()).await;

    assert_eq!(plane.register_calls(), 4);
    assert_eq!(started.elapsed(), Duration::from_secs(15 + 60 + 240));
}
