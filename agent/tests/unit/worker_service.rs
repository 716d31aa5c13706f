//! Worker service: execution, redaction, failure reporting and the run loop.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use outpost_agent::application::ports::{Key, QueueStore, Slot};
use outpost_agent::application::services::queue::JobQueue;
use outpost_agent::application::services::worker::Worker;
use outpost_agent::domain::{JobState, WorkerStatus};
use outpost_common::{Credentials, Input, Job, Var};
use tokio::sync::watch;

use crate::mocks::{FakeRunner, MemoryStore, MockLastResort, job, silent};

const POLL: Duration = Duration::from_secs(1);

fn queue() -> Arc<JobQueue<MemoryStore>> {
    Arc::new(JobQueue::new(MemoryStore::default()))
}

#[tokio::test]
async fn test_worker_runs_job_to_successful_result() {
    let q = queue();
    q.enqueue(&job(42)).unwrap();
    let worker = Worker::new(FakeRunner::ok("ok"), Arc::clone(&q), silent(), POLL);
    worker.start();

    assert!(worker.run_once().await.unwrap());

    let result = q.peek_result().unwrap().unwrap();
    assert_eq!(result.job_id, 42);
    assert!(result.success);
    assert_eq!(result.log, "ok");
    assert!(result.err.is_empty());
    assert_eq!(q.state(42), JobState::Removed);
    assert_eq!(q.store().keys(), vec![Key::result(42)]);
    assert_eq!(worker.status(), WorkerStatus::Ready);
}

#[test]
fn test_submit_then_remove_marker_states() {
    let q = queue();
    q.enqueue(&job(42)).unwrap();
    q.peek().unwrap();
    q.submit(&outpost_common::JobResult::new(42, "ok".into(), None, chrono::Utc::now()))
        .unwrap();
    assert!(!q.store().exists(&Key::started(42)));
    assert!(q.store().exists(&Key::submitted(42)));

    q.remove(42).unwrap();
    assert!(!q.store().exists(&Key::started(42)));
    assert!(!q.store().exists(&Key::submitted(42)));
    assert!(!q.store().exists(&Key::job(42)));
}

#[tokio::test]
async fn test_worker_redacts_credentials_and_secrets() {
    let q = queue();
    let secret_job = Job {
        credentials: Some(Credentials {
            user: "deployer".into(),
            pwd: "s3cr3t".into(),
        }),
        input: Input {
            vars: vec![],
            secrets: vec![Var {
                name: "TOKEN".into(),
                value: "tok-999".into(),
                description: String::new(),
            }],
        },
        ..job(5)
    };
    q.enqueue(&secret_job).unwrap();
    let runner = FakeRunner::exits_with(
        "auth deployer s3cr3t\nusing tok-999",
        "deployer rejected: tok-999",
    );
    let worker = Worker::new(runner, Arc::clone(&q), silent(), POLL);
    worker.start();
    worker.run_once().await.unwrap();

    let result = q.peek_result().unwrap().unwrap();
    assert!(!result.success);
    assert_eq!(result.log, "auth **** xxxx\nusing xxxx");
    assert_eq!(result.err, "**** rejected: xxxx");
}

#[tokio::test]
async fn test_worker_reports_spawn_failure_as_failed_result() {
    let q = queue();
    q.enqueue(&job(9)).unwrap();
    let worker = Worker::new(FakeRunner::spawn_fails("failed to spawn pkgrunner"), Arc::clone(&q), silent(), POLL);
    worker.start();
    worker.run_once().await.unwrap();

    let result = q.peek_result().unwrap().unwrap();
    assert_eq!(result.job_id, 9);
    assert!(!result.success);
    assert!(result.err.contains("failed to spawn"));
    assert_eq!(q.state(9), JobState::Removed);
}

#[tokio::test]
async fn test_corrupt_job_with_salvageable_id_is_reported() {
    let q = queue();
    q.store()
        .write(&Key::new(Slot::Process, "job_77.job"), b"{\"job_id\":")
        .unwrap();
    let runner = FakeRunner::ok("never");
    let worker = Worker::new(runner.clone(), Arc::clone(&q), silent(), POLL);
    worker.start();

    assert!(worker.run_once().await.unwrap());
    assert_eq!(runner.runs(), 0);
    let result = q.peek_result().unwrap().unwrap();
    assert_eq!(result.job_id, 77);
    assert!(!result.success);
    assert!(q.store().list(Slot::Process, "job").unwrap().is_empty());
}

#[tokio::test]
async fn test_corrupt_job_without_id_goes_to_last_resort() {
    let q = queue();
    q.store()
        .write(&Key::new(Slot::Process, "job_x.job"), b"garbage")
        .unwrap();
    let mut last_resort = MockLastResort::new();
    last_resort
        .expect_record()
        .withf(|m| m.contains("job_x.job"))
        .times(1)
        .return_const(());
    let worker = Worker::new(FakeRunner::ok(""), Arc::clone(&q), last_resort, POLL);
    worker.start();

    worker.run_once().await.unwrap();
    assert!(q.store().list(Slot::Process, "job").unwrap().is_empty());
    assert!(q.peek_result().unwrap().is_none());
}

#[tokio::test]
async fn test_worker_processes_one_job_per_iteration() {
    let q = queue();
    q.enqueue(&job(1)).unwrap();
    q.enqueue(&job(2)).unwrap();
    let runner = FakeRunner::ok("ok");
    let worker = Worker::new(runner.clone(), Arc::clone(&q), silent(), POLL);
    worker.start();

    worker.run_once().await.unwrap();
    assert_eq!(runner.runs(), 1);
    assert_eq!(q.state(2), JobState::Queued);
    worker.run_once().await.unwrap();
    assert_eq!(runner.runs(), 2);
    assert!(!worker.run_once().await.unwrap());
}

#[tokio::test]
async fn test_run_once_requires_ready() {
    let worker = Worker::new(FakeRunner::ok(""), queue(), silent(), POLL);
    assert_eq!(worker.status(), WorkerStatus::Stopped);
    assert!(worker.run_once().await.is_err());
    worker.start();
    assert_eq!(worker.status(), WorkerStatus::Ready);
    worker.stop();
    assert!(worker.run_once().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_run_wakes_on_enqueue_and_stops_on_shutdown() {
    let q = queue();
    let runner = FakeRunner::ok("ok");
    // Long poll: only the enqueue notification can wake the worker in time.
    let worker = Worker::new(runner.clone(), Arc::clone(&q), silent(), Duration::from_secs(3600));
    let (tx, rx) = watch::channel(false);

    let driver = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.enqueue(&job(11)).unwrap();
        while q.peek_result().unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
    };
    let started = tokio::time::Instant::now();
    tokio::join!(worker.run(rx), driver);

    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(runner.runs(), 1);
    assert_eq!(worker.status(), WorkerStatus::Stopped);
}
