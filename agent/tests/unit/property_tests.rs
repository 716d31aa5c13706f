//! Property-based tests for retry scheduling, queue ordering and redaction.
//!
//! Uses `proptest` to verify invariants across many random inputs.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use chrono::Utc;
use proptest::prelude::*;

use outpost_agent::application::services::queue::{JobQueue, Peeked};
use outpost_agent::domain::backoff::{CAP_SECS, next_interval};
use outpost_agent::domain::{Backoff, Redactor};
use outpost_common::{Input, Job, JobResult, Var};

use crate::mocks::{MemoryStore, job};

// ============================================================================
// Backoff
// ============================================================================

proptest! {
    /// Jitter only ever shortens a wait, by at most a fifth.
    #[test]
    fn prop_delay_within_band(host in "[a-z0-9-]{1,40}", failures in 0u32..64) {
        let base = next_interval(failures);
        let delay = Backoff::for_host(&host).delay(failures);
        prop_assert!(delay <= base);
        prop_assert!(delay >= base - base / 5);
    }

    /// No wait ever exceeds the cap.
    #[test]
    fn prop_delay_never_exceeds_cap(host in ".{0,40}", failures in any::<u32>()) {
        prop_assert!(Backoff::for_host(&host).delay(failures) <= Duration::from_secs(CAP_SECS));
    }

    /// The un-jittered schedule never shrinks as failures accumulate.
    #[test]
    fn prop_interval_monotonic(failures in 0u32..1000) {
        prop_assert!(next_interval(failures) <= next_interval(failures + 1));
    }
}

// ============================================================================
// Queue ordering
// ============================================================================

proptest! {
    /// Jobs are handed out in the order they were enqueued.
    #[test]
    fn prop_queue_is_fifo(ids in proptest::collection::hash_set(1i64..100_000, 1..20)) {
        let ids: Vec<i64> = ids.into_iter().collect();
        let q = JobQueue::new(MemoryStore::default());
        for id in &ids {
            prop_assert!(q.enqueue(&job(*id)).unwrap());
        }
        let mut seen = Vec::new();
        while let Some(Peeked::Ready(next)) = q.peek().unwrap() {
            seen.push(next.job_id);
            q.submit(&JobResult::new(next.job_id, String::new(), None, Utc::now())).unwrap();
            q.remove(next.job_id).unwrap();
        }
        prop_assert_eq!(seen, ids);
    }
}

// ============================================================================
// Redaction
// ============================================================================

proptest! {
    /// A secret input never survives redaction, wherever it appears.
    #[test]
    fn prop_secret_is_masked(
        secret in "[a-w0-9]{6,12}",
        before in "[A-Z ]{0,20}",
        after in "[A-Z ]{0,20}",
    ) {
        let job = Job {
            job_id: 1,
            input: Input {
                vars: vec![],
                secrets: vec![Var {
                    name: "TOKEN".into(),
                    value: secret.clone(),
                    description: String::new(),
                }],
            },
            ..Job::default()
        };
        let text = format!("{before}{secret}{after}\n{secret}");
        let out = Redactor::for_job(&job).redact(&text);
        prop_assert!(!out.contains(&secret), "leaked: {}", out);
    }
}
