//! Admission-control tests for the investigation tracker under contention.

use std::sync::{Arc, Barrier};

use rc_core::investigation::{InvestigationStatus, InvestigationTracker, TrackerError};
use rc_core::types::IncidentDescriptor;

fn incident() -> IncidentDescriptor {
    IncidentDescriptor::new("/aws/lambda/foo", "AWS/Lambda", "Errors", "FunctionName", "foo")
}

#[test]
fn concurrent_accepts_admit_exactly_one() {
    let tracker = InvestigationTracker::new();
    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let tracker = tracker.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                tracker.accept(&incident())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let admitted: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(admitted.len(), 1);

    let winner = admitted[0].investigation_id;
    for r in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(r, &TrackerError::Conflict { running: winner });
    }
    assert_eq!(tracker.read().investigation_id, Some(winner));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn conflicts_persist_until_terminal_state() {
    let tracker = InvestigationTracker::new();
    tracker.accept(&incident()).unwrap();

    for _ in 0..3 {
        let t = tracker.clone();
        let res = tokio::spawn(async move { t.accept(&incident()) }).await.unwrap();
        assert!(matches!(res, Err(TrackerError::Conflict { .. })));
    }

    tracker.report_completion("no action needed").unwrap();
    assert_eq!(tracker.status(), InvestigationStatus::Completed);
    assert!(tracker.accept(&incident()).is_ok());
}
