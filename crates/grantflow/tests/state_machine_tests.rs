//! Lifecycle tests: retry ceiling, terminal states, reset and stale claims.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};

use common::{insert_and_claim, pipeline_config, state_machine, DetailBuilder, StubSource, WORKER};
use grantflow::db::{JobRepository, MemoryRepository};
use grantflow::pipeline::{next_status, ClaimOutcome, JobEvent};
use grantflow::worker::{Job, ProcessingStatus};

const MISSING_URL: &str = "https://portal.example.go.kr/ancm/view.do?id=404";

struct TransitionCase {
    name: &'static str,
    from: ProcessingStatus,
    event: JobEvent,
    attempts: u32,
    expected: Option<ProcessingStatus>,
}

const TRANSITIONS: &[TransitionCase] = &[
    TransitionCase {
        name: "claim_pending",
        from: ProcessingStatus::Pending,
        event: JobEvent::Claim,
        attempts: 0,
        expected: Some(ProcessingStatus::Processing),
    },
    TransitionCase {
        name: "complete_processing",
        from: ProcessingStatus::Processing,
        event: JobEvent::Complete,
        attempts: 0,
        expected: Some(ProcessingStatus::Completed),
    },
    TransitionCase {
        name: "fail_below_ceiling",
        from: ProcessingStatus::Processing,
        event: JobEvent::Fail,
        attempts: 2,
        expected: Some(ProcessingStatus::Pending),
    },
    TransitionCase {
        name: "fail_at_ceiling",
        from: ProcessingStatus::Processing,
        event: JobEvent::Fail,
        attempts: 3,
        expected: Some(ProcessingStatus::Failed),
    },
    TransitionCase {
        name: "reclaim_at_ceiling",
        from: ProcessingStatus::Processing,
        event: JobEvent::Reclaim,
        attempts: 3,
        expected: Some(ProcessingStatus::Failed),
    },
    TransitionCase {
        name: "reset_failed",
        from: ProcessingStatus::Failed,
        event: JobEvent::Reset,
        attempts: 3,
        expected: Some(ProcessingStatus::Pending),
    },
    TransitionCase {
        name: "reset_completed",
        from: ProcessingStatus::Completed,
        event: JobEvent::Reset,
        attempts: 0,
        expected: Some(ProcessingStatus::Pending),
    },
    TransitionCase {
        name: "claim_completed_rejected",
        from: ProcessingStatus::Completed,
        event: JobEvent::Claim,
        attempts: 0,
        expected: None,
    },
    TransitionCase {
        name: "claim_failed_rejected",
        from: ProcessingStatus::Failed,
        event: JobEvent::Claim,
        attempts: 3,
        expected: None,
    },
    TransitionCase {
        name: "complete_pending_rejected",
        from: ProcessingStatus::Pending,
        event: JobEvent::Complete,
        attempts: 0,
        expected: None,
    },
];

#[test]
fn test_transition_table() {
    for case in TRANSITIONS {
        let result = next_status(case.from, case.event, case.attempts, 3);
        assert_eq!(
            result.ok(),
            case.expected,
            "Test '{}': {} on {} with {} attempts",
            case.name,
            case.event,
            case.from,
            case.attempts
        );
    }
}

/// Claims and runs the job once. Panics if it is not claimable.
async fn run_once(
    machine: &grantflow::pipeline::JobStateMachine,
    job_id: &str,
) -> grantflow::worker::JobReport {
    machine
        .claim_and_run(job_id)
        .await
        .expect("claim query")
        .expect("job was claimable")
}

#[tokio::test]
async fn test_failures_stop_at_the_retry_ceiling() {
    let repo = Arc::new(MemoryRepository::new());
    let machine = state_machine(repo.clone(), Arc::new(StubSource::new()), pipeline_config(3));

    let job = Job::new(MISSING_URL);
    repo.insert_job(&job).unwrap();

    let expected = [
        (1, ProcessingStatus::Pending),
        (2, ProcessingStatus::Pending),
        (3, ProcessingStatus::Failed),
    ];
    for (attempts, status) in expected {
        let report = run_once(&machine, &job.id).await;
        assert_eq!(report.attempts, attempts);
        assert_eq!(report.status, status);
    }

    let stored = repo.find_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.status, ProcessingStatus::Failed);
    assert!(stored.processed_at.is_some());
    assert!(stored.next_attempt_at.is_none());
    assert!(stored.processing_error.unwrap().contains("503"));

    // A FAILED job is never handed out again.
    let later = Utc::now() + Duration::days(30);
    assert!(repo.find_pending_jobs(None, later, 10).unwrap().is_empty());
    assert!(matches!(machine.claim(&job.id).unwrap(), ClaimOutcome::Busy));
    assert!(machine.claim_and_run(&job.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reset_restores_a_fresh_retry_budget() {
    let repo = Arc::new(MemoryRepository::new());
    let machine = state_machine(repo.clone(), Arc::new(StubSource::new()), pipeline_config(1));

    let job = Job::new(MISSING_URL);
    repo.insert_job(&job).unwrap();
    let report = run_once(&machine, &job.id).await;
    assert_eq!(report.status, ProcessingStatus::Failed);

    let reset = machine.reset(&job.id).unwrap();
    assert_eq!(reset.status, ProcessingStatus::Pending);
    assert_eq!(reset.processing_attempts, 0);
    assert!(reset.processing_error.is_none());
    assert!(reset.processing_worker.is_none());
    assert!(reset.next_attempt_at.is_none());

    let report = run_once(&machine, &job.id).await;
    assert_eq!(report.attempts, 1);
}

#[tokio::test]
async fn test_transient_failure_then_success() {
    let url = "https://portal.example.go.kr/ancm/view.do?id=7";
    let page = r#"<html><body>
        <table><tr><th>공고명</th><td>2024년 수소 연료전지 실증 지원사업</td></tr></table>
        <div class="view_cont">정부출연금은 과제당 5억원 이내입니다. 수소 연료전지 실증 과제를 지원하며
        중소기업이 신청할 수 있습니다. 접수마감 2024년 4월 30일.</div>
    </body></html>"#;
    let source = Arc::new(StubSource::new().page(url, page).failing(url, 1, 502));
    let repo = Arc::new(MemoryRepository::new());
    let machine = state_machine(repo.clone(), source.clone(), pipeline_config(3));

    let job = Job::new(url);
    repo.insert_job(&job).unwrap();

    let first = run_once(&machine, &job.id).await;
    assert_eq!(first.status, ProcessingStatus::Pending);
    assert_eq!(first.attempts, 1);

    let second = run_once(&machine, &job.id).await;
    assert!(second.success(), "{:?}", second.error);
    assert_eq!(second.attempts, 1);
    assert!(second.error.is_none());
    assert_eq!(source.detail_calls(), 2);
}

#[tokio::test]
async fn test_permanent_detail_error_is_skipped_without_retry() {
    let source = Arc::new(StubSource::new().page("not a url", "<html><h1>공고</h1></html>"));
    let repo = Arc::new(MemoryRepository::new());
    let machine = state_machine(repo.clone(), source.clone(), pipeline_config(3));

    let job = Job::new("not a url");
    repo.insert_job(&job).unwrap();

    let report = run_once(&machine, &job.id).await;
    assert_eq!(report.status, ProcessingStatus::Skipped);
    assert_eq!(report.attempts, 0);
    assert!(report.error.unwrap().contains("Invalid URL"));
    assert_eq!(source.detail_calls(), 1);
}

#[test]
fn test_stale_claim_is_reclaimed_and_counts_as_attempt() {
    let repo = Arc::new(MemoryRepository::new());
    let machine = state_machine(repo.clone(), Arc::new(StubSource::new()), pipeline_config(1));

    let job = Job::with_detail(MISSING_URL, DetailBuilder::hydrogen().build());
    repo.insert_job(&job).unwrap();
    let long_ago = Utc::now() - Duration::hours(6);
    repo.try_claim(&job.id, "crashed-worker", long_ago)
        .unwrap()
        .unwrap();

    let reports = machine.reclaim_stale(Utc::now()).unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, ProcessingStatus::Failed);

    let stored = repo.find_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.processing_attempts, 1);
    assert_eq!(stored.processing_error.as_deref(), Some("claim expired"));
}

#[tokio::test]
async fn test_late_write_after_reclaim_is_dropped() {
    let repo = Arc::new(MemoryRepository::new());
    let machine = state_machine(repo.clone(), Arc::new(StubSource::new()), pipeline_config(3));

    let job = insert_and_claim(
        repo.as_ref(),
        Job::with_detail(MISSING_URL, DetailBuilder::hydrogen().build()),
    );
    assert_eq!(job.processing_worker.as_deref(), Some(WORKER));

    // Another worker takes the job over after a reset and a new claim.
    machine.reset(&job.id).unwrap();
    repo.try_claim(&job.id, "other-worker", Utc::now())
        .unwrap()
        .unwrap();

    let report = machine.run(job).await;
    assert!(report.ownership_lost);

    let stored = repo.find_job(&report.job_id).unwrap().unwrap();
    assert_eq!(stored.status, ProcessingStatus::Processing);
    assert_eq!(stored.processing_worker.as_deref(), Some("other-worker"));
    assert!(stored.funding_program_id.is_none());
}
