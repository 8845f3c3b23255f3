use std::sync::Once;

use chrono::{DateTime, Duration, TimeZone, Utc};
use narrator_core::{BoardError, JobBoard, JobPatch, JobSource, JobStatus, MAX_ACTIVE_JOBS};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(engine_logging::initialize_for_tests);
}

fn source(url: &str) -> JobSource {
    JobSource {
        tab_id: Some(7),
        url: url.to_string(),
        page_title: String::from("Example page"),
        article_title: None,
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn create(board: &mut JobBoard, url: &str, at: DateTime<Utc>) -> narrator_core::ProcessingJob {
    board
        .create(source(url), String::from("Some text."), String::from("out.wav"), at)
        .expect("create job")
}

#[test]
fn create_starts_jobs_queued_with_unique_ids() {
    init_logging();
    let mut board = JobBoard::new();

    let a = create(&mut board, "https://a.example.com", t0());
    let b = create(&mut board, "https://b.example.com", t0());

    assert_ne!(a.id, b.id);
    assert_eq!(a.status, JobStatus::Queued);
    assert_eq!(a.progress, 0);
    assert_eq!(a.created_at, t0());
    assert_eq!(board.len(), 2);
    assert_eq!(board.non_terminal_count(), 2);
}

#[test]
fn capacity_refuses_a_fourth_active_job_and_frees_after_terminal() {
    init_logging();
    let mut board = JobBoard::new();

    let jobs: Vec<_> = (0..MAX_ACTIVE_JOBS)
        .map(|i| create(&mut board, &format!("https://{i}.example.com"), t0()))
        .collect();
    assert!(!board.can_start_new_job());

    let err = board
        .create(source("https://late.example.com"), String::new(), String::new(), t0())
        .unwrap_err();
    assert_eq!(
        err,
        BoardError::CapacityExceeded {
            limit: MAX_ACTIVE_JOBS
        }
    );

    // One job finishing makes room again.
    board
        .merge(
            &jobs[0].id,
            JobPatch::default()
                .with_status(JobStatus::Processing)
                .with_progress(10),
        )
        .expect("start job");
    board
        .merge(&jobs[0].id, JobPatch::succeeded("Audio saved"))
        .expect("finish job");
    assert!(board.can_start_new_job());
    create(&mut board, "https://late.example.com", t0());
    assert_eq!(board.non_terminal_count(), MAX_ACTIVE_JOBS);
}

#[test]
fn merge_applies_partial_fields_last_write_wins() {
    init_logging();
    let mut board = JobBoard::new();
    let job = create(&mut board, "https://a.example.com", t0());

    let updated = board
        .merge(
            &job.id,
            JobPatch::default()
                .with_message("Replaced by the editor")
                .with_text("Edited text."),
        )
        .expect("merge");
    assert_eq!(updated.message, "Replaced by the editor");
    assert_eq!(updated.text, "Edited text.");
    // Untouched fields survive the merge.
    assert_eq!(updated.status, JobStatus::Queued);
    assert_eq!(updated.filename, "out.wav");

    let updated = board
        .merge(&job.id, JobPatch::default().with_message("Second write"))
        .expect("merge");
    assert_eq!(updated.message, "Second write");
    assert_eq!(updated.text, "Edited text.");
}

#[test]
fn merge_refuses_leaving_a_terminal_state() {
    init_logging();
    let mut board = JobBoard::new();
    let job = create(&mut board, "https://a.example.com", t0());

    board
        .merge(&job.id, JobPatch::default().with_status(JobStatus::Processing))
        .expect("start");
    board
        .merge(&job.id, JobPatch::failed("Conversion timed out"))
        .expect("fail");

    // A late pipeline completion must not overwrite the timeout result.
    let err = board
        .merge(&job.id, JobPatch::succeeded("Audio saved"))
        .unwrap_err();
    assert_eq!(
        err,
        BoardError::InvalidTransition {
            from: JobStatus::Error,
            to: JobStatus::Success,
        }
    );
    let current = board.get(&job.id).expect("job still present");
    assert_eq!(current.status, JobStatus::Error);
    assert_eq!(current.message, "Conversion timed out");
}

#[test]
fn queued_jobs_may_be_cancelled_but_not_completed() {
    init_logging();
    let mut board = JobBoard::new();

    let cancelled = create(&mut board, "https://a.example.com", t0());
    board
        .merge(&cancelled.id, JobPatch::failed("Cancelled by user"))
        .expect("cancel straight from queued");
    assert_eq!(
        board.get(&cancelled.id).expect("present").status,
        JobStatus::Error
    );

    let skipped = create(&mut board, "https://b.example.com", t0());
    let err = board
        .merge(&skipped.id, JobPatch::default().with_status(JobStatus::Success))
        .unwrap_err();
    assert_eq!(
        err,
        BoardError::InvalidTransition {
            from: JobStatus::Queued,
            to: JobStatus::Success,
        }
    );
}

#[test]
fn merge_keeps_progress_monotonic() {
    init_logging();
    let mut board = JobBoard::new();
    let job = create(&mut board, "https://a.example.com", t0());

    board
        .merge(&job.id, JobPatch::progressing(60, "Generating speech (3/5)"))
        .expect("advance");
    // A racing writer reporting an older percentage is ignored.
    let merged = board
        .merge(&job.id, JobPatch::progressing(30, "Generating speech (2/5)"))
        .expect("stale write");
    assert_eq!(merged.progress, 60);
    assert_eq!(merged.message, "Generating speech (2/5)");
}

#[test]
fn merge_after_removal_reports_not_found() {
    init_logging();
    let mut board = JobBoard::new();
    let job = create(&mut board, "https://a.example.com", t0());

    assert!(board.remove(&job.id).is_some());
    // Removal is idempotent.
    assert!(board.remove(&job.id).is_none());

    let err = board
        .merge(&job.id, JobPatch::default().with_progress(50))
        .unwrap_err();
    assert_eq!(err, BoardError::NotFound { id: job.id.clone() });
}

#[test]
fn cleanup_evicts_by_age_regardless_of_status() {
    init_logging();
    let mut board = JobBoard::new();
    let retention = Duration::minutes(60);

    let old_done = create(&mut board, "https://old-done.example.com", t0());
    board
        .merge(&old_done.id, JobPatch::default().with_status(JobStatus::Processing))
        .expect("start");
    board
        .merge(&old_done.id, JobPatch::succeeded("Audio saved"))
        .expect("finish");
    let old_running = create(&mut board, "https://old-running.example.com", t0());
    board
        .merge(&old_running.id, JobPatch::default().with_status(JobStatus::Processing))
        .expect("start");

    let fresh_at = t0() + Duration::minutes(45);
    let fresh = create(&mut board, "https://fresh.example.com", fresh_at);

    // Sweep 61 minutes after the first two were created: both go, even the
    // one still processing; the fresh job stays.
    let sweep_at = t0() + Duration::minutes(61);
    let evicted = board.cleanup_old(sweep_at, retention);
    let mut evicted_ids: Vec<_> = evicted.iter().map(|job| job.id.clone()).collect();
    evicted_ids.sort();
    let mut expected = vec![old_done.id.clone(), old_running.id.clone()];
    expected.sort();
    assert_eq!(evicted_ids, expected);
    assert_eq!(board.len(), 1);
    assert!(board.get(&fresh.id).is_some());

    // A second sweep at the same instant finds nothing new.
    assert!(board.cleanup_old(sweep_at, retention).is_empty());
}

#[test]
fn restore_preserves_records_and_counts() {
    init_logging();
    let mut board = JobBoard::new();
    let job = create(&mut board, "https://a.example.com", t0());
    let snapshot = board.get(&job.id).expect("present").clone();

    let mut restored = JobBoard::new();
    restored.restore(snapshot.clone());
    assert_eq!(restored.get(&job.id), Some(&snapshot));
    assert_eq!(restored.non_terminal_count(), 1);
}
