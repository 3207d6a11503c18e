use crate::destination::DestinationResolver;
use crate::error::FetchError;
use crate::relaunch::SessionCompletionToken;
use crate::test_helpers::{FakeBehavior, create_test_fetcher, create_test_fetcher_with, outcome};
use crate::types::{DestinationKind, EntryState, Event, TransferRequest};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

const MOVIE: &str = "https://media.example.com/v/movie.mp4";
const CLIP: &str = "https://media.example.com/live/clip.m3u8";

fn is_staged(event: &Event) -> bool {
    matches!(event, Event::Staged { .. })
}

fn staged_path(event: Event) -> PathBuf {
    match event {
        Event::Staged { path, .. } => path,
        other => panic!("expected Staged, got {:?}", other),
    }
}

#[tokio::test]
async fn pass_through_moves_staged_file_to_output() {
    let mut t = create_test_fetcher(FakeBehavior::Succeed).await;
    let handle = t.fetcher.fetch(MOVIE).await.unwrap();
    let id = handle.task_id();
    let location = t.backend_artifact("transfer-7.part", b"movie bytes").await;

    t.backend.complete(id, &location);
    let delivery = outcome(handle).await.unwrap();

    assert_eq!(delivery.task_id, id);
    assert_eq!(delivery.path, t.output_dir().join("movie.mp4"));
    assert!(!delivery.transcoded);
    assert_eq!(delivery.destination, DestinationKind::FileExport);
    assert_eq!(tokio::fs::read(&delivery.path).await.unwrap(), b"movie bytes");

    let staged = staged_path(t.wait_for(is_staged).await);
    assert!(!staged.exists(), "staged file must not survive delivery");
    assert!(!location.exists(), "backend location must be consumed");
    assert!(t.transcoder.calls().is_empty(), "pass-through never transcodes");
    assert_eq!(t.fetcher.pending_count().await, 0);

    let delivered = t
        .wait_for(|e| matches!(e, Event::Delivered { .. }))
        .await;
    assert_eq!(
        delivered,
        Event::Delivered {
            id,
            path: delivery.path.clone(),
            destination: DestinationKind::FileExport,
        }
    );
}

#[tokio::test]
async fn normalized_source_delivers_transcode_output() {
    let mut t = create_test_fetcher(FakeBehavior::Succeed).await;
    let handle = t.fetcher.fetch(CLIP).await.unwrap();
    let id = handle.task_id();
    let location = t.backend_artifact("transfer-1.part", b"segments").await;

    t.backend.complete(id, &location);
    let delivery = outcome(handle).await.unwrap();

    assert!(delivery.transcoded);
    assert_eq!(delivery.path, t.output_dir().join("clip.mp4"));
    assert_eq!(tokio::fs::read(&delivery.path).await.unwrap(), b"transcoded");

    let staged = staged_path(t.wait_for(is_staged).await);
    assert_eq!(t.transcoder.calls(), vec![staged.clone()]);
    assert!(!staged.exists(), "transcode input is deleted after success");
    t.wait_for(|e| matches!(e, Event::Transcoding { id: tid } if *tid == id))
        .await;
}

#[tokio::test]
async fn transcode_failure_reports_exit_code_and_cleans_up() {
    let mut t = create_test_fetcher(FakeBehavior::Fail(1)).await;
    let handle = t.fetcher.fetch(CLIP).await.unwrap();
    let id = handle.task_id();
    let location = t.backend_artifact("transfer-1.part", b"segments").await;

    t.backend.complete(id, &location);
    let result = outcome(handle).await;

    assert!(matches!(result, Err(FetchError::Transcode { code: 1, .. })));
    let staged = staged_path(t.wait_for(is_staged).await);
    assert!(!staged.exists());
    assert!(!t.output_dir().join("clip.mp4").exists());
    assert_eq!(t.fetcher.pending_count().await, 0);

    let failed = t.wait_for(|e| matches!(e, Event::Failed { .. })).await;
    assert!(matches!(failed, Event::Failed { code, .. } if code == "transcode_error"));
}

#[tokio::test]
async fn backend_failure_reports_transfer_error() {
    let t = create_test_fetcher(FakeBehavior::Succeed).await;
    let handle = t.fetcher.fetch(MOVIE).await.unwrap();
    let id = handle.task_id();

    t.backend.fail(id, "connection reset by peer");

    assert_eq!(
        outcome(handle).await,
        Err(FetchError::Transfer {
            message: "connection reset by peer".into()
        })
    );
    assert!(t.fetcher.lookup(id).await.is_none());
}

#[tokio::test]
async fn missing_backend_artifact_is_a_staging_error() {
    let t = create_test_fetcher(FakeBehavior::Succeed).await;
    let handle = t.fetcher.fetch(MOVIE).await.unwrap();
    let id = handle.task_id();

    t.backend
        .complete(id, t.dir.path().join("backend").join("vanished.part"));

    assert!(matches!(
        outcome(handle).await,
        Err(FetchError::Staging { .. })
    ));
    assert_eq!(t.fetcher.pending_count().await, 0);
}

#[tokio::test]
async fn terminal_event_after_release_has_no_side_effects() {
    let mut t = create_test_fetcher(FakeBehavior::Succeed).await;
    let handle = t.fetcher.fetch(MOVIE).await.unwrap();
    let id = handle.task_id();
    let location = t.backend_artifact("transfer-1.part", b"first").await;
    t.backend.complete(id, &location);
    let delivery = outcome(handle).await.unwrap();

    // Replayed completion pointing at a fresh file, then a replayed failure.
    let replay = t.backend_artifact("transfer-1-replay.part", b"second").await;
    t.backend.complete(id, &replay);
    t.backend.fail(id, "late failure");

    t.wait_for(|e| matches!(e, Event::DuplicateDropped { id: d } if *d == id))
        .await;
    t.wait_for(|e| matches!(e, Event::DuplicateDropped { id: d } if *d == id))
        .await;

    assert!(replay.exists(), "a dropped event must not touch the file");
    assert_eq!(tokio::fs::read(&delivery.path).await.unwrap(), b"first");
    assert!(!t.output_dir().join("movie (1).mp4").exists());
}

#[tokio::test]
async fn duplicate_completion_while_processing_runs_pipeline_once() {
    let gate = Arc::new(Notify::new());
    let mut t = create_test_fetcher(FakeBehavior::Gated(gate.clone())).await;
    let handle = t.fetcher.fetch(CLIP).await.unwrap();
    let id = handle.task_id();
    let location = t.backend_artifact("transfer-1.part", b"segments").await;
    let replay = t.backend_artifact("transfer-1-replay.part", b"segments").await;

    t.backend.complete(id, &location);
    t.wait_for(|e| matches!(e, Event::Transcoding { .. })).await;
    t.backend.complete(id, &replay);
    t.wait_for(|e| matches!(e, Event::DuplicateDropped { .. }))
        .await;

    gate.notify_one();
    assert!(outcome(handle).await.is_ok());
    assert_eq!(t.transcoder.calls().len(), 1);
    assert!(replay.exists());
}

#[tokio::test]
async fn progress_is_clamped_and_monotonic() {
    let mut t = create_test_fetcher(FakeBehavior::Succeed).await;
    let handle = t.fetcher.fetch(MOVIE).await.unwrap();
    let id = handle.task_id();

    t.backend.progress(id, 0.5);
    t.backend.progress(id, 0.25);
    t.backend.progress(id, 7.0);

    let first = t.wait_for(|e| matches!(e, Event::Progress { .. })).await;
    let second = t.wait_for(|e| matches!(e, Event::Progress { .. })).await;
    assert_eq!(first, Event::Progress { id, fraction: 0.5 });
    assert_eq!(second, Event::Progress { id, fraction: 1.0 });
    assert_eq!(t.fetcher.lookup(id).await.unwrap().progress, 1.0);
    assert_eq!(t.fetcher.lookup(id).await.unwrap().state, EntryState::Pending);
}

#[tokio::test]
async fn pipeline_panic_is_reported_and_cleaned_up() {
    let mut t = create_test_fetcher(FakeBehavior::Panic).await;
    let handle = t.fetcher.fetch(CLIP).await.unwrap();
    let id = handle.task_id();
    let location = t.backend_artifact("transfer-1.part", b"segments").await;

    t.backend.complete(id, &location);

    assert!(matches!(
        outcome(handle).await,
        Err(FetchError::Internal { message }) if message.contains("blew up")
    ));
    let staged = staged_path(t.wait_for(is_staged).await);
    assert!(!staged.exists());
    assert_eq!(t.fetcher.pending_count().await, 0);
}

#[tokio::test]
async fn cancel_during_transcode_stops_the_pipeline() {
    let gate = Arc::new(Notify::new());
    let mut t = create_test_fetcher(FakeBehavior::Gated(gate)).await;
    let handle = t.fetcher.fetch(CLIP).await.unwrap();
    let id = handle.task_id();
    let location = t.backend_artifact("transfer-1.part", b"segments").await;

    t.backend.complete(id, &location);
    let staged = staged_path(t.wait_for(is_staged).await);
    t.wait_for(|e| matches!(e, Event::Transcoding { .. })).await;
    t.fetcher.cancel(id).await.unwrap();

    assert_eq!(outcome(handle).await, Err(FetchError::Cancelled));
    assert!(!staged.exists());
    assert!(!t.output_dir().join("clip.mp4").exists());
    assert_eq!(t.fetcher.pending_count().await, 0);
}

#[tokio::test]
async fn cancel_before_completion_aborts_backend_transfer() {
    let mut t = create_test_fetcher(FakeBehavior::Succeed).await;
    let handle = t.fetcher.fetch(MOVIE).await.unwrap();
    let id = handle.task_id();

    t.fetcher.cancel(id).await.unwrap();
    assert_eq!(outcome(handle).await, Err(FetchError::Cancelled));
    assert_eq!(t.backend.cancelled(), vec![id]);

    assert!(t.fetcher.cancel(id).await.is_err());
}

#[tokio::test]
async fn completion_racing_a_cancel_removes_the_backend_artifact() {
    let mut t = create_test_fetcher(FakeBehavior::Succeed).await;
    let handle = t.fetcher.fetch(MOVIE).await.unwrap();
    let id = handle.task_id();

    t.fetcher.cancel(id).await.unwrap();
    assert_eq!(outcome(handle).await, Err(FetchError::Cancelled));

    // The transfer finished before the abort reached the backend.
    let location = t.backend_artifact("transfer-9.part", b"late").await;
    t.backend.complete(id, &location);
    t.wait_for(|e| matches!(e, Event::DuplicateDropped { id: d } if *d == id))
        .await;
    assert!(!location.exists(), "artifact of a cancelled transfer is removed");
    assert!(!t.output_dir().join("movie.mp4").exists());

    // A replay after that is dropped without touching anything.
    let replay = t.backend_artifact("transfer-9-replay.part", b"late").await;
    t.backend.complete(id, &replay);
    t.wait_for(|e| matches!(e, Event::DuplicateDropped { id: d } if *d == id))
        .await;
    assert!(replay.exists(), "a replayed event must not touch the file");
}

#[tokio::test]
async fn same_named_sources_transcoding_together_get_distinct_outputs() {
    let gate = Arc::new(Notify::new());
    let mut t = create_test_fetcher(FakeBehavior::Gated(gate.clone())).await;

    let first = t
        .fetcher
        .fetch("https://media.example.com/a/clip.m3u8")
        .await
        .unwrap();
    let second = t
        .fetcher
        .fetch("https://media.example.com/b/clip.m3u8")
        .await
        .unwrap();
    let a = t.backend_artifact("transfer-1.part", b"a").await;
    let b = t.backend_artifact("transfer-2.part", b"b").await;
    t.backend.complete(first.task_id(), &a);
    t.backend.complete(second.task_id(), &b);

    t.wait_for(|e| matches!(e, Event::Transcoding { .. })).await;
    t.wait_for(|e| matches!(e, Event::Transcoding { .. })).await;

    gate.notify_one();
    t.wait_for(|e| matches!(e, Event::Delivered { .. })).await;
    gate.notify_one();

    let first = outcome(first).await.unwrap();
    let second = outcome(second).await.unwrap();
    assert_ne!(first.path, second.path, "each delivery owns its own file");

    let mut paths = vec![first.path.clone(), second.path.clone()];
    paths.sort();
    assert_eq!(
        paths,
        vec![
            t.output_dir().join("clip (1).mp4"),
            t.output_dir().join("clip.mp4"),
        ]
    );
    for path in &paths {
        assert_eq!(tokio::fs::read(path).await.unwrap(), b"transcoded");
    }
}

#[tokio::test]
async fn failed_pipeline_leaves_earlier_delivery_alone() {
    let mut t = create_test_fetcher(FakeBehavior::Succeed).await;
    let first = t.fetcher.fetch(CLIP).await.unwrap();
    let loc = t.backend_artifact("transfer-1.part", b"a").await;
    t.backend.complete(first.task_id(), &loc);
    let first = outcome(first).await.unwrap();

    // A task whose pipeline fails before reaching the output directory.
    let second = t.fetcher.fetch(CLIP).await.unwrap();
    t.backend
        .complete(second.task_id(), t.dir.path().join("backend").join("vanished.part"));
    assert!(outcome(second).await.is_err());

    t.wait_for(|e| matches!(e, Event::Failed { .. })).await;
    assert_eq!(tokio::fs::read(&first.path).await.unwrap(), b"transcoded");
    assert!(!t.output_dir().join("clip (1).mp4").exists());
}

#[tokio::test]
async fn transcodes_are_bounded_by_the_worker_pool() {
    let gate = Arc::new(Notify::new());
    let mut t = create_test_fetcher_with(
        FakeBehavior::Gated(gate.clone()),
        |config| config.transcode.max_concurrent_transcodes = 1,
        Arc::new(crate::destination::FixedDestination::default()),
    )
    .await;

    let first = t.fetcher.fetch(CLIP).await.unwrap();
    let second = t
        .fetcher
        .fetch("https://media.example.com/live/other.m3u8")
        .await
        .unwrap();
    let a = t.backend_artifact("transfer-1.part", b"a").await;
    let b = t.backend_artifact("transfer-2.part", b"b").await;
    t.backend.complete(first.task_id(), &a);
    t.backend.complete(second.task_id(), &b);

    t.wait_for(|e| matches!(e, Event::Transcoding { .. })).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(t.transcoder.calls().len(), 1);

    gate.notify_one();
    t.wait_for(|e| matches!(e, Event::Transcoding { .. })).await;
    gate.notify_one();

    assert!(outcome(first).await.is_ok());
    assert!(outcome(second).await.is_ok());
    assert_eq!(t.transcoder.max_active(), 1);
}

#[tokio::test]
async fn name_collisions_in_output_are_renamed() {
    let t = create_test_fetcher(FakeBehavior::Succeed).await;

    let first = t.fetcher.fetch(MOVIE).await.unwrap();
    let loc = t.backend_artifact("transfer-1.part", b"one").await;
    t.backend.complete(first.task_id(), &loc);
    let first = outcome(first).await.unwrap();

    let second = t.fetcher.fetch(MOVIE).await.unwrap();
    let loc = t.backend_artifact("transfer-2.part", b"two").await;
    t.backend.complete(second.task_id(), &loc);
    let second = outcome(second).await.unwrap();

    assert_eq!(first.path, t.output_dir().join("movie.mp4"));
    assert_eq!(second.path, t.output_dir().join("movie (1).mp4"));
}

struct LibraryForVideos;

#[async_trait]
impl DestinationResolver for LibraryForVideos {
    async fn resolve(&self, artifact: &Path, _request: &TransferRequest) -> DestinationKind {
        assert!(artifact.exists(), "artifact is in place when resolving");
        DestinationKind::LibrarySave
    }
}

#[tokio::test]
async fn resolver_decides_the_destination() {
    let t = create_test_fetcher_with(FakeBehavior::Succeed, |_| {}, Arc::new(LibraryForVideos)).await;
    let handle = t.fetcher.fetch(MOVIE).await.unwrap();
    let loc = t.backend_artifact("transfer-1.part", b"movie").await;
    t.backend.complete(handle.task_id(), &loc);

    let delivery = outcome(handle).await.unwrap();
    assert_eq!(delivery.destination, DestinationKind::LibrarySave);
}

fn counting_token(identifier: &str) -> (SessionCompletionToken, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let token = SessionCompletionToken::new(identifier, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (token, calls)
}

#[tokio::test]
async fn relaunch_token_waits_for_drain_and_running_pipelines() {
    let gate = Arc::new(Notify::new());
    let mut t = create_test_fetcher(FakeBehavior::Gated(gate.clone())).await;
    let (token, calls) = counting_token("test.session");
    assert!(t.fetcher.handle_background_events(token));

    let handle = t.fetcher.fetch(CLIP).await.unwrap();
    let loc = t.backend_artifact("transfer-1.part", b"segments").await;
    t.backend.complete(handle.task_id(), &loc);
    t.wait_for(|e| matches!(e, Event::Transcoding { .. })).await;

    t.backend.session_drained();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0, "pipeline still running");

    gate.notify_one();
    assert!(outcome(handle).await.is_ok());
    let drained = t
        .wait_for(|e| matches!(e, Event::SessionDrained { .. }))
        .await;
    assert_eq!(drained, Event::SessionDrained { token_released: true });
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A later drain without a relaunch is a no-op.
    t.backend.session_drained();
    let drained = t
        .wait_for(|e| matches!(e, Event::SessionDrained { .. }))
        .await;
    assert_eq!(drained, Event::SessionDrained { token_released: false });
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn relaunch_token_is_held_until_the_backend_drains() {
    let t = create_test_fetcher(FakeBehavior::Succeed).await;
    let (token, calls) = counting_token("test.session");
    t.fetcher.handle_background_events(token);

    let handle = t.fetcher.fetch(MOVIE).await.unwrap();
    let loc = t.backend_artifact("transfer-1.part", b"movie").await;
    t.backend.complete(handle.task_id(), &loc);
    assert!(outcome(handle).await.is_ok());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0, "no drain reported yet");
}

#[tokio::test]
async fn relaunch_for_another_session_is_released_at_once() {
    let t = create_test_fetcher(FakeBehavior::Succeed).await;
    let (token, calls) = counting_token("someone.else");

    assert!(!t.fetcher.handle_background_events(token));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
