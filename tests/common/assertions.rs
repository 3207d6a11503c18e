//! Custom test assertions for end-to-end tests

use media_dl::{Event, TaskId};
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast;

/// Default upper bound for waiting on the pipeline
pub const WAIT: Duration = Duration::from_secs(10);

/// Wait for the next event matching `predicate`, skipping the rest
///
/// Returns `None` on timeout or when the channel closes.
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<Event>,
    predicate: impl Fn(&Event) -> bool,
) -> Option<Event> {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Whether `event` is a duplicate-drop notice for `id`
pub fn is_duplicate_of(event: &Event, id: TaskId) -> bool {
    matches!(event, Event::DuplicateDropped { id: d } if *d == id)
}

/// Assert that a directory holds no files (a missing directory counts as empty)
pub fn assert_dir_empty(dir: &Path) {
    let entries: Vec<_> = match std::fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => return,
    };
    assert!(
        entries.is_empty(),
        "expected {} to be empty, found {:?}",
        dir.display(),
        entries
    );
}
