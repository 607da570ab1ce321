//! Custom assertion helpers for integration tests.

use std::time::Duration;

use ledgerview_core::LocalId;
use ledgerview_engine::{Domain, EntryStatus, FailureReason, ProjectionEngine, Provenance};

/// Asserts that a submission is still pending.
///
/// # Panics
///
/// Panics if the entry is unknown or not pending.
pub fn assert_pending<D: Domain>(engine: &ProjectionEngine<D>, local_id: LocalId) {
    let status = engine.entry_status(local_id);
    assert_eq!(
        status,
        Some(EntryStatus::Pending),
        "Expected {local_id} to be pending, but status was {status:?}"
    );
}

/// Asserts that a submission was confirmed by the log.
///
/// # Panics
///
/// Panics if the entry is unknown or not confirmed.
pub fn assert_confirmed<D: Domain>(engine: &ProjectionEngine<D>, local_id: LocalId) {
    let status = engine.entry_status(local_id);
    assert!(
        matches!(status, Some(EntryStatus::Confirmed { .. })),
        "Expected {local_id} to be confirmed, but status was {status:?}"
    );
}

/// Asserts that a submission failed and returns the reason.
///
/// # Panics
///
/// Panics if the entry is unknown or did not fail.
pub fn assert_failed<D: Domain>(engine: &ProjectionEngine<D>, local_id: LocalId) -> FailureReason {
    match engine.entry_status(local_id) {
        Some(EntryStatus::Failed { reason }) => reason,
        other => panic!("Expected {local_id} to have failed, but status was {other:?}"),
    }
}

/// Asserts that the merged view shows `expected` for `key`, proposed by
/// `local_id` and not yet confirmed.
///
/// # Panics
///
/// Panics if the key is missing, holds another value, or is authoritative.
pub fn assert_optimistic<D: Domain>(
    engine: &ProjectionEngine<D>,
    key: &D::Key,
    expected: &D::Value,
    local_id: LocalId,
) {
    let cell = engine
        .merged_value(key)
        .unwrap_or_else(|| panic!("Expected a merged value for {key:?}"));
    assert_eq!(&cell.value, expected, "Unexpected merged value for {key:?}");
    assert_eq!(
        cell.provenance,
        Provenance::Optimistic { local_id },
        "Expected {key:?} to come from {local_id}"
    );
}

/// Asserts that the merged view shows `expected` for `key`, sourced from the
/// projection.
///
/// # Panics
///
/// Panics if the key is missing, holds another value, or is optimistic.
pub fn assert_authoritative<D: Domain>(engine: &ProjectionEngine<D>, key: &D::Key, expected: &D::Value) {
    let cell = engine
        .merged_value(key)
        .unwrap_or_else(|| panic!("Expected a merged value for {key:?}"));
    assert_eq!(&cell.value, expected, "Unexpected merged value for {key:?}");
    assert!(
        matches!(cell.provenance, Provenance::Authoritative { .. }),
        "Expected {key:?} to be authoritative, but it came from {:?}",
        cell.provenance
    );
}

/// Asserts that the projection holds `expected` for `key`.
///
/// # Panics
///
/// Panics if the projection holds something else.
pub fn assert_projected<D: Domain>(
    engine: &ProjectionEngine<D>,
    key: &D::Key,
    expected: Option<&D::Value>,
) {
    let projection = engine.projection();
    assert_eq!(
        projection.get(key),
        expected,
        "Unexpected projected value for {key:?}"
    );
}

/// Polls `condition` until it holds or `within` elapses.
///
/// Yields to the runtime between polls so spawned tasks make progress.
///
/// # Panics
///
/// Panics with `what` if the condition does not hold in time.
pub async fn eventually(what: &str, within: Duration, mut condition: impl FnMut() -> bool) {
    let poll = async {
        while !condition() {
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };
    if tokio::time::timeout(within, poll).await.is_err() {
        panic!("Timed out after {within:?} waiting for {what}");
    }
}

/// Waits until the source has accepted the send for `local_id`.
///
/// # Panics
///
/// Panics if the send is not accepted within one second.
pub async fn wait_accepted<D: Domain>(engine: &ProjectionEngine<D>, local_id: LocalId) {
    eventually("send accepted", Duration::from_secs(1), || {
        engine
            .entry(local_id)
            .is_some_and(|entry| entry.is_accepted())
    })
    .await;
}
