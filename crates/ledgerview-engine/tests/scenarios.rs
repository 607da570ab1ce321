//! End-to-end scenarios against the in-memory ledger.
//!
//! Each test drives an engine by hand: submit, produce blocks, run
//! reconciliation cycles, then check the projection, the overlay and the
//! merged view.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use ledgerview_core::{LogSource, SubmissionError, Submitter};
use ledgerview_engine::domains::canvas::{Color, Coord, Pixel};
use ledgerview_engine::domains::chat::{ChatDomain, Message, MessageKey};
use ledgerview_engine::domains::stake::StakePosition;
use ledgerview_engine::{
    CycleOutcome, EngineError, FailureReason, ProjectionState, SendOutcome,
};
use ledgerview_test_utils::{
    alice, assert_authoritative, assert_confirmed, assert_failed, assert_optimistic,
    assert_pending, assert_projected, bob, canvas_domain, canvas_setup, chat_setup, engine_with,
    fast_config, init_test_logging, inject_message, inject_pixel, inject_stake, ledger, stake_setup,
    wait_accepted, FailingSubmitter, FlakyLogSource, SubmitFault,
};

fn color(value: &str) -> Color {
    Color::new(value).unwrap()
}

fn applied(outcome: &CycleOutcome) -> &ledgerview_engine::CycleReport {
    outcome
        .report()
        .unwrap_or_else(|| panic!("expected an applied cycle, got {outcome:?}"))
}

#[tokio::test]
async fn canvas_last_writer_wins_by_order_key() {
    init_test_logging();
    let (ledger, engine) = canvas_setup(alice());
    let canvas = engine.domain().clone();
    let at = Coord::new(2, 3);
    let index = canvas.index_of(at).unwrap();

    inject_pixel(&ledger, index, "#fff", &alice());
    ledger.produce_block();
    applied(&engine.reconcile_now().await);
    assert_projected(&engine, &at, Some(&Pixel::new(color("#fff"), alice())));

    inject_pixel(&ledger, index, "#fff", &bob());
    ledger.produce_block();
    let report = applied(&engine.reconcile_now().await).clone();

    let projection = engine.projection();
    let pixel = projection.get(&at).unwrap();
    assert_eq!(pixel.color, color("#fff"));
    assert_eq!(pixel.painter, bob());
    assert_eq!(projection.written_at(&at).map(|o| o.seq), Some(2));
    // Full replay folds the whole history every cycle.
    assert_eq!(report.folded, 2);
}

#[tokio::test]
async fn chat_submission_is_visible_before_the_log() {
    let (_ledger, engine) = chat_setup(alice());
    let key = MessageKey::new(alice(), 0);

    let local_id = engine.submit(key.clone(), Message::new("hello")).unwrap();

    assert_optimistic(&engine, &key, &Message::new("hello"), local_id);
    assert_pending(&engine, local_id);
    assert!(engine.projection().is_empty());
}

#[tokio::test]
async fn reconciliation_confirms_from_the_log() {
    let (ledger, engine) = chat_setup(alice());
    let key = MessageKey::new(alice(), 0);
    let handle = engine
        .submit_tracked(key.clone(), Message::new("hello"), None)
        .unwrap();
    let local_id = handle.local_id();
    wait_accepted(&engine, local_id).await;

    // Acceptance alone confirms nothing.
    applied(&engine.reconcile_now().await);
    assert_pending(&engine, local_id);

    ledger.produce_block();
    assert!(matches!(handle.outcome().await, SendOutcome::Accepted { .. }));

    let report = applied(&engine.reconcile_now().await).clone();
    assert_eq!(report.confirmed, vec![local_id]);
    assert_eq!(report.pruned, vec![local_id]);
    assert_confirmed(&engine, local_id);
    assert_authoritative(&engine, &key, &Message::new("hello"));
    assert!(engine.pending_entries().is_empty());
}

#[tokio::test]
async fn fetch_errors_leave_the_view_stale_but_consistent() {
    let ledger = ledger();
    let flaky = Arc::new(FlakyLogSource::new(Arc::clone(&ledger) as Arc<dyn LogSource>));
    let engine = engine_with(
        ledgerview_test_utils::chat_domain(),
        Arc::clone(&flaky) as Arc<dyn LogSource>,
        Arc::clone(&ledger) as Arc<dyn Submitter>,
        alice(),
        fast_config(),
    );

    inject_message(&ledger, &bob(), 0, "first");
    ledger.produce_block();
    applied(&engine.reconcile_now().await);
    let before = engine.projection();
    let seen = engine.last_seen_seq();

    let key = MessageKey::new(alice(), 0);
    let local_id = engine.submit(key.clone(), Message::new("mine")).unwrap();
    wait_accepted(&engine, local_id).await;

    inject_message(&ledger, &bob(), 1, "second");
    ledger.produce_block();
    flaky.fail_next(4);
    for _ in 0..4 {
        assert!(matches!(engine.reconcile_now().await, CycleOutcome::FetchFailed(_)));
    }

    assert_eq!(engine.projection(), before);
    assert_eq!(engine.last_seen_seq(), seen);
    // Failed cycles do not count toward the confirmation timeout.
    assert_pending(&engine, local_id);
    assert_eq!(engine.entry(local_id).unwrap().cycles_waited, 0);
    assert_optimistic(&engine, &key, &Message::new("mine"), local_id);

    let report = applied(&engine.reconcile_now().await).clone();
    assert_eq!(report.folded, 2);
    assert_confirmed(&engine, local_id);
    assert_eq!(engine.projection().len(), 3);
}

#[tokio::test]
async fn unconfirmed_paint_reverts_after_timeout() {
    let (ledger, engine) = canvas_setup(alice());
    let background = engine.domain().background().clone();
    let at = Coord::new(5, 5);
    let proposed = Pixel::new(color("#f00"), alice());

    let local_id = engine.submit(at, proposed.clone()).unwrap();
    wait_accepted(&engine, local_id).await;
    // The transaction never makes it into a block.
    let pending = ledger.pending_transactions();
    assert_eq!(pending.len(), 1);

    for cycle in 1..=2 {
        let report = applied(&engine.reconcile_now().await).clone();
        assert!(report.expired.is_empty(), "expired early on cycle {cycle}");
        assert_optimistic(&engine, &at, &proposed, local_id);
    }

    let report = applied(&engine.reconcile_now().await).clone();
    assert_eq!(report.expired, vec![local_id]);
    assert_eq!(
        assert_failed(&engine, local_id),
        FailureReason::ConfirmationTimeout { cycles: 3 }
    );
    assert!(engine.merged_value(&at).is_none());
    let shown = engine.domain().color_of(engine.merged_view().get(&at)).clone();
    assert_eq!(shown, background);
}

#[tokio::test]
async fn timeout_reverts_to_the_prior_color() {
    let (ledger, engine) = canvas_setup(alice());
    let at = Coord::new(5, 5);
    let index = engine.domain().index_of(at).unwrap();
    inject_pixel(&ledger, index, "#00f", &bob());
    ledger.produce_block();
    applied(&engine.reconcile_now().await);

    let local_id = engine.submit(at, Pixel::new(color("#f00"), alice())).unwrap();
    wait_accepted(&engine, local_id).await;
    for _ in 0..3 {
        applied(&engine.reconcile_now().await);
    }

    assert_failed(&engine, local_id);
    assert_authoritative(&engine, &at, &Pixel::new(color("#00f"), bob()));
}

#[tokio::test]
async fn rejected_sends_revert_immediately() {
    let ledger = ledger();
    let submitter = Arc::new(FailingSubmitter::new(Arc::clone(&ledger) as Arc<dyn Submitter>));
    let rejection = SubmissionError::Rejected {
        message: "insufficient funds".into(),
    };
    submitter.set_fault(SubmitFault::RejectSend(rejection.clone()));
    let engine = engine_with(
        canvas_domain(),
        Arc::clone(&ledger) as Arc<dyn LogSource>,
        Arc::clone(&submitter) as Arc<dyn Submitter>,
        alice(),
        fast_config(),
    );

    let handle = engine
        .submit_tracked(Coord::new(1, 1), Pixel::new(color("#123"), alice()), Some(10))
        .unwrap();
    let local_id = handle.local_id();
    assert_eq!(handle.outcome().await, SendOutcome::Failed(rejection.clone()));

    assert_eq!(
        assert_failed(&engine, local_id),
        FailureReason::Submission(rejection)
    );
    assert!(engine.merged_view().is_empty());
    assert_eq!(submitter.send_count(), 1);
}

#[tokio::test]
async fn dropped_transactions_fail_the_entry() {
    let (ledger, engine) = stake_setup(alice());
    let proposed = StakePosition::propose(None, 50);
    let handle = engine.submit_tracked(alice(), proposed, None).unwrap();
    let local_id = handle.local_id();
    wait_accepted(&engine, local_id).await;

    let transport_id = engine.entry(local_id).unwrap().transport_id.unwrap();
    assert!(ledger.drop_pending(&transport_id));

    assert!(matches!(
        handle.outcome().await,
        SendOutcome::Failed(SubmissionError::Dropped { .. })
    ));
    assert!(matches!(
        assert_failed(&engine, local_id),
        FailureReason::Submission(SubmissionError::Dropped { .. })
    ));
    assert!(engine.merged_value(&alice()).is_none());
}

#[tokio::test]
async fn stake_changes_accumulate_with_optimistic_overlay() {
    let (ledger, engine) = stake_setup(alice());
    inject_stake(&ledger, &alice(), 100);
    ledger.produce_block();
    applied(&engine.reconcile_now().await);

    let current = engine.projection().get(&alice()).copied();
    let proposed = StakePosition::propose(current.as_ref(), -40);
    assert_eq!(proposed.balance, 60);

    let local_id = engine.submit(alice(), proposed).unwrap();
    assert_optimistic(&engine, &alice(), &proposed, local_id);
    wait_accepted(&engine, local_id).await;
    ledger.produce_block();

    let report = applied(&engine.reconcile_now().await).clone();
    assert_eq!(report.confirmed, vec![local_id]);
    assert_authoritative(
        &engine,
        &alice(),
        &StakePosition {
            balance: 60,
            last_delta: -40,
        },
    );
}

#[tokio::test]
async fn chat_feed_orders_confirmed_then_pending() {
    let (ledger, engine) = chat_setup(alice());
    inject_message(&ledger, &bob(), 0, "gm");
    ledger.produce_block();
    applied(&engine.reconcile_now().await);

    let nonce = engine.read(|projection, overlay| ChatDomain::next_nonce(projection, overlay, &alice()));
    assert_eq!(nonce, 0);
    engine
        .submit(MessageKey::new(alice(), nonce), Message::new("gm bob"))
        .unwrap();
    let nonce = engine.read(|projection, overlay| ChatDomain::next_nonce(projection, overlay, &alice()));
    assert_eq!(nonce, 1);

    let feed = ChatDomain::feed(&engine.merged_view());
    let lines: Vec<_> = feed
        .iter()
        .map(|item| (item.key.author.clone(), item.text.as_str(), item.provenance.is_optimistic()))
        .collect();
    assert_eq!(
        lines,
        vec![(bob(), "gm", false), (alice(), "gm bob", true)]
    );
}

#[tokio::test]
async fn invalid_intents_never_reach_the_overlay() {
    let (_ledger, engine) = chat_setup(alice());
    let err = engine
        .submit(MessageKey::new(alice(), 0), Message::new(""))
        .unwrap_err();
    assert!(matches!(err, EngineError::Intent(SubmissionError::Encode { .. })));

    let err = engine
        .submit(MessageKey::new(bob(), 0), Message::new("impersonation"))
        .unwrap_err();
    assert!(matches!(err, EngineError::Intent(_)));
    assert!(engine.pending_entries().is_empty());
}

#[tokio::test]
async fn events_at_or_below_the_watermark_do_not_confirm() {
    let (ledger, engine) = chat_setup(alice());
    // Alice posted nonce 0 from another device; it is already folded.
    inject_message(&ledger, &alice(), 0, "old");
    ledger.produce_block();
    applied(&engine.reconcile_now().await);

    // A stale client re-proposes the same key. The folded event must not
    // confirm it, and the projection keeps the first writer.
    let key = MessageKey::new(alice(), 0);
    let local_id = engine.submit(key.clone(), Message::new("new")).unwrap();
    assert_eq!(
        engine.entry(local_id).unwrap().submitted_at.watermark,
        Some(1)
    );
    applied(&engine.reconcile_now().await);
    assert_pending(&engine, local_id);
    assert_optimistic(&engine, &key, &Message::new("new"), local_id);
}

#[tokio::test]
async fn history_before_the_first_fetch_does_not_confirm_a_repaint() {
    let (ledger, engine) = canvas_setup(alice());
    let at = Coord::new(2, 3);
    let index = engine.domain().index_of(at).unwrap();
    inject_pixel(&ledger, index, "#f00", &alice());
    ledger.produce_block();

    // Nothing fetched yet, so the watermark is unknown at submit time.
    let blue = Pixel::new(color("#00f"), alice());
    let local_id = engine.submit(at, blue.clone()).unwrap();
    assert_eq!(engine.entry(local_id).unwrap().submitted_at.watermark, None);
    wait_accepted(&engine, local_id).await;

    let report = applied(&engine.reconcile_now().await).clone();
    assert!(report.confirmed.is_empty());
    assert_eq!(engine.entry(local_id).unwrap().submitted_at.watermark, Some(1));
    assert_pending(&engine, local_id);
    assert_optimistic(&engine, &at, &blue, local_id);

    ledger.produce_block();
    let report = applied(&engine.reconcile_now().await).clone();
    assert_eq!(report.confirmed, vec![local_id]);
    assert_confirmed(&engine, local_id);
    assert_authoritative(&engine, &at, &blue);
}

#[tokio::test]
async fn history_before_the_first_fetch_does_not_confirm_a_stake_change() {
    let (ledger, engine) = stake_setup(alice());
    inject_stake(&ledger, &alice(), 100);
    ledger.produce_block();

    let known = StakePosition::propose(None, 100);
    let proposed = StakePosition::propose(Some(&known), 7);
    let local_id = engine.submit(alice(), proposed).unwrap();
    wait_accepted(&engine, local_id).await;

    let report = applied(&engine.reconcile_now().await).clone();
    assert!(report.confirmed.is_empty());
    assert_pending(&engine, local_id);
    assert_optimistic(&engine, &alice(), &proposed, local_id);
    assert_eq!(engine.projection().get(&alice()).map(|p| p.balance), Some(100));

    ledger.produce_block();
    applied(&engine.reconcile_now().await);
    assert_confirmed(&engine, local_id);
    assert_authoritative(
        &engine,
        &alice(),
        &StakePosition {
            balance: 107,
            last_delta: 7,
        },
    );
}

#[tokio::test]
async fn confirmation_depth_is_awaited_before_reporting_success() {
    let ledger = ledger();
    let engine = engine_with(
        ledgerview_test_utils::chat_domain(),
        Arc::clone(&ledger) as Arc<dyn LogSource>,
        Arc::clone(&ledger) as Arc<dyn Submitter>,
        alice(),
        fast_config().with_confirmation_depth(3),
    );

    let handle = engine
        .submit_tracked(MessageKey::new(alice(), 0), Message::new("deep"), None)
        .unwrap();
    wait_accepted(&engine, handle.local_id()).await;
    ledger.produce_block();
    ledger.produce_block();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let outcome = tokio::time::timeout(Duration::from_millis(50), async {
        ledger.produce_block();
        handle.outcome().await
    })
    .await
    .unwrap();
    assert!(matches!(outcome, SendOutcome::Accepted { .. }));
}

#[test]
fn empty_projection_has_no_values() {
    let state: ProjectionState<Coord, Pixel> = ProjectionState::empty();
    assert!(state.get(&Coord::new(0, 0)).is_none());
}
