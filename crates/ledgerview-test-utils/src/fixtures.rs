//! Pre-built test fixtures for common test scenarios.
//!
//! Provides factory functions to create addresses, domains, records and
//! engines with sensible defaults.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ledgerview_core::{Address, EventShape, LogSource, OrderKey, RawRecord, Submitter};
use ledgerview_engine::domains::canvas::{CanvasDomain, PIXEL_PAINTED};
use ledgerview_engine::domains::chat::{ChatDomain, MESSAGE_POSTED};
use ledgerview_engine::domains::stake::{StakeDomain, STAKE_CHANGED};
use ledgerview_engine::{Domain, EngineConfig, MemoryLedger, ProjectionEngine};

/// Canvas contract used by fixtures.
pub const CANVAS_CONTRACT: &str = "0xc4a1a5";
/// Chat mailbox used by fixtures.
pub const CHAT_MAILBOX: &str = "0xc4a7";
/// Staking contract used by fixtures.
pub const STAKE_CONTRACT: &str = "0x57a4e";
/// Fixture canvas width and height.
pub const CANVAS_SIZE: u32 = 16;

/// Parses an address.
pub fn addr(value: &str) -> Address {
    Address::new(value).expect("valid fixture address")
}

/// First test account.
pub fn alice() -> Address {
    addr("0xa11ce")
}

/// Second test account.
pub fn bob() -> Address {
    addr("0xb0b")
}

/// A 16x16 canvas.
pub fn canvas_domain() -> CanvasDomain {
    CanvasDomain::new(addr(CANVAS_CONTRACT), CANVAS_SIZE, CANVAS_SIZE).expect("valid canvas")
}

/// A chat domain on the fixture mailbox.
pub fn chat_domain() -> ChatDomain {
    ChatDomain::new(addr(CHAT_MAILBOX))
}

/// A stake domain on the fixture contract.
pub fn stake_domain() -> StakeDomain {
    StakeDomain::new(addr(STAKE_CONTRACT))
}

/// Configuration with a short poll interval for timer-driven tests.
pub fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .with_poll_interval(Duration::from_millis(100))
        .with_submission_timeout(Duration::from_secs(5))
}

/// A ledger with the canvas, chat and stake targets registered.
pub fn ledger() -> Arc<MemoryLedger> {
    let ledger = Arc::new(MemoryLedger::new());
    ledger.register_target(addr(CANVAS_CONTRACT), EventShape::new(PIXEL_PAINTED));
    ledger.register_target(addr(CHAT_MAILBOX), EventShape::new(MESSAGE_POSTED));
    ledger.register_target(addr(STAKE_CONTRACT), EventShape::new(STAKE_CHANGED));
    ledger
}

/// Builds an engine over arbitrary seams.
pub fn engine_with<D: Domain>(
    domain: D,
    source: Arc<dyn LogSource>,
    submitter: Arc<dyn Submitter>,
    origin: Address,
    config: EngineConfig,
) -> ProjectionEngine<D> {
    ProjectionEngine::new(domain, source, submitter, origin, config).expect("valid engine config")
}

/// Builds an engine that reads from and sends to `ledger`.
pub fn engine_on<D: Domain>(
    ledger: &Arc<MemoryLedger>,
    domain: D,
    origin: Address,
) -> ProjectionEngine<D> {
    engine_with(
        domain,
        Arc::clone(ledger) as Arc<dyn LogSource>,
        Arc::clone(ledger) as Arc<dyn Submitter>,
        origin,
        EngineConfig::default(),
    )
}

/// A fresh ledger and a canvas engine submitting as `origin`.
pub fn canvas_setup(origin: Address) -> (Arc<MemoryLedger>, ProjectionEngine<CanvasDomain>) {
    let ledger = ledger();
    let engine = engine_on(&ledger, canvas_domain(), origin);
    (ledger, engine)
}

/// A fresh ledger and a chat engine submitting as `origin`.
pub fn chat_setup(origin: Address) -> (Arc<MemoryLedger>, ProjectionEngine<ChatDomain>) {
    let ledger = ledger();
    let engine = engine_on(&ledger, chat_domain(), origin);
    (ledger, engine)
}

/// A fresh ledger and a stake engine submitting as `origin`.
pub fn stake_setup(origin: Address) -> (Arc<MemoryLedger>, ProjectionEngine<StakeDomain>) {
    let ledger = ledger();
    let engine = engine_on(&ledger, stake_domain(), origin);
    (ledger, engine)
}

/// JSON body of a `PixelPainted` event.
pub fn pixel_payload(index: u32, color: &str, painter: &Address) -> Bytes {
    json(&serde_json::json!({ "index": index, "color": color, "painter": painter.as_str() }))
}

/// JSON body of a `MessagePosted` event.
pub fn message_payload(from: &Address, nonce: u64, text: &str) -> Bytes {
    json(&serde_json::json!({ "from": from.as_str(), "nonce": nonce, "text": text }))
}

/// JSON body of a `StakeChanged` event.
pub fn stake_payload(account: &Address, delta: i64) -> Bytes {
    json(&serde_json::json!({ "account": account.as_str(), "delta": delta }))
}

fn json(value: &serde_json::Value) -> Bytes {
    Bytes::from(serde_json::to_vec(value).expect("serializable fixture"))
}

/// A canvas record at `(seq, sub_index)`.
pub fn pixel_record(seq: u64, sub_index: u32, index: u32, color: &str, painter: &Address) -> RawRecord {
    RawRecord {
        order: OrderKey::new(seq, sub_index),
        address: addr(CANVAS_CONTRACT),
        shape: EventShape::new(PIXEL_PAINTED),
        payload: pixel_payload(index, color, painter),
    }
}

/// A chat record at `(seq, sub_index)`.
pub fn message_record(seq: u64, sub_index: u32, from: &Address, nonce: u64, text: &str) -> RawRecord {
    RawRecord {
        order: OrderKey::new(seq, sub_index),
        address: addr(CHAT_MAILBOX),
        shape: EventShape::new(MESSAGE_POSTED),
        payload: message_payload(from, nonce, text),
    }
}

/// A stake record at `(seq, sub_index)`.
pub fn stake_record(seq: u64, sub_index: u32, account: &Address, delta: i64) -> RawRecord {
    RawRecord {
        order: OrderKey::new(seq, sub_index),
        address: addr(STAKE_CONTRACT),
        shape: EventShape::new(STAKE_CHANGED),
        payload: stake_payload(account, delta),
    }
}

/// Queues a foreign paint on `ledger` for the next block.
pub fn inject_pixel(ledger: &MemoryLedger, index: u32, color: &str, painter: &Address) {
    ledger.inject(
        addr(CANVAS_CONTRACT),
        EventShape::new(PIXEL_PAINTED),
        pixel_payload(index, color, painter),
    );
}

/// Queues a foreign chat message on `ledger` for the next block.
pub fn inject_message(ledger: &MemoryLedger, from: &Address, nonce: u64, text: &str) {
    ledger.inject(
        addr(CHAT_MAILBOX),
        EventShape::new(MESSAGE_POSTED),
        message_payload(from, nonce, text),
    );
}

/// Queues a foreign stake change on `ledger` for the next block.
pub fn inject_stake(ledger: &MemoryLedger, account: &Address, delta: i64) {
    ledger.inject(
        addr(STAKE_CONTRACT),
        EventShape::new(STAKE_CHANGED),
        stake_payload(account, delta),
    );
}
