//! Stake balances.
//!
//! `StakeChanged` events carry signed deltas; an account's balance is the
//! saturating sum of its deltas. A local stake or unstake is shown as the
//! proposed resulting position until the log confirms it.

use std::time::Duration;

use ledgerview_core::{
    Address, DecodeError, EventShape, LogFilter, RawRecord, SubmissionError,
};
use serde::{Deserialize, Serialize};

use crate::decoder::{Decoded, EventDecoder};
use crate::domain::{json_payload, Domain, FetchStrategy, Intent};
use crate::domains::{expect_source, parse_address, parse_body};
use crate::projection::{ProjectionState, Reducer};
use crate::view::MergedView;

/// Event shape emitted when a stake changes.
pub const STAKE_CHANGED: &str = "StakeChanged";

const SECONDS_PER_YEAR: i128 = 365 * 24 * 60 * 60;
const BASIS_POINTS: i128 = 10_000;

/// An account's stake and the delta that produced it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakePosition {
    /// Current balance.
    pub balance: i128,
    /// Delta of the last change.
    pub last_delta: i64,
}

impl StakePosition {
    /// Position after applying `delta` to `current`.
    #[must_use]
    pub fn propose(current: Option<&Self>, delta: i64) -> Self {
        let balance = current.map_or(0, |position| position.balance);
        Self {
            balance: balance.saturating_add(i128::from(delta)),
            last_delta: delta,
        }
    }
}

/// Stake events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StakeEvent {
    /// An account's stake changed by `delta`.
    StakeChanged {
        /// Staking account.
        account: Address,
        /// Signed change.
        delta: i64,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct StakeChangedBody {
    account: String,
    delta: i64,
}

/// Stake domain bound to one staking contract.
#[derive(Debug, Clone)]
pub struct StakeDomain {
    contract: Address,
}

impl StakeDomain {
    /// Creates a stake domain reading `contract`.
    #[must_use]
    pub const fn new(contract: Address) -> Self {
        Self { contract }
    }

    /// Contract address.
    #[must_use]
    pub const fn contract(&self) -> &Address {
        &self.contract
    }

    /// Event shape for stake changes.
    #[must_use]
    pub fn shape(&self) -> EventShape {
        EventShape::new(STAKE_CHANGED)
    }

    /// Sum of all balances in the view.
    #[must_use]
    pub fn total_staked(view: &MergedView<Address, StakePosition>) -> i128 {
        view.iter()
            .fold(0_i128, |total, (_, cell)| total.saturating_add(cell.value.balance))
    }
}

/// Reward accrued by `balance` over `elapsed` at `annual_rate_bps` basis
/// points per year, rounded down. Non-positive balances accrue nothing.
#[must_use]
pub fn accrued_reward(balance: i128, annual_rate_bps: u32, elapsed: Duration) -> i128 {
    if balance <= 0 {
        return 0;
    }
    let seconds = i128::from(elapsed.as_secs());
    balance
        .saturating_mul(i128::from(annual_rate_bps))
        .saturating_mul(seconds)
        / (BASIS_POINTS * SECONDS_PER_YEAR)
}

impl EventDecoder for StakeDomain {
    type Event = StakeEvent;

    fn decode(&self, raw: &RawRecord) -> Result<StakeEvent, DecodeError> {
        expect_source(raw, &self.contract, &self.shape())?;
        let body: StakeChangedBody = parse_body(raw)?;
        let account = parse_address("account", &body.account)?;
        Ok(StakeEvent::StakeChanged {
            account,
            delta: body.delta,
        })
    }
}

impl Reducer for StakeDomain {
    type Key = Address;
    type Value = StakePosition;

    fn reduce(&self, state: &mut ProjectionState<Address, StakePosition>, event: &Decoded<StakeEvent>) {
        let StakeEvent::StakeChanged { account, delta } = &event.event;
        state.modify(account.clone(), event.order, |current| {
            StakePosition::propose(current, *delta)
        });
    }
}

impl Domain for StakeDomain {
    fn name(&self) -> &'static str {
        "stake"
    }

    fn filter(&self) -> LogFilter {
        LogFilter::new(self.contract.clone(), self.shape())
    }

    fn strategy(&self) -> FetchStrategy {
        FetchStrategy::Incremental
    }

    fn key_of(&self, event: &StakeEvent) -> Address {
        let StakeEvent::StakeChanged { account, .. } = event;
        account.clone()
    }

    fn author_of<'e>(&self, event: &'e StakeEvent) -> &'e Address {
        let StakeEvent::StakeChanged { account, .. } = event;
        account
    }

    fn encode_intent(
        &self,
        key: &Address,
        value: &StakePosition,
        origin: &Address,
    ) -> Result<Intent, SubmissionError> {
        if key != origin {
            return Err(SubmissionError::Encode {
                message: format!("cannot change the stake of {key} from {origin}"),
            });
        }
        if value.last_delta == 0 {
            return Err(SubmissionError::Encode {
                message: "stake delta must be non-zero".to_string(),
            });
        }

        let payload = json_payload(&StakeChangedBody {
            account: origin.to_string(),
            delta: value.last_delta,
        })?;
        // Staking attaches the funds; unstaking attaches nothing.
        let attached = u128::try_from(value.last_delta).unwrap_or(0);
        Ok(Intent {
            target: self.contract.clone(),
            payload,
            value: attached,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::ProjectionStore;
    use bytes::Bytes;
    use ledgerview_core::OrderKey;

    fn addr(value: &str) -> Address {
        Address::new(value).unwrap()
    }

    fn stake() -> StakeDomain {
        StakeDomain::new(addr("0xstake"))
    }

    fn changed(seq: u64, account: &str, delta: i64) -> Decoded<StakeEvent> {
        Decoded::new(
            OrderKey::new(seq, 0),
            StakeEvent::StakeChanged {
                account: addr(account),
                delta,
            },
        )
    }

    #[test]
    fn deltas_accumulate_per_account() {
        let mut store = ProjectionStore::new();
        store.apply(
            &stake(),
            vec![changed(1, "0xa", 100), changed(2, "0xb", 5), changed(3, "0xa", -30)],
        );
        let a = store.state().get(&addr("0xa")).unwrap();
        assert_eq!(a.balance, 70);
        assert_eq!(a.last_delta, -30);
        assert_eq!(store.state().get(&addr("0xb")).unwrap().balance, 5);
    }

    #[test]
    fn balances_saturate() {
        let near_max = StakePosition {
            balance: i128::MAX - 1,
            last_delta: 1,
        };
        assert_eq!(StakePosition::propose(Some(&near_max), 10).balance, i128::MAX);
    }

    #[test]
    fn decodes_stake_changed() {
        let raw = RawRecord {
            order: OrderKey::new(1, 0),
            address: addr("0xstake"),
            shape: EventShape::new(STAKE_CHANGED),
            payload: Bytes::from_static(br#"{"account":"0xA","delta":-4}"#),
        };
        assert_eq!(
            stake().decode(&raw).unwrap(),
            StakeEvent::StakeChanged {
                account: addr("0xa"),
                delta: -4
            }
        );
    }

    #[test]
    fn unstaking_attaches_no_value() {
        let account = addr("0xa");
        let stake = stake();
        let position = StakePosition::propose(None, -10);
        assert_eq!(stake.encode_intent(&account, &position, &account).unwrap().value, 0);

        let position = StakePosition::propose(None, 25);
        assert_eq!(stake.encode_intent(&account, &position, &account).unwrap().value, 25);

        let zero = StakePosition::default();
        assert!(stake.encode_intent(&account, &zero, &account).is_err());
        assert!(stake.encode_intent(&addr("0xb"), &position, &account).is_err());
    }

    #[test]
    fn reward_accrues_linearly() {
        let year = Duration::from_secs(365 * 24 * 60 * 60);
        assert_eq!(accrued_reward(1_000_000, 500, year), 50_000);
        assert_eq!(accrued_reward(1_000_000, 500, year / 2), 25_000);
        assert_eq!(accrued_reward(-5, 500, year), 0);
    }

    #[test]
    fn total_staked_sums_the_view() {
        let mut store = ProjectionStore::new();
        store.apply(&stake(), vec![changed(1, "0xa", 10), changed(2, "0xb", 32)]);
        let view = MergedView::compose(store.state(), &crate::overlay::OptimisticOverlay::new(), 0);
        assert_eq!(StakeDomain::total_staked(&view), 42);
    }
}
