//! The three use-site domains.
//!
//! | domain | key | strategy | merge |
//! |--------|-----|----------|-------|
//! | [`canvas`] | [`canvas::Coord`] | full replay | last writer wins |
//! | [`chat`] | [`chat::MessageKey`] | incremental | first writer wins |
//! | [`stake`] | account [`Address`] | incremental | deltas accumulate |

pub mod canvas;
pub mod chat;
pub mod stake;

use ledgerview_core::{Address, DecodeError, EventShape, RawRecord};
use serde::de::DeserializeOwned;

/// Checks that `raw` came from `address` with `shape`.
pub(crate) fn expect_source(
    raw: &RawRecord,
    address: &Address,
    shape: &EventShape,
) -> Result<(), DecodeError> {
    if &raw.address != address {
        return Err(DecodeError::UnexpectedAddress {
            address: raw.address.to_string(),
        });
    }
    if &raw.shape != shape {
        return Err(DecodeError::UnknownShape {
            shape: raw.shape.to_string(),
        });
    }
    Ok(())
}

/// Parses a JSON event body.
pub(crate) fn parse_body<T: DeserializeOwned>(raw: &RawRecord) -> Result<T, DecodeError> {
    serde_json::from_slice(&raw.payload).map_err(DecodeError::malformed)
}

/// Parses an address field.
pub(crate) fn parse_address(field: &'static str, value: &str) -> Result<Address, DecodeError> {
    Address::new(value).map_err(|e| DecodeError::invalid_field(field, e.to_string()))
}
