//! On-chain types and ABI handling for the coinflip contract.
//!
//! The contract settles each flip asynchronously and reports it through
//! one of two events:
//! 1. `Won(address,uint64,uint256,uint256)`: bettor, sequence number,
//!    draw value, stake
//! 2. `Lost(address,uint64,uint256,uint256)`: same shape
//!
//! Submission acceptance is reported by `FlipRequested(address,uint64)`,
//! which carries the sequence number the settlement will later reference.
//!
//! Decoding happens exactly once, at the transport boundary: a raw log
//! either becomes a typed [`OutcomeEvent`] or a [`abi::DecodeError`] that
//! is logged and skipped.

pub mod abi;
pub mod types;

pub use types::{CoinFace, EventSourceId, OutcomeEvent, OutcomeKind};
