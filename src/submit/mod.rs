//! Wager submission: the one state-changing call to the coinflip
//! contract.
//!
//! `submit` validates the house max-payout rule locally (stake × 2 must
//! be covered by the contract's reserve) before any network call, sends
//! `flip(bool)` with the stake as transaction value, and returns the
//! sequence number from the receipt's `FlipRequested` log. Failures are
//! surfaced to the caller and never retried automatically.

use crate::onchain::abi;
use crate::onchain::CoinFace;
use alloy::network::TransactionBuilder;
use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider};
use alloy::rpc::types::TransactionRequest;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("stake must be non-zero")]
    ZeroStake,
    #[error("stake {} exceeds house reserve {} — payout of 2x could not be honoured",
            format_ether(*stake), format_ether(*reserve))]
    InsufficientReserve { stake: U256, reserve: U256 },
    #[error("reserve query failed: {0}")]
    Rpc(#[from] alloy::transports::TransportError),
    #[error("submission rejected: {0}")]
    Rejected(String),
    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },
    #[error("transaction {tx_hash} emitted no FlipRequested event")]
    MissingSequence { tx_hash: B256 },
}

pub struct WagerSubmitter {
    provider: DynProvider,
    contract: Address,
}

impl WagerSubmitter {
    /// `provider` must carry a wallet; submission signs a transaction.
    pub fn new(provider: DynProvider, contract: Address) -> Self {
        Self { provider, contract }
    }

    /// Submit one wager. Returns the sequence id the settlement event
    /// will reference.
    pub async fn submit(&self, face: CoinFace, stake: U256) -> Result<u64, SubmissionError> {
        if stake.is_zero() {
            return Err(SubmissionError::ZeroStake);
        }

        // House max-payout rule, checked before spending gas: a win
        // pays out double the stake from the contract's reserve.
        let reserve = self.provider.get_balance(self.contract).await?;
        let payout = stake.checked_mul(U256::from(2));
        if !payout.is_some_and(|p| p <= reserve) {
            return Err(SubmissionError::InsufficientReserve { stake, reserve });
        }

        let tx = TransactionRequest::default()
            .with_to(self.contract)
            .with_value(stake)
            .with_input(abi::flip_calldata(face));

        info!(
            face = %face,
            stake = %format_ether(stake),
            contract = %self.contract,
            "submitting wager"
        );

        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| SubmissionError::Rejected(e.to_string()))?;
        let tx_hash = *pending.tx_hash();
        debug!(tx = %tx_hash, "wager transaction sent, awaiting receipt");

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| SubmissionError::Rejected(e.to_string()))?;
        if !receipt.status() {
            return Err(SubmissionError::Reverted { tx_hash });
        }

        let sequence_id = receipt
            .inner
            .logs()
            .iter()
            .find_map(abi::decode_flip_requested)
            .ok_or(SubmissionError::MissingSequence { tx_hash })?;

        info!(sequence = sequence_id, tx = %tx_hash, "wager accepted");
        Ok(sequence_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::providers::ProviderBuilder;

    #[tokio::test]
    async fn zero_stake_fails_before_any_rpc() {
        // The endpoint does not exist; the precondition must fire first.
        let provider = ProviderBuilder::new()
            .connect("http://127.0.0.1:9")
            .await
            .unwrap()
            .erased();
        let submitter = WagerSubmitter::new(provider, Address::repeat_byte(0x01));

        let err = submitter.submit(CoinFace::Heads, U256::ZERO).await;
        assert!(matches!(err, Err(SubmissionError::ZeroStake)));
    }
}
