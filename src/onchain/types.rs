//! Decoded settlement types emitted by the event transports.

use alloy::primitives::{Address, U256};

/// The two faces of the coin. The canonical face of a settled flip is
/// derived from the draw value by thresholding at 50.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinFace {
    Heads,
    Tails,
}

impl CoinFace {
    /// Canonical interpretation of a draw value: above 50 is heads.
    pub fn from_draw(draw: u64) -> Self {
        if draw > 50 {
            CoinFace::Heads
        } else {
            CoinFace::Tails
        }
    }
}

impl std::fmt::Display for CoinFace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoinFace::Heads => write!(f, "heads"),
            CoinFace::Tails => write!(f, "tails"),
        }
    }
}

/// Which settlement event fired. Decided once at decode time from the
/// log's topic0; nothing downstream dispatches on event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Won,
    Lost,
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeKind::Won => write!(f, "Won"),
            OutcomeKind::Lost => write!(f, "Lost"),
        }
    }
}

/// Stable identity of a delivered log record, used for deduplication.
///
/// Sequence ids cannot serve here: the same settlement reappears in
/// overlapping poll windows and may also arrive over both transports,
/// but always under the same block number / log index pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventSourceId {
    pub block_number: u64,
    pub log_index: u64,
}

impl std::fmt::Display for EventSourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

/// A decoded `Won` / `Lost` settlement record.
#[derive(Debug, Clone)]
pub struct OutcomeEvent {
    pub bettor: Address,
    pub sequence_id: u64,
    pub draw_value: u64,
    pub stake: U256,
    pub kind: OutcomeKind,
    pub source: EventSourceId,
}

impl std::fmt::Display for OutcomeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}(seq={}, draw={}, stake={}, src={})",
            self.kind, self.sequence_id, self.draw_value, self.stake, self.source
        )
    }
}
