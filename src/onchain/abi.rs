//! Coinflip contract event ABI definitions and log decoding.
//!
//! We define minimal ABIs covering just the events and the one call we
//! need, using pre-computed keccak256 topic0 hashes for subscription and
//! poll filters.

use crate::onchain::types::{CoinFace, EventSourceId, OutcomeEvent, OutcomeKind};
use alloy::primitives::{b256, Address, B256, U256};
use alloy::rpc::types::Log;
use thiserror::Error;

// ─── Event topic0 hashes (keccak256 of event signature) ──────────────────────
//
// Pre-computed at compile time. `verify_topic_hashes` re-derives them at
// startup to catch signature drift.

/// keccak256("Won(address,uint64,uint256,uint256)")
pub const WON_TOPIC: B256 =
    b256!("7081c86bea1065a73d1574d1fc45e5230ce01f0eefc5c1ab55d64f69074a7aaa");

/// keccak256("Lost(address,uint64,uint256,uint256)")
pub const LOST_TOPIC: B256 =
    b256!("ac300da3e0e3938ba04dfe56b291bf01360b2f366c16b02d6da14fd67f12074b");

/// keccak256("FlipRequested(address,uint64)")
/// Emitted when a flip is accepted; carries the sequence number the
/// settlement will later reference.
pub const FLIP_REQUESTED_TOPIC: B256 =
    b256!("38eeecab7e1c16d199bfd89e4e5ade3cda2755074194e5ee6496f5a36c37946f");

/// First 4 bytes of keccak256("flip(bool)").
pub const FLIP_SELECTOR: [u8; 4] = [0x1d, 0x26, 0x3f, 0x67];

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unrecognised event topic: {0}")]
    UnknownTopic(B256),
    #[error("log has no topic0")]
    MissingTopic,
    #[error("log missing indexed bettor topic")]
    MissingBettor,
    #[error("event data too short: {got} bytes, need {need}")]
    Truncated { got: usize, need: usize },
    #[error("{field} does not fit in u64")]
    Overflow { field: &'static str },
    #[error("log not anchored to a block (no block number / log index)")]
    Unanchored,
}

/// Compute keccak256 hash of a byte slice.
pub fn keccak256(data: &[u8]) -> B256 {
    use tiny_keccak::{Hasher, Keccak};
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    B256::from(output)
}

/// Verify that the pre-computed topic hashes match the event signatures.
/// Called at startup to catch any signature mismatches.
pub fn verify_topic_hashes() -> Vec<(String, bool)> {
    let checks = vec![
        ("Won(address,uint64,uint256,uint256)", WON_TOPIC),
        ("Lost(address,uint64,uint256,uint256)", LOST_TOPIC),
        ("FlipRequested(address,uint64)", FLIP_REQUESTED_TOPIC),
    ];

    checks
        .into_iter()
        .map(|(sig, expected)| {
            let computed = keccak256(sig.as_bytes());
            (sig.to_string(), computed == expected)
        })
        .collect()
}

/// ABI calldata for `flip(bool isHeads)`.
pub fn flip_calldata(face: CoinFace) -> Vec<u8> {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&FLIP_SELECTOR);
    let mut word = [0u8; 32];
    word[31] = matches!(face, CoinFace::Heads) as u8;
    data.extend_from_slice(&word);
    data
}

/// Decode a `Won` / `Lost` settlement log.
///
/// Won(address indexed bettor, uint64 sequenceNumber, uint256 drawValue,
///     uint256 betAmount), and Lost with the same shape.
/// Topics: [sig, bettor]
/// Data:   [sequenceNumber(32), drawValue(32), betAmount(32)]
///
/// Logs without a block number / log index are rejected: the pair is the
/// dedup identity, and an un-anchored record cannot be deduplicated.
pub fn decode_outcome_log(log: &Log) -> Result<OutcomeEvent, DecodeError> {
    let topic0 = log.topic0().ok_or(DecodeError::MissingTopic)?;
    let kind = match *topic0 {
        t if t == WON_TOPIC => OutcomeKind::Won,
        t if t == LOST_TOPIC => OutcomeKind::Lost,
        t => return Err(DecodeError::UnknownTopic(t)),
    };

    let bettor_word = log.topics().get(1).ok_or(DecodeError::MissingBettor)?;
    let bettor = Address::from_slice(&bettor_word.0[12..]);

    let data = &log.data().data;
    if data.len() < 96 {
        return Err(DecodeError::Truncated {
            got: data.len(),
            need: 96,
        });
    }

    let sequence_id = decode_u64_word(data, 0, "sequence number")?;
    let draw_value = decode_u64_word(data, 1, "draw value")?;
    let stake_bytes: [u8; 32] = data[64..96].try_into().unwrap_or([0u8; 32]);
    let stake = U256::from_be_bytes(stake_bytes);

    let source = match (log.block_number, log.log_index) {
        (Some(block_number), Some(log_index)) => EventSourceId {
            block_number,
            log_index,
        },
        _ => return Err(DecodeError::Unanchored),
    };

    Ok(OutcomeEvent {
        bettor,
        sequence_id,
        draw_value,
        stake,
        kind,
        source,
    })
}

/// Extract the sequence number from a `FlipRequested` log, if that is
/// what the log is. Used to scan submission receipts.
///
/// FlipRequested(address indexed bettor, uint64 sequenceNumber)
/// Topics: [sig, bettor]
/// Data:   [sequenceNumber(32)]
pub fn decode_flip_requested(log: &Log) -> Option<u64> {
    if log.topic0() != Some(&FLIP_REQUESTED_TOPIC) {
        return None;
    }
    decode_u64_word(&log.data().data, 0, "sequence number").ok()
}

fn decode_u64_word(data: &[u8], index: usize, field: &'static str) -> Result<u64, DecodeError> {
    let start = index * 32;
    let end = start + 32;
    if data.len() < end {
        return Err(DecodeError::Truncated {
            got: data.len(),
            need: end,
        });
    }
    let bytes: [u8; 32] = data[start..end].try_into().unwrap_or([0u8; 32]);
    U256::from_be_bytes(bytes)
        .try_into()
        .map_err(|_| DecodeError::Overflow { field })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, LogData};

    fn bettor() -> Address {
        Address::repeat_byte(0xAB)
    }

    fn outcome_log(topic0: B256, seq: u64, draw: u64, stake: u64) -> Log {
        let mut data = Vec::new();
        data.extend_from_slice(&U256::from(seq).to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(draw).to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(stake).to_be_bytes::<32>());
        Log {
            inner: alloy::primitives::Log {
                address: Address::repeat_byte(0x01),
                data: LogData::new_unchecked(
                    vec![topic0, bettor().into_word()],
                    Bytes::from(data),
                ),
            },
            block_number: Some(100),
            log_index: Some(2),
            ..Default::default()
        }
    }

    #[test]
    fn topic_hashes_match_signatures() {
        for (sig, ok) in verify_topic_hashes() {
            assert!(ok, "topic hash mismatch for {sig}");
        }
    }

    #[test]
    fn decodes_won_log() {
        let log = outcome_log(WON_TOPIC, 7, 73, 1_000);
        let ev = decode_outcome_log(&log).unwrap();
        assert_eq!(ev.kind, OutcomeKind::Won);
        assert_eq!(ev.bettor, bettor());
        assert_eq!(ev.sequence_id, 7);
        assert_eq!(ev.draw_value, 73);
        assert_eq!(ev.stake, U256::from(1_000));
        assert_eq!(
            ev.source,
            EventSourceId {
                block_number: 100,
                log_index: 2
            }
        );
    }

    #[test]
    fn decodes_lost_log() {
        let ev = decode_outcome_log(&outcome_log(LOST_TOPIC, 9, 30, 500)).unwrap();
        assert_eq!(ev.kind, OutcomeKind::Lost);
        assert_eq!(ev.draw_value, 30);
    }

    #[test]
    fn rejects_unknown_topic() {
        let log = outcome_log(FLIP_REQUESTED_TOPIC, 1, 1, 1);
        assert!(matches!(
            decode_outcome_log(&log),
            Err(DecodeError::UnknownTopic(_))
        ));
    }

    #[test]
    fn rejects_truncated_data() {
        let mut log = outcome_log(WON_TOPIC, 7, 73, 1_000);
        log.inner.data = LogData::new_unchecked(
            vec![WON_TOPIC, bettor().into_word()],
            Bytes::from(vec![0u8; 64]),
        );
        assert!(matches!(
            decode_outcome_log(&log),
            Err(DecodeError::Truncated { got: 64, need: 96 })
        ));
    }

    #[test]
    fn rejects_unanchored_log() {
        let mut log = outcome_log(WON_TOPIC, 7, 73, 1_000);
        log.block_number = None;
        assert!(matches!(
            decode_outcome_log(&log),
            Err(DecodeError::Unanchored)
        ));
    }

    #[test]
    fn flip_calldata_encodes_face() {
        let heads = flip_calldata(CoinFace::Heads);
        assert_eq!(heads.len(), 36);
        assert_eq!(&heads[..4], &FLIP_SELECTOR);
        assert_eq!(heads[35], 1);

        let tails = flip_calldata(CoinFace::Tails);
        assert_eq!(tails[35], 0);
        assert!(tails[4..35].iter().all(|b| *b == 0));
    }

    #[test]
    fn extracts_sequence_from_flip_requested() {
        let log = Log {
            inner: alloy::primitives::Log {
                address: Address::repeat_byte(0x01),
                data: LogData::new_unchecked(
                    vec![FLIP_REQUESTED_TOPIC, bettor().into_word()],
                    Bytes::from(U256::from(42u64).to_be_bytes::<32>().to_vec()),
                ),
            },
            ..Default::default()
        };
        assert_eq!(decode_flip_requested(&log), Some(42));

        let other = outcome_log(WON_TOPIC, 7, 73, 1_000);
        assert_eq!(decode_flip_requested(&other), None);
    }

    #[test]
    fn draw_threshold_is_exclusive_at_fifty() {
        assert_eq!(CoinFace::from_draw(51), CoinFace::Heads);
        assert_eq!(CoinFace::from_draw(50), CoinFace::Tails);
        assert_eq!(CoinFace::from_draw(0), CoinFace::Tails);
        assert_eq!(CoinFace::from_draw(100), CoinFace::Heads);
    }
}
