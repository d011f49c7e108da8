//! Append-only wager journal.
//!
//! Data model: one JSON object per line, one line per terminal wager
//! (resolved or timed out). The journal is a flat file rather than a
//! database; the engine's only durable state is a bet history for the
//! startup summary and offline inspection.

use crate::correlator::{Resolution, ResultKind};
use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("journal io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("journal encode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A terminal wager as persisted to the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerRecord {
    pub bettor: String,
    pub sequence_id: u64,
    pub chosen: String,
    /// Missing on timeout.
    pub drawn: Option<String>,
    pub result: String,
    pub stake_wei: String,
    pub recorded_at: String,
}

impl WagerRecord {
    pub fn from_resolution(bettor: Address, resolution: &Resolution) -> Self {
        Self {
            bettor: bettor.to_string(),
            sequence_id: resolution.sequence_id,
            chosen: resolution.chosen.to_string(),
            drawn: resolution.drawn.map(|d| d.to_string()),
            result: resolution.result.to_string(),
            stake_wei: resolution.stake.to_string(),
            recorded_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn timed_out(&self) -> bool {
        self.result == ResultKind::Unknown.to_string()
    }
}

pub struct WagerJournal {
    path: PathBuf,
}

impl WagerJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one record. Creates the journal on first write.
    pub fn record(&self, record: &WagerRecord) -> Result<(), StoreError> {
        let line = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// The last `n` records, oldest first. Unparseable lines are
    /// skipped with a warning; a missing journal is just empty.
    pub fn recent(&self, n: usize) -> Vec<WagerRecord> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };

        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WagerRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "skipping corrupt journal line"),
            }
        }

        if records.len() > n {
            records.split_off(records.len() - n)
        } else {
            records
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onchain::CoinFace;
    use alloy::primitives::U256;

    fn scratch_journal(tag: &str) -> (WagerJournal, PathBuf) {
        let path = std::env::temp_dir().join(format!(
            "flipwatch-journal-test-{tag}-{}.jsonl",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        (WagerJournal::new(&path), path)
    }

    fn resolution(sequence_id: u64, result: ResultKind) -> Resolution {
        Resolution {
            result,
            chosen: CoinFace::Heads,
            drawn: match result {
                ResultKind::Unknown => None,
                _ => Some(CoinFace::Tails),
            },
            stake: U256::from(25u64),
            sequence_id,
        }
    }

    #[test]
    fn records_round_trip() {
        let (journal, path) = scratch_journal("roundtrip");
        let bettor = Address::repeat_byte(0xAB);

        for seq in 1..=3u64 {
            journal
                .record(&WagerRecord::from_resolution(
                    bettor,
                    &resolution(seq, ResultKind::Won),
                ))
                .unwrap();
        }

        let recent = journal.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].sequence_id, 2);
        assert_eq!(recent[1].sequence_id, 3);
        assert_eq!(recent[1].stake_wei, "25");
        assert!(!recent[1].timed_out());

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn timeout_records_have_no_drawn_face() {
        let (journal, path) = scratch_journal("timeout");
        journal
            .record(&WagerRecord::from_resolution(
                Address::repeat_byte(0x01),
                &resolution(9, ResultKind::Unknown),
            ))
            .unwrap();

        let recent = journal.recent(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].drawn, None);
        assert!(recent[0].timed_out());

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let (journal, path) = scratch_journal("corrupt");
        journal
            .record(&WagerRecord::from_resolution(
                Address::repeat_byte(0x01),
                &resolution(1, ResultKind::Lost),
            ))
            .unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "not json"))
            .unwrap();

        assert_eq!(journal.recent(10).len(), 1);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_journal_is_empty() {
        let (journal, _path) = scratch_journal("missing");
        assert!(journal.recent(5).is_empty());
    }
}
