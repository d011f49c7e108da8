//! The outcome correlator: matches delivered settlement events to the
//! single pending wager and resolves it exactly once.
//!
//! State machine: `Empty → Pending → {Resolved, TimedOut}`. The
//! [`CorrelationSlot`] is the only shared mutable state; every mutation
//! goes through the transition methods on [`Correlator`] under one lock.
//!
//! Matching rules, in order:
//! 1. source id already applied → discard (duplicate delivery)
//! 2. no pending wager, or bettor address mismatch → discard
//! 3. derive the canonical draw face, compare to the chosen face, and
//!    resolve; the contract's explicit Won/Lost kind is authoritative
//!    if the derivation disagrees
//!
//! Matching is keyed on the bettor address, not the sequence id:
//! delivery order across the two transports is not guaranteed, and
//! settlements are observed arriving out of sequence order. A sequence
//! mismatch on a matching address is logged, not rejected.
//! Cross-session correlation for one address (concurrent bets from
//! several clients) is out of scope: the slot admits one wager, and
//! `AlreadyPending` enforces that here rather than in any UI.

use crate::onchain::{CoinFace, EventSourceId, OutcomeEvent, OutcomeKind};
use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, U256};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::futures::Notified;
use tokio::sync::{mpsc, Notify};
// tokio's Instant so a paused test clock drives deadlines too.
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A single bet, tracked from submission to a terminal state.
#[derive(Debug, Clone)]
pub struct Wager {
    pub bettor: Address,
    pub face: CoinFace,
    pub stake: U256,
    pub sequence_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Won,
    Lost,
    /// The deadline passed with no settlement observed. The wager may
    /// still settle on-chain; the caller should query the contract.
    Unknown,
}

impl std::fmt::Display for ResultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultKind::Won => write!(f, "won"),
            ResultKind::Lost => write!(f, "lost"),
            ResultKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Pushed exactly once per tracked wager.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub result: ResultKind,
    pub chosen: CoinFace,
    /// The canonical face of the draw; `None` on timeout.
    pub drawn: Option<CoinFace>,
    pub stake: U256,
    pub sequence_id: u64,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.drawn {
            Some(drawn) => write!(
                f,
                "{}: chose {}, drew {}, stake {} (seq {})",
                self.result,
                self.chosen,
                drawn,
                format_ether(self.stake),
                self.sequence_id
            ),
            None => write!(
                f,
                "{}: chose {}, no settlement observed, stake {} (seq {})",
                self.result,
                self.chosen,
                format_ether(self.stake),
                self.sequence_id
            ),
        }
    }
}

/// Signals for the resolution sink (the binary's event loop): toggle a
/// progress indicator and surface the outcome.
#[derive(Debug, Clone)]
pub enum CorrelatorSignal {
    TrackingStarted { bettor: Address, sequence_id: u64 },
    TrackingCleared,
    Resolved(Resolution),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackError {
    #[error("a wager is already pending for {bettor} (seq {sequence_id})")]
    AlreadyPending { bettor: Address, sequence_id: u64 },
}

struct CorrelationSlot {
    wager: Wager,
    deadline: Option<Instant>,
}

struct Inner {
    slot: Option<CorrelationSlot>,
    /// Source ids of every event already applied. Overlapping poll
    /// windows re-deliver past settlements for the same bettor, and a
    /// replay must never resolve a newer wager. One entry per settled
    /// wager, so the set stays small.
    applied: HashSet<EventSourceId>,
}

pub struct Correlator {
    inner: Mutex<Inner>,
    timeout: Option<Duration>,
    signal_tx: mpsc::UnboundedSender<CorrelatorSignal>,
    /// Pokes the driver when a wager is tracked so it re-arms the
    /// deadline timer (a permit is stored if the driver is mid-loop).
    armed: Notify,
}

impl Correlator {
    pub fn new(
        timeout: Option<Duration>,
        signal_tx: mpsc::UnboundedSender<CorrelatorSignal>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slot: None,
                applied: HashSet::new(),
            }),
            timeout,
            signal_tx,
            armed: Notify::new(),
        }
    }

    /// Completes once a wager has been tracked since the last poll.
    /// The driver selects on this to pick up a freshly armed deadline.
    pub fn slot_armed(&self) -> Notified<'_> {
        self.armed.notified()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, signal: CorrelatorSignal) {
        let _ = self.signal_tx.send(signal);
    }

    /// Begin tracking a submitted wager. Only one wager may be pending
    /// at a time; the invariant lives here, not in any caller.
    pub fn track(&self, wager: Wager) -> Result<(), TrackError> {
        let mut inner = self.lock();
        if let Some(slot) = &inner.slot {
            return Err(TrackError::AlreadyPending {
                bettor: slot.wager.bettor,
                sequence_id: slot.wager.sequence_id,
            });
        }

        let deadline = self.timeout.map(|t| Instant::now() + t);
        info!(
            bettor = %wager.bettor,
            sequence = wager.sequence_id,
            face = %wager.face,
            stake = %format_ether(wager.stake),
            "tracking wager"
        );
        let started = CorrelatorSignal::TrackingStarted {
            bettor: wager.bettor,
            sequence_id: wager.sequence_id,
        };
        inner.slot = Some(CorrelationSlot { wager, deadline });
        drop(inner);

        self.armed.notify_one();
        self.emit(started);
        Ok(())
    }

    pub fn is_pending(&self) -> bool {
        self.lock().slot.is_some()
    }

    /// Deadline of the pending wager, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.lock().slot.as_ref().and_then(|s| s.deadline)
    }

    /// Apply one decoded settlement event. Duplicates, events for other
    /// bettors, and events with no pending wager are silently absorbed.
    pub fn on_event(&self, event: OutcomeEvent) {
        let mut inner = self.lock();

        if inner.applied.contains(&event.source) {
            debug!(source = %event.source, "duplicate settlement event ignored");
            return;
        }

        match &inner.slot {
            None => {
                debug!(event = %event, "settlement event with no pending wager — discarded");
                return;
            }
            Some(slot) if slot.wager.bettor != event.bettor => {
                debug!(
                    event_bettor = %event.bettor,
                    tracked_bettor = %slot.wager.bettor,
                    "settlement event for another bettor — discarded"
                );
                return;
            }
            Some(slot) => {
                if slot.wager.sequence_id != event.sequence_id {
                    // Settlements can arrive out of sequence order;
                    // the bettor address is the matching key.
                    debug!(
                        tracked_sequence = slot.wager.sequence_id,
                        event_sequence = event.sequence_id,
                        "sequence id mismatch — matching on bettor address"
                    );
                }
            }
        }

        let Some(slot) = inner.slot.take() else {
            return;
        };

        let drawn = CoinFace::from_draw(event.draw_value);
        let derived = if drawn == slot.wager.face {
            ResultKind::Won
        } else {
            ResultKind::Lost
        };
        let reported = match event.kind {
            OutcomeKind::Won => ResultKind::Won,
            OutcomeKind::Lost => ResultKind::Lost,
        };
        if derived != reported {
            warn!(
                derived = %derived,
                reported = %reported,
                draw = event.draw_value,
                chosen = %slot.wager.face,
                "draw value disagrees with reported outcome — trusting the contract"
            );
        }

        inner.applied.insert(event.source);
        drop(inner);

        let resolution = Resolution {
            result: reported,
            chosen: slot.wager.face,
            drawn: Some(drawn),
            stake: slot.wager.stake,
            sequence_id: slot.wager.sequence_id,
        };
        info!(resolution = %resolution, source = %event.source, "wager resolved");
        self.emit(CorrelatorSignal::TrackingCleared);
        self.emit(CorrelatorSignal::Resolved(resolution));
    }

    /// Time the pending wager out if its deadline has passed. The slot
    /// is released so a new wager can be tracked.
    pub fn on_deadline(&self) {
        let mut inner = self.lock();
        let due = matches!(
            &inner.slot,
            Some(slot) if slot.deadline.is_some_and(|d| d <= Instant::now())
        );
        if !due {
            return;
        }
        let Some(slot) = inner.slot.take() else {
            return;
        };
        drop(inner);

        warn!(
            sequence = slot.wager.sequence_id,
            "no settlement event before deadline — wager timed out"
        );
        let resolution = Resolution {
            result: ResultKind::Unknown,
            chosen: slot.wager.face,
            drawn: None,
            stake: slot.wager.stake,
            sequence_id: slot.wager.sequence_id,
        };
        self.emit(CorrelatorSignal::TrackingCleared);
        self.emit(CorrelatorSignal::Resolved(resolution));
    }

    /// Drop the pending wager without resolving it (account switch or
    /// shutdown). Any later event for it falls through the bettor check
    /// or the empty-slot check and is discarded.
    pub fn abandon(&self) {
        let mut inner = self.lock();
        let Some(slot) = inner.slot.take() else {
            return;
        };
        drop(inner);

        info!(
            bettor = %slot.wager.bettor,
            sequence = slot.wager.sequence_id,
            "abandoning pending wager"
        );
        self.emit(CorrelatorSignal::TrackingCleared);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};

    fn bettor_a() -> Address {
        Address::repeat_byte(0xAA)
    }

    fn bettor_b() -> Address {
        Address::repeat_byte(0xBB)
    }

    fn correlator(
        timeout: Option<Duration>,
    ) -> (Correlator, UnboundedReceiver<CorrelatorSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Correlator::new(timeout, tx), rx)
    }

    fn wager(bettor: Address, face: CoinFace, sequence_id: u64) -> Wager {
        Wager {
            bettor,
            face,
            stake: U256::from(10_000_000_000_000_000u64),
            sequence_id,
        }
    }

    fn event(bettor: Address, sequence_id: u64, draw: u64, block: u64, index: u64) -> OutcomeEvent {
        let kind = if CoinFace::from_draw(draw) == CoinFace::Heads {
            OutcomeKind::Won
        } else {
            OutcomeKind::Lost
        };
        OutcomeEvent {
            bettor,
            sequence_id,
            draw_value: draw,
            stake: U256::from(10_000_000_000_000_000u64),
            kind,
            source: EventSourceId {
                block_number: block,
                log_index: index,
            },
        }
    }

    fn resolutions(rx: &mut UnboundedReceiver<CorrelatorSignal>) -> Vec<Resolution> {
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(CorrelatorSignal::Resolved(r)) => out.push(r),
                Ok(_) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    #[test]
    fn matching_draw_resolves_won() {
        let (c, mut rx) = correlator(None);
        c.track(wager(bettor_a(), CoinFace::Heads, 7)).unwrap();
        c.on_event(event(bettor_a(), 7, 73, 100, 0));

        let res = resolutions(&mut rx);
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].result, ResultKind::Won);
        assert_eq!(res[0].chosen, CoinFace::Heads);
        assert_eq!(res[0].drawn, Some(CoinFace::Heads));
        assert_eq!(res[0].sequence_id, 7);
        assert!(!c.is_pending());
    }

    #[test]
    fn opposite_draw_resolves_lost_with_both_faces() {
        let (c, mut rx) = correlator(None);
        c.track(wager(bettor_a(), CoinFace::Heads, 7)).unwrap();
        c.on_event(event(bettor_a(), 7, 30, 100, 0));

        let res = resolutions(&mut rx);
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].result, ResultKind::Lost);
        assert_eq!(res[0].chosen, CoinFace::Heads);
        assert_eq!(res[0].drawn, Some(CoinFace::Tails));
    }

    #[test]
    fn reported_kind_wins_over_derived_result() {
        let (c, mut rx) = correlator(None);
        c.track(wager(bettor_a(), CoinFace::Heads, 7)).unwrap();

        // Draw says heads (a win for this wager) but the contract says Lost.
        let mut ev = event(bettor_a(), 7, 73, 100, 0);
        ev.kind = OutcomeKind::Lost;
        c.on_event(ev);

        let res = resolutions(&mut rx);
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].result, ResultKind::Lost);
        assert_eq!(res[0].drawn, Some(CoinFace::Heads));
    }

    #[test]
    fn duplicate_event_resolves_once() {
        let (c, mut rx) = correlator(None);
        c.track(wager(bettor_a(), CoinFace::Heads, 7)).unwrap();

        let ev = event(bettor_a(), 7, 73, 100, 0);
        c.on_event(ev.clone());
        c.on_event(ev.clone());
        c.on_event(ev);

        assert_eq!(resolutions(&mut rx).len(), 1);
    }

    #[test]
    fn duplicates_in_any_order_with_interleaving() {
        let (c, mut rx) = correlator(None);
        c.track(wager(bettor_a(), CoinFace::Tails, 3)).unwrap();

        // Poll and push race: a foreign event, the settlement, the same
        // settlement from the other transport, then stale retries.
        c.on_event(event(bettor_b(), 3, 20, 99, 0));
        c.on_event(event(bettor_a(), 3, 20, 100, 1));
        c.on_event(event(bettor_a(), 3, 20, 100, 1));
        c.on_event(event(bettor_b(), 4, 80, 101, 0));
        c.on_event(event(bettor_a(), 3, 20, 100, 1));

        let res = resolutions(&mut rx);
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].result, ResultKind::Won);
    }

    #[test]
    fn event_for_other_bettor_is_discarded() {
        let (c, mut rx) = correlator(None);
        c.track(wager(bettor_a(), CoinFace::Heads, 7)).unwrap();
        c.on_event(event(bettor_b(), 7, 73, 100, 0));

        assert!(c.is_pending());
        assert!(resolutions(&mut rx).is_empty());
    }

    #[test]
    fn out_of_order_sequence_still_matches_on_bettor() {
        let (c, mut rx) = correlator(None);
        c.track(wager(bettor_a(), CoinFace::Heads, 7)).unwrap();
        c.on_event(event(bettor_a(), 9, 73, 100, 0));

        let res = resolutions(&mut rx);
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].result, ResultKind::Won);
    }

    #[test]
    fn second_track_rejected_while_pending() {
        let (c, mut rx) = correlator(None);
        c.track(wager(bettor_a(), CoinFace::Heads, 7)).unwrap();

        let err = c.track(wager(bettor_a(), CoinFace::Tails, 8)).unwrap_err();
        assert_eq!(
            err,
            TrackError::AlreadyPending {
                bettor: bettor_a(),
                sequence_id: 7
            }
        );

        // The original wager still resolves normally.
        c.on_event(event(bettor_a(), 7, 73, 100, 0));
        let res = resolutions(&mut rx);
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].sequence_id, 7);
    }

    #[test]
    fn deadline_times_out_once_and_releases_slot() {
        let (c, mut rx) = correlator(Some(Duration::ZERO));
        c.track(wager(bettor_a(), CoinFace::Heads, 7)).unwrap();

        c.on_deadline();
        c.on_deadline();

        let res = resolutions(&mut rx);
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].result, ResultKind::Unknown);
        assert_eq!(res[0].drawn, None);

        // Slot is free again.
        c.track(wager(bettor_a(), CoinFace::Tails, 8)).unwrap();
    }

    #[test]
    fn deadline_is_noop_before_expiry() {
        let (c, mut rx) = correlator(Some(Duration::from_secs(3600)));
        c.track(wager(bettor_a(), CoinFace::Heads, 7)).unwrap();

        c.on_deadline();
        assert!(c.is_pending());
        assert!(resolutions(&mut rx).is_empty());
    }

    #[test]
    fn abandoned_wager_ignores_late_events() {
        let (c, mut rx) = correlator(None);
        c.track(wager(bettor_a(), CoinFace::Heads, 7)).unwrap();
        c.abandon();

        // A late settlement for the abandoned wager must not resolve it.
        c.on_event(event(bettor_a(), 7, 73, 100, 0));
        assert!(resolutions(&mut rx).is_empty());

        // A new account can be tracked immediately.
        c.track(wager(bettor_b(), CoinFace::Tails, 1)).unwrap();
        c.on_event(event(bettor_b(), 1, 10, 101, 0));
        let res = resolutions(&mut rx);
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].result, ResultKind::Won);
    }

    #[test]
    fn duplicate_of_resolving_event_after_new_track_is_ignored() {
        let (c, mut rx) = correlator(None);
        c.track(wager(bettor_a(), CoinFace::Heads, 7)).unwrap();
        c.on_event(event(bettor_a(), 7, 73, 100, 0));
        assert_eq!(resolutions(&mut rx).len(), 1);

        // Next wager is pending when an overlapping poll window replays
        // the previous settlement for the same bettor.
        c.track(wager(bettor_a(), CoinFace::Heads, 8)).unwrap();
        c.on_event(event(bettor_a(), 7, 73, 100, 0));
        assert!(c.is_pending());
        assert!(resolutions(&mut rx).is_empty());
    }

    #[test]
    fn replays_of_older_settlements_never_touch_a_new_wager() {
        let (c, mut rx) = correlator(None);

        // Two wagers settle back to back, then a third is tracked while
        // the poll window still spans both earlier settlement blocks.
        c.track(wager(bettor_a(), CoinFace::Heads, 1)).unwrap();
        c.on_event(event(bettor_a(), 1, 73, 100, 1));
        c.track(wager(bettor_a(), CoinFace::Heads, 2)).unwrap();
        c.on_event(event(bettor_a(), 2, 20, 103, 2));
        assert_eq!(resolutions(&mut rx).len(), 2);

        c.track(wager(bettor_a(), CoinFace::Heads, 3)).unwrap();
        c.on_event(event(bettor_a(), 1, 73, 100, 1));
        c.on_event(event(bettor_a(), 2, 20, 103, 2));
        assert!(c.is_pending(), "stale replays resolved the new wager");
        assert!(resolutions(&mut rx).is_empty());

        // The genuine settlement still lands.
        c.on_event(event(bettor_a(), 3, 90, 110, 0));
        assert_eq!(resolutions(&mut rx).len(), 1);
    }

    #[test]
    fn signal_order_starts_then_clears() {
        let (c, mut rx) = correlator(None);
        c.track(wager(bettor_a(), CoinFace::Heads, 7)).unwrap();
        c.on_event(event(bettor_a(), 7, 73, 100, 0));

        assert!(matches!(
            rx.try_recv(),
            Ok(CorrelatorSignal::TrackingStarted { sequence_id: 7, .. })
        ));
        assert!(matches!(rx.try_recv(), Ok(CorrelatorSignal::TrackingCleared)));
        assert!(matches!(rx.try_recv(), Ok(CorrelatorSignal::Resolved(_))));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }
}
