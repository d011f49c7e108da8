//! Settlement-event delivery for one bettor account.
//!
//! Two interchangeable transports produce the same stream of decoded
//! [`OutcomeEvent`]s:
//! - [`PushTransport`]: one long-lived `eth_subscribe("logs")` over the
//!   WebSocket endpoint
//! - [`PollTransport`]: a periodic bounded-window `eth_getLogs` query
//!   over the HTTP endpoint
//!
//! Architecture:
//! - [`TransportSupervisor`]: spawns a background task that keeps one
//!   transport session alive, with exponential-backoff restarts; in
//!   `push-with-poll-fallback` mode a failed push session is followed
//!   by a poll session before push is retried
//! - Events are emitted via `tokio::sync::mpsc` as [`TransportEvent`]
//!   variants and consumed by the correlator driver
//! - Shutdown is a `watch` signal observed inside every session loop;
//!   nothing is delivered after it fires
//!
//! Overlapping poll windows re-deliver the same record on purpose.
//! Deduplication is the correlator's job, not the transports'.

pub mod poll;
pub mod push;

use crate::onchain::abi;
use crate::onchain::OutcomeEvent;
use alloy::primitives::Address;
use alloy::rpc::types::Filter;
use async_trait::async_trait;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub use poll::PollTransport;
pub use push::PushTransport;

const RECONNECT_BASE: Duration = Duration::from_secs(2);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Events emitted by a transport session, consumed by the correlator driver.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A decoded settlement record. May be a duplicate; may be out of order.
    Settled(OutcomeEvent),
    Connected,
    Disconnected { reason: String },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("rpc transport error: {0}")]
    Rpc(#[from] alloy::transports::TransportError),
    #[error("log stream closed by remote")]
    StreamClosed,
}

/// Delivery strategy, selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Push,
    Poll,
    PushWithPollFallback,
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(TransportMode::Push),
            "poll" => Ok(TransportMode::Poll),
            "push-with-poll-fallback" => Ok(TransportMode::PushWithPollFallback),
            other => Err(other.to_string()),
        }
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportMode::Push => write!(f, "push"),
            TransportMode::Poll => write!(f, "poll"),
            TransportMode::PushWithPollFallback => write!(f, "push-with-poll-fallback"),
        }
    }
}

/// A source of decoded settlement events for one account.
///
/// `run` drives delivery into `events` until the shutdown signal fires
/// (clean return) or the underlying source fails. Implementations are
/// restartable: a fresh instance is built per session, and returning
/// from `run` releases every underlying resource.
#[async_trait]
pub trait EventTransport: Send {
    fn name(&self) -> &'static str;

    async fn run(
        &mut self,
        events: &mpsc::UnboundedSender<TransportEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), TransportError>;
}

/// The log filter shared by both transports: contract address, both
/// settlement event kinds, and the indexed bettor address.
pub(crate) fn outcome_filter(contract: Address, bettor: Address) -> Filter {
    Filter::new()
        .address(contract)
        .event_signature(vec![abi::WON_TOPIC, abi::LOST_TOPIC])
        .topic1(bettor.into_word())
}

/// Keeps one transport session alive for an account, restarting failed
/// sessions with exponential backoff and rotating to the poll transport
/// when push fails in fallback mode.
pub struct TransportSupervisor {
    ws_url: String,
    http_url: String,
    contract: Address,
    bettor: Address,
    mode: TransportMode,
    poll_interval: Duration,
    poll_lookback: u64,
}

impl TransportSupervisor {
    pub fn new(
        ws_url: String,
        http_url: String,
        contract: Address,
        bettor: Address,
        mode: TransportMode,
        poll_interval: Duration,
        poll_lookback: u64,
    ) -> Self {
        Self {
            ws_url,
            http_url,
            contract,
            bettor,
            mode,
            poll_interval,
            poll_lookback,
        }
    }

    /// Start the supervisor in a background task. Returns immediately.
    /// The task ends once `shutdown` flips to true.
    pub fn start(
        self,
        events: mpsc::UnboundedSender<TransportEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(events, shutdown).await;
        })
    }

    async fn run(
        self,
        events: mpsc::UnboundedSender<TransportEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut backoff = RECONNECT_BASE;
        let mut on_fallback = false;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let mut transport = self.build(on_fallback);
            info!(
                transport = transport.name(),
                bettor = %self.bettor,
                "starting event transport"
            );

            match transport.run(&events, &mut shutdown).await {
                Ok(()) => {
                    info!(transport = transport.name(), "event transport stopped");
                    break;
                }
                Err(e) => {
                    error!(
                        transport = transport.name(),
                        error = %e,
                        "event transport failed"
                    );
                    let _ = events.send(TransportEvent::Disconnected {
                        reason: e.to_string(),
                    });
                }
            }

            if self.mode == TransportMode::PushWithPollFallback {
                on_fallback = !on_fallback;
                if on_fallback {
                    warn!("push transport down — falling back to poll");
                }
            }

            if *shutdown.borrow() {
                break;
            }
            info!(delay = ?backoff, "restarting event transport");
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.changed() => break,
            }
            backoff = (backoff * 2).min(MAX_RECONNECT_DELAY);
        }
    }

    fn build(&self, on_fallback: bool) -> Box<dyn EventTransport> {
        let wants_poll = match self.mode {
            TransportMode::Push => false,
            TransportMode::Poll => true,
            TransportMode::PushWithPollFallback => on_fallback,
        };

        if wants_poll {
            Box::new(PollTransport::new(
                self.http_url.clone(),
                self.contract,
                self.bettor,
                self.poll_interval,
                self.poll_lookback,
            ))
        } else {
            Box::new(PushTransport::new(
                self.ws_url.clone(),
                self.contract,
                self.bettor,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_transport_modes() {
        assert_eq!(TransportMode::from_str("push"), Ok(TransportMode::Push));
        assert_eq!(TransportMode::from_str("poll"), Ok(TransportMode::Poll));
        assert_eq!(
            TransportMode::from_str("push-with-poll-fallback"),
            Ok(TransportMode::PushWithPollFallback)
        );
        assert_eq!(
            TransportMode::from_str("carrier-pigeon"),
            Err("carrier-pigeon".to_string())
        );
    }

    #[test]
    fn mode_display_round_trips() {
        for mode in [
            TransportMode::Push,
            TransportMode::Poll,
            TransportMode::PushWithPollFallback,
        ] {
            assert_eq!(TransportMode::from_str(&mode.to_string()), Ok(mode));
        }
    }
}
