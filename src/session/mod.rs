//! Account-scoped wiring: one correlator, one transport supervisor and
//! one driver task per bettor.
//!
//! Teardown ordering matters: on shutdown or account switch the
//! transports and the driver are stopped *before* the pending wager is
//! abandoned, and before any transport for a new account exists. Once
//! `shutdown` returns, no event can reach the old correlator: the
//! session owned the only receiver and it is gone.

use crate::config::{Config, ConfigError};
use crate::correlator::{Correlator, CorrelatorSignal, TrackError, Wager};
use crate::transport::{TransportEvent, TransportMode, TransportSupervisor};
use alloy::primitives::Address;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub struct Session {
    bettor: Address,
    correlator: Arc<Correlator>,
    shutdown: watch::Sender<bool>,
    transport: JoinHandle<()>,
    driver: JoinHandle<()>,
}

impl Session {
    /// Start tracking settlement events for `bettor`. Correlator
    /// signals are delivered on `signals`.
    pub fn start(
        config: &Config,
        bettor: Address,
        signals: mpsc::UnboundedSender<CorrelatorSignal>,
    ) -> Result<Self, ConfigError> {
        let contract = config.contract()?;
        let mode: TransportMode = config
            .transport
            .mode
            .parse()
            .map_err(ConfigError::BadMode)?;

        let timeout = match config.correlator.resolution_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let correlator = Arc::new(Correlator::new(timeout, signals));

        let supervisor = TransportSupervisor::new(
            config.chain.ws_url.clone(),
            config.chain.http_url.clone(),
            contract,
            bettor,
            mode,
            Duration::from_millis(config.transport.poll_interval_ms),
            config.transport.poll_lookback_blocks,
        );
        let transport = supervisor.start(event_tx, shutdown_rx.clone());
        let driver = tokio::spawn(drive(correlator.clone(), event_rx, shutdown_rx));

        info!(bettor = %bettor, mode = %mode, "session started");
        Ok(Self {
            bettor,
            correlator,
            shutdown: shutdown_tx,
            transport,
            driver,
        })
    }

    pub fn bettor(&self) -> Address {
        self.bettor
    }

    /// Begin tracking a submitted wager on this session's correlator.
    pub fn track(&self, wager: Wager) -> Result<(), TrackError> {
        self.correlator.track(wager)
    }

    pub fn is_pending(&self) -> bool {
        self.correlator.is_pending()
    }

    /// Stop the transports and the driver, then abandon any pending
    /// wager. Late in-flight events are discarded, not applied.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.transport.await;
        let _ = self.driver.await;
        self.correlator.abandon();
    }

    /// Tear this session down, then start one for a different account.
    /// The old account's transports are gone before the new account's
    /// exist, so a late event can never cross accounts.
    pub async fn switch_account(
        self,
        config: &Config,
        new_bettor: Address,
        signals: mpsc::UnboundedSender<CorrelatorSignal>,
    ) -> Result<Self, ConfigError> {
        info!(old = %self.bettor, new = %new_bettor, "switching account");
        self.shutdown().await;
        Session::start(config, new_bettor, signals)
    }
}

/// The single consumer of transport events: funnels every mutation of
/// the correlation slot through one task, and arms the timeout from
/// the slot's deadline.
async fn drive(
    correlator: Arc<Correlator>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let deadline = correlator.deadline();
        tokio::select! {
            maybe_event = events.recv() => {
                match maybe_event {
                    Some(TransportEvent::Settled(event)) => correlator.on_event(event),
                    Some(TransportEvent::Connected) => debug!("transport connected"),
                    Some(TransportEvent::Disconnected { reason }) => {
                        warn!(reason = %reason, "transport disconnected");
                    }
                    None => break,
                }
            }
            _ = sleep_until_deadline(deadline) => correlator.on_deadline(),
            _ = correlator.slot_armed() => {
                // Re-loop to arm the timer for the new wager.
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
