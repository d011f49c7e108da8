//! Poll transport: periodic bounded-window log queries.
//!
//! Every tick, queries the last `lookback` blocks behind the chain head
//! for settlement events matching the bettor. Successive windows
//! overlap, so the same record is expected to reappear across ticks;
//! the correlator absorbs the duplicates. A failed query is retried on
//! the next tick; only a failed connect ends the session.

use crate::onchain::abi;
use crate::transport::{outcome_filter, EventTransport, TransportError, TransportEvent};
use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub struct PollTransport {
    http_url: String,
    contract: Address,
    bettor: Address,
    interval: Duration,
    lookback: u64,
}

impl PollTransport {
    pub fn new(
        http_url: String,
        contract: Address,
        bettor: Address,
        interval: Duration,
        lookback: u64,
    ) -> Self {
        Self {
            http_url,
            contract,
            bettor,
            interval,
            lookback,
        }
    }

    async fn poll_once<P: Provider>(
        &self,
        provider: &P,
        events: &mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), TransportError> {
        let head = provider.get_block_number().await?;
        let from = head.saturating_sub(self.lookback);
        let filter = outcome_filter(self.contract, self.bettor)
            .from_block(from)
            .to_block(head);

        let logs = provider.get_logs(&filter).await?;
        debug!(from = from, to = head, logs = logs.len(), "poll window");

        for log in &logs {
            match abi::decode_outcome_log(log) {
                Ok(event) => {
                    debug!(event = %event, "settlement event (poll)");
                    let _ = events.send(TransportEvent::Settled(event));
                }
                Err(e) => warn!(error = %e, "skipping undecodable log"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EventTransport for PollTransport {
    fn name(&self) -> &'static str {
        "poll"
    }

    async fn run(
        &mut self,
        events: &mpsc::UnboundedSender<TransportEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        let provider = ProviderBuilder::new().connect(&self.http_url).await?;

        info!(
            url = %self.http_url,
            bettor = %self.bettor,
            interval = ?self.interval,
            lookback = self.lookback,
            "polling for settlement events"
        );
        let _ = events.send(TransportEvent::Connected);

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once(&provider, events).await {
                        warn!(error = %e, "poll query failed — retrying next tick");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }
}
