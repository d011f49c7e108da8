//! Push transport: one long-lived log subscription per account.
//!
//! Subscribes over WebSocket RPC to the contract's `Won` / `Lost` events
//! filtered server-side by the bettor address, and decodes each
//! delivered record directly. Stream termination is reported as an
//! error so the supervisor can restart or fall back; the subscription
//! is never allowed to go quiet silently.

use crate::onchain::abi;
use crate::transport::{outcome_filter, EventTransport, TransportError, TransportEvent};
use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub struct PushTransport {
    ws_url: String,
    contract: Address,
    bettor: Address,
}

impl PushTransport {
    pub fn new(ws_url: String, contract: Address, bettor: Address) -> Self {
        Self {
            ws_url,
            contract,
            bettor,
        }
    }
}

#[async_trait]
impl EventTransport for PushTransport {
    fn name(&self) -> &'static str {
        "push"
    }

    async fn run(
        &mut self,
        events: &mpsc::UnboundedSender<TransportEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        let ws = WsConnect::new(self.ws_url.clone());
        let provider = ProviderBuilder::new().connect_ws(ws).await?;

        let filter = outcome_filter(self.contract, self.bettor);
        let sub = provider.subscribe_logs(&filter).await?;
        let mut stream = sub.into_stream();

        info!(url = %self.ws_url, bettor = %self.bettor, "subscribed to settlement events");
        let _ = events.send(TransportEvent::Connected);

        loop {
            tokio::select! {
                maybe_log = stream.next() => {
                    let Some(log) = maybe_log else {
                        // The node dropped the subscription; going quiet
                        // here would leave the wager unobservable.
                        return Err(TransportError::StreamClosed);
                    };
                    match abi::decode_outcome_log(&log) {
                        Ok(event) => {
                            debug!(event = %event, "settlement event (push)");
                            let _ = events.send(TransportEvent::Settled(event));
                        }
                        Err(e) => warn!(error = %e, "skipping undecodable log"),
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
