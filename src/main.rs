use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::providers::{DynProvider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use anyhow::Context;
use flipwatch::balance::BalanceWatcher;
use flipwatch::config::Config;
use flipwatch::correlator::{CorrelatorSignal, ResultKind, Wager};
use flipwatch::onchain::abi;
use flipwatch::session::Session;
use flipwatch::store::{WagerJournal, WagerRecord};
use flipwatch::submit::WagerSubmitter;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage.
    // The WebSocket transport needs this to establish TLS connections.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    // Load .env if present
    let _ = dotenvy::dotenv();

    // Load config
    let config = if Path::new("flipwatch.toml").exists() {
        Config::load(Path::new("flipwatch.toml"))?
    } else {
        Config::from_env()
    };

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    info!("flipwatch v{} starting", env!("CARGO_PKG_VERSION"));

    // Catch event-signature drift before anything subscribes.
    for (signature, ok) in abi::verify_topic_hashes() {
        if !ok {
            error!(signature = %signature, "event topic hash mismatch");
            anyhow::bail!("event topic hash verification failed");
        }
    }

    let contract = config.contract()?;

    // --- Signer / provider ---
    let key = std::env::var("FLIP_PRIVATE_KEY").ok();
    let (provider, signer_address): (DynProvider, Option<Address>) = match key {
        Some(key) => {
            let signer: PrivateKeySigner = key
                .trim()
                .parse()
                .context("FLIP_PRIVATE_KEY is not a valid private key")?;
            let address = signer.address();
            let wallet = EthereumWallet::from(signer);
            let provider = ProviderBuilder::new()
                .wallet(wallet)
                .connect(&config.chain.http_url)
                .await?;
            (DynProvider::new(provider), Some(address))
        }
        None => {
            warn!(
                "no FLIP_PRIVATE_KEY set - running in monitor-only mode \
                 (cannot place wagers)"
            );
            let provider = ProviderBuilder::new().connect(&config.chain.http_url).await?;
            (DynProvider::new(provider), None)
        }
    };

    let bettor = match (signer_address, config.bettor_override()?) {
        (Some(address), _) => address,
        (None, Some(address)) => address,
        (None, None) => {
            anyhow::bail!("set FLIP_PRIVATE_KEY or wager.bettor_address to pick an account")
        }
    };

    // --- Wager Journal ---
    let journal = WagerJournal::new(&config.store.journal_path);
    let history = journal.recent(5);
    if !history.is_empty() {
        info!("--- Recent Wagers ({}) ---", history.len());
        for record in &history {
            info!(
                seq = record.sequence_id,
                chosen = %record.chosen,
                result = %record.result,
                at = %record.recorded_at,
                "wager"
            );
        }
    }

    // --- Balances ---
    let balances = BalanceWatcher::new(provider.clone(), bettor, contract);
    match balances.refresh().await {
        Ok(snapshot) => info!(balances = %snapshot, "balances"),
        Err(e) => warn!(error = %e, "initial balance query failed"),
    }

    // --- Session (correlator + transports for this account) ---
    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<CorrelatorSignal>();
    let session = Session::start(&config, bettor, signal_tx)?;

    // --- One-shot wager ---
    let one_shot = config.wager.place;
    if one_shot {
        if signer_address.is_none() {
            session.shutdown().await;
            anyhow::bail!("wager.place=true requires FLIP_PRIVATE_KEY");
        }
        let face = config.face()?;
        let stake = config.stake()?;

        let submitter = WagerSubmitter::new(provider.clone(), contract);
        match submitter.submit(face, stake).await {
            Ok(sequence_id) => {
                if let Err(e) = session.track(Wager {
                    bettor,
                    face,
                    stake,
                    sequence_id,
                }) {
                    session.shutdown().await;
                    return Err(e).context("failed to track submitted wager");
                }
            }
            Err(e) => {
                error!(error = %e, "wager submission failed");
                session.shutdown().await;
                return Err(e.into());
            }
        }
    } else {
        info!(bettor = %bettor, "monitor mode - watching settlement events");
    }

    // --- Main Event Loop ---
    info!("entering main event loop - press Ctrl+C to stop");

    loop {
        tokio::select! {
            Some(signal) = signal_rx.recv() => {
                match signal {
                    CorrelatorSignal::TrackingStarted { bettor, sequence_id } => {
                        info!(bettor = %bettor, sequence = sequence_id, "awaiting settlement");
                    }
                    CorrelatorSignal::TrackingCleared => {
                        debug!("tracking cleared");
                    }
                    CorrelatorSignal::Resolved(resolution) => {
                        match resolution.result {
                            ResultKind::Won => info!(outcome = %resolution, "WAGER WON"),
                            ResultKind::Lost => info!(outcome = %resolution, "WAGER LOST"),
                            ResultKind::Unknown => warn!(
                                outcome = %resolution,
                                "WAGER TIMED OUT - query the contract for the final state"
                            ),
                        }

                        if let Err(e) =
                            journal.record(&WagerRecord::from_resolution(bettor, &resolution))
                        {
                            warn!(error = %e, "failed to write wager journal");
                        }

                        match balances.refresh().await {
                            Ok(snapshot) => info!(balances = %snapshot, "balances refreshed"),
                            Err(e) => warn!(error = %e, "balance refresh failed"),
                        }

                        if one_shot {
                            break;
                        }
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("shutting down...");
                break;
            }
        }
    }

    session.shutdown().await;
    Ok(())
}
