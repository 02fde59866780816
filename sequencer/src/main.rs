// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::net::SocketAddr;
use std::sync::Arc;

use alloy_signer_local::PrivateKeySigner;
use channel_core::crypto;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use sequencer::api::{self, AppState};
use sequencer::config::Config;
use sequencer::settlement::{self, Settlement};
use sequencer::state::ChannelMap;
use sequencer::storage::Storage;
use sequencer::sweeper::{self, SweeperConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let rpc_url: Url = config.rpc_url.parse()?;

    let storage = Storage::open(&config.database_url)?;

    let signer: PrivateKeySigner = config.sequencer_private_key.parse()?;
    info!(address = %signer.address(), "sequencer wallet loaded");
    let signer = Arc::new(signer);

    let chain_id = match config.chain_id {
        Some(value) => value,
        None => settlement::rpc_chain_id(&rpc_url).await?,
    };
    let domain = crypto::eip712_domain(chain_id, config.channel_manager);
    info!(chain_id, channel_manager = %config.channel_manager, "typed-data domain fixed");

    let channels = Arc::new(ChannelMap::bootstrap(
        storage.clone(),
        domain,
        Arc::clone(&signer),
    )?);

    let settlement = Arc::new(Settlement::new(
        rpc_url,
        config.channel_manager,
        Arc::clone(&signer),
        Arc::clone(&channels),
        storage.clone(),
        config.finalize_timeout,
    ));
    // Refuse to serve with a key the contract will not accept closures from.
    settlement.verify_identity().await?;
    info!("sequencer address verified against on-chain contract");

    let (mut sweeper_handle, sweeper_stop) = sweeper::spawn(
        Arc::clone(&channels),
        storage,
        SweeperConfig {
            interval: config.sweep_interval,
            retention: config.sweep_retention,
        },
    );

    let state = Arc::new(AppState {
        channels,
        settlement,
    });
    let app = api::router(state, config.max_body_bytes);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "listening");
    tokio::select! {
        server_result = axum::serve(listener, app) => {
            sweeper_stop.request_shutdown();
            // The sweeper may be mid-sleep on a long interval; abort rather
            // than wait out the tick.
            sweeper_handle.abort();
            if let Err(join_err) = sweeper_handle.await {
                if !join_err.is_cancelled() {
                    return Err(format!("sweeper join error during shutdown: {join_err}").into());
                }
            }
            server_result?;
        }
        sweeper_result = &mut sweeper_handle => {
            match sweeper_result {
                Ok(()) => return Err("sweeper exited without a shutdown request".into()),
                Err(join_err) => return Err(format!("sweeper join error: {join_err}").into()),
            }
        }
    }

    Ok(())
}
