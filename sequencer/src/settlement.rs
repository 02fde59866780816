// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::Arc;
use std::time::Duration;

use alloy::network::EthereumWallet;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::sol;
use alloy_primitives::{Address, B256, U256};
use alloy_signer_local::PrivateKeySigner;
use channel_core::ChannelState;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::state::ChannelMap;
use crate::storage::{Storage, StorageError};

sol! {
    #[sol(rpc)]
    contract IStreamChannel {
        function sequencer() external view returns (address);
        function finalCloseBySequencer(
            bytes32 channelId,
            uint256 sequenceNumber,
            uint256 timestamp,
            address[] calldata recipients,
            uint256[] calldata amounts,
            bytes calldata userSignature
        ) external;
        function publishIntermediateChannelState(
            bytes32 channelId,
            uint256 sequenceNumber,
            uint256 timestamp,
            address[] calldata recipients,
            uint256[] calldata amounts,
            bytes calldata userSignature,
            bytes calldata sequencerSignature
        ) external;
    }
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("channel {0} not found")]
    NotFound(B256),
    #[error("channel {0} has no admitted state to close")]
    NoAdmittedState(B256),
    #[error("channel {0} has no sequencer co-signature on file")]
    MissingCosignature(B256),
    #[error("settlement reverted: {reason}")]
    Reverted { reason: String },
    #[error("rpc unreachable: {0}")]
    Rpc(String),
    #[error("on-chain settlement timed out after {0:?}")]
    Timeout(Duration),
    #[error("sequencer key {configured} does not match on-chain sequencer {onchain}")]
    IdentityMismatch { configured: Address, onchain: Address },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// On-chain side of the sequencer: the contract handle plus the wallet that
/// co-signed every admitted state and pays settlement gas.
pub struct Settlement {
    rpc_url: Url,
    channel_manager: Address,
    signer: Arc<PrivateKeySigner>,
    channels: Arc<ChannelMap>,
    storage: Storage,
    finalize_timeout: Duration,
}

/// Chain id as reported by the RPC node; used when `CHAIN_ID` is unset.
pub async fn rpc_chain_id(rpc_url: &Url) -> Result<u64, SettlementError> {
    let provider = ProviderBuilder::new().connect_http(rpc_url.clone());
    provider
        .get_chain_id()
        .await
        .map_err(|err| SettlementError::Rpc(err.to_string()))
}

impl Settlement {
    pub fn new(
        rpc_url: Url,
        channel_manager: Address,
        signer: Arc<PrivateKeySigner>,
        channels: Arc<ChannelMap>,
        storage: Storage,
        finalize_timeout: Duration,
    ) -> Self {
        Self {
            rpc_url,
            channel_manager,
            signer,
            channels,
            storage,
            finalize_timeout,
        }
    }

    /// Boot-time guard against the most common misconfiguration: the contract
    /// only accepts closures from its advertised sequencer address.
    pub async fn verify_identity(&self) -> Result<Address, SettlementError> {
        let provider = ProviderBuilder::new().connect_http(self.rpc_url.clone());
        let contract = IStreamChannel::new(self.channel_manager, provider);
        let onchain = contract
            .sequencer()
            .call()
            .await
            .map_err(|err| SettlementError::Rpc(format!("failed to fetch sequencer: {err}")))?;

        let configured = self.signer.address();
        if onchain != configured {
            return Err(SettlementError::IdentityMismatch {
                configured,
                onchain,
            });
        }
        Ok(configured)
    }

    /// Closes the channel on-chain with the last admitted dually-signed state
    /// and records the transaction hash, marking the channel terminal.
    ///
    /// The channel mutex is held across the whole RPC round-trip: finalise is
    /// terminal, so no settle may slip in while the closure is in flight. A
    /// timeout or revert leaves the channel unchanged. Re-finalising a
    /// terminal channel returns the recorded hash.
    pub async fn finalize(&self, channel_id: B256) -> Result<(B256, ChannelState), SettlementError> {
        let entry = self
            .channels
            .entry(channel_id)
            .await
            .ok_or(SettlementError::NotFound(channel_id))?;
        let mut channel = entry.lock().await;

        if let Some(tx_hash) = channel.finalize_tx_hash {
            return Ok((tx_hash, channel.clone()));
        }
        if !channel.has_admitted_state() {
            return Err(SettlementError::NoAdmittedState(channel_id));
        }

        let wallet = EthereumWallet::from((*self.signer).clone());
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(self.rpc_url.clone());
        let contract = IStreamChannel::new(self.channel_manager, provider);
        let call = contract.finalCloseBySequencer(
            channel.channel_id,
            U256::from(channel.sequence_number),
            U256::from(channel.signature_timestamp),
            recipient_addresses(&channel),
            recipient_amounts(&channel),
            channel.user_signature.clone(),
        );

        let send_and_watch = async {
            let pending = call.send().await.map_err(classify_contract_error)?;
            pending
                .watch()
                .await
                .map_err(|err| SettlementError::Rpc(err.to_string()))
        };
        let tx_hash = tokio::time::timeout(self.finalize_timeout, send_and_watch)
            .await
            .map_err(|_| SettlementError::Timeout(self.finalize_timeout))??;

        let mut closed = channel.clone();
        closed.finalize_tx_hash = Some(tx_hash);
        self.storage.upsert_channel(closed.clone()).await?;
        *channel = closed.clone();

        info!(
            channel_id = %channel_id,
            tx_hash = %tx_hash,
            sequence = closed.sequence_number,
            "channel finalised on-chain"
        );
        Ok((tx_hash, closed))
    }

    /// Anchors the latest dually-signed state on-chain without closing, for
    /// dispute resistance. The snapshot is marshalled under the channel mutex
    /// but the RPC runs outside it; a concurrently admitted newer state only
    /// supersedes what was published.
    pub async fn publish_intermediate(&self, channel_id: B256) -> Result<B256, SettlementError> {
        let snapshot = {
            let entry = self
                .channels
                .entry(channel_id)
                .await
                .ok_or(SettlementError::NotFound(channel_id))?;
            let channel = entry.lock().await;
            if !channel.has_admitted_state() {
                return Err(SettlementError::NoAdmittedState(channel_id));
            }
            if channel.sequencer_signature.is_empty() {
                return Err(SettlementError::MissingCosignature(channel_id));
            }
            channel.clone()
        };

        let wallet = EthereumWallet::from((*self.signer).clone());
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(self.rpc_url.clone());
        let contract = IStreamChannel::new(self.channel_manager, provider);
        let call = contract.publishIntermediateChannelState(
            snapshot.channel_id,
            U256::from(snapshot.sequence_number),
            U256::from(snapshot.signature_timestamp),
            recipient_addresses(&snapshot),
            recipient_amounts(&snapshot),
            snapshot.user_signature.clone(),
            snapshot.sequencer_signature.clone(),
        );

        let send_and_watch = async {
            let pending = call.send().await.map_err(classify_contract_error)?;
            pending
                .watch()
                .await
                .map_err(|err| SettlementError::Rpc(err.to_string()))
        };
        let tx_hash = tokio::time::timeout(self.finalize_timeout, send_and_watch)
            .await
            .map_err(|_| SettlementError::Timeout(self.finalize_timeout))??;

        info!(
            channel_id = %channel_id,
            tx_hash = %tx_hash,
            sequence = snapshot.sequence_number,
            "intermediate state published on-chain"
        );
        Ok(tx_hash)
    }
}

fn recipient_addresses(channel: &ChannelState) -> Vec<Address> {
    channel
        .recipients
        .iter()
        .map(|entry| entry.recipient_address)
        .collect()
}

fn recipient_amounts(channel: &ChannelState) -> Vec<U256> {
    channel.recipients.iter().map(|entry| entry.balance).collect()
}

fn classify_contract_error(err: alloy::contract::Error) -> SettlementError {
    match &err {
        alloy::contract::Error::TransportError(transport) => match transport.as_error_resp() {
            // The node executed the call and the contract rejected it.
            Some(payload) => SettlementError::Reverted {
                reason: payload.message.to_string(),
            },
            None => SettlementError::Rpc(err.to_string()),
        },
        _ => SettlementError::Rpc(err.to_string()),
    }
}
