// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::Eip712Domain;
use channel_core::voucher::{project_update, unix_now};
use channel_core::{ChannelState, VoucherError, VoucherSubmission, crypto};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::storage::{Storage, StorageError};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("channel {0} not found")]
    NotFound(B256),
    #[error("channel {0} already exists")]
    AlreadyExists(B256),
    #[error(transparent)]
    Voucher(#[from] VoucherError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Signing(String),
}

/// The authoritative in-memory channel map.
///
/// Reads on different channels proceed in parallel behind the outer read
/// lock; structural insertion takes it exclusively; every mutation of one
/// channel serialises on that channel's mutex. Readers only ever observe the
/// last successfully persisted state.
pub struct ChannelMap {
    channels: RwLock<HashMap<B256, Arc<Mutex<ChannelState>>>>,
    storage: Storage,
    domain: Eip712Domain,
    signer: Arc<PrivateKeySigner>,
}

impl ChannelMap {
    /// Rebuilds the map from storage; restart must reproduce the pre-shutdown
    /// map exactly.
    pub fn bootstrap(
        storage: Storage,
        domain: Eip712Domain,
        signer: Arc<PrivateKeySigner>,
    ) -> Result<Self, StorageError> {
        let mut channels = HashMap::new();
        for channel in storage.load_all()? {
            channels.insert(channel.channel_id, Arc::new(Mutex::new(channel)));
        }
        info!(channels = channels.len(), "bootstrapped channel map");
        Ok(Self {
            channels: RwLock::new(channels),
            storage,
            domain,
            signer,
        })
    }

    pub fn domain(&self) -> &Eip712Domain {
        &self.domain
    }

    /// Registers a channel whose deposit exists on-chain. Off-chain only: no
    /// opening voucher is required. Persists before becoming visible.
    pub async fn seed(
        &self,
        channel_id: B256,
        owner: Address,
        balance: U256,
        expiry_ts: u64,
    ) -> Result<ChannelState, StateError> {
        if expiry_ts <= unix_now() {
            return Err(StateError::Voucher(VoucherError::Expired { expiry_ts }));
        }

        // The map write lock is held across the insert's durable write so a
        // racing seed of the same id cannot leave disk and memory disagreeing.
        let mut channels = self.channels.write().await;
        if channels.contains_key(&channel_id) {
            return Err(StateError::AlreadyExists(channel_id));
        }

        let channel = ChannelState::seeded(channel_id, owner, balance, expiry_ts);
        self.storage.upsert_channel(channel.clone()).await?;
        channels.insert(channel_id, Arc::new(Mutex::new(channel.clone())));

        info!(
            channel_id = %channel_id,
            owner = %owner,
            balance = %balance,
            expiry_ts,
            "channel seeded"
        );
        Ok(channel)
    }

    /// Admits a voucher: validates, co-signs, persists, then commits to the
    /// map, all under the channel's mutex. The durable write intentionally
    /// precedes the in-memory commit: if it fails, the channel's observable
    /// state remains the prior admitted value.
    pub async fn settle(&self, submission: VoucherSubmission) -> Result<ChannelState, StateError> {
        let entry = self
            .entry(submission.channel_id)
            .await
            .ok_or(StateError::NotFound(submission.channel_id))?;
        let mut channel = entry.lock().await;

        let (mut next, digest) = project_update(&channel, &submission, &self.domain, unix_now())?;
        let cosignature =
            crypto::cosign_digest(&self.signer, &digest).map_err(StateError::Signing)?;
        next.sequencer_signature = Bytes::copy_from_slice(&cosignature.as_bytes());

        self.storage.upsert_channel(next.clone()).await?;
        *channel = next.clone();

        info!(
            channel_id = %next.channel_id,
            sequence = next.sequence_number,
            recipients = next.recipients.len(),
            "voucher admitted"
        );
        Ok(next)
    }

    /// Same checks as `settle` with no mutation and no co-signature; returns
    /// the state the voucher would produce. A voucher validates iff it would
    /// settle against the current state.
    pub async fn validate(&self, submission: VoucherSubmission) -> Result<ChannelState, StateError> {
        let entry = self
            .entry(submission.channel_id)
            .await
            .ok_or(StateError::NotFound(submission.channel_id))?;
        let channel = entry.lock().await;
        let (projected, _) = project_update(&channel, &submission, &self.domain, unix_now())?;
        Ok(projected)
    }

    /// Snapshot of the current admitted state.
    pub async fn get(&self, channel_id: B256) -> Result<ChannelState, StateError> {
        let entry = self
            .entry(channel_id)
            .await
            .ok_or(StateError::NotFound(channel_id))?;
        let channel = entry.lock().await;
        Ok(channel.clone())
    }

    pub async fn list_by_owner(&self, owner: Address) -> Vec<B256> {
        let channels = self.channels.read().await;
        let mut ids = Vec::new();
        for entry in channels.values() {
            let channel = entry.lock().await;
            if channel.owner == owner {
                ids.push(channel.channel_id);
            }
        }
        ids.sort();
        ids
    }

    pub(crate) async fn entry(&self, channel_id: B256) -> Option<Arc<Mutex<ChannelState>>> {
        self.channels.read().await.get(&channel_id).cloned()
    }

    /// Drops a channel from the map; the sweeper calls this after the store
    /// row is gone.
    pub(crate) async fn remove(&self, channel_id: B256) {
        self.channels.write().await.remove(&channel_id);
    }

    /// All channels, ordered by id. Used by the sweeper and by restart tests.
    pub async fn snapshot(&self) -> Vec<ChannelState> {
        let entries: Vec<_> = {
            let channels = self.channels.read().await;
            channels.values().cloned().collect()
        };
        let mut snapshot = Vec::with_capacity(entries.len());
        for entry in entries {
            snapshot.push(entry.lock().await.clone());
        }
        snapshot.sort_by_key(|channel| channel.channel_id);
        snapshot
    }
}
