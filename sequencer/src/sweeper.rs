// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use channel_core::voucher::unix_now;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::state::ChannelMap;
use crate::storage::{Storage, StorageError};

#[derive(Debug, Clone, Copy)]
pub struct SweeperConfig {
    pub interval: Duration,
    /// How long an expired channel stays visible past its expiry. Finalised
    /// channels carry no grace period: their closure transaction is already
    /// on-chain, so they are pruned on the next sweep.
    pub retention: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct SweeperStop {
    shutdown: Arc<AtomicBool>,
}

impl SweeperStop {
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Periodically prunes terminal and long-expired channels. Closure and expiry
/// are both observable on-chain, so a pruned record is never the only proof
/// of anything.
pub fn spawn(
    channels: Arc<ChannelMap>,
    storage: Storage,
    config: SweeperConfig,
) -> (JoinHandle<()>, SweeperStop) {
    let stop = SweeperStop::default();
    let loop_stop = stop.clone();
    let handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(config.interval).await;
            if loop_stop.is_shutdown_requested() {
                break;
            }
            match sweep_once(&channels, &storage, config.retention, unix_now()).await {
                Ok(0) => {}
                Ok(pruned) => info!(pruned, "swept terminal channels"),
                Err(err) => warn!(error = %err, "channel sweep failed, will retry"),
            }
        }
    });
    (handle, stop)
}

/// One sweep pass; returns how many channels were pruned. The store row is
/// deleted before the map entry so a crash between the two re-prunes on the
/// next pass instead of resurrecting the channel.
pub async fn sweep_once(
    channels: &ChannelMap,
    storage: &Storage,
    retention: Duration,
    now: u64,
) -> Result<usize, StorageError> {
    let cutoff = now.saturating_sub(retention.as_secs());
    let mut pruned = 0_usize;

    for channel in channels.snapshot().await {
        let terminal = channel.is_finalized() || channel.expiry_ts < cutoff;
        if !terminal {
            continue;
        }
        if storage.delete_channel(channel.channel_id).await? {
            channels.remove(channel.channel_id).await;
            pruned += 1;
        }
    }
    Ok(pruned)
}
