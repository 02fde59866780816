// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_primitives::{Address, B256, Bytes, U256};

/// The authoritative off-chain state of one payment channel.
///
/// `balance` is the on-chain deposit and stays constant after seeding; the
/// capacity remaining for future allocations is `balance` minus the sum of
/// the admitted cumulative recipient balances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelState {
    /// 32-byte identifier derived on-chain; the sequencer only indexes by it.
    pub channel_id: B256,
    /// Channel funder; sole valid signer of vouchers.
    pub owner: Address,
    /// Total deposit locked in the channel, in token base units.
    pub balance: U256,
    /// Unix second past which the channel is unsignable.
    pub expiry_ts: u64,
    /// Sequence of the last admitted update; 0 until the first settle.
    pub sequence_number: u64,
    /// Payer signature over the last admitted state; empty at seed.
    pub user_signature: Bytes,
    /// Sequencer co-signature over the same state; empty at seed.
    pub sequencer_signature: Bytes,
    /// Timestamp field embedded in the last admitted state.
    pub signature_timestamp: u64,
    /// Ordered cumulative allocations, one entry per recipient.
    pub recipients: Vec<RecipientBalance>,
    /// Hash of the on-chain closure transaction once finalised.
    pub finalize_tx_hash: Option<B256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientBalance {
    pub recipient_address: Address,
    /// Cumulative amount owed across the channel's lifetime, not a delta.
    pub balance: U256,
}

impl ChannelState {
    /// Fresh channel as registered by `seed`: sequence 0, no allocations,
    /// no signatures on file yet.
    pub fn seeded(channel_id: B256, owner: Address, balance: U256, expiry_ts: u64) -> Self {
        Self {
            channel_id,
            owner,
            balance,
            expiry_ts,
            sequence_number: 0,
            user_signature: Bytes::new(),
            sequencer_signature: Bytes::new(),
            signature_timestamp: 0,
            recipients: Vec::new(),
            finalize_tx_hash: None,
        }
    }

    /// True once the closure transaction has been recorded; a terminal
    /// channel admits no further updates.
    pub fn is_finalized(&self) -> bool {
        self.finalize_tx_hash.is_some()
    }

    /// True once at least one voucher has been admitted, i.e. there is a
    /// dually-signed state that can be taken on-chain.
    pub fn has_admitted_state(&self) -> bool {
        self.sequence_number > 0 && !self.user_signature.is_empty()
    }

    pub fn cumulative_for(&self, recipient: Address) -> Option<U256> {
        self.recipients
            .iter()
            .find(|entry| entry.recipient_address == recipient)
            .map(|entry| entry.balance)
    }
}
