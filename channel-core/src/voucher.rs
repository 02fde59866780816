// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::{Address, B256, Bytes, Signature, U256};
use alloy_sol_types::Eip712Domain;
use thiserror::Error;

use crate::channel::{ChannelState, RecipientBalance};
use crate::crypto;

/// Tolerance for clock skew and in-flight signing, in both directions.
pub const MAX_CLOCK_SKEW_SECS: u64 = 15 * 60;

/// A payer-signed voucher after wire-level parsing, before canonicalisation
/// against the channel's current state.
#[derive(Debug, Clone)]
pub struct VoucherSubmission {
    pub channel_id: B256,
    pub sequence_number: u64,
    pub timestamp: u64,
    pub allocation: Allocation,
    pub user_signature: Signature,
}

/// The two accepted allocation forms. The array form is authoritative (it is
/// exactly what the payer signed); the single form is a convenience the
/// sequencer canonicalises by overlaying the receiver's cumulative onto the
/// channel's current recipient list.
#[derive(Debug, Clone)]
pub enum Allocation {
    Single { receiver: Address, amount: U256 },
    Arrays { recipients: Vec<Address>, amounts: Vec<U256> },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VoucherError {
    #[error("channel is closed")]
    Closed,
    #[error("channel expired at {expiry_ts}")]
    Expired { expiry_ts: u64 },
    #[error("{0}")]
    BadTimestamp(String),
    #[error("sequence must exceed {current}, got {got}")]
    StaleSequence { current: u64, got: u64 },
    #[error("{0}")]
    Malformed(String),
    #[error("cumulative for {recipient} decreased from {previous} to {proposed}")]
    AmountRegression {
        recipient: Address,
        previous: U256,
        proposed: U256,
    },
    #[error("cumulative total {total} exceeds deposit {deposit}")]
    Insolvent { total: U256, deposit: U256 },
    #[error("{0}")]
    BadSignature(String),
}

impl Allocation {
    /// Produces the full cumulative recipient list this voucher asserts.
    pub fn canonicalize(
        &self,
        current: &[RecipientBalance],
    ) -> Result<Vec<RecipientBalance>, VoucherError> {
        match self {
            Self::Single { receiver, amount } => {
                if amount.is_zero() {
                    return Err(VoucherError::Malformed(
                        "amount must be positive".to_string(),
                    ));
                }
                let mut proposed = current.to_vec();
                match proposed
                    .iter_mut()
                    .find(|entry| entry.recipient_address == *receiver)
                {
                    Some(entry) => entry.balance = *amount,
                    None => proposed.push(RecipientBalance {
                        recipient_address: *receiver,
                        balance: *amount,
                    }),
                }
                Ok(proposed)
            }
            Self::Arrays {
                recipients,
                amounts,
            } => {
                if recipients.len() != amounts.len() {
                    return Err(VoucherError::Malformed(format!(
                        "recipients/amounts length mismatch: {} vs {}",
                        recipients.len(),
                        amounts.len()
                    )));
                }
                for (index, recipient) in recipients.iter().enumerate() {
                    if recipients[..index].contains(recipient) {
                        return Err(VoucherError::Malformed(format!(
                            "duplicate recipient {recipient}"
                        )));
                    }
                }
                Ok(recipients
                    .iter()
                    .zip(amounts.iter())
                    .map(|(recipient, amount)| RecipientBalance {
                        recipient_address: *recipient,
                        balance: *amount,
                    })
                    .collect())
            }
        }
    }
}

/// Runs the full admissibility check against the channel's current state and
/// returns the state the voucher would produce, plus the digest both parties
/// sign. Pure: settle and validate share this path, so a voucher validates
/// iff it would settle on the same state.
///
/// Checks, in order: terminal, channel expiry, timestamp window, sequence
/// strictly increasing (gaps allowed), allocation shape, per-recipient
/// monotonicity, solvency against the deposit, payer signature recovery.
pub fn project_update(
    channel: &ChannelState,
    submission: &VoucherSubmission,
    domain: &Eip712Domain,
    now: u64,
) -> Result<(ChannelState, B256), VoucherError> {
    if channel.is_finalized() {
        return Err(VoucherError::Closed);
    }
    if now > channel.expiry_ts {
        return Err(VoucherError::Expired {
            expiry_ts: channel.expiry_ts,
        });
    }
    if submission.timestamp > channel.expiry_ts {
        return Err(VoucherError::BadTimestamp(format!(
            "timestamp {} is after channel expiry {}",
            submission.timestamp, channel.expiry_ts
        )));
    }
    if submission.timestamp < now.saturating_sub(MAX_CLOCK_SKEW_SECS) {
        return Err(VoucherError::BadTimestamp(format!(
            "timestamp {} is too old",
            submission.timestamp
        )));
    }
    if submission.timestamp > now + MAX_CLOCK_SKEW_SECS {
        return Err(VoucherError::BadTimestamp(format!(
            "timestamp {} is too far in the future",
            submission.timestamp
        )));
    }
    if submission.sequence_number <= channel.sequence_number {
        return Err(VoucherError::StaleSequence {
            current: channel.sequence_number,
            got: submission.sequence_number,
        });
    }

    let proposed = submission.allocation.canonicalize(&channel.recipients)?;

    for previous in &channel.recipients {
        let proposed_balance = proposed
            .iter()
            .find(|entry| entry.recipient_address == previous.recipient_address)
            .map(|entry| entry.balance)
            .unwrap_or(U256::ZERO);
        if proposed_balance < previous.balance {
            return Err(VoucherError::AmountRegression {
                recipient: previous.recipient_address,
                previous: previous.balance,
                proposed: proposed_balance,
            });
        }
    }

    let mut total = U256::ZERO;
    for entry in &proposed {
        total = total.checked_add(entry.balance).ok_or_else(|| {
            VoucherError::Malformed("cumulative total overflows uint256".to_string())
        })?;
    }
    if total > channel.balance {
        return Err(VoucherError::Insolvent {
            total,
            deposit: channel.balance,
        });
    }

    let digest = crypto::channel_update_digest(
        channel.channel_id,
        submission.sequence_number,
        submission.timestamp,
        &proposed,
        domain,
    );
    crypto::verify_owner(channel.owner, &digest, &submission.user_signature)?;

    let mut next = channel.clone();
    next.sequence_number = submission.sequence_number;
    next.signature_timestamp = submission.timestamp;
    next.recipients = proposed;
    next.user_signature = Bytes::copy_from_slice(&submission.user_signature.as_bytes());
    next.sequencer_signature = Bytes::new();
    Ok((next, digest))
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
