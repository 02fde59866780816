// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_primitives::{Address, B256, Bytes, U256};
use channel_core::{ChannelState, RecipientBalance};
use rusqlite::{Connection, Result, Row, Transaction, params};

const SQL_UPSERT_CHANNEL: &str = include_str!("queries/upsert_channel.sql");
const SQL_SELECT_CHANNELS: &str = "SELECT channel_id, owner, balance, expiry_ts, \
     sequence_number, user_signature, sequencer_signature, signature_timestamp, \
     finalize_tx_hash FROM channels";
const SQL_SELECT_RECIPIENTS: &str = "SELECT recipient_address, balance FROM channel_recipients \
     WHERE channel_id = ?1 ORDER BY position";
const SQL_DELETE_RECIPIENTS: &str = "DELETE FROM channel_recipients WHERE channel_id = ?1";
const SQL_INSERT_RECIPIENT: &str = "INSERT INTO channel_recipients \
     (channel_id, position, recipient_address, balance) VALUES (?1, ?2, ?3, ?4)";
const SQL_SELECT_IDS_BY_OWNER: &str = "SELECT channel_id FROM channels WHERE owner = ?1";
const SQL_DELETE_CHANNEL: &str = "DELETE FROM channels WHERE channel_id = ?1";

pub(super) fn sql_upsert_channel(tx: &Transaction<'_>, channel: &ChannelState) -> Result<()> {
    let mut stmt = tx.prepare_cached(SQL_UPSERT_CHANNEL)?;
    stmt.execute(params![
        channel.channel_id.as_slice(),
        channel.owner.as_slice(),
        channel.balance.to_string(),
        u64_to_i64(channel.expiry_ts),
        u64_to_i64(channel.sequence_number),
        channel.user_signature.as_ref(),
        channel.sequencer_signature.as_ref(),
        u64_to_i64(channel.signature_timestamp),
        channel.finalize_tx_hash.as_ref().map(|hash| hash.as_slice()),
    ])?;
    Ok(())
}

pub(super) fn sql_replace_recipients(tx: &Transaction<'_>, channel: &ChannelState) -> Result<()> {
    tx.execute(SQL_DELETE_RECIPIENTS, params![channel.channel_id.as_slice()])?;
    let mut stmt = tx.prepare_cached(SQL_INSERT_RECIPIENT)?;
    for (position, recipient) in channel.recipients.iter().enumerate() {
        stmt.execute(params![
            channel.channel_id.as_slice(),
            position as i64,
            recipient.recipient_address.as_slice(),
            recipient.balance.to_string(),
        ])?;
    }
    Ok(())
}

pub(super) fn sql_select_channels(conn: &Connection) -> Result<Vec<ChannelState>> {
    let mut stmt = conn.prepare_cached(SQL_SELECT_CHANNELS)?;
    let mapped = stmt.query_map([], convert_row_to_channel)?;
    let mut channels: Vec<ChannelState> = mapped.collect::<Result<_>>()?;
    for channel in &mut channels {
        channel.recipients = sql_select_recipients(conn, channel.channel_id)?;
    }
    Ok(channels)
}

pub(super) fn sql_select_recipients(
    conn: &Connection,
    channel_id: B256,
) -> Result<Vec<RecipientBalance>> {
    let mut stmt = conn.prepare_cached(SQL_SELECT_RECIPIENTS)?;
    let mapped = stmt.query_map(params![channel_id.as_slice()], convert_row_to_recipient)?;
    mapped.collect()
}

pub(super) fn sql_select_ids_by_owner(conn: &Connection, owner: Address) -> Result<Vec<B256>> {
    let mut stmt = conn.prepare_cached(SQL_SELECT_IDS_BY_OWNER)?;
    let mapped = stmt.query_map(params![owner.as_slice()], |row| {
        let bytes: Vec<u8> = row.get(0)?;
        Ok(b256_from_column(&bytes, "channels.channel_id"))
    })?;
    mapped.collect()
}

pub(super) fn sql_delete_channel(conn: &Connection, channel_id: B256) -> Result<usize> {
    conn.execute(SQL_DELETE_CHANNEL, params![channel_id.as_slice()])
}

fn convert_row_to_channel(row: &Row<'_>) -> Result<ChannelState> {
    let channel_id: Vec<u8> = row.get(0)?;
    let owner: Vec<u8> = row.get(1)?;
    let balance: String = row.get(2)?;
    let expiry_ts: i64 = row.get(3)?;
    let sequence_number: i64 = row.get(4)?;
    let user_signature: Vec<u8> = row.get(5)?;
    let sequencer_signature: Vec<u8> = row.get(6)?;
    let signature_timestamp: i64 = row.get(7)?;
    let finalize_tx_hash: Option<Vec<u8>> = row.get(8)?;

    Ok(ChannelState {
        channel_id: b256_from_column(&channel_id, "channels.channel_id"),
        owner: address_from_column(&owner, "channels.owner"),
        balance: u256_from_column(&balance, "channels.balance"),
        expiry_ts: i64_to_u64(expiry_ts),
        sequence_number: i64_to_u64(sequence_number),
        user_signature: Bytes::from(user_signature),
        sequencer_signature: Bytes::from(sequencer_signature),
        signature_timestamp: i64_to_u64(signature_timestamp),
        recipients: Vec::new(),
        finalize_tx_hash: finalize_tx_hash
            .map(|bytes| b256_from_column(&bytes, "channels.finalize_tx_hash")),
    })
}

fn convert_row_to_recipient(row: &Row<'_>) -> Result<RecipientBalance> {
    let address: Vec<u8> = row.get(0)?;
    let balance: String = row.get(1)?;
    Ok(RecipientBalance {
        recipient_address: address_from_column(&address, "channel_recipients.recipient_address"),
        balance: u256_from_column(&balance, "channel_recipients.balance"),
    })
}

// A malformed persisted row is unrecoverable corruption, not a caller error.
fn b256_from_column(bytes: &[u8], column: &str) -> B256 {
    assert_eq!(bytes.len(), 32, "corrupted storage row: {column} must be 32 bytes");
    B256::from_slice(bytes)
}

fn address_from_column(bytes: &[u8], column: &str) -> Address {
    assert_eq!(bytes.len(), 20, "corrupted storage row: {column} must be 20 bytes");
    Address::from_slice(bytes)
}

fn u256_from_column(value: &str, column: &str) -> U256 {
    value
        .parse()
        .unwrap_or_else(|_| panic!("corrupted storage row: {column} is not a decimal uint256"))
}

fn u64_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn i64_to_u64(value: i64) -> u64 {
    value.max(0) as u64
}
