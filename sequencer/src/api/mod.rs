// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod error;

use std::sync::Arc;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Json, Path, State};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use alloy_primitives::{Address, B256, Signature, U256, hex};
use channel_core::{Allocation, ChannelState, VoucherSubmission};

use crate::settlement::Settlement;
use crate::state::ChannelMap;

pub use error::ApiError;

pub struct AppState {
    pub channels: Arc<ChannelMap>,
    pub settlement: Arc<Settlement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedRequest {
    channel_id: String,
    owner: String,
    /// Deposit in base units, decimal string.
    balance: String,
    expiry_timestamp: u64,
}

/// Voucher payload for `/validate` and `/settle`. Carries either the
/// single-recipient convenience form (`receiver`/`amount`) or the explicit
/// array form (`recipients`/`amounts`); the array form is what the payer
/// signed and is used verbatim.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoucherRequest {
    channel_id: String,
    sequence_number: u64,
    timestamp: u64,
    receiver: Option<String>,
    /// Cumulative total for `receiver`, decimal string.
    amount: Option<String>,
    recipients: Option<Vec<String>>,
    amounts: Option<Vec<String>>,
    user_signature: String,
    purpose: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelIdRequest {
    channel_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelView {
    channel_id: String,
    owner: String,
    balance: String,
    expiry_timestamp: u64,
    sequence_number: u64,
    user_signature: String,
    sequencer_signature: String,
    signature_timestamp: u64,
    recipients: Vec<RecipientView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finalize_tx_hash: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecipientView {
    recipient_address: String,
    balance: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoucherResponse {
    channel: ChannelView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FinalizeResponse {
    transaction_hash: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelsByOwnerResponse {
    owner: String,
    channel_ids: Vec<String>,
}

pub fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/channel/seed", post(seed_channel))
        .route("/channel/finalize", post(finalize_channel))
        .route("/channel/publish-intermediate", post(publish_intermediate))
        .route("/channel/{id}", get(get_channel))
        .route("/channels/by-owner/{owner}", get(list_channels_by_owner))
        .route("/validate", post(validate_voucher))
        .route("/settle", post(settle_voucher))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

async fn seed_channel(
    State(state): State<Arc<AppState>>,
    req: Result<Json<SeedRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<ChannelView>, ApiError> {
    let Json(req) = req.map_err(|err| ApiError::malformed(format!("invalid JSON: {err}")))?;
    let channel_id = parse_b256(&req.channel_id)?;
    let owner = parse_address(&req.owner)?;
    let balance = parse_u256(&req.balance)?;

    info!(
        channel_id = %req.channel_id,
        owner = %req.owner,
        balance = %req.balance,
        expiry = req.expiry_timestamp,
        "seed channel request"
    );

    let channel = state
        .channels
        .seed(channel_id, owner, balance, req.expiry_timestamp)
        .await?;
    Ok(Json(channel_view(&channel)))
}

async fn get_channel(
    Path(channel_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ChannelView>, ApiError> {
    let channel_id = parse_b256(&channel_id)?;
    let channel = state.channels.get(channel_id).await?;
    Ok(Json(channel_view(&channel)))
}

async fn validate_voucher(
    State(state): State<Arc<AppState>>,
    req: Result<Json<VoucherRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<VoucherResponse>, ApiError> {
    let Json(req) = req.map_err(|err| ApiError::malformed(format!("invalid JSON: {err}")))?;
    info!(
        channel_id = %req.channel_id,
        sequence = req.sequence_number,
        "validate request"
    );

    let (submission, _) = parse_voucher(req)?;
    let projected = state.channels.validate(submission).await?;
    Ok(Json(VoucherResponse {
        channel: channel_view(&projected),
    }))
}

async fn settle_voucher(
    State(state): State<Arc<AppState>>,
    req: Result<Json<VoucherRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<VoucherResponse>, ApiError> {
    let Json(req) = req.map_err(|err| ApiError::malformed(format!("invalid JSON: {err}")))?;
    info!(
        channel_id = %req.channel_id,
        sequence = req.sequence_number,
        "settle request"
    );

    let (submission, purpose) = parse_voucher(req)?;
    if let Some(purpose) = purpose.as_deref() {
        info!(
            channel_id = %submission.channel_id,
            purpose = %purpose,
            "settle purpose"
        );
    }

    let admitted = state.channels.settle(submission).await?;
    Ok(Json(VoucherResponse {
        channel: channel_view(&admitted),
    }))
}

async fn finalize_channel(
    State(state): State<Arc<AppState>>,
    req: Result<Json<ChannelIdRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<FinalizeResponse>, ApiError> {
    let Json(req) = req.map_err(|err| ApiError::malformed(format!("invalid JSON: {err}")))?;
    let channel_id = parse_b256(&req.channel_id)?;
    info!(channel_id = %req.channel_id, "finalize request");

    let (tx_hash, _) = state.settlement.finalize(channel_id).await?;
    Ok(Json(FinalizeResponse {
        transaction_hash: format!("0x{tx_hash:x}"),
    }))
}

async fn publish_intermediate(
    State(state): State<Arc<AppState>>,
    req: Result<Json<ChannelIdRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<FinalizeResponse>, ApiError> {
    let Json(req) = req.map_err(|err| ApiError::malformed(format!("invalid JSON: {err}")))?;
    let channel_id = parse_b256(&req.channel_id)?;
    info!(channel_id = %req.channel_id, "publish intermediate request");

    let tx_hash = state.settlement.publish_intermediate(channel_id).await?;
    Ok(Json(FinalizeResponse {
        transaction_hash: format!("0x{tx_hash:x}"),
    }))
}

async fn list_channels_by_owner(
    Path(owner): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ChannelsByOwnerResponse>, ApiError> {
    let owner = parse_address(&owner)?;
    let channel_ids = state.channels.list_by_owner(owner).await;
    Ok(Json(ChannelsByOwnerResponse {
        owner: format!("0x{owner:x}"),
        channel_ids: channel_ids
            .iter()
            .map(|id| format!("0x{id:x}"))
            .collect(),
    }))
}

/// Canonicalises a wire voucher into the internal submission. Shape errors
/// reject here, before any channel lock is taken.
fn parse_voucher(req: VoucherRequest) -> Result<(VoucherSubmission, Option<String>), ApiError> {
    let channel_id = parse_b256(&req.channel_id)?;
    let user_signature = parse_signature(&req.user_signature)?;

    let allocation = match (req.recipients, req.amounts, req.receiver, req.amount) {
        (Some(recipients), Some(amounts), None, None) => {
            if recipients.len() != amounts.len() {
                return Err(ApiError::malformed(format!(
                    "recipients/amounts length mismatch: {} vs {}",
                    recipients.len(),
                    amounts.len()
                )));
            }
            let recipients = recipients
                .iter()
                .map(|value| parse_address(value))
                .collect::<Result<Vec<_>, _>>()?;
            let amounts = amounts
                .iter()
                .map(|value| parse_u256(value))
                .collect::<Result<Vec<_>, _>>()?;
            Allocation::Arrays {
                recipients,
                amounts,
            }
        }
        (None, None, Some(receiver), Some(amount)) => Allocation::Single {
            receiver: parse_address(&receiver)?,
            amount: parse_u256(&amount)?,
        },
        _ => {
            return Err(ApiError::malformed(
                "voucher must carry either receiver/amount or recipients/amounts",
            ));
        }
    };

    Ok((
        VoucherSubmission {
            channel_id,
            sequence_number: req.sequence_number,
            timestamp: req.timestamp,
            allocation,
            user_signature,
        },
        req.purpose,
    ))
}

fn channel_view(channel: &ChannelState) -> ChannelView {
    ChannelView {
        channel_id: format!("0x{:x}", channel.channel_id),
        owner: format!("0x{:x}", channel.owner),
        balance: channel.balance.to_string(),
        expiry_timestamp: channel.expiry_ts,
        sequence_number: channel.sequence_number,
        user_signature: hex::encode_prefixed(channel.user_signature.as_ref()),
        sequencer_signature: hex::encode_prefixed(channel.sequencer_signature.as_ref()),
        signature_timestamp: channel.signature_timestamp,
        recipients: channel
            .recipients
            .iter()
            .map(|entry| RecipientView {
                recipient_address: format!("0x{:x}", entry.recipient_address),
                balance: entry.balance.to_string(),
            })
            .collect(),
        finalize_tx_hash: channel
            .finalize_tx_hash
            .map(|tx_hash| format!("0x{tx_hash:x}")),
    }
}

fn decode_hex_0x(value: &str) -> Result<Vec<u8>, ApiError> {
    if !value.starts_with("0x") {
        return Err(ApiError::malformed("hex string must start with 0x"));
    }
    hex::decode(value).map_err(|err| ApiError::malformed(format!("invalid hex: {err}")))
}

fn parse_address(value: &str) -> Result<Address, ApiError> {
    let bytes = decode_hex_0x(value)?;
    if bytes.len() != 20 {
        return Err(ApiError::malformed("address must be 20 bytes"));
    }
    Ok(Address::from_slice(&bytes))
}

fn parse_b256(value: &str) -> Result<B256, ApiError> {
    let bytes = decode_hex_0x(value)?;
    if bytes.len() != 32 {
        return Err(ApiError::malformed("channel id must be 32 bytes"));
    }
    Ok(B256::from_slice(&bytes))
}

fn parse_u256(value: &str) -> Result<U256, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError::malformed(format!("invalid uint256: {value}")))
}

fn parse_signature(value: &str) -> Result<Signature, ApiError> {
    let bytes = decode_hex_0x(value)?;
    if bytes.len() != 65 {
        return Err(ApiError::malformed("signature must be 65 bytes"));
    }
    Signature::from_raw(&bytes).map_err(|err| match err {
        alloy_primitives::SignatureError::FromBytes(_)
        | alloy_primitives::SignatureError::FromHex(_) => {
            ApiError::malformed("invalid signature bytes")
        }
        _ => ApiError::bad_signature(format!("invalid signature: {err}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> VoucherRequest {
        VoucherRequest {
            channel_id: format!("0x{}", "01".repeat(32)),
            sequence_number: 1,
            timestamp: 1_700_000_000,
            receiver: Some(format!("0x{}", "b0".repeat(20))),
            amount: Some("10000".to_string()),
            recipients: None,
            amounts: None,
            // 64 bytes of r/s plus a v byte of 27.
            user_signature: format!("0x{}1b", "41".repeat(64)),
            purpose: Some("inference".to_string()),
        }
    }

    #[test]
    fn single_form_parses_into_a_submission() {
        let (submission, purpose) = parse_voucher(base_request()).expect("parse");
        assert_eq!(submission.sequence_number, 1);
        assert_eq!(purpose.as_deref(), Some("inference"));
        assert!(matches!(submission.allocation, Allocation::Single { .. }));
    }

    #[test]
    fn array_form_parses_verbatim() {
        let mut req = base_request();
        req.receiver = None;
        req.amount = None;
        req.recipients = Some(vec![
            format!("0x{}", "b0".repeat(20)),
            format!("0x{}", "b1".repeat(20)),
        ]);
        req.amounts = Some(vec!["10000".to_string(), "5000".to_string()]);

        let (submission, _) = parse_voucher(req).expect("parse");
        match submission.allocation {
            Allocation::Arrays {
                recipients,
                amounts,
            } => {
                assert_eq!(recipients.len(), 2);
                assert_eq!(amounts[1], U256::from(5_000_u64));
            }
            other => panic!("expected array allocation, got {other:?}"),
        }
    }

    #[test]
    fn mixed_and_missing_allocation_forms_are_malformed() {
        let mut both = base_request();
        both.recipients = Some(vec![format!("0x{}", "b0".repeat(20))]);
        both.amounts = Some(vec!["1".to_string()]);
        assert!(matches!(
            parse_voucher(both),
            Err(ApiError::MalformedRequest(_))
        ));

        let mut neither = base_request();
        neither.receiver = None;
        neither.amount = None;
        assert!(matches!(
            parse_voucher(neither),
            Err(ApiError::MalformedRequest(_))
        ));

        let mut mismatched = base_request();
        mismatched.receiver = None;
        mismatched.amount = None;
        mismatched.recipients = Some(vec![format!("0x{}", "b0".repeat(20))]);
        mismatched.amounts = Some(vec!["1".to_string(), "2".to_string()]);
        assert!(matches!(
            parse_voucher(mismatched),
            Err(ApiError::MalformedRequest(_))
        ));
    }

    #[test]
    fn hex_parsers_reject_bad_shapes() {
        assert!(parse_b256("0102").is_err());
        assert!(parse_b256(&format!("0x{}", "01".repeat(31))).is_err());
        assert!(parse_address(&format!("0x{}", "01".repeat(19))).is_err());
        assert!(parse_u256("not-a-number").is_err());
        assert!(parse_signature(&format!("0x{}", "41".repeat(64))).is_err());
    }
}
