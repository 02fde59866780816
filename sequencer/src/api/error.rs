// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use channel_core::VoucherError;
use serde::Serialize;
use thiserror::Error;

use crate::settlement::SettlementError;
use crate::state::StateError;

/// Caller-visible error kinds. Every kind rejects the current mutation
/// atomically; 4xx kinds are fixable by the caller, 5xx kinds are sequencer
/// faults of which only storage failures and timeouts are worth retrying.
#[derive(Debug, Error, Clone)]
pub enum ApiError {
    #[error("{0}")]
    MalformedRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    Expired(String),
    #[error("{0}")]
    BadTimestamp(String),
    #[error("{0}")]
    StaleSequence(String),
    #[error("{0}")]
    AmountRegression(String),
    #[error("{0}")]
    Insolvent(String),
    #[error("{0}")]
    BadSignature(String),
    #[error("{0}")]
    StorageFailure(String),
    #[error("{0}")]
    SettlementReverted(String),
    #[error("{0}")]
    RpcUnreachable(String),
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    Internal(String),
}

/// Wire shape: `{ "error": "<kind>:<human detail>" }`.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl ApiError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRequest(message.into())
    }

    pub fn bad_signature(message: impl Into<String>) -> Self {
        Self::BadSignature(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_) | Self::BadTimestamp(_) | Self::AmountRegression(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::BadSignature(_) => StatusCode::UNAUTHORIZED,
            Self::Insolvent(_) => StatusCode::PAYMENT_REQUIRED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyExists(_) | Self::StaleSequence(_) => StatusCode::CONFLICT,
            Self::Expired(_) => StatusCode::GONE,
            Self::StorageFailure(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::SettlementReverted(_) | Self::RpcUnreachable(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedRequest(_) => "MalformedRequest",
            Self::NotFound(_) => "NotFound",
            Self::AlreadyExists(_) => "AlreadyExists",
            Self::Expired(_) => "Expired",
            Self::BadTimestamp(_) => "BadTimestamp",
            Self::StaleSequence(_) => "StaleSequence",
            Self::AmountRegression(_) => "AmountRegression",
            Self::Insolvent(_) => "Insolvent",
            Self::BadSignature(_) => "BadSignature",
            Self::StorageFailure(_) => "StorageFailure",
            Self::SettlementReverted(_) => "SettlementReverted",
            Self::RpcUnreachable(_) => "RpcUnreachable",
            Self::Timeout(_) => "Timeout",
            Self::Internal(_) => "Internal",
        }
    }
}

impl From<VoucherError> for ApiError {
    fn from(value: VoucherError) -> Self {
        let detail = value.to_string();
        match value {
            VoucherError::Closed | VoucherError::Expired { .. } => Self::Expired(detail),
            VoucherError::BadTimestamp(_) => Self::BadTimestamp(detail),
            VoucherError::StaleSequence { .. } => Self::StaleSequence(detail),
            VoucherError::Malformed(_) => Self::MalformedRequest(detail),
            VoucherError::AmountRegression { .. } => Self::AmountRegression(detail),
            VoucherError::Insolvent { .. } => Self::Insolvent(detail),
            VoucherError::BadSignature(_) => Self::BadSignature(detail),
        }
    }
}

impl From<StateError> for ApiError {
    fn from(value: StateError) -> Self {
        match value {
            StateError::NotFound(id) => Self::NotFound(format!("channel {id} not found")),
            StateError::AlreadyExists(id) => {
                Self::AlreadyExists(format!("channel {id} already exists"))
            }
            StateError::Voucher(inner) => inner.into(),
            StateError::Storage(inner) => Self::StorageFailure(inner.to_string()),
            StateError::Signing(detail) => Self::Internal(detail),
        }
    }
}

impl From<SettlementError> for ApiError {
    fn from(value: SettlementError) -> Self {
        let detail = value.to_string();
        match value {
            SettlementError::NotFound(_) => Self::NotFound(detail),
            SettlementError::NoAdmittedState(_) | SettlementError::MissingCosignature(_) => {
                Self::MalformedRequest(detail)
            }
            SettlementError::Reverted { .. } => Self::SettlementReverted(detail),
            SettlementError::Rpc(_) => Self::RpcUnreachable(detail),
            SettlementError::Timeout(_) => Self::Timeout(detail),
            SettlementError::IdentityMismatch { .. } => Self::Internal(detail),
            SettlementError::Storage(inner) => Self::StorageFailure(inner.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: format!("{}:{}", self.kind(), self),
        };
        (self.status(), Json(body)).into_response()
    }
}
