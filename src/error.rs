//! Relay Error Types
//!
//! One taxonomy for every operation the relay exposes. User-recoverable
//! rejections map to 4xx and repaint a surface; collaborator and store
//! failures map to 5xx and propagate.

use thiserror::Error;

use crate::provider::ProviderError;
use crate::store::StoreError;
use crate::transport::TransportError;

/// Relay error types
///
/// Error codes feed the API envelope so callers can branch without
/// parsing messages.
#[derive(Error, Debug, Clone)]
pub enum RelayError {
    // === Pairing Errors ===
    #[error("No active pairing session for this code")]
    SessionNotFound,

    #[error("Pairing session already confirmed or closed")]
    SessionGone,

    // === Invoice Errors ===
    #[error("Amount out of range: {0}")]
    InvalidAmount(i64),

    #[error("Expected \"<code> <amount>\": {0}")]
    MalformedEntry(String),

    #[error("Malformed start parameter: {0}")]
    MalformedPayload(String),

    #[error("Payment link already used")]
    LinkAlreadyUsed,

    #[error("Cannot pay your own invoice")]
    SelfPayment,

    // === Settlement Errors ===
    #[error("No pending transaction for this payload")]
    UnknownTransaction,

    // === Requisite Errors ===
    #[error("Payout requisite not found")]
    RequisiteNotFound,

    #[error("Requisite limit reached")]
    RequisiteLimit,

    #[error("Invalid requisite: {0}")]
    InvalidRequisite(String),

    // === Withdrawal Errors ===
    #[error("Converted balance below the minimum payout of {minimum}")]
    BelowMinimum { minimum: i64 },

    #[error("Nothing to withdraw")]
    NothingToWithdraw,

    #[error("Withdrawal not found: {0}")]
    WithdrawalNotFound(i64),

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("Unknown withdrawal status: {0}")]
    UnknownStatus(String),

    #[error("Only the operator may change withdrawal status")]
    NotOperator,

    // === Collaborator Errors ===
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl RelayError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::SessionNotFound => "SESSION_NOT_FOUND",
            RelayError::SessionGone => "SESSION_GONE",
            RelayError::InvalidAmount(_) => "INVALID_AMOUNT",
            RelayError::MalformedEntry(_) => "MALFORMED_ENTRY",
            RelayError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            RelayError::LinkAlreadyUsed => "LINK_ALREADY_USED",
            RelayError::SelfPayment => "SELF_PAYMENT",
            RelayError::UnknownTransaction => "UNKNOWN_TRANSACTION",
            RelayError::RequisiteNotFound => "REQUISITE_NOT_FOUND",
            RelayError::RequisiteLimit => "REQUISITE_LIMIT",
            RelayError::InvalidRequisite(_) => "INVALID_REQUISITE",
            RelayError::BelowMinimum { .. } => "BELOW_MINIMUM",
            RelayError::NothingToWithdraw => "NOTHING_TO_WITHDRAW",
            RelayError::WithdrawalNotFound(_) => "WITHDRAWAL_NOT_FOUND",
            RelayError::InvalidTransition(_) => "INVALID_TRANSITION",
            RelayError::UnknownStatus(_) => "UNKNOWN_STATUS",
            RelayError::NotOperator => "NOT_OPERATOR",
            RelayError::Transport(_) => "TRANSPORT_ERROR",
            RelayError::Provider(_) => "PROVIDER_ERROR",
            RelayError::Store(_) => "STORE_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            RelayError::NotOperator => 403,
            RelayError::InvalidAmount(_)
            | RelayError::MalformedEntry(_)
            | RelayError::MalformedPayload(_)
            | RelayError::InvalidRequisite(_)
            | RelayError::UnknownStatus(_) => 400,
            RelayError::SessionNotFound
            | RelayError::UnknownTransaction
            | RelayError::RequisiteNotFound
            | RelayError::WithdrawalNotFound(_) => 404,
            RelayError::SessionGone
            | RelayError::LinkAlreadyUsed
            | RelayError::SelfPayment
            | RelayError::RequisiteLimit
            | RelayError::BelowMinimum { .. }
            | RelayError::NothingToWithdraw
            | RelayError::InvalidTransition(_) => 422,
            RelayError::Store(_) => 500,
            RelayError::Transport(_) | RelayError::Provider(_) => 503,
        }
    }

    /// Whether the user can fix this themselves (repaint a surface)
    /// versus an internal failure that must propagate.
    pub fn is_user_recoverable(&self) -> bool {
        self.http_status() < 500
    }
}
