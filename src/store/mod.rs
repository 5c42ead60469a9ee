//! Durable Relay State
//!
//! Ledger balances, payout requisites, withdrawal requests and the
//! used-link set. Everything that must survive a restart lives behind
//! [`RelayStore`]; the in-memory tables (pairing, pending) deliberately
//! do not.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core_types::{LinkId, MessageId, RequisiteId, UserId, WithdrawalId};
use crate::withdrawal::WithdrawalStatus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(String),
    #[error("Corrupt row: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Db(e.to_string())
    }
}

/// Payout destination kind
///
/// IDs are stored as SMALLINT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
#[serde(rename_all = "snake_case")]
pub enum RequisiteKind {
    /// Phone-addressed bank transfer; carries a bank name.
    BankTransfer = 0,
    /// Card number.
    Card = 1,
}

impl RequisiteKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(RequisiteKind::BankTransfer),
            1 => Some(RequisiteKind::Card),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequisiteKind::BankTransfer => "bank_transfer",
            RequisiteKind::Card => "card",
        }
    }
}

impl fmt::Display for RequisiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A saved payout destination. Immutable once created; users delete and
/// re-add instead of editing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Requisite {
    pub id: RequisiteId,
    pub user: UserId,
    pub kind: RequisiteKind,
    pub detail: String,
    pub bank_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Requisite {
    /// Human-readable destination line, also snapshotted onto
    /// withdrawal rows so it survives requisite deletion.
    pub fn summary(&self) -> String {
        match (&self.kind, &self.bank_name) {
            (RequisiteKind::BankTransfer, Some(bank)) => format!("{} ({bank})", self.detail),
            _ => self.detail.clone(),
        }
    }
}

/// A withdrawal request as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Withdrawal {
    pub id: WithdrawalId,
    pub user: UserId,
    /// Ledger balance captured at request time, in rail units.
    pub amount: i64,
    /// What the operator pays out, in payout units.
    pub payout_amount: i64,
    /// Snapshot of the requisite summary at request time.
    pub destination: String,
    /// Requester's status message, once sent.
    pub surface: Option<MessageId>,
    pub status: WithdrawalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Convert a rail-unit balance into payout units: `floor(balance * rate)`.
pub fn convert_payout(balance: i64, rate: Decimal) -> i64 {
    (Decimal::from(balance) * rate)
        .floor()
        .to_i64()
        .unwrap_or(i64::MAX)
}

/// Persistence seam for the relay.
///
/// Implementations must make each method atomic on its own; callers
/// never get to compose partial steps. [`PgStore`] is the production
/// implementation, [`MemoryStore`] backs tests and `mock-api` runs.
#[async_trait]
pub trait RelayStore: Send + Sync {
    /// Liveness probe for the health endpoint.
    async fn health(&self) -> Result<(), StoreError>;

    /// Idempotently create the ledger row for a first-seen user.
    async fn ensure_user(&self, user: UserId) -> Result<(), StoreError>;

    /// Atomically add `amount` to the user's balance, creating the row
    /// if needed. Returns the new balance.
    async fn credit(&self, user: UserId, amount: i64) -> Result<i64, StoreError>;

    /// Current balance, zero for unknown users.
    async fn balance(&self, user: UserId) -> Result<i64, StoreError>;

    /// Insert a requisite unless the user already has `cap` of them.
    /// The count check and the insert are one statement; `None` means
    /// the cap was reached.
    async fn add_requisite(
        &self,
        user: UserId,
        kind: RequisiteKind,
        detail: &str,
        bank_name: Option<&str>,
        cap: i64,
    ) -> Result<Option<Requisite>, StoreError>;

    /// Owner-scoped delete. Returns whether a row was removed.
    async fn delete_requisite(&self, user: UserId, id: RequisiteId) -> Result<bool, StoreError>;

    /// The user's requisites, newest first.
    async fn requisites(&self, user: UserId) -> Result<Vec<Requisite>, StoreError>;

    /// One requisite, owner-scoped.
    async fn requisite(
        &self,
        user: UserId,
        id: RequisiteId,
    ) -> Result<Option<Requisite>, StoreError>;

    /// Zero the balance and record the withdrawal in one transaction.
    ///
    /// Locks the ledger row, aborts with `None` when the balance is
    /// already non-positive (a concurrent request won), otherwise
    /// resets it to zero and inserts a `wait` row whose payout amount
    /// is `floor(balance * rate)`. No partial outcome is observable.
    async fn open_withdrawal(
        &self,
        user: UserId,
        destination: &str,
        rate: Decimal,
    ) -> Result<Option<Withdrawal>, StoreError>;

    /// Attach the requester's status message to the row.
    async fn set_withdrawal_surface(
        &self,
        id: WithdrawalId,
        message: MessageId,
    ) -> Result<(), StoreError>;

    async fn withdrawal(&self, id: WithdrawalId) -> Result<Option<Withdrawal>, StoreError>;

    /// Compare-and-swap the status: the update only lands while the row
    /// still holds `expected`. `false` means the row is missing or a
    /// concurrent transition got there first.
    async fn set_withdrawal_status(
        &self,
        id: WithdrawalId,
        expected: WithdrawalStatus,
        target: WithdrawalStatus,
    ) -> Result<bool, StoreError>;

    /// Whether a shareable link has already settled.
    async fn link_used(&self, link: &LinkId) -> Result<bool, StoreError>;

    /// Record a link as consumed. Returns `false` when it already was,
    /// which makes the marking idempotent under redelivery.
    async fn mark_link_used(&self, link: &LinkId) -> Result<bool, StoreError>;
}
