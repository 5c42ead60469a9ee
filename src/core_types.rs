//! Core types used throughout the relay
//!
//! Fundamental aliases and id newtypes shared by all modules.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// User ID - stable identity assigned by the chat platform.
///
/// Primary key for ledger rows and the owner field on requisites,
/// sessions and withdrawals.
pub type UserId = i64;

/// Chat ID - destination for outbound messages.
///
/// For direct chats this equals the [`UserId`]; the alias keeps call
/// sites honest about which role a value plays.
pub type ChatId = i64;

/// Message ID - identifies one message within a chat surface.
pub type MessageId = i64;

/// Withdrawal request ID - assigned sequentially by the store.
pub type WithdrawalId = i64;

/// Requisite ID - assigned sequentially by the store.
pub type RequisiteId = i64;

/// Correlation id embedded in an invoice payload.
///
/// Minted once per issued invoice; the settlement event is matched back
/// to pending state through it. Freshly minted v4 UUIDs make uniqueness
/// a non-issue without any coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(uuid::Uuid);

impl CorrelationId {
    /// Mint a fresh correlation id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(uuid::Uuid::parse_str(s)?))
    }
}

/// One-time settlement link id.
///
/// Minted when a merchant creates a shareable invoice; recorded in the
/// used-link set the moment the settlement succeeds. 12 hex chars of a
/// v4 UUID, matching the wire format carried in start parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(String);

impl LinkId {
    /// Mint a fresh link id.
    pub fn new() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        Self(hex[..12].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LinkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LinkId {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err("link id must be a non-empty alphanumeric token");
        }
        Ok(Self(s.to_string()))
    }
}
