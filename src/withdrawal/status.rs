//! Withdrawal Status Machine
//!
//! Status IDs are spaced for PostgreSQL storage as SMALLINT. Operators
//! move a request strictly forward; skipping a stage is allowed, going
//! back or standing still is not.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Withdrawal request lifecycle
///
/// Terminal state: DONE (30). Every request starts at WAIT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i16)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    /// Recorded, no operator has looked at it yet
    Wait = 0,

    /// An operator is reviewing the request
    Review = 10,

    /// Approved, payout going out shortly
    Soon = 20,

    /// Terminal: payout sent
    Done = 30,
}

impl WithdrawalStatus {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, WithdrawalStatus::Done)
    }

    /// The operator's next step from here, if any.
    pub fn next(&self) -> Option<Self> {
        match self {
            WithdrawalStatus::Wait => Some(WithdrawalStatus::Review),
            WithdrawalStatus::Review => Some(WithdrawalStatus::Soon),
            WithdrawalStatus::Soon => Some(WithdrawalStatus::Done),
            WithdrawalStatus::Done => None,
        }
    }

    /// Whether moving to `target` is legal: strictly forward, skipping
    /// stages allowed.
    pub fn can_advance_to(&self, target: Self) -> bool {
        target > *self
    }

    /// Validate a transition, or report it in the error taxonomy.
    pub fn advance_to(&self, target: Self) -> Result<Self, RelayError> {
        if self.can_advance_to(target) {
            Ok(target)
        } else {
            Err(RelayError::InvalidTransition(format!(
                "{self} -> {target}"
            )))
        }
    }

    /// Get the numeric status ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL status ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(WithdrawalStatus::Wait),
            10 => Some(WithdrawalStatus::Review),
            20 => Some(WithdrawalStatus::Soon),
            30 => Some(WithdrawalStatus::Done),
            _ => None,
        }
    }

    /// Wire name, as carried in operator callbacks.
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Wait => "wait",
            WithdrawalStatus::Review => "review",
            WithdrawalStatus::Soon => "soon",
            WithdrawalStatus::Done => "done",
        }
    }

    /// What the requester sees on their status surface.
    pub fn headline(&self) -> &'static str {
        match self {
            WithdrawalStatus::Wait => "Request received, waiting for an operator",
            WithdrawalStatus::Review => "An operator is reviewing your request",
            WithdrawalStatus::Soon => "Approved, payout on its way",
            WithdrawalStatus::Done => "Payout sent",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WithdrawalStatus {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wait" => Ok(WithdrawalStatus::Wait),
            "review" => Ok(WithdrawalStatus::Review),
            "soon" => Ok(WithdrawalStatus::Soon),
            "done" => Ok(WithdrawalStatus::Done),
            other => Err(RelayError::UnknownStatus(other.to_string())),
        }
    }
}

impl TryFrom<i16> for WithdrawalStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        WithdrawalStatus::from_id(value).ok_or(())
    }
}
