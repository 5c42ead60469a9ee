//! Shareable Invoice Links
//!
//! A merchant can mint a one-time payment link instead of pairing by
//! code. The link travels as a deep-link start parameter; whoever opens
//! it first and settles consumes it. The start parameter is editable by
//! whoever holds it, so everything parsed out of it is re-validated at
//! claim time.

use std::str::FromStr;

use crate::core_types::{LinkId, UserId};
use crate::error::RelayError;

const START_PREFIX: &str = "inline_pay_";

/// A minted one-time payment link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareableLink {
    pub amount: i64,
    pub merchant: UserId,
    pub link: LinkId,
}

impl ShareableLink {
    /// Mint a fresh link for `merchant`, validating the amount range.
    pub fn mint(merchant: UserId, amount: i64, ceiling: i64) -> Result<Self, RelayError> {
        if amount < 1 || amount > ceiling {
            return Err(RelayError::InvalidAmount(amount));
        }
        Ok(Self {
            amount,
            merchant,
            link: LinkId::new(),
        })
    }

    /// Render as a deep-link start parameter:
    /// `inline_pay_{amount}_{merchant}_{link}`.
    pub fn start_param(&self) -> String {
        format!("{START_PREFIX}{}_{}_{}", self.amount, self.merchant, self.link)
    }

    /// Parse a start parameter back into a link.
    pub fn parse(param: &str) -> Result<Self, RelayError> {
        let malformed = || RelayError::MalformedPayload(param.to_string());
        let rest = param.strip_prefix(START_PREFIX).ok_or_else(malformed)?;
        let mut parts = rest.splitn(3, '_');
        let amount = parts
            .next()
            .and_then(|p| p.parse::<i64>().ok())
            .ok_or_else(malformed)?;
        let merchant = parts
            .next()
            .and_then(|p| p.parse::<UserId>().ok())
            .ok_or_else(malformed)?;
        let link = parts
            .next()
            .and_then(|p| LinkId::from_str(p).ok())
            .ok_or_else(malformed)?;
        Ok(Self {
            amount,
            merchant,
            link,
        })
    }
}
