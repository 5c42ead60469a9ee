//! Pending Transactions
//!
//! Between invoice issuance and settlement, the relay remembers who is
//! paying whom and which chat surfaces to repaint, keyed by the
//! correlation id carried in the invoice payload. Deliberately no amount
//! field: the settlement event's captured amount is the one credited.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::core_types::{CorrelationId, LinkId, MessageId, UserId};

/// Everything needed to finish a payment once the rail settles it.
#[derive(Debug, Clone)]
pub struct PendingInvoice {
    pub merchant: UserId,
    pub payer: UserId,
    /// Merchant's "waiting for payment" surface.
    pub merchant_msg: Option<MessageId>,
    /// Payer's code-prompt message, deleted after settlement.
    pub payer_prompt_msg: Option<MessageId>,
    /// The invoice message itself, deleted after settlement.
    pub invoice_msg: Option<MessageId>,
    /// Set when the invoice came from a one-time shareable link.
    pub link: Option<LinkId>,
    registered_at: Instant,
}

impl PendingInvoice {
    pub fn new(merchant: UserId, payer: UserId) -> Self {
        Self {
            merchant,
            payer,
            merchant_msg: None,
            payer_prompt_msg: None,
            invoice_msg: None,
            link: None,
            registered_at: Instant::now(),
        }
    }
}

/// Pending transactions keyed by correlation id.
#[derive(Debug, Default)]
pub struct TransactionTable {
    pending: Mutex<FxHashMap<CorrelationId, PendingInvoice>>,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending transaction under a freshly minted id.
    ///
    /// Ids are minted per invoice, so a collision is a programming error
    /// and fatal, not a recoverable condition.
    pub fn register(&self, id: CorrelationId, invoice: PendingInvoice) {
        let prev = self.pending.lock().unwrap().insert(id, invoice);
        assert!(prev.is_none(), "correlation id registered twice: {id}");
    }

    /// Read without consuming. Pre-checkout validation inspects the
    /// record but must leave it for the settlement to take.
    pub fn get(&self, id: CorrelationId) -> Option<PendingInvoice> {
        self.pending.lock().unwrap().get(&id).cloned()
    }

    /// Fetch and remove in one step. The single consumption point: a
    /// second take of the same id observes `None`, which is what makes
    /// settlement redelivery safe.
    pub fn take(&self, id: CorrelationId) -> Option<PendingInvoice> {
        self.pending.lock().unwrap().remove(&id)
    }

    /// Drop records older than `ttl`. Returns how many were removed.
    /// Never called unless a TTL is configured.
    pub fn sweep_expired(&self, ttl: Duration) -> usize {
        let mut pending = self.pending.lock().unwrap();
        let before = pending.len();
        pending.retain(|_, p| p.registered_at.elapsed() < ttl);
        before - pending.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
