//! Settlement Handler
//!
//! The payment rail talks to the relay twice per payment: a pre-checkout
//! probe just before it debits the payer, and a settlement event after
//! the money moved. The probe is the last chance to stop a bad payment;
//! the settlement must credit the merchant exactly once no matter how
//! often the rail redelivers it.

use std::sync::Arc;

use tracing::{info, warn};

use crate::core_types::CorrelationId;
use crate::error::RelayError;
use crate::pending::{PendingInvoice, TransactionTable};
use crate::store::RelayStore;
use crate::transport::{BestEffort, ChatTransport};

pub struct SettlementHandler {
    store: Arc<dyn RelayStore>,
    transport: Arc<dyn ChatTransport>,
    pending: Arc<TransactionTable>,
}

impl SettlementHandler {
    pub fn new(
        store: Arc<dyn RelayStore>,
        transport: Arc<dyn ChatTransport>,
        pending: Arc<TransactionTable>,
    ) -> Self {
        Self {
            store,
            transport,
            pending,
        }
    }

    /// Gate a payment right before the rail debits the payer.
    ///
    /// Rejecting here is the only way to stop the debit, so a consumed
    /// link or an unknown payload must fail hard. The pending record is
    /// read, not taken; the settlement event consumes it.
    pub async fn validate_pre_checkout(&self, payload: CorrelationId) -> Result<(), RelayError> {
        let pending = self
            .pending
            .get(payload)
            .ok_or(RelayError::UnknownTransaction)?;

        if let Some(link) = &pending.link {
            if self.store.link_used(link).await? {
                warn!(%payload, %link, "pre-checkout on a consumed link rejected");
                return Err(RelayError::LinkAlreadyUsed);
            }
        }
        Ok(())
    }

    /// Consume a settlement event. Returns the merchant's new balance.
    ///
    /// The pending record is taken first; a redelivered event finds
    /// nothing and credits nothing. The settled `amount` is the one the
    /// rail captured, which is why the pending record never stores one.
    pub async fn process(&self, payload: CorrelationId, amount: i64) -> Result<i64, RelayError> {
        let pending = self
            .pending
            .take(payload)
            .ok_or(RelayError::UnknownTransaction)?;

        let credited = match self.settle_ledger(&pending, amount).await {
            Ok(balance) => balance,
            Err(e) => {
                // Put the record back so a redelivery can retry.
                // The link marking is idempotent, so a retry is safe.
                self.pending.register(payload, pending);
                return Err(e);
            }
        };

        info!(
            %payload,
            merchant = pending.merchant,
            payer = pending.payer,
            amount,
            balance = credited,
            "payment settled"
        );

        self.repaint_surfaces(&pending, amount).await;
        Ok(credited)
    }

    /// The critical section: mark the link consumed, then credit. The
    /// marking comes first so that a crash between the two steps leaves
    /// an unusable link rather than a reusable one.
    async fn settle_ledger(
        &self,
        pending: &PendingInvoice,
        amount: i64,
    ) -> Result<i64, RelayError> {
        if let Some(link) = &pending.link {
            self.store.mark_link_used(link).await?;
        }
        Ok(self.store.credit(pending.merchant, amount).await?)
    }

    /// Best-effort notifications after the ledger settled. None of
    /// these can fail the payment anymore.
    async fn repaint_surfaces(&self, pending: &PendingInvoice, amount: i64) {
        self.transport
            .send_message(pending.payer, &format!("Payment of {amount} sent"), None)
            .await
            .best_effort("payer settle notice");

        let merchant_text = format!("Payment received: +{amount}");
        match pending.merchant_msg {
            Some(msg) => {
                let edited = self
                    .transport
                    .edit_message(pending.merchant, msg, &merchant_text, None)
                    .await
                    .best_effort("merchant surface edit");
                if edited.is_none() {
                    // The waiting surface is gone; tell them fresh.
                    self.transport
                        .send_message(pending.merchant, &merchant_text, None)
                        .await
                        .best_effort("merchant settle notice");
                }
            }
            None => {
                self.transport
                    .send_message(pending.merchant, &merchant_text, None)
                    .await
                    .best_effort("merchant settle notice");
            }
        }

        if let Some(msg) = pending.payer_prompt_msg {
            self.transport
                .delete_message(pending.payer, msg)
                .await
                .best_effort("stale code prompt delete");
        }
        if let Some(msg) = pending.invoice_msg {
            self.transport
                .delete_message(pending.payer, msg)
                .await
                .best_effort("settled invoice delete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::LinkId;
    use crate::store::{MemoryStore, RelayStore};
    use crate::transport::{Outbound, RecordingTransport};

    struct Fixture {
        store: Arc<MemoryStore>,
        transport: Arc<RecordingTransport>,
        pending: Arc<TransactionTable>,
        handler: SettlementHandler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(RecordingTransport::new());
        let pending = Arc::new(TransactionTable::new());
        let handler = SettlementHandler::new(
            store.clone() as Arc<dyn RelayStore>,
            transport.clone(),
            pending.clone(),
        );
        Fixture {
            store,
            transport,
            pending,
            handler,
        }
    }

    #[tokio::test]
    async fn settlement_credits_exactly_once() {
        let f = fixture();
        let payload = CorrelationId::new();
        f.pending.register(payload, PendingInvoice::new(10, 20));

        let balance = f.handler.process(payload, 4821).await.unwrap();
        assert_eq!(balance, 4821);

        // Redelivery: nothing pending, nothing credited.
        let replay = f.handler.process(payload, 4821).await;
        assert!(matches!(replay, Err(RelayError::UnknownTransaction)));
        assert_eq!(f.store.balance(10).await.unwrap(), 4821);
    }

    #[tokio::test]
    async fn settled_amount_is_authoritative() {
        let f = fixture();
        let payload = CorrelationId::new();
        f.pending.register(payload, PendingInvoice::new(10, 20));

        // Whatever was proposed, the captured amount is what lands.
        f.handler.process(payload, 250).await.unwrap();
        assert_eq!(f.store.balance(10).await.unwrap(), 250);
    }

    #[tokio::test]
    async fn link_marked_before_credit_and_idempotently() {
        let f = fixture();
        let payload = CorrelationId::new();
        let link = LinkId::new();
        // Link already marked by an earlier partial run.
        f.store.mark_link_used(&link).await.unwrap();

        let mut invoice = PendingInvoice::new(10, 20);
        invoice.link = Some(link.clone());
        f.pending.register(payload, invoice);

        // Marking again is a no-op, the credit still lands.
        let balance = f.handler.process(payload, 50).await.unwrap();
        assert_eq!(balance, 50);
        assert!(f.store.link_used(&link).await.unwrap());
    }

    #[tokio::test]
    async fn pre_checkout_rejects_consumed_link() {
        let f = fixture();
        let payload = CorrelationId::new();
        let link = LinkId::new();
        let mut invoice = PendingInvoice::new(10, 20);
        invoice.link = Some(link.clone());
        f.pending.register(payload, invoice);

        assert!(f.handler.validate_pre_checkout(payload).await.is_ok());

        f.store.mark_link_used(&link).await.unwrap();
        let rejected = f.handler.validate_pre_checkout(payload).await;
        assert!(matches!(rejected, Err(RelayError::LinkAlreadyUsed)));

        // Validation must not consume the record.
        assert_eq!(f.pending.pending_count(), 1);
    }

    #[tokio::test]
    async fn pre_checkout_rejects_unknown_payload() {
        let f = fixture();
        let rejected = f.handler.validate_pre_checkout(CorrelationId::new()).await;
        assert!(matches!(rejected, Err(RelayError::UnknownTransaction)));
    }

    #[tokio::test]
    async fn unknown_settlement_touches_no_ledger() {
        let f = fixture();
        let unknown = f.handler.process(CorrelationId::new(), 100).await;
        assert!(matches!(unknown, Err(RelayError::UnknownTransaction)));
        assert_eq!(f.store.balance(10).await.unwrap(), 0);
        assert!(f.transport.outbox().is_empty());
    }

    #[tokio::test]
    async fn transport_failures_do_not_unsettle() {
        let f = fixture();
        f.transport.fail_sends(true);
        f.transport.fail_edits(true);
        f.transport.fail_deletes(true);

        let payload = CorrelationId::new();
        let mut invoice = PendingInvoice::new(10, 20);
        invoice.merchant_msg = Some(77);
        invoice.payer_prompt_msg = Some(78);
        invoice.invoice_msg = Some(79);
        f.pending.register(payload, invoice);

        let balance = f.handler.process(payload, 100).await.unwrap();
        assert_eq!(balance, 100);
        assert_eq!(f.store.balance(10).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn merchant_edit_falls_back_to_fresh_send() {
        let f = fixture();
        f.transport.fail_edits(true);

        let payload = CorrelationId::new();
        let mut invoice = PendingInvoice::new(10, 20);
        invoice.merchant_msg = Some(77);
        f.pending.register(payload, invoice);

        f.handler.process(payload, 100).await.unwrap();
        let texts = f.transport.sent_texts(10);
        assert_eq!(texts, vec!["Payment received: +100".to_string()]);
    }

    #[tokio::test]
    async fn surfaces_repainted_in_order() {
        let f = fixture();
        let payload = CorrelationId::new();
        let mut invoice = PendingInvoice::new(10, 20);
        invoice.merchant_msg = Some(77);
        invoice.payer_prompt_msg = Some(78);
        invoice.invoice_msg = Some(79);
        f.pending.register(payload, invoice);

        f.handler.process(payload, 100).await.unwrap();

        let outbox = f.transport.outbox();
        assert_eq!(outbox.len(), 4);
        assert!(matches!(outbox[0], Outbound::Sent { chat: 20, .. }));
        assert!(matches!(
            outbox[1],
            Outbound::Edited {
                chat: 10,
                message: 77,
                ..
            }
        ));
        assert!(matches!(
            outbox[2],
            Outbound::Deleted {
                chat: 20,
                message: 78
            }
        ));
        assert!(matches!(
            outbox[3],
            Outbound::Deleted {
                chat: 20,
                message: 79
            }
        ));
    }
}
