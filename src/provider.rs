use std::fmt::Debug;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use thiserror::Error;

use crate::core_types::{ChatId, CorrelationId, MessageId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Invoice creation failed: {0}")]
    Issue(String),
}

/// What an issued invoice carries.
///
/// The correlation payload is the only field the settlement event echoes
/// back verbatim; the amount here is what the payer is charged, while the
/// settlement's own captured amount is what gets credited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceSpec {
    pub title: String,
    pub description: String,
    pub payload: CorrelationId,
    pub amount: i64,
}

/// Payment-rail client.
///
/// The relay only ever asks the rail to place an invoice in front of a
/// payer; pre-checkout and settlement arrive as inbound events and are
/// answered through the gateway, not through this trait.
#[async_trait]
pub trait PaymentProvider: Send + Sync + Debug {
    /// Place an invoice message in the payer's chat. Returns the message
    /// id of the invoice so it can be cleaned up after settlement.
    async fn create_invoice(
        &self,
        payer_chat: ChatId,
        spec: InvoiceSpec,
    ) -> Result<MessageId, ProviderError>;
}

/// Mock payment rail for tests and `mock-api` runs.
///
/// Records every issued invoice; ids start at 9000 so they stand apart
/// from transport message ids in assertions.
#[derive(Debug)]
pub struct MockProvider {
    issued: Mutex<Vec<(ChatId, InvoiceSpec)>>,
    next_message_id: AtomicI64,
    fail: AtomicBool,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            issued: Mutex::new(Vec::new()),
            next_message_id: AtomicI64::new(9000),
            fail: AtomicBool::new(false),
        }
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, on: bool) {
        self.fail.store(on, Ordering::SeqCst);
    }

    pub fn issued(&self) -> Vec<(ChatId, InvoiceSpec)> {
        self.issued.lock().unwrap().clone()
    }

    pub fn issued_count(&self) -> usize {
        self.issued.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    async fn create_invoice(
        &self,
        payer_chat: ChatId,
        spec: InvoiceSpec,
    ) -> Result<MessageId, ProviderError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Issue("primed to fail".into()));
        }
        let message = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.issued.lock().unwrap().push((payer_chat, spec));
        Ok(message)
    }
}
