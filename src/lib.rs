//! paylink - Pairing-Code Payment Relay
//!
//! A relay that lets two chat users settle a payment through a short
//! pairing code or a one-time shareable link, with exactly-once ledger
//! crediting and operator-reviewed withdrawals.
//!
//! # Modules
//!
//! - [`core_types`] - Core type definitions (UserId, CorrelationId, etc.)
//! - [`pairing`] - Short-code session table (payer side)
//! - [`pending`] - In-flight invoice registry keyed by correlation id
//! - [`sharelink`] - One-time shareable invoice links
//! - [`settlement`] - Exactly-once settlement of provider notices
//! - [`withdrawal`] - Balance conversion and operator status flow
//! - [`store`] - Durable state (Postgres, plus the in-memory test store)
//! - [`transport`] / [`provider`] - Collaborator seams for the chat
//!   platform and the payment rail
//! - [`relay`] - Orchestration: one handler per inbound event
//! - [`events`] / [`gateway`] - JSON process surface

// Core types - must be first!
pub mod core_types;

// Error taxonomy
pub mod error;

// Relay components
pub mod pairing;
pub mod pending;
pub mod provider;
pub mod relay;
pub mod settlement;
pub mod sharelink;
pub mod store;
pub mod transport;
pub mod withdrawal;

// Process surface
pub mod events;
pub mod gateway;

// Ambient
pub mod config;
pub mod logging;

// Convenient re-exports at crate root
pub use core_types::{
    ChatId, CorrelationId, LinkId, MessageId, RequisiteId, UserId, WithdrawalId,
};
pub use error::RelayError;
pub use events::{ChatEvent, PreCheckoutRequest, SettlementNotice};
pub use pairing::SessionTable;
pub use pending::{PendingInvoice, TransactionTable};
pub use provider::{InvoiceSpec, PaymentProvider};
pub use relay::RelayService;
pub use sharelink::ShareableLink;
pub use store::{MemoryStore, PgStore, RelayStore, Requisite, RequisiteKind, Withdrawal};
pub use transport::{ChatTransport, Keyboard};
pub use withdrawal::WithdrawalStatus;
