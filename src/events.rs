//! Inbound Events
//!
//! The relay consumes two event families: chat events (a user tapped a
//! button or typed a line) and provider events (the rail asking to
//! finalize a payment). Translating a real chat platform's update
//! format into these is the embedding glue's job; the gateway accepts
//! them as JSON.
//!
//! Callback payloads are this crate's own wire format, minted onto
//! keyboards here and parsed back here, so the two directions cannot
//! drift apart.

use serde::{Deserialize, Serialize};

use crate::core_types::{
    ChatId, CorrelationId, MessageId, RequisiteId, UserId, WithdrawalId,
};
use crate::store::RequisiteKind;
use crate::withdrawal::WithdrawalStatus;

// --- Callback wire format ---

pub const CB_OPEN_PAIRING: &str = "open_pairing";
pub const CB_MENU: &str = "menu";
pub const CB_CANCEL_INVOICE: &str = "cancel_invoice";
pub const CB_PROFILE: &str = "profile";
pub const CB_WITHDRAW: &str = "withdraw";

pub fn regen_data(code: &str) -> String {
    format!("regen_{code}")
}

pub fn close_data(code: &str) -> String {
    format!("close_{code}")
}

pub fn confirm_data(code: &str, amount: i64) -> String {
    format!("confirm_{code}_{amount}")
}

pub fn delreq_data(id: RequisiteId) -> String {
    format!("delreq_{id}")
}

pub fn withdraw_data(id: RequisiteId) -> String {
    format!("withdraw_{id}")
}

pub fn setstat_data(status: WithdrawalStatus, id: WithdrawalId) -> String {
    format!("setstat_{}_{id}", status.as_str())
}

// --- Chat events ---

/// A payout destination as the user submits it, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequisiteDraft {
    pub kind: RequisiteKind,
    pub detail: String,
    #[serde(default)]
    pub bank_name: Option<String>,
}

/// One user action, as JSON on `POST /event/chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// `/start`, optionally carrying a shareable-link deep link.
    Start {
        user: UserId,
        #[serde(default)]
        deep_link: Option<String>,
    },
    OpenPairing {
        user: UserId,
    },
    /// Swap the code on an existing code message.
    Regenerate {
        user: UserId,
        code: String,
        surface: MessageId,
    },
    ClosePairing {
        user: UserId,
        code: String,
        surface: MessageId,
    },
    BackToMenu {
        user: UserId,
        #[serde(default)]
        surface: Option<MessageId>,
    },
    /// Typed `"<code> <amount>"` line from a merchant.
    MerchantEntry {
        user: UserId,
        text: String,
    },
    ConfirmInvoice {
        user: UserId,
        code: String,
        amount: i64,
        surface: MessageId,
    },
    CancelInvoice {
        user: UserId,
        surface: MessageId,
    },
    MintShareLink {
        user: UserId,
        amount: i64,
    },
    OpenProfile {
        user: UserId,
        #[serde(default)]
        surface: Option<MessageId>,
    },
    AddRequisite {
        user: UserId,
        draft: RequisiteDraft,
    },
    DeleteRequisite {
        user: UserId,
        id: RequisiteId,
    },
    RequestWithdrawal {
        user: UserId,
        #[serde(default)]
        requisite: Option<RequisiteId>,
    },
    AdvanceWithdrawal {
        operator: ChatId,
        id: WithdrawalId,
        status: WithdrawalStatus,
        #[serde(default)]
        control_msg: Option<MessageId>,
    },
}

impl ChatEvent {
    /// Map a callback payload from one of our own keyboards back to the
    /// event it stands for. `None` for payloads we never minted.
    pub fn parse_callback(user: UserId, data: &str, surface: MessageId) -> Option<ChatEvent> {
        match data {
            CB_OPEN_PAIRING => return Some(ChatEvent::OpenPairing { user }),
            CB_MENU => {
                return Some(ChatEvent::BackToMenu {
                    user,
                    surface: Some(surface),
                });
            }
            CB_CANCEL_INVOICE => return Some(ChatEvent::CancelInvoice { user, surface }),
            CB_PROFILE => {
                return Some(ChatEvent::OpenProfile {
                    user,
                    surface: Some(surface),
                });
            }
            CB_WITHDRAW => {
                return Some(ChatEvent::RequestWithdrawal {
                    user,
                    requisite: None,
                });
            }
            _ => {}
        }

        if let Some(code) = data.strip_prefix("regen_") {
            return Some(ChatEvent::Regenerate {
                user,
                code: code.to_string(),
                surface,
            });
        }
        if let Some(code) = data.strip_prefix("close_") {
            return Some(ChatEvent::ClosePairing {
                user,
                code: code.to_string(),
                surface,
            });
        }
        if let Some(rest) = data.strip_prefix("confirm_") {
            let (code, amount) = rest.split_once('_')?;
            return Some(ChatEvent::ConfirmInvoice {
                user,
                code: code.to_string(),
                amount: amount.parse().ok()?,
                surface,
            });
        }
        if let Some(id) = data.strip_prefix("delreq_") {
            return Some(ChatEvent::DeleteRequisite {
                user,
                id: id.parse().ok()?,
            });
        }
        if let Some(id) = data.strip_prefix("withdraw_") {
            return Some(ChatEvent::RequestWithdrawal {
                user,
                requisite: Some(id.parse().ok()?),
            });
        }
        if let Some(rest) = data.strip_prefix("setstat_") {
            let (status, id) = rest.split_once('_')?;
            return Some(ChatEvent::AdvanceWithdrawal {
                operator: user,
                id: id.parse().ok()?,
                status: status.parse().ok()?,
                control_msg: Some(surface),
            });
        }

        None
    }
}

// --- Provider events ---

/// The rail's last question before debiting the payer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreCheckoutRequest {
    pub payload: CorrelationId,
}

/// The rail settled a payment. `amount` is what was actually captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementNotice {
    pub payload: CorrelationId,
    pub amount: i64,
}
