//! Withdrawal Workflow
//!
//! A user cashes out their whole balance to a saved requisite; the
//! request lands in front of the operator, who walks it forward through
//! the status machine. The balance reset and the request row are one
//! store transaction, so no crash can zero money without a record of
//! where it went.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::core_types::{ChatId, MessageId, RequisiteId, UserId, WithdrawalId};
use crate::error::RelayError;
use crate::events::setstat_data;
use crate::store::{RelayStore, Requisite, Withdrawal, convert_payout};
use crate::transport::{BestEffort, Button, ChatTransport, Keyboard};

use super::status::WithdrawalStatus;

/// Operator controls for a request in `status`: one button per legal
/// target, `None` once the request is terminal. Callback payloads are
/// `setstat_{status}_{id}`.
pub fn operator_keyboard(id: WithdrawalId, status: WithdrawalStatus) -> Option<Keyboard> {
    let buttons: Vec<Button> = [
        WithdrawalStatus::Review,
        WithdrawalStatus::Soon,
        WithdrawalStatus::Done,
    ]
    .into_iter()
    .filter(|target| status.can_advance_to(*target))
    .map(|target| Button::callback(target.as_str(), setstat_data(target, id)))
    .collect();

    if buttons.is_empty() {
        None
    } else {
        Some(Keyboard::new().row(buttons))
    }
}

pub struct WithdrawalService {
    store: Arc<dyn RelayStore>,
    transport: Arc<dyn ChatTransport>,
    config: RelayConfig,
}

impl WithdrawalService {
    pub fn new(
        store: Arc<dyn RelayStore>,
        transport: Arc<dyn ChatTransport>,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    /// Cash out the user's whole balance to one of their requisites.
    ///
    /// `requisite` picks an explicit destination; `None` takes the most
    /// recently added one. The minimum applies to the converted amount.
    pub async fn request(
        &self,
        user: UserId,
        requisite: Option<RequisiteId>,
    ) -> Result<Withdrawal, RelayError> {
        let destination = self.resolve_requisite(user, requisite).await?;

        let balance = self.store.balance(user).await?;
        let converted = convert_payout(balance, self.config.conversion_rate);
        if converted < self.config.min_withdrawal {
            return Err(RelayError::BelowMinimum {
                minimum: self.config.min_withdrawal,
            });
        }

        let withdrawal = self
            .store
            .open_withdrawal(user, &destination.summary(), self.config.conversion_rate)
            .await?
            .ok_or(RelayError::NothingToWithdraw)?;

        info!(
            withdrawal = withdrawal.id,
            user,
            amount = withdrawal.amount,
            payout = withdrawal.payout_amount,
            "withdrawal opened"
        );

        self.repaint_requester(&withdrawal).await;
        self.notify_operator(&withdrawal).await;

        Ok(withdrawal)
    }

    /// Operator-only: move a request forward in the status machine.
    ///
    /// `control_msg` is the operator message hosting the button that
    /// triggered this, repainted with the remaining actions.
    pub async fn advance(
        &self,
        operator: ChatId,
        id: WithdrawalId,
        target: WithdrawalStatus,
        control_msg: Option<MessageId>,
    ) -> Result<Withdrawal, RelayError> {
        if operator != self.config.operator_chat {
            return Err(RelayError::NotOperator);
        }

        let mut withdrawal = self
            .store
            .withdrawal(id)
            .await?
            .ok_or(RelayError::WithdrawalNotFound(id))?;

        withdrawal.status.advance_to(target)?;

        // CAS against the status we just read; a concurrent operator
        // who got there first invalidates this transition.
        let landed = self
            .store
            .set_withdrawal_status(id, withdrawal.status, target)
            .await?;
        if !landed {
            return Err(RelayError::InvalidTransition(format!(
                "{} -> {target} lost to a concurrent update",
                withdrawal.status
            )));
        }
        withdrawal.status = target;

        info!(withdrawal = id, status = %target, "withdrawal advanced");

        self.repaint_requester(&withdrawal).await;
        if let Some(msg) = control_msg {
            self.transport
                .edit_message(
                    operator,
                    msg,
                    &format!("Withdrawal #{id} - {target}"),
                    operator_keyboard(id, target),
                )
                .await
                .best_effort("operator surface edit");
        }

        Ok(withdrawal)
    }

    async fn resolve_requisite(
        &self,
        user: UserId,
        requisite: Option<RequisiteId>,
    ) -> Result<Requisite, RelayError> {
        let found = match requisite {
            Some(id) => self.store.requisite(user, id).await?,
            None => self.store.requisites(user).await?.into_iter().next(),
        };
        found.ok_or(RelayError::RequisiteNotFound)
    }

    /// Paint the requester's status surface: edit it in place, or send
    /// a fresh message and remember it when the old one is gone.
    async fn repaint_requester(&self, withdrawal: &Withdrawal) {
        let text = format!(
            "Withdrawal #{}: {}\n{} -> {} to {}",
            withdrawal.id,
            withdrawal.status.headline(),
            withdrawal.amount,
            withdrawal.payout_amount,
            withdrawal.destination
        );

        if let Some(msg) = withdrawal.surface {
            let edited = self
                .transport
                .edit_message(withdrawal.user, msg, &text, None)
                .await
                .best_effort("withdrawal status edit");
            if edited.is_some() {
                return;
            }
        }

        if let Some(msg) = self
            .transport
            .send_message(withdrawal.user, &text, None)
            .await
            .best_effort("withdrawal status send")
        {
            if let Err(e) = self.store.set_withdrawal_surface(withdrawal.id, msg).await {
                warn!(error = %e, withdrawal = withdrawal.id, "failed to persist status surface");
            }
        }
    }

    async fn notify_operator(&self, withdrawal: &Withdrawal) {
        let text = format!(
            "Withdrawal #{} from {}: {} -> {}\nDestination: {}",
            withdrawal.id,
            withdrawal.user,
            withdrawal.amount,
            withdrawal.payout_amount,
            withdrawal.destination
        );
        self.transport
            .send_message(
                self.config.operator_chat,
                &text,
                operator_keyboard(withdrawal.id, withdrawal.status),
            )
            .await
            .best_effort("operator withdrawal notice");
    }
}
