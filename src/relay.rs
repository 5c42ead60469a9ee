//! Relay Orchestration
//!
//! One method per inbound event, composing the pairing table, pending
//! table, durable store and the settlement/withdrawal services. Chat
//! handlers follow one shape: validate, apply the state change, then
//! repaint surfaces. User-recoverable rejections repaint a surface (a
//! re-prompt or the menu) and still surface the error to the gateway;
//! store and provider failures propagate untouched.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::info;

use crate::config::RelayConfig;
use crate::core_types::{CorrelationId, MessageId, RequisiteId, UserId};
use crate::error::RelayError;
use crate::events::{
    CB_CANCEL_INVOICE, CB_MENU, CB_OPEN_PAIRING, CB_PROFILE, CB_WITHDRAW, ChatEvent,
    PreCheckoutRequest, RequisiteDraft, SettlementNotice, close_data, confirm_data, delreq_data,
    regen_data,
};
use crate::pairing::SessionTable;
use crate::pending::{PendingInvoice, TransactionTable};
use crate::provider::{InvoiceSpec, PaymentProvider};
use crate::settlement::SettlementHandler;
use crate::sharelink::ShareableLink;
use crate::store::{RelayStore, RequisiteKind, Withdrawal, convert_payout};
use crate::transport::{BestEffort, Button, ChatTransport, Keyboard};
use crate::withdrawal::WithdrawalService;

pub struct RelayService {
    config: RelayConfig,
    store: Arc<dyn RelayStore>,
    transport: Arc<dyn ChatTransport>,
    provider: Arc<dyn PaymentProvider>,
    sessions: SessionTable,
    pending: Arc<TransactionTable>,
    settlement: SettlementHandler,
    withdrawals: WithdrawalService,
}

impl RelayService {
    pub fn new(
        config: RelayConfig,
        store: Arc<dyn RelayStore>,
        transport: Arc<dyn ChatTransport>,
        provider: Arc<dyn PaymentProvider>,
    ) -> Self {
        let pending = Arc::new(TransactionTable::new());
        let settlement =
            SettlementHandler::new(store.clone(), transport.clone(), pending.clone());
        let withdrawals =
            WithdrawalService::new(store.clone(), transport.clone(), config.clone());
        Self {
            sessions: SessionTable::new(config.code_length),
            config,
            store,
            transport,
            provider,
            pending,
            settlement,
            withdrawals,
        }
    }

    /// Route one chat event to its handler. The JSON value is the
    /// handler's answer for the gateway envelope; most handlers only
    /// talk through the transport and answer `null`.
    pub async fn dispatch(&self, event: ChatEvent) -> Result<Value, RelayError> {
        match event {
            ChatEvent::Start { user, deep_link } => {
                self.start(user, deep_link.as_deref()).await?;
                Ok(Value::Null)
            }
            ChatEvent::OpenPairing { user } => {
                let code = self.open_pairing(user).await?;
                Ok(json!({ "code": code }))
            }
            ChatEvent::Regenerate {
                user,
                code,
                surface,
            } => {
                let code = self.regenerate(user, &code, surface).await?;
                Ok(json!({ "code": code }))
            }
            ChatEvent::ClosePairing {
                user,
                code,
                surface,
            } => {
                self.close_pairing(user, &code, surface).await?;
                Ok(Value::Null)
            }
            ChatEvent::BackToMenu { user, surface } => {
                self.back_to_menu(user, surface).await?;
                Ok(Value::Null)
            }
            ChatEvent::MerchantEntry { user, text } => {
                self.merchant_entry(user, &text).await?;
                Ok(Value::Null)
            }
            ChatEvent::ConfirmInvoice {
                user,
                code,
                amount,
                surface,
            } => {
                let payload = self.confirm_invoice(user, &code, amount, surface).await?;
                Ok(json!({ "payload": payload }))
            }
            ChatEvent::CancelInvoice { user, surface } => {
                self.paint_menu(user, Some(surface)).await?;
                Ok(Value::Null)
            }
            ChatEvent::MintShareLink { user, amount } => {
                let param = self.mint_share_link(user, amount)?;
                Ok(json!({ "start_param": param }))
            }
            ChatEvent::OpenProfile { user, surface } => {
                self.profile_view(user, surface).await?;
                Ok(Value::Null)
            }
            ChatEvent::AddRequisite { user, draft } => {
                let requisite = self.add_requisite(user, draft).await?;
                Ok(json!({ "requisite_id": requisite }))
            }
            ChatEvent::DeleteRequisite { user, id } => {
                self.delete_requisite(user, id).await?;
                Ok(Value::Null)
            }
            ChatEvent::RequestWithdrawal { user, requisite } => {
                let w = self.request_withdrawal(user, requisite).await?;
                Ok(json!({ "withdrawal_id": w.id, "status": w.status.as_str() }))
            }
            ChatEvent::AdvanceWithdrawal {
                operator,
                id,
                status,
                control_msg,
            } => {
                let w = self
                    .withdrawals
                    .advance(operator, id, status, control_msg)
                    .await?;
                Ok(json!({ "withdrawal_id": w.id, "status": w.status.as_str() }))
            }
        }
    }

    /// Answer the rail's pre-checkout probe. An `Err` here must reach
    /// the rail as a rejection, or the payer gets debited for a payment
    /// the relay will refuse.
    pub async fn pre_checkout(&self, request: PreCheckoutRequest) -> Result<(), RelayError> {
        self.settlement.validate_pre_checkout(request.payload).await
    }

    /// Consume a settlement notice. Returns the merchant's new balance.
    pub async fn settle(&self, notice: SettlementNotice) -> Result<i64, RelayError> {
        self.settlement.process(notice.payload, notice.amount).await
    }

    /// Liveness probe: pings the durable store.
    pub async fn health(&self) -> Result<(), RelayError> {
        self.store.health().await?;
        Ok(())
    }

    /// Apply the configured TTLs to both in-memory tables. Returns the
    /// (sessions, pending) removal counts. A run with no TTL configured
    /// touches nothing.
    pub fn sweep_expired(&self) -> (usize, usize) {
        let sessions = self
            .config
            .session_ttl()
            .map(|ttl| self.sessions.sweep_expired(ttl))
            .unwrap_or(0);
        let pending = self
            .config
            .pending_ttl()
            .map(|ttl| self.pending.sweep_expired(ttl))
            .unwrap_or(0);
        if sessions > 0 || pending > 0 {
            info!(sessions, pending, "expired relay state swept");
        }
        (sessions, pending)
    }

    // --- Entry ---

    async fn start(&self, user: UserId, deep_link: Option<&str>) -> Result<(), RelayError> {
        self.store.ensure_user(user).await?;
        match deep_link {
            Some(param) => self.claim_share_link(user, param).await,
            None => self.paint_menu(user, None).await,
        }
    }

    async fn paint_menu(&self, user: UserId, surface: Option<MessageId>) -> Result<(), RelayError> {
        let text = "What would you like to do?\n\
                    To pay someone, ask them for a code.\n\
                    To bill someone, type: <code> <amount>";
        let keyboard = Self::menu_keyboard();
        if let Some(msg) = surface {
            let edited = self
                .transport
                .edit_message(user, msg, text, Some(keyboard.clone()))
                .await
                .best_effort("menu repaint");
            if edited.is_some() {
                return Ok(());
            }
        }
        self.transport
            .send_message(user, text, Some(keyboard))
            .await?;
        Ok(())
    }

    fn menu_keyboard() -> Keyboard {
        Keyboard::new()
            .row(vec![Button::callback("Get a payment code", CB_OPEN_PAIRING)])
            .row(vec![Button::callback("Profile", CB_PROFILE)])
    }

    // --- Pairing ---

    async fn open_pairing(&self, user: UserId) -> Result<String, RelayError> {
        let code = self.sessions.open(user);
        match self.send_code_message(user, &code, None).await {
            Ok(msg) => {
                self.sessions.set_surface(&code, msg);
                info!(user, %code, "pairing session opened");
                Ok(code)
            }
            Err(e) => {
                // No surface means nobody can ever see the code.
                self.sessions.close(&code);
                Err(e)
            }
        }
    }

    async fn regenerate(
        &self,
        user: UserId,
        old_code: &str,
        surface: MessageId,
    ) -> Result<String, RelayError> {
        // Only the session owner may close it through this path; a
        // foreign or stale code is simply left alone.
        if self.sessions.propose(old_code).is_ok_and(|payer| payer == user) {
            self.sessions.close(old_code);
        }
        let code = self.sessions.open(user);
        match self.send_code_message(user, &code, Some(surface)).await {
            Ok(msg) => {
                self.sessions.set_surface(&code, msg);
                info!(user, old_code, new_code = %code, "pairing code regenerated");
                Ok(code)
            }
            Err(e) => {
                self.sessions.close(&code);
                Err(e)
            }
        }
    }

    async fn close_pairing(
        &self,
        user: UserId,
        code: &str,
        surface: MessageId,
    ) -> Result<(), RelayError> {
        if self.sessions.propose(code).is_ok_and(|payer| payer == user) {
            self.sessions.close(code);
            info!(user, code, "pairing session closed");
        }
        self.paint_menu(user, Some(surface)).await
    }

    /// Walking back to the menu abandons any code the payer still holds;
    /// a code nobody is watching must not stay billable.
    async fn back_to_menu(
        &self,
        user: UserId,
        surface: Option<MessageId>,
    ) -> Result<(), RelayError> {
        for code in self.sessions.close_by_payer(user) {
            info!(user, %code, "pairing session closed on menu return");
        }
        self.paint_menu(user, surface).await
    }

    /// Paint (or repaint) a code surface. Returns the message that now
    /// shows the code.
    async fn send_code_message(
        &self,
        user: UserId,
        code: &str,
        surface: Option<MessageId>,
    ) -> Result<MessageId, RelayError> {
        let text = format!(
            "Your payment code: {code}\n\
             Whoever you are paying enters it with an amount."
        );
        let keyboard = Keyboard::new()
            .row(vec![
                Button::callback("New code", regen_data(code)),
                Button::callback("Close", close_data(code)),
            ])
            .row(vec![Button::callback("Menu", CB_MENU)]);

        if let Some(msg) = surface {
            let edited = self
                .transport
                .edit_message(user, msg, &text, Some(keyboard.clone()))
                .await
                .best_effort("code surface repaint");
            if edited.is_some() {
                return Ok(msg);
            }
        }
        Ok(self
            .transport
            .send_message(user, &text, Some(keyboard))
            .await?)
    }

    // --- Merchant flow ---

    async fn merchant_entry(&self, user: UserId, text: &str) -> Result<(), RelayError> {
        let (code, amount) = match Self::parse_entry(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.say(user, "Send the code and the amount, like: 4821 250")
                    .await;
                return Err(e);
            }
        };

        if let Err(e) = self.check_amount(amount) {
            self.say(
                user,
                &format!("The amount must be between 1 and {}", self.config.amount_ceiling),
            )
            .await;
            return Err(e);
        }

        if let Err(e) = self.sessions.propose(&code) {
            self.say(user, "No one is waiting on that code. Check it and try again.")
                .await;
            return Err(e);
        }

        let keyboard = Keyboard::new().row(vec![
            Button::callback("Confirm", confirm_data(&code, amount)),
            Button::callback("Cancel", CB_CANCEL_INVOICE),
        ]);
        self.transport
            .send_message(
                user,
                &format!("Bill {amount} to code {code}?"),
                Some(keyboard),
            )
            .await?;
        Ok(())
    }

    async fn confirm_invoice(
        &self,
        user: UserId,
        code: &str,
        amount: i64,
        surface: MessageId,
    ) -> Result<CorrelationId, RelayError> {
        // Callback payloads can be replayed or edited; re-check the
        // amount the same way the typed entry was checked.
        self.check_amount(amount)?;

        let confirmed = match self.sessions.confirm(code) {
            Ok(c) => c,
            Err(e) => {
                // The payer closed or someone else confirmed first.
                self.transport
                    .edit_message(
                        user,
                        surface,
                        "The payer is no longer waiting on that code.",
                        Some(Self::menu_keyboard()),
                    )
                    .await
                    .best_effort("stale confirm repaint");
                return Err(e);
            }
        };

        // Merchant's prompt becomes the waiting surface; if it is gone,
        // a fresh message takes its place.
        let waiting_text = format!("Waiting for the payment of {amount}...");
        let merchant_msg = match self
            .transport
            .edit_message(user, surface, &waiting_text, None)
            .await
            .best_effort("merchant waiting repaint")
        {
            Some(()) => Some(surface),
            None => self
                .transport
                .send_message(user, &waiting_text, None)
                .await
                .best_effort("merchant waiting notice"),
        };

        if let Some(code_msg) = confirmed.surface {
            self.transport
                .edit_message(
                    confirmed.payer,
                    code_msg,
                    &format!("Invoice for {amount} on its way..."),
                    None,
                )
                .await
                .best_effort("payer code repaint");
        }

        let payload = CorrelationId::new();
        let invoice_msg = match self
            .provider
            .create_invoice(
                confirmed.payer,
                InvoiceSpec {
                    title: "Payment".to_string(),
                    description: format!("Payment of {amount}"),
                    payload,
                    amount,
                },
            )
            .await
        {
            Ok(msg) => msg,
            Err(e) => {
                // The session is already spent; the payer has to open a
                // fresh code. Say so instead of leaving both waiting.
                self.say(user, "Could not issue the invoice. Ask for a new code.")
                    .await;
                return Err(e.into());
            }
        };

        let mut invoice = PendingInvoice::new(user, confirmed.payer);
        invoice.merchant_msg = merchant_msg;
        invoice.payer_prompt_msg = confirmed.surface;
        invoice.invoice_msg = Some(invoice_msg);
        self.pending.register(payload, invoice);

        info!(
            merchant = user,
            payer = confirmed.payer,
            amount,
            %payload,
            "invoice issued"
        );
        Ok(payload)
    }

    // --- Shareable links ---

    fn mint_share_link(&self, user: UserId, amount: i64) -> Result<String, RelayError> {
        let link = ShareableLink::mint(user, amount, self.config.amount_ceiling)?;
        info!(merchant = user, amount, link = %link.link, "share link minted");
        Ok(link.start_param())
    }

    async fn claim_share_link(&self, user: UserId, param: &str) -> Result<(), RelayError> {
        let link = match ShareableLink::parse(param) {
            Ok(link) => link,
            Err(e) => {
                // A garbled deep link lands on the menu like a bare start.
                self.paint_menu(user, None).await?;
                return Err(e);
            }
        };

        if let Err(e) = self.check_amount(link.amount) {
            self.say(user, "This payment link carries an invalid amount.")
                .await;
            return Err(e);
        }
        if link.merchant == user {
            self.say(user, "You cannot pay your own invoice.").await;
            return Err(RelayError::SelfPayment);
        }
        if self.store.link_used(&link.link).await? {
            self.say(user, "This payment link was already used.").await;
            return Err(RelayError::LinkAlreadyUsed);
        }

        let payload = CorrelationId::new();
        let invoice_msg = self
            .provider
            .create_invoice(
                user,
                InvoiceSpec {
                    title: "Payment".to_string(),
                    description: format!("Payment of {}", link.amount),
                    payload,
                    amount: link.amount,
                },
            )
            .await?;

        // The merchant's waiting notice doubles as the surface the
        // settlement repaints; losing it only costs the in-place edit.
        let merchant_msg = self
            .transport
            .send_message(
                link.merchant,
                &format!("Invoice for {} sent. Waiting for the payment...", link.amount),
                None,
            )
            .await
            .best_effort("merchant link notice");

        let mut invoice = PendingInvoice::new(link.merchant, user);
        invoice.merchant_msg = merchant_msg;
        invoice.invoice_msg = Some(invoice_msg);
        invoice.link = Some(link.link.clone());
        self.pending.register(payload, invoice);

        info!(
            merchant = link.merchant,
            payer = user,
            amount = link.amount,
            link = %link.link,
            %payload,
            "share link claimed"
        );
        Ok(())
    }

    // --- Profile and requisites ---

    async fn profile_view(
        &self,
        user: UserId,
        surface: Option<MessageId>,
    ) -> Result<(), RelayError> {
        let balance = self.store.balance(user).await?;
        let converted = convert_payout(balance, self.config.conversion_rate);
        let requisites = self.store.requisites(user).await?;

        let mut text = format!("Balance: {balance} ({converted} after conversion)\n");
        if requisites.is_empty() {
            text.push_str("No payout requisites saved.");
        } else {
            text.push_str("Payout requisites:");
            for r in &requisites {
                text.push_str(&format!("\n- {}", r.summary()));
            }
        }

        let mut keyboard = Keyboard::new();
        for r in &requisites {
            keyboard = keyboard.row(vec![Button::callback(
                format!("Delete {}", r.summary()),
                delreq_data(r.id),
            )]);
        }
        keyboard = keyboard
            .row(vec![Button::callback("Withdraw", CB_WITHDRAW)])
            .row(vec![Button::callback("Menu", CB_MENU)]);

        if let Some(msg) = surface {
            let edited = self
                .transport
                .edit_message(user, msg, &text, Some(keyboard.clone()))
                .await
                .best_effort("profile repaint");
            if edited.is_some() {
                return Ok(());
            }
        }
        self.transport
            .send_message(user, &text, Some(keyboard))
            .await?;
        Ok(())
    }

    async fn add_requisite(
        &self,
        user: UserId,
        draft: RequisiteDraft,
    ) -> Result<RequisiteId, RelayError> {
        let (detail, bank_name) = match Self::validate_draft(&draft) {
            Ok(v) => v,
            Err(e) => {
                self.say(user, &format!("That requisite will not work: {e}"))
                    .await;
                return Err(e);
            }
        };

        let added = self
            .store
            .add_requisite(
                user,
                draft.kind,
                &detail,
                bank_name.as_deref(),
                self.config.requisite_cap,
            )
            .await?;

        match added {
            Some(requisite) => {
                self.say(user, &format!("Saved: {}", requisite.summary()))
                    .await;
                info!(user, requisite = requisite.id, kind = %draft.kind, "requisite added");
                Ok(requisite.id)
            }
            None => {
                self.say(
                    user,
                    &format!(
                        "You already have {} requisites. Delete one first.",
                        self.config.requisite_cap
                    ),
                )
                .await;
                Err(RelayError::RequisiteLimit)
            }
        }
    }

    async fn delete_requisite(&self, user: UserId, id: RequisiteId) -> Result<(), RelayError> {
        if self.store.delete_requisite(user, id).await? {
            self.say(user, "Requisite removed.").await;
            Ok(())
        } else {
            Err(RelayError::RequisiteNotFound)
        }
    }

    async fn request_withdrawal(
        &self,
        user: UserId,
        requisite: Option<RequisiteId>,
    ) -> Result<Withdrawal, RelayError> {
        match self.withdrawals.request(user, requisite).await {
            Ok(w) => Ok(w),
            Err(e @ RelayError::RequisiteNotFound) => {
                self.say(user, "Add a payout requisite in your profile first.")
                    .await;
                Err(e)
            }
            Err(e @ RelayError::BelowMinimum { minimum }) => {
                self.say(
                    user,
                    &format!("The minimum withdrawal is {minimum} after conversion."),
                )
                .await;
                Err(e)
            }
            Err(e @ RelayError::NothingToWithdraw) => {
                self.say(user, "Your balance is empty.").await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    // --- Shared helpers ---

    /// Best-effort one-liner to a chat. For notices that must not turn
    /// a completed state change into an error.
    async fn say(&self, user: UserId, text: &str) {
        self.transport
            .send_message(user, text, None)
            .await
            .best_effort("notice");
    }

    fn check_amount(&self, amount: i64) -> Result<(), RelayError> {
        if amount < 1 || amount > self.config.amount_ceiling {
            return Err(RelayError::InvalidAmount(amount));
        }
        Ok(())
    }

    /// Parse a typed `"<code> <amount>"` line.
    fn parse_entry(text: &str) -> Result<(String, i64), RelayError> {
        let malformed = || RelayError::MalformedEntry(text.to_string());
        let mut parts = text.split_whitespace();
        let code = parts.next().ok_or_else(malformed)?;
        let amount = parts.next().ok_or_else(malformed)?;
        if parts.next().is_some() || code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(malformed());
        }
        let amount: i64 = amount.parse().map_err(|_| malformed())?;
        Ok((code.to_string(), amount))
    }

    /// Validate and normalize a requisite draft. Returns the stored
    /// detail plus the bank name for bank transfers.
    fn validate_draft(draft: &RequisiteDraft) -> Result<(String, Option<String>), RelayError> {
        match draft.kind {
            RequisiteKind::BankTransfer => {
                let phone = normalize_phone(&draft.detail)?;
                let bank = draft
                    .bank_name
                    .as_deref()
                    .map(str::trim)
                    .filter(|b| !b.is_empty())
                    .ok_or_else(|| {
                        RelayError::InvalidRequisite("bank name is required".to_string())
                    })?;
                Ok((phone, Some(bank.to_string())))
            }
            RequisiteKind::Card => Ok((normalize_card(&draft.detail)?, None)),
        }
    }
}

/// Normalize a phone number to `+7...` digits form. Accepts local
/// `8`-prefixed and bare ten-digit numbers; anything with fewer than
/// ten digits is rejected.
fn normalize_phone(raw: &str) -> Result<String, RelayError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 10 {
        return Err(RelayError::InvalidRequisite(format!(
            "phone number too short: {raw}"
        )));
    }
    let digits = if digits.len() == 10 {
        format!("7{digits}")
    } else if digits.len() == 11 && digits.starts_with('8') {
        format!("7{}", &digits[1..])
    } else {
        digits
    };
    Ok(format!("+{digits}"))
}

/// Normalize a card number: strip separators, demand at least 13 digits.
fn normalize_card(raw: &str) -> Result<String, RelayError> {
    let digits: String = raw.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();
    if digits.len() < 13 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(RelayError::InvalidRequisite(format!(
            "card number must be at least 13 digits: {raw}"
        )));
    }
    Ok(digits)
}
