//! End-to-end relay flows over the in-memory store: pairing-code
//! payments, shareable links and the operator withdrawal machine,
//! driven the way the platform glue drives them (callback payloads
//! parsed back into events, rail events fed to the settlement seam).

use std::sync::Arc;

use paylink::config::RelayConfig;
use paylink::events::{CB_MENU, CB_OPEN_PAIRING, ChatEvent, RequisiteDraft, close_data, regen_data};
use paylink::provider::MockProvider;
use paylink::transport::{Outbound, RecordingTransport};
use paylink::{
    CorrelationId, Keyboard, MemoryStore, PreCheckoutRequest, RelayError, RelayService,
    RelayStore, RequisiteKind, SettlementNotice, WithdrawalStatus,
};

const PAYER: i64 = 10;
const MERCHANT: i64 = 20;
const OTHER: i64 = 30;
const OPERATOR: i64 = 999;

struct Harness {
    relay: RelayService,
    store: Arc<MemoryStore>,
    transport: Arc<RecordingTransport>,
    provider: Arc<MockProvider>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(RecordingTransport::new());
    let provider = Arc::new(MockProvider::new());
    let relay = RelayService::new(
        RelayConfig {
            operator_chat: OPERATOR,
            ..RelayConfig::default()
        },
        store.clone() as Arc<dyn RelayStore>,
        transport.clone(),
        provider.clone(),
    );
    Harness {
        relay,
        store,
        transport,
        provider,
    }
}

/// Newest surface in `chat` that carries a keyboard: the message id a
/// button tap would report, plus the keyboard itself.
fn latest_surface(transport: &RecordingTransport, chat: i64) -> (i64, Keyboard) {
    transport
        .outbox()
        .into_iter()
        .rev()
        .find_map(|o| match o {
            Outbound::Sent {
                chat: c,
                message,
                keyboard: Some(kb),
                ..
            }
            | Outbound::Edited {
                chat: c,
                message,
                keyboard: Some(kb),
                ..
            } if c == chat => Some((message, kb)),
            _ => None,
        })
        .expect("no keyboard painted")
}

/// Simulate a button tap: parse the callback payload exactly as the
/// platform glue does, then dispatch the resulting event.
async fn tap(
    relay: &RelayService,
    user: i64,
    data: &str,
    surface: i64,
) -> Result<serde_json::Value, RelayError> {
    let event = ChatEvent::parse_callback(user, data, surface)
        .unwrap_or_else(|| panic!("unroutable callback: {data}"));
    relay.dispatch(event).await
}

#[tokio::test]
async fn pairing_payment_end_to_end() {
    let h = harness();

    // Payer starts and taps "Get a payment code" on the menu.
    h.relay
        .dispatch(ChatEvent::Start {
            user: PAYER,
            deep_link: None,
        })
        .await
        .unwrap();
    let (menu_msg, menu) = latest_surface(&h.transport, PAYER);
    assert!(menu.callback_data().contains(&CB_OPEN_PAIRING));

    let answer = tap(&h.relay, PAYER, CB_OPEN_PAIRING, menu_msg).await.unwrap();
    let code = answer["code"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 4);
    assert!(code.chars().all(|c| c.is_ascii_digit()));

    // Merchant types the code with an amount and gets a confirm prompt.
    h.relay
        .dispatch(ChatEvent::MerchantEntry {
            user: MERCHANT,
            text: format!("{code} 250"),
        })
        .await
        .unwrap();
    let (prompt_msg, prompt) = latest_surface(&h.transport, MERCHANT);
    let confirm = prompt
        .callback_data()
        .into_iter()
        .find(|d| d.starts_with("confirm_"))
        .expect("confirm button")
        .to_string();
    assert_eq!(confirm, format!("confirm_{code}_250"));

    let answer = tap(&h.relay, MERCHANT, &confirm, prompt_msg).await.unwrap();
    let payload: CorrelationId = answer["payload"].as_str().unwrap().parse().unwrap();

    // The invoice went to the payer, not the merchant.
    let issued = h.provider.issued();
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0].0, PAYER);
    assert_eq!(issued[0].1.amount, 250);
    assert_eq!(issued[0].1.payload, payload);

    // The rail probes, debits, settles.
    h.relay
        .pre_checkout(PreCheckoutRequest { payload })
        .await
        .unwrap();
    let balance = h
        .relay
        .settle(SettlementNotice {
            payload,
            amount: 250,
        })
        .await
        .unwrap();
    assert_eq!(balance, 250);
    assert_eq!(h.store.balance(MERCHANT).await.unwrap(), 250);

    // Both sides hear about it: the payer gets a fresh notice, the
    // merchant's waiting prompt is repainted in place.
    assert!(
        h.transport
            .sent_texts(PAYER)
            .iter()
            .any(|t| t == "Payment of 250 sent")
    );
    let merchant_edit = h
        .transport
        .outbox()
        .into_iter()
        .rev()
        .find_map(|o| match o {
            Outbound::Edited {
                chat: MERCHANT,
                text,
                ..
            } => Some(text),
            _ => None,
        });
    assert_eq!(merchant_edit.as_deref(), Some("Payment received: +250"));

    // The rail redelivers; the credit must not land twice.
    let replay = h
        .relay
        .settle(SettlementNotice {
            payload,
            amount: 250,
        })
        .await;
    assert!(matches!(replay, Err(RelayError::UnknownTransaction)));
    assert_eq!(h.store.balance(MERCHANT).await.unwrap(), 250);

    // The confirm spent the code; a second merchant finds nothing.
    let stale = h
        .relay
        .dispatch(ChatEvent::MerchantEntry {
            user: OTHER,
            text: format!("{code} 50"),
        })
        .await;
    assert!(matches!(stale, Err(RelayError::SessionNotFound)));
}

#[tokio::test]
async fn code_surface_buttons_swap_and_close() {
    let h = harness();
    let answer = h
        .relay
        .dispatch(ChatEvent::OpenPairing { user: PAYER })
        .await
        .unwrap();
    let first = answer["code"].as_str().unwrap().to_string();

    let (surface, kb) = latest_surface(&h.transport, PAYER);
    assert!(kb.callback_data().contains(&regen_data(&first).as_str()));

    // "New code" swaps the code on the same surface.
    let answer = tap(&h.relay, PAYER, &regen_data(&first), surface).await.unwrap();
    let second = answer["code"].as_str().unwrap().to_string();
    assert_ne!(second, first);

    let stale = h
        .relay
        .dispatch(ChatEvent::MerchantEntry {
            user: MERCHANT,
            text: format!("{first} 50"),
        })
        .await;
    assert!(matches!(stale, Err(RelayError::SessionNotFound)));

    // "Close" tears the session down and paints the menu back.
    tap(&h.relay, PAYER, &close_data(&second), surface).await.unwrap();
    let closed = h
        .relay
        .dispatch(ChatEvent::MerchantEntry {
            user: MERCHANT,
            text: format!("{second} 50"),
        })
        .await;
    assert!(matches!(closed, Err(RelayError::SessionNotFound)));

    let (_, menu) = latest_surface(&h.transport, PAYER);
    assert!(menu.callback_data().contains(&CB_OPEN_PAIRING));
}

#[tokio::test]
async fn menu_return_abandons_the_open_code() {
    let h = harness();
    let answer = h
        .relay
        .dispatch(ChatEvent::OpenPairing { user: PAYER })
        .await
        .unwrap();
    let code = answer["code"].as_str().unwrap().to_string();

    // The payer taps "Menu" on the code surface instead of closing it.
    let (surface, kb) = latest_surface(&h.transport, PAYER);
    assert!(kb.callback_data().contains(&CB_MENU));
    tap(&h.relay, PAYER, CB_MENU, surface).await.unwrap();

    // The abandoned code is gone; a merchant can no longer bill it.
    let stale = h
        .relay
        .dispatch(ChatEvent::MerchantEntry {
            user: MERCHANT,
            text: format!("{code} 50"),
        })
        .await;
    assert!(matches!(stale, Err(RelayError::SessionNotFound)));

    let (_, menu) = latest_surface(&h.transport, PAYER);
    assert!(menu.callback_data().contains(&CB_OPEN_PAIRING));
}

#[tokio::test]
async fn withdrawal_reviewed_through_operator_buttons() {
    let h = harness();

    // A settled balance of 500 and a saved destination.
    h.store.credit(MERCHANT, 500).await.unwrap();
    h.relay
        .dispatch(ChatEvent::AddRequisite {
            user: MERCHANT,
            draft: RequisiteDraft {
                kind: RequisiteKind::BankTransfer,
                detail: "8 (999) 123-45-67".into(),
                bank_name: Some("Alfa".into()),
            },
        })
        .await
        .unwrap();

    let answer = h
        .relay
        .dispatch(ChatEvent::RequestWithdrawal {
            user: MERCHANT,
            requisite: None,
        })
        .await
        .unwrap();
    let id = answer["withdrawal_id"].as_i64().unwrap();
    assert_eq!(answer["status"], "wait");

    // 500 rail units at the default 1.8 rate pay out 900, and the
    // balance is zeroed in the same stroke.
    let row = h.store.withdrawal(id).await.unwrap().unwrap();
    assert_eq!(row.amount, 500);
    assert_eq!(row.payout_amount, 900);
    assert_eq!(row.destination, "+79991234567 (Alfa)");
    assert_eq!(h.store.balance(MERCHANT).await.unwrap(), 0);

    // The operator's notice offers every forward status.
    let (control, kb) = latest_surface(&h.transport, OPERATOR);
    assert_eq!(
        kb.callback_data(),
        vec![
            format!("setstat_review_{id}"),
            format!("setstat_soon_{id}"),
            format!("setstat_done_{id}"),
        ]
    );

    let answer = tap(&h.relay, OPERATOR, &format!("setstat_review_{id}"), control)
        .await
        .unwrap();
    assert_eq!(answer["status"], "review");

    // A non-operator pressing the same button is turned away.
    let forged = tap(&h.relay, MERCHANT, &format!("setstat_soon_{id}"), control).await;
    assert!(matches!(forged, Err(RelayError::NotOperator)));

    let answer = tap(&h.relay, OPERATOR, &format!("setstat_done_{id}"), control)
        .await
        .unwrap();
    assert_eq!(answer["status"], "done");

    // Done is terminal; there is no way back.
    let backward = tap(&h.relay, OPERATOR, &format!("setstat_review_{id}"), control).await;
    assert!(matches!(backward, Err(RelayError::InvalidTransition(_))));
    assert_eq!(
        h.store.withdrawal(id).await.unwrap().unwrap().status,
        WithdrawalStatus::Done
    );
}

#[tokio::test]
async fn share_link_settles_once_and_only_for_others() {
    let h = harness();

    let answer = h
        .relay
        .dispatch(ChatEvent::MintShareLink {
            user: MERCHANT,
            amount: 50,
        })
        .await
        .unwrap();
    let param = answer["start_param"].as_str().unwrap().to_string();
    assert!(param.starts_with(&format!("inline_pay_50_{MERCHANT}_")));

    // The merchant cannot claim their own link.
    let own = h
        .relay
        .dispatch(ChatEvent::Start {
            user: MERCHANT,
            deep_link: Some(param.clone()),
        })
        .await;
    assert!(matches!(own, Err(RelayError::SelfPayment)));
    assert_eq!(h.provider.issued_count(), 0);

    // A payer claims it and the rail settles.
    h.relay
        .dispatch(ChatEvent::Start {
            user: PAYER,
            deep_link: Some(param.clone()),
        })
        .await
        .unwrap();
    let (chat, spec) = h.provider.issued().pop().unwrap();
    assert_eq!(chat, PAYER);
    assert_eq!(spec.amount, 50);

    // The merchant hears the invoice went out.
    let notice = h
        .transport
        .outbox()
        .into_iter()
        .rev()
        .find_map(|o| match o {
            Outbound::Sent {
                chat: MERCHANT,
                message,
                text,
                ..
            } => Some((message, text)),
            _ => None,
        })
        .expect("merchant waiting notice");
    assert!(notice.1.contains("Waiting for the payment"));

    h.relay
        .pre_checkout(PreCheckoutRequest {
            payload: spec.payload,
        })
        .await
        .unwrap();
    let balance = h
        .relay
        .settle(SettlementNotice {
            payload: spec.payload,
            amount: 50,
        })
        .await
        .unwrap();
    assert_eq!(balance, 50);

    // The settlement repaints that same notice in place.
    let edited = h
        .transport
        .outbox()
        .into_iter()
        .rev()
        .find_map(|o| match o {
            Outbound::Edited {
                chat: MERCHANT,
                message,
                text,
                ..
            } => Some((message, text)),
            _ => None,
        })
        .expect("merchant settle edit");
    assert_eq!(edited.0, notice.0);
    assert_eq!(edited.1, "Payment received: +50");

    // The settled link is dead for any later claimant.
    let second = h
        .relay
        .dispatch(ChatEvent::Start {
            user: OTHER,
            deep_link: Some(param),
        })
        .await;
    assert!(matches!(second, Err(RelayError::LinkAlreadyUsed)));
    assert_eq!(h.provider.issued_count(), 1);
    assert_eq!(h.store.balance(MERCHANT).await.unwrap(), 50);
}

#[tokio::test]
async fn racing_link_claims_blocked_before_debit() {
    let h = harness();
    let answer = h
        .relay
        .dispatch(ChatEvent::MintShareLink {
            user: MERCHANT,
            amount: 50,
        })
        .await
        .unwrap();
    let param = answer["start_param"].as_str().unwrap().to_string();

    // Two payers claim before either settles; the link is still
    // unmarked, so both invoices go out.
    h.relay
        .dispatch(ChatEvent::Start {
            user: PAYER,
            deep_link: Some(param.clone()),
        })
        .await
        .unwrap();
    h.relay
        .dispatch(ChatEvent::Start {
            user: OTHER,
            deep_link: Some(param),
        })
        .await
        .unwrap();
    let issued = h.provider.issued();
    assert_eq!(issued.len(), 2);

    // The first settlement marks the link.
    h.relay
        .settle(SettlementNotice {
            payload: issued[0].1.payload,
            amount: 50,
        })
        .await
        .unwrap();

    // The second payment is stopped at the pre-checkout gate, before
    // any money moves.
    let gated = h
        .relay
        .pre_checkout(PreCheckoutRequest {
            payload: issued[1].1.payload,
        })
        .await;
    assert!(matches!(gated, Err(RelayError::LinkAlreadyUsed)));
    assert_eq!(h.store.balance(MERCHANT).await.unwrap(), 50);
}
