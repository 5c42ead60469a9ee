use std::fmt::Debug;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::core_types::{ChatId, MessageId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The chat or message no longer exists. Tolerated on cleanup paths.
    #[error("Chat or message not found")]
    NotFound,
    #[error("Send failed: {0}")]
    Send(String),
}

/// One button on an inline keyboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: ButtonAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    /// Round-trips back as a callback event with this payload.
    Callback(String),
    /// Opens a link (share flows).
    Url(String),
}

impl Button {
    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Callback(data.into()),
        }
    }

    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Url(url.into()),
        }
    }
}

/// Inline keyboard attached to an outbound message, row-major.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(mut self, buttons: Vec<Button>) -> Self {
        self.rows.push(buttons);
        self
    }

    /// Every callback payload on the keyboard, row-major. Test helper
    /// for asserting which actions a surface offers.
    pub fn callback_data(&self) -> Vec<&str> {
        self.rows
            .iter()
            .flatten()
            .filter_map(|b| match &b.action {
                ButtonAction::Callback(data) => Some(data.as_str()),
                ButtonAction::Url(_) => None,
            })
            .collect()
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync + Debug {
    /// Send a message, returning the platform-assigned message id.
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageId, TransportError>;

    /// Replace the text and keyboard of an existing message in place.
    async fn edit_message(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError>;

    /// Remove a message from the chat.
    async fn delete_message(&self, chat: ChatId, message: MessageId)
    -> Result<(), TransportError>;
}

/// Downgrade a transport failure on a cosmetic path to a log line.
///
/// Critical sends keep `?`; cleanup and notification sends go through
/// `best_effort`, which swallows [`TransportError::NotFound`] silently
/// (the message was already gone) and logs anything else at WARN.
pub trait BestEffort<T> {
    fn best_effort(self, context: &str) -> Option<T>;
}

impl<T> BestEffort<T> for Result<T, TransportError> {
    fn best_effort(self, context: &str) -> Option<T> {
        match self {
            Ok(v) => Some(v),
            Err(TransportError::NotFound) => None,
            Err(e) => {
                warn!(error = %e, context, "best-effort transport call failed");
                None
            }
        }
    }
}

/// One outbound transport call, as recorded by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Sent {
        chat: ChatId,
        message: MessageId,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Edited {
        chat: ChatId,
        message: MessageId,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Deleted {
        chat: ChatId,
        message: MessageId,
    },
}

/// Mock transport for tests and `mock-api` runs.
///
/// Records every call in order and hands out sequential message ids.
/// Each operation kind can be primed to fail.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    outbox: Mutex<Vec<Outbound>>,
    next_message_id: AtomicI64,
    fail_sends: AtomicBool,
    fail_edits: AtomicBool,
    fail_deletes: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_sends(&self, on: bool) {
        self.fail_sends.store(on, Ordering::SeqCst);
    }

    pub fn fail_edits(&self, on: bool) {
        self.fail_edits.store(on, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, on: bool) {
        self.fail_deletes.store(on, Ordering::SeqCst);
    }

    /// Snapshot of every recorded call, in call order.
    pub fn outbox(&self) -> Vec<Outbound> {
        self.outbox.lock().unwrap().clone()
    }

    /// Texts of messages sent to `chat`, in call order.
    pub fn sent_texts(&self, chat: ChatId) -> Vec<String> {
        self.outbox
            .lock()
            .unwrap()
            .iter()
            .filter_map(|o| match o {
                Outbound::Sent { chat: c, text, .. } if *c == chat => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageId, TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("primed to fail".into()));
        }
        let message = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.outbox.lock().unwrap().push(Outbound::Sent {
            chat,
            message,
            text: text.to_string(),
            keyboard,
        });
        Ok(message)
    }

    async fn edit_message(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError> {
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err(TransportError::Send("primed to fail".into()));
        }
        self.outbox.lock().unwrap().push(Outbound::Edited {
            chat,
            message,
            text: text.to_string(),
            keyboard,
        });
        Ok(())
    }

    async fn delete_message(
        &self,
        chat: ChatId,
        message: MessageId,
    ) -> Result<(), TransportError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(TransportError::NotFound);
        }
        self.outbox
            .lock()
            .unwrap()
            .push(Outbound::Deleted { chat, message });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_effort_passes_through_success() {
        let ok: Result<i64, TransportError> = Ok(7);
        assert_eq!(ok.best_effort("test"), Some(7));
    }

    #[test]
    fn best_effort_swallows_not_found() {
        let gone: Result<(), TransportError> = Err(TransportError::NotFound);
        assert_eq!(gone.best_effort("test"), None);
    }

    #[test]
    fn best_effort_swallows_send_failure() {
        let down: Result<(), TransportError> = Err(TransportError::Send("down".into()));
        assert_eq!(down.best_effort("test"), None);
    }

    #[test]
    fn keyboard_collects_callback_data() {
        let kb = Keyboard::new()
            .row(vec![Button::callback("Confirm", "confirm_1234_50")])
            .row(vec![
                Button::callback("Cancel", "cancel"),
                Button::url("Share", "https://example.test"),
            ]);
        assert_eq!(kb.callback_data(), vec!["confirm_1234_50", "cancel"]);
    }

    #[tokio::test]
    async fn recording_transport_allocates_sequential_ids() {
        let t = RecordingTransport::new();
        let a = t.send_message(1, "one", None).await.unwrap();
        let b = t.send_message(1, "two", None).await.unwrap();
        assert!(b > a);
        assert_eq!(t.sent_texts(1), vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn recording_transport_primed_failures() {
        let t = RecordingTransport::new();
        t.fail_edits(true);
        let err = t.edit_message(1, 1, "x", None).await.unwrap_err();
        assert!(matches!(err, TransportError::Send(_)));
        // Sends still work while edits are primed.
        assert!(t.send_message(1, "fresh", None).await.is_ok());
    }
}
