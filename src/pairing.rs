//! Pairing Sessions
//!
//! A payer opens a session and gets a short numeric code; a merchant who
//! hears the code out of band uses it to address an invoice back to the
//! payer. The table is the single authority on which codes are live, and
//! every operation is atomic under one lock so no caller can observe or
//! race a half-applied state.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use rustc_hash::FxHashMap;

use crate::core_types::{MessageId, UserId};
use crate::error::RelayError;

/// Random draws before falling back to a linear scan of the code space.
const MINT_ATTEMPTS: u32 = 100;

#[derive(Debug, Clone)]
struct PairingSession {
    payer: UserId,
    /// Flipped to false by the one confirm that wins.
    active: bool,
    /// Message in the payer's chat showing the code, once sent.
    surface: Option<MessageId>,
    opened_at: Instant,
}

impl PairingSession {
    fn new(payer: UserId) -> Self {
        Self {
            payer,
            active: true,
            surface: None,
            opened_at: Instant::now(),
        }
    }
}

/// Outcome of a confirmed pairing: who pays, and where their code
/// message lives so it can be repainted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedPairing {
    pub payer: UserId,
    pub surface: Option<MessageId>,
}

/// Live pairing sessions keyed by code.
///
/// Codes are fixed-length decimal strings, each digit drawn on its own
/// (leading zeros included), unique among *active* sessions; an inactive
/// leftover under the same code is simply replaced. At full capacity
/// (every code active) the oldest session is recycled rather than
/// spinning.
#[derive(Debug)]
pub struct SessionTable {
    sessions: Mutex<FxHashMap<String, PairingSession>>,
    code_length: usize,
}

impl SessionTable {
    /// `code_length` is the number of decimal digits, 1..=9.
    pub fn new(code_length: u32) -> Self {
        debug_assert!((1..=9).contains(&code_length));
        Self {
            sessions: Mutex::new(FxHashMap::default()),
            code_length: code_length as usize,
        }
    }

    /// Open a session for `payer` and return its code.
    pub fn open(&self, payer: UserId) -> String {
        let mut table = self.sessions.lock().unwrap();
        let mut rng = rand::thread_rng();
        for _ in 0..MINT_ATTEMPTS {
            let code = self.mint(&mut rng);
            if !Self::held_active(&table, &code) {
                table.insert(code.clone(), PairingSession::new(payer));
                return code;
            }
        }
        // Random minting keeps colliding. Claim the first code not held
        // by an active session.
        for n in 0..10u32.pow(self.code_length as u32) {
            let code = format!("{n:0width$}", width = self.code_length);
            if !Self::held_active(&table, &code) {
                table.insert(code.clone(), PairingSession::new(payer));
                return code;
            }
        }
        // Every code in the space is active. Recycle the oldest session.
        let oldest = table
            .iter()
            .min_by_key(|(_, s)| s.opened_at)
            .map(|(c, _)| c.clone());
        if let Some(code) = oldest {
            table.insert(code.clone(), PairingSession::new(payer));
            return code;
        }
        // Table was empty, so any code is free.
        let code = "0".repeat(self.code_length);
        table.insert(code.clone(), PairingSession::new(payer));
        code
    }

    /// Digits are drawn independently, so `0042` is as likely as `4821`.
    fn mint(&self, rng: &mut impl Rng) -> String {
        (0..self.code_length)
            .map(|_| char::from(rng.gen_range(b'0'..=b'9')))
            .collect()
    }

    fn held_active(table: &FxHashMap<String, PairingSession>, code: &str) -> bool {
        table.get(code).is_some_and(|s| s.active)
    }

    /// Record the chat message that displays the code. Called after the
    /// send returns; a session closed in between is a no-op.
    pub fn set_surface(&self, code: &str, message: MessageId) {
        let mut table = self.sessions.lock().unwrap();
        if let Some(session) = table.get_mut(code) {
            session.surface = Some(message);
        }
    }

    /// Remove the session unconditionally. Idempotent.
    pub fn close(&self, code: &str) {
        self.sessions.lock().unwrap().remove(code);
    }

    /// Remove every session owned by `payer`, active or spent. Returns
    /// the closed codes. Backs the menu-return path, where the caller
    /// carries no code.
    pub fn close_by_payer(&self, payer: UserId) -> Vec<String> {
        let mut table = self.sessions.lock().unwrap();
        let mut closed = Vec::new();
        table.retain(|code, s| {
            if s.payer == payer {
                closed.push(code.clone());
                return false;
            }
            true
        });
        closed
    }

    /// Look up the payer behind an active code. Read-only.
    pub fn propose(&self, code: &str) -> Result<UserId, RelayError> {
        let table = self.sessions.lock().unwrap();
        match table.get(code) {
            Some(s) if s.active => Ok(s.payer),
            _ => Err(RelayError::SessionNotFound),
        }
    }

    /// Claim an active session for invoice issuance. The check and the
    /// flip happen under one lock, so exactly one of any number of
    /// concurrent confirms wins.
    pub fn confirm(&self, code: &str) -> Result<ConfirmedPairing, RelayError> {
        let mut table = self.sessions.lock().unwrap();
        match table.get_mut(code) {
            Some(s) if s.active => {
                s.active = false;
                Ok(ConfirmedPairing {
                    payer: s.payer,
                    surface: s.surface,
                })
            }
            _ => Err(RelayError::SessionGone),
        }
    }

    /// Drop sessions older than `ttl`, active or not. Returns how many
    /// were removed. Never called unless a TTL is configured.
    pub fn sweep_expired(&self, ttl: Duration) -> usize {
        let mut table = self.sessions.lock().unwrap();
        let before = table.len();
        table.retain(|_, s| s.opened_at.elapsed() < ttl);
        before - table.len()
    }

    /// Codes with an active session, unordered.
    pub fn active_codes(&self) -> Vec<String> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| s.active)
            .map(|(c, _)| c.clone())
            .collect()
    }
}
