//! In-memory store for tests and `mock-api` runs.
//!
//! Mirrors the Postgres semantics exactly; each method takes the one
//! table lock, so atomicity falls out for free.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::core_types::{LinkId, MessageId, RequisiteId, UserId, WithdrawalId};
use crate::withdrawal::WithdrawalStatus;

use super::{RelayStore, Requisite, RequisiteKind, StoreError, Withdrawal, convert_payout};

#[derive(Debug, Default)]
struct Inner {
    balances: FxHashMap<UserId, i64>,
    requisites: Vec<Requisite>,
    next_requisite_id: RequisiteId,
    withdrawals: FxHashMap<WithdrawalId, Withdrawal>,
    next_withdrawal_id: WithdrawalId,
    used_links: FxHashSet<LinkId>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelayStore for MemoryStore {
    async fn health(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn ensure_user(&self, user: UserId) -> Result<(), StoreError> {
        self.inner.lock().unwrap().balances.entry(user).or_insert(0);
        Ok(())
    }

    async fn credit(&self, user: UserId, amount: i64) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let balance = inner.balances.entry(user).or_insert(0);
        *balance += amount;
        Ok(*balance)
    }

    async fn balance(&self, user: UserId) -> Result<i64, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .balances
            .get(&user)
            .copied()
            .unwrap_or(0))
    }

    async fn add_requisite(
        &self,
        user: UserId,
        kind: RequisiteKind,
        detail: &str,
        bank_name: Option<&str>,
        cap: i64,
    ) -> Result<Option<Requisite>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let held = inner.requisites.iter().filter(|r| r.user == user).count() as i64;
        if held >= cap {
            return Ok(None);
        }
        inner.next_requisite_id += 1;
        let requisite = Requisite {
            id: inner.next_requisite_id,
            user,
            kind,
            detail: detail.to_string(),
            bank_name: bank_name.map(str::to_string),
            created_at: Utc::now(),
        };
        inner.requisites.push(requisite.clone());
        Ok(Some(requisite))
    }

    async fn delete_requisite(&self, user: UserId, id: RequisiteId) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.requisites.len();
        inner.requisites.retain(|r| !(r.id == id && r.user == user));
        Ok(inner.requisites.len() < before)
    }

    async fn requisites(&self, user: UserId) -> Result<Vec<Requisite>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .requisites
            .iter()
            .rev()
            .filter(|r| r.user == user)
            .cloned()
            .collect())
    }

    async fn requisite(
        &self,
        user: UserId,
        id: RequisiteId,
    ) -> Result<Option<Requisite>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .requisites
            .iter()
            .find(|r| r.id == id && r.user == user)
            .cloned())
    }

    async fn open_withdrawal(
        &self,
        user: UserId,
        destination: &str,
        rate: Decimal,
    ) -> Result<Option<Withdrawal>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let balance = inner.balances.get(&user).copied().unwrap_or(0);
        if balance <= 0 {
            return Ok(None);
        }
        inner.balances.insert(user, 0);
        inner.next_withdrawal_id += 1;
        let now = Utc::now();
        let withdrawal = Withdrawal {
            id: inner.next_withdrawal_id,
            user,
            amount: balance,
            payout_amount: convert_payout(balance, rate),
            destination: destination.to_string(),
            surface: None,
            status: WithdrawalStatus::Wait,
            created_at: now,
            updated_at: now,
        };
        inner.withdrawals.insert(withdrawal.id, withdrawal.clone());
        Ok(Some(withdrawal))
    }

    async fn set_withdrawal_surface(
        &self,
        id: WithdrawalId,
        message: MessageId,
    ) -> Result<(), StoreError> {
        if let Some(w) = self.inner.lock().unwrap().withdrawals.get_mut(&id) {
            w.surface = Some(message);
        }
        Ok(())
    }

    async fn withdrawal(&self, id: WithdrawalId) -> Result<Option<Withdrawal>, StoreError> {
        Ok(self.inner.lock().unwrap().withdrawals.get(&id).cloned())
    }

    async fn set_withdrawal_status(
        &self,
        id: WithdrawalId,
        expected: WithdrawalStatus,
        target: WithdrawalStatus,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.withdrawals.get_mut(&id) {
            Some(w) if w.status == expected => {
                w.status = target;
                w.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn link_used(&self, link: &LinkId) -> Result<bool, StoreError> {
        Ok(self.inner.lock().unwrap().used_links.contains(link))
    }

    async fn mark_link_used(&self, link: &LinkId) -> Result<bool, StoreError> {
        Ok(self.inner.lock().unwrap().used_links.insert(link.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::sync::Arc;

    fn rate() -> Decimal {
        Decimal::from_str("1.8").unwrap()
    }

    #[tokio::test]
    async fn credit_accumulates() {
        let store = MemoryStore::new();
        store.ensure_user(1).await.unwrap();
        assert_eq!(store.credit(1, 100).await.unwrap(), 100);
        assert_eq!(store.credit(1, 150).await.unwrap(), 250);
        assert_eq!(store.balance(1).await.unwrap(), 250);
        assert_eq!(store.balance(999).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn requisite_cap_is_enforced() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let added = store
                .add_requisite(1, RequisiteKind::Card, &format!("411111111111111{i}"), None, 5)
                .await
                .unwrap();
            assert!(added.is_some());
        }
        let sixth = store
            .add_requisite(1, RequisiteKind::Card, "4222222222222222", None, 5)
            .await
            .unwrap();
        assert!(sixth.is_none());
        // Other users are unaffected by this user's cap.
        assert!(
            store
                .add_requisite(2, RequisiteKind::Card, "4333333333333333", None, 5)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn requisites_come_newest_first() {
        let store = MemoryStore::new();
        store
            .add_requisite(1, RequisiteKind::Card, "first", None, 5)
            .await
            .unwrap();
        store
            .add_requisite(1, RequisiteKind::Card, "second", None, 5)
            .await
            .unwrap();
        let list = store.requisites(1).await.unwrap();
        assert_eq!(list[0].detail, "second");
        assert_eq!(list[1].detail, "first");
    }

    #[tokio::test]
    async fn delete_requisite_is_owner_scoped() {
        let store = MemoryStore::new();
        let req = store
            .add_requisite(1, RequisiteKind::Card, "4111111111111111", None, 5)
            .await
            .unwrap()
            .unwrap();
        assert!(!store.delete_requisite(2, req.id).await.unwrap());
        assert!(store.delete_requisite(1, req.id).await.unwrap());
        assert!(store.requisite(1, req.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_withdrawal_zeroes_and_records_atomically() {
        let store = MemoryStore::new();
        store.credit(1, 500).await.unwrap();
        let w = store
            .open_withdrawal(1, "+79991234567 (Alfa)", rate())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(w.amount, 500);
        assert_eq!(w.payout_amount, 900);
        assert_eq!(w.status, WithdrawalStatus::Wait);
        assert_eq!(store.balance(1).await.unwrap(), 0);
        // A second request sees the zeroed balance and records nothing.
        assert!(store.open_withdrawal(1, "x", rate()).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_withdrawals_admit_one_opener() {
        let store = Arc::new(MemoryStore::new());
        store.credit(1, 500).await.unwrap();

        let mut claims = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            claims.push(tokio::spawn(async move {
                store.open_withdrawal(1, "x", rate()).await.unwrap()
            }));
        }
        let mut opened = Vec::new();
        for claim in claims {
            if let Some(w) = claim.await.unwrap() {
                opened.push(w);
            }
        }

        // One request wins the whole balance; the rest see zero.
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].amount, 500);
        assert_eq!(opened[0].status, WithdrawalStatus::Wait);
        assert_eq!(store.balance(1).await.unwrap(), 0);
        // And exactly one row was recorded.
        assert_eq!(opened[0].id, 1);
        assert!(store.withdrawal(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_cas_rejects_stale_writers() {
        let store = MemoryStore::new();
        store.credit(1, 100).await.unwrap();
        let w = store.open_withdrawal(1, "x", rate()).await.unwrap().unwrap();
        assert!(
            store
                .set_withdrawal_status(w.id, WithdrawalStatus::Wait, WithdrawalStatus::Review)
                .await
                .unwrap()
        );
        // Stale expectation: the row moved on already.
        assert!(
            !store
                .set_withdrawal_status(w.id, WithdrawalStatus::Wait, WithdrawalStatus::Soon)
                .await
                .unwrap()
        );
        assert_eq!(
            store.withdrawal(w.id).await.unwrap().unwrap().status,
            WithdrawalStatus::Review
        );
        // Missing rows report false, not an error.
        assert!(
            !store
                .set_withdrawal_status(999, WithdrawalStatus::Wait, WithdrawalStatus::Review)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn link_marking_is_idempotent() {
        let store = MemoryStore::new();
        let link = LinkId::new();
        assert!(!store.link_used(&link).await.unwrap());
        assert!(store.mark_link_used(&link).await.unwrap());
        assert!(!store.mark_link_used(&link).await.unwrap());
        assert!(store.link_used(&link).await.unwrap());
    }
}
