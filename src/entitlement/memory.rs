use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use axum::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::gate::{self, EntitlementState, TierLimit};
use super::store::EntitlementStore;

/// In-memory quota store used by tests and `AppState::fake()`. The
/// mutex gives the same per-user read-modify-write serialization the
/// Postgres backend gets from its transaction.
pub struct InMemoryEntitlementStore {
    default_limit: TierLimit,
    inner: Mutex<HashMap<Uuid, EntitlementState>>,
}

impl InMemoryEntitlementStore {
    pub fn new(default_limit: TierLimit) -> Self {
        Self {
            default_limit,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Preload a user's state, bypassing first-use initialization.
    pub fn seed(&self, user_id: Uuid, state: EntitlementState) {
        self.lock().insert(user_id, state);
    }

    pub fn get(&self, user_id: Uuid) -> Option<EntitlementState> {
        self.lock().get(&user_id).copied()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, EntitlementState>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl EntitlementStore for InMemoryEntitlementStore {
    async fn load_or_init(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> anyhow::Result<EntitlementState> {
        let mut map = self.lock();
        let state = map
            .entry(user_id)
            .or_insert_with(|| EntitlementState::fresh(now, self.default_limit));
        Ok(*state)
    }

    async fn consume_one(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> anyhow::Result<EntitlementState> {
        let mut map = self.lock();
        let current = map
            .get(&user_id)
            .copied()
            .unwrap_or_else(|| EntitlementState::fresh(now, self.default_limit));
        let next = gate::consume(current, now);
        map.insert(user_id, next);
        Ok(next)
    }
}
