use anyhow::Context;
use axum::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::gate::{self, EntitlementState, TierLimit};
use super::store::EntitlementStore;

/// Postgres-backed quota store. One row per user; `tier_limit` NULL
/// marks an unlimited tier.
#[derive(Clone)]
pub struct PgEntitlementStore {
    db: PgPool,
    free_weekly_limit: u32,
}

impl PgEntitlementStore {
    pub fn new(db: PgPool, free_weekly_limit: u32) -> Self {
        Self {
            db,
            free_weekly_limit,
        }
    }
}

#[derive(Debug, FromRow)]
struct EntitlementRow {
    weekly_used: i32,
    window_start: OffsetDateTime,
    tier_limit: Option<i32>,
}

impl EntitlementRow {
    fn into_state(self) -> EntitlementState {
        EntitlementState {
            weekly_used: self.weekly_used.max(0) as u32,
            window_start: self.window_start,
            tier_limit: match self.tier_limit {
                Some(n) => TierLimit::Limited(n.max(0) as u32),
                None => TierLimit::Unlimited,
            },
        }
    }
}

#[async_trait]
impl EntitlementStore for PgEntitlementStore {
    async fn load_or_init(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> anyhow::Result<EntitlementState> {
        if let Some(row) = sqlx::query_as::<_, EntitlementRow>(
            r#"
            SELECT weekly_used, window_start, tier_limit
            FROM entitlements
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await
        .context("load entitlement")?
        {
            return Ok(row.into_state());
        }

        // First use: insert a free-tier row. The no-op DO UPDATE keeps
        // RETURNING working when a concurrent insert wins the race.
        let row = sqlx::query_as::<_, EntitlementRow>(
            r#"
            INSERT INTO entitlements (user_id, weekly_used, window_start, tier_limit)
            VALUES ($1, 0, $2, $3)
            ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING weekly_used, window_start, tier_limit
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(self.free_weekly_limit as i32)
        .fetch_one(&self.db)
        .await
        .context("init entitlement")?;

        Ok(row.into_state())
    }

    async fn consume_one(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> anyhow::Result<EntitlementState> {
        let mut tx = self.db.begin().await.context("begin tx")?;

        let row = sqlx::query_as::<_, EntitlementRow>(
            r#"
            SELECT weekly_used, window_start, tier_limit
            FROM entitlements
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .context("lock entitlement for consume")?;

        let next = gate::consume(row.into_state(), now);

        sqlx::query(
            r#"
            UPDATE entitlements
            SET weekly_used = $2, window_start = $3
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(next.weekly_used as i32)
        .bind(next.window_start)
        .execute(&mut *tx)
        .await
        .context("update entitlement")?;

        tx.commit().await.context("commit entitlement consume")?;
        Ok(next)
    }
}
