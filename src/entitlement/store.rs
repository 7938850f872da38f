use axum::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::gate::EntitlementState;

/// Persistence seam for per-user quota state. Implementations must make
/// `consume_one` a single read-modify-write per user so concurrent calls
/// for the same user serialize on the counter.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Fetch the user's state, creating a fresh free-tier row at first use.
    async fn load_or_init(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> anyhow::Result<EntitlementState>;

    /// Roll the window and count one successful analysis. Only called on
    /// the success path; failures and cancellations never reach here.
    async fn consume_one(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> anyhow::Result<EntitlementState>;
}
