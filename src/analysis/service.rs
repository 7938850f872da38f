use bytes::Bytes;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::entitlement::gate;
use crate::error::AnalysisError;
use crate::state::AppState;
use crate::vision::FoodAnalysisResult;

/// Gate check, then vision call, then quota consumption.
///
/// Quota is only consumed after a confirmed success; any failure or
/// cancellation leaves the counter untouched. A crash between the
/// provider answering and `consume_one` committing loses at most one
/// count, which is accepted for a soft cap.
pub async fn analyze_photo(
    state: &AppState,
    user_id: Uuid,
    image: Bytes,
    cancel: CancellationToken,
) -> Result<FoodAnalysisResult, AnalysisError> {
    let now = OffsetDateTime::now_utc();
    let entitlement = state.entitlements.load_or_init(user_id, now).await?;
    if !gate::can_use(entitlement, now) {
        // Local rejection: no network call, no latency, no cost.
        debug!(%user_id, "weekly quota exhausted, skipping vision call");
        return Err(AnalysisError::QuotaExceeded);
    }

    let result = state.vision.analyze(image, cancel).await?;

    let next = state
        .entitlements
        .consume_one(user_id, OffsetDateTime::now_utc())
        .await?;
    info!(
        %user_id,
        items = result.items.len(),
        weekly_used = next.weekly_used,
        "analysis recorded"
    );
    Ok(result)
}

/// Read-only view for "N scans left this week" UI.
pub async fn remaining_scans(
    state: &AppState,
    user_id: Uuid,
) -> Result<(gate::EntitlementState, gate::Remaining), AnalysisError> {
    let now = OffsetDateTime::now_utc();
    let entitlement = state.entitlements.load_or_init(user_id, now).await?;
    let remaining = gate::remaining(entitlement, now);
    Ok((gate::rolled(entitlement, now), remaining))
}
