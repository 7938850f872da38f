use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Length of one quota window.
pub const WINDOW: Duration = Duration::days(7);

/// Per-window quota for a subscription tier. Unlimited is its own
/// variant rather than a large finite number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TierLimit {
    Limited(u32),
    Unlimited,
}

/// One user's quota counter. Created at first use, mutated only on
/// successful analyses, never destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntitlementState {
    pub weekly_used: u32,
    pub window_start: OffsetDateTime,
    pub tier_limit: TierLimit,
}

impl EntitlementState {
    pub fn fresh(now: OffsetDateTime, tier_limit: TierLimit) -> Self {
        Self {
            weekly_used: 0,
            window_start: now,
            tier_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Unlimited,
    Scans(u32),
}

/// Roll the window if 7 days have elapsed. There is no background
/// timer; every read passes through here first.
pub fn rolled(state: EntitlementState, now: OffsetDateTime) -> EntitlementState {
    if now - state.window_start >= WINDOW {
        EntitlementState {
            weekly_used: 0,
            window_start: now,
            tier_limit: state.tier_limit,
        }
    } else {
        state
    }
}

pub fn can_use(state: EntitlementState, now: OffsetDateTime) -> bool {
    match state.tier_limit {
        TierLimit::Unlimited => true,
        // A zero limit means the tier allows nothing; this must not panic.
        TierLimit::Limited(limit) => rolled(state, now).weekly_used < limit,
    }
}

/// Record one successful analysis. Callers must not invoke this on the
/// failure path; failed analyses never consume quota.
pub fn consume(state: EntitlementState, now: OffsetDateTime) -> EntitlementState {
    let mut next = rolled(state, now);
    next.weekly_used = next.weekly_used.saturating_add(1);
    next
}

pub fn remaining(state: EntitlementState, now: OffsetDateTime) -> Remaining {
    match state.tier_limit {
        TierLimit::Unlimited => Remaining::Unlimited,
        TierLimit::Limited(limit) => {
            let state = rolled(state, now);
            Remaining::Scans(limit.saturating_sub(state.weekly_used))
        }
    }
}

/// When the current window lapses, given no further activity.
pub fn window_resets_at(state: EntitlementState) -> OffsetDateTime {
    state.window_start + WINDOW
}
