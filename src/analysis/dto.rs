use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    /// Base64-encoded photo, any common image format.
    pub image_b64: String,
}

/// "N scans left this week". All fields null for unlimited tiers.
#[derive(Debug, Serialize)]
pub struct EntitlementResponse {
    pub remaining: Option<u32>,
    pub limit: Option<u32>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub window_resets_at: Option<OffsetDateTime>,
}
