use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
}

/// Settings for the outbound vision-provider client.
#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    /// Longest image side sent to the provider, in pixels.
    pub max_dimension: u32,
    pub timeout_secs: u64,
    /// Total attempts per analysis, including the first.
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub vision: VisionConfig,
    /// Free-tier scans per rolling 7-day window.
    pub free_weekly_limit: u32,
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "mealscan".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "mealscan-users".into()),
        };
        let vision = VisionConfig {
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            endpoint: std::env::var("VISION_ENDPOINT")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".into()),
            model: std::env::var("VISION_MODEL").unwrap_or_else(|_| "gpt-4o".into()),
            max_tokens: env_u32("VISION_MAX_TOKENS", 1500),
            max_dimension: env_u32("VISION_MAX_DIMENSION", 1024),
            timeout_secs: std::env::var("VISION_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60),
            max_attempts: env_u32("VISION_MAX_ATTEMPTS", 3),
        };
        Ok(Self {
            database_url,
            jwt,
            vision,
            free_weekly_limit: env_u32("APP_FREE_WEEKLY_LIMIT", 3),
        })
    }
}
