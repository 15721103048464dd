use rocket::figment::providers::{Env, Format, Toml};
use rocket::figment::Figment;
use rocket::{Build, Rocket};
use serde::{Deserialize, Serialize};

/// Main server config (merged with Rocket's default config). Field names
/// match §6.4's configuration table one-for-one, plus the connection
/// strings needed to actually reach Postgres and Redis.
#[derive(Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Postgres connection string.
    pub database_url: String,
    /// Redis connection string.
    pub redis_url: String,
    /// Redis static pool size (default: 4).
    pub redis_pool: Option<usize>,

    /// Buffer-flush threshold in chunks (§6.4 `REDIS_FLUSH_EVERY_N`).
    pub redis_flush_every_n: Option<usize>,
    /// Partial DB write threshold (§6.4 `DB_FLUSH_EVERY_M`).
    pub db_flush_every_m: Option<usize>,
    /// `retry:` value (ms) sent on the `init` SSE frame (§6.4 `SSE_RECONNECTION_DELAY_MS`).
    pub sse_reconnection_delay_ms: Option<u64>,
    /// Overall Producer deadline in seconds (§6.4 `TOTAL_RESPONSE_TIMEOUT_S`).
    pub total_response_timeout_s: Option<u64>,
    /// Per-chunk upstream read timeout in seconds (§6.4 `ALIVE_INTERVAL_S`).
    pub alive_interval_s: Option<f64>,
    /// Replayer cache poll period in seconds (§6.4 `RECONNECT_POLL_INTERVAL_REDIS_S`).
    pub reconnect_poll_interval_redis_s: Option<f64>,
    /// Replayer DB poll period in seconds (§6.4 `RECONNECT_POLL_INTERVAL_DB_S`).
    pub reconnect_poll_interval_db_s: Option<f64>,
    /// TTL of Status and Buffer keys in seconds (§6.4 `REDIS_TTL_S`).
    pub redis_ttl_s: Option<i64>,
}

/// Fully resolved chat-stream tunables, with defaults from §6.4 applied.
/// Built once from `AppConfig` and passed by value into Producers/Replayers.
#[derive(Debug, Clone, Copy)]
pub struct ChatStreamConfig {
    pub redis_flush_every_n: usize,
    pub db_flush_every_m: usize,
    pub sse_reconnection_delay_ms: u64,
    pub total_response_timeout_s: u64,
    pub alive_interval_s: f64,
    pub reconnect_poll_interval_redis_s: f64,
    pub reconnect_poll_interval_db_s: f64,
    pub redis_ttl_s: i64,
}

impl Default for ChatStreamConfig {
    fn default() -> Self {
        Self {
            redis_flush_every_n: 25,
            db_flush_every_m: 150,
            sse_reconnection_delay_ms: 30_000,
            total_response_timeout_s: 600,
            alive_interval_s: 20.0,
            reconnect_poll_interval_redis_s: 0.5,
            reconnect_poll_interval_db_s: 3.0,
            redis_ttl_s: 3_600,
        }
    }
}

impl From<&AppConfig> for ChatStreamConfig {
    fn from(cfg: &AppConfig) -> Self {
        let defaults = ChatStreamConfig::default();
        Self {
            redis_flush_every_n: cfg.redis_flush_every_n.unwrap_or(defaults.redis_flush_every_n),
            db_flush_every_m: cfg.db_flush_every_m.unwrap_or(defaults.db_flush_every_m),
            sse_reconnection_delay_ms: cfg
                .sse_reconnection_delay_ms
                .unwrap_or(defaults.sse_reconnection_delay_ms),
            total_response_timeout_s: cfg
                .total_response_timeout_s
                .unwrap_or(defaults.total_response_timeout_s),
            alive_interval_s: cfg.alive_interval_s.unwrap_or(defaults.alive_interval_s),
            reconnect_poll_interval_redis_s: cfg
                .reconnect_poll_interval_redis_s
                .unwrap_or(defaults.reconnect_poll_interval_redis_s),
            reconnect_poll_interval_db_s: cfg
                .reconnect_poll_interval_db_s
                .unwrap_or(defaults.reconnect_poll_interval_db_s),
            redis_ttl_s: cfg.redis_ttl_s.unwrap_or(defaults.redis_ttl_s),
        }
    }
}

/// Get the server configuration from Rocket's managed state.
pub fn get_app_config(rocket: &Rocket<Build>) -> &AppConfig {
    rocket.state::<AppConfig>().expect("AppConfig missing from managed state")
}

/// Builds a Figment configuration provider that merges, in order:
/// 1. Default Rocket config
/// 2. `Rocket.toml`
/// 3. Environment variables prefixed `RS_CHAT_`
///
/// In debug builds, also loads a local `.env` file before reading the
/// environment.
pub fn get_config_provider() -> Figment {
    #[cfg(debug_assertions)]
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!(error = %e, "no .env file loaded");
    }

    Figment::from(rocket::Config::default())
        .merge(Toml::file("Rocket.toml").nested())
        .merge(Env::prefixed("RS_CHAT_").global())
}
