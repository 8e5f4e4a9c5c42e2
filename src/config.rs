use anyhow::Result;

// ============================================================================
// Configuration Constants
// ============================================================================

const DEFAULT_WS_PORT: u16 = 8080;
const DEFAULT_HTTP_PORT: u16 = 8081;

// Heartbeat: ping period and how many missed pongs close the socket
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;
const DEFAULT_HEARTBEAT_MISS_LIMIT: u32 = 3;

// Availability probe debounce window
const DEFAULT_AVAILABILITY_DEBOUNCE_SECS: u64 = 30;

// Degraded-mode fallback cache bounds
const DEFAULT_FALLBACK_CACHE_CAPACITY: usize = 512;
const DEFAULT_FALLBACK_CACHE_TTL_SECS: i64 = 300;

// History pagination
pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;

// Inbound frame and content limits
pub const MAX_FRAME_SIZE: usize = 64 * 1024;
pub const MAX_CONTENT_LENGTH: usize = 16 * 1024;

/// Which storage backend to run against
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub ws_port: u16,
    pub http_port: u16,
    pub database_url: String,
    pub storage_backend: StorageBackend,
    /// Optional HTTP mail relay; emails are logged-only when unset
    pub mail_relay_url: Option<String>,
    pub mail_from: String,
    /// Base URL prefixed to attachment ids to form file reference URLs
    pub file_base_url: String,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_miss_limit: u32,
    pub availability_debounce_secs: u64,
    pub fallback_cache_capacity: usize,
    pub fallback_cache_ttl_secs: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let storage_backend = match std::env::var("STORAGE").as_deref() {
            Ok("memory") => StorageBackend::Memory,
            _ => StorageBackend::Postgres,
        };

        let database_url = match storage_backend {
            StorageBackend::Postgres => std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            StorageBackend::Memory => String::new(),
        };

        Ok(Self {
            ws_port: env_or("WS_PORT", DEFAULT_WS_PORT)?,
            http_port: env_or("HTTP_PORT", DEFAULT_HTTP_PORT)?,
            database_url,
            storage_backend,
            mail_relay_url: std::env::var("MAIL_RELAY_URL").ok(),
            mail_from: std::env::var("MAIL_FROM")
                .unwrap_or_else(|_| "noreply@huddle.local".to_string()),
            file_base_url: std::env::var("FILE_BASE_URL")
                .unwrap_or_else(|_| "/files".to_string()),
            heartbeat_interval_secs: env_or(
                "HEARTBEAT_INTERVAL_SECS",
                DEFAULT_HEARTBEAT_INTERVAL_SECS,
            )?,
            heartbeat_miss_limit: env_or("HEARTBEAT_MISS_LIMIT", DEFAULT_HEARTBEAT_MISS_LIMIT)?,
            availability_debounce_secs: env_or(
                "AVAILABILITY_DEBOUNCE_SECS",
                DEFAULT_AVAILABILITY_DEBOUNCE_SECS,
            )?,
            fallback_cache_capacity: env_or(
                "FALLBACK_CACHE_CAPACITY",
                DEFAULT_FALLBACK_CACHE_CAPACITY,
            )?,
            fallback_cache_ttl_secs: env_or(
                "FALLBACK_CACHE_TTL_SECS",
                DEFAULT_FALLBACK_CACHE_TTL_SECS,
            )?,
        })
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid value for {}: {}", key, raw)),
        Err(_) => Ok(default),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_port: DEFAULT_WS_PORT,
            http_port: DEFAULT_HTTP_PORT,
            database_url: String::new(),
            storage_backend: StorageBackend::Memory,
            mail_relay_url: None,
            mail_from: "noreply@huddle.local".to_string(),
            file_base_url: "/files".to_string(),
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            heartbeat_miss_limit: DEFAULT_HEARTBEAT_MISS_LIMIT,
            availability_debounce_secs: DEFAULT_AVAILABILITY_DEBOUNCE_SECS,
            fallback_cache_capacity: DEFAULT_FALLBACK_CACHE_CAPACITY,
            fallback_cache_ttl_secs: DEFAULT_FALLBACK_CACHE_TTL_SECS,
        }
    }
}
