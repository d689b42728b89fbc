//! Redis counter store - the distributed sliding window backend.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tokio::sync::RwLock;
use uuid::Uuid;

use verge_core::ports::{CounterStore, StoreError, WindowReservation};

/// Redis connection configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            connect_timeout: Duration::from_secs(
                std::env::var("REDIS_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
        }
    }
}

/// Redis counter store configuration.
#[derive(Debug, Clone)]
pub struct RedisCounterConfig {
    pub redis: RedisConfig,
    /// Key prefix namespace for window keys
    pub key_prefix: String,
}

impl Default for RedisCounterConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            key_prefix: "verge:rl".to_string(),
        }
    }
}

impl RedisCounterConfig {
    pub fn from_env() -> Self {
        Self {
            redis: RedisConfig::from_env(),
            key_prefix: std::env::var("RATE_LIMIT_KEY_PREFIX")
                .unwrap_or_else(|_| "verge:rl".to_string()),
        }
    }
}

/// Redis-backed sliding window counter.
///
/// The whole purge -> count -> conditional-insert -> expire sequence runs
/// as one Lua script, so concurrent callers across any number of process
/// instances serialize on the Redis side. Entries are a sorted set scored
/// by admission time; members carry a UUID nonce so same-millisecond
/// admissions never collide.
pub struct RedisCounterStore {
    client: Client,
    /// Established lazily so a Redis outage at boot leaves the process
    /// serving from the fallback; the health probe drives reconnection.
    conn: RwLock<Option<ConnectionManager>>,
    config: RedisCounterConfig,
    script: Script,
}

// KEYS[1] window key; ARGV: now, exclusive purge boundary, window ms,
// max requests, nonce. Returns {admitted, count, oldest score or -1}.
const WINDOW_SCRIPT: &str = r#"
    local key = KEYS[1]
    local now = ARGV[1]
    local boundary = ARGV[2]
    local window_ms = ARGV[3]
    local max_requests = tonumber(ARGV[4])
    local member = ARGV[5]

    redis.call('ZREMRANGEBYSCORE', key, '-inf', boundary)
    local count = redis.call('ZCARD', key)
    local admitted = 0
    if count < max_requests then
        redis.call('ZADD', key, now, member)
        redis.call('PEXPIRE', key, window_ms)
        admitted = 1
        count = count + 1
    end

    local oldest = -1
    local first = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
    if first[2] then
        oldest = tonumber(first[2])
    end
    return {admitted, count, oldest}
"#;

impl RedisCounterStore {
    pub fn new(config: RedisCounterConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.redis.url.as_str())
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            conn: RwLock::new(None),
            config,
            script: Script::new(WINDOW_SCRIPT),
        })
    }

    /// Create from environment configuration.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::new(RedisCounterConfig::from_env())
    }

    /// Establish the connection eagerly, e.g. at startup. Failure is not
    /// fatal; the store reconnects on the next call or probe.
    pub async fn connect(&self) -> Result<(), StoreError> {
        self.connection().await.map(|_| ())
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        if let Some(conn) = self.conn.read().await.as_ref() {
            return Ok(conn.clone());
        }

        let mut slot = self.conn.write().await;
        // Another caller may have connected while we waited for the lock.
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let manager_fut = ConnectionManager::new(self.client.clone());
        let conn = tokio::time::timeout(self.config.redis.connect_timeout, manager_fut)
            .await
            .map_err(|_| StoreError::Unavailable("Connection timed out".to_string()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        tracing::info!(url = %self.config.redis.url, "Connected to Redis counter store");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn try_acquire(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        max_requests: u32,
    ) -> Result<WindowReservation, StoreError> {
        let redis_key = self.make_key(key);
        let mut conn = self.connection().await?;

        // Entries scored exactly at the window start are still in-window;
        // the '(' makes the purge boundary exclusive.
        let boundary = format!("({}", now_ms.saturating_sub(window_ms));
        let nonce = Uuid::new_v4().to_string();

        let (admitted, count, oldest): (i64, i64, i64) = self
            .script
            .key(&redis_key)
            .arg(now_ms)
            .arg(boundary)
            .arg(window_ms)
            .arg(max_requests)
            .arg(nonce)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(WindowReservation {
            admitted: admitted == 1,
            count: count.max(0) as u32,
            oldest_ms: (oldest >= 0).then_some(oldest as u64),
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}
