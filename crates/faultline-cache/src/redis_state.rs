// Redis SharedState implementation
//
// Sliding windows are sorted sets scored by epoch milliseconds; admission
// runs as one Lua script so evict-count-record is atomic across instances.
// Breaker snapshots are JSON strings; probe permits are capped counters.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use tracing::debug;
use uuid::Uuid;

use crate::state::{BreakerSnapshot, SharedState, StateError, WindowAdmission};

const KEY_PREFIX: &str = "fl";

/// Probe keys get a TTL so an instance dying mid-probe cannot wedge a vendor
/// in half-open forever.
const PROBE_TTL_SECS: i64 = 300;

const TRY_ADMIT_LUA: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]
redis.call('ZREMRANGEBYSCORE', key, 0, now - window)
local count = redis.call('ZCARD', key)
if count < limit then
  redis.call('ZADD', key, now, member)
  redis.call('PEXPIRE', key, window)
  return {1, count + 1, 0}
end
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local wait = 0
if oldest[2] then
  wait = (tonumber(oldest[2]) + window) - now
end
return {0, count, wait}
"#;

const RECORD_LUA: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local member = ARGV[3]
redis.call('ZREMRANGEBYSCORE', key, 0, now - window)
redis.call('ZADD', key, now, member)
redis.call('PEXPIRE', key, window)
return redis.call('ZCARD', key)
"#;

const COUNT_LUA: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
redis.call('ZREMRANGEBYSCORE', key, 0, now - window)
return redis.call('ZCARD', key)
"#;

const PROBE_ACQUIRE_LUA: &str = r#"
local key = KEYS[1]
local cap = tonumber(ARGV[1])
local ttl = tonumber(ARGV[2])
local current = tonumber(redis.call('GET', key) or '0')
if current < cap then
  redis.call('INCR', key)
  redis.call('EXPIRE', key, ttl)
  return 1
end
return 0
"#;

const PROBE_RELEASE_LUA: &str = r#"
local key = KEYS[1]
local v = redis.call('DECR', key)
if v < 0 then
  redis.call('SET', key, '0')
end
return 1
"#;

/// Redis-backed shared state over a managed multiplexed connection.
#[derive(Clone)]
pub struct RedisSharedState {
    conn: ConnectionManager,
}

impl RedisSharedState {
    /// Connect to Redis.
    ///
    /// The connection manager reconnects transparently; individual command
    /// failures still surface as `StateError::Unavailable` so the safety
    /// fabric can apply its degraded-mode policy.
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        debug!("connected to redis shared state");
        Ok(Self { conn })
    }

    fn window_key(key: &str) -> String {
        format!("{KEY_PREFIX}:win:{key}")
    }

    fn breaker_key(vendor: &str) -> String {
        format!("{KEY_PREFIX}:breaker:{vendor}")
    }

    fn probe_key(vendor: &str) -> String {
        format!("{KEY_PREFIX}:probes:{vendor}")
    }

    fn unavailable(err: RedisError) -> StateError {
        StateError::Unavailable(err.to_string())
    }

    fn member(now: DateTime<Utc>) -> String {
        // Unique per admission so concurrent requests in the same
        // millisecond do not collapse into one sorted-set entry.
        format!("{}:{}", now.timestamp_millis(), Uuid::now_v7())
    }
}

#[async_trait]
impl SharedState for RedisSharedState {
    async fn window_try_admit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u64,
    ) -> Result<WindowAdmission, StateError> {
        let mut conn = self.conn.clone();
        let reply: Vec<i64> = Script::new(TRY_ADMIT_LUA)
            .key(Self::window_key(key))
            .arg(now.timestamp_millis())
            .arg(window.as_millis() as i64)
            .arg(limit as i64)
            .arg(Self::member(now))
            .invoke_async(&mut conn)
            .await
            .map_err(Self::unavailable)?;

        match reply.as_slice() {
            [admitted, count, wait_millis] => Ok(WindowAdmission {
                admitted: *admitted == 1,
                count: *count as u64,
                retry_after: if *admitted == 1 {
                    None
                } else {
                    Some(Duration::from_millis((*wait_millis).max(0) as u64))
                },
            }),
            other => Err(StateError::Corrupt {
                key: key.to_string(),
                message: format!("unexpected admit reply: {other:?}"),
            }),
        }
    }

    async fn window_record(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<u64, StateError> {
        let mut conn = self.conn.clone();
        let count: i64 = Script::new(RECORD_LUA)
            .key(Self::window_key(key))
            .arg(now.timestamp_millis())
            .arg(window.as_millis() as i64)
            .arg(Self::member(now))
            .invoke_async(&mut conn)
            .await
            .map_err(Self::unavailable)?;
        Ok(count as u64)
    }

    async fn window_count(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<u64, StateError> {
        let mut conn = self.conn.clone();
        let count: i64 = Script::new(COUNT_LUA)
            .key(Self::window_key(key))
            .arg(now.timestamp_millis())
            .arg(window.as_millis() as i64)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::unavailable)?;
        Ok(count as u64)
    }

    async fn breaker_get(&self, vendor: &str) -> Result<Option<BreakerSnapshot>, StateError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(Self::breaker_key(vendor))
            .await
            .map_err(Self::unavailable)?;

        match raw {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StateError::Corrupt {
                    key: Self::breaker_key(vendor),
                    message: e.to_string(),
                }),
        }
    }

    async fn breaker_put(
        &self,
        vendor: &str,
        snapshot: BreakerSnapshot,
    ) -> Result<(), StateError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(&snapshot).map_err(|e| StateError::Corrupt {
            key: Self::breaker_key(vendor),
            message: e.to_string(),
        })?;
        conn.set::<_, _, ()>(Self::breaker_key(vendor), json)
            .await
            .map_err(Self::unavailable)?;
        Ok(())
    }

    async fn probe_try_acquire(&self, vendor: &str, cap: u32) -> Result<bool, StateError> {
        let mut conn = self.conn.clone();
        let granted: i64 = Script::new(PROBE_ACQUIRE_LUA)
            .key(Self::probe_key(vendor))
            .arg(cap as i64)
            .arg(PROBE_TTL_SECS)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::unavailable)?;
        Ok(granted == 1)
    }

    async fn probe_release(&self, vendor: &str) -> Result<(), StateError> {
        let mut conn = self.conn.clone();
        let _: i64 = Script::new(PROBE_RELEASE_LUA)
            .key(Self::probe_key(vendor))
            .invoke_async(&mut conn)
            .await
            .map_err(Self::unavailable)?;
        Ok(())
    }

    async fn probe_reset(&self, vendor: &str) -> Result<(), StateError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::probe_key(vendor))
            .await
            .map_err(Self::unavailable)?;
        Ok(())
    }

    async fn window_clear(&self, key: &str) -> Result<(), StateError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::window_key(key))
            .await
            .map_err(Self::unavailable)?;
        Ok(())
    }
}
