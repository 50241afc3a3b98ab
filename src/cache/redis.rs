use super::{CacheKeys, CounterCache};
use crate::error::{ViewCountError, ViewCountResult};
use crate::types::ContentId;
use async_trait::async_trait;
use bb8_redis::bb8::{self, PooledConnection};
use bb8_redis::redis::{cmd, pipe, Script};
use bb8_redis::RedisConnectionManager;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Subtracts flushed deltas and drops ids that reach zero, for a whole batch,
/// inside one atomic script execution.
///
/// KEYS[1] = pending hash, KEYS[2] = dirty set, ARGV = id, -delta, id, -delta, ...
const SUBTRACT_FLUSHED: &str = r#"
for i = 1, #ARGV, 2 do
  local id = ARGV[i]
  local remaining = redis.call('HINCRBY', KEYS[1], id, ARGV[i + 1])
  if remaining <= 0 then
    redis.call('HDEL', KEYS[1], id)
    redis.call('SREM', KEYS[2], id)
  end
end
return #ARGV / 2
"#;

/// Counter cache shared by every server instance through Redis.
///
/// - markers: `SET key 1 NX PX ttl`
/// - increment: `MULTI; HINCRBY pending id 1; SADD dirty id; EXEC`
/// - snapshot: `MULTI; SMEMBERS dirty; HGETALL pending; EXEC`
/// - subtract: [`SUBTRACT_FLUSHED`] script
/// - read path: `HMGET pending id...`
pub struct RedisCounterCache {
    pool: bb8::Pool<RedisConnectionManager>,
    keys: CacheKeys,
    subtract_script: Script,
}

impl RedisCounterCache {
    /// Connect a pooled client. Fails if the first connection cannot be
    /// established within `connect_timeout`.
    pub async fn connect(
        redis_url: &str,
        keys: CacheKeys,
        pool_max_size: u32,
        connect_timeout: Duration,
    ) -> ViewCountResult<Self> {
        let manager = RedisConnectionManager::new(redis_url)?;
        let pool = bb8::Pool::builder()
            .max_size(pool_max_size)
            .connection_timeout(connect_timeout)
            .idle_timeout(Some(Duration::from_secs(60 * 5)))
            .build(manager)
            .await?;

        let cache = Self {
            pool,
            keys,
            subtract_script: Script::new(SUBTRACT_FLUSHED),
        };
        cache.ping().await?;
        info!(operation = "cache_connect", url = redis_url, "Connected to Redis");
        Ok(cache)
    }

    async fn conn(&self) -> ViewCountResult<PooledConnection<'_, RedisConnectionManager>> {
        self.pool.get().await.map_err(|e| match e {
            bb8::RunError::User(err) => err.into(),
            bb8::RunError::TimedOut => {
                ViewCountError::TimedOut("waiting for a Redis connection".to_string())
            }
        })
    }

    pub async fn ping(&self) -> ViewCountResult<()> {
        let mut conn = self.conn().await?;
        let _: String = cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }

    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }
}

fn parse_id(raw: u64) -> Option<ContentId> {
    ContentId::new(raw).ok()
}

#[async_trait]
impl CounterCache for RedisCounterCache {
    async fn set_marker_if_absent(&self, key: &str, ttl: Duration) -> ViewCountResult<bool> {
        let mut conn = self.conn().await?;
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        let set: Option<String> = cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut *conn)
            .await?;
        trace!(key, claimed = set.is_some(), "redis marker claim");
        Ok(set.is_some())
    }

    async fn increment_pending(&self, id: ContentId) -> ViewCountResult<u64> {
        let mut conn = self.conn().await?;
        let (delta,): (i64,) = pipe()
            .atomic()
            .cmd("HINCRBY")
            .arg(self.keys.pending())
            .arg(id.get())
            .arg(1)
            .cmd("SADD")
            .arg(self.keys.dirty())
            .arg(id.get())
            .ignore()
            .query_async(&mut *conn)
            .await?;
        Ok(delta.max(0) as u64)
    }

    async fn dirty_snapshot(&self) -> ViewCountResult<HashMap<ContentId, u64>> {
        let mut conn = self.conn().await?;
        let (members, deltas): (Vec<u64>, HashMap<u64, i64>) = pipe()
            .atomic()
            .cmd("SMEMBERS")
            .arg(self.keys.dirty())
            .cmd("HGETALL")
            .arg(self.keys.pending())
            .query_async(&mut *conn)
            .await?;

        let snapshot: HashMap<ContentId, u64> = members
            .into_iter()
            .filter_map(|raw| {
                let delta = *deltas.get(&raw)?;
                let id = parse_id(raw)?;
                (delta > 0).then_some((id, delta as u64))
            })
            .collect();
        debug!(dirty = snapshot.len(), "redis dirty snapshot");
        Ok(snapshot)
    }

    async fn subtract_pending(&self, flushed: &HashMap<ContentId, u64>) -> ViewCountResult<()> {
        if flushed.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn().await?;
        let mut invocation = self.subtract_script.prepare_invoke();
        invocation.key(self.keys.pending()).key(self.keys.dirty());
        for (id, delta) in flushed {
            invocation.arg(id.get()).arg(-(*delta as i64));
        }
        let _: i64 = invocation.invoke_async(&mut *conn).await?;
        Ok(())
    }

    async fn pending_for(&self, ids: &[ContentId]) -> ViewCountResult<HashMap<ContentId, u64>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut conn = self.conn().await?;
        let fields: Vec<u64> = ids.iter().map(|id| id.get()).collect();
        let values: Vec<Option<i64>> = cmd("HMGET")
            .arg(self.keys.pending())
            .arg(fields)
            .query_async(&mut *conn)
            .await?;

        Ok(ids
            .iter()
            .zip(values)
            .filter_map(|(id, value)| match value {
                Some(delta) if delta > 0 => Some((*id, delta as u64)),
                _ => None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtract_script_shape() {
        assert!(SUBTRACT_FLUSHED.contains("HINCRBY"));
        assert!(SUBTRACT_FLUSHED.contains("SREM"));
        // Deletes only at or below zero, never unconditionally
        assert!(SUBTRACT_FLUSHED.contains("remaining <= 0"));
    }

    #[test]
    fn test_parse_id_rejects_zero() {
        assert!(parse_id(0).is_none());
        assert_eq!(parse_id(12).map(ContentId::get), Some(12));
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_redis_fails() {
        let result = RedisCounterCache::connect(
            "redis://127.0.0.1:1/",
            CacheKeys::default(),
            2,
            Duration::from_millis(200),
        )
        .await;
        let err = result.err().expect("connection should fail");
        assert!(err.is_infrastructure());
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let result = RedisCounterCache::connect(
            "not a url",
            CacheKeys::default(),
            2,
            Duration::from_millis(200),
        )
        .await;
        assert!(result.is_err());
    }
}
