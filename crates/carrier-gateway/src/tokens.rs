//! Per-channel access-token cache with single-flight refresh.
//!
//! Providers that hand out short-lived API tokens (login endpoints, OAuth
//! exchanges) share this cache. Only one in-flight request per channel
//! performs the fetch; concurrent callers wait on the same refresh and read
//! the cached result. Values live in redis when configured so instances
//! share them, with a process-local fallback.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use carrier_common::SendError;

pub struct TokenCache {
    redis: Option<redis::aio::ConnectionManager>,
    flights: DashMap<Uuid, Arc<Mutex<()>>>,
    local: DashMap<Uuid, (String, Instant)>,
}

impl TokenCache {
    pub fn new(redis: Option<redis::aio::ConnectionManager>) -> Self {
        Self {
            redis,
            flights: DashMap::new(),
            local: DashMap::new(),
        }
    }

    fn key(channel_uuid: Uuid) -> String {
        format!("carrier:token:{channel_uuid}")
    }

    async fn cached(&self, channel_uuid: Uuid) -> Option<String> {
        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            match conn.get::<_, Option<String>>(Self::key(channel_uuid)).await {
                Ok(value) => return value,
                Err(e) => warn!(error = %e, "Token cache read failed, using local cache"),
            }
        }
        self.local.get(&channel_uuid).and_then(|entry| {
            let (value, expires) = entry.value();
            (*expires > Instant::now()).then(|| value.clone())
        })
    }

    async fn store(&self, channel_uuid: Uuid, value: &str, ttl: Duration) {
        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            let result: redis::RedisResult<()> = conn
                .set_ex(Self::key(channel_uuid), value, ttl.as_secs().max(1))
                .await;
            if let Err(e) = result {
                warn!(error = %e, "Token cache write failed, using local cache");
            }
        }
        self.local
            .insert(channel_uuid, (value.to_string(), Instant::now() + ttl));
    }

    /// Get the channel's token, fetching it when absent or expired.
    ///
    /// `fetch` returns the fresh value and its time to live. Concurrent
    /// callers for the same channel coalesce into one underlying fetch.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        channel_uuid: Uuid,
        fetch: F,
    ) -> Result<String, SendError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(String, Duration), SendError>>,
    {
        if let Some(value) = self.cached(channel_uuid).await {
            return Ok(value);
        }

        let flight = self
            .flights
            .entry(channel_uuid)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = flight.lock().await;

        // a concurrent caller may have refreshed while we waited
        if let Some(value) = self.cached(channel_uuid).await {
            return Ok(value);
        }

        let (value, ttl) = fetch().await?;
        self.store(channel_uuid, &value, ttl).await;
        Ok(value)
    }

    /// Drop the cached token, forcing the next caller to fetch. Used when a
    /// provider rejects a token before its TTL is up.
    pub async fn invalidate(&self, channel_uuid: Uuid) {
        self.local.remove(&channel_uuid);
        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            let result: redis::RedisResult<()> = conn.del(Self::key(channel_uuid)).await;
            if let Err(e) = result {
                warn!(error = %e, "Token cache invalidation failed");
            }
        }
    }
}
