//! Redis-backed cache store (`SET key value EX ttl`).

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use super::{CacheError, KvStore};

#[derive(Clone)]
pub struct RedisKvStore {
    conn: MultiplexedConnection,
    namespace: String,
}

impl RedisKvStore {
    pub async fn connect(redis_url: &str, namespace: impl Into<String>) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url).map_err(|e| CacheError::Backend(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Backend(format!("connection failed: {e}")))?;
        Ok(Self {
            conn,
            namespace: namespace.into(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value);
        if let Some(ttl) = ttl {
            // Redis rejects EX 0.
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        cmd.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("SET failed: {e}")))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(self.key(key))
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("GET failed: {e}")))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(self.key(key))
            .query_async::<_, i64>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| CacheError::Backend(format!("DEL failed: {e}")))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| CacheError::Backend(format!("PING failed: {e}")))
    }
}
