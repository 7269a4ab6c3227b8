//! Redis cache, shared by every instance pointed at the same server.

use std::time::Duration;

use ::redis::{Client, Connection, ConnectionInfo, IntoConnectionInfo, RedisError, RedisResult};
use parking_lot::Mutex;

use super::{Cache, SavedBinary};
use crate::option::RedisCacheOptions;
use crate::{Error, Result};

/// Idle connections kept open when the options leave the pool size at 0.
pub const DEFAULT_POOL_SIZE: usize = 10;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Cache storing marshalled [`SavedBinary`] values under their keys.
///
/// Entries expire after the configured TTL; a zero TTL keeps them until
/// evicted by the server.
pub struct RedisCache {
    client: Client,
    ttl: Duration,
    pool_size: usize,
    idle: Mutex<Vec<Connection>>,
}

fn cache_error(e: RedisError) -> Error {
    Error::Cache(format!("redis: {}", e))
}

impl RedisCache {
    pub fn new(options: &RedisCacheOptions, ttl: Duration) -> Result<Self> {
        let mut info: ConnectionInfo = format!("redis://{}", options.address)
            .into_connection_info()
            .map_err(|e| Error::Config(format!("redis address {}: {}", options.address, e)))?;
        info.redis.db = options.db;
        info.redis.username = options.username.clone();
        info.redis.password = options.password.clone();
        let client = Client::open(info).map_err(cache_error)?;

        let pool_size = if options.pool_size == 0 {
            DEFAULT_POOL_SIZE
        } else {
            options.pool_size
        };
        Ok(Self {
            client,
            ttl,
            pool_size,
            idle: Mutex::new(Vec::new()),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Run a command on a pooled connection. Connections that fail are dropped.
    fn with_connection<T>(&self, f: impl FnOnce(&mut Connection) -> RedisResult<T>) -> Result<T> {
        let pooled = self.idle.lock().pop();
        let mut conn = match pooled {
            Some(conn) => conn,
            None => self
                .client
                .get_connection_with_timeout(CONNECT_TIMEOUT)
                .map_err(cache_error)?,
        };
        let result = f(&mut conn).map_err(cache_error)?;
        let mut idle = self.idle.lock();
        if idle.len() < self.pool_size {
            idle.push(conn);
        }
        Ok(result)
    }
}

impl Cache for RedisCache {
    fn start(&self) -> Result<()> {
        let pong: String = self.with_connection(|conn| ::redis::cmd("PING").query(conn))?;
        log::info!("redis cache connected ({})", pong);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.idle.lock().clear();
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<SavedBinary>> {
        let data: Option<Vec<u8>> =
            self.with_connection(|conn| ::redis::cmd("GET").arg(key).query(conn))?;
        match data {
            Some(data) => SavedBinary::unmarshal(&data)
                .map(Some)
                .map_err(|e| Error::Cache(format!("corrupt entry {}: {}", key, e))),
            None => Ok(None),
        }
    }

    fn save(&self, key: &str, binary: &SavedBinary) -> Result<()> {
        let data = binary.marshal();
        let ttl = self.ttl.as_secs();
        self.with_connection(|conn| {
            let mut cmd = ::redis::cmd("SET");
            cmd.arg(key).arg(data);
            if ttl > 0 {
                cmd.arg("EX").arg(ttl);
            }
            cmd.query::<()>(conn)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable() -> RedisCacheOptions {
        RedisCacheOptions {
            address: "127.0.0.1:1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_applies_defaults() {
        let cache = RedisCache::new(&unreachable(), Duration::from_secs(60)).unwrap();
        assert_eq!(cache.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(cache.ttl(), Duration::from_secs(60));

        let sized = RedisCacheOptions {
            pool_size: 2,
            db: 3,
            ..unreachable()
        };
        assert_eq!(RedisCache::new(&sized, Duration::ZERO).unwrap().pool_size, 2);
    }

    #[test]
    fn test_unreachable_server_is_cache_error() {
        let cache = RedisCache::new(&unreachable(), Duration::ZERO).unwrap();
        assert!(matches!(cache.start(), Err(Error::Cache(_))));
        assert!(matches!(cache.load("file.0.x"), Err(Error::Cache(_))));
        assert!(matches!(
            cache.save("file.0.x", &SavedBinary::default()),
            Err(Error::Cache(_))
        ));
        assert!(cache.idle.lock().is_empty());
        cache.close().unwrap();
    }
}
