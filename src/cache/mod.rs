use crate::cli::Args;
use log::{ info, warn };
use redis::aio::MultiplexedConnection;
use redis::Client;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Optional Redis connection for caching. Opened at start-up when a cache
/// host is configured; a failed connection is logged, never fatal.
#[derive(Clone, Default)]
pub struct CacheClients {
    pub redis: Option<Arc<Mutex<MultiplexedConnection>>>,
}

impl CacheClients {
    pub fn is_connected(&self) -> bool {
        self.redis.is_some()
    }
}

pub async fn init(args: &Args) -> CacheClients {
    let Some(url) = args.cache_url() else {
        info!("No cache host configured, cache disabled");
        return CacheClients::default();
    };

    match connect(&url).await {
        Ok(conn) => {
            info!("Cache connected at {}", url);
            CacheClients { redis: Some(Arc::new(Mutex::new(conn))) }
        }
        Err(e) => {
            warn!("Cache connection to {} failed: {}", url, e);
            CacheClients::default()
        }
    }
}

async fn connect(url: &str) -> Result<MultiplexedConnection, redis::RedisError> {
    let client = Client::open(url)?;
    client.get_multiplexed_async_connection().await
}
