use crate::config::StoreConfig;

/// Builds a deadpool Redis pool from store configuration. Connections are
/// established lazily on first checkout.
pub fn create_redis_pool(store: &StoreConfig) -> Option<deadpool_redis::Pool> {
    let cfg = deadpool_redis::Config {
        connection: Some(deadpool_redis::ConnectionInfo {
            addr: deadpool_redis::ConnectionAddr::Tcp(store.redis_host.clone(), store.redis_port),
            redis: deadpool_redis::RedisConnectionInfo {
                db: store.redis_db as i64,
                username: store.redis_username.clone(),
                password: store.redis_password.clone(),
                protocol: deadpool_redis::ProtocolVersion::RESP3,
            },
        }),
        pool: Some(deadpool_redis::PoolConfig {
            max_size: store.pool_size.unwrap_or(100),
            ..Default::default()
        }),
        ..Default::default()
    };
    cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1)).ok()
}
