//! Coupons is a microservice core responsible for race-free issuance of a
//! strictly limited supply of coupons to concurrent requesters.
//!
//! The layered structure of the app is
//!
//! `Service -> QuotaGuard (redis) + Repo (postgres)`
//!
//! A claim request is first recorded in the per-coupon attempt set of the
//! fast store; only admitted requests reach the durable store, where a
//! conditional increment enforces the quantity cap. Each layer can throw
//! Error with context or cover occurred error with Error in the context.

#![recursion_limit = "128"]

extern crate config as config_crate;
#[macro_use]
extern crate diesel;
#[macro_use]
extern crate failure;
extern crate futures;
extern crate futures_cpupool;
#[macro_use]
extern crate log;
extern crate r2d2;
extern crate r2d2_redis;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate validator;
#[macro_use]
extern crate validator_derive;

#[cfg(test)]
extern crate tokio_core;

#[macro_use]
pub mod macros;
pub mod config;
pub mod errors;
pub mod models;
pub mod repos;
pub mod schema;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use diesel::pg::PgConnection;
use diesel::r2d2::ConnectionManager;
use futures_cpupool::CpuPool;
use r2d2_redis::RedisConnectionManager;

use config::Config;
use repos::quota::RedisCouponQuotaGuard;
use repos::repo_factory::ReposFactoryImpl;
use services::StaticContext;

/// Builds the shared service context from provided `Config`: the database
/// and redis pools, the CPU pool repos run on, and the quota guard.
pub fn create_static_context(config: Config) -> StaticContext<ConnectionManager<PgConnection>, ReposFactoryImpl> {
    let connection_timeout = Duration::from_secs(config.server.connection_timeout_secs);

    // Prepare database pool
    let database_url: String = config.server.database.parse().expect("Database URL must be set in configuration");
    let db_manager = ConnectionManager::<PgConnection>::new(database_url);
    let db_pool = r2d2::Pool::builder()
        .connection_timeout(connection_timeout)
        .build(db_manager)
        .expect("Failed to create DB connection pool");

    // Prepare CPU pool
    let thread_count = config.server.thread_count;
    let cpu_pool = CpuPool::new(thread_count);

    // Prepare redis pool for the quota guard. The fast store is not
    // optional: without it no admission happens at all.
    let redis_url: String = config.server.redis.parse().expect("Redis URL must be set in configuration");
    let redis_manager = RedisConnectionManager::new(redis_url.as_str()).expect("Failed to create Redis connection manager");
    let redis_pool = r2d2::Pool::builder()
        .connection_timeout(connection_timeout)
        .build(redis_manager)
        .expect("Failed to create Redis connection pool");

    let coupon_quota = Arc::new(RedisCouponQuotaGuard::new(redis_pool));

    StaticContext::new(db_pool, cpu_pool, Arc::new(config), ReposFactoryImpl::default(), coupon_quota)
}
