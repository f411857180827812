//! Services is a core layer for the app business logic like
//! validation and issuance orchestration.

pub mod coupons;
pub mod types;

pub use self::coupons::*;
pub use self::types::ServiceFuture;

use std::sync::Arc;

use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;
use failure::Fail;
use futures_cpupool::CpuPool;
use r2d2::{ManageConnection, Pool, PooledConnection};

use failure::Error as FailureError;

use config::Config;
use errors::Error;
use models::UserId;
use repos::quota::CouponQuotaGuard;
use repos::repo_factory::ReposFactory;

/// Static context for services, created once at startup and shared by all requests
pub struct StaticContext<M: ManageConnection, F> {
    pub db_pool: Pool<M>,
    pub cpu_pool: CpuPool,
    pub config: Arc<Config>,
    pub repo_factory: F,
    pub coupon_quota: Arc<CouponQuotaGuard>,
}

impl<M: ManageConnection, F> StaticContext<M, F> {
    pub fn new(
        db_pool: Pool<M>,
        cpu_pool: CpuPool,
        config: Arc<Config>,
        repo_factory: F,
        coupon_quota: Arc<CouponQuotaGuard>,
    ) -> Self {
        Self {
            db_pool,
            cpu_pool,
            config,
            repo_factory,
            coupon_quota,
        }
    }
}

impl<M: ManageConnection, F: Clone> Clone for StaticContext<M, F> {
    fn clone(&self) -> Self {
        Self {
            db_pool: self.db_pool.clone(),
            cpu_pool: self.cpu_pool.clone(),
            config: self.config.clone(),
            repo_factory: self.repo_factory.clone(),
            coupon_quota: self.coupon_quota.clone(),
        }
    }
}

/// Dynamic context for services, scoped to one request
#[derive(Clone, Debug, Default)]
pub struct DynamicContext {
    pub user_id: Option<UserId>,
}

impl DynamicContext {
    pub fn new(user_id: Option<UserId>) -> Self {
        Self { user_id }
    }
}

/// Base service: pools, factories and the requester identity
pub struct Service<M: ManageConnection, F> {
    pub static_context: StaticContext<M, F>,
    pub dynamic_context: DynamicContext,
}

impl<M, F> Service<M, F>
where
    M: ManageConnection,
    M::Connection: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager>,
    F: ReposFactory<M::Connection>,
{
    pub fn new(static_context: StaticContext<M, F>, dynamic_context: DynamicContext) -> Self {
        Self {
            static_context,
            dynamic_context,
        }
    }

    /// Executes closure on db pool, wrapped in the cpu pool. Checking a
    /// connection out is bounded by the pool timeout; running out of
    /// connections surfaces as a store failure, never as a hang.
    pub fn spawn_on_pool<R, Func>(&self, f: Func) -> ServiceFuture<R>
    where
        R: Send + 'static,
        Func: FnOnce(PooledConnection<M>) -> Result<R, FailureError> + Send + 'static,
    {
        let db_pool = self.static_context.db_pool.clone();
        let cpu_pool = self.static_context.cpu_pool.clone();

        Box::new(cpu_pool.spawn_fn(move || {
            db_pool
                .get()
                .map_err(|e| e.context(Error::StoreUnavailable).into())
                .and_then(f)
        }))
    }
}
