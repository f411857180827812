//! Fast-path admission control.
//!
//! Claim requests pass through here before any durable-store write. Each
//! coupon owns a set of user ids in the fast store; adding a member and
//! reading the resulting cardinality happen in one atomic round trip, so a
//! burst of racing requests gets at most `total_quantity` admissions and at
//! most one admission per user, without a lock around the whole coupon.
//!
//! The fast view is advisory: it may under-admit after administrative
//! changes, but it never over-admits. The durable conditional increment in
//! `CouponsRepo::issue` remains the authority.

use failure::Fail;
use r2d2::Pool;
use r2d2_redis::redis;
use r2d2_redis::redis::Commands;
use r2d2_redis::RedisConnectionManager;

use config::COUPON_ISSUE_REQUEST_NAMESPACE;
use errors::Error;
use models::{CouponId, UserId};
use repos::types::RepoResult;

pub type RedisPool = Pool<RedisConnectionManager>;

/// Verdict of the fast-path admission check for one `(coupon, user)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Duplicate,
    CapacityExhausted,
}

pub trait CouponQuotaGuard: Send + Sync {
    /// Advisory capacity pre-check: count of recorded attempts against the
    /// configured total. Not the final authority.
    fn available_total_issue_quantity(&self, total_quantity: i32, coupon_id: CouponId) -> RepoResult<bool>;

    /// Records the attempt and decides admission in one atomic step.
    fn admit(&self, coupon_id: CouponId, user_id: UserId, total_quantity: Option<i32>) -> RepoResult<Admission>;

    /// Count of recorded attempts for the coupon
    fn admitted_count(&self, coupon_id: CouponId) -> RepoResult<i64>;

    /// Drops every recorded attempt for the coupon. Administrative use only.
    fn reset(&self, coupon_id: CouponId) -> RepoResult<()>;
}

/// Quota guard over a redis connection pool. Any redis failure rejects the
/// request: when the fast store cannot answer, nothing is admitted.
pub struct RedisCouponQuotaGuard {
    redis_pool: RedisPool,
}

impl RedisCouponQuotaGuard {
    pub fn new(redis_pool: RedisPool) -> Self {
        Self { redis_pool }
    }

    fn issue_request_key(coupon_id: CouponId) -> String {
        format!("{}:{}", COUPON_ISSUE_REQUEST_NAMESPACE, coupon_id)
    }
}

impl CouponQuotaGuard for RedisCouponQuotaGuard {
    fn available_total_issue_quantity(&self, total_quantity: i32, coupon_id: CouponId) -> RepoResult<bool> {
        let count = self.admitted_count(coupon_id)?;

        Ok(count < i64::from(total_quantity))
    }

    fn admit(&self, coupon_id: CouponId, user_id: UserId, total_quantity: Option<i32>) -> RepoResult<Admission> {
        debug!("Admission check for coupon {} and user {}.", coupon_id, user_id);

        let key = Self::issue_request_key(coupon_id);
        let mut conn = self.redis_pool.get().map_err(|e| e.context(Error::StoreUnavailable))?;

        // SADD and SCARD under MULTI/EXEC: the returned cardinality already
        // contains this attempt, so racing requests each see a distinct count.
        let (newly_added, admitted): (i64, i64) = redis::pipe()
            .atomic()
            .sadd(&key, user_id.0)
            .scard(&key)
            .query(&mut *conn)
            .map_err(|e| e.context(Error::StoreUnavailable))?;

        if newly_added == 0 {
            debug!("Duplicate issue request for coupon {} and user {}.", coupon_id, user_id);
            return Ok(Admission::Duplicate);
        }

        match total_quantity {
            Some(total) if admitted > i64::from(total) => Ok(Admission::CapacityExhausted),
            _ => Ok(Admission::Admitted),
        }
    }

    fn admitted_count(&self, coupon_id: CouponId) -> RepoResult<i64> {
        let key = Self::issue_request_key(coupon_id);
        let mut conn = self.redis_pool.get().map_err(|e| e.context(Error::StoreUnavailable))?;

        let count: i64 = conn.scard(&key).map_err(|e| e.context(Error::StoreUnavailable))?;

        Ok(count)
    }

    fn reset(&self, coupon_id: CouponId) -> RepoResult<()> {
        debug!("Reset issue requests of coupon {}.", coupon_id);

        let key = Self::issue_request_key(coupon_id);
        let mut conn = self.redis_pool.get().map_err(|e| e.context(Error::StoreUnavailable))?;

        let _: i64 = conn.del(&key).map_err(|e| e.context(Error::StoreUnavailable))?;

        Ok(())
    }
}
