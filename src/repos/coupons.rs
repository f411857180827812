use std::time::SystemTime;

use diesel;
use diesel::connection::AnsiTransactionManager;
use diesel::dsl::sql;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::query_dsl::RunQueryDsl;
use diesel::sql_types::Bool;
use diesel::Connection;
use failure::Error as FailureError;

use models::{Coupon, CouponId, NewCoupon, UpdateCoupon};
use repos::types::RepoResult;
use schema::coupons::dsl as Coupons;

/// Coupons repository, responsible for handling coupons table
pub struct CouponsRepoImpl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> {
    pub db_conn: &'a T,
}

pub trait CouponsRepo {
    /// Creates new coupon
    fn create(&self, payload: NewCoupon) -> RepoResult<Coupon>;

    /// List all coupons
    fn list(&self) -> RepoResult<Vec<Coupon>>;

    /// Get coupon
    fn get(&self, id_arg: CouponId) -> RepoResult<Option<Coupon>>;

    /// Update coupon
    fn update(&self, id_arg: CouponId, payload: UpdateCoupon) -> RepoResult<Coupon>;

    /// Delete coupon
    fn delete(&self, id_arg: CouponId) -> RepoResult<Coupon>;

    /// Issue one unit of the coupon: a single conditional UPDATE that
    /// increments `issued_quantity` only while the quantity cap and the
    /// issue window both hold. Returns the updated row, or `None` when the
    /// predicate admitted nothing. This is the enforcement point of the
    /// quantity invariant; callers never read-modify-write the counter.
    fn issue(&self, id_arg: CouponId, now: SystemTime) -> RepoResult<Option<Coupon>>;
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> CouponsRepoImpl<'a, T> {
    pub fn new(db_conn: &'a T) -> Self {
        Self { db_conn }
    }
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> CouponsRepo
    for CouponsRepoImpl<'a, T>
{
    /// Creates new coupon
    fn create(&self, payload: NewCoupon) -> RepoResult<Coupon> {
        debug!("Create new coupon {:?}.", payload);

        let query = diesel::insert_into(Coupons::coupons).values(&payload);
        query
            .get_result::<Coupon>(self.db_conn)
            .map_err(From::from)
            .map_err(|e: FailureError| e.context(format!("Creates new coupon: {:?} error occurred", payload)).into())
    }

    /// List all coupons
    fn list(&self) -> RepoResult<Vec<Coupon>> {
        debug!("Find all coupons.");
        let query = Coupons::coupons.order(Coupons::id);

        query
            .get_results(self.db_conn)
            .map_err(From::from)
            .map_err(|e: FailureError| e.context("List all coupons").into())
    }

    /// Get coupon
    fn get(&self, id_arg: CouponId) -> RepoResult<Option<Coupon>> {
        debug!("Find in coupon with id {}.", id_arg);
        let query = Coupons::coupons.filter(Coupons::id.eq(&id_arg));
        query
            .get_result(self.db_conn)
            .optional()
            .map_err(From::from)
            .map_err(|e: FailureError| e.context(format!("Find coupon by id: {} error occurred", id_arg)).into())
    }

    /// Update coupon
    fn update(&self, id_arg: CouponId, payload: UpdateCoupon) -> RepoResult<Coupon> {
        debug!("Updating coupon with id {} and payload {:?}.", id_arg, payload);
        let filtered = Coupons::coupons.filter(Coupons::id.eq(&id_arg));
        let query = diesel::update(filtered).set(&payload);

        query
            .get_result::<Coupon>(self.db_conn)
            .map_err(From::from)
            .map_err(|e: FailureError| {
                e.context(format!(
                    "Updates specific coupon: id: {}, payload: {:?}, error occurred",
                    id_arg, payload
                )).into()
            })
    }

    /// Delete coupon
    fn delete(&self, id_arg: CouponId) -> RepoResult<Coupon> {
        debug!("Delete coupon with id {:?}.", id_arg);
        let filtered = Coupons::coupons.filter(Coupons::id.eq(&id_arg));
        let query = diesel::delete(filtered);

        query
            .get_result::<Coupon>(self.db_conn)
            .map_err(From::from)
            .map_err(|e: FailureError| e.context(format!("Delete coupon: {:?} error occurred", id_arg)).into())
    }

    /// Issue one unit of the coupon
    fn issue(&self, id_arg: CouponId, now: SystemTime) -> RepoResult<Option<Coupon>> {
        debug!("Issue one unit of coupon with id {}.", id_arg);

        // The quantity cap lives in the WHERE clause so that check and
        // increment are one statement. Concurrent callers serialize on the
        // row lock; whoever finds the predicate false gets zero rows back.
        let quantity_left = sql::<Bool>("(total_quantity IS NULL OR issued_quantity < total_quantity)");
        let target = Coupons::coupons.filter(
            Coupons::id
                .eq(id_arg)
                .and(Coupons::date_issue_start.lt(now))
                .and(Coupons::date_issue_end.gt(now))
                .and(quantity_left),
        );

        diesel::update(target)
            .set((
                Coupons::issued_quantity.eq(Coupons::issued_quantity + 1),
                Coupons::updated_at.eq(now),
            )).get_result::<Coupon>(self.db_conn)
            .optional()
            .map_err(From::from)
            .map_err(|e: FailureError| e.context(format!("Issue coupon: {} error occurred", id_arg)).into())
    }
}
