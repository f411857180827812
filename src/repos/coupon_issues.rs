use diesel;
use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::query_dsl::RunQueryDsl;
use diesel::sql_types::Bool;
use diesel::Connection;
use failure::Error as FailureError;

use models::{CouponId, CouponIssue, NewCouponIssue, UserId};
use repos::types::RepoResult;
use schema::coupon_issues::dsl as CouponIssues;

/// Search issuance records
#[derive(Clone, Debug)]
pub enum CouponIssueSearch {
    Coupon(CouponId),
    User(UserId),
}

/// CouponIssues repository, responsible for handling coupon_issues table
pub struct CouponIssuesRepoImpl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> {
    pub db_conn: &'a T,
}

pub trait CouponIssuesRepo {
    /// Creates new issuance record
    fn create(&self, payload: NewCouponIssue) -> RepoResult<CouponIssue>;

    /// Search issuance records
    fn find_by(&self, search: CouponIssueSearch) -> RepoResult<Vec<CouponIssue>>;

    /// Check that the coupon was already issued to the user
    fn user_has_issue(&self, id_arg: CouponId, user_id_arg: UserId) -> RepoResult<bool>;

    /// Count issuance records of one coupon
    fn count_by_coupon(&self, id_arg: CouponId) -> RepoResult<i64>;

    /// Delete issuance record
    fn delete(&self, id_arg: CouponId, user_id_arg: UserId) -> RepoResult<CouponIssue>;
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> CouponIssuesRepoImpl<'a, T> {
    pub fn new(db_conn: &'a T) -> Self {
        Self { db_conn }
    }
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> CouponIssuesRepo
    for CouponIssuesRepoImpl<'a, T>
{
    /// Creates new issuance record
    fn create(&self, payload: NewCouponIssue) -> RepoResult<CouponIssue> {
        debug!("Create new issuance record {:?}.", payload);

        let query = diesel::insert_into(CouponIssues::coupon_issues).values(&payload);
        query
            .get_result::<CouponIssue>(self.db_conn)
            .map_err(From::from)
            .map_err(|e: FailureError| {
                e.context(format!("Creates new issuance record: {:?} error occurred", payload))
                    .into()
            })
    }

    /// Search issuance records
    fn find_by(&self, search: CouponIssueSearch) -> RepoResult<Vec<CouponIssue>> {
        debug!("Get issuance records by search: {:?}.", search);

        let search_exp: Box<BoxableExpression<CouponIssues::coupon_issues, _, SqlType = Bool>> = match search {
            CouponIssueSearch::Coupon(value) => Box::new(CouponIssues::coupon_id.eq(value)),
            CouponIssueSearch::User(value) => Box::new(CouponIssues::user_id.eq(value)),
        };

        let query = CouponIssues::coupon_issues.filter(search_exp).order(CouponIssues::coupon_id);

        query
            .get_results(self.db_conn)
            .map_err(From::from)
            .map_err(|e: FailureError| e.context("Search issuance records failed.").into())
    }

    /// Check that the coupon was already issued to the user
    fn user_has_issue(&self, id_arg: CouponId, user_id_arg: UserId) -> RepoResult<bool> {
        debug!("Check issuance of coupon_id: {} for user_id: {}.", id_arg, user_id_arg);

        let query = CouponIssues::coupon_issues
            .filter(CouponIssues::coupon_id.eq(&id_arg))
            .filter(CouponIssues::user_id.eq(&user_id_arg));

        query
            .get_result(self.db_conn)
            .optional()
            .map_err(From::from)
            .and_then(|value: Option<CouponIssue>| Ok(value.is_some()))
            .map_err(|e: FailureError| {
                e.context(format!("Check issuance of coupon_id: {} for user_id: {}.", id_arg, user_id_arg))
                    .into()
            })
    }

    /// Count issuance records of one coupon
    fn count_by_coupon(&self, id_arg: CouponId) -> RepoResult<i64> {
        debug!("Count issuance records of coupon_id: {}.", id_arg);

        let query = CouponIssues::coupon_issues.filter(CouponIssues::coupon_id.eq(&id_arg)).count();

        query
            .get_result::<i64>(self.db_conn)
            .map_err(From::from)
            .map_err(|e: FailureError| {
                e.context(format!("Count issuance records of coupon_id: {} error occurred", id_arg))
                    .into()
            })
    }

    /// Delete issuance record
    fn delete(&self, id_arg: CouponId, user_id_arg: UserId) -> RepoResult<CouponIssue> {
        debug!("Delete issuance record with coupon_id {} and user_id: {}.", id_arg, user_id_arg);

        let filtered = CouponIssues::coupon_issues
            .filter(CouponIssues::coupon_id.eq(&id_arg))
            .filter(CouponIssues::user_id.eq(&user_id_arg));

        let query = diesel::delete(filtered);

        query
            .get_result::<CouponIssue>(self.db_conn)
            .map_err(From::from)
            .map_err(|e: FailureError| {
                e.context(format!(
                    "Delete issuance record: by coupon_id: {} and user_id: {} error occurred",
                    id_arg, user_id_arg
                )).into()
            })
    }
}
