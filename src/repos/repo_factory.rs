use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;

use repos::*;

pub trait ReposFactory<C: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static>:
    Clone + Send + 'static
{
    fn create_coupons_repo<'a>(&self, db_conn: &'a C) -> Box<CouponsRepo + 'a>;
    fn create_coupon_issues_repo<'a>(&self, db_conn: &'a C) -> Box<CouponIssuesRepo + 'a>;
}

#[derive(Default, Copy, Clone)]
pub struct ReposFactoryImpl;

impl<C: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> ReposFactory<C> for ReposFactoryImpl {
    fn create_coupons_repo<'a>(&self, db_conn: &'a C) -> Box<CouponsRepo + 'a> {
        Box::new(CouponsRepoImpl::new(db_conn)) as Box<CouponsRepo>
    }

    fn create_coupon_issues_repo<'a>(&self, db_conn: &'a C) -> Box<CouponIssuesRepo + 'a> {
        Box::new(CouponIssuesRepoImpl::new(db_conn)) as Box<CouponIssuesRepo>
    }
}
