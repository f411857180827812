//! Coupons Services, presents CRUD operations with coupons and the
//! issuance flow gated by the quota guard

use std::time::SystemTime;

use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;
use r2d2::ManageConnection;

use failure::Error as FailureError;
use futures::future;
use validator::Validate;

use super::types::ServiceFuture;
use errors::Error;
use models::*;
use repos::quota::Admission;
use repos::{CouponIssueSearch, ReposFactory};
use services::Service;

pub trait CouponsService {
    /// Creates new coupon
    fn create_coupon(&self, payload: NewCoupon) -> ServiceFuture<Coupon>;
    /// Returns all coupons
    fn list_coupons(&self) -> ServiceFuture<Vec<Coupon>>;
    /// Returns coupon by id
    fn get_coupon(&self, id_arg: CouponId) -> ServiceFuture<Option<Coupon>>;
    /// Update coupon
    fn update_coupon(&self, id_arg: CouponId, payload: UpdateCoupon) -> ServiceFuture<Coupon>;
    /// Deletes coupon
    fn delete_coupon(&self, id_arg: CouponId) -> ServiceFuture<Coupon>;
    /// Issues one unit of the coupon to the requesting user
    fn issue_coupon(&self, id_arg: CouponId) -> ServiceFuture<IssueOutcome>;
    /// Returns true once the coupon can no longer be issued
    fn is_issue_complete(&self, id_arg: CouponId) -> ServiceFuture<bool>;
    /// Search issuance records
    fn list_coupon_issues(&self, search: CouponIssueSearch) -> ServiceFuture<Vec<CouponIssue>>;
}

impl<M, F> CouponsService for Service<M, F>
where
    M: ManageConnection,
    M::Connection: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager>,
    F: ReposFactory<M::Connection>,
{
    /// Creates new coupon
    fn create_coupon(&self, payload: NewCoupon) -> ServiceFuture<Coupon> {
        let repo_factory = self.static_context.repo_factory.clone();

        self.spawn_on_pool(move |conn| {
            payload
                .validate()
                .and_then(|_| payload.validate_window())
                .map_err(|e| FailureError::from(Error::Validate(e)))?;

            let coupon_repo = repo_factory.create_coupons_repo(&*conn);
            conn.transaction::<Coupon, FailureError, _>(move || {
                coupon_repo
                    .create(payload)
                    .map_err(|e| e.context("Service Coupons, create_coupon endpoint error occurred.").into())
            })
        })
    }

    /// Returns all coupons
    fn list_coupons(&self) -> ServiceFuture<Vec<Coupon>> {
        let repo_factory = self.static_context.repo_factory.clone();

        self.spawn_on_pool(move |conn| {
            let coupon_repo = repo_factory.create_coupons_repo(&*conn);

            coupon_repo
                .list()
                .map_err(|e| e.context("Service Coupons, list_coupons endpoint error occurred.").into())
        })
    }

    /// Returns coupon by id
    fn get_coupon(&self, id_arg: CouponId) -> ServiceFuture<Option<Coupon>> {
        let repo_factory = self.static_context.repo_factory.clone();

        self.spawn_on_pool(move |conn| {
            let coupon_repo = repo_factory.create_coupons_repo(&*conn);

            coupon_repo
                .get(id_arg)
                .map_err(|e| e.context("Service Coupons, get_coupon endpoint error occurred.").into())
        })
    }

    /// Update coupon
    fn update_coupon(&self, id_arg: CouponId, payload: UpdateCoupon) -> ServiceFuture<Coupon> {
        let repo_factory = self.static_context.repo_factory.clone();

        self.spawn_on_pool(move |conn| {
            payload.validate().map_err(|e| FailureError::from(Error::Validate(e)))?;

            let coupon_repo = repo_factory.create_coupons_repo(&*conn);

            coupon_repo
                .update(id_arg, payload)
                .map_err(|e| e.context("Service Coupons, update_coupon endpoint error occurred.").into())
        })
    }

    /// Deletes coupon. A coupon referenced by issuance records stays.
    fn delete_coupon(&self, id_arg: CouponId) -> ServiceFuture<Coupon> {
        let repo_factory = self.static_context.repo_factory.clone();

        self.spawn_on_pool(move |conn| {
            let coupon_repo = repo_factory.create_coupons_repo(&*conn);
            let coupon_issues_repo = repo_factory.create_coupon_issues_repo(&*conn);

            conn.transaction::<Coupon, FailureError, _>(move || {
                let issued = coupon_issues_repo.count_by_coupon(id_arg)?;
                if issued > 0 {
                    return Err(format_err!("Coupon {} has {} issuance records", id_arg, issued)
                        .context(Error::Forbidden)
                        .into());
                }

                coupon_repo.delete(id_arg)
            }).map_err(|e| e.context("Service Coupons, delete_coupon endpoint error occurred.").into())
        })
    }

    /// Issues one unit of the coupon to the requesting user.
    ///
    /// The quota guard first records the attempt in the fast store; only
    /// admitted requests continue to the durable store, where the
    /// conditional increment and the issuance record commit in one
    /// transaction.
    fn issue_coupon(&self, id_arg: CouponId) -> ServiceFuture<IssueOutcome> {
        let user_id = match self.dynamic_context.user_id {
            Some(user_id) => user_id,
            None => {
                return Box::new(future::err(
                    format_err!("Denied request to issue coupon {} for unauthorized user", id_arg)
                        .context(Error::Forbidden)
                        .into(),
                ));
            }
        };

        let repo_factory = self.static_context.repo_factory.clone();
        let coupon_quota = self.static_context.coupon_quota.clone();

        self.spawn_on_pool(move |conn| {
            {
                let coupon_repo = repo_factory.create_coupons_repo(&*conn);
                let coupon_issues_repo = repo_factory.create_coupon_issues_repo(&*conn);
                let now = SystemTime::now();

                let coupon = coupon_repo.get(id_arg)?.ok_or_else(|| {
                    FailureError::from(format_err!("Coupon {} not found", id_arg).context(Error::NotFound))
                })?;

                match coupon_quota.admit(id_arg, user_id, coupon.total_quantity)? {
                    Admission::Duplicate => Ok(IssueOutcome::RejectedDuplicate),
                    Admission::CapacityExhausted => Ok(IssueOutcome::RejectedQuantityExceeded),
                    Admission::Admitted => conn.transaction::<IssueOutcome, FailureError, _>(move || {
                        // Backstop against a reset fast store: the issuance
                        // record is the durable memory of this user.
                        if coupon_issues_repo.user_has_issue(id_arg, user_id)? {
                            return Ok(IssueOutcome::RejectedDuplicate);
                        }

                        match coupon_repo.issue(id_arg, now)? {
                            Some(coupon) => {
                                let record = coupon_issues_repo.create(NewCouponIssue {
                                    coupon_id: coupon.id,
                                    user_id,
                                })?;
                                info!("Issued coupon {} to user {}.", coupon.id, user_id);

                                Ok(IssueOutcome::Admitted(record))
                            }
                            None => {
                                let current = coupon_repo.get(id_arg)?.ok_or_else(|| {
                                    FailureError::from(format_err!("Coupon {} not found", id_arg).context(Error::NotFound))
                                })?;

                                if !current.available_issue_date(now) {
                                    Ok(IssueOutcome::RejectedOutOfWindow)
                                } else {
                                    // Fast-path admission was stale; the
                                    // durable predicate is the authority.
                                    Ok(IssueOutcome::RejectedQuantityExceeded)
                                }
                            }
                        }
                    }),
                }
            }.map_err(|e: FailureError| e.context("Service Coupons, issue_coupon endpoint error occurred.").into())
        })
    }

    /// Returns true once the coupon can no longer be issued
    fn is_issue_complete(&self, id_arg: CouponId) -> ServiceFuture<bool> {
        let repo_factory = self.static_context.repo_factory.clone();

        self.spawn_on_pool(move |conn| {
            {
                let coupon_repo = repo_factory.create_coupons_repo(&*conn);

                let coupon = coupon_repo.get(id_arg)?.ok_or_else(|| {
                    FailureError::from(format_err!("Coupon {} not found", id_arg).context(Error::NotFound))
                })?;

                Ok(coupon.is_issue_complete(SystemTime::now()))
            }.map_err(|e: FailureError| {
                e.context("Service Coupons, is_issue_complete endpoint error occurred.").into()
            })
        })
    }

    /// Search issuance records
    fn list_coupon_issues(&self, search: CouponIssueSearch) -> ServiceFuture<Vec<CouponIssue>> {
        let repo_factory = self.static_context.repo_factory.clone();

        self.spawn_on_pool(move |conn| {
            let coupon_issues_repo = repo_factory.create_coupon_issues_repo(&*conn);

            coupon_issues_repo
                .find_by(search)
                .map_err(|e| e.context("Service Coupons, list_coupon_issues endpoint error occurred.").into())
        })
    }
}

#[cfg(test)]
pub mod tests {
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    use futures::future;
    use tokio_core::reactor::Core;

    use models::*;
    use repos::repo_factory::tests::*;
    use repos::CouponIssueSearch;
    use services::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    pub fn create_new_coupon(total_quantity: Option<i32>, start: SystemTime, end: SystemTime) -> NewCoupon {
        NewCoupon {
            title: "title".to_string(),
            coupon_type: CouponType::FirstComeFirstServed,
            total_quantity,
            discount_amount: 1000,
            min_available_amount: 5000,
            date_issue_start: start,
            date_issue_end: end,
        }
    }

    fn open_coupon(total_quantity: Option<i32>) -> NewCoupon {
        let now = SystemTime::now();
        create_new_coupon(total_quantity, now - DAY, now + DAY)
    }

    fn admitted_count(outcomes: &[IssueOutcome]) -> usize {
        outcomes
            .iter()
            .filter(|outcome| match **outcome {
                IssueOutcome::Admitted(_) => true,
                _ => false,
            }).count()
    }

    #[test]
    fn test_create_coupon() {
        let mut core = Core::new().unwrap();
        let service = create_service(Some(MOCK_USER_ID));
        let work = service.create_coupon(open_coupon(Some(10)));
        let result = core.run(work).unwrap();
        assert_eq!(result.id, MOCK_COUPON_ID);
        assert_eq!(result.issued_quantity, 0);
    }

    #[test]
    fn test_create_coupon_with_invalid_window() {
        let mut core = Core::new().unwrap();
        let service = create_service(Some(MOCK_USER_ID));
        let now = SystemTime::now();
        let work = service.create_coupon(create_new_coupon(Some(10), now + DAY, now - DAY));
        let result = core.run(work);
        assert!(result.is_err());
    }

    #[test]
    fn test_create_coupon_with_negative_discount() {
        let mut core = Core::new().unwrap();
        let service = create_service(Some(MOCK_USER_ID));
        let mut payload = open_coupon(Some(10));
        payload.discount_amount = -1;
        let work = service.create_coupon(payload);
        let result = core.run(work);
        assert!(result.is_err());
    }

    #[test]
    fn test_get_coupon() {
        let mut core = Core::new().unwrap();
        let service = create_service(Some(MOCK_USER_ID));
        core.run(service.create_coupon(open_coupon(Some(10)))).unwrap();
        let result = core.run(service.get_coupon(MOCK_COUPON_ID)).unwrap();
        assert_eq!(result.map(|coupon| coupon.id), Some(MOCK_COUPON_ID));
    }

    #[test]
    fn test_get_coupon_missing() {
        let mut core = Core::new().unwrap();
        let service = create_service(Some(MOCK_USER_ID));
        let result = core.run(service.get_coupon(MOCK_COUPON_ID)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_list_coupons() {
        let mut core = Core::new().unwrap();
        let service = create_service(Some(MOCK_USER_ID));
        core.run(service.create_coupon(open_coupon(Some(10)))).unwrap();
        core.run(service.create_coupon(open_coupon(None))).unwrap();
        let result = core.run(service.list_coupons()).unwrap();
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_update_coupon() {
        let mut core = Core::new().unwrap();
        let service = create_service(Some(MOCK_USER_ID));
        let coupon = core.run(service.create_coupon(open_coupon(Some(10)))).unwrap();
        let payload = UpdateCoupon {
            title: Some("updated title".to_string()),
            total_quantity: Some(20),
            discount_amount: None,
            min_available_amount: None,
        };
        let result = core.run(service.update_coupon(coupon.id, payload)).unwrap();
        assert_eq!(result.title, "updated title".to_string());
        assert_eq!(result.total_quantity, Some(20));
        assert_eq!(result.discount_amount, coupon.discount_amount);
    }

    #[test]
    fn test_update_coupon_with_negative_quantity() {
        let mut core = Core::new().unwrap();
        let service = create_service(Some(MOCK_USER_ID));
        let coupon = core.run(service.create_coupon(open_coupon(Some(10)))).unwrap();
        let payload = UpdateCoupon {
            title: None,
            total_quantity: Some(-5),
            discount_amount: None,
            min_available_amount: None,
        };
        let result = core.run(service.update_coupon(coupon.id, payload));
        assert!(result.is_err());
    }

    #[test]
    fn test_delete_coupon() {
        let mut core = Core::new().unwrap();
        let service = create_service(Some(MOCK_USER_ID));
        let coupon = core.run(service.create_coupon(open_coupon(Some(10)))).unwrap();
        let result = core.run(service.delete_coupon(coupon.id)).unwrap();
        assert_eq!(result.id, coupon.id);
        let result = core.run(service.get_coupon(coupon.id)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_delete_coupon_with_issuance_records() {
        let mut core = Core::new().unwrap();
        let service = create_service(Some(MOCK_USER_ID));
        let coupon = core.run(service.create_coupon(open_coupon(Some(10)))).unwrap();
        core.run(service.issue_coupon(coupon.id)).unwrap();
        let result = core.run(service.delete_coupon(coupon.id));
        assert!(result.is_err());
    }

    #[test]
    fn test_issue_coupon_admitted() {
        let mut core = Core::new().unwrap();
        let service = create_service(Some(MOCK_USER_ID));
        let coupon = core.run(service.create_coupon(open_coupon(Some(10)))).unwrap();

        let outcome = core.run(service.issue_coupon(coupon.id)).unwrap();

        match outcome {
            IssueOutcome::Admitted(record) => {
                assert_eq!(record.coupon_id, coupon.id);
                assert_eq!(record.user_id, MOCK_USER_ID);
            }
            other => panic!("Expected admission, got {:?}", other),
        }

        let coupon = core.run(service.get_coupon(coupon.id)).unwrap().unwrap();
        assert_eq!(coupon.issued_quantity, 1);
    }

    #[test]
    fn test_issue_coupon_rejects_duplicate_user() {
        let mut core = Core::new().unwrap();
        let service = create_service(Some(MOCK_USER_ID));
        let coupon = core.run(service.create_coupon(open_coupon(Some(10)))).unwrap();

        core.run(service.issue_coupon(coupon.id)).unwrap();
        let outcome = core.run(service.issue_coupon(coupon.id)).unwrap();

        assert_eq!(outcome, IssueOutcome::RejectedDuplicate);

        let coupon = core.run(service.get_coupon(coupon.id)).unwrap().unwrap();
        assert_eq!(coupon.issued_quantity, 1);
    }

    #[test]
    fn test_issue_coupon_rejects_when_quantity_exhausted() {
        let mut core = Core::new().unwrap();
        let repo_factory = ReposFactoryMock::default();
        let coupon_quota = Arc::new(InMemoryQuotaGuard::default());

        let first = create_service_with(repo_factory.clone(), coupon_quota.clone(), Some(UserId(1)));
        let second = create_service_with(repo_factory.clone(), coupon_quota.clone(), Some(UserId(2)));

        let coupon = core.run(first.create_coupon(open_coupon(Some(1)))).unwrap();

        let outcome = core.run(first.issue_coupon(coupon.id)).unwrap();
        assert_eq!(admitted_count(&[outcome]), 1);

        let outcome = core.run(second.issue_coupon(coupon.id)).unwrap();
        assert_eq!(outcome, IssueOutcome::RejectedQuantityExceeded);

        let coupon = core.run(first.get_coupon(coupon.id)).unwrap().unwrap();
        assert_eq!(coupon.issued_quantity, 1);
    }

    #[test]
    fn test_issue_coupon_rejects_outside_window() {
        let mut core = Core::new().unwrap();
        let service = create_service(Some(MOCK_USER_ID));
        let now = SystemTime::now();
        let coupon = core
            .run(service.create_coupon(create_new_coupon(Some(10), now + DAY, now + 2 * DAY)))
            .unwrap();

        let outcome = core.run(service.issue_coupon(coupon.id)).unwrap();

        assert_eq!(outcome, IssueOutcome::RejectedOutOfWindow);

        let coupon = core.run(service.get_coupon(coupon.id)).unwrap().unwrap();
        assert_eq!(coupon.issued_quantity, 0);
    }

    #[test]
    fn test_issue_coupon_unlimited_quantity() {
        let mut core = Core::new().unwrap();
        let repo_factory = ReposFactoryMock::default();
        let coupon_quota = Arc::new(InMemoryQuotaGuard::default());

        let admin = create_service_with(repo_factory.clone(), coupon_quota.clone(), Some(MOCK_USER_ID));
        let coupon = core.run(admin.create_coupon(open_coupon(None))).unwrap();

        for user in 1..4i64 {
            let service = create_service_with(repo_factory.clone(), coupon_quota.clone(), Some(UserId(user)));
            let outcome = core.run(service.issue_coupon(coupon.id)).unwrap();
            assert_eq!(admitted_count(&[outcome]), 1);
        }

        let coupon = core.run(admin.get_coupon(coupon.id)).unwrap().unwrap();
        assert_eq!(coupon.issued_quantity, 3);
    }

    #[test]
    fn test_issue_coupon_unauthorized() {
        let mut core = Core::new().unwrap();
        let service = create_service(None);
        let result = core.run(service.issue_coupon(MOCK_COUPON_ID));
        assert!(result.is_err());
    }

    #[test]
    fn test_issue_coupon_missing_coupon() {
        let mut core = Core::new().unwrap();
        let service = create_service(Some(MOCK_USER_ID));
        let result = core.run(service.issue_coupon(MOCK_COUPON_ID));
        assert!(result.is_err());
    }

    #[test]
    fn test_is_issue_complete() {
        let mut core = Core::new().unwrap();
        let service = create_service(Some(MOCK_USER_ID));
        let now = SystemTime::now();

        let open = core.run(service.create_coupon(open_coupon(Some(10)))).unwrap();
        assert!(!core.run(service.is_issue_complete(open.id)).unwrap());

        let closed = core
            .run(service.create_coupon(create_new_coupon(Some(10), now - 2 * DAY, now - DAY)))
            .unwrap();
        assert!(core.run(service.is_issue_complete(closed.id)).unwrap());

        let scarce = core.run(service.create_coupon(open_coupon(Some(1)))).unwrap();
        core.run(service.issue_coupon(scarce.id)).unwrap();
        assert!(core.run(service.is_issue_complete(scarce.id)).unwrap());
    }

    #[test]
    fn test_list_coupon_issues() {
        let mut core = Core::new().unwrap();
        let repo_factory = ReposFactoryMock::default();
        let coupon_quota = Arc::new(InMemoryQuotaGuard::default());

        let first = create_service_with(repo_factory.clone(), coupon_quota.clone(), Some(UserId(1)));
        let second = create_service_with(repo_factory.clone(), coupon_quota.clone(), Some(UserId(2)));

        let coupon = core.run(first.create_coupon(open_coupon(Some(10)))).unwrap();
        core.run(first.issue_coupon(coupon.id)).unwrap();
        core.run(second.issue_coupon(coupon.id)).unwrap();

        let by_coupon = core
            .run(first.list_coupon_issues(CouponIssueSearch::Coupon(coupon.id)))
            .unwrap();
        assert_eq!(by_coupon.len(), 2);

        let by_user = core.run(first.list_coupon_issues(CouponIssueSearch::User(UserId(2)))).unwrap();
        assert_eq!(by_user.len(), 1);
    }

    #[test]
    fn test_concurrent_issue_single_admission_per_user() {
        let mut core = Core::new().unwrap();
        let repo_factory = ReposFactoryMock::default();
        let coupon_quota = Arc::new(InMemoryQuotaGuard::default());

        let admin = create_service_with(repo_factory.clone(), coupon_quota.clone(), Some(MOCK_USER_ID));
        let coupon = core.run(admin.create_coupon(open_coupon(Some(10)))).unwrap();

        let racer_a = create_service_with(repo_factory.clone(), coupon_quota.clone(), Some(UserId(7)));
        let racer_b = create_service_with(repo_factory.clone(), coupon_quota.clone(), Some(UserId(7)));

        let outcomes = core
            .run(future::join_all(vec![
                racer_a.issue_coupon(coupon.id),
                racer_b.issue_coupon(coupon.id),
            ])).unwrap();

        assert_eq!(admitted_count(&outcomes), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|outcome| **outcome == IssueOutcome::RejectedDuplicate)
                .count(),
            1
        );

        let coupon = core.run(admin.get_coupon(coupon.id)).unwrap().unwrap();
        assert_eq!(coupon.issued_quantity, 1);
    }

    #[test]
    fn test_concurrent_issue_respects_total_quantity() {
        let total = 5;
        let requesters = 20i64;

        let mut core = Core::new().unwrap();
        let repo_factory = ReposFactoryMock::default();
        let coupon_quota = Arc::new(InMemoryQuotaGuard::default());

        let admin = create_service_with(repo_factory.clone(), coupon_quota.clone(), Some(MOCK_USER_ID));
        let coupon = core.run(admin.create_coupon(open_coupon(Some(total)))).unwrap();

        let services = (0..requesters)
            .map(|user| create_service_with(repo_factory.clone(), coupon_quota.clone(), Some(UserId(100 + user))))
            .collect::<Vec<_>>();
        let works = services.iter().map(|service| service.issue_coupon(coupon.id)).collect::<Vec<_>>();

        let outcomes = core.run(future::join_all(works)).unwrap();

        assert_eq!(admitted_count(&outcomes) as i32, total);
        assert_eq!(
            outcomes
                .iter()
                .filter(|outcome| **outcome == IssueOutcome::RejectedQuantityExceeded)
                .count() as i64,
            requesters - i64::from(total)
        );

        let coupon = core.run(admin.get_coupon(coupon.id)).unwrap().unwrap();
        assert_eq!(coupon.issued_quantity, total);

        let records = core
            .run(admin.list_coupon_issues(CouponIssueSearch::Coupon(coupon.id)))
            .unwrap();
        assert_eq!(records.len() as i32, total);
    }
}
