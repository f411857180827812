//! Model coupon_issues
use std::time::SystemTime;

use models::ids::{CouponId, UserId};

use schema::coupon_issues;

/// DB presenting by issuance record. One row per granted coupon unit; the
/// composite primary key keeps a user from ever holding two units of the
/// same coupon.
#[derive(Debug, Serialize, Deserialize, Queryable, Clone, Identifiable, PartialEq)]
#[table_name = "coupon_issues"]
#[primary_key(coupon_id, user_id)]
pub struct CouponIssue {
    pub coupon_id: CouponId,
    pub user_id: UserId,
    pub created_at: SystemTime,
}

/// Payload for creating issuance record
#[derive(Serialize, Deserialize, Insertable, Clone, Debug)]
#[table_name = "coupon_issues"]
pub struct NewCouponIssue {
    pub coupon_id: CouponId,
    pub user_id: UserId,
}

/// Final outcome of one claim request, reported to the consumer
#[derive(Debug, Clone, PartialEq)]
pub enum IssueOutcome {
    Admitted(CouponIssue),
    RejectedDuplicate,
    RejectedQuantityExceeded,
    RejectedOutOfWindow,
}
