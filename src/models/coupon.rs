//! Model coupon
use std::io::Write;
use std::str::FromStr;
use std::time::SystemTime;

use diesel::deserialize::{self, FromSql};
use diesel::pg::Pg;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::VarChar;
use validator::{Validate, ValidationErrors};

use models::ids::CouponId;

use schema::coupons;

/// DB presenting by coupon
#[derive(Debug, Serialize, Deserialize, Queryable, Clone, Identifiable)]
#[table_name = "coupons"]
pub struct Coupon {
    pub id: CouponId,
    pub title: String,
    pub coupon_type: CouponType,
    pub total_quantity: Option<i32>,
    pub issued_quantity: i32,
    pub discount_amount: i32,
    pub min_available_amount: i32,
    pub date_issue_start: SystemTime,
    pub date_issue_end: SystemTime,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

/// Payload for creating coupon
#[derive(Serialize, Deserialize, Insertable, Clone, Validate, Debug)]
#[table_name = "coupons"]
pub struct NewCoupon {
    #[validate(length(min = "1"))]
    pub title: String,
    pub coupon_type: CouponType,
    #[validate(range(min = "0", max = "10000000"))]
    pub total_quantity: Option<i32>,
    #[validate(range(min = "0", max = "10000000"))]
    pub discount_amount: i32,
    #[validate(range(min = "0", max = "10000000"))]
    pub min_available_amount: i32,
    pub date_issue_start: SystemTime,
    pub date_issue_end: SystemTime,
}

impl NewCoupon {
    /// Checks that the issue window is well formed. The window is fixed at
    /// creation and cannot be moved afterwards.
    pub fn validate_window(&self) -> Result<(), ValidationErrors> {
        if self.date_issue_start < self.date_issue_end {
            Ok(())
        } else {
            Err(validation_errors!({"date_issue_end": ["issue_window" => "Issue window start must precede its end"]}))
        }
    }
}

/// Payload for updating coupon
#[derive(Serialize, Deserialize, AsChangeset, Validate, Debug)]
#[table_name = "coupons"]
pub struct UpdateCoupon {
    pub title: Option<String>,
    #[validate(range(min = "0", max = "10000000"))]
    pub total_quantity: Option<i32>,
    #[validate(range(min = "0", max = "10000000"))]
    pub discount_amount: Option<i32>,
    #[validate(range(min = "0", max = "10000000"))]
    pub min_available_amount: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromSqlRow, AsExpression)]
#[sql_type = "VarChar"]
pub enum CouponType {
    FirstComeFirstServed,
    Code,
}

impl CouponType {
    pub fn as_str(&self) -> &'static str {
        match *self {
            CouponType::FirstComeFirstServed => "FIRST_COME_FIRST_SERVED",
            CouponType::Code => "CODE",
        }
    }
}

impl FromStr for CouponType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FIRST_COME_FIRST_SERVED" => Ok(CouponType::FirstComeFirstServed),
            "CODE" => Ok(CouponType::Code),
            other => Err(format!("Unrecognized coupon type: {}", other)),
        }
    }
}

impl ToSql<VarChar, Pg> for CouponType {
    fn to_sql<W: Write>(&self, out: &mut Output<W, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<VarChar, Pg> for CouponType {
    fn from_sql(bytes: Option<&[u8]>) -> deserialize::Result<Self> {
        let value = <String as FromSql<VarChar, Pg>>::from_sql(bytes)?;
        value.parse().map_err(|e: String| e.into())
    }
}

/// Rejection reasons of the coupon state machine
#[derive(Debug, Clone, Copy, PartialEq, Fail)]
pub enum IssueError {
    #[fail(display = "issue quantity exceeded: total {:?}, issued {}", total, issued)]
    QuantityExceeded { total: Option<i32>, issued: i32 },
    #[fail(
        display = "not within issue period: requested {:?}, start {:?}, end {:?}",
        requested, start, end
    )]
    OutOfWindow {
        requested: SystemTime,
        start: SystemTime,
        end: SystemTime,
    },
}

impl Coupon {
    /// Returns true while at least one more unit can be issued.
    /// A coupon without a total quantity is unlimited.
    pub fn available_issue_quantity(&self) -> bool {
        match self.total_quantity {
            None => true,
            Some(total) => total > self.issued_quantity,
        }
    }

    /// Returns true strictly inside the issue window. Both boundary
    /// instants are excluded.
    pub fn available_issue_date(&self, now: SystemTime) -> bool {
        self.date_issue_start < now && now < self.date_issue_end
    }

    /// State transition of one issuance. Checks quantity, then the window,
    /// and increments the issued counter of this in-memory copy.
    ///
    /// The durable counterpart is `CouponsRepo::issue`, a single conditional
    /// UPDATE guarded by the same predicate. Incrementing a loaded row and
    /// writing it back would lose updates under concurrency, so this method
    /// never feeds a save.
    pub fn issue(&mut self, now: SystemTime) -> Result<(), IssueError> {
        if !self.available_issue_quantity() {
            return Err(IssueError::QuantityExceeded {
                total: self.total_quantity,
                issued: self.issued_quantity,
            });
        }

        if !self.available_issue_date(now) {
            return Err(IssueError::OutOfWindow {
                requested: now,
                start: self.date_issue_start,
                end: self.date_issue_end,
            });
        }

        self.issued_quantity += 1;
        Ok(())
    }

    /// Returns true once the window has closed or the quantity is exhausted.
    pub fn is_issue_complete(&self, now: SystemTime) -> bool {
        self.date_issue_end < now || !self.available_issue_quantity()
    }
}
