//! Repos is a module responsible for interacting with the stores:
//! postgres for the authoritative coupon state and redis for the
//! fast-path admission sets.

pub mod coupon_issues;
pub mod coupons;
pub mod quota;
pub mod repo_factory;
pub mod types;

pub use self::coupon_issues::*;
pub use self::coupons::*;
pub use self::quota::*;
pub use self::repo_factory::*;
pub use self::types::*;
