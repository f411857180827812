//! Models contains all structures that are used in different
//! modules of the app

pub mod coupon;
pub mod coupon_issue;
pub mod ids;

pub use self::coupon::*;
pub use self::coupon_issue::*;
pub use self::ids::*;
