/// diesel table for coupons
table! {
    coupons (id) {
        id -> Int8,
        title -> VarChar,
        coupon_type -> VarChar,
        total_quantity -> Nullable<Int4>,
        issued_quantity -> Int4,
        discount_amount -> Int4,
        min_available_amount -> Int4,
        date_issue_start -> Timestamp,
        date_issue_end -> Timestamp,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

/// diesel table for coupon issuance records
table! {
    coupon_issues (coupon_id, user_id) {
        coupon_id -> Int8,
        user_id -> Int8,
        created_at -> Timestamp,
    }
}

joinable!(coupon_issues -> coupons (coupon_id));

allow_tables_to_appear_in_same_query!(coupons, coupon_issues);
