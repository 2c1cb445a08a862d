table! {
    users (id) {
        id -> Int4,
        email -> Varchar,
        name -> Nullable<Varchar>,
        claimed_vouchers -> Int4,
        voucher_limit -> Int4,
        is_premium -> Bool,
        is_active -> Bool,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

table! {
    voucher_codes (id) {
        id -> Int4,
        code -> Varchar,
        is_active -> Bool,
        usage_limit -> Int4,
        usage_count -> Int4,
        valid_from -> Nullable<Timestamp>,
        expires_at -> Nullable<Timestamp>,
        allowed_users -> Nullable<Array<Int4>>,
        discount_type -> Varchar,
        discount_value -> Float8,
        is_used -> Bool,
        used_by -> Nullable<Int4>,
        used_at -> Nullable<Timestamp>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

table! {
    voucher_claims (id) {
        id -> Int4,
        user_id -> Int4,
        voucher_code -> Varchar,
        status -> Varchar,
        request_id -> Varchar,
        ip -> Nullable<Varchar>,
        user_agent -> Nullable<Varchar>,
        device_id -> Nullable<Varchar>,
        claimed_at -> Timestamp,
        refunded_at -> Nullable<Timestamp>,
        refunded_by -> Nullable<Int4>,
        refund_reason -> Nullable<Varchar>,
    }
}

table! {
    voucher_audit_log (id) {
        id -> Int4,
        user_id -> Int4,
        claim_id -> Nullable<Int4>,
        action -> Varchar,
        metadata -> Nullable<Jsonb>,
        ip -> Nullable<Varchar>,
        created_at -> Timestamp,
    }
}

table! {
    user_sessions (id) {
        id -> Int4,
        user_id -> Int4,
        token_hash -> Varchar,
        is_active -> Bool,
        created_at -> Timestamp,
        expires_at -> Nullable<Timestamp>,
    }
}

table! {
    blacklisted_tokens (id) {
        id -> Int4,
        token_hash -> Varchar,
        user_id -> Nullable<Int4>,
        blacklisted_at -> Timestamp,
        expires_at -> Nullable<Timestamp>,
    }
}
