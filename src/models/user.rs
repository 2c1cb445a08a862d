//! Model user
use std::time::SystemTime;

use schema::users;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub i32);

newtype_id!(UserId, i32, ::diesel::sql_types::Int4);

/// DB presenting by user. `claimed_vouchers` is mutated only by the claim
/// and refund transactions and stays within `0..=voucher_limit` at every
/// committed state.
#[derive(Debug, Serialize, Deserialize, Queryable, Clone, Identifiable)]
#[table_name = "users"]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: Option<String>,
    pub claimed_vouchers: i32,
    pub voucher_limit: i32,
    pub is_premium: bool,
    pub is_active: bool,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl User {
    pub fn vouchers_remaining(&self) -> i32 {
        (self.voucher_limit - self.claimed_vouchers).max(0)
    }
}

/// Response for the user summary endpoint
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub user: User,
    pub vouchers_claimed: i32,
    pub voucher_limit: i32,
    pub vouchers_remaining: i32,
    pub recent_claims: Vec<::models::Claim>,
}

impl UserSummary {
    pub fn new(user: User, recent_claims: Vec<::models::Claim>) -> Self {
        let vouchers_claimed = user.claimed_vouchers;
        let voucher_limit = user.voucher_limit;
        let vouchers_remaining = user.vouchers_remaining();
        UserSummary {
            user,
            vouchers_claimed,
            voucher_limit,
            vouchers_remaining,
            recent_claims,
        }
    }
}
