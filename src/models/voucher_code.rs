//! Model voucher code
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use errors::InvalidVoucherReason;
use models::UserId;
use schema::voucher_codes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VoucherCodeId(pub i32);

newtype_id!(VoucherCodeId, i32, ::diesel::sql_types::Int4);

/// DB presenting by voucher code
#[derive(Debug, Serialize, Deserialize, Queryable, Clone, Identifiable)]
#[table_name = "voucher_codes"]
pub struct VoucherCode {
    pub id: VoucherCodeId,
    pub code: String,
    pub is_active: bool,
    pub usage_limit: i32,
    pub usage_count: i32,
    pub valid_from: Option<SystemTime>,
    pub expires_at: Option<SystemTime>,
    pub allowed_users: Option<Vec<UserId>>,
    pub discount_type: DiscountType,
    pub discount_value: f64,
    pub is_used: bool,
    pub used_by: Option<UserId>,
    pub used_at: Option<SystemTime>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl VoucherCode {
    pub const MIN_LENGTH_CODE: usize = 6;
    pub const MAX_LENGTH_CODE: usize = 50;

    /// Checks whether the code can be consumed by `user_id` at `now`.
    /// The same predicate runs twice: as a soft check on the front path and
    /// again on the row locked by the claim transaction.
    pub fn eligibility(&self, user_id: UserId, now: SystemTime) -> Result<(), InvalidVoucherReason> {
        if !self.is_active {
            return Err(InvalidVoucherReason::Inactive);
        }
        if self.usage_count >= self.usage_limit {
            return Err(InvalidVoucherReason::UsageLimitReached);
        }
        if let Some(valid_from) = self.valid_from {
            if now < valid_from {
                return Err(InvalidVoucherReason::NotYetValid);
            }
        }
        if let Some(expires_at) = self.expires_at {
            if now >= expires_at {
                return Err(InvalidVoucherReason::Expired);
            }
        }
        if let Some(ref allowed_users) = self.allowed_users {
            if !allowed_users.is_empty() && !allowed_users.contains(&user_id) {
                return Err(InvalidVoucherReason::NotAllowed);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percent,
    Fixed,
}

impl fmt::Display for DiscountType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DiscountType::Percent => write!(f, "percent"),
            DiscountType::Fixed => write!(f, "fixed"),
        }
    }
}

impl FromStr for DiscountType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percent" => Ok(DiscountType::Percent),
            "fixed" => Ok(DiscountType::Fixed),
            _ => Err(()),
        }
    }
}

enum_as_varchar!(DiscountType);

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    fn code_fixture() -> VoucherCode {
        let now = SystemTime::now();
        VoucherCode {
            id: VoucherCodeId(1),
            code: "SUMMER2024".to_string(),
            is_active: true,
            usage_limit: 1000,
            usage_count: 0,
            valid_from: None,
            expires_at: None,
            allowed_users: None,
            discount_type: DiscountType::Percent,
            discount_value: 10.0,
            is_used: false,
            used_by: None,
            used_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn eligibility_accepts_active_code() {
        let code = code_fixture();
        assert!(code.eligibility(UserId(3), SystemTime::now()).is_ok());
    }

    #[test]
    fn eligibility_rejects_inactive_code() {
        let mut code = code_fixture();
        code.is_active = false;
        assert_eq!(
            code.eligibility(UserId(3), SystemTime::now()),
            Err(InvalidVoucherReason::Inactive)
        );
    }

    #[test]
    fn eligibility_rejects_exhausted_code() {
        let mut code = code_fixture();
        code.usage_count = code.usage_limit;
        assert_eq!(
            code.eligibility(UserId(3), SystemTime::now()),
            Err(InvalidVoucherReason::UsageLimitReached)
        );
    }

    #[test]
    fn eligibility_rejects_expired_code() {
        let mut code = code_fixture();
        code.expires_at = Some(SystemTime::now() - Duration::from_secs(3600));
        assert_eq!(
            code.eligibility(UserId(3), SystemTime::now()),
            Err(InvalidVoucherReason::Expired)
        );
    }

    #[test]
    fn eligibility_rejects_code_before_valid_from() {
        let mut code = code_fixture();
        code.valid_from = Some(SystemTime::now() + Duration::from_secs(3600));
        assert_eq!(
            code.eligibility(UserId(3), SystemTime::now()),
            Err(InvalidVoucherReason::NotYetValid)
        );
    }

    #[test]
    fn eligibility_enforces_allowed_users() {
        let mut code = code_fixture();
        code.allowed_users = Some(vec![UserId(7), UserId(8)]);
        assert!(code.eligibility(UserId(7), SystemTime::now()).is_ok());
        assert_eq!(
            code.eligibility(UserId(3), SystemTime::now()),
            Err(InvalidVoucherReason::NotAllowed)
        );
    }

    #[test]
    fn eligibility_ignores_empty_allowed_users() {
        let mut code = code_fixture();
        code.allowed_users = Some(vec![]);
        assert!(code.eligibility(UserId(3), SystemTime::now()).is_ok());
    }
}
