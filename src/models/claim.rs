//! Model claim
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use validator::Validate;

use models::validation_rules::*;
use models::UserId;
use schema::voucher_claims;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClaimId(pub i32);

newtype_id!(ClaimId, i32, ::diesel::sql_types::Int4);

/// Idempotency key of one logical claim attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

newtype_id!(RequestId, String, ::diesel::sql_types::VarChar);

impl RequestId {
    pub const MAX_LENGTH: usize = 255;

    pub fn generate() -> Self {
        RequestId(::uuid::Uuid::new_v4().hyphenated().to_string())
    }
}

/// Claim lifecycle: `pending` (queued path only) goes to `success` or
/// `failed`; `success` may go to `refunded`. `failed` and `refunded` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Pending,
    Success,
    Failed,
    Refunded,
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ClaimStatus::Pending => write!(f, "pending"),
            ClaimStatus::Success => write!(f, "success"),
            ClaimStatus::Failed => write!(f, "failed"),
            ClaimStatus::Refunded => write!(f, "refunded"),
        }
    }
}

impl FromStr for ClaimStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ClaimStatus::Pending),
            "success" => Ok(ClaimStatus::Success),
            "failed" => Ok(ClaimStatus::Failed),
            "refunded" => Ok(ClaimStatus::Refunded),
            _ => Err(()),
        }
    }
}

enum_as_varchar!(ClaimStatus);

/// DB presenting by claim
#[derive(Debug, Serialize, Deserialize, Queryable, Clone, Identifiable)]
#[table_name = "voucher_claims"]
pub struct Claim {
    pub id: ClaimId,
    pub user_id: UserId,
    pub voucher_code: String,
    pub status: ClaimStatus,
    pub request_id: RequestId,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
    pub claimed_at: SystemTime,
    pub refunded_at: Option<SystemTime>,
    pub refunded_by: Option<UserId>,
    pub refund_reason: Option<String>,
}

/// Payload for creating a claim row
#[derive(Serialize, Deserialize, Insertable, Clone, Debug)]
#[table_name = "voucher_claims"]
pub struct NewClaim {
    pub user_id: UserId,
    pub voucher_code: String,
    pub status: ClaimStatus,
    pub request_id: RequestId,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
}

/// Http body of the claim endpoint
#[derive(Serialize, Deserialize, Validate, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ClaimVoucherPayload {
    #[validate(custom = "validate_voucher_code")]
    pub voucher_code: String,
    pub device_id: Option<String>,
}

/// Full claim attempt as the coordinator and the worker see it; also the
/// queue job payload.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ClaimRequest {
    pub user_id: UserId,
    pub code: String,
    pub request_id: RequestId,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
}

/// Outcome returned to the client and stored under the request id for
/// idempotent retries
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResult {
    pub success: bool,
    pub status: ClaimStatus,
    pub message: String,
    pub request_id: RequestId,
    pub claim_id: Option<ClaimId>,
    pub vouchers_remaining: Option<i32>,
}

impl ClaimResult {
    pub fn succeeded(request_id: RequestId, claim_id: ClaimId, vouchers_remaining: i32) -> Self {
        ClaimResult {
            success: true,
            status: ClaimStatus::Success,
            message: "Voucher claimed".to_string(),
            request_id,
            claim_id: Some(claim_id),
            vouchers_remaining: Some(vouchers_remaining),
        }
    }

    pub fn pending(request_id: RequestId) -> Self {
        ClaimResult {
            success: false,
            status: ClaimStatus::Pending,
            message: "Claim accepted for processing".to_string(),
            request_id,
            claim_id: None,
            vouchers_remaining: None,
        }
    }
}

/// Http body of the refund endpoint
#[derive(Serialize, Deserialize, Validate, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RefundPayload {
    pub claim_id: ClaimId,
    #[validate(length(min = "1", max = "500"))]
    pub reason: String,
}

/// Response of the claim status endpoint
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ClaimStatusResponse {
    pub request_id: RequestId,
    pub status: ClaimStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ClaimResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<String>,
}
