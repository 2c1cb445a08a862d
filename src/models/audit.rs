//! Model audit entry. The audit log is an append-only shadow of claim and
//! refund activity; nothing in this service reads it back.
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use serde_json;

use models::{ClaimId, UserId};
use schema::voucher_audit_log;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AuditEntryId(pub i32);

newtype_id!(AuditEntryId, i32, ::diesel::sql_types::Int4);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Claimed,
    Refund,
    LimitReached,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            AuditAction::Claimed => write!(f, "CLAIMED"),
            AuditAction::Refund => write!(f, "REFUND"),
            AuditAction::LimitReached => write!(f, "LIMIT_REACHED"),
        }
    }
}

impl FromStr for AuditAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLAIMED" => Ok(AuditAction::Claimed),
            "REFUND" => Ok(AuditAction::Refund),
            "LIMIT_REACHED" => Ok(AuditAction::LimitReached),
            _ => Err(()),
        }
    }
}

enum_as_varchar!(AuditAction);

/// DB presenting by audit entry
#[derive(Debug, Serialize, Deserialize, Queryable, Clone, Identifiable)]
#[table_name = "voucher_audit_log"]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub user_id: UserId,
    pub claim_id: Option<ClaimId>,
    pub action: AuditAction,
    pub metadata: Option<serde_json::Value>,
    pub ip: Option<String>,
    pub created_at: SystemTime,
}

/// Payload for appending an audit entry
#[derive(Serialize, Deserialize, Insertable, Clone, Debug)]
#[table_name = "voucher_audit_log"]
pub struct NewAuditEntry {
    pub user_id: UserId,
    pub claim_id: Option<ClaimId>,
    pub action: AuditAction,
    pub metadata: Option<serde_json::Value>,
    pub ip: Option<String>,
}
