//! Session and token models. The core only writes these tables: logout
//! blacklists the presented token and deactivates the user's sessions.
use std::time::SystemTime;

use models::UserId;
use schema::blacklisted_tokens;

/// Payload for blacklisting a bearer token
#[derive(Serialize, Deserialize, Insertable, Clone, Debug)]
#[table_name = "blacklisted_tokens"]
pub struct NewBlacklistedToken {
    pub token_hash: String,
    pub user_id: Option<UserId>,
    pub expires_at: Option<SystemTime>,
}
