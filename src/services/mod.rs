//! Services is a core layer for the app business logic: the claim
//! pipeline, refunds, user lookups and the healthcheck.

pub mod claims;
pub mod refunds;
pub mod system;
pub mod types;
pub mod users;

pub use self::claims::*;
pub use self::refunds::*;
pub use self::system::*;
pub use self::users::*;
