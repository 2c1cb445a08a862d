//! Repos is a layer that provides access to the database tables. Every repo
//! borrows a pooled connection; transactions are opened by the service that
//! composes the repos.

pub mod audit;
pub mod claims;
pub mod repo_factory;
pub mod sessions;
pub mod types;
pub mod users;
pub mod voucher_codes;

pub use self::audit::*;
pub use self::claims::*;
pub use self::repo_factory::*;
pub use self::sessions::*;
pub use self::types::*;
pub use self::users::*;
pub use self::voucher_codes::*;
