//! Models contain app entities and validation rules for payloads

pub mod audit;
pub mod claim;
pub mod session;
pub mod user;
pub mod validation_rules;
pub mod voucher_code;

pub use self::audit::*;
pub use self::claim::*;
pub use self::session::*;
pub use self::user::*;
pub use self::voucher_code::*;
