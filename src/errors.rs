//! Error kinds of the whole app. Every layer attaches context to the
//! occurred error; the controller finds the deepest `Error` in the chain
//! and maps it to an http answer. Errors without an `Error` in their chain
//! are translated to code 500 "Internal server error".

use std::fmt;

use failure::{Context, Error as FailureError};
use hyper::StatusCode;
use validator::ValidationErrors;

use rate_limiter::RateLimit;

/// Finds the deepest app `Error` in a failure chain
pub fn error_kind(err: &FailureError) -> Option<&Error> {
    for fail in err.iter_chain() {
        if let Some(e) = fail.downcast_ref::<Error>() {
            return Some(e);
        }
        if let Some(ctx) = fail.downcast_ref::<Context<Error>>() {
            return Some(ctx.get_context());
        }
    }
    None
}

#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "Not found")]
    NotFound,
    #[fail(display = "Parse error")]
    Parse,
    #[fail(display = "Connection error")]
    Connection,
    #[fail(display = "Server is refusing to fullfil the request")]
    Forbidden,
    #[fail(display = "Validation error")]
    Validate(ValidationErrors),
    #[fail(display = "Voucher limit exceeded")]
    LimitExceeded,
    #[fail(display = "Rate limit exceeded")]
    RateLimited(RateLimit),
    #[fail(display = "Invalid voucher: {}", _0)]
    InvalidVoucher(InvalidVoucherReason),
}

impl Error {
    /// Converts `Error` to HTTP Status Code
    pub fn code(&self) -> StatusCode {
        match *self {
            Error::NotFound => StatusCode::NotFound,
            Error::Parse | Error::Validate(_) | Error::InvalidVoucher(_) => StatusCode::BadRequest,
            Error::Forbidden | Error::LimitExceeded => StatusCode::Forbidden,
            Error::RateLimited(_) => StatusCode::TooManyRequests,
            Error::Connection => StatusCode::InternalServerError,
        }
    }

    /// Stable string code exposed in http bodies
    pub fn kind(&self) -> &'static str {
        match *self {
            Error::NotFound => "NOT_FOUND",
            Error::Parse | Error::Validate(_) => "BAD_REQUEST",
            Error::Forbidden => "FORBIDDEN",
            Error::Connection => "INTERNAL",
            Error::LimitExceeded => "LIMIT_EXCEEDED",
            Error::RateLimited(_) => "RATE_LIMIT_EXCEEDED",
            Error::InvalidVoucher(_) => "INVALID_VOUCHER",
        }
    }
}

/// Precise reason a voucher code was rejected. The http boundary folds all
/// of these into the `INVALID_VOUCHER` code; the message keeps the detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidVoucherReason {
    BadFormat,
    Unknown,
    Inactive,
    NotYetValid,
    Expired,
    UsageLimitReached,
    NotAllowed,
    AlreadyClaimed,
}

impl fmt::Display for InvalidVoucherReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match *self {
            InvalidVoucherReason::BadFormat => "malformed voucher code",
            InvalidVoucherReason::Unknown => "no such voucher code",
            InvalidVoucherReason::Inactive => "voucher code is inactive",
            InvalidVoucherReason::NotYetValid => "voucher code is not valid yet",
            InvalidVoucherReason::Expired => "voucher code has expired",
            InvalidVoucherReason::UsageLimitReached => "voucher code usage limit reached",
            InvalidVoucherReason::NotAllowed => "voucher code is not available for this user",
            InvalidVoucherReason::AlreadyClaimed => "voucher code already claimed by this user",
        };
        write!(f, "{}", msg)
    }
}
