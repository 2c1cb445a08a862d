use diesel::pg::PgConnection;
use diesel::r2d2::ConnectionManager;
use diesel::result::Error as DieselError;
use failure::{Error as FailureError, Fail};
use r2d2;

use errors::Error;

/// Repos layer Result
pub type RepoResult<T> = Result<T, FailureError>;

pub type DbPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Maps a diesel error to the app error kinds, keeping the cause chain
pub fn map_db_error(e: DieselError) -> FailureError {
    match e {
        DieselError::NotFound => Error::NotFound.into(),
        e => e.context(Error::Connection).into(),
    }
}
