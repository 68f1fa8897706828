//! Error type for `tally-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// Validation or state-machine failure raised by the domain layer.
  #[error(transparent)]
  Core(#[from] tally_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown verification status {0:?} in database")]
  UnknownStatus(String),

  #[error(
    "database schema version {found} is newer than the supported version \
     {supported}"
  )]
  UnsupportedSchema { found: i64, supported: i64 },
}

impl From<tally_core::TransitionError> for Error {
  fn from(e: tally_core::TransitionError) -> Self { Self::Core(e.into()) }
}

impl From<Error> for tally_core::Error {
  fn from(e: Error) -> Self {
    match e {
      Error::Core(core) => core,
      other => tally_core::Error::Storage(Box::new(other)),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
