use std::io;

use thiserror::Error;

use crate::{
   client::lance::ClientError, envelope::ErrorCode, profiles::ProfileStoreError, vault::VaultError,
};

/// Main error type for lancedesk.
///
/// Every failure that can cross the session boundary ends up here, and
/// [`Error::code`] maps it onto the closed wire taxonomy so lane boundaries can
/// wrap it into an [`Envelope`](crate::envelope::Envelope) without guessing.
#[derive(Debug, Error)]
pub enum Error {
   /// I/O error while touching local files.
   #[error("io error: {0}")]
   Io(#[from] io::Error),

   /// JSON serialization or deserialization error.
   #[error("json error: {0}")]
   Json(#[from] serde_json::Error),

   /// Apache Arrow schema or data error.
   #[error("arrow error: {0}")]
   Arrow(#[from] arrow_schema::ArrowError),

   /// Parquet file could not be read or written.
   #[error("parquet error: {0}")]
   Parquet(#[from] parquet::errors::ParquetError),

   /// Failure reported by the database driver.
   #[error("database error: {0}")]
   Client(#[from] ClientError),

   /// Failure reported by the secret vault.
   #[error("vault error: {0}")]
   Vault(#[from] VaultError),

   /// Failure reported by the profile store.
   #[error("profile store error: {0}")]
   Profiles(#[from] ProfileStoreError),

   /// Caller-supplied input failed validation before reaching the driver.
   #[error("{0}")]
   InvalidArgument(String),

   /// A referenced connection, table, profile or credential does not exist.
   #[error("{kind} not found: {id}")]
   NotFound { kind: &'static str, id: String },

   /// The operation is acknowledged but unsupported by this build.
   #[error("{0} is not implemented")]
   NotImplemented(&'static str),

   /// An envelope carried an error record; the message is surfaced verbatim.
   #[error("{message}")]
   Rejected { code: ErrorCode, message: String },
}

impl Error {
   pub fn invalid(message: impl Into<String>) -> Self {
      Self::InvalidArgument(message.into())
   }

   pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
      Self::NotFound { kind, id: id.into() }
   }

   /// Classifies the error into the wire taxonomy.
   pub fn code(&self) -> ErrorCode {
      match self {
         Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
         Self::NotFound { .. } => ErrorCode::NotFound,
         Self::NotImplemented(_) => ErrorCode::NotImplemented,
         Self::Rejected { code, .. } => *code,
         Self::Client(e) => e.code(),
         Self::Vault(e) => e.code(),
         Self::Io(_) | Self::Json(_) | Self::Arrow(_) | Self::Parquet(_) | Self::Profiles(_) => {
            ErrorCode::Internal
         },
      }
   }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
