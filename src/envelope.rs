//! Versioned success/error envelope and the dual-format data chunk.
//!
//! Every operation that crosses the UI boundary answers with an
//! [`Envelope<T>`]. On the wire it is the flat object
//! `{apiVersion, ok, data?, error?}`; in memory the payload and the error are a
//! `Result`, so "both present" and "both absent" cannot be represented.

use std::io::Cursor;

use arrow_array::RecordBatch;
use arrow_ipc::reader::StreamReader;
use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::{
   error::{Error, Result},
   schema::SchemaDefinition,
};

/// Wire protocol version tag.
///
/// Incompatible wire changes add a variant instead of reshaping `V1`; an
/// unknown tag fails deserialization rather than being guessed at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiVersion {
   #[default]
   V1,
}

/// Closed error taxonomy shared by every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
   InvalidArgument,
   NotFound,
   Internal,
   NotImplemented,
}

impl ErrorCode {
   pub const fn as_str(self) -> &'static str {
      match self {
         Self::InvalidArgument => "invalid_argument",
         Self::NotFound => "not_found",
         Self::Internal => "internal",
         Self::NotImplemented => "not_implemented",
      }
   }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
   pub code:    ErrorCode,
   pub message: String,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub details: Option<serde_json::Value>,
}

/// Universal response wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
   version: ApiVersion,
   outcome: std::result::Result<T, ErrorRecord>,
}

impl<T> Envelope<T> {
   pub const fn ok(data: T) -> Self {
      Self { version: ApiVersion::V1, outcome: Ok(data) }
   }

   pub fn err(code: ErrorCode, message: impl Into<String>) -> Self {
      Self::err_with_details(code, message, None)
   }

   pub fn err_with_details(
      code: ErrorCode,
      message: impl Into<String>,
      details: Option<serde_json::Value>,
   ) -> Self {
      Self {
         version: ApiVersion::V1,
         outcome: Err(ErrorRecord { code, message: message.into(), details }),
      }
   }

   /// Wraps a crate error, classifying it into the wire taxonomy.
   pub fn from_error(error: &Error) -> Self {
      Self::err(error.code(), error.to_string())
   }

   pub fn from_result(result: Result<T>) -> Self {
      match result {
         Ok(data) => Self::ok(data),
         Err(e) => Self::from_error(&e),
      }
   }

   pub const fn version(&self) -> ApiVersion {
      self.version
   }

   pub const fn is_ok(&self) -> bool {
      self.outcome.is_ok()
   }

   pub fn data(&self) -> Option<&T> {
      self.outcome.as_ref().ok()
   }

   pub fn error(&self) -> Option<&ErrorRecord> {
      self.outcome.as_ref().err()
   }

   pub const fn as_result(&self) -> std::result::Result<&T, &ErrorRecord> {
      self.outcome.as_ref()
   }

   /// Consumer-side unwrap: the payload, or an error carrying the envelope's
   /// message and code.
   pub fn into_data(self) -> Result<T> {
      self
         .outcome
         .map_err(|record| Error::Rejected { code: record.code, message: record.message })
   }

   pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
      Envelope { version: self.version, outcome: self.outcome.map(f) }
   }
}

impl<T> From<Result<T>> for Envelope<T> {
   fn from(result: Result<T>) -> Self {
      Self::from_result(result)
   }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRef<'a, T> {
   api_version: ApiVersion,
   ok:          bool,
   #[serde(skip_serializing_if = "Option::is_none")]
   data:        Option<&'a T>,
   #[serde(skip_serializing_if = "Option::is_none")]
   error:       Option<&'a ErrorRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Wire<T> {
   #[serde(default)]
   api_version: ApiVersion,
   ok:          bool,
   data:        Option<T>,
   error:       Option<ErrorRecord>,
}

impl<T: Serialize> Serialize for Envelope<T> {
   fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
      WireRef {
         api_version: self.version,
         ok:          self.outcome.is_ok(),
         data:        self.outcome.as_ref().ok(),
         error:       self.outcome.as_ref().err(),
      }
      .serialize(serializer)
   }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Envelope<T> {
   fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
      let wire = Wire::<T>::deserialize(deserializer)?;
      let outcome = match (wire.ok, wire.data, wire.error) {
         (true, Some(data), None) => Ok(data),
         (false, None, Some(error)) => Err(error),
         (true, _, _) => {
            return Err(de::Error::custom("ok envelope must carry data and no error"));
         },
         (false, _, _) => {
            return Err(de::Error::custom("failed envelope must carry an error and no data"));
         },
      };
      Ok(Self { version: wire.api_version, outcome })
   }
}

/// Payload format requested from a scan or query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
   #[default]
   Json,
   Arrow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonChunk {
   pub rows:   Vec<serde_json::Value>,
   pub schema: SchemaDefinition,
   pub offset: usize,
   pub limit:  usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrowChunk {
   pub ipc_base64:  String,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub compression: Option<String>,
}

impl ArrowChunk {
   /// Decodes the base64 Arrow IPC stream back into record batches.
   pub fn decode(&self) -> Result<Vec<RecordBatch>> {
      if let Some(compression) = &self.compression {
         return Err(Error::invalid(format!("unsupported chunk compression: {compression}")));
      }
      let bytes = general_purpose::STANDARD
         .decode(&self.ipc_base64)
         .map_err(|e| Error::invalid(format!("invalid base64 payload: {e}")))?;
      let reader = StreamReader::try_new(Cursor::new(bytes), None)?;
      Ok(reader.collect::<std::result::Result<Vec<_>, _>>()?)
   }
}

/// Tagged payload: row-oriented JSON or base64 Arrow IPC, discriminated by
/// the `format` field on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum DataChunk {
   Json(JsonChunk),
   Arrow(ArrowChunk),
}

impl DataChunk {
   pub const fn format(&self) -> DataFormat {
      match self {
         Self::Json(_) => DataFormat::Json,
         Self::Arrow(_) => DataFormat::Arrow,
      }
   }

   pub const fn as_json(&self) -> Option<&JsonChunk> {
      match self {
         Self::Json(chunk) => Some(chunk),
         Self::Arrow(_) => None,
      }
   }

   pub const fn as_arrow(&self) -> Option<&ArrowChunk> {
      match self {
         Self::Arrow(chunk) => Some(chunk),
         Self::Json(_) => None,
      }
   }
}
