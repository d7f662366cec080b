use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
   envelope::{DataChunk, DataFormat},
   schema::FieldType,
};

/// Storage backend inferred from a connection URI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
   Local,
   S3,
   Gcs,
   Azure,
   Remote,
   Unknown,
}

pub fn infer_backend_kind(uri: &str) -> BackendKind {
   let lower = uri.trim().to_ascii_lowercase();
   if lower.starts_with("s3://") || lower.starts_with("s3+ddb://") {
      BackendKind::S3
   } else if lower.starts_with("gs://") {
      BackendKind::Gcs
   } else if lower.starts_with("az://") {
      BackendKind::Azure
   } else if lower.starts_with("db://") {
      BackendKind::Remote
   } else if lower.starts_with("file://") {
      BackendKind::Local
   } else if lower.contains("://") {
      BackendKind::Unknown
   } else {
      BackendKind::Local
   }
}

/// How a profile authenticates against its backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthDescriptor {
   #[default]
   None,
   Inline {
      provider: String,
      params:   HashMap<String, String>,
   },
   SecretRef {
      provider:  String,
      reference: String,
   },
}

impl AuthDescriptor {
   /// The vault reference this descriptor points at, if any.
   pub fn secret_reference(&self) -> Option<&str> {
      match self {
         Self::SecretRef { reference, .. } => Some(reference),
         Self::None | Self::Inline { .. } => None,
      }
   }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectOptions {
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub read_consistency_interval_seconds: Option<u64>,
}

/// Persisted, named connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfile {
   pub id:              String,
   pub name:            String,
   pub uri:             String,
   #[serde(default)]
   pub storage_options: HashMap<String, String>,
   #[serde(default)]
   pub options:         ConnectOptions,
   #[serde(default)]
   pub auth:            AuthDescriptor,
}

/// Profile fields supplied by the user on create or edit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDraft {
   pub name:            String,
   pub uri:             String,
   #[serde(default)]
   pub storage_options: HashMap<String, String>,
   #[serde(default)]
   pub options:         ConnectOptions,
   #[serde(default)]
   pub auth:            AuthDescriptor,
}

impl ProfileDraft {
   pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
      Self { name: name.into(), uri: uri.into(), ..Self::default() }
   }

   pub fn with_auth(mut self, auth: AuthDescriptor) -> Self {
      self.auth = auth;
      self
   }
}

/// Driver-facing connect request.
///
/// Built from a profile after credential resolution, so `auth` is never a
/// [`AuthDescriptor::SecretRef`] by the time a driver sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
   pub name:            String,
   pub uri:             String,
   #[serde(default)]
   pub storage_options: HashMap<String, String>,
   #[serde(default)]
   pub options:         ConnectOptions,
   #[serde(default)]
   pub auth:            AuthDescriptor,
}

/// Runtime token for a live connection. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHandle {
   pub connection_id: String,
   pub backend_kind:  BackendKind,
   pub name:          String,
   pub uri:           String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
   pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTablesResponse {
   pub tables: Vec<TableInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableHandle {
   pub table_id: String,
   pub name:     String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectResponse {
   pub connection_id:   String,
   pub released_tables: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
   #[serde(default)]
   pub format:     DataFormat,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub projection: Option<Vec<String>>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub filter:     Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub limit:      Option<usize>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub offset:     Option<usize>,
}

/// One page of rows plus the offset of the next page, if there is one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
   pub chunk:       DataChunk,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub next_offset: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorSearchRequest {
   pub vector:        Vec<f32>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub column:        Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub top_k:         Option<usize>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub offset:        Option<usize>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub filter:        Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub projection:    Option<Vec<String>>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub nprobes:       Option<usize>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub refine_factor: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtsSearchRequest {
   pub query:      String,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub limit:      Option<usize>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub offset:     Option<usize>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub filter:     Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub projection: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
   pub version:   u64,
   pub timestamp: String,
   #[serde(default)]
   pub metadata:  HashMap<String, String>,
}

/// Index flavour, both for creating and for describing an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
   /// Let the driver pick from the column type.
   #[default]
   Auto,
   #[serde(rename = "btree")]
   BTree,
   Bitmap,
   LabelList,
   Fts,
   IvfFlat,
   IvfPq,
   IvfHnswPq,
   IvfHnswSq,
   /// Reported for index types this build does not know how to create.
   #[serde(other)]
   Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexInfo {
   pub name:       String,
   pub index_type: IndexKind,
   pub columns:    Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIndexRequest {
   pub columns:    Vec<String>,
   #[serde(default)]
   pub index_type: IndexKind,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub name:       Option<String>,
   #[serde(default)]
   pub replace:    bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
   #[default]
   Append,
   Overwrite,
}

/// Rows as JSON objects keyed by column name. They are decoded against the
/// table schema, so missing nullable columns are allowed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRowsRequest {
   pub rows: Vec<serde_json::Value>,
   #[serde(default)]
   pub mode: WriteMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResult {
   pub rows:    usize,
   pub version: u64,
}

/// `column = expr`, where `expr` is a SQL expression over the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnUpdate {
   pub column: String,
   pub expr:   String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRowsRequest {
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub filter:  Option<String>,
   pub updates: Vec<ColumnUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
   pub rows_updated: u64,
   pub version:      u64,
}

/// One column change. At least one of `rename`, `nullable` or `data_type`
/// must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnChange {
   pub path:          String,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub rename:        Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub nullable:      Option<bool>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub data_type:     Option<FieldType>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub vector_length: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneTableRequest {
   pub target:         String,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub source_version: Option<u64>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub source_tag:     Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub shallow:        Option<bool>,
}

/// Table maintenance: fragment compaction, or removal of old versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OptimizeRequest {
   #[serde(rename_all = "camelCase")]
   Compact {
      #[serde(default, skip_serializing_if = "Option::is_none")]
      target_rows_per_fragment: Option<usize>,
   },
   #[serde(rename_all = "camelCase")]
   Vacuum {
      #[serde(default, skip_serializing_if = "Option::is_none")]
      older_than_days:              Option<u64>,
      #[serde(default, skip_serializing_if = "Option::is_none")]
      delete_unverified:            Option<bool>,
      #[serde(default, skip_serializing_if = "Option::is_none")]
      error_if_tagged_old_versions: Option<bool>,
   },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
   Csv,
   Parquet,
   Jsonl,
}

impl FileFormat {
   /// Guesses the format from a file extension.
   pub fn from_path(path: &str) -> Option<Self> {
      let (_, ext) = path.rsplit_once('.')?;
      match ext.to_ascii_lowercase().as_str() {
         "csv" => Some(Self::Csv),
         "parquet" => Some(Self::Parquet),
         "jsonl" | "ndjson" => Some(Self::Jsonl),
         _ => None,
      }
   }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
   pub path:       String,
   pub format:     FileFormat,
   #[serde(default)]
   pub mode:       WriteMode,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub has_header: Option<bool>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub delimiter:  Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
   pub path:        String,
   pub format:      FileFormat,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub filter:      Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub projection:  Option<Vec<String>>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub limit:       Option<usize>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub offset:      Option<usize>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub with_header: Option<bool>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub delimiter:   Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
   pub path: String,
   pub rows: usize,
}

/// A scan whose filter is mandatory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilterRequest {
   pub filter:     String,
   #[serde(default)]
   pub format:     DataFormat,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub projection: Option<Vec<String>>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub limit:      Option<usize>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub offset:     Option<usize>,
}

/// Vector and full-text search in one request; either part may be omitted,
/// not both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedSearchRequest {
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub vector:        Option<Vec<f32>>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub query:         Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub vector_column: Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub limit:         Option<usize>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub offset:        Option<usize>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub filter:        Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub projection:    Option<Vec<String>>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub nprobes:       Option<usize>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub refine_factor: Option<u32>,
}
