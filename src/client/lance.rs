use std::{
   collections::HashMap,
   path::Path,
   sync::Arc,
   time::{Duration, Instant},
};

use arrow_array::{RecordBatch, RecordBatchIterator};
use arrow_schema::SchemaRef;
use futures::TryStreamExt;
use lancedb::{
   Connection, Table, connect,
   index::{
      Index, IndexType,
      scalar::{
         BTreeIndexBuilder, BitmapIndexBuilder, FtsIndexBuilder, FullTextSearchQuery,
         LabelListIndexBuilder,
      },
      vector::{
         IvfFlatIndexBuilder, IvfHnswPqIndexBuilder, IvfHnswSqIndexBuilder, IvfPqIndexBuilder,
      },
   },
   query::{ExecutableQuery, QueryBase, Select, VectorQuery},
   table::{
      AddDataMode, ColumnAlteration, CompactionOptions, Duration as RetentionWindow,
      NewColumnTransform, OptimizeAction,
   },
};
use parking_lot::RwLock;
use uuid::Uuid;

use super::{
   DatabaseClient,
   codec::{self, Window},
   files,
};
use crate::{
   config::Config,
   envelope::{DataFormat, ErrorCode},
   error::{Error, Result},
   schema::{SchemaDefinition, SchemaField},
   types::{
      AuthDescriptor, BackendKind, CloneTableRequest, ColumnChange, CombinedSearchRequest,
      ConnectRequest, ConnectionHandle, CreateIndexRequest, ExportRequest, ExportResult,
      FtsSearchRequest, ImportRequest, IndexInfo, IndexKind, OptimizeRequest, QueryFilterRequest,
      ScanRequest, ScanResponse, TableHandle, TableInfo, UpdateResult, UpdateRowsRequest,
      VectorSearchRequest, VersionInfo, WriteMode, WriteResult, WriteRowsRequest,
      infer_backend_kind,
   },
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
   #[error("failed to connect to '{uri}': {source}")]
   Connect {
      uri:    String,
      #[source]
      source: lancedb::Error,
   },

   #[error("failed to list tables: {0}")]
   ListTables(#[source] lancedb::Error),

   #[error("failed to open table '{name}': {source}")]
   OpenTable {
      name:   String,
      #[source]
      source: lancedb::Error,
   },

   #[error("failed to read schema: {0}")]
   ReadSchema(#[source] lancedb::Error),

   #[error("invalid query: {0}")]
   BuildQuery(#[source] lancedb::Error),

   #[error("failed to execute query: {0}")]
   ExecuteQuery(#[source] lancedb::Error),

   #[error("failed to collect results: {0}")]
   CollectResults(#[source] lancedb::Error),

   #[error("failed to create table '{name}': {source}")]
   CreateTable {
      name:   String,
      #[source]
      source: lancedb::Error,
   },

   #[error("failed to drop table '{name}': {source}")]
   DropTable {
      name:   String,
      #[source]
      source: lancedb::Error,
   },

   #[error("failed to list versions: {0}")]
   ListVersions(#[source] lancedb::Error),

   #[error("failed to rename table '{name}': {source}")]
   RenameTable {
      name:   String,
      #[source]
      source: lancedb::Error,
   },

   #[error("failed to clone into table '{name}': {source}")]
   CloneTable {
      name:   String,
      #[source]
      source: lancedb::Error,
   },

   #[error("failed to list indexes: {0}")]
   ListIndexes(#[source] lancedb::Error),

   #[error("failed to create index: {0}")]
   CreateIndex(#[source] lancedb::Error),

   #[error("failed to drop index '{name}': {source}")]
   DropIndex {
      name:   String,
      #[source]
      source: lancedb::Error,
   },

   #[error("failed to read table version: {0}")]
   ReadVersion(#[source] lancedb::Error),

   #[error("failed to check out version: {0}")]
   Checkout(#[source] lancedb::Error),

   #[error("failed to change columns: {0}")]
   AlterSchema(#[source] lancedb::Error),

   #[error("failed to write rows: {0}")]
   Write(#[source] lancedb::Error),

   #[error("failed to update rows: {0}")]
   Update(#[source] lancedb::Error),

   #[error("failed to delete rows: {0}")]
   Delete(#[source] lancedb::Error),

   #[error("failed to optimize table: {0}")]
   Optimize(#[source] lancedb::Error),
}

impl ClientError {
   const fn driver_error(&self) -> &lancedb::Error {
      match self {
         Self::Connect { source, .. }
         | Self::OpenTable { source, .. }
         | Self::CreateTable { source, .. }
         | Self::DropTable { source, .. }
         | Self::RenameTable { source, .. }
         | Self::CloneTable { source, .. }
         | Self::DropIndex { source, .. } => source,
         Self::ListTables(e)
         | Self::ReadSchema(e)
         | Self::BuildQuery(e)
         | Self::ExecuteQuery(e)
         | Self::CollectResults(e)
         | Self::ListVersions(e)
         | Self::ListIndexes(e)
         | Self::CreateIndex(e)
         | Self::ReadVersion(e)
         | Self::Checkout(e)
         | Self::AlterSchema(e)
         | Self::Write(e)
         | Self::Update(e)
         | Self::Delete(e)
         | Self::Optimize(e) => e,
      }
   }

   /// Classifies the driver failure. A query that could not even be built is
   /// always the caller's fault.
   pub const fn code(&self) -> ErrorCode {
      if matches!(self, Self::BuildQuery(_)) {
         return ErrorCode::InvalidArgument;
      }
      match self.driver_error() {
         lancedb::Error::InvalidInput { .. } | lancedb::Error::InvalidTableName { .. } => {
            ErrorCode::InvalidArgument
         },
         lancedb::Error::TableNotFound { .. } => ErrorCode::NotFound,
         lancedb::Error::NotSupported { .. } => ErrorCode::NotImplemented,
         _ => ErrorCode::Internal,
      }
   }
}

struct OpenedTable {
   connection_id: String,
   name:          String,
   table:         Table,
}

#[derive(Debug, Clone, Default)]
struct QueryOptions {
   projection: Option<Vec<String>>,
   filter:     Option<String>,
   limit:      Option<usize>,
   offset:     Option<usize>,
}

impl QueryOptions {
   fn new(window: Window, filter: Option<&str>, projection: Option<&[String]>) -> Self {
      Self {
         projection: sanitize_projection(projection),
         filter:     sanitize_filter(filter),
         limit:      Some(window.fetch_limit()),
         offset:     Some(window.offset),
      }
   }

   fn apply<Q: QueryBase>(&self, mut query: Q) -> Q {
      if let Some(filter) = &self.filter {
         tracing::trace!(filter, "query filter");
         query = query.only_if(filter);
      }
      if let Some(limit) = self.limit {
         query = query.limit(limit);
      }
      if let Some(offset) = self.offset {
         query = query.offset(offset);
      }
      if let Some(projection) = &self.projection {
         tracing::trace!(?projection, "query projection");
         query = query.select(Select::Columns(projection.clone()));
      }
      query
   }
}

fn sanitize_filter(filter: Option<&str>) -> Option<String> {
   filter
      .map(str::trim)
      .filter(|f| !f.is_empty())
      .map(str::to_string)
}

fn sanitize_projection(projection: Option<&[String]>) -> Option<Vec<String>> {
   let cleaned: Vec<String> = projection?
      .iter()
      .map(|column| column.trim())
      .filter(|column| !column.is_empty())
      .map(str::to_string)
      .collect();
   (!cleaned.is_empty()).then_some(cleaned)
}

fn sanitize_index_columns(columns: &[String]) -> Result<Vec<String>> {
   let mut cleaned: Vec<String> = Vec::with_capacity(columns.len());
   for column in columns {
      let column = column.trim();
      if column.is_empty() {
         return Err(Error::invalid("index column cannot be empty"));
      }
      if !cleaned.iter().any(|seen| seen == column) {
         cleaned.push(column.to_string());
      }
   }
   if cleaned.is_empty() {
      return Err(Error::invalid("an index needs at least one column"));
   }
   Ok(cleaned)
}

fn lance_index(kind: IndexKind) -> Result<Index> {
   Ok(match kind {
      IndexKind::Auto => Index::Auto,
      IndexKind::BTree => Index::BTree(BTreeIndexBuilder::default()),
      IndexKind::Bitmap => Index::Bitmap(BitmapIndexBuilder::default()),
      IndexKind::LabelList => Index::LabelList(LabelListIndexBuilder::default()),
      IndexKind::Fts => Index::FTS(FtsIndexBuilder::default()),
      IndexKind::IvfFlat => Index::IvfFlat(IvfFlatIndexBuilder::default()),
      IndexKind::IvfPq => Index::IvfPq(IvfPqIndexBuilder::default()),
      IndexKind::IvfHnswPq => Index::IvfHnswPq(IvfHnswPqIndexBuilder::default()),
      IndexKind::IvfHnswSq => Index::IvfHnswSq(IvfHnswSqIndexBuilder::default()),
      IndexKind::Other => return Err(Error::invalid("unsupported index type")),
   })
}

#[allow(unreachable_patterns)]
fn index_kind(index_type: &IndexType) -> IndexKind {
   match index_type {
      IndexType::BTree => IndexKind::BTree,
      IndexType::Bitmap => IndexKind::Bitmap,
      IndexType::LabelList => IndexKind::LabelList,
      IndexType::FTS => IndexKind::Fts,
      IndexType::IvfFlat => IndexKind::IvfFlat,
      IndexType::IvfPq => IndexKind::IvfPq,
      IndexType::IvfHnswPq => IndexKind::IvfHnswPq,
      IndexType::IvfHnswSq => IndexKind::IvfHnswSq,
      _ => IndexKind::Other,
   }
}

fn column_alteration(change: &ColumnChange) -> Result<ColumnAlteration> {
   let path = change.path.trim();
   if path.is_empty() {
      return Err(Error::invalid("column path cannot be empty"));
   }
   let rename = change
      .rename
      .as_deref()
      .map(str::trim)
      .filter(|name| !name.is_empty());
   if rename.is_none() && change.nullable.is_none() && change.data_type.is_none() {
      return Err(Error::invalid(format!(
         "change to column '{path}' must rename it, set nullability or cast it"
      )));
   }

   let mut alteration = ColumnAlteration::new(path.to_string());
   if let Some(rename) = rename {
      alteration = alteration.rename(rename.to_string());
   }
   if let Some(nullable) = change.nullable {
      alteration = alteration.set_nullable(nullable);
   }
   if let Some(data_type) = change.data_type {
      let target = SchemaField {
         vector_length: change.vector_length,
         ..SchemaField::new(path, data_type, true)
      };
      alteration = alteration.cast_to(target.to_arrow()?.data_type().clone());
   }
   Ok(alteration)
}

fn optimize_action(request: &OptimizeRequest) -> Result<OptimizeAction> {
   match *request {
      OptimizeRequest::Compact { target_rows_per_fragment } => {
         let mut options = CompactionOptions::default();
         if let Some(rows) = target_rows_per_fragment {
            if rows == 0 {
               return Err(Error::invalid("targetRowsPerFragment must be greater than zero"));
            }
            options.target_rows_per_fragment = rows;
         }
         Ok(OptimizeAction::Compact { options, remap_options: None })
      },
      OptimizeRequest::Vacuum {
         older_than_days,
         delete_unverified,
         error_if_tagged_old_versions,
      } => {
         let older_than = older_than_days
            .map(|days| {
               i64::try_from(days)
                  .ok()
                  .and_then(RetentionWindow::try_days)
                  .ok_or_else(|| Error::invalid(format!("olderThanDays {days} is too large")))
            })
            .transpose()?;
         Ok(OptimizeAction::Prune { older_than, delete_unverified, error_if_tagged_old_versions })
      },
   }
}

fn nearest(
   table: &Table,
   vector: &[f32],
   column: Option<&str>,
   nprobes: Option<usize>,
   refine_factor: Option<u32>,
) -> Result<VectorQuery> {
   let mut query = table
      .query()
      .nearest_to(vector.to_vec())
      .map_err(ClientError::BuildQuery)?;
   if let Some(column) = column {
      query = query.column(column);
   }
   if let Some(nprobes) = nprobes {
      query = query.nprobes(nprobes);
   }
   if let Some(refine_factor) = refine_factor {
      query = query.refine_factor(refine_factor);
   }
   Ok(query)
}

fn row_count(batches: &[RecordBatch]) -> usize {
   batches.iter().map(RecordBatch::num_rows).sum()
}

async fn add_batches(
   table: &Table,
   batches: Vec<RecordBatch>,
   schema: SchemaRef,
   mode: WriteMode,
) -> Result<WriteResult> {
   let rows = row_count(&batches);
   let reader = RecordBatchIterator::new(batches.into_iter().map(Ok), schema);
   let mut builder = table.add(reader);
   if mode == WriteMode::Overwrite {
      builder = builder.mode(AddDataMode::Overwrite);
   }
   let added = builder.execute().await.map_err(ClientError::Write)?;
   Ok(WriteResult { rows, version: added.version })
}

async fn read_schema(table: &Table) -> Result<SchemaDefinition> {
   let schema = table.schema().await.map_err(ClientError::ReadSchema)?;
   Ok(SchemaDefinition::from_arrow(&schema))
}

/// Merges resolved inline credentials over the profile's storage options.
///
/// A `secret_ref` reaching this point is a caller bug: references are resolved
/// against the vault before a request is built.
pub fn resolve_storage_options(request: &ConnectRequest) -> Result<HashMap<String, String>> {
   let mut options = request.storage_options.clone();
   match &request.auth {
      AuthDescriptor::None => {},
      AuthDescriptor::Inline { provider, params } => {
         let keys: Vec<&String> = params.keys().collect();
         tracing::trace!(provider, ?keys, "merging inline credentials");
         options.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
      },
      AuthDescriptor::SecretRef { provider, .. } => {
         return Err(Error::invalid(format!(
            "unresolved secret reference for provider '{provider}'"
         )));
      },
   }
   Ok(options)
}

async fn collect_batches(query: impl ExecutableQuery) -> Result<Vec<RecordBatch>> {
   let stream = query
      .execute()
      .await
      .map_err(ClientError::ExecuteQuery)?;
   let batches = stream
      .try_collect::<Vec<_>>()
      .await
      .map_err(ClientError::CollectResults)?;
   Ok(batches)
}

/// [`DatabaseClient`] backed by `LanceDB`.
///
/// Live connections and opened tables are kept under opaque UUIDs; a table id
/// remembers the connection it was opened on so disconnect can release it.
pub struct LanceClient {
   connections:   RwLock<HashMap<String, Arc<Connection>>>,
   tables:        RwLock<HashMap<String, OpenedTable>>,
   default_limit: usize,
   max_limit:     usize,
   default_top_k: usize,
}

impl LanceClient {
   pub fn from_config(cfg: &Config) -> Self {
      Self::with_limits(cfg.scan_limit(), cfg.max_scan_limit, cfg.default_top_k)
   }

   pub fn with_limits(default_limit: usize, max_limit: usize, default_top_k: usize) -> Self {
      Self {
         connections: RwLock::new(HashMap::new()),
         tables: RwLock::new(HashMap::new()),
         default_limit,
         max_limit,
         default_top_k,
      }
   }

   fn connection(&self, connection_id: &str) -> Result<Arc<Connection>> {
      self
         .connections
         .read()
         .get(connection_id)
         .cloned()
         .ok_or_else(|| Error::not_found("connection", connection_id))
   }

   fn table(&self, table_id: &str) -> Result<Table> {
      self
         .tables
         .read()
         .get(table_id)
         .map(|entry| entry.table.clone())
         .ok_or_else(|| Error::not_found("table", table_id))
   }

   pub fn open_table_count(&self) -> usize {
      self.tables.read().len()
   }
}

#[async_trait::async_trait]
impl DatabaseClient for LanceClient {
   async fn connect(&self, request: &ConnectRequest) -> Result<ConnectionHandle> {
      let started = Instant::now();
      let uri = request.uri.trim();
      if uri.is_empty() {
         return Err(Error::invalid("connection uri cannot be empty"));
      }

      let backend_kind = infer_backend_kind(uri);
      if backend_kind == BackendKind::Unknown {
         return Err(Error::invalid(format!("unsupported uri scheme: {uri}")));
      }

      let storage_options = resolve_storage_options(request)?;
      tracing::info!(name = %request.name, uri, ?backend_kind, "connecting");

      let mut builder = connect(uri);
      if !storage_options.is_empty() {
         let keys: Vec<&String> = storage_options.keys().collect();
         tracing::trace!(?keys, "storage options");
         builder = builder.storage_options(storage_options.clone());
      }
      if let Some(secs) = request.options.read_consistency_interval_seconds {
         tracing::debug!(secs, "read consistency interval");
         builder = builder.read_consistency_interval(Duration::from_secs(secs));
      }

      let connection = builder.execute().await.map_err(|source| {
         tracing::error!(uri, %source, "connect failed");
         ClientError::Connect { uri: uri.to_string(), source }
      })?;

      let connection_id = Uuid::new_v4().to_string();
      self
         .connections
         .write()
         .insert(connection_id.clone(), Arc::new(connection));

      tracing::info!(
         %connection_id,
         ?backend_kind,
         elapsed_ms = started.elapsed().as_millis() as u64,
         "connected"
      );

      Ok(ConnectionHandle {
         connection_id,
         backend_kind,
         name: request.name.clone(),
         uri: uri.to_string(),
      })
   }

   async fn list_tables(&self, connection_id: &str) -> Result<Vec<TableInfo>> {
      let conn = self.connection(connection_id)?;
      let names = conn
         .table_names()
         .execute()
         .await
         .map_err(ClientError::ListTables)?;
      tracing::debug!(connection_id, tables = names.len(), "listed tables");
      Ok(names.into_iter().map(|name| TableInfo { name }).collect())
   }

   async fn open_table(&self, connection_id: &str, name: &str) -> Result<TableHandle> {
      let name = name.trim();
      if name.is_empty() {
         return Err(Error::invalid("table name cannot be empty"));
      }

      let conn = self.connection(connection_id)?;
      let table = conn
         .open_table(name)
         .execute()
         .await
         .map_err(|source| ClientError::OpenTable { name: name.to_string(), source })?;

      let table_id = Uuid::new_v4().to_string();
      self.tables.write().insert(table_id.clone(), OpenedTable {
         connection_id: connection_id.to_string(),
         name: name.to_string(),
         table,
      });
      tracing::debug!(connection_id, %table_id, name, "opened table");

      Ok(TableHandle { table_id, name: name.to_string() })
   }

   async fn get_schema(&self, table_id: &str) -> Result<SchemaDefinition> {
      read_schema(&self.table(table_id)?).await
   }

   async fn scan(&self, table_id: &str, request: &ScanRequest) -> Result<ScanResponse> {
      let started = Instant::now();
      let table = self.table(table_id)?;
      let window = Window::new(request.offset, request.limit, self.default_limit, self.max_limit);
      let fallback = table.schema().await.map_err(ClientError::ReadSchema)?;

      let options =
         QueryOptions::new(window, request.filter.as_deref(), request.projection.as_deref());
      let batches = collect_batches(options.apply(table.query())).await?;
      let response = codec::page(request.format, batches, &fallback, window)?;

      tracing::info!(
         table_id,
         format = ?request.format,
         offset = window.offset,
         next_offset = ?response.next_offset,
         elapsed_ms = started.elapsed().as_millis() as u64,
         "scan complete"
      );
      Ok(response)
   }

   async fn disconnect(&self, connection_id: &str) -> Result<usize> {
      if self.connections.write().remove(connection_id).is_none() {
         return Err(Error::not_found("connection", connection_id));
      }

      let mut tables = self.tables.write();
      let before = tables.len();
      tables.retain(|_, entry| entry.connection_id != connection_id);
      let released = before - tables.len();

      tracing::info!(connection_id, released, "disconnected");
      Ok(released)
   }

   async fn create_table(
      &self,
      connection_id: &str,
      name: &str,
      schema: &SchemaDefinition,
   ) -> Result<TableInfo> {
      let name = name.trim();
      if name.is_empty() {
         return Err(Error::invalid("table name cannot be empty"));
      }
      let arrow_schema = schema.to_arrow()?;
      let conn = self.connection(connection_id)?;

      conn
         .create_empty_table(name, arrow_schema)
         .execute()
         .await
         .map_err(|source| ClientError::CreateTable { name: name.to_string(), source })?;

      tracing::info!(connection_id, name, fields = schema.fields.len(), "created table");
      Ok(TableInfo { name: name.to_string() })
   }

   async fn drop_table(&self, connection_id: &str, name: &str) -> Result<()> {
      let conn = self.connection(connection_id)?;
      conn
         .drop_table(name, &[])
         .await
         .map_err(|source| ClientError::DropTable { name: name.to_string(), source })?;

      self
         .tables
         .write()
         .retain(|_, entry| !(entry.connection_id == connection_id && entry.name == name));
      tracing::info!(connection_id, name, "dropped table");
      Ok(())
   }

   async fn vector_search(
      &self,
      table_id: &str,
      request: &VectorSearchRequest,
   ) -> Result<ScanResponse> {
      if request.vector.is_empty() {
         return Err(Error::invalid("vector must not be empty"));
      }

      let table = self.table(table_id)?;
      let fallback = table.schema().await.map_err(ClientError::ReadSchema)?;
      let window = Window::new(request.offset, request.top_k, self.default_top_k, self.max_limit);

      let query = nearest(
         &table,
         &request.vector,
         request.column.as_deref(),
         request.nprobes,
         request.refine_factor,
      )?;

      let options =
         QueryOptions::new(window, request.filter.as_deref(), request.projection.as_deref());
      let batches = collect_batches(options.apply(query)).await?;
      tracing::debug!(table_id, dims = request.vector.len(), "vector search complete");
      codec::page(DataFormat::Json, batches, &fallback, window)
   }

   async fn fts_search(&self, table_id: &str, request: &FtsSearchRequest) -> Result<ScanResponse> {
      let text = request.query.trim();
      if text.is_empty() {
         return Err(Error::invalid("search query cannot be empty"));
      }

      let table = self.table(table_id)?;
      let fallback = table.schema().await.map_err(ClientError::ReadSchema)?;
      let window = Window::new(request.offset, request.limit, self.default_top_k, self.max_limit);

      let query = table
         .query()
         .full_text_search(FullTextSearchQuery::new(text.to_string()));
      let options =
         QueryOptions::new(window, request.filter.as_deref(), request.projection.as_deref());
      let batches = collect_batches(options.apply(query)).await?;
      tracing::debug!(table_id, "full-text search complete");
      codec::page(DataFormat::Json, batches, &fallback, window)
   }

   async fn list_versions(&self, table_id: &str) -> Result<Vec<VersionInfo>> {
      let table = self.table(table_id)?;
      let versions = table
         .list_versions()
         .await
         .map_err(ClientError::ListVersions)?;

      Ok(versions
         .into_iter()
         .map(|v| VersionInfo {
            version:   v.version,
            timestamp: v.timestamp.to_rfc3339(),
            metadata:  v.metadata.into_iter().collect(),
         })
         .collect())
   }

   async fn rename_table(&self, connection_id: &str, name: &str, new_name: &str) -> Result<()> {
      let (name, new_name) = (name.trim(), new_name.trim());
      if name.is_empty() || new_name.is_empty() {
         return Err(Error::invalid("table names cannot be empty"));
      }
      if name == new_name {
         return Err(Error::invalid(format!("table is already named '{name}'")));
      }

      let conn = self.connection(connection_id)?;
      conn
         .rename_table(name, new_name, &[], &[])
         .await
         .map_err(|source| ClientError::RenameTable { name: name.to_string(), source })?;

      for entry in self.tables.write().values_mut() {
         if entry.connection_id == connection_id && entry.name == name {
            entry.name = new_name.to_string();
         }
      }
      tracing::info!(connection_id, name, new_name, "renamed table");
      Ok(())
   }

   async fn clone_table(
      &self,
      connection_id: &str,
      table_id: &str,
      request: &CloneTableRequest,
   ) -> Result<TableInfo> {
      let target = request.target.trim();
      if target.is_empty() {
         return Err(Error::invalid("clone target name cannot be empty"));
      }
      let conn = self.connection(connection_id)?;
      let source = self.table(table_id)?;

      let mut builder = conn.clone_table(target.to_string(), source.dataset_uri().to_string());
      if let Some(version) = request.source_version {
         builder = builder.source_version(version);
      }
      if let Some(tag) = request
         .source_tag
         .as_deref()
         .map(str::trim)
         .filter(|tag| !tag.is_empty())
      {
         builder = builder.source_tag(tag.to_string());
      }
      if let Some(shallow) = request.shallow {
         builder = builder.is_shallow(shallow);
      }
      builder
         .execute()
         .await
         .map_err(|source| ClientError::CloneTable { name: target.to_string(), source })?;

      tracing::info!(connection_id, table_id, target, "cloned table");
      Ok(TableInfo { name: target.to_string() })
   }

   async fn list_indexes(&self, table_id: &str) -> Result<Vec<IndexInfo>> {
      let table = self.table(table_id)?;
      let configs = table
         .list_indices()
         .await
         .map_err(ClientError::ListIndexes)?;
      Ok(configs
         .into_iter()
         .map(|config| IndexInfo {
            index_type: index_kind(&config.index_type),
            name:       config.name,
            columns:    config.columns,
         })
         .collect())
   }

   async fn create_index(&self, table_id: &str, request: &CreateIndexRequest) -> Result<()> {
      let started = Instant::now();
      let columns = sanitize_index_columns(&request.columns)?;
      let name = match request.name.as_deref().map(str::trim) {
         Some("") => return Err(Error::invalid("index name cannot be empty")),
         name => name,
      };
      let index = lance_index(request.index_type)?;
      let table = self.table(table_id)?;

      let mut builder = table.create_index(&columns, index).replace(request.replace);
      if let Some(name) = name {
         builder = builder.name(name.to_string());
      }
      builder.execute().await.map_err(ClientError::CreateIndex)?;

      tracing::info!(
         table_id,
         ?columns,
         index_type = ?request.index_type,
         elapsed_ms = started.elapsed().as_millis() as u64,
         "created index"
      );
      Ok(())
   }

   async fn drop_index(&self, table_id: &str, name: &str) -> Result<()> {
      let name = name.trim();
      if name.is_empty() {
         return Err(Error::invalid("index name cannot be empty"));
      }
      let table = self.table(table_id)?;
      table
         .drop_index(name)
         .await
         .map_err(|source| ClientError::DropIndex { name: name.to_string(), source })?;
      tracing::info!(table_id, name, "dropped index");
      Ok(())
   }

   async fn get_table_version(&self, table_id: &str) -> Result<u64> {
      let table = self.table(table_id)?;
      Ok(table.version().await.map_err(ClientError::ReadVersion)?)
   }

   async fn checkout_table_version(&self, table_id: &str, version: u64) -> Result<u64> {
      let table = self.table(table_id)?;
      table
         .checkout(version)
         .await
         .map_err(ClientError::Checkout)?;
      tracing::info!(table_id, version, "checked out version");
      Ok(table.version().await.map_err(ClientError::ReadVersion)?)
   }

   async fn checkout_table_latest(&self, table_id: &str) -> Result<u64> {
      let table = self.table(table_id)?;
      table
         .checkout_latest()
         .await
         .map_err(ClientError::Checkout)?;
      let version = table.version().await.map_err(ClientError::ReadVersion)?;
      tracing::info!(table_id, version, "checked out latest version");
      Ok(version)
   }

   async fn add_columns(
      &self,
      table_id: &str,
      columns: &SchemaDefinition,
   ) -> Result<SchemaDefinition> {
      let schema = columns.to_arrow()?;
      let table = self.table(table_id)?;
      table
         .add_columns(NewColumnTransform::AllNulls(schema), None)
         .await
         .map_err(ClientError::AlterSchema)?;
      tracing::info!(table_id, added = columns.fields.len(), "added columns");
      read_schema(&table).await
   }

   async fn alter_columns(
      &self,
      table_id: &str,
      changes: &[ColumnChange],
   ) -> Result<SchemaDefinition> {
      if changes.is_empty() {
         return Err(Error::invalid("no column changes given"));
      }
      let alterations = changes
         .iter()
         .map(column_alteration)
         .collect::<Result<Vec<_>>>()?;
      let table = self.table(table_id)?;
      table
         .alter_columns(&alterations)
         .await
         .map_err(ClientError::AlterSchema)?;
      tracing::info!(table_id, altered = alterations.len(), "altered columns");
      read_schema(&table).await
   }

   async fn drop_columns(&self, table_id: &str, columns: &[String]) -> Result<SchemaDefinition> {
      let names: Vec<&str> = columns
         .iter()
         .map(|column| column.trim())
         .filter(|column| !column.is_empty())
         .collect();
      if names.is_empty() {
         return Err(Error::invalid("no columns to drop"));
      }
      let table = self.table(table_id)?;
      table
         .drop_columns(&names)
         .await
         .map_err(ClientError::AlterSchema)?;
      tracing::info!(table_id, ?names, "dropped columns");
      read_schema(&table).await
   }

   async fn write_rows(&self, table_id: &str, request: &WriteRowsRequest) -> Result<WriteResult> {
      let table = self.table(table_id)?;
      let schema = table.schema().await.map_err(ClientError::ReadSchema)?;
      let batches = codec::json_rows_to_batches(schema.clone(), &request.rows)?;
      let written = add_batches(&table, batches, schema, request.mode).await?;
      tracing::info!(
         table_id,
         rows = written.rows,
         mode = ?request.mode,
         version = written.version,
         "wrote rows"
      );
      Ok(written)
   }

   async fn update_rows(
      &self,
      table_id: &str,
      request: &UpdateRowsRequest,
   ) -> Result<UpdateResult> {
      if request.updates.is_empty() {
         return Err(Error::invalid("no column updates given"));
      }
      let table = self.table(table_id)?;

      let mut builder = table.update();
      if let Some(filter) = sanitize_filter(request.filter.as_deref()) {
         builder = builder.only_if(filter);
      }
      for update in &request.updates {
         let (column, expr) = (update.column.trim(), update.expr.trim());
         if column.is_empty() || expr.is_empty() {
            return Err(Error::invalid("update column and expression cannot be empty"));
         }
         builder = builder.column(column.to_string(), expr.to_string());
      }

      let updated = builder.execute().await.map_err(ClientError::Update)?;
      tracing::info!(
         table_id,
         rows_updated = updated.rows_updated,
         version = updated.version,
         "updated rows"
      );
      Ok(UpdateResult { rows_updated: updated.rows_updated, version: updated.version })
   }

   async fn delete_rows(&self, table_id: &str, filter: &str) -> Result<u64> {
      let Some(filter) = sanitize_filter(Some(filter)) else {
         return Err(Error::invalid("delete needs a filter; use 'true' to delete every row"));
      };
      let table = self.table(table_id)?;
      let deleted = table.delete(&filter).await.map_err(ClientError::Delete)?;
      tracing::info!(table_id, %filter, version = deleted.version, "deleted rows");
      Ok(deleted.version)
   }

   async fn import_data(&self, table_id: &str, request: &ImportRequest) -> Result<WriteResult> {
      let path = request.path.trim();
      if path.is_empty() {
         return Err(Error::invalid("import path cannot be empty"));
      }
      let delimiter = files::parse_delimiter(request.delimiter.as_deref())?;
      let table = self.table(table_id)?;
      let schema = table.schema().await.map_err(ClientError::ReadSchema)?;

      let batches = files::read_batches(
         Path::new(path),
         request.format,
         schema.clone(),
         request.has_header.unwrap_or(true),
         delimiter,
      )?;
      if row_count(&batches) == 0 {
         return Err(Error::invalid(format!("no rows found in '{path}'")));
      }
      let schema = batches.first().map_or(schema, RecordBatch::schema);
      let written = add_batches(&table, batches, schema, request.mode).await?;
      tracing::info!(
         table_id,
         path,
         format = ?request.format,
         rows = written.rows,
         version = written.version,
         "imported rows"
      );
      Ok(written)
   }

   async fn export_data(&self, table_id: &str, request: &ExportRequest) -> Result<ExportResult> {
      let path = request.path.trim();
      if path.is_empty() {
         return Err(Error::invalid("export path cannot be empty"));
      }
      let delimiter = files::parse_delimiter(request.delimiter.as_deref())?;
      let table = self.table(table_id)?;
      let fallback = table.schema().await.map_err(ClientError::ReadSchema)?;

      let options = QueryOptions {
         projection: sanitize_projection(request.projection.as_deref()),
         filter:     sanitize_filter(request.filter.as_deref()),
         limit:      request.limit,
         offset:     request.offset,
      };
      let batches = collect_batches(options.apply(table.query())).await?;
      let rows = row_count(&batches);
      files::write_batches(
         Path::new(path),
         request.format,
         &batches,
         &fallback,
         request.with_header.unwrap_or(true),
         delimiter,
      )?;

      tracing::info!(table_id, path, format = ?request.format, rows, "exported rows");
      Ok(ExportResult { path: path.to_string(), rows })
   }

   async fn optimize_table(&self, table_id: &str, request: &OptimizeRequest) -> Result<u64> {
      let started = Instant::now();
      let action = optimize_action(request)?;
      let table = self.table(table_id)?;
      table
         .optimize(action)
         .await
         .map_err(ClientError::Optimize)?;
      let version = table.version().await.map_err(ClientError::ReadVersion)?;
      tracing::info!(
         table_id,
         ?request,
         version,
         elapsed_ms = started.elapsed().as_millis() as u64,
         "optimized table"
      );
      Ok(version)
   }

   async fn query_filter(
      &self,
      table_id: &str,
      request: &QueryFilterRequest,
   ) -> Result<ScanResponse> {
      let Some(filter) = sanitize_filter(Some(&request.filter)) else {
         return Err(Error::invalid("filter cannot be empty"));
      };
      let scan = ScanRequest {
         format:     request.format,
         projection: request.projection.clone(),
         filter:     Some(filter),
         limit:      request.limit,
         offset:     request.offset,
      };
      self.scan(table_id, &scan).await
   }

   async fn combined_search(
      &self,
      table_id: &str,
      request: &CombinedSearchRequest,
   ) -> Result<ScanResponse> {
      let vector = request.vector.as_deref().filter(|v| !v.is_empty());
      let text = request
         .query
         .as_deref()
         .map(str::trim)
         .filter(|q| !q.is_empty());
      if vector.is_none() && text.is_none() {
         return Err(Error::invalid("combined search needs a vector or a text query"));
      }

      let table = self.table(table_id)?;
      let fallback = table.schema().await.map_err(ClientError::ReadSchema)?;
      let window = Window::new(request.offset, request.limit, self.default_top_k, self.max_limit);
      // Each side fetches from zero; the merged list is paged afterwards.
      let options = QueryOptions {
         projection: sanitize_projection(request.projection.as_deref()),
         filter:     sanitize_filter(request.filter.as_deref()),
         limit:      Some(window.offset.saturating_add(window.fetch_limit())),
         offset:     None,
      };

      let mut sets = Vec::with_capacity(2);
      if let Some(vector) = vector {
         let query = nearest(
            &table,
            vector,
            request.vector_column.as_deref(),
            request.nprobes,
            request.refine_factor,
         )?;
         sets.push(collect_batches(options.apply(query)).await?);
      }
      if let Some(text) = text {
         let query = table
            .query()
            .full_text_search(FullTextSearchQuery::new(text.to_string()));
         sets.push(collect_batches(options.apply(query)).await?);
      }

      tracing::debug!(table_id, sets = sets.len(), "combined search complete");
      codec::merged_page(sets, &fallback, window)
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::schema::FieldType;

   fn request(uri: &str, auth: AuthDescriptor) -> ConnectRequest {
      ConnectRequest {
         name: "test".to_string(),
         uri: uri.to_string(),
         storage_options: HashMap::from([("region".to_string(), "us-east-1".to_string())]),
         options: Default::default(),
         auth,
      }
   }

   #[test]
   fn inline_credentials_override_storage_options() {
      let auth = AuthDescriptor::Inline {
         provider: "aws".to_string(),
         params:   HashMap::from([
            ("region".to_string(), "eu-west-1".to_string()),
            ("aws_access_key_id".to_string(), "AKIA".to_string()),
         ]),
      };
      let options = resolve_storage_options(&request("s3://bucket", auth)).unwrap();
      assert_eq!(options["region"], "eu-west-1");
      assert_eq!(options["aws_access_key_id"], "AKIA");
   }

   #[test]
   fn unresolved_secret_reference_is_rejected() {
      let auth =
         AuthDescriptor::SecretRef { provider: "aws".to_string(), reference: "cred_1".to_string() };
      let err = resolve_storage_options(&request("s3://bucket", auth)).unwrap_err();
      assert_eq!(err.code(), ErrorCode::InvalidArgument);
   }

   #[test]
   fn blank_filters_and_columns_are_dropped() {
      assert_eq!(sanitize_filter(Some("   ")), None);
      assert_eq!(sanitize_filter(Some(" id > 3 ")).as_deref(), Some("id > 3"));
      let cols = vec![" id ".to_string(), String::new()];
      assert_eq!(sanitize_projection(Some(&cols)), Some(vec!["id".to_string()]));
      assert_eq!(sanitize_projection(Some(&[String::new()])), None);
   }

   #[tokio::test]
   async fn connect_rejects_bad_uris_before_the_driver() {
      let client = LanceClient::with_limits(100, 1000, 10);
      let err = client
         .connect(&request("  ", AuthDescriptor::None))
         .await
         .unwrap_err();
      assert_eq!(err.code(), ErrorCode::InvalidArgument);

      let err = client
         .connect(&request("ftp://host/db", AuthDescriptor::None))
         .await
         .unwrap_err();
      assert_eq!(err.code(), ErrorCode::InvalidArgument);
   }

   #[tokio::test]
   async fn unknown_ids_are_not_found() {
      let client = LanceClient::with_limits(100, 1000, 10);
      assert_eq!(client.list_tables("nope").await.unwrap_err().code(), ErrorCode::NotFound);
      assert_eq!(client.get_schema("nope").await.unwrap_err().code(), ErrorCode::NotFound);
      assert_eq!(client.disconnect("nope").await.unwrap_err().code(), ErrorCode::NotFound);
   }

   #[tokio::test]
   async fn extended_calls_validate_before_lookup() {
      let client = LanceClient::with_limits(100, 1000, 10);
      let filter = client.query_filter("nope", &QueryFilterRequest::default()).await;
      assert_eq!(filter.unwrap_err().code(), ErrorCode::InvalidArgument);
      let search = client.combined_search("nope", &CombinedSearchRequest::default()).await;
      assert_eq!(search.unwrap_err().code(), ErrorCode::InvalidArgument);
      let delete = client.delete_rows("nope", "  ").await;
      assert_eq!(delete.unwrap_err().code(), ErrorCode::InvalidArgument);
      let rename = client.rename_table("nope", "items", "items").await;
      assert_eq!(rename.unwrap_err().code(), ErrorCode::InvalidArgument);

      assert_eq!(client.list_indexes("nope").await.unwrap_err().code(), ErrorCode::NotFound);
      assert_eq!(client.get_table_version("nope").await.unwrap_err().code(), ErrorCode::NotFound);
   }

   #[test]
   fn index_columns_are_trimmed_and_deduplicated() {
      let cols = vec![" id ".to_string(), "id".to_string(), "text".to_string()];
      assert_eq!(sanitize_index_columns(&cols).unwrap(), vec!["id", "text"]);
      assert!(sanitize_index_columns(&[]).is_err());
      assert!(sanitize_index_columns(&["id".to_string(), "  ".to_string()]).is_err());
   }

   #[test]
   fn index_kinds_map_to_driver_indexes() {
      assert!(matches!(lance_index(IndexKind::BTree), Ok(Index::BTree(_))));
      assert!(matches!(lance_index(IndexKind::Auto), Ok(Index::Auto)));
      assert!(matches!(lance_index(IndexKind::Other), Err(Error::InvalidArgument(_))));
      assert_eq!(index_kind(&IndexType::FTS), IndexKind::Fts);
      assert_eq!(index_kind(&IndexType::IvfHnswSq), IndexKind::IvfHnswSq);
   }

   #[test]
   fn column_change_must_change_something() {
      let untouched = ColumnChange { path: "id".to_string(), ..Default::default() };
      assert!(matches!(column_alteration(&untouched), Err(Error::InvalidArgument(_))));

      let blank_rename = ColumnChange { rename: Some(" ".to_string()), ..untouched.clone() };
      assert!(column_alteration(&blank_rename).is_err());

      let cast = ColumnChange { data_type: Some(FieldType::Int64), ..untouched.clone() };
      assert!(column_alteration(&cast).is_ok());

      let vector_without_length =
         ColumnChange { data_type: Some(FieldType::FixedSizeListFloat32), ..untouched };
      assert!(column_alteration(&vector_without_length).is_err());
   }

   #[test]
   fn optimize_settings_are_range_checked() {
      let zero = OptimizeRequest::Compact { target_rows_per_fragment: Some(0) };
      assert!(optimize_action(&zero).is_err());

      let vacuum = |days| OptimizeRequest::Vacuum {
         older_than_days:              Some(days),
         delete_unverified:            None,
         error_if_tagged_old_versions: None,
      };
      assert!(optimize_action(&vacuum(u64::MAX)).is_err());
      assert!(matches!(
         optimize_action(&vacuum(7)),
         Ok(OptimizeAction::Prune { older_than: Some(_), .. })
      ));
   }
}
