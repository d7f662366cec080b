//! Database client capability with a `LanceDB` implementation.

pub mod codec;
pub mod files;
pub mod lance;
#[cfg(test)]
pub(crate) mod mock;

use std::sync::Arc;

pub use lance::LanceClient;

use crate::{
   error::{Error, Result},
   schema::SchemaDefinition,
   types::{
      CloneTableRequest, ColumnChange, CombinedSearchRequest, ConnectRequest, ConnectionHandle,
      CreateIndexRequest, ExportRequest, ExportResult, FtsSearchRequest, ImportRequest, IndexInfo,
      OptimizeRequest, QueryFilterRequest, ScanRequest, ScanResponse, TableHandle, TableInfo,
      UpdateResult, UpdateRowsRequest, VectorSearchRequest, VersionInfo, WriteResult,
      WriteRowsRequest,
   },
};

/// The narrow driver surface the registry depends on.
///
/// Connections and tables are addressed by the opaque ids the client hands
/// out. The extended operations default to `not_implemented` so a client only
/// has to provide the core surface.
#[async_trait::async_trait]
pub trait DatabaseClient: Send + Sync {
   /// Opens a connection. `request.auth` is already resolved.
   async fn connect(&self, request: &ConnectRequest) -> Result<ConnectionHandle>;

   /// Lists the tables visible on a connection.
   async fn list_tables(&self, connection_id: &str) -> Result<Vec<TableInfo>>;

   /// Opens a table by name, returning a fresh table id.
   async fn open_table(&self, connection_id: &str, name: &str) -> Result<TableHandle>;

   /// Reads the schema of an opened table.
   async fn get_schema(&self, table_id: &str) -> Result<SchemaDefinition>;

   /// Reads one page of rows from an opened table.
   async fn scan(&self, table_id: &str, request: &ScanRequest) -> Result<ScanResponse>;

   /// Closes a connection, returning how many table handles were released.
   async fn disconnect(&self, connection_id: &str) -> Result<usize>;

   async fn create_table(
      &self,
      _connection_id: &str,
      _name: &str,
      _schema: &SchemaDefinition,
   ) -> Result<TableInfo> {
      Err(Error::NotImplemented("create_table"))
   }

   async fn drop_table(&self, _connection_id: &str, _name: &str) -> Result<()> {
      Err(Error::NotImplemented("drop_table"))
   }

   async fn vector_search(
      &self,
      _table_id: &str,
      _request: &VectorSearchRequest,
   ) -> Result<ScanResponse> {
      Err(Error::NotImplemented("vector_search"))
   }

   async fn fts_search(&self, _table_id: &str, _request: &FtsSearchRequest) -> Result<ScanResponse> {
      Err(Error::NotImplemented("fts_search"))
   }

   async fn list_versions(&self, _table_id: &str) -> Result<Vec<VersionInfo>> {
      Err(Error::NotImplemented("list_versions"))
   }

   async fn rename_table(&self, _connection_id: &str, _name: &str, _new_name: &str) -> Result<()> {
      Err(Error::NotImplemented("rename_table"))
   }

   /// Copies the table behind `table_id` into a new table on `connection_id`.
   async fn clone_table(
      &self,
      _connection_id: &str,
      _table_id: &str,
      _request: &CloneTableRequest,
   ) -> Result<TableInfo> {
      Err(Error::NotImplemented("clone_table"))
   }

   async fn list_indexes(&self, _table_id: &str) -> Result<Vec<IndexInfo>> {
      Err(Error::NotImplemented("list_indexes"))
   }

   async fn create_index(&self, _table_id: &str, _request: &CreateIndexRequest) -> Result<()> {
      Err(Error::NotImplemented("create_index"))
   }

   async fn drop_index(&self, _table_id: &str, _name: &str) -> Result<()> {
      Err(Error::NotImplemented("drop_index"))
   }

   /// Version the table handle currently reads.
   async fn get_table_version(&self, _table_id: &str) -> Result<u64> {
      Err(Error::NotImplemented("get_table_version"))
   }

   /// Pins the handle to `version`; returns the version now read.
   async fn checkout_table_version(&self, _table_id: &str, _version: u64) -> Result<u64> {
      Err(Error::NotImplemented("checkout_table_version"))
   }

   async fn checkout_table_latest(&self, _table_id: &str) -> Result<u64> {
      Err(Error::NotImplemented("checkout_table_latest"))
   }

   /// Adds all-null columns; returns the new schema.
   async fn add_columns(
      &self,
      _table_id: &str,
      _columns: &SchemaDefinition,
   ) -> Result<SchemaDefinition> {
      Err(Error::NotImplemented("add_columns"))
   }

   async fn alter_columns(
      &self,
      _table_id: &str,
      _changes: &[ColumnChange],
   ) -> Result<SchemaDefinition> {
      Err(Error::NotImplemented("alter_columns"))
   }

   async fn drop_columns(&self, _table_id: &str, _columns: &[String]) -> Result<SchemaDefinition> {
      Err(Error::NotImplemented("drop_columns"))
   }

   async fn write_rows(&self, _table_id: &str, _request: &WriteRowsRequest) -> Result<WriteResult> {
      Err(Error::NotImplemented("write_rows"))
   }

   async fn update_rows(
      &self,
      _table_id: &str,
      _request: &UpdateRowsRequest,
   ) -> Result<UpdateResult> {
      Err(Error::NotImplemented("update_rows"))
   }

   /// Deletes the rows matching `filter`; returns the new table version.
   async fn delete_rows(&self, _table_id: &str, _filter: &str) -> Result<u64> {
      Err(Error::NotImplemented("delete_rows"))
   }

   async fn import_data(&self, _table_id: &str, _request: &ImportRequest) -> Result<WriteResult> {
      Err(Error::NotImplemented("import_data"))
   }

   async fn export_data(&self, _table_id: &str, _request: &ExportRequest) -> Result<ExportResult> {
      Err(Error::NotImplemented("export_data"))
   }

   /// Runs a maintenance action; returns the table version afterwards.
   async fn optimize_table(&self, _table_id: &str, _request: &OptimizeRequest) -> Result<u64> {
      Err(Error::NotImplemented("optimize_table"))
   }

   async fn query_filter(
      &self,
      _table_id: &str,
      _request: &QueryFilterRequest,
   ) -> Result<ScanResponse> {
      Err(Error::NotImplemented("query_filter"))
   }

   async fn combined_search(
      &self,
      _table_id: &str,
      _request: &CombinedSearchRequest,
   ) -> Result<ScanResponse> {
      Err(Error::NotImplemented("combined_search"))
   }
}

#[async_trait::async_trait]
impl<T: DatabaseClient + ?Sized> DatabaseClient for Arc<T> {
   async fn connect(&self, request: &ConnectRequest) -> Result<ConnectionHandle> {
      (**self).connect(request).await
   }

   async fn list_tables(&self, connection_id: &str) -> Result<Vec<TableInfo>> {
      (**self).list_tables(connection_id).await
   }

   async fn open_table(&self, connection_id: &str, name: &str) -> Result<TableHandle> {
      (**self).open_table(connection_id, name).await
   }

   async fn get_schema(&self, table_id: &str) -> Result<SchemaDefinition> {
      (**self).get_schema(table_id).await
   }

   async fn scan(&self, table_id: &str, request: &ScanRequest) -> Result<ScanResponse> {
      (**self).scan(table_id, request).await
   }

   async fn disconnect(&self, connection_id: &str) -> Result<usize> {
      (**self).disconnect(connection_id).await
   }

   async fn create_table(
      &self,
      connection_id: &str,
      name: &str,
      schema: &SchemaDefinition,
   ) -> Result<TableInfo> {
      (**self).create_table(connection_id, name, schema).await
   }

   async fn drop_table(&self, connection_id: &str, name: &str) -> Result<()> {
      (**self).drop_table(connection_id, name).await
   }

   async fn vector_search(
      &self,
      table_id: &str,
      request: &VectorSearchRequest,
   ) -> Result<ScanResponse> {
      (**self).vector_search(table_id, request).await
   }

   async fn fts_search(&self, table_id: &str, request: &FtsSearchRequest) -> Result<ScanResponse> {
      (**self).fts_search(table_id, request).await
   }

   async fn list_versions(&self, table_id: &str) -> Result<Vec<VersionInfo>> {
      (**self).list_versions(table_id).await
   }

   async fn rename_table(&self, connection_id: &str, name: &str, new_name: &str) -> Result<()> {
      (**self).rename_table(connection_id, name, new_name).await
   }

   async fn clone_table(
      &self,
      connection_id: &str,
      table_id: &str,
      request: &CloneTableRequest,
   ) -> Result<TableInfo> {
      (**self).clone_table(connection_id, table_id, request).await
   }

   async fn list_indexes(&self, table_id: &str) -> Result<Vec<IndexInfo>> {
      (**self).list_indexes(table_id).await
   }

   async fn create_index(&self, table_id: &str, request: &CreateIndexRequest) -> Result<()> {
      (**self).create_index(table_id, request).await
   }

   async fn drop_index(&self, table_id: &str, name: &str) -> Result<()> {
      (**self).drop_index(table_id, name).await
   }

   async fn get_table_version(&self, table_id: &str) -> Result<u64> {
      (**self).get_table_version(table_id).await
   }

   async fn checkout_table_version(&self, table_id: &str, version: u64) -> Result<u64> {
      (**self).checkout_table_version(table_id, version).await
   }

   async fn checkout_table_latest(&self, table_id: &str) -> Result<u64> {
      (**self).checkout_table_latest(table_id).await
   }

   async fn add_columns(
      &self,
      table_id: &str,
      columns: &SchemaDefinition,
   ) -> Result<SchemaDefinition> {
      (**self).add_columns(table_id, columns).await
   }

   async fn alter_columns(
      &self,
      table_id: &str,
      changes: &[ColumnChange],
   ) -> Result<SchemaDefinition> {
      (**self).alter_columns(table_id, changes).await
   }

   async fn drop_columns(&self, table_id: &str, columns: &[String]) -> Result<SchemaDefinition> {
      (**self).drop_columns(table_id, columns).await
   }

   async fn write_rows(&self, table_id: &str, request: &WriteRowsRequest) -> Result<WriteResult> {
      (**self).write_rows(table_id, request).await
   }

   async fn update_rows(
      &self,
      table_id: &str,
      request: &UpdateRowsRequest,
   ) -> Result<UpdateResult> {
      (**self).update_rows(table_id, request).await
   }

   async fn delete_rows(&self, table_id: &str, filter: &str) -> Result<u64> {
      (**self).delete_rows(table_id, filter).await
   }

   async fn import_data(&self, table_id: &str, request: &ImportRequest) -> Result<WriteResult> {
      (**self).import_data(table_id, request).await
   }

   async fn export_data(&self, table_id: &str, request: &ExportRequest) -> Result<ExportResult> {
      (**self).export_data(table_id, request).await
   }

   async fn optimize_table(&self, table_id: &str, request: &OptimizeRequest) -> Result<u64> {
      (**self).optimize_table(table_id, request).await
   }

   async fn query_filter(
      &self,
      table_id: &str,
      request: &QueryFilterRequest,
   ) -> Result<ScanResponse> {
      (**self).query_filter(table_id, request).await
   }

   async fn combined_search(
      &self,
      table_id: &str,
      request: &CombinedSearchRequest,
   ) -> Result<ScanResponse> {
      (**self).combined_search(table_id, request).await
   }
}
