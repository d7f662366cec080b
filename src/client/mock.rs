//! Scripted [`DatabaseClient`] for exercising the registry and session without
//! a real database. Calls can be gated to hold a lane mid-flight.

use std::{
   collections::{HashMap, HashSet},
   sync::{
      Arc,
      atomic::{AtomicUsize, Ordering},
   },
};

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Notify;

use super::DatabaseClient;
use crate::{
   envelope::{DataChunk, ErrorCode, JsonChunk},
   error::{Error, Result},
   schema::{FieldType, SchemaDefinition, SchemaField},
   types::{
      ConnectRequest, ConnectionHandle, ScanRequest, ScanResponse, TableHandle, TableInfo,
      VersionInfo, WriteResult, WriteRowsRequest, infer_backend_kind,
   },
};

/// A held call. `entered` resolves once the call reaches the gate; the call
/// proceeds after `release`.
#[derive(Clone, Default)]
pub struct Gate {
   entered: Arc<Notify>,
   release: Arc<Notify>,
}

impl Gate {
   pub async fn entered(&self) {
      self.entered.notified().await;
   }

   pub fn release(&self) {
      self.release.notify_one();
   }
}

#[derive(Default)]
pub struct MockClient {
   tables:      Mutex<Vec<String>>,
   failures:    Mutex<HashMap<&'static str, (ErrorCode, String)>>,
   gates:       Mutex<HashMap<&'static str, Gate>>,
   calls:       Mutex<Vec<String>>,
   connections: Mutex<HashSet<String>>,
   /// table id -> (connection id, table name)
   opened:      Mutex<HashMap<String, (String, String)>>,
   /// Latest version per table name; a table starts at version 1.
   versions:    Mutex<HashMap<String, u64>>,
   pinned:      Mutex<HashMap<String, u64>>,
   added:       Mutex<Vec<SchemaField>>,
   requests:    Mutex<Vec<ConnectRequest>>,
   next_id:     AtomicUsize,
}

impl MockClient {
   pub fn with_tables(names: &[&str]) -> Arc<Self> {
      let client = Self::default();
      *client.tables.lock() = names.iter().map(|n| (*n).to_string()).collect();
      Arc::new(client)
   }

   pub fn set_tables(&self, names: &[&str]) {
      *self.tables.lock() = names.iter().map(|n| (*n).to_string()).collect();
   }

   /// Makes every following call of `op` fail until [`MockClient::recover`].
   pub fn fail(&self, op: &'static str, code: ErrorCode, message: &str) {
      self.failures.lock().insert(op, (code, message.to_string()));
   }

   pub fn recover(&self, op: &'static str) {
      self.failures.lock().remove(op);
   }

   /// Holds the next call of `op` at its gate.
   pub fn hold(&self, op: &'static str) -> Gate {
      let gate = Gate::default();
      self.gates.lock().insert(op, gate.clone());
      gate
   }

   pub fn calls(&self, op: &str) -> usize {
      self.calls.lock().iter().filter(|c| *c == op).count()
   }

   pub fn live_connections(&self) -> usize {
      self.connections.lock().len()
   }

   pub fn last_request(&self) -> Option<ConnectRequest> {
      self.requests.lock().last().cloned()
   }

   fn next(&self, prefix: &str) -> String {
      format!("{prefix}{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
   }

   async fn pass(&self, op: &'static str) -> Result<()> {
      self.calls.lock().push(op.to_string());
      let gate = self.gates.lock().remove(op);
      if let Some(gate) = gate {
         gate.entered.notify_one();
         gate.release.notified().await;
      }
      match self.failures.lock().get(op) {
         Some((code, message)) => {
            Err(Error::Rejected { code: *code, message: message.clone() })
         },
         None => Ok(()),
      }
   }

   fn require_connection(&self, connection_id: &str) -> Result<()> {
      if self.connections.lock().contains(connection_id) {
         Ok(())
      } else {
         Err(Error::not_found("connection", connection_id))
      }
   }

   fn table_name(&self, table_id: &str) -> Result<String> {
      self
         .opened
         .lock()
         .get(table_id)
         .map(|(_, name)| name.clone())
         .ok_or_else(|| Error::not_found("table", table_id))
   }

   fn latest(&self, name: &str) -> u64 {
      self.versions.lock().get(name).copied().unwrap_or(1)
   }

   fn bump(&self, name: &str) -> u64 {
      let mut versions = self.versions.lock();
      let version = versions.entry(name.to_string()).or_insert(1);
      *version += 1;
      *version
   }

   pub fn items_schema() -> SchemaDefinition {
      SchemaDefinition {
         fields: vec![
            SchemaField::new("id", FieldType::Int32, false),
            SchemaField::new("text", FieldType::Utf8, true),
            SchemaField::vector("vector", 3, false),
         ],
      }
   }
}

#[async_trait::async_trait]
impl DatabaseClient for MockClient {
   async fn connect(&self, request: &ConnectRequest) -> Result<ConnectionHandle> {
      self.requests.lock().push(request.clone());
      self.pass("connect").await?;
      if request.uri.trim().is_empty() {
         return Err(Error::invalid("connection uri cannot be empty"));
      }
      let connection_id = self.next("c");
      self.connections.lock().insert(connection_id.clone());
      Ok(ConnectionHandle {
         connection_id,
         backend_kind: infer_backend_kind(&request.uri),
         name: request.name.clone(),
         uri: request.uri.clone(),
      })
   }

   async fn list_tables(&self, connection_id: &str) -> Result<Vec<TableInfo>> {
      self.pass("list_tables").await?;
      self.require_connection(connection_id)?;
      Ok(self
         .tables
         .lock()
         .iter()
         .map(|name| TableInfo { name: name.clone() })
         .collect())
   }

   async fn open_table(&self, connection_id: &str, name: &str) -> Result<TableHandle> {
      self.pass("open_table").await?;
      self.require_connection(connection_id)?;
      if !self.tables.lock().iter().any(|t| t == name) {
         return Err(Error::not_found("table", name));
      }
      let table_id = self.next("t");
      self
         .opened
         .lock()
         .insert(table_id.clone(), (connection_id.to_string(), name.to_string()));
      Ok(TableHandle { table_id, name: name.to_string() })
   }

   async fn get_schema(&self, table_id: &str) -> Result<SchemaDefinition> {
      self.pass("get_schema").await?;
      self.table_name(table_id)?;
      let mut schema = Self::items_schema();
      schema.fields.extend(self.added.lock().iter().cloned());
      Ok(schema)
   }

   async fn scan(&self, table_id: &str, request: &ScanRequest) -> Result<ScanResponse> {
      self.pass("scan").await?;
      if !self.opened.lock().contains_key(table_id) {
         return Err(Error::not_found("table", table_id));
      }
      let offset = request.offset.unwrap_or(0);
      let limit = request.limit.unwrap_or(10);
      Ok(ScanResponse {
         chunk:       DataChunk::Json(JsonChunk {
            rows: vec![json!({"id": offset, "table": table_id})],
            schema: Self::items_schema(),
            offset,
            limit,
         }),
         next_offset: None,
      })
   }

   async fn disconnect(&self, connection_id: &str) -> Result<usize> {
      self.pass("disconnect").await?;
      if !self.connections.lock().remove(connection_id) {
         return Err(Error::not_found("connection", connection_id));
      }
      let mut opened = self.opened.lock();
      let before = opened.len();
      opened.retain(|_, (conn, _)| conn != connection_id);
      Ok(before - opened.len())
   }

   async fn create_table(
      &self,
      connection_id: &str,
      name: &str,
      schema: &SchemaDefinition,
   ) -> Result<TableInfo> {
      self.pass("create_table").await?;
      self.require_connection(connection_id)?;
      schema.validate()?;
      self.tables.lock().push(name.to_string());
      Ok(TableInfo { name: name.to_string() })
   }

   async fn drop_table(&self, connection_id: &str, name: &str) -> Result<()> {
      self.pass("drop_table").await?;
      self.require_connection(connection_id)?;
      let mut tables = self.tables.lock();
      let before = tables.len();
      tables.retain(|t| t != name);
      if tables.len() == before {
         return Err(Error::not_found("table", name));
      }
      Ok(())
   }

   async fn list_versions(&self, table_id: &str) -> Result<Vec<VersionInfo>> {
      self.pass("list_versions").await?;
      if !self.opened.lock().contains_key(table_id) {
         return Err(Error::not_found("table", table_id));
      }
      Ok(vec![VersionInfo {
         version:   1,
         timestamp: "2024-01-01T00:00:00+00:00".to_string(),
         metadata:  HashMap::new(),
      }])
   }

   async fn rename_table(&self, connection_id: &str, name: &str, new_name: &str) -> Result<()> {
      self.pass("rename_table").await?;
      self.require_connection(connection_id)?;
      let mut tables = self.tables.lock();
      let Some(slot) = tables.iter_mut().find(|t| t.as_str() == name) else {
         return Err(Error::not_found("table", name));
      };
      *slot = new_name.to_string();
      for (conn, table) in self.opened.lock().values_mut() {
         if conn.as_str() == connection_id && table.as_str() == name {
            *table = new_name.to_string();
         }
      }
      Ok(())
   }

   async fn get_table_version(&self, table_id: &str) -> Result<u64> {
      self.pass("get_table_version").await?;
      let name = self.table_name(table_id)?;
      let pinned = self.pinned.lock().get(table_id).copied();
      Ok(pinned.unwrap_or_else(|| self.latest(&name)))
   }

   async fn checkout_table_version(&self, table_id: &str, version: u64) -> Result<u64> {
      self.pass("checkout_table_version").await?;
      let name = self.table_name(table_id)?;
      if version == 0 || version > self.latest(&name) {
         return Err(Error::not_found("version", version.to_string()));
      }
      self.pinned.lock().insert(table_id.to_string(), version);
      Ok(version)
   }

   async fn checkout_table_latest(&self, table_id: &str) -> Result<u64> {
      self.pass("checkout_table_latest").await?;
      let name = self.table_name(table_id)?;
      self.pinned.lock().remove(table_id);
      Ok(self.latest(&name))
   }

   async fn add_columns(
      &self,
      table_id: &str,
      columns: &SchemaDefinition,
   ) -> Result<SchemaDefinition> {
      self.pass("add_columns").await?;
      let name = self.table_name(table_id)?;
      columns.validate()?;
      self.added.lock().extend(columns.fields.iter().cloned());
      self.bump(&name);
      let mut schema = Self::items_schema();
      schema.fields.extend(self.added.lock().iter().cloned());
      Ok(schema)
   }

   async fn write_rows(&self, table_id: &str, request: &WriteRowsRequest) -> Result<WriteResult> {
      self.pass("write_rows").await?;
      let name = self.table_name(table_id)?;
      if request.rows.is_empty() {
         return Err(Error::invalid("rows cannot be empty"));
      }
      Ok(WriteResult { rows: request.rows.len(), version: self.bump(&name) })
   }

   async fn delete_rows(&self, table_id: &str, filter: &str) -> Result<u64> {
      self.pass("delete_rows").await?;
      let name = self.table_name(table_id)?;
      if filter.trim().is_empty() {
         return Err(Error::invalid("delete needs a filter"));
      }
      Ok(self.bump(&name))
   }
}
