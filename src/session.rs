//! Profile-centric orchestration on top of the [`ConnectionRegistry`].
//!
//! Most operations select their profile as a side effect, so observers always
//! know whose connection state is authoritative.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
   client::{DatabaseClient, LanceClient},
   config::Config,
   error::{Error, Result},
   profiles::{JsonProfileStore, ProfileBook, ProfileStore},
   registry::{
      ConnectFlow, ConnectionRegistry, ConnectionState, LaneOutcome, OpenedTable, RegistryEvent,
   },
   schema::SchemaDefinition,
   types::{
      AuthDescriptor, CloneTableRequest, ColumnChange, CombinedSearchRequest, ConnectRequest,
      ConnectionProfile, CreateIndexRequest, DisconnectResponse, ExportRequest, ExportResult,
      FtsSearchRequest, ImportRequest, IndexInfo, OptimizeRequest, ProfileDraft,
      QueryFilterRequest, ScanRequest, ScanResponse, TableInfo, UpdateResult, UpdateRowsRequest,
      VectorSearchRequest, VersionInfo, WriteResult, WriteRowsRequest,
   },
   vault::{FileVault, SecretVault},
};

/// What happened to a profile's credential after the profile was deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CredentialCleanup {
   /// The profile did not reference the vault.
   NotApplicable,
   /// Other profiles still reference the credential.
   Retained { reference: String, remaining: usize },
   Removed { reference: String },
   /// Removal was attempted and failed; the profile is deleted regardless.
   Failed { reference: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
   pub profile:    ConnectionProfile,
   pub credential: CredentialCleanup,
}

pub struct Session {
   registry: Arc<ConnectionRegistry>,
   profiles: Arc<dyn ProfileStore>,
   vault:    Arc<dyn SecretVault>,
   book:     Mutex<ProfileBook>,
}

impl Session {
   pub fn new(
      registry: Arc<ConnectionRegistry>,
      profiles: Arc<dyn ProfileStore>,
      vault: Arc<dyn SecretVault>,
   ) -> Result<Self> {
      let book = profiles.load()?;
      tracing::debug!(profiles = book.profiles.len(), "session loaded");
      Ok(Self { registry, profiles, vault, book: Mutex::new(book) })
   }

   /// Session over lancedb with the file-backed profile store and vault.
   pub fn from_config(cfg: &Config) -> Result<Self> {
      let client: Arc<dyn DatabaseClient> = Arc::new(LanceClient::from_config(cfg));
      let registry = Arc::new(ConnectionRegistry::new(client, cfg.event_capacity));
      let profiles = Arc::new(JsonProfileStore::new(cfg.profiles_path()));
      let mut vault = FileVault::new(cfg.vault_path(), cfg.vault_key_path());
      if let Some(log_n) = cfg.vault_work_factor {
         vault = vault.with_work_factor(log_n);
      }
      Self::new(registry, profiles, Arc::new(vault))
   }

   pub fn registry(&self) -> &Arc<ConnectionRegistry> {
      &self.registry
   }

   pub fn vault(&self) -> &Arc<dyn SecretVault> {
      &self.vault
   }

   pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
      self.registry.subscribe()
   }

   pub fn profiles(&self) -> Vec<ConnectionProfile> {
      self.book.lock().profiles.clone()
   }

   pub fn active_profile_id(&self) -> Option<String> {
      self.book.lock().active_profile_id.clone()
   }

   pub fn profile(&self, profile_id: &str) -> Result<ConnectionProfile> {
      self
         .book
         .lock()
         .get(profile_id)
         .cloned()
         .ok_or_else(|| Error::not_found("profile", profile_id))
   }

   pub fn state(&self, profile_id: &str) -> ConnectionState {
      self.registry.state(profile_id)
   }

   /// Applies `f` to a copy of the book, persists it, and only then makes it
   /// current.
   fn mutate_book<T>(&self, f: impl FnOnce(&mut ProfileBook) -> Result<T>) -> Result<T> {
      let mut guard = self.book.lock();
      let mut next = guard.clone();
      let value = f(&mut next)?;
      self.profiles.save(&next)?;
      *guard = next;
      Ok(value)
   }

   fn validate_draft(draft: &ProfileDraft) -> Result<ProfileDraft> {
      let mut draft = draft.clone();
      draft.name = draft.name.trim().to_string();
      draft.uri = draft.uri.trim().to_string();
      if draft.name.is_empty() {
         return Err(Error::invalid("profile name cannot be empty"));
      }
      if draft.uri.is_empty() {
         return Err(Error::invalid("profile uri cannot be empty"));
      }
      match &draft.auth {
         AuthDescriptor::SecretRef { reference, .. } if reference.trim().is_empty() => {
            return Err(Error::invalid("secret reference cannot be empty"));
         },
         AuthDescriptor::Inline { provider, .. } | AuthDescriptor::SecretRef { provider, .. }
            if provider.trim().is_empty() =>
         {
            return Err(Error::invalid("auth provider cannot be empty"));
         },
         _ => {},
      }
      Ok(draft)
   }

   pub fn create_profile(&self, draft: &ProfileDraft) -> Result<ConnectionProfile> {
      let draft = Self::validate_draft(draft)?;
      let profile = ConnectionProfile {
         id:              Uuid::new_v4().to_string(),
         name:            draft.name,
         uri:             draft.uri,
         storage_options: draft.storage_options,
         options:         draft.options,
         auth:            draft.auth,
      };
      self.mutate_book(|book| {
         book.profiles.push(profile.clone());
         Ok(())
      })?;
      tracing::info!(profile_id = %profile.id, name = %profile.name, "profile created");
      Ok(profile)
   }

   pub fn update_profile(&self, profile_id: &str, draft: &ProfileDraft) -> Result<ConnectionProfile> {
      let draft = Self::validate_draft(draft)?;
      let updated = self.mutate_book(|book| {
         let profile = book
            .get_mut(profile_id)
            .ok_or_else(|| Error::not_found("profile", profile_id))?;
         profile.name = draft.name;
         profile.uri = draft.uri;
         profile.storage_options = draft.storage_options;
         profile.options = draft.options;
         profile.auth = draft.auth;
         Ok(profile.clone())
      })?;
      tracing::info!(profile_id, "profile updated");
      Ok(updated)
   }

   /// Marks `profile_id` as the active context and persists the choice.
   pub fn select(&self, profile_id: &str) -> Result<ConnectionProfile> {
      let profile = self.profile(profile_id)?;
      if self.active_profile_id().as_deref() != Some(profile_id) {
         self.mutate_book(|book| {
            book.active_profile_id = Some(profile_id.to_string());
            Ok(())
         })?;
         tracing::debug!(profile_id, "profile selected");
      }
      Ok(profile)
   }

   /// Deletes a profile, drops its connection state, then removes its vault
   /// credential if no other profile references it. Cleanup failures are
   /// reported in the result, never raised.
   pub async fn delete_profile(&self, profile_id: &str) -> Result<DeleteReport> {
      let (profile, remaining) = self.mutate_book(|book| {
         let index = book
            .profiles
            .iter()
            .position(|p| p.id == profile_id)
            .ok_or_else(|| Error::not_found("profile", profile_id))?;
         let profile = book.profiles.remove(index);
         if book.active_profile_id.as_deref() == Some(profile_id) {
            book.active_profile_id = None;
         }
         let remaining = profile
            .auth
            .secret_reference()
            .map(|reference| book.references_to(reference));
         Ok((profile, remaining))
      })?;

      self.registry.discard(profile_id).await;

      let credential = match (profile.auth.secret_reference(), remaining) {
         (Some(reference), Some(remaining)) if remaining > 0 => {
            tracing::debug!(reference, remaining, "credential still referenced");
            CredentialCleanup::Retained { reference: reference.to_string(), remaining }
         },
         (Some(reference), _) => self.remove_credential(reference),
         (None, _) => CredentialCleanup::NotApplicable,
      };

      tracing::info!(profile_id, "profile deleted");
      Ok(DeleteReport { profile, credential })
   }

   fn remove_credential(&self, reference: &str) -> CredentialCleanup {
      match self.vault.delete(reference) {
         Ok(()) => {
            tracing::info!(reference, "credential removed");
            CredentialCleanup::Removed { reference: reference.to_string() }
         },
         Err(e) => {
            tracing::warn!(reference, error = %e, "credential cleanup failed");
            CredentialCleanup::Failed { reference: reference.to_string(), message: e.to_string() }
         },
      }
   }

   /// Removes every vault credential no profile references.
   pub fn collect_orphan_credentials(&self) -> Result<Vec<CredentialCleanup>> {
      let stored = self.vault.list()?;
      let book = self.book.lock().clone();
      let swept: Vec<_> = stored
         .into_iter()
         .filter(|summary| book.references_to(&summary.reference) == 0)
         .map(|summary| self.remove_credential(&summary.reference))
         .collect();
      tracing::debug!(swept = swept.len(), "orphan credentials collected");
      Ok(swept)
   }

   /// Stores credential params in the vault and returns the reference a
   /// `secret_ref` profile can point at.
   pub fn store_credential(
      &self,
      provider: &str,
      params: HashMap<String, String>,
      label: Option<&str>,
   ) -> Result<String> {
      Ok(self.vault.put(provider, params, label, None)?)
   }

   /// Replaces a `secret_ref` with the inline params it names, so the driver
   /// never sees an unresolved reference.
   fn resolve_auth(&self, auth: &AuthDescriptor) -> Result<AuthDescriptor> {
      match auth {
         AuthDescriptor::None => Ok(AuthDescriptor::None),
         AuthDescriptor::Inline { .. } => Ok(auth.clone()),
         AuthDescriptor::SecretRef { provider, reference } => {
            let record = self
               .vault
               .get(reference)?
               .ok_or_else(|| Error::not_found("credential", reference.as_str()))?;
            tracing::debug!(reference, provider, "resolved credential reference");
            Ok(AuthDescriptor::Inline { provider: provider.clone(), params: record.params })
         },
      }
   }

   fn connect_request(&self, profile: &ConnectionProfile) -> Result<ConnectRequest> {
      Ok(ConnectRequest {
         name:            profile.name.clone(),
         uri:             profile.uri.clone(),
         storage_options: profile.storage_options.clone(),
         options:         profile.options.clone(),
         auth:            self.resolve_auth(&profile.auth)?,
      })
   }

   /// Connects the profile and, once connected, lists its tables.
   pub async fn connect(&self, profile_id: &str) -> Result<ConnectFlow> {
      let profile = self.select(profile_id)?;
      let request = self.connect_request(&profile)?;

      self.registry.connect_and_refresh(profile_id, &request).await
   }

   pub async fn refresh_tables(&self, profile_id: &str) -> Result<LaneOutcome<Vec<String>>> {
      self.select(profile_id)?;
      self.registry.refresh_tables(profile_id).await
   }

   pub async fn open_table(&self, profile_id: &str, name: &str) -> Result<LaneOutcome<OpenedTable>> {
      self.select(profile_id)?;
      let name = name.trim();
      if name.is_empty() {
         return Err(Error::invalid("table name cannot be empty"));
      }
      self.registry.open_table(profile_id, name).await
   }

   pub async fn disconnect(&self, profile_id: &str) -> Result<LaneOutcome<DisconnectResponse>> {
      self.select(profile_id)?;
      self.registry.disconnect(profile_id).await
   }

   /// Clears the profile's connection state without asking the driver to
   /// disconnect.
   pub fn reset_connection(&self, profile_id: &str) -> Result<()> {
      self.select(profile_id)?;
      self.registry.reset(profile_id);
      Ok(())
   }

   fn connection_id(&self, profile_id: &str) -> Result<String> {
      self
         .registry
         .state(profile_id)
         .connection_id()
         .map(str::to_string)
         .ok_or_else(|| Error::invalid(format!("profile '{profile_id}' is not connected")))
   }

   fn active_table_id(&self, profile_id: &str) -> Result<String> {
      self
         .registry
         .state(profile_id)
         .active_table_id
         .ok_or_else(|| Error::invalid(format!("profile '{profile_id}' has no open table")))
   }

   pub async fn scan(&self, profile_id: &str, request: &ScanRequest) -> Result<ScanResponse> {
      self.select(profile_id)?;
      let table_id = self.active_table_id(profile_id)?;
      self.registry.client().scan(&table_id, request).await
   }

   pub async fn vector_search(
      &self,
      profile_id: &str,
      request: &VectorSearchRequest,
   ) -> Result<ScanResponse> {
      self.select(profile_id)?;
      let table_id = self.active_table_id(profile_id)?;
      self.registry.client().vector_search(&table_id, request).await
   }

   pub async fn fts_search(
      &self,
      profile_id: &str,
      request: &FtsSearchRequest,
   ) -> Result<ScanResponse> {
      self.select(profile_id)?;
      let table_id = self.active_table_id(profile_id)?;
      self.registry.client().fts_search(&table_id, request).await
   }

   pub async fn list_versions(&self, profile_id: &str) -> Result<Vec<VersionInfo>> {
      self.select(profile_id)?;
      let table_id = self.active_table_id(profile_id)?;
      self.registry.client().list_versions(&table_id).await
   }

   /// Creates an empty table and refreshes the table list.
   pub async fn create_table(
      &self,
      profile_id: &str,
      name: &str,
      schema: &SchemaDefinition,
   ) -> Result<TableInfo> {
      self.select(profile_id)?;
      schema.validate()?;
      let connection_id = self.connection_id(profile_id)?;
      let info = self
         .registry
         .client()
         .create_table(&connection_id, name, schema)
         .await?;
      self.registry.refresh_tables(profile_id).await?;
      Ok(info)
   }

   /// Drops a table, clearing it as the active table if it was, and refreshes
   /// the table list.
   pub async fn drop_table(&self, profile_id: &str, name: &str) -> Result<()> {
      self.select(profile_id)?;
      let connection_id = self.connection_id(profile_id)?;
      self
         .registry
         .client()
         .drop_table(&connection_id, name)
         .await?;
      self.registry.forget_table(profile_id, name);
      self.registry.refresh_tables(profile_id).await?;
      Ok(())
   }

   /// Renames a table and refreshes the table list. A renamed active table is
   /// closed; it has to be opened again under its new name.
   pub async fn rename_table(&self, profile_id: &str, name: &str, new_name: &str) -> Result<()> {
      self.select(profile_id)?;
      let connection_id = self.connection_id(profile_id)?;
      self
         .registry
         .client()
         .rename_table(&connection_id, name, new_name)
         .await?;
      self.registry.forget_table(profile_id, name.trim());
      self.registry.refresh_tables(profile_id).await?;
      Ok(())
   }

   /// Clones the active table into `request.target` and refreshes the table
   /// list. The active table stays open.
   pub async fn clone_table(
      &self,
      profile_id: &str,
      request: &CloneTableRequest,
   ) -> Result<TableInfo> {
      let table_id = self.active_table(profile_id)?;
      let connection_id = self.connection_id(profile_id)?;
      let info = self
         .registry
         .client()
         .clone_table(&connection_id, &table_id, request)
         .await?;
      self.registry.refresh_tables(profile_id).await?;
      Ok(info)
   }

   fn active_table(&self, profile_id: &str) -> Result<String> {
      self.select(profile_id)?;
      self.active_table_id(profile_id)
   }

   /// Publishes `schema` for `table_id` if it is still the active table.
   fn schema_changed(&self, profile_id: &str, table_id: &str, schema: &SchemaDefinition) {
      if !self
         .registry
         .replace_schema(profile_id, table_id, schema.clone())
      {
         tracing::debug!(profile_id, table_id, "table closed before its schema changed");
      }
   }

   async fn reload_schema(&self, profile_id: &str, table_id: &str) -> Result<()> {
      let schema = self.registry.client().get_schema(table_id).await?;
      self.schema_changed(profile_id, table_id, &schema);
      Ok(())
   }

   pub async fn list_indexes(&self, profile_id: &str) -> Result<Vec<IndexInfo>> {
      let table_id = self.active_table(profile_id)?;
      self.registry.client().list_indexes(&table_id).await
   }

   pub async fn create_index(&self, profile_id: &str, request: &CreateIndexRequest) -> Result<()> {
      let table_id = self.active_table(profile_id)?;
      self.registry.client().create_index(&table_id, request).await
   }

   pub async fn drop_index(&self, profile_id: &str, name: &str) -> Result<()> {
      let table_id = self.active_table(profile_id)?;
      self.registry.client().drop_index(&table_id, name).await
   }

   pub async fn table_version(&self, profile_id: &str) -> Result<u64> {
      let table_id = self.active_table(profile_id)?;
      self.registry.client().get_table_version(&table_id).await
   }

   /// Pins the active table to `version`. The schema shown is the one of
   /// that version.
   pub async fn checkout_version(&self, profile_id: &str, version: u64) -> Result<u64> {
      let table_id = self.active_table(profile_id)?;
      let current = self
         .registry
         .client()
         .checkout_table_version(&table_id, version)
         .await?;
      self.reload_schema(profile_id, &table_id).await?;
      Ok(current)
   }

   pub async fn checkout_latest(&self, profile_id: &str) -> Result<u64> {
      let table_id = self.active_table(profile_id)?;
      let current = self
         .registry
         .client()
         .checkout_table_latest(&table_id)
         .await?;
      self.reload_schema(profile_id, &table_id).await?;
      Ok(current)
   }

   pub async fn add_columns(
      &self,
      profile_id: &str,
      columns: &SchemaDefinition,
   ) -> Result<SchemaDefinition> {
      let table_id = self.active_table(profile_id)?;
      let schema = self
         .registry
         .client()
         .add_columns(&table_id, columns)
         .await?;
      self.schema_changed(profile_id, &table_id, &schema);
      Ok(schema)
   }

   pub async fn alter_columns(
      &self,
      profile_id: &str,
      changes: &[ColumnChange],
   ) -> Result<SchemaDefinition> {
      let table_id = self.active_table(profile_id)?;
      let schema = self
         .registry
         .client()
         .alter_columns(&table_id, changes)
         .await?;
      self.schema_changed(profile_id, &table_id, &schema);
      Ok(schema)
   }

   pub async fn drop_columns(
      &self,
      profile_id: &str,
      columns: &[String],
   ) -> Result<SchemaDefinition> {
      let table_id = self.active_table(profile_id)?;
      let schema = self
         .registry
         .client()
         .drop_columns(&table_id, columns)
         .await?;
      self.schema_changed(profile_id, &table_id, &schema);
      Ok(schema)
   }

   pub async fn write_rows(
      &self,
      profile_id: &str,
      request: &WriteRowsRequest,
   ) -> Result<WriteResult> {
      let table_id = self.active_table(profile_id)?;
      self.registry.client().write_rows(&table_id, request).await
   }

   pub async fn update_rows(
      &self,
      profile_id: &str,
      request: &UpdateRowsRequest,
   ) -> Result<UpdateResult> {
      let table_id = self.active_table(profile_id)?;
      self.registry.client().update_rows(&table_id, request).await
   }

   pub async fn delete_rows(&self, profile_id: &str, filter: &str) -> Result<u64> {
      let table_id = self.active_table(profile_id)?;
      self.registry.client().delete_rows(&table_id, filter).await
   }

   pub async fn import_data(
      &self,
      profile_id: &str,
      request: &ImportRequest,
   ) -> Result<WriteResult> {
      let table_id = self.active_table(profile_id)?;
      self.registry.client().import_data(&table_id, request).await
   }

   pub async fn export_data(
      &self,
      profile_id: &str,
      request: &ExportRequest,
   ) -> Result<ExportResult> {
      let table_id = self.active_table(profile_id)?;
      self.registry.client().export_data(&table_id, request).await
   }

   pub async fn optimize_table(&self, profile_id: &str, request: &OptimizeRequest) -> Result<u64> {
      let table_id = self.active_table(profile_id)?;
      self.registry.client().optimize_table(&table_id, request).await
   }

   pub async fn query_filter(
      &self,
      profile_id: &str,
      request: &QueryFilterRequest,
   ) -> Result<ScanResponse> {
      let table_id = self.active_table(profile_id)?;
      self.registry.client().query_filter(&table_id, request).await
   }

   pub async fn combined_search(
      &self,
      profile_id: &str,
      request: &CombinedSearchRequest,
   ) -> Result<ScanResponse> {
      let table_id = self.active_table(profile_id)?;
      self.registry.client().combined_search(&table_id, request).await
   }
}
