//! Per-profile connection state and the four busy-flag guarded lanes that
//! mutate it.

use std::{collections::HashMap, sync::Arc, time::Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::{
   client::DatabaseClient,
   error::{Error, Result},
   schema::SchemaDefinition,
   types::{ConnectRequest, ConnectionHandle, DisconnectResponse, TableHandle},
};

/// One of the four independently guarded operation kinds of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
   Connect,
   Refresh,
   Open,
   Disconnect,
}

impl Lane {
   pub const fn as_str(self) -> &'static str {
      match self {
         Self::Connect => "connect",
         Self::Refresh => "refresh",
         Self::Open => "open",
         Self::Disconnect => "disconnect",
      }
   }
}

/// Why a lane request was dropped without reaching the driver, or why its
/// result was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
   /// A lane of this connection is already in flight.
   Busy(Lane),
   /// The lane needs a live handle and there is none.
   NotConnected,
   /// The state was reset or discarded while the call was in flight.
   Superseded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum LaneOutcome<T> {
   Completed(T),
   Skipped(SkipReason),
}

impl<T> LaneOutcome<T> {
   pub fn completed(self) -> Option<T> {
      match self {
         Self::Completed(value) => Some(value),
         Self::Skipped(_) => None,
      }
   }

   pub const fn is_skipped(&self) -> bool {
      matches!(self, Self::Skipped(_))
   }

   pub const fn skip_reason(&self) -> Option<SkipReason> {
      match self {
         Self::Skipped(reason) => Some(*reason),
         Self::Completed(_) => None,
      }
   }

   pub fn map<U>(self, f: impl FnOnce(T) -> U) -> LaneOutcome<U> {
      match self {
         Self::Completed(value) => LaneOutcome::Completed(f(value)),
         Self::Skipped(reason) => LaneOutcome::Skipped(reason),
      }
   }
}

/// Result of [`ConnectionRegistry::connect_and_refresh`]: the connect lane,
/// and the table refresh chained after it when the connect completed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectFlow {
   pub connect: LaneOutcome<ConnectionHandle>,
   pub tables:  Option<LaneOutcome<Vec<String>>>,
}

/// Live derived state of one profile.
///
/// `schema` is only ever populated while `active_table_id` is, and is cleared
/// whenever a new table starts opening.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
   pub handle:            Option<ConnectionHandle>,
   pub tables:            Vec<String>,
   pub active_table_name: Option<String>,
   pub active_table_id:   Option<String>,
   pub schema:            Option<SchemaDefinition>,
   pub connecting:        bool,
   pub refreshing:        bool,
   pub opening:           bool,
   pub disconnecting:     bool,
}

impl ConnectionState {
   pub const fn is_busy(&self, lane: Lane) -> bool {
      match lane {
         Lane::Connect => self.connecting,
         Lane::Refresh => self.refreshing,
         Lane::Open => self.opening,
         Lane::Disconnect => self.disconnecting,
      }
   }

   /// The lane currently in flight, if any.
   pub fn busy_lane(&self) -> Option<Lane> {
      [Lane::Connect, Lane::Refresh, Lane::Open, Lane::Disconnect]
         .into_iter()
         .find(|lane| self.is_busy(*lane))
   }

   pub fn connection_id(&self) -> Option<&str> {
      self.handle.as_ref().map(|h| h.connection_id.as_str())
   }

   const fn set_busy(&mut self, lane: Lane, busy: bool) {
      match lane {
         Lane::Connect => self.connecting = busy,
         Lane::Refresh => self.refreshing = busy,
         Lane::Open => self.opening = busy,
         Lane::Disconnect => self.disconnecting = busy,
      }
   }

   fn clear_active_table(&mut self) {
      self.active_table_name = None;
      self.active_table_id = None;
      self.schema = None;
   }
}

/// State snapshot published after every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEvent {
   pub profile_id: String,
   pub state:      ConnectionState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenedTable {
   pub table:  TableHandle,
   pub schema: SchemaDefinition,
}

#[derive(Default)]
struct Entry {
   state:      ConnectionState,
   generation: u64,
}

struct Ticket {
   profile_id: String,
   lane:       Lane,
   entry:      Arc<Mutex<Entry>>,
   generation: u64,
}

impl Ticket {
   /// Ticket for `lane` under the same generation. The caller must have set
   /// the lane's flag in the update that finished `self`.
   fn handoff(&self, lane: Lane) -> Self {
      Self {
         profile_id: self.profile_id.clone(),
         lane,
         entry: self.entry.clone(),
         generation: self.generation,
      }
   }
}

/// Owner of every profile's [`ConnectionState`].
///
/// Entries are locked individually, so lanes of different profiles never wait
/// on each other. Within one entry a lane is admitted only while no other lane
/// is in flight.
pub struct ConnectionRegistry {
   client:  Arc<dyn DatabaseClient>,
   entries: RwLock<HashMap<String, Arc<Mutex<Entry>>>>,
   events:  broadcast::Sender<RegistryEvent>,
}

impl ConnectionRegistry {
   pub fn new(client: Arc<dyn DatabaseClient>, event_capacity: usize) -> Self {
      let (events, _) = broadcast::channel(event_capacity.max(1));
      Self { client, entries: RwLock::new(HashMap::new()), events }
   }

   pub fn client(&self) -> &Arc<dyn DatabaseClient> {
      &self.client
   }

   pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
      self.events.subscribe()
   }

   fn entry(&self, profile_id: &str) -> Arc<Mutex<Entry>> {
      if let Some(entry) = self.entries.read().get(profile_id) {
         return entry.clone();
      }
      self
         .entries
         .write()
         .entry(profile_id.to_string())
         .or_default()
         .clone()
   }

   /// Current state of a profile, creating an idle entry on first reference.
   pub fn state(&self, profile_id: &str) -> ConnectionState {
      self.entry(profile_id).lock().state.clone()
   }

   pub fn profile_ids(&self) -> Vec<String> {
      self.entries.read().keys().cloned().collect()
   }

   fn publish(&self, profile_id: &str, state: ConnectionState) {
      // No subscribers is not an error.
      let _ = self
         .events
         .send(RegistryEvent { profile_id: profile_id.to_string(), state });
   }

   /// Admits `lane` if the entry is idle, setting its flag in the same critical
   /// section. `prepare` runs under that lock before the flag is set and may
   /// refuse admission.
   fn begin<T>(
      &self,
      profile_id: &str,
      lane: Lane,
      prepare: impl FnOnce(&mut Entry) -> std::result::Result<T, SkipReason>,
   ) -> std::result::Result<(Ticket, T), SkipReason> {
      let entry = self.entry(profile_id);
      let (generation, value, snapshot) = {
         let mut guard = entry.lock();
         if let Some(busy) = guard.state.busy_lane() {
            tracing::warn!(
               profile_id,
               lane = lane.as_str(),
               busy = busy.as_str(),
               "lane busy, dropping request"
            );
            return Err(SkipReason::Busy(busy));
         }
         let value = prepare(&mut guard)?;
         guard.state.set_busy(lane, true);
         (guard.generation, value, guard.state.clone())
      };
      self.publish(profile_id, snapshot);
      tracing::debug!(profile_id, lane = lane.as_str(), generation, "lane started");

      Ok((Ticket { profile_id: profile_id.to_string(), lane, entry, generation }, value))
   }

   /// Applies a lane's result if its generation is still current. With
   /// `finish`, the lane's busy flag is cleared as part of the same update.
   fn apply(&self, ticket: &Ticket, finish: bool, update: impl FnOnce(&mut Entry)) -> bool {
      let snapshot = {
         let mut entry = ticket.entry.lock();
         if entry.generation != ticket.generation {
            tracing::debug!(
               profile_id = %ticket.profile_id,
               lane = ticket.lane.as_str(),
               "lane superseded, discarding result"
            );
            return false;
         }
         if finish {
            entry.state.set_busy(ticket.lane, false);
         }
         update(&mut entry);
         entry.state.clone()
      };
      self.publish(&ticket.profile_id, snapshot);
      true
   }

   fn finish(&self, ticket: &Ticket, update: impl FnOnce(&mut Entry)) -> bool {
      self.apply(ticket, true, update)
   }

   fn fail(&self, ticket: &Ticket, error: &Error) {
      self.fail_with(ticket, error, |_| {});
   }

   /// Ends a failed lane, rolling back whatever partial result it already
   /// applied.
   fn fail_with(&self, ticket: &Ticket, error: &Error, rollback: impl FnOnce(&mut Entry)) {
      tracing::error!(
         profile_id = %ticket.profile_id,
         lane = ticket.lane.as_str(),
         code = error.code().as_str(),
         %error,
         "lane failed"
      );
      self.finish(ticket, rollback);
   }

   async fn release_quietly(&self, connection_id: &str) {
      if let Err(e) = self.client.disconnect(connection_id).await {
         tracing::warn!(connection_id, error = %e, "failed to release stale connection");
      }
   }

   /// Connect lane. Entering it fully resets the entry; a previously held
   /// handle is released afterwards on a best-effort basis.
   pub async fn connect(
      &self,
      profile_id: &str,
      request: &ConnectRequest,
   ) -> Result<LaneOutcome<ConnectionHandle>> {
      let (outcome, _) = self.run_connect(profile_id, request, None).await?;
      Ok(outcome)
   }

   /// Connect lane followed by the refresh lane. The refresh flag is raised in
   /// the same update that lowers the connect flag, so no other lane can be
   /// admitted between the two.
   pub async fn connect_and_refresh(
      &self,
      profile_id: &str,
      request: &ConnectRequest,
   ) -> Result<ConnectFlow> {
      let (connect, refresh) = self
         .run_connect(profile_id, request, Some(Lane::Refresh))
         .await?;
      let tables = match (&connect, refresh) {
         (LaneOutcome::Completed(handle), Some(ticket)) => {
            tracing::debug!(profile_id, lane = ticket.lane.as_str(), "lane handed off");
            Some(self.run_refresh(&ticket, &handle.connection_id).await?)
         },
         _ => None,
      };
      Ok(ConnectFlow { connect, tables })
   }

   async fn run_connect(
      &self,
      profile_id: &str,
      request: &ConnectRequest,
      then: Option<Lane>,
   ) -> Result<(LaneOutcome<ConnectionHandle>, Option<Ticket>)> {
      let started = Instant::now();
      let admitted = self.begin(profile_id, Lane::Connect, |entry| {
         let stale = entry.state.handle.take();
         entry.state = ConnectionState::default();
         entry.generation += 1;
         Ok(stale)
      });
      let (ticket, stale) = match admitted {
         Ok(admitted) => admitted,
         Err(reason) => return Ok((LaneOutcome::Skipped(reason), None)),
      };

      if let Some(stale) = stale {
         self.release_quietly(&stale.connection_id).await;
      }

      let handle = match self.client.connect(request).await {
         Ok(handle) => handle,
         Err(e) => {
            self.fail(&ticket, &e);
            return Err(e);
         },
      };

      let applied = self.finish(&ticket, |entry| {
         entry.state.handle = Some(handle.clone());
         if let Some(next) = then {
            entry.state.set_busy(next, true);
         }
      });
      if !applied {
         self.release_quietly(&handle.connection_id).await;
         return Ok((LaneOutcome::Skipped(SkipReason::Superseded), None));
      }

      tracing::info!(
         profile_id,
         connection_id = %handle.connection_id,
         backend = ?handle.backend_kind,
         elapsed_ms = started.elapsed().as_millis() as u64,
         "connection established"
      );
      let next = then.map(|lane| ticket.handoff(lane));
      Ok((LaneOutcome::Completed(handle), next))
   }

   /// Refresh lane. Replaces the table list wholesale.
   pub async fn refresh_tables(&self, profile_id: &str) -> Result<LaneOutcome<Vec<String>>> {
      let admitted = self.begin(profile_id, Lane::Refresh, |entry| {
         entry
            .state
            .connection_id()
            .map(str::to_string)
            .ok_or(SkipReason::NotConnected)
      });
      let (ticket, connection_id) = match admitted {
         Ok(admitted) => admitted,
         Err(reason) => return Ok(LaneOutcome::Skipped(reason)),
      };
      self.run_refresh(&ticket, &connection_id).await
   }

   async fn run_refresh(
      &self,
      ticket: &Ticket,
      connection_id: &str,
   ) -> Result<LaneOutcome<Vec<String>>> {
      let tables = match self.client.list_tables(connection_id).await {
         Ok(tables) => tables.into_iter().map(|t| t.name).collect::<Vec<_>>(),
         Err(e) => {
            self.fail(ticket, &e);
            return Err(e);
         },
      };

      if !self.finish(ticket, |entry| entry.state.tables = tables.clone()) {
         return Ok(LaneOutcome::Skipped(SkipReason::Superseded));
      }
      tracing::debug!(profile_id = %ticket.profile_id, tables = tables.len(), "tables refreshed");
      Ok(LaneOutcome::Completed(tables))
   }

   /// Open lane: opens `name`, then fetches the schema of the table id the
   /// open produced.
   ///
   /// The name is shown as active immediately, with id and schema cleared
   /// until each step lands. On failure the name stays so a retry is visible,
   /// but id and schema are both left empty.
   pub async fn open_table(&self, profile_id: &str, name: &str) -> Result<LaneOutcome<OpenedTable>> {
      let started = Instant::now();
      let admitted = self.begin(profile_id, Lane::Open, |entry| {
         let connection_id = entry
            .state
            .connection_id()
            .map(str::to_string)
            .ok_or(SkipReason::NotConnected)?;
         entry.state.active_table_name = Some(name.to_string());
         entry.state.active_table_id = None;
         entry.state.schema = None;
         Ok(connection_id)
      });
      let (ticket, connection_id) = match admitted {
         Ok(admitted) => admitted,
         Err(reason) => return Ok(LaneOutcome::Skipped(reason)),
      };

      let table = match self.client.open_table(&connection_id, name).await {
         Ok(table) => table,
         Err(e) => {
            self.fail(&ticket, &e);
            return Err(e);
         },
      };
      if !self.apply(&ticket, false, |entry| {
         entry.state.active_table_id = Some(table.table_id.clone());
      }) {
         return Ok(LaneOutcome::Skipped(SkipReason::Superseded));
      }

      let schema = match self.client.get_schema(&table.table_id).await {
         Ok(schema) => schema,
         Err(e) => {
            // without a schema the table is not usable; only the name survives
            self.fail_with(&ticket, &e, |entry| entry.state.active_table_id = None);
            return Err(e);
         },
      };
      if !self.finish(&ticket, |entry| entry.state.schema = Some(schema.clone())) {
         return Ok(LaneOutcome::Skipped(SkipReason::Superseded));
      }

      tracing::info!(
         profile_id,
         table = name,
         table_id = %table.table_id,
         fields = schema.fields.len(),
         elapsed_ms = started.elapsed().as_millis() as u64,
         "table opened"
      );
      Ok(LaneOutcome::Completed(OpenedTable { table, schema }))
   }

   /// Disconnect lane. On success the entry is fully reset.
   pub async fn disconnect(&self, profile_id: &str) -> Result<LaneOutcome<DisconnectResponse>> {
      let admitted = self.begin(profile_id, Lane::Disconnect, |entry| {
         entry
            .state
            .connection_id()
            .map(str::to_string)
            .ok_or(SkipReason::NotConnected)
      });
      let (ticket, connection_id) = match admitted {
         Ok(admitted) => admitted,
         Err(reason) => return Ok(LaneOutcome::Skipped(reason)),
      };

      let released_tables = match self.client.disconnect(&connection_id).await {
         Ok(released) => released,
         Err(e) => {
            self.fail(&ticket, &e);
            return Err(e);
         },
      };

      if !self.finish(&ticket, |entry| {
         entry.state = ConnectionState::default();
         entry.generation += 1;
      }) {
         return Ok(LaneOutcome::Skipped(SkipReason::Superseded));
      }

      tracing::info!(profile_id, %connection_id, released_tables, "disconnected");
      Ok(LaneOutcome::Completed(DisconnectResponse { connection_id, released_tables }))
   }

   /// Clears a profile's state without calling the driver. Lanes in flight
   /// when this runs have their results discarded.
   pub fn reset(&self, profile_id: &str) {
      let entry = self.entry(profile_id);
      let snapshot = {
         let mut entry = entry.lock();
         entry.state = ConnectionState::default();
         entry.generation += 1;
         entry.state.clone()
      };
      tracing::debug!(profile_id, "connection state reset");
      self.publish(profile_id, snapshot);
   }

   /// Drops the active table if it is `name`, e.g. after the table was dropped.
   pub fn forget_table(&self, profile_id: &str, name: &str) {
      let entry = self.entry(profile_id);
      let snapshot = {
         let mut entry = entry.lock();
         if entry.state.active_table_name.as_deref() != Some(name) {
            return;
         }
         entry.state.clear_active_table();
         entry.state.clone()
      };
      self.publish(profile_id, snapshot);
   }

   /// Replaces the schema of the active table after a column change or a
   /// checkout. Returns false, changing nothing, once `table_id` is no longer
   /// the active table.
   pub fn replace_schema(
      &self,
      profile_id: &str,
      table_id: &str,
      schema: SchemaDefinition,
   ) -> bool {
      let entry = self.entry(profile_id);
      let snapshot = {
         let mut entry = entry.lock();
         if entry.state.active_table_id.as_deref() != Some(table_id) {
            return false;
         }
         entry.state.schema = Some(schema);
         entry.state.clone()
      };
      self.publish(profile_id, snapshot);
      true
   }

   /// Removes a profile's entry, releasing its live handle if it has one.
   pub async fn discard(&self, profile_id: &str) {
      let Some(entry) = self.entries.write().remove(profile_id) else {
         return;
      };
      let handle = {
         let mut entry = entry.lock();
         entry.generation += 1;
         entry.state.handle.take()
      };
      if let Some(handle) = handle {
         self.release_quietly(&handle.connection_id).await;
      }
      tracing::debug!(profile_id, "connection state discarded");
   }
}

#[cfg(test)]
mod tests {
   use std::collections::HashMap;

   use pretty_assertions::assert_eq;

   use super::*;
   use crate::{client::mock::MockClient, envelope::ErrorCode, types::BackendKind};

   fn request(uri: &str) -> ConnectRequest {
      ConnectRequest {
         name:            "local".to_string(),
         uri:             uri.to_string(),
         storage_options: HashMap::new(),
         options:         Default::default(),
         auth:            Default::default(),
      }
   }

   fn registry(client: &Arc<MockClient>) -> Arc<ConnectionRegistry> {
      Arc::new(ConnectionRegistry::new(client.clone(), 16))
   }

   fn busy_count(state: &ConnectionState) -> usize {
      [Lane::Connect, Lane::Refresh, Lane::Open, Lane::Disconnect]
         .into_iter()
         .filter(|lane| state.is_busy(*lane))
         .count()
   }

   #[tokio::test]
   async fn connect_sets_handle_and_clears_flag() {
      let client = MockClient::with_tables(&["items"]);
      let reg = registry(&client);

      let outcome = reg.connect("p1", &request("/tmp/db")).await.unwrap();
      let handle = outcome.completed().unwrap();
      assert_eq!(handle.backend_kind, BackendKind::Local);

      let state = reg.state("p1");
      assert_eq!(state.handle, Some(handle));
      assert!(state.tables.is_empty());
      assert_eq!(busy_count(&state), 0);
   }

   #[tokio::test]
   async fn failed_connect_leaves_no_handle() {
      let client = MockClient::with_tables(&[]);
      let reg = registry(&client);
      reg.connect("p1", &request("/tmp/db")).await.unwrap();

      client.fail("connect", ErrorCode::InvalidArgument, "bad uri");
      let err = reg.connect("p1", &request("nope://")).await.unwrap_err();
      assert_eq!(err.code(), ErrorCode::InvalidArgument);

      let state = reg.state("p1");
      assert_eq!(state.handle, None);
      assert_eq!(busy_count(&state), 0);
      // the handle held before the attempt was released
      assert_eq!(client.live_connections(), 0);
   }

   #[tokio::test]
   async fn duplicate_connect_is_dropped_while_in_flight() {
      let client = MockClient::with_tables(&[]);
      let reg = registry(&client);
      let gate = client.hold("connect");

      let task = tokio::spawn({
         let reg = reg.clone();
         async move { reg.connect("p1", &request("/tmp/db")).await }
      });
      gate.entered().await;

      let before = reg.state("p1");
      assert!(before.connecting);
      assert_eq!(busy_count(&before), 1);

      let second = reg.connect("p1", &request("/tmp/db")).await.unwrap();
      assert_eq!(second, LaneOutcome::Skipped(SkipReason::Busy(Lane::Connect)));
      assert_eq!(reg.state("p1"), before);

      gate.release();
      let first = task.await.unwrap().unwrap();
      assert!(!first.is_skipped());
      assert_eq!(client.calls("connect"), 1);
      assert_eq!(client.live_connections(), 1);
   }

   #[tokio::test]
   async fn other_lanes_are_dropped_while_one_is_busy() {
      let client = MockClient::with_tables(&["items"]);
      let reg = registry(&client);
      reg.connect("p1", &request("/tmp/db")).await.unwrap();

      let gate = client.hold("list_tables");
      let task = tokio::spawn({
         let reg = reg.clone();
         async move { reg.refresh_tables("p1").await }
      });
      gate.entered().await;

      let open = reg.open_table("p1", "items").await.unwrap();
      assert_eq!(open.skip_reason(), Some(SkipReason::Busy(Lane::Refresh)));
      let state = reg.state("p1");
      assert_eq!(busy_count(&state), 1);
      assert_eq!(state.active_table_name, None);

      gate.release();
      let tables = task.await.unwrap().unwrap().completed().unwrap();
      assert_eq!(tables, vec!["items".to_string()]);
   }

   #[tokio::test]
   async fn refresh_after_connect_cannot_be_preempted() {
      let client = MockClient::with_tables(&["items"]);
      let reg = registry(&client);
      let mut events = reg.subscribe();
      let gate = client.hold("list_tables");

      let task = tokio::spawn({
         let reg = reg.clone();
         async move { reg.connect_and_refresh("p1", &request("/tmp/db")).await }
      });
      gate.entered().await;

      let state = reg.state("p1");
      assert!(state.handle.is_some());
      assert!(!state.connecting);
      assert!(state.refreshing);

      let open = reg.open_table("p1", "items").await.unwrap();
      assert_eq!(open.skip_reason(), Some(SkipReason::Busy(Lane::Refresh)));
      let refresh = reg.refresh_tables("p1").await.unwrap();
      assert_eq!(refresh.skip_reason(), Some(SkipReason::Busy(Lane::Refresh)));

      gate.release();
      let flow = task.await.unwrap().unwrap();
      assert!(flow.connect.completed().is_some());
      assert_eq!(flow.tables, Some(LaneOutcome::Completed(vec!["items".to_string()])));
      assert_eq!(client.calls("list_tables"), 1);
      assert_eq!(client.calls("open_table"), 0);

      // no published state had a handle with every lane idle before the
      // tables landed
      while let Ok(event) = events.try_recv() {
         if event.state.handle.is_some() && event.state.tables.is_empty() {
            assert_eq!(busy_count(&event.state), 1);
         }
      }
   }

   #[tokio::test]
   async fn superseded_connect_skips_chained_refresh() {
      let client = MockClient::with_tables(&["items"]);
      let reg = registry(&client);
      let gate = client.hold("connect");

      let task = tokio::spawn({
         let reg = reg.clone();
         async move { reg.connect_and_refresh("p1", &request("/tmp/db")).await }
      });
      gate.entered().await;
      reg.reset("p1");
      gate.release();

      let flow = task.await.unwrap().unwrap();
      assert_eq!(flow.connect.skip_reason(), Some(SkipReason::Superseded));
      assert_eq!(flow.tables, None);
      assert_eq!(client.calls("list_tables"), 0);
      assert_eq!(reg.state("p1"), ConnectionState::default());
   }

   #[tokio::test]
   async fn lanes_without_handle_are_skipped() {
      let client = MockClient::with_tables(&["items"]);
      let reg = registry(&client);

      assert_eq!(
         reg.refresh_tables("p1").await.unwrap().skip_reason(),
         Some(SkipReason::NotConnected)
      );
      assert_eq!(
         reg.open_table("p1", "items").await.unwrap().skip_reason(),
         Some(SkipReason::NotConnected)
      );
      assert_eq!(
         reg.disconnect("p1").await.unwrap().skip_reason(),
         Some(SkipReason::NotConnected)
      );
      assert_eq!(client.calls("list_tables"), 0);
      assert_eq!(reg.state("p1"), ConnectionState::default());
   }

   #[tokio::test]
   async fn refresh_replaces_table_list() {
      let client = MockClient::with_tables(&["a", "b"]);
      let reg = registry(&client);
      reg.connect("p1", &request("/tmp/db")).await.unwrap();
      reg.refresh_tables("p1").await.unwrap();

      client.set_tables(&["b", "c"]);
      reg.refresh_tables("p1").await.unwrap();
      assert_eq!(reg.state("p1").tables, vec!["b".to_string(), "c".to_string()]);

      client.fail("list_tables", ErrorCode::Internal, "io");
      assert!(reg.refresh_tables("p1").await.is_err());
      let state = reg.state("p1");
      assert_eq!(state.tables, vec!["b".to_string(), "c".to_string()]);
      assert!(!state.refreshing);
   }

   #[tokio::test]
   async fn open_shows_name_before_id_and_schema() {
      let client = MockClient::with_tables(&["items"]);
      let reg = registry(&client);
      reg.connect("p1", &request("/tmp/db")).await.unwrap();

      let open_gate = client.hold("open_table");
      let schema_gate = client.hold("get_schema");
      let task = tokio::spawn({
         let reg = reg.clone();
         async move { reg.open_table("p1", "items").await }
      });

      open_gate.entered().await;
      let state = reg.state("p1");
      assert_eq!(state.active_table_name.as_deref(), Some("items"));
      assert_eq!(state.active_table_id, None);
      assert_eq!(state.schema, None);
      assert!(state.opening);
      open_gate.release();

      schema_gate.entered().await;
      let state = reg.state("p1");
      assert!(state.active_table_id.is_some());
      assert_eq!(state.schema, None);
      schema_gate.release();

      let opened = task.await.unwrap().unwrap().completed().unwrap();
      let state = reg.state("p1");
      assert_eq!(state.active_table_id.as_deref(), Some(opened.table.table_id.as_str()));
      assert_eq!(state.schema, Some(MockClient::items_schema()));
      assert!(!state.opening);
   }

   #[tokio::test]
   async fn failed_open_keeps_name_without_id() {
      let client = MockClient::with_tables(&["items"]);
      let reg = registry(&client);
      reg.connect("p1", &request("/tmp/db")).await.unwrap();
      reg.open_table("p1", "items").await.unwrap();

      let err = reg.open_table("p1", "missing").await.unwrap_err();
      assert_eq!(err.code(), ErrorCode::NotFound);

      let state = reg.state("p1");
      assert_eq!(state.active_table_name.as_deref(), Some("missing"));
      assert_eq!(state.active_table_id, None);
      assert_eq!(state.schema, None);
      assert!(!state.opening);
   }

   #[tokio::test]
   async fn failed_schema_read_clears_table_id() {
      let client = MockClient::with_tables(&["items"]);
      let reg = registry(&client);
      let mut events = reg.subscribe();
      reg.connect("p1", &request("/tmp/db")).await.unwrap();

      client.fail("get_schema", ErrorCode::Internal, "corrupt manifest");
      let err = reg.open_table("p1", "items").await.unwrap_err();
      assert_eq!(err.code(), ErrorCode::Internal);

      let state = reg.state("p1");
      assert_eq!(state.active_table_name.as_deref(), Some("items"));
      assert_eq!(state.active_table_id, None);
      assert_eq!(state.schema, None);
      assert!(!state.opening);

      // the id was visible while the schema was loading, never after
      let last = std::iter::from_fn(|| events.try_recv().ok()).last().unwrap();
      assert_eq!(last.state, state);

      client.recover("get_schema");
      let opened = reg.open_table("p1", "items").await.unwrap().completed().unwrap();
      assert_eq!(reg.state("p1").active_table_id, Some(opened.table.table_id));
   }

   #[tokio::test]
   async fn schema_replacement_follows_active_table() {
      let client = MockClient::with_tables(&["items"]);
      let reg = registry(&client);
      reg.connect("p1", &request("/tmp/db")).await.unwrap();
      let opened = reg.open_table("p1", "items").await.unwrap().completed().unwrap();

      let narrowed = SchemaDefinition { fields: vec![opened.schema.fields[0].clone()] };
      assert!(reg.replace_schema("p1", &opened.table.table_id, narrowed.clone()));
      assert_eq!(reg.state("p1").schema, Some(narrowed.clone()));

      assert!(!reg.replace_schema("p1", "t-stale", MockClient::items_schema()));
      assert_eq!(reg.state("p1").schema, Some(narrowed));
   }

   #[tokio::test]
   async fn disconnect_releases_tables_and_resets() {
      let client = MockClient::with_tables(&["items"]);
      let reg = registry(&client);
      reg.connect("p1", &request("/tmp/db")).await.unwrap();
      reg.refresh_tables("p1").await.unwrap();
      reg.open_table("p1", "items").await.unwrap();

      let response = reg.disconnect("p1").await.unwrap().completed().unwrap();
      assert_eq!(response.released_tables, 1);
      assert_eq!(reg.state("p1"), ConnectionState::default());
   }

   #[tokio::test]
   async fn failed_disconnect_keeps_handle() {
      let client = MockClient::with_tables(&["items"]);
      let reg = registry(&client);
      reg.connect("p1", &request("/tmp/db")).await.unwrap();

      client.fail("disconnect", ErrorCode::Internal, "busy");
      assert!(reg.disconnect("p1").await.is_err());
      let state = reg.state("p1");
      assert!(state.handle.is_some());
      assert!(!state.disconnecting);
   }

   #[tokio::test]
   async fn connections_progress_independently() {
      let client = MockClient::with_tables(&["items"]);
      let reg = registry(&client);
      let gate = client.hold("connect");

      let task = tokio::spawn({
         let reg = reg.clone();
         async move { reg.connect("a", &request("/tmp/a")).await }
      });
      gate.entered().await;
      let held = reg.state("a");

      reg.connect("b", &request("/tmp/b")).await.unwrap();
      reg.refresh_tables("b").await.unwrap();
      reg.open_table("b", "items").await.unwrap();

      assert_eq!(reg.state("a"), held);
      let b = reg.state("b");
      assert_eq!(busy_count(&b), 0);
      assert!(b.schema.is_some());

      gate.release();
      task.await.unwrap().unwrap();
      assert!(reg.state("a").handle.is_some());
   }

   #[tokio::test]
   async fn reset_discards_in_flight_connect() {
      let client = MockClient::with_tables(&[]);
      let reg = registry(&client);
      let gate = client.hold("connect");

      let task = tokio::spawn({
         let reg = reg.clone();
         async move { reg.connect("p1", &request("/tmp/db")).await }
      });
      gate.entered().await;
      reg.reset("p1");
      gate.release();

      let outcome = task.await.unwrap().unwrap();
      assert_eq!(outcome.skip_reason(), Some(SkipReason::Superseded));
      assert_eq!(reg.state("p1"), ConnectionState::default());
      assert_eq!(client.live_connections(), 0);
   }

   #[tokio::test]
   async fn schema_never_outlives_table_id() {
      let client = MockClient::with_tables(&["items"]);
      let reg = registry(&client);
      let mut events = reg.subscribe();

      reg.connect("p1", &request("/tmp/db")).await.unwrap();
      reg.open_table("p1", "items").await.unwrap();
      reg.open_table("p1", "items").await.unwrap();
      reg.forget_table("p1", "items");
      reg.disconnect("p1").await.unwrap();

      let mut seen = 0;
      while let Ok(event) = events.try_recv() {
         seen += 1;
         assert!(event.state.schema.is_none() || event.state.active_table_id.is_some());
         assert!(busy_count(&event.state) <= 1);
      }
      assert!(seen > 0);
   }

   #[tokio::test]
   async fn discard_releases_live_handle() {
      let client = MockClient::with_tables(&[]);
      let reg = registry(&client);
      reg.connect("p1", &request("/tmp/db")).await.unwrap();
      assert_eq!(client.live_connections(), 1);

      reg.discard("p1").await;
      assert_eq!(client.live_connections(), 0);
      assert!(reg.profile_ids().is_empty());
   }
}
