//! Persisted connection profiles.

use std::{
   fs, io,
   path::{Path, PathBuf},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::ConnectionProfile;

#[derive(Debug, thiserror::Error)]
pub enum ProfileStoreError {
   #[error("failed to read profiles {}: {source}", .path.display())]
   Read {
      path:   PathBuf,
      #[source]
      source: io::Error,
   },

   #[error("failed to write profiles {}: {source}", .path.display())]
   Write {
      path:   PathBuf,
      #[source]
      source: io::Error,
   },

   #[error("malformed profiles document {}: {source}", .path.display())]
   Parse {
      path:   PathBuf,
      #[source]
      source: serde_json::Error,
   },

   #[error("failed to serialize profiles: {0}")]
   Serialize(#[source] serde_json::Error),
}

/// Everything the profile store persists, as one document.
///
/// Unknown fields are ignored and new fields must be optional, so older and
/// newer documents stay readable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileBook {
   #[serde(default)]
   pub profiles:          Vec<ConnectionProfile>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub active_profile_id: Option<String>,
}

impl ProfileBook {
   pub fn get(&self, id: &str) -> Option<&ConnectionProfile> {
      self.profiles.iter().find(|p| p.id == id)
   }

   pub fn get_mut(&mut self, id: &str) -> Option<&mut ConnectionProfile> {
      self.profiles.iter_mut().find(|p| p.id == id)
   }

   /// Number of profiles whose auth points at `reference`.
   pub fn references_to(&self, reference: &str) -> usize {
      self
         .profiles
         .iter()
         .filter(|p| p.auth.secret_reference() == Some(reference))
         .count()
   }
}

pub trait ProfileStore: Send + Sync {
   fn load(&self) -> Result<ProfileBook, ProfileStoreError>;
   fn save(&self, book: &ProfileBook) -> Result<(), ProfileStoreError>;
}

/// Profiles stored as a single pretty-printed JSON file.
pub struct JsonProfileStore {
   path: PathBuf,
}

impl JsonProfileStore {
   pub fn new(path: impl Into<PathBuf>) -> Self {
      Self { path: path.into() }
   }

   pub fn path(&self) -> &Path {
      &self.path
   }
}

impl ProfileStore for JsonProfileStore {
   fn load(&self) -> Result<ProfileBook, ProfileStoreError> {
      let content = match fs::read_to_string(&self.path) {
         Ok(content) => content,
         Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ProfileBook::default()),
         Err(source) => return Err(ProfileStoreError::Read { path: self.path.clone(), source }),
      };
      if content.trim().is_empty() {
         return Ok(ProfileBook::default());
      }
      serde_json::from_str(&content)
         .map_err(|source| ProfileStoreError::Parse { path: self.path.clone(), source })
   }

   fn save(&self, book: &ProfileBook) -> Result<(), ProfileStoreError> {
      let json = serde_json::to_string_pretty(book).map_err(ProfileStoreError::Serialize)?;
      let write = || -> io::Result<()> {
         if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
         }
         fs::write(&self.path, json)
      };
      write().map_err(|source| ProfileStoreError::Write { path: self.path.clone(), source })?;
      tracing::debug!(path = %self.path.display(), profiles = book.profiles.len(), "profiles saved");
      Ok(())
   }
}

#[derive(Debug, Default)]
pub struct MemoryProfileStore {
   book: Mutex<ProfileBook>,
}

impl MemoryProfileStore {
   pub fn new() -> Self {
      Self::default()
   }
}

impl ProfileStore for MemoryProfileStore {
   fn load(&self) -> Result<ProfileBook, ProfileStoreError> {
      Ok(self.book.lock().clone())
   }

   fn save(&self, book: &ProfileBook) -> Result<(), ProfileStoreError> {
      *self.book.lock() = book.clone();
      Ok(())
   }
}
