//! Credential storage referenced by `secret_ref` profiles.
//!
//! References are opaque strings handed out by [`SecretVault::put`]; nothing
//! outside the vault derives meaning from them.

use std::{
   collections::{BTreeMap, HashMap},
   fs,
   io::{self, Write},
   path::{Path, PathBuf},
   time::{SystemTime, UNIX_EPOCH},
};

use age::secrecy::SecretString;
use base64::{Engine as _, engine::general_purpose};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
   #[error("failed to read vault key {}: {source}", .path.display())]
   ReadKey {
      path:   PathBuf,
      #[source]
      source: io::Error,
   },

   #[error("failed to write vault key {}: {source}", .path.display())]
   WriteKey {
      path:   PathBuf,
      #[source]
      source: io::Error,
   },

   #[error("failed to read vault {}: {source}", .path.display())]
   Read {
      path:   PathBuf,
      #[source]
      source: io::Error,
   },

   #[error("failed to write vault {}: {source}", .path.display())]
   Write {
      path:   PathBuf,
      #[source]
      source: io::Error,
   },

   #[error("failed to encrypt vault: {0}")]
   Encrypt(#[source] age::EncryptError),

   #[error("failed to decrypt vault: {0}")]
   Decrypt(#[source] age::DecryptError),

   #[error("corrupt vault document: {0}")]
   Corrupt(#[source] serde_json::Error),

   #[error("invalid credential: {0}")]
   Invalid(String),
}

impl VaultError {
   pub const fn code(&self) -> ErrorCode {
      match self {
         Self::Invalid(_) => ErrorCode::InvalidArgument,
         _ => ErrorCode::Internal,
      }
   }
}

pub type Result<T, E = VaultError> = std::result::Result<T, E>;

/// Stored credential material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretRecord {
   pub provider:   String,
   pub params:     HashMap<String, String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub label:      Option<String>,
   /// Seconds since the Unix epoch.
   pub updated_at: u64,
}

/// Listing entry; never carries the params themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSummary {
   pub reference:  String,
   pub provider:   String,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub label:      Option<String>,
   pub updated_at: u64,
}

pub trait SecretVault: Send + Sync {
   /// Stores a credential, returning its reference. Passing an existing
   /// `reference` replaces that entry.
   fn put(
      &self,
      provider: &str,
      params: HashMap<String, String>,
      label: Option<&str>,
      reference: Option<&str>,
   ) -> Result<String>;

   fn get(&self, reference: &str) -> Result<Option<SecretRecord>>;

   /// Removing an unknown reference is not an error.
   fn delete(&self, reference: &str) -> Result<()>;

   fn list(&self) -> Result<Vec<SecretSummary>>;

   fn clear(&self) -> Result<()>;
}

fn now_secs() -> u64 {
   SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map_or(0, |d| d.as_secs())
}

fn new_reference() -> String {
   format!("cred_{}", Uuid::new_v4().simple())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VaultDocument {
   #[serde(default)]
   secrets: BTreeMap<String, SecretRecord>,
}

impl VaultDocument {
   fn put(
      &mut self,
      provider: &str,
      params: HashMap<String, String>,
      label: Option<&str>,
      reference: Option<&str>,
   ) -> Result<String> {
      let provider = provider.trim();
      if provider.is_empty() {
         return Err(VaultError::Invalid("provider cannot be empty".to_string()));
      }
      let reference = match reference.map(str::trim) {
         Some("") => return Err(VaultError::Invalid("reference cannot be empty".to_string())),
         Some(reference) => reference.to_string(),
         None => new_reference(),
      };

      self.secrets.insert(reference.clone(), SecretRecord {
         provider: provider.to_string(),
         params,
         label: label.map(str::to_string),
         updated_at: now_secs(),
      });
      Ok(reference)
   }

   fn list(&self) -> Vec<SecretSummary> {
      self
         .secrets
         .iter()
         .map(|(reference, record)| SecretSummary {
            reference:  reference.clone(),
            provider:   record.provider.clone(),
            label:      record.label.clone(),
            updated_at: record.updated_at,
         })
         .collect()
   }
}

/// Vault held in process memory only.
#[derive(Debug, Default)]
pub struct MemoryVault {
   doc: Mutex<VaultDocument>,
}

impl MemoryVault {
   pub fn new() -> Self {
      Self::default()
   }
}

impl SecretVault for MemoryVault {
   fn put(
      &self,
      provider: &str,
      params: HashMap<String, String>,
      label: Option<&str>,
      reference: Option<&str>,
   ) -> Result<String> {
      self.doc.lock().put(provider, params, label, reference)
   }

   fn get(&self, reference: &str) -> Result<Option<SecretRecord>> {
      Ok(self.doc.lock().secrets.get(reference).cloned())
   }

   fn delete(&self, reference: &str) -> Result<()> {
      self.doc.lock().secrets.remove(reference);
      Ok(())
   }

   fn list(&self) -> Result<Vec<SecretSummary>> {
      Ok(self.doc.lock().list())
   }

   fn clear(&self) -> Result<()> {
      self.doc.lock().secrets.clear();
      Ok(())
   }
}

/// Vault persisted as one age-encrypted JSON document.
///
/// The passphrase is generated on first use and kept in a separate key file,
/// so the vault file alone does not reveal its contents.
pub struct FileVault {
   path:        PathBuf,
   key_path:    PathBuf,
   work_factor: Option<u8>,
   lock:        Mutex<()>,
}

impl FileVault {
   pub fn new(path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
      Self { path: path.into(), key_path: key_path.into(), work_factor: None, lock: Mutex::new(()) }
   }

   /// Overrides the scrypt work factor used when writing.
   pub fn with_work_factor(mut self, log_n: u8) -> Self {
      self.work_factor = Some(log_n);
      self
   }

   pub fn path(&self) -> &Path {
      &self.path
   }

   fn passphrase(&self) -> Result<SecretString> {
      match fs::read_to_string(&self.key_path) {
         Ok(key) => Ok(SecretString::from(key.trim().to_string())),
         Err(e) if e.kind() == io::ErrorKind::NotFound => self.create_passphrase(),
         Err(source) => Err(VaultError::ReadKey { path: self.key_path.clone(), source }),
      }
   }

   fn create_passphrase(&self) -> Result<SecretString> {
      let bytes: [u8; 32] = rand::random();
      let key = general_purpose::STANDARD.encode(bytes);
      write_private(&self.key_path, key.as_bytes())
         .map_err(|source| VaultError::WriteKey { path: self.key_path.clone(), source })?;
      tracing::info!(path = %self.key_path.display(), "generated vault key");
      Ok(SecretString::from(key))
   }

   fn load(&self) -> Result<VaultDocument> {
      let ciphertext = match fs::read(&self.path) {
         Ok(bytes) => bytes,
         Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(VaultDocument::default()),
         Err(source) => return Err(VaultError::Read { path: self.path.clone(), source }),
      };

      let mut identity = age::scrypt::Identity::new(self.passphrase()?);
      if let Some(log_n) = self.work_factor {
         identity.set_max_work_factor(log_n);
      }
      let plaintext = age::decrypt(&identity, &ciphertext).map_err(VaultError::Decrypt)?;
      serde_json::from_slice(&plaintext).map_err(VaultError::Corrupt)
   }

   fn save(&self, doc: &VaultDocument) -> Result<()> {
      let plaintext = serde_json::to_vec(doc).map_err(VaultError::Corrupt)?;
      let mut recipient = age::scrypt::Recipient::new(self.passphrase()?);
      if let Some(log_n) = self.work_factor {
         recipient.set_work_factor(log_n);
      }
      let ciphertext = age::encrypt(&recipient, &plaintext).map_err(VaultError::Encrypt)?;

      write_private(&self.path, &ciphertext)
         .map_err(|source| VaultError::Write { path: self.path.clone(), source })?;
      tracing::debug!(path = %self.path.display(), entries = doc.secrets.len(), "vault saved");
      Ok(())
   }

   fn update<T>(&self, f: impl FnOnce(&mut VaultDocument) -> Result<T>) -> Result<T> {
      let _guard = self.lock.lock();
      let mut doc = self.load()?;
      let value = f(&mut doc)?;
      self.save(&doc)?;
      Ok(value)
   }
}

/// Writes through a sibling temp file so a crash never leaves a torn file.
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
   if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
   }
   let mut tmp = path.as_os_str().to_owned();
   tmp.push(".tmp");
   let tmp = PathBuf::from(tmp);

   let mut options = fs::OpenOptions::new();
   options.write(true).create(true).truncate(true);
   #[cfg(unix)]
   {
      use std::os::unix::fs::OpenOptionsExt;
      // mode is applied on create only; a leftover tmp would keep its old one
      options.mode(0o600);
      let _ = fs::remove_file(&tmp);
   }
   let mut file = options.open(&tmp)?;
   file.write_all(contents)?;
   file.sync_all()?;
   drop(file);
   fs::rename(&tmp, path)
}

impl SecretVault for FileVault {
   fn put(
      &self,
      provider: &str,
      params: HashMap<String, String>,
      label: Option<&str>,
      reference: Option<&str>,
   ) -> Result<String> {
      let reference = self.update(|doc| doc.put(provider, params, label, reference))?;
      tracing::debug!(reference, provider, "credential stored");
      Ok(reference)
   }

   fn get(&self, reference: &str) -> Result<Option<SecretRecord>> {
      let _guard = self.lock.lock();
      Ok(self.load()?.secrets.remove(reference))
   }

   fn delete(&self, reference: &str) -> Result<()> {
      self.update(|doc| {
         doc.secrets.remove(reference);
         Ok(())
      })
   }

   fn list(&self) -> Result<Vec<SecretSummary>> {
      let _guard = self.lock.lock();
      Ok(self.load()?.list())
   }

   fn clear(&self) -> Result<()> {
      self.update(|doc| {
         doc.secrets.clear();
         Ok(())
      })
   }
}
