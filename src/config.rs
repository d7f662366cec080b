use std::{
   path::{Path, PathBuf},
   sync::OnceLock,
};

use directories::BaseDirs;
use figment::{
   Figment,
   providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

static CONFIG: OnceLock<Config> = OnceLock::new();

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
   pub default_scan_limit: usize,
   pub max_scan_limit:     usize,
   pub default_top_k:      usize,

   pub event_capacity: usize,

   /// scrypt log2 work factor for the vault; age picks one when unset.
   #[serde(skip_serializing_if = "Option::is_none")]
   pub vault_work_factor: Option<u8>,

   #[serde(skip_serializing_if = "Option::is_none")]
   pub profiles_file:  Option<PathBuf>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub vault_file:     Option<PathBuf>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub vault_key_file: Option<PathBuf>,
}

impl Default for Config {
   fn default() -> Self {
      Self {
         default_scan_limit: 100,
         max_scan_limit:     10_000,
         default_top_k:      10,
         event_capacity:     128,
         vault_work_factor:  None,
         profiles_file:      None,
         vault_file:         None,
         vault_key_file:     None,
      }
   }
}

impl Config {
   pub fn load() -> Self {
      let config_path = config_file_path();
      if !config_path.exists() {
         Self::create_default_config(&config_path);
      }

      Figment::from(Serialized::defaults(Self::default()))
         .merge(Toml::file(config_path))
         .merge(Env::prefixed("LANCEDESK_"))
         .extract()
         .unwrap_or_default()
   }

   fn create_default_config(path: &Path) {
      if let Some(parent) = path.parent() {
         let _ = std::fs::create_dir_all(parent);
      }
      let default_config = Self::default();
      if let Ok(toml) = toml::to_string_pretty(&default_config) {
         let _ = std::fs::write(path, toml);
      }
   }

   pub fn scan_limit(&self) -> usize {
      self.default_scan_limit.min(self.max_scan_limit)
   }

   pub fn profiles_path(&self) -> PathBuf {
      self
         .profiles_file
         .clone()
         .unwrap_or_else(|| data_dir().join("profiles.json"))
   }

   pub fn vault_path(&self) -> PathBuf {
      self
         .vault_file
         .clone()
         .unwrap_or_else(|| data_dir().join("vault.age"))
   }

   pub fn vault_key_path(&self) -> PathBuf {
      self
         .vault_key_file
         .clone()
         .unwrap_or_else(|| data_dir().join("vault.key"))
   }
}

pub fn config_file_path() -> PathBuf {
   data_dir().join("config.toml")
}

pub fn get() -> &'static Config {
   CONFIG.get_or_init(Config::load)
}

pub fn data_dir() -> PathBuf {
   BaseDirs::new().map_or_else(
      || PathBuf::from(".lancedesk"),
      |dirs| dirs.home_dir().join(".lancedesk"),
   )
}

#[cfg(test)]
mod tests {
   use figment::Jail;

   use super::*;

   #[test]
   fn env_overrides_file_and_defaults() {
      Jail::expect_with(|jail| {
         jail.create_file("config.toml", "default_scan_limit = 25\nmax_scan_limit = 500\n")?;
         jail.set_env("LANCEDESK_DEFAULT_TOP_K", "3");

         let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("LANCEDESK_"))
            .extract()?;

         assert_eq!(config.default_scan_limit, 25);
         assert_eq!(config.max_scan_limit, 500);
         assert_eq!(config.default_top_k, 3);
         assert_eq!(config.event_capacity, 128);
         assert_eq!(config.vault_work_factor, None);
         Ok(())
      });
   }

   #[test]
   fn default_paths_live_under_data_dir() {
      let config = Config::default();
      assert_eq!(config.profiles_path(), data_dir().join("profiles.json"));
      assert!(config.vault_key_path().ends_with("vault.key"));

      let custom = Config { vault_file: Some(PathBuf::from("/tmp/v.age")), ..Config::default() };
      assert_eq!(custom.vault_path(), PathBuf::from("/tmp/v.age"));
   }

   #[test]
   fn defaults_serialize_to_toml() {
      let text = toml::to_string_pretty(&Config::default()).unwrap();
      assert!(text.contains("default_scan_limit = 100"));
      assert!(!text.contains("vault_file"));
   }
}
