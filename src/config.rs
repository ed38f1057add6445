use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Submission endpoint path on the upstream.
pub const SUBMIT_PATH: &str = "/api/send_mt103";

/// Offline fallback page, part of the default pre-cache list.
pub const OFFLINE_PAGE_PATH: &str = "/offline.html";

/// Health endpoint used as the connectivity probe.
pub const HEALTH_PATH: &str = "/health";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin of the transfer form application, e.g. "https://transfers.example.com"
  pub upstream: String,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Paths pre-cached at install, resolved against the upstream origin
  #[serde(default = "default_static_assets")]
  pub static_assets: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Version suffix for generation names; bump it to retire old caches
  #[serde(default = "default_version")]
  pub version: String,
  /// Override for the cache database directory
  pub data_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: default_version(),
      data_dir: None,
    }
  }
}

fn default_version() -> String {
  "v1".to_string()
}

fn default_static_assets() -> Vec<String> {
  [
    "/",
    "/form_optimized.html",
    "/assets/styles.css",
    "/assets/script.js",
    "/manifest.json",
    OFFLINE_PAGE_PATH,
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./mtsw.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/mtsw/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/mtsw/config.yaml\n\
                 with at least an `upstream:` entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("mtsw.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("mtsw").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  pub fn upstream_url(&self) -> Result<Url> {
    Url::parse(&self.upstream)
      .map_err(|e| eyre!("Invalid upstream url {}: {}", self.upstream, e))
  }

  /// The static asset list as absolute URLs.
  pub fn asset_urls(&self) -> Result<Vec<Url>> {
    let upstream = self.upstream_url()?;
    self
      .static_assets
      .iter()
      .map(|path| {
        upstream
          .join(path)
          .map_err(|e| eyre!("Invalid static asset path {}: {}", path, e))
      })
      .collect()
  }

  pub fn submit_url(&self) -> Result<Url> {
    Ok(self.upstream_url()?.join(SUBMIT_PATH)?)
  }

  pub fn offline_page_url(&self) -> Result<Url> {
    Ok(self.upstream_url()?.join(OFFLINE_PAGE_PATH)?)
  }

  pub fn health_url(&self) -> Result<Url> {
    Ok(self.upstream_url()?.join(HEALTH_PATH)?)
  }

  /// Where the cache database lives.
  pub fn db_path(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.cache.data_dir {
      return Ok(dir.join("cache.db"));
    }
    crate::cache::SqliteStore::default_path()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_gets_defaults() {
    let config: Config = serde_yaml::from_str("upstream: https://transfers.example.com").unwrap();

    assert_eq!(config.cache.version, "v1");
    assert!(config.static_assets.contains(&"/".to_string()));
    assert!(config.static_assets.contains(&"/offline.html".to_string()));
  }

  #[test]
  fn test_asset_urls_resolve_against_upstream() {
    let config: Config = serde_yaml::from_str(
      "upstream: https://transfers.example.com\nstatic_assets:\n  - /\n  - /assets/styles.css",
    )
    .unwrap();

    let urls = config.asset_urls().unwrap();
    assert_eq!(urls[0].as_str(), "https://transfers.example.com/");
    assert_eq!(
      urls[1].as_str(),
      "https://transfers.example.com/assets/styles.css"
    );
  }

  #[test]
  fn test_derived_urls() {
    let config: Config = serde_yaml::from_str("upstream: https://transfers.example.com").unwrap();

    assert_eq!(
      config.submit_url().unwrap().as_str(),
      "https://transfers.example.com/api/send_mt103"
    );
    assert_eq!(
      config.health_url().unwrap().as_str(),
      "https://transfers.example.com/health"
    );
  }

  #[test]
  fn test_data_dir_override() {
    let config: Config = serde_yaml::from_str(
      "upstream: https://transfers.example.com\ncache:\n  data_dir: /tmp/mtsw-test",
    )
    .unwrap();

    assert_eq!(
      config.db_path().unwrap(),
      PathBuf::from("/tmp/mtsw-test/cache.db")
    );
  }
}
