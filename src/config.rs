use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Directory for the store database and log files.
pub fn data_dir() -> Option<PathBuf> {
  dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .map(|p| p.join("story-sw"))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Version tag embedded in every store name. Bump it to purge old stores.
  pub version: String,
  /// Common prefix of the shell and api store names
  pub cache_prefix: String,
  /// Origin the application itself is served from
  pub app_origin: Url,
  /// Origin of the remote story-data service (network-first)
  pub api_origin: Url,
  /// Path prefix left to the local development proxy
  pub bypass_prefix: String,
  /// Assets that must all be fetched at install time
  pub shell_assets: Vec<String>,
  pub notification: NotificationDefaults,
  pub network: NetworkConfig,
  /// Store database location (defaults to the data directory)
  pub database: Option<PathBuf>,
}

/// Fallbacks for push payload fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_secs: u64,
}

const DEFAULT_SHELL_ASSETS: &[&str] = &[
  "/",
  "/index.html",
  "/manifest.json",
  "/styles.css",
  "/src/main.js",
  "/src/router.js",
  "/src/presenters/pagePresenter.js",
  "/src/models/apiModel.js",
  "/src/models/dataModel.js",
  "/src/db/favorite-db.js",
  "/scripts/sw.js",
  "/src/pwa-init.js",
  "/src/views/homeView.js",
  "/src/views/aboutView.js",
  "/src/views/contactView.js",
  "/src/views/mapView.js",
  "/src/views/addstoryView.js",
  "/src/views/favoritesView.js",
  "/src/views/login-page.js",
  "/src/views/register-page.js",
  "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css",
  "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js",
];

impl Default for Config {
  fn default() -> Self {
    Self {
      version: "v3".to_string(),
      cache_prefix: "story-app".to_string(),
      app_origin: Url::parse("http://localhost:8080").expect("static URL"),
      api_origin: Url::parse("https://story-api.dicoding.dev").expect("static URL"),
      bypass_prefix: "/api/".to_string(),
      shell_assets: DEFAULT_SHELL_ASSETS.iter().map(|s| s.to_string()).collect(),
      notification: NotificationDefaults::default(),
      network: NetworkConfig::default(),
      database: None,
    }
  }
}

impl Default for NotificationDefaults {
  fn default() -> Self {
    Self {
      title: "Cerita Baru!".to_string(),
      body: "Cek cerita terbaru di aplikasi!".to_string(),
      icon: "/icons/icon-192x192.png".to_string(),
      url: "/#/add-story".to_string(),
    }
  }
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self { timeout_secs: 30 }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./story-sw.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/story-sw/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("story-sw.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("story-sw").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.version.is_empty() || config.version.contains('-') {
      return Err(eyre!(
        "version must be a non-empty tag without '-', got '{}'",
        config.version
      ));
    }
    Ok(config)
  }

  /// Store holding the static application shell.
  pub fn shell_store(&self) -> String {
    format!("{}-static-{}", self.cache_prefix, self.version)
  }

  /// Store holding responses from the story-data service.
  pub fn api_store(&self) -> String {
    format!("{}-api-{}", self.cache_prefix, self.version)
  }

  /// Resolve the shell asset list against the application origin.
  pub fn shell_asset_urls(&self) -> Result<Vec<Url>> {
    self
      .shell_assets
      .iter()
      .map(|asset| {
        self
          .app_origin
          .join(asset)
          .map_err(|e| eyre!("Invalid shell asset '{}': {}", asset, e))
      })
      .collect()
  }
}
