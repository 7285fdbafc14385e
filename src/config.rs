use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

const APP_DIR: &str = "saathi-cache";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin of the page the manager is attached to
  pub origin: Url,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Directory for log files (defaults to the data directory)
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Generation identifier; also the name of the active cache store
  pub name: String,
  /// Paths fetched and stored at install time
  pub precache: Vec<String>,
  /// Served for navigations when the network is down
  pub root_document: String,
  /// Served for image requests when the network is down and nothing is cached
  pub placeholder_image: String,
  /// Requests whose path contains this are never intercepted
  pub api_marker: String,
  /// SQLite database path (defaults to the data directory)
  pub database: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name: "nyaay-saathi-v1".to_string(),
      precache: vec![
        "/".to_string(),
        "/static/images/logo.png".to_string(),
        "/static/images/favicon.ico".to_string(),
        "/static/images/app-icon.png".to_string(),
      ],
      root_document: "/".to_string(),
      placeholder_image: "/static/images/logo.png".to_string(),
      api_marker: "/api/".to_string(),
      database: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./saathi-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/saathi-cache/config.yaml
  ///
  /// With no file found, an `origin` override alone is enough to run with
  /// defaults. When both are present the override wins.
  pub fn load(explicit_path: Option<&Path>, origin: Option<&str>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match (path, origin) {
      (Some(p), _) => Self::load_from_path(&p)?,
      (None, Some(origin)) => Self::for_origin(parse_origin(origin)?),
      (None, None) => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/saathi-cache/config.yaml\n\
                 or pass --origin to run with defaults."
        ))
      }
    };

    if let Some(origin) = origin {
      config.origin = parse_origin(origin)?;
    }

    config.validate()?;
    Ok(config)
  }

  /// Default settings for the given origin.
  pub fn for_origin(origin: Url) -> Self {
    Self {
      origin,
      cache: CacheConfig::default(),
      log_dir: None,
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("saathi-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_DIR).join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    check_origin(&self.origin)?;

    if self.cache.name.trim().is_empty() {
      return Err(eyre!("cache.name must not be empty"));
    }
    if self.cache.api_marker.is_empty() {
      return Err(eyre!("cache.api_marker must not be empty"));
    }

    Ok(())
  }

  /// Path of the SQLite cache database.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.cache.database {
      Some(path) => Ok(path.clone()),
      None => Ok(data_dir()?.join("cache.db")),
    }
  }

  /// Directory that receives log files.
  pub fn log_dir(&self) -> Result<PathBuf> {
    match &self.log_dir {
      Some(dir) => Ok(dir.clone()),
      None => Ok(data_dir()?.join("logs")),
    }
  }
}

fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join(APP_DIR))
}

fn parse_origin(s: &str) -> Result<Url> {
  let url = Url::parse(s).map_err(|e| eyre!("Invalid origin '{}': {}", s, e))?;
  check_origin(&url)?;
  Ok(url)
}

fn check_origin(url: &Url) -> Result<()> {
  if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
    return Err(eyre!("Origin must be an http(s) URL with a host: {}", url));
  }
  Ok(())
}
