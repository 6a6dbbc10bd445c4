//! Configuration Store – the robot API host/port, persisted to
//! `~/.atlas/robot_link.toml`.
//!
//! The file holds exactly two keys:
//!
//! ```toml
//! robot_api_host = "10.0.0.5"
//! robot_api_port = "9090"
//! ```
//!
//! A missing file means the built-in defaults (`localhost:8080`).  Every
//! successful [`ConfigStore::set`] or [`ConfigStore::reset_to_default`] bumps
//! the store's generation so that poll cycles started against the previous
//! endpoint can tell their results are stale.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use atlas_types::{CommandResult, LinkError, ServerConfig};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// On-disk shape of the connection override.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedConfig {
    #[serde(default = "default_host")]
    robot_api_host: String,
    #[serde(default = "default_port")]
    robot_api_port: String,
}

fn default_host() -> String {
    atlas_types::DEFAULT_HOST.to_string()
}
fn default_port() -> String {
    atlas_types::DEFAULT_PORT.to_string()
}

impl From<PersistedConfig> for ServerConfig {
    fn from(p: PersistedConfig) -> Self {
        Self {
            host: p.robot_api_host,
            port: p.robot_api_port,
        }
    }
}

impl From<&ServerConfig> for PersistedConfig {
    fn from(c: &ServerConfig) -> Self {
        Self {
            robot_api_host: c.host.clone(),
            robot_api_port: c.port.clone(),
        }
    }
}

/// Thread-safe holder of the current [`ServerConfig`].
#[derive(Debug)]
pub struct ConfigStore {
    /// `None` for a purely in-memory store.
    path: Option<PathBuf>,
    current: RwLock<ServerConfig>,
    generation: AtomicU64,
}

impl ConfigStore {
    /// Open `~/.atlas/robot_link.toml` and apply `ATLAS_ROBOT_*` overrides.
    pub fn open_default() -> Self {
        let store = Self::open(config_path());
        {
            let mut cfg = store.write();
            apply_env_overrides(&mut cfg);
        }
        store
    }

    /// Open the store backed by `path`.
    ///
    /// Never fails: an unreadable or malformed file is logged and the
    /// defaults are used instead.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cfg = match load_from(&path) {
            Ok(Some(cfg)) => cfg,
            Ok(None) => ServerConfig::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable robot link config");
                ServerConfig::default()
            }
        };
        Self {
            path: Some(path),
            current: RwLock::new(cfg),
            generation: AtomicU64::new(0),
        }
    }

    /// A store that never touches the disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            current: RwLock::new(ServerConfig::default()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current configuration.
    pub fn get(&self) -> ServerConfig {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Base URL derived from the current configuration.
    pub fn base_url(&self) -> String {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .base_url()
    }

    /// Counter bumped by every successful `set` / `reset_to_default`.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Validate, persist and apply a new host/port.
    ///
    /// # Errors
    ///
    /// - [`LinkError::InvalidConfig`] – empty host or port, or a port that is
    ///   not a number in `1..=65535`.
    /// - [`LinkError::Storage`] – the file could not be written; the
    ///   in-memory configuration is left unchanged.
    pub fn set(&self, host: &str, port: &str) -> CommandResult<ServerConfig> {
        let next = validate(host, port)?;
        let mut current = self.write();
        if let Some(path) = &self.path {
            save_to(&next, path).map_err(LinkError::Storage)?;
        }
        *current = next.clone();
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!(base_url = %next.base_url(), "robot link configuration updated");
        Ok(next)
    }

    /// Restore `localhost:8080` and delete the persisted override.  Idempotent.
    pub fn reset_to_default(&self) -> ServerConfig {
        let mut current = self.write();
        if let Some(path) = &self.path
            && let Err(e) = fs::remove_file(path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %path.display(), error = %e, "failed to remove robot link config");
        }
        *current = ServerConfig::default();
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!(base_url = %current.base_url(), "robot link configuration reset to default");
        current.clone()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ServerConfig> {
        self.current.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn validate(host: &str, port: &str) -> CommandResult<ServerConfig> {
    let host = host.trim();
    let port = port.trim();
    if host.is_empty() || port.is_empty() {
        return Err(LinkError::InvalidConfig("host and port are required".into()));
    }
    match port.parse::<u16>() {
        Ok(p) if p > 0 => {}
        _ => {
            return Err(LinkError::InvalidConfig(format!(
                "port '{port}' is not a valid TCP port"
            )));
        }
    }
    Ok(ServerConfig {
        host: host.to_string(),
        port: port.to_string(),
    })
}

/// Return the path to `~/.atlas/robot_link.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".atlas").join("robot_link.toml")
}

/// Apply `ATLAS_ROBOT_HOST` / `ATLAS_ROBOT_PORT` to `cfg`.  Overrides are
/// never written back to disk.
pub fn apply_env_overrides(cfg: &mut ServerConfig) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

/// Apply host/port overrides read through `lookup`.  Blank values are
/// ignored; a value that fails validation is logged and skipped.
pub(crate) fn apply_overrides_from(
    cfg: &mut ServerConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    if let Some(v) = lookup("ATLAS_ROBOT_HOST")
        && !v.trim().is_empty()
    {
        match validate(&v, &cfg.port) {
            Ok(next) => *cfg = next,
            Err(e) => {
                warn!(key = "ATLAS_ROBOT_HOST", value = %v, error = %e, "ignoring invalid override")
            }
        }
    }
    if let Some(v) = lookup("ATLAS_ROBOT_PORT")
        && !v.trim().is_empty()
    {
        match validate(&cfg.host, &v) {
            Ok(next) => *cfg = next,
            Err(e) => {
                warn!(key = "ATLAS_ROBOT_PORT", value = %v, error = %e, "ignoring invalid override")
            }
        }
    }
}

/// Load the config from a specific path.  `Ok(None)` when the file is absent.
pub(crate) fn load_from(path: &Path) -> Result<Option<ServerConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let persisted: PersistedConfig =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    let cfg = validate(&persisted.robot_api_host, &persisted.robot_api_port)
        .map_err(|e| e.to_string())?;
    Ok(Some(cfg))
}

/// Save the config to a specific path, creating the parent directory.
pub(crate) fn save_to(cfg: &ServerConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(&PersistedConfig::from(cfg))
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
