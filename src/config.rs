//! Server configuration: `apijson.toml`, then environment, then CLI flags.

use crate::error::{DbError, DbResult};
use apijson_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file read when `--config` is not given. Missing is fine.
pub const DEFAULT_CONFIG_FILE: &str = "apijson.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret. Without one, the `Authorization` header is taken as the user id.
    pub jwt_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    /// JSON file imported before metadata is loaded.
    pub seed: Option<PathBuf>,
    pub auth: AuthConfig,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            data_dir: "./data".to_string(),
            seed: None,
            auth: AuthConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read the config file and apply environment overrides.
    ///
    /// An explicit path must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> DbResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> DbResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text).map_err(|e| DbError::ConfigError(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(text: &str) -> DbResult<Self> {
        toml::from_str(text).map_err(|e| DbError::ConfigError(e.to_string()))
    }

    /// Apply `APIJSON_*` and `JWT_SECRET` overrides from `get`.
    pub fn apply_env<F>(&mut self, get: F) -> DbResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = get("APIJSON_HOST") {
            self.host = host;
        }
        if let Some(port) = get("APIJSON_PORT") {
            self.port = port
                .parse()
                .map_err(|_| DbError::ConfigError(format!("APIJSON_PORT is not a port: {}", port)))?;
        }
        if let Some(dir) = get("APIJSON_DATA_DIR") {
            self.data_dir = dir;
        }
        if let Some(verify) = get("APIJSON_ACCESS_VERIFY") {
            self.engine.access_verify = match verify.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(DbError::ConfigError(format!(
                        "APIJSON_ACCESS_VERIFY is not a boolean: {}",
                        verify
                    )))
                }
            };
        }
        if let Some(secret) = get("JWT_SECRET").filter(|s| !s.is_empty()) {
            if secret.len() < 32 {
                tracing::warn!("JWT_SECRET is less than 32 characters - consider using a longer secret");
            }
            self.auth.jwt_secret = Some(secret);
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
