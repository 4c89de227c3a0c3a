use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::err::proxy_error::ProxyError;

/// Service-level configuration: the set of backend servers a session may be
/// routed to, plus ambient settings.
#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,

    pub servers: Vec<ServerConfig>,

    pub base: BaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Name the server is registered under; unique within a service.
    pub unique_name: String,

    pub host: String,

    pub port: u16,

    /// Upper bound of pooled idle connections kept for this server.
    /// Zero disables pooling entirely.
    #[serde(default)]
    pub persistpoolmax: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BaseConfig {
    /// Log output path.
    log_dir: Option<String>,

    /// Seconds between forced reloads of the user account repository.
    pub users_refresh_interval: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            service_name: String::from(""),
            servers: vec![],
            base: BaseConfig::default(),
        }
    }
}

impl Default for BaseConfig {
    fn default() -> Self {
        BaseConfig {
            log_dir: Some(String::from("/tmp/proxy")),
            users_refresh_interval: None,
        }
    }
}

impl BaseConfig {
    pub fn get_log_dir(&self) -> Option<String> {
        self.log_dir.clone()
    }
}

/// Read a service configuration from the given path.
pub fn read_config<P: AsRef<Path>>(path: P) -> Result<ServiceConfig, ProxyError> {
    let mut file = File::open(path.as_ref())?;
    let mut s = String::new();

    let _ = file.read_to_string(&mut s);
    toml::from_str(s.as_str()).map_err(|e| ProxyError::ConfigFileParseErr(e.to_string()))
}
