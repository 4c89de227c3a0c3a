use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use crate::config::ServerConfig;

/// Server status bits. A server may carry several at once; routing looks at
/// the combination.
pub const SERVER_RUNNING: u64 = 0x0001;
pub const SERVER_MASTER: u64 = 0x0002;
pub const SERVER_SLAVE: u64 = 0x0004;
/// Administratively out of rotation; no new connections are made to it.
pub const SERVER_MAINT: u64 = 0x0008;

/// One registered backend server. Status bits are mutated concurrently from
/// any worker, so they live behind an atomic.
#[derive(Debug)]
pub struct ServerEntry {
    pub unique_name: String,

    pub host: String,

    pub port: u16,

    /// Upper bound of pooled idle connections; zero disables pooling.
    pub persistpoolmax: usize,

    status: AtomicU64,
}

impl ServerEntry {
    pub fn new(unique_name: &str, host: &str, port: u16, persistpoolmax: usize) -> Self {
        ServerEntry {
            unique_name: unique_name.to_string(),
            host: host.to_string(),
            port,
            persistpoolmax,
            status: AtomicU64::new(SERVER_RUNNING),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        ServerEntry::new(
            &config.unique_name,
            &config.host,
            config.port,
            config.persistpoolmax,
        )
    }

    pub fn status(&self) -> u64 {
        self.status.load(Ordering::Acquire)
    }

    pub fn set_status(&self, bits: u64) {
        self.status.fetch_or(bits, Ordering::AcqRel);
    }

    pub fn clear_status(&self, bits: u64) {
        self.status.fetch_and(!bits, Ordering::AcqRel);
    }

    pub fn is_running(&self) -> bool {
        self.status() & SERVER_RUNNING != 0
    }

    pub fn is_in_maint(&self) -> bool {
        self.status() & SERVER_MAINT != 0
    }
}

/// Registry of all configured servers, shared between workers.
#[derive(Debug, Default)]
pub struct ServerRegistry {
    servers: DashMap<String, Arc<ServerEntry>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        ServerRegistry {
            servers: DashMap::new(),
        }
    }

    pub fn add(&self, entry: ServerEntry) -> Arc<ServerEntry> {
        let entry = Arc::new(entry);
        self.servers
            .insert(entry.unique_name.clone(), entry.clone());
        entry
    }

    pub fn get(&self, unique_name: &str) -> Option<Arc<ServerEntry>> {
        self.servers.get(unique_name).map(|e| e.value().clone())
    }

    /// Take a server out of rotation, typically because it started refusing
    /// our connections.
    pub fn mark_maintenance(&self, unique_name: &str) {
        match self.get(unique_name) {
            Some(entry) => entry.set_status(SERVER_MAINT),
            None => warn!("Cannot mark unknown server '{}' as maintenance", unique_name),
        }
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
