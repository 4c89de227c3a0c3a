use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::info;

/// One user account as loaded from the backend's `mysql.user` data. The
/// password is stored as the double SHA1 of the cleartext, which is what the
/// server itself persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub user: String,

    pub host: String,

    /// SHA1(SHA1(password)); `None` for accounts without a password.
    pub password_hash: Option<[u8; 20]>,
}

impl UserEntry {
    pub fn new(user: &str, host: &str, password_hash: Option<[u8; 20]>) -> Self {
        UserEntry {
            user: user.to_string(),
            host: host.to_string(),
            password_hash,
        }
    }
}

/// Source the account snapshot is (re)loaded from.
pub type UserLoader = Box<dyn Fn() -> Vec<UserEntry> + Send + Sync>;

/// Refresh hook handed to protocol modules. A refresh is requested whenever a
/// backend rejects credentials that were valid when the session started.
pub trait UserRepository: Send + Sync {
    /// Reload accounts from the source. Returns false when the reload could
    /// not be performed.
    fn refresh(&self) -> bool;
}

/// Account repository for one service. Readers get an `Arc` snapshot and are
/// never blocked by a refresh; a refresh swaps the whole snapshot in one
/// store.
pub struct ServiceUsers {
    accounts: RwLock<Arc<Vec<UserEntry>>>,
    generation: AtomicU64,
    loader: Option<UserLoader>,
}

impl fmt::Debug for ServiceUsers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceUsers")
            .field("accounts", &self.snapshot().len())
            .field("generation", &self.generation())
            .finish()
    }
}

impl ServiceUsers {
    pub fn new(initial: Vec<UserEntry>) -> Self {
        ServiceUsers {
            accounts: RwLock::new(Arc::new(initial)),
            generation: AtomicU64::new(0),
            loader: None,
        }
    }

    pub fn with_loader(loader: UserLoader) -> Self {
        let initial = loader();
        ServiceUsers {
            accounts: RwLock::new(Arc::new(initial)),
            generation: AtomicU64::new(0),
            loader: Some(loader),
        }
    }

    pub fn snapshot(&self) -> Arc<Vec<UserEntry>> {
        self.accounts.read().unwrap().clone()
    }

    pub fn find(&self, user: &str) -> Option<UserEntry> {
        self.snapshot().iter().find(|e| e.user == user).cloned()
    }

    /// How many refreshes have completed. Mostly of interest to tests and
    /// diagnostics.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn replace(&self, accounts: Vec<UserEntry>) {
        *self.accounts.write().unwrap() = Arc::new(accounts);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl UserRepository for ServiceUsers {
    fn refresh(&self) -> bool {
        match &self.loader {
            Some(loader) => {
                let fresh = loader();
                info!("Refreshed user repository, {} accounts", fresh.len());
                self.replace(fresh);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_and_replace() {
        let users = ServiceUsers::new(vec![UserEntry::new("alice", "%", None)]);
        assert!(users.find("alice").is_some());
        assert!(users.find("bob").is_none());

        users.replace(vec![UserEntry::new("bob", "%", Some([7u8; 20]))]);
        assert!(users.find("alice").is_none());
        assert_eq!(users.find("bob").unwrap().password_hash, Some([7u8; 20]));
        assert_eq!(users.generation(), 1);
    }

    #[test]
    fn test_refresh_with_loader() {
        let users = ServiceUsers::with_loader(Box::new(|| {
            vec![UserEntry::new("carol", "localhost", None)]
        }));
        assert!(users.refresh());
        assert_eq!(users.generation(), 1);
        assert!(users.find("carol").is_some());
    }

    #[test]
    fn test_refresh_without_loader() {
        let users = ServiceUsers::new(vec![]);
        assert!(!users.refresh());
        assert_eq!(users.generation(), 0);
    }
}
