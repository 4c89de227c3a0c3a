pub mod backend_connection;
pub mod channel;
pub mod tracker;

pub use backend_connection::{AuthState, BackendConnection, SessionContext};
