use crate::declar::command::MySqlCommand;
use crate::router::capabilities::RCAP_TYPE_NO_RSESSION;
use crate::{DEFAULT_CHARSET, DEFAULT_CLIENT_CAPABILITIES, SCRAMBLE_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Allocated,
    RouterReady,
    Stopping,
    /// Placeholder session owned by no client, e.g. monitor connections.
    Dummy,
}

/// Client-side facts the backend driver needs: the capabilities and charset
/// to mirror, the identity to authenticate as, and the challenge the proxy
/// gave the client (explicit re-authentication validates against it).
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub capabilities: u32,
    pub extra_capabilities: u32,
    pub charset: u16,

    /// Scramble the proxy sent in its own handshake to the client.
    pub scramble: [u8; SCRAMBLE_SIZE],

    pub user: String,
    pub db: String,
    /// SHA1(password) recovered during client authentication; `None` for
    /// passwordless accounts.
    pub password_sha1: Option<[u8; SCRAMBLE_SIZE]>,

    /// Address the client connected from, for error messages.
    pub remote: String,

    /// Command byte of the statement the client most recently sent.
    pub current_command: Option<MySqlCommand>,

    /// Whether the client socket is still registered with the event loop.
    pub polling: bool,

    /// Whether the client side finished its own authentication.
    pub auth_complete: bool,
}

impl Default for ClientInfo {
    fn default() -> Self {
        ClientInfo {
            capabilities: DEFAULT_CLIENT_CAPABILITIES,
            extra_capabilities: 0,
            charset: DEFAULT_CHARSET,
            scramble: [0u8; SCRAMBLE_SIZE],
            user: String::new(),
            db: String::new(),
            password_sha1: None,
            remote: String::new(),
            current_command: None,
            polling: true,
            auth_complete: true,
        }
    }
}

#[derive(Debug)]
pub struct Session {
    pub state: SessionState,
    pub client: ClientInfo,
    pub has_router_session: bool,
}

impl Session {
    pub fn new(client: ClientInfo) -> Self {
        Session {
            state: SessionState::RouterReady,
            client,
            has_router_session: true,
        }
    }

    /// Whether a backend reply may be routed to the client right now. A
    /// missing router session is valid only for routers that declared they
    /// run without one.
    pub fn ok_to_route(&self, router_capabilities: u64) -> bool {
        self.state == SessionState::RouterReady
            && self.client.polling
            && self.client.auth_complete
            && (self.has_router_session
                || router_capabilities & RCAP_TYPE_NO_RSESSION != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_to_route() {
        let mut session = Session::new(ClientInfo::default());
        assert!(session.ok_to_route(0));

        session.state = SessionState::Stopping;
        assert!(!session.ok_to_route(0));

        session.state = SessionState::RouterReady;
        session.has_router_session = false;
        assert!(!session.ok_to_route(0));
        assert!(session.ok_to_route(RCAP_TYPE_NO_RSESSION));

        session.has_router_session = true;
        session.client.polling = false;
        assert!(!session.ok_to_route(0));
    }
}
