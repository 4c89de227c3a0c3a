use std::fmt;

use common::err::PResult;

use crate::session::Session;
use crate::SCRAMBLE_SIZE;

pub mod native;

/// Outcome of one authenticator step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    Succeeded,
    /// More packets must be exchanged before the outcome is known.
    Incomplete,
    /// TLS negotiation is still in progress.
    SslIncomplete,
    /// Credentials were fine but the server rejected the default database.
    BadDatabase,
    Failed,
}

/// Pluggable backend authentication. The driver owns the wire; the
/// authenticator owns the meaning of the packets exchanged after the
/// HandshakeResponse has been sent.
pub trait Authenticator: fmt::Debug + Send {
    /// Plugin name announced for this authenticator.
    fn name(&self) -> &'static str;

    /// Examine a complete server packet (header included) received while
    /// authentication is pending and record what it demands.
    fn extract(&mut self, session: &Session, packet: &[u8]) -> AuthResult;

    /// Advance authentication. A response packet to be written to the server
    /// is appended to `out`; `scramble` is refreshed if the server switched
    /// challenges.
    fn authenticate(
        &mut self,
        session: &Session,
        scramble: &mut [u8; SCRAMBLE_SIZE],
        out: &mut Vec<u8>,
    ) -> AuthResult;

    /// Validate a client-supplied COM_CHANGE_USER token against the account
    /// repository. Returns the recovered `SHA1(password)`, or `None` for a
    /// passwordless account.
    fn reauthenticate(
        &mut self,
        user: &str,
        token: &[u8],
        client_scramble: &[u8; SCRAMBLE_SIZE],
    ) -> PResult<Option<[u8; SCRAMBLE_SIZE]>>;
}
