use std::fmt;

use crate::buffer::PacketBuf;
use crate::session::Session;

pub mod capabilities {
    /// Router wants whole statements, not raw byte runs.
    pub const RCAP_TYPE_STMT_OUTPUT: u64 = 0x0001;
    /// Router wants each delivered buffer flattened to one chunk.
    pub const RCAP_TYPE_CONTIGUOUS_OUTPUT: u64 = 0x0002;
    /// Router wants resultsets delivered complete, never in halves.
    pub const RCAP_TYPE_RESULTSET_OUTPUT: u64 = 0x0004;
    /// Router runs without a router session.
    pub const RCAP_TYPE_NO_RSESSION: u64 = 0x0008;
}

/// What the router may do about a failed backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Deliver the error to the client; no retry is possible.
    ReplyClient,
    /// Try to replace the failed backend with another server.
    NewConnection,
}

/// The routing module above this driver. Replies flow up through
/// `client_reply`; failures are offered to `handle_error`, whose return value
/// says whether the session can continue on another backend.
pub trait Router: fmt::Debug {
    fn capabilities(&self) -> u64;

    fn client_reply(&mut self, session: &mut Session, reply: PacketBuf);

    fn handle_error(
        &mut self,
        session: &mut Session,
        error: PacketBuf,
        action: ErrorAction,
    ) -> bool;
}
