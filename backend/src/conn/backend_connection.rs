use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use common::err::PResult;
use common::server::{ServerEntry, SERVER_MAINT};
use common::users::UserRepository;

use crate::auth::{AuthResult, Authenticator};
use crate::buffer::{PacketBuf, TYPE_MYSQL, TYPE_RESPONSE_END, TYPE_SESCMD, TYPE_SINGLE_STMT};
use crate::bytes::scramble_response;
use crate::commands::change_user_command::ChangeUserCommand;
use crate::commands::handshake_response_command::HandshakeResponseCommand;
use crate::commands::ssl_request_command::SslRequestCommand;
use crate::conn::channel::{connect_non_blocking, BackendChannel, BackendStream};
use crate::conn::tracker::{ResponseTracker, TrackOutcome};
use crate::declar::auth_plugin_names;
use crate::declar::capability_flags;
use crate::declar::command::MySqlCommand;
use crate::packet::error_packet::{ErrorPacket, ER_HOST_IS_BLOCKED};
use crate::packet::handshake_packet::HandshakePacket;
use crate::packet::response_type::ResponseType;
use crate::packet::{
    classify_response, complete_packets, count_signal_packets, create_com_quit,
    create_custom_error, create_error_packet, is_result_set, next_complete_packet, wrap_packet,
    ResponseKind,
};
use crate::poll::Poller;
use crate::router::capabilities::{
    RCAP_TYPE_CONTIGUOUS_OUTPUT, RCAP_TYPE_RESULTSET_OUTPUT, RCAP_TYPE_STMT_OUTPUT,
};
use crate::router::{ErrorAction, Router};
use crate::session::{Session, SessionState};
use crate::{PACKET_HEADER_SIZE, SCRAMBLE_SIZE};

/// Error code used for proxy-synthesized error packets (CR_CONN_HOST_ERROR).
const CUSTOM_ERROR_CODE: u16 = 2003;

const AUTH_FAILED_MSG: &str = "Authentication with backend failed. Session will be closed.";
const LOST_CONNECTION_MSG: &str = "Lost connection to backend server.";
const READ_FAILED_MSG: &str = "Read from backend failed";
const INVALID_STATE_MSG: &str = "Writing to backend failed due invalid proxy state.";
const DELAYQ_WRITE_FAILED_MSG: &str = "Failed to write buffered data to back-end server. \
     Buffer was empty or back-end was disconnected during operation. \
     Attempting to find a new backend.";

/// Authentication progress of the backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Init,
    /// Nonblocking connect returned EINPROGRESS; waiting for writable.
    PendingConnect,
    /// TCP established, the server handshake has not been consumed yet.
    Connected,
    /// HandshakeResponse is on the wire, waiting for the verdict.
    ResponseSent,
    /// Authenticated; client payloads may flow.
    Complete,
    HandshakeFailed,
    Failed,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthState::Init => "INIT",
            AuthState::PendingConnect => "PENDING_CONNECT",
            AuthState::Connected => "CONNECTED",
            AuthState::ResponseSent => "RESPONSE_SENT",
            AuthState::Complete => "COMPLETE",
            AuthState::HandshakeFailed => "HANDSHAKE_FAILED",
            AuthState::Failed => "FAILED",
        };
        write!(f, "{}", name)
    }
}

/// Host collaborators handed to every entry point. The driver never stores
/// them; each callback receives the current ones.
pub struct SessionContext<'a> {
    pub session: &'a mut Session,
    pub router: &'a mut dyn Router,
    pub poller: &'a mut dyn Poller,
    pub users: &'a dyn UserRepository,
}

/// One connection to an upstream MySQL server, owned by a single worker.
/// Event callbacks and writes are never re-entered for the same connection.
#[derive(Debug)]
pub struct BackendConnection {
    server: Arc<ServerEntry>,
    channel: BackendChannel,
    auth_state: AuthState,

    client_capabilities: u32,
    extra_capabilities: u32,
    charset: u16,
    scramble: [u8; SCRAMBLE_SIZE],
    /// Sequence id for the deferred HandshakeResponse while TLS negotiates.
    auth_seq: u8,
    ssl_established: bool,

    current_command: Option<MySqlCommand>,
    tracker: ResponseTracker,

    /// Client payloads held back until authentication completes.
    delayq: PacketBuf,
    /// Unconsumed wire bytes: framing residue and rolled-back partial replies.
    readq: PacketBuf,

    /// True between sending a pool-reattach COM_CHANGE_USER and consuming
    /// its reply.
    ignore_reply: bool,
    stored_query: Option<PacketBuf>,
    was_persistent: bool,

    /// Connection currently parked in the persistent pool.
    in_pool: bool,
    /// An orphan event was seen; the pool must discard this connection.
    errored: bool,
    /// Registered with the event loop.
    polling: bool,

    authenticator: Box<dyn Authenticator>,
}

impl BackendConnection {
    /// Open a new backend connection for `session`. Capabilities and charset
    /// are copied from the client side so the backend sees the same dialect.
    /// The socket is registered with the event loop before this returns; the
    /// handshake is driven by subsequent read events.
    pub fn connect(
        server: Arc<ServerEntry>,
        session: &Session,
        authenticator: Box<dyn Authenticator>,
        poller: &mut dyn Poller,
    ) -> PResult<Self> {
        let (stream, pending) = match connect_non_blocking(&server.host, server.port) {
            Ok(v) => v,
            Err(err) => {
                error!(
                    "Establishing connection to backend server [{}]:{} failed.",
                    server.host, server.port
                );
                return Err(err);
            }
        };

        let auth_state = if pending {
            AuthState::PendingConnect
        } else {
            AuthState::Connected
        };
        debug!(
            "Connection to [{}]:{} in state {}",
            server.host, server.port, auth_state
        );

        let mut conn = Self::from_stream(server, session, authenticator, Box::new(stream), auth_state);
        poller.register(conn.channel.raw_fd())?;
        conn.polling = true;
        Ok(conn)
    }

    /// Wrap an already-open stream, e.g. one the host dequeued from its pool
    /// or a scripted stream in tests.
    pub fn from_stream(
        server: Arc<ServerEntry>,
        session: &Session,
        authenticator: Box<dyn Authenticator>,
        stream: Box<dyn BackendStream>,
        auth_state: AuthState,
    ) -> Self {
        let client = &session.client;
        BackendConnection {
            server,
            channel: BackendChannel::new(stream),
            auth_state,
            client_capabilities: client.capabilities,
            extra_capabilities: client.extra_capabilities,
            charset: client.charset,
            scramble: [0u8; SCRAMBLE_SIZE],
            auth_seq: 1,
            ssl_established: false,
            current_command: None,
            tracker: ResponseTracker::default(),
            delayq: PacketBuf::new(),
            readq: PacketBuf::new(),
            ignore_reply: false,
            stored_query: None,
            was_persistent: false,
            in_pool: false,
            errored: false,
            polling: true,
            authenticator,
        }
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth_state
    }

    pub fn server(&self) -> &Arc<ServerEntry> {
        &self.server
    }

    pub fn scramble(&self) -> &[u8; SCRAMBLE_SIZE] {
        &self.scramble
    }

    /// Extended (MariaDB) capability bits mirrored from the client session.
    pub fn extra_capabilities(&self) -> u32 {
        self.extra_capabilities
    }

    pub fn is_ignore_reply(&self) -> bool {
        self.ignore_reply
    }

    pub fn stored_query_len(&self) -> usize {
        self.stored_query.as_ref().map(|q| q.len()).unwrap_or(0)
    }

    pub fn delay_queue_len(&self) -> usize {
        self.delayq.len()
    }

    pub fn response_tracker(&self) -> &ResponseTracker {
        &self.tracker
    }

    pub fn is_errored(&self) -> bool {
        self.errored
    }

    /// Pool bookkeeping: mark the connection parked / taken back out.
    pub fn set_in_pool(&mut self, in_pool: bool) {
        self.in_pool = in_pool;
    }

    pub fn set_was_persistent(&mut self) {
        self.was_persistent = true;
    }

    /// The host signals that backend TLS negotiation finished.
    pub fn set_ssl_established(&mut self) {
        self.ssl_established = true;
    }

    /// Name of the authentication plugin spoken by default.
    pub fn default_auth_name(&self) -> &'static str {
        self.authenticator.name()
    }

    /// Whether the connection is idle, authenticated and carrying no
    /// half-done change-user exchange; only then may the pool park it.
    pub fn connection_established(&self) -> bool {
        self.auth_state == AuthState::Complete && !self.ignore_reply && self.stored_query.is_none()
    }

    /*
     * Read event
     */

    /// EPOLLIN: drive the handshake, or frame and deliver server replies.
    pub fn on_read(&mut self, ctx: &mut SessionContext) {
        if self.in_pool {
            // an orphan read on a pooled connection means the server dropped
            // us; the pool checks the flag before reuse
            self.errored = true;
            return;
        }
        if ctx.session.state == SessionState::Dummy {
            return;
        }

        debug!(
            "Read event in protocol state {} on server '{}'",
            self.auth_state, self.server.unique_name
        );

        if self.auth_state == AuthState::Complete {
            self.read_and_write(ctx);
        } else {
            self.read_auth_packet(ctx);
        }
    }

    /// Authentication phase: consume exactly one complete server packet and
    /// step the state machine with it.
    fn read_auth_packet(&mut self, ctx: &mut SessionContext) {
        let (data, closed) = match self.channel.read_available() {
            Ok(v) => v,
            Err(err) => {
                error!("Read from backend failed during authentication: {}", err);
                self.auth_state = AuthState::Failed;
                self.reply_on_error(ctx);
                return;
            }
        };
        self.readq.append(data);

        let packet = {
            let mut pending = std::mem::take(&mut self.readq);
            let packet = next_complete_packet(&mut pending);
            self.readq = pending;
            packet
        };

        let Some(mut packet) = packet else {
            if closed {
                self.auth_state = AuthState::Failed;
                self.reply_on_error(ctx);
            } else if self.auth_state == AuthState::Connected && self.ssl_established {
                // TLS handshake finished with no packet pending; the auth
                // response can go out now
                self.auth_state = self.send_backend_auth(ctx.session, self.auth_seq);
                self.after_auth_step(ctx);
            }
            return;
        };

        let bytes = packet.contiguous().to_vec();
        let payload_len = bytes.len() - PACKET_HEADER_SIZE;
        if payload_len == 0 {
            error!("Empty packet from backend '{}' during authentication", self.server.unique_name);
            self.auth_state = AuthState::Failed;
            self.after_auth_step(ctx);
            return;
        }
        let seq = bytes[3];
        let first = bytes[PACKET_HEADER_SIZE];

        if first == ResponseType::ERROR {
            match ErrorPacket::parse(&bytes[PACKET_HEADER_SIZE + 1..]) {
                Ok(err) => self.handle_error_response(ctx, &err),
                Err(err) => error!("Malformed error packet from backend: {}", err),
            }
            self.auth_state = match self.auth_state {
                AuthState::Connected => AuthState::HandshakeFailed,
                AuthState::ResponseSent => {
                    // credentials versus database rejections log differently
                    if self.authenticator.extract(ctx.session, &bytes) == AuthResult::BadDatabase {
                        error!(
                            "Backend '{}' rejected the default database for this session",
                            self.server.unique_name
                        );
                    }
                    AuthState::Failed
                }
                _ => AuthState::Failed,
            };
        } else {
            match self.auth_state {
                AuthState::Connected => {
                    match HandshakePacket::parse(&bytes[PACKET_HEADER_SIZE..]) {
                        Ok(handshake) => {
                            self.decode_handshake(&handshake);
                            self.auth_seq = seq.wrapping_add(1);
                            self.auth_state = self.send_backend_auth(ctx.session, self.auth_seq);
                        }
                        Err(err) => {
                            error!("Failed to decode server handshake: {}", err);
                            self.auth_state = AuthState::Failed;
                        }
                    }
                }
                AuthState::ResponseSent => {
                    self.auth_state = self.handle_server_response(ctx.session, &bytes);
                }
                state => {
                    debug!(
                        "Discarding {} byte packet (seq {}, payload length {}) in state {}",
                        bytes.len(),
                        seq,
                        payload_len,
                        state
                    );
                }
            }
        }

        self.after_auth_step(ctx);
    }

    /// Common tail of every authentication step: flush the delay queue on
    /// success, surface the failure otherwise.
    fn after_auth_step(&mut self, ctx: &mut SessionContext) {
        match self.auth_state {
            AuthState::Complete => self.write_delay_queue(ctx),
            AuthState::Failed | AuthState::HandshakeFailed => self.reply_on_error(ctx),
            _ => {}
        }
    }

    fn decode_handshake(&mut self, handshake: &HandshakePacket) {
        let len = handshake.scramble.len().min(SCRAMBLE_SIZE);
        self.scramble[..len].copy_from_slice(&handshake.scramble[..len]);
        debug!(
            "Decoded handshake from '{}' (server version {})",
            self.server.unique_name, handshake.server_version
        );
    }

    /// Send the HandshakeResponse41, or the SSLRequest prefix first when the
    /// client session asked for TLS.
    fn send_backend_auth(&mut self, session: &Session, seq: u8) -> AuthState {
        if session.client.capabilities & capability_flags::CLIENT_SSL != 0 && !self.ssl_established
        {
            let request = SslRequestCommand::new(self.client_capabilities, (self.charset & 0xff) as u8);
            let payload = match request.serialize() {
                Ok(payload) => payload,
                Err(err) => {
                    error!("Failed to serialize SSLRequest: {}", err);
                    return AuthState::Failed;
                }
            };
            if !self.channel.write_buf(wrap_packet(&payload, seq)) {
                return AuthState::Failed;
            }
            self.auth_seq = seq.wrapping_add(1);
            // stay until the host reports the TLS handshake done
            return AuthState::Connected;
        }

        let client = &session.client;
        let database = if client.db.is_empty() {
            None
        } else {
            Some(client.db.clone())
        };
        let response = HandshakeResponseCommand::new(
            self.client_capabilities,
            (self.charset & 0xff) as u8,
            &client.user,
            client.password_sha1,
            database,
            &self.scramble,
            auth_plugin_names::MY_SQL_NATIVE_PASSWORD,
        );
        let payload = match response.serialize() {
            Ok(payload) => payload,
            Err(err) => {
                error!("Failed to serialize handshake response: {}", err);
                return AuthState::Failed;
            }
        };

        if self.channel.write_buf(wrap_packet(&payload, seq)) {
            AuthState::ResponseSent
        } else {
            AuthState::Failed
        }
    }

    /// First reply after the HandshakeResponse: delegate to the
    /// authenticator, which may need further packet exchanges.
    fn handle_server_response(&mut self, session: &Session, packet: &[u8]) -> AuthState {
        let fallback = AuthState::Failed;

        match self.authenticator.extract(session, packet) {
            AuthResult::Succeeded | AuthResult::Incomplete => {
                let mut out = Vec::new();
                let result =
                    self.authenticator
                        .authenticate(session, &mut self.scramble, &mut out);
                if !out.is_empty() && !self.channel.write_buf(PacketBuf::from_vec(out)) {
                    return fallback;
                }
                match result {
                    AuthResult::Succeeded => AuthState::Complete,
                    AuthResult::Incomplete | AuthResult::SslIncomplete => AuthState::ResponseSent,
                    AuthResult::Failed | AuthResult::BadDatabase => fallback,
                }
            }
            _ => fallback,
        }
    }

    /// Inspect an ERR received during the handshake: a blocked host takes
    /// the server out of rotation, stale credentials trigger a user refresh.
    fn handle_error_response(&mut self, ctx: &mut SessionContext, err: &ErrorPacket) {
        error!(
            "Invalid authentication message from backend '{}'. Error code: {}, Msg : {}",
            self.server.unique_name, err.error_code, err.message
        );

        if err.error_code == ER_HOST_IS_BLOCKED {
            error!(
                "Server {} has been put into maintenance mode due to the server \
                 blocking connections from the proxy. Run 'mysqladmin -h {} -P {} \
                 flush-hosts' on this server before taking this server out of \
                 maintenance mode.",
                self.server.unique_name, self.server.host, self.server.port
            );
            self.server.set_status(SERVER_MAINT);
        } else if err.is_access_denied() && ctx.session.state != SessionState::Dummy {
            // authentication failed, reload users
            ctx.users.refresh();
        }
    }

    /// Authentication cannot complete: free buffered writes and give the
    /// router the bad news. There is no retry path at auth time.
    fn reply_on_error(&mut self, ctx: &mut SessionContext) {
        self.delayq.clear();

        let errbuf = create_custom_error(1, CUSTOM_ERROR_CODE, AUTH_FAILED_MSG);
        if ctx.session.has_router_session {
            ctx.router
                .handle_error(ctx.session, errbuf, ErrorAction::ReplyClient);
            ctx.session.state = SessionState::Stopping;
        } else {
            // valid for routers that run without a router session
            self.errored = true;
        }
    }

    /*
     * Post-authentication read path
     */

    fn expecting_resultset(&self) -> bool {
        matches!(
            self.current_command,
            Some(MySqlCommand::ComQuery) | Some(MySqlCommand::ComStmtFetch)
        )
    }

    fn read_and_write(&mut self, ctx: &mut SessionContext) {
        let (data, closed) = match self.channel.read_available() {
            Ok(v) => v,
            Err(err) => {
                error!("Read from backend '{}' failed: {}", self.server.unique_name, err);
                let errbuf = create_custom_error(1, CUSTOM_ERROR_CODE, READ_FAILED_MSG);
                let succp =
                    ctx.router
                        .handle_error(ctx.session, errbuf, ErrorAction::NewConnection);
                if !succp {
                    ctx.session.state = SessionState::Stopping;
                }
                return;
            }
        };

        self.readq.append(data);
        if closed && self.readq.is_empty() {
            self.poll_fake_hangup(ctx);
            return;
        }
        if self.readq.is_empty() {
            return;
        }

        let mut read_buffer = std::mem::take(&mut self.readq);
        let capabilities = ctx.router.capabilities();

        if capabilities & RCAP_TYPE_STMT_OUTPUT != 0 || self.ignore_reply {
            // put any residue into the read queue
            let whole = complete_packets(&mut read_buffer);
            self.readq = read_buffer;

            let Some(whole) = whole else {
                if closed {
                    self.poll_fake_hangup(ctx);
                }
                return;
            };
            read_buffer = whole;

            if capabilities & RCAP_TYPE_CONTIGUOUS_OUTPUT != 0 || self.ignore_reply {
                read_buffer.make_contiguous();

                if capabilities & RCAP_TYPE_RESULTSET_OUTPUT != 0
                    && self.expecting_resultset()
                    && is_result_set(&read_buffer)
                {
                    if count_signal_packets(&read_buffer) != 2 {
                        // hold the half resultset until the rest arrives
                        read_buffer.append(std::mem::take(&mut self.readq));
                        self.readq = read_buffer;
                        return;
                    }
                    read_buffer.tag_last(TYPE_RESPONSE_END);
                }
            }
        }

        if self.ignore_reply {
            self.handle_change_user_reply(ctx, read_buffer);
            return;
        }

        loop {
            let stmt = if self.tracker.current_command().is_some() {
                // a session command owns the stream until its reply completes
                match self.tracker.process_response_data(&mut read_buffer) {
                    TrackOutcome::Incomplete(mut requeue) => {
                        requeue.append(std::mem::take(&mut self.readq));
                        self.readq = requeue;
                        return;
                    }
                    TrackOutcome::Complete(stmt) => stmt,
                }
            } else if capabilities & RCAP_TYPE_STMT_OUTPUT != 0
                && capabilities & RCAP_TYPE_RESULTSET_OUTPUT == 0
            {
                match next_complete_packet(&mut read_buffer) {
                    Some(stmt) => stmt,
                    None => {
                        if !read_buffer.is_empty() {
                            read_buffer.append(std::mem::take(&mut self.readq));
                            self.readq = read_buffer;
                        }
                        break;
                    }
                }
            } else {
                std::mem::take(&mut read_buffer)
            };

            if ctx.session.ok_to_route(capabilities) {
                let mut stmt = stmt;
                stmt.set_type(TYPE_MYSQL);
                ctx.router.client_reply(ctx.session, stmt);
            }
            // session is closing; replying to the client is not possible

            if read_buffer.is_empty() {
                break;
            }
        }

        if closed {
            self.poll_fake_hangup(ctx);
        }
    }

    /// A COM_CHANGE_USER reply must have at least seven payload bytes, no
    /// affected rows and no insert id to count as a genuine OK.
    fn change_user_ok_sane(bytes: &[u8]) -> bool {
        bytes.len() >= PACKET_HEADER_SIZE + 7
            && bytes[PACKET_HEADER_SIZE] == ResponseType::OK
            && bytes[PACKET_HEADER_SIZE + 1] == 0
            && bytes[PACKET_HEADER_SIZE + 2] == 0
    }

    /// Consume the reply to a pool-reattach COM_CHANGE_USER. The reply never
    /// reaches the client; on success the stored client query goes out
    /// through the normal write path.
    fn handle_change_user_reply(&mut self, ctx: &mut SessionContext, mut read_buffer: PacketBuf) {
        let query = self.stored_query.take();
        self.ignore_reply = false;

        let Some(mut reply) = next_complete_packet(&mut read_buffer) else {
            self.poll_fake_hangup(ctx);
            return;
        };
        // skip to the last packet if we get more than one
        while let Some(next) = next_complete_packet(&mut read_buffer) {
            reply = next;
        }

        let bytes = reply.contiguous().to_vec();
        let payload_len = bytes.len() - PACKET_HEADER_SIZE;
        if payload_len == 0 {
            error!("Empty reply to COM_CHANGE_USER, closing connection");
            self.poll_fake_hangup(ctx);
            return;
        }
        let seq = bytes[3];
        let first = bytes[PACKET_HEADER_SIZE];

        match classify_response(first, payload_len) {
            ResponseKind::Ok if Self::change_user_ok_sane(&bytes) => {
                info!("Response to COM_CHANGE_USER is OK, writing stored query");
                if let Some(query) = query {
                    self.write(ctx, query);
                }
            }
            ResponseKind::AuthSwitch => {
                let name_start = PACKET_HEADER_SIZE + 1;
                let name_end = bytes[name_start..]
                    .iter()
                    .position(|&b| b == 0)
                    .map(|p| name_start + p)
                    .unwrap_or(bytes.len());
                let plugin = String::from_utf8_lossy(&bytes[name_start..name_end]).to_string();

                if plugin == auth_plugin_names::MY_SQL_NATIVE_PASSWORD {
                    // the server is simply generating a new scramble for the
                    // re-authentication process
                    let scramble_start = name_end + 1;
                    if bytes.len() >= scramble_start + SCRAMBLE_SIZE {
                        self.scramble
                            .copy_from_slice(&bytes[scramble_start..scramble_start + SCRAMBLE_SIZE]);
                    }

                    let token = match &ctx.session.client.password_sha1 {
                        Some(hash) => scramble_response(&self.scramble, hash).to_vec(),
                        None => Vec::new(),
                    };
                    if self
                        .channel
                        .write_buf(wrap_packet(&token, seq.wrapping_add(1)))
                    {
                        // hold the query until the switched authentication
                        // settles
                        self.stored_query = query;
                        self.ignore_reply = true;
                    } else {
                        self.poll_fake_hangup(ctx);
                    }
                } else {
                    error!(
                        "Received AuthSwitchRequest to '{}' when '{}' was expected",
                        plugin,
                        auth_plugin_names::MY_SQL_NATIVE_PASSWORD
                    );
                    self.poll_fake_hangup(ctx);
                }
            }
            ResponseKind::Err => {
                if let Ok(err) = ErrorPacket::parse(&bytes[PACKET_HEADER_SIZE + 1..]) {
                    self.handle_error_response(ctx, &err);
                }
                self.poll_fake_hangup(ctx);
            }
            _ => {
                error!(
                    "Unknown response to COM_CHANGE_USER (0x{:02x}), closing connection",
                    first
                );
                self.poll_fake_hangup(ctx);
            }
        }
    }

    fn poll_fake_hangup(&mut self, ctx: &mut SessionContext) {
        let fd = self.channel.raw_fd();
        ctx.poller.fake_hangup(fd);
    }

    /*
     * Write event
     */

    /// EPOLLOUT: either the pending connect finished, or the socket drained
    /// enough to accept the queued tail.
    pub fn on_write_ready(&mut self, ctx: &mut SessionContext) {
        if !self.polling {
            // don't write to the backend if it is not in the poll set anymore
            if self.channel.has_pending_writes() {
                let com_quit = self.channel.writeq_command()
                    == Some(u8::from(MySqlCommand::ComQuit));
                if !com_quit {
                    error!(
                        "Attempt to write buffered data to backend failed due \
                         internal inconsistent state."
                    );
                    let errbuf = create_custom_error(1, CUSTOM_ERROR_CODE, INVALID_STATE_MSG);
                    let capabilities = ctx.router.capabilities();
                    if ctx.session.ok_to_route(capabilities) {
                        ctx.router.client_reply(ctx.session, errbuf);
                    }
                }
                self.channel.clear_writeq();
            } else {
                debug!("Write ready in non-polling state but there's nothing to write either");
            }
            return;
        }

        if self.auth_state == AuthState::PendingConnect {
            self.auth_state = AuthState::Connected;
        } else {
            self.channel.drain_writeq();
        }
    }

    /// Client data headed for the backend. Returns false when the buffer was
    /// dropped and the router should pick another server.
    pub fn write(&mut self, ctx: &mut SessionContext, queue: PacketBuf) -> bool {
        if self.was_persistent {
            self.was_persistent = false;
            self.ignore_reply = false;

            if !self.polling || self.auth_state != AuthState::Complete {
                info!(
                    "Connection state does not qualify for pool reuse: polling={}, {}",
                    self.polling, self.auth_state
                );
                return false;
            }

            // the client may have vanished before a previous reattach reply
            // arrived
            self.stored_query = None;

            if queue.peek_u8(PACKET_HEADER_SIZE) == Some(u8::from(MySqlCommand::ComQuit)) {
                info!(
                    "COM_QUIT received as the first write, ignoring and \
                     sending the connection back to the pool."
                );
                return true;
            }

            let change_user = self.build_change_user(ctx.session);
            if self.channel.write_buf(change_user) {
                info!("Sent COM_CHANGE_USER");
                self.ignore_reply = true;
                self.stored_query = Some(queue);
                return true;
            }
            return false;
        }

        if self.ignore_reply {
            return if queue.peek_u8(PACKET_HEADER_SIZE) == Some(u8::from(MySqlCommand::ComQuit)) {
                // the session is closing while COM_CHANGE_USER is in flight
                info!("COM_QUIT received while COM_CHANGE_USER is in progress, closing pooled connection");
                self.stored_query = None;
                self.poll_fake_hangup(ctx);
                false
            } else {
                // BLOB continuations and pipelined queries pile up behind
                // the reattach
                info!("COM_CHANGE_USER in progress, appending query to queue");
                match &mut self.stored_query {
                    Some(stored) => stored.append(queue),
                    None => self.stored_query = Some(queue),
                }
                true
            };
        }

        match self.auth_state {
            AuthState::HandshakeFailed | AuthState::Failed => {
                if ctx.session.state != SessionState::Stopping {
                    error!(
                        "Unable to write to backend '{}' due to {} failure.",
                        self.server.unique_name,
                        if self.auth_state == AuthState::HandshakeFailed {
                            "handshake"
                        } else {
                            "authentication"
                        }
                    );
                }
                false
            }

            AuthState::Complete => {
                let cmd = queue
                    .peek_u8(PACKET_HEADER_SIZE)
                    .and_then(|b| MySqlCommand::try_from(b).ok());

                // track the command being executed for resultset framing
                if let Some(current) = ctx.session.client.current_command {
                    self.current_command = Some(current);
                } else {
                    self.current_command = cmd;
                }

                if queue.has_type(TYPE_SINGLE_STMT | TYPE_SESCMD) {
                    if let Some(cmd) = cmd {
                        self.tracker.add_command(cmd);
                    }
                }

                if cmd == Some(MySqlCommand::ComQuit) && self.server.persistpoolmax > 0 {
                    // pooled connections stay alive; the COM_QUIT never
                    // reaches the wire
                    return true;
                }

                self.channel.write_buf(queue)
            }

            _ => {
                debug!(
                    "Delayed write in protocol state {} to server '{}'",
                    self.auth_state, self.server.unique_name
                );
                if queue.has_type(TYPE_SINGLE_STMT | TYPE_SESCMD) {
                    if let Some(cmd) = queue
                        .peek_u8(PACKET_HEADER_SIZE)
                        .and_then(|b| MySqlCommand::try_from(b).ok())
                    {
                        self.tracker.add_command(cmd);
                    }
                }
                self.delayq.append(queue);
                true
            }
        }
    }

    /// Flush everything that queued up while authentication was pending.
    fn write_delay_queue(&mut self, ctx: &mut SessionContext) {
        let mut queue = std::mem::take(&mut self.delayq);
        if queue.is_empty() {
            return;
        }

        if queue.peek_u8(PACKET_HEADER_SIZE) == Some(u8::from(MySqlCommand::ComChangeUser)) {
            // recreate the COM_CHANGE_USER with the scramble this backend
            // actually sent us
            let _stale = next_complete_packet(&mut queue);
            let mut rebuilt = self.build_change_user(ctx.session);
            rebuilt.append(queue);
            queue = rebuilt;
        }

        if queue.peek_u8(PACKET_HEADER_SIZE) == Some(u8::from(MySqlCommand::ComQuit))
            && self.server.persistpoolmax > 0
        {
            // keep the pooled connection alive
            return;
        }

        if !self.channel.write_buf(queue) {
            let errbuf = create_custom_error(1, CUSTOM_ERROR_CODE, DELAYQ_WRITE_FAILED_MSG);
            let succp = ctx
                .router
                .handle_error(ctx.session, errbuf, ErrorAction::NewConnection);
            if !succp {
                ctx.session.state = SessionState::Stopping;
            }
        }
    }

    fn build_change_user(&self, session: &Session) -> PacketBuf {
        let client = &session.client;
        let command = ChangeUserCommand::new(
            &client.user,
            &client.db,
            client.password_sha1,
            self.charset,
            self.scramble,
        );
        // the builder writes fixed fields only, it cannot fail
        let payload = command.serialize().unwrap_or_default();
        let mut packet = wrap_packet(&payload, 0);
        packet.set_type(TYPE_MYSQL | TYPE_SINGLE_STMT | TYPE_SESCMD);
        packet
    }

    /*
     * Explicit client re-authentication
     */

    /// COM_CHANGE_USER from the client: verify the credentials locally,
    /// commit the new identity and forward a freshly built packet.
    pub fn change_user(&mut self, ctx: &mut SessionContext, queue: PacketBuf) -> bool {
        let mut queue = queue;
        let bytes = queue.contiguous().to_vec();

        let Some(parsed) = parse_change_user(&bytes) else {
            error!("Malformed COM_CHANGE_USER packet from client");
            return false;
        };

        let client_scramble = ctx.session.client.scramble;
        let mut result =
            self.authenticator
                .reauthenticate(&parsed.user, &parsed.token, &client_scramble);

        if result.is_err() && ctx.users.refresh() {
            // try again with fresh repository data
            result = self
                .authenticator
                .reauthenticate(&parsed.user, &parsed.token, &client_scramble);
        }

        match result {
            Err(err) => {
                warn!("COM_CHANGE_USER for '{}' failed: {}", parsed.user, err);

                // record the command and feed an artificial reply through the
                // tracker so the ordering with other session commands holds
                self.tracker.add_command(MySqlCommand::ComChangeUser);

                let message = format!(
                    "Access denied for user '{}'@'{}' (using password: {})",
                    parsed.user,
                    ctx.session.client.remote,
                    if parsed.token.is_empty() { "NO" } else { "YES" }
                );
                let mut fake = create_error_packet(1, 1045, "28000", &message);
                if let TrackOutcome::Complete(reply) =
                    self.tracker.process_response_data(&mut fake)
                {
                    let capabilities = ctx.router.capabilities();
                    if ctx.session.ok_to_route(capabilities) {
                        ctx.router.client_reply(ctx.session, reply);
                    }
                }
                true
            }
            Ok(password_sha1) => {
                // This assumes the backend will accept the same credentials
                // the proxy just verified; backends that still reject the
                // COM_CHANGE_USER are discarded by the router.
                ctx.session.client.user = parsed.user;
                ctx.session.client.db = parsed.database;
                ctx.session.client.password_sha1 = password_sha1;
                if let Some(charset) = parsed.charset {
                    self.charset = charset;
                }

                let packet = self.build_change_user(ctx.session);
                self.write(ctx, packet)
            }
        }
    }

    /*
     * Error, hangup and close
     */

    /// EPOLLERR: pass the failure to the router unless the connection is
    /// already out of the poll set.
    pub fn on_error(&mut self, ctx: &mut SessionContext) {
        if ctx.session.state == SessionState::Dummy {
            if !self.in_pool {
                error!("Error event on a connection with no session, closing connection.");
            }
            self.errored = true;
            self.close(ctx);
            return;
        }

        if !self.polling {
            if let Some(err) = self.channel.take_socket_error() {
                error!("Backend connection in non-polling state got error '{}'.", err);
            }
            return;
        }

        if ctx.session.state != SessionState::RouterReady {
            if let Some(err) = self.channel.take_socket_error() {
                error!("Error '{}' in session that is not ready for routing.", err);
            }
            return;
        }

        let errbuf = create_custom_error(1, CUSTOM_ERROR_CODE, LOST_CONNECTION_MSG);
        let succp = ctx
            .router
            .handle_error(ctx.session, errbuf, ErrorAction::NewConnection);
        if !succp {
            ctx.session.state = SessionState::Stopping;
        }
    }

    /// EPOLLHUP, real or faked.
    pub fn on_hangup(&mut self, ctx: &mut SessionContext) {
        if self.in_pool {
            self.errored = true;
            return;
        }

        if ctx.session.state != SessionState::RouterReady {
            if let Some(err) = self.channel.take_socket_error() {
                if ctx.session.state != SessionState::Stopping {
                    error!(
                        "Hangup in session that is not ready for routing, \
                         error reported is '{}'.",
                        err
                    );
                }
            }
            return;
        }

        let errbuf = create_custom_error(1, CUSTOM_ERROR_CODE, LOST_CONNECTION_MSG);
        let succp = ctx
            .router
            .handle_error(ctx.session, errbuf, ErrorAction::NewConnection);
        if !succp {
            ctx.session.state = SessionState::Stopping;
        }
    }

    /// Tear the connection down. A COM_QUIT is sent so the server can free
    /// its side. Returns true when the host should also close the client
    /// socket because the whole session is stopping.
    pub fn close(&mut self, ctx: &mut SessionContext) -> bool {
        if self.channel.is_open() {
            let mut quit = create_com_quit();
            quit.set_type(TYPE_MYSQL);
            self.channel.write_buf(quit);
            ctx.poller.deregister(self.channel.raw_fd());
            self.channel.close();
        }
        self.polling = false;
        self.delayq.clear();
        self.stored_query = None;

        ctx.session.state == SessionState::Stopping && ctx.session.client.polling
    }
}

struct ParsedChangeUser {
    user: String,
    token: Vec<u8>,
    database: String,
    charset: Option<u16>,
}

/// Pull user, auth token, database and charset out of a client
/// COM_CHANGE_USER packet.
fn parse_change_user(bytes: &[u8]) -> Option<ParsedChangeUser> {
    let payload = bytes.get(PACKET_HEADER_SIZE + 1..)?;

    let mut pos = 0usize;
    let user_end = payload[pos..].iter().position(|&b| b == 0)? + pos;
    let user = String::from_utf8_lossy(&payload[pos..user_end]).to_string();
    pos = user_end + 1;

    let token_len = *payload.get(pos)? as usize;
    pos += 1;
    let token = payload.get(pos..pos + token_len)?.to_vec();
    pos += token_len;

    let db_end = payload[pos..].iter().position(|&b| b == 0)? + pos;
    let database = String::from_utf8_lossy(&payload[pos..db_end]).to_string();
    pos = db_end + 1;

    let charset = payload
        .get(pos..pos + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .filter(|&c| c != 0);

    Some(ParsedChangeUser {
        user,
        token,
        database,
        charset,
    })
}
