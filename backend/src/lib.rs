pub mod auth;
pub mod buffer;
pub mod bytes;
pub mod commands;
pub mod conn;
pub mod declar;
pub mod packet;
pub mod poll;
pub mod router;
pub mod session;

/// Packet constants
pub const PACKET_HEADER_SIZE: usize = 4;
pub const MAX_BODY_LENGTH: usize = 16777215;
pub const NULL_TERMINATOR: u8 = 0;

/// Length of the random challenge in the server handshake.
pub const SCRAMBLE_SIZE: usize = 20;

/// An EOF packet payload is always shorter than this; a 0xFE packet at least
/// this long is an AuthSwitchRequest instead.
pub const EOF_PACKET_MAX_LEN: usize = 9;

/// Charset used when the client session carries none (latin1_swedish_ci).
pub const DEFAULT_CHARSET: u16 = 0x08;

/// Capabilities announced when the client session carries none.
pub const DEFAULT_CLIENT_CAPABILITIES: u32 = crate::declar::capability_flags::CLIENT_LONG_PASSWORD
    | crate::declar::capability_flags::CLIENT_LONG_FLAG
    | crate::declar::capability_flags::CLIENT_PROTOCOL_41
    | crate::declar::capability_flags::CLIENT_TRANSACTIONS
    | crate::declar::capability_flags::CLIENT_SECURE_CONNECTION
    | crate::declar::capability_flags::CLIENT_PLUGIN_AUTH;
