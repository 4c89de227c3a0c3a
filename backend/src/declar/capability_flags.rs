//! Client/server capability bits exchanged during the handshake. Only the
//! flags this driver inspects or forwards are listed.

pub const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;

/// Send found rows instead of affected rows in EOF_Packet.
pub const CLIENT_FOUND_ROWS: u32 = 0x0000_0002;

/// Longer column flags in Protocol::ColumnDefinition.
pub const CLIENT_LONG_FLAG: u32 = 0x0000_0004;

/// Schema name can be given in the Handshake Response Packet.
pub const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;

/// Compression protocol supported.
pub const CLIENT_COMPRESS: u32 = 0x0000_0020;

/// Can use LOAD DATA LOCAL.
pub const CLIENT_LOCAL_FILES: u32 = 0x0000_0080;

pub const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;

/// Switch to SSL after sending the capability flags.
pub const CLIENT_SSL: u32 = 0x0000_0800;

/// Expects status flags in OK_Packet / EOF_Packet.
pub const CLIENT_TRANSACTIONS: u32 = 0x0000_2000;

/// 4.1+ authentication.
pub const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;

/// May send multiple statements per COM_QUERY.
pub const CLIENT_MULTI_STATEMENTS: u32 = 0x0001_0000;

/// Can handle multiple resultsets for COM_QUERY.
pub const CLIENT_MULTI_RESULTS: u32 = 0x0002_0000;

/// Multi-results and OUT parameters in the prepared-statement protocol.
pub const CLIENT_PS_MULTI_RESULTS: u32 = 0x0004_0000;

/// Supports authentication plugins; the handshake carries a plugin name.
pub const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;

/// Sends connection attributes in the Handshake Response Packet.
pub const CLIENT_CONNECT_ATTRS: u32 = 0x0010_0000;

/// Auth response is a length-encoded string rather than a 1-byte-length one.
pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 0x0020_0000;

/// Expects session state information in OK_Packet.
pub const CLIENT_SESSION_TRACK: u32 = 0x0080_0000;

/// Expects an OK_Packet instead of EOF_Packet after a text resultset.
pub const CLIENT_DEPRECATE_EOF: u32 = 0x0100_0000;
