use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use common::err::proxy_error::ProxyError;
use common::err::PResult;

use crate::bytes::read_null_term_string;
use crate::declar::capability_flags;

pub const HANDSHAKE_PROTOCOL_VERSION: u8 = 10;

/// Initial handshake (protocol v10) the server sends right after accept.
#[derive(Debug)]
pub struct HandshakePacket {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// Full 20-byte challenge, both halves joined.
    pub scramble: Vec<u8>,
    pub server_capabilities: u32,
    pub server_charset: u8,
    pub status_flags: u16,
    pub auth_plugin_name: String,
}

impl HandshakePacket {
    pub fn parse(packet: &[u8]) -> PResult<Self> {
        let mut cursor = Cursor::new(packet);

        let protocol_version = cursor.read_u8()?;
        if protocol_version != HANDSHAKE_PROTOCOL_VERSION {
            return Err(ProxyError::Protocol(format!(
                "Unsupported handshake protocol version {}",
                protocol_version
            )));
        }

        let server_version = read_null_term_string(&mut cursor)?;
        let connection_id = cursor.read_u32::<LittleEndian>()?;

        let mut scramble = vec![0u8; 8];
        cursor.read_exact(&mut scramble)?;
        // filler
        cursor.read_u8()?;

        let capabilities_lo = cursor.read_u16::<LittleEndian>()?;

        let mut server_charset = 0u8;
        let mut status_flags = 0u16;
        let mut capabilities_hi = 0u16;
        let mut auth_data_len = 0u8;
        let mut auth_plugin_name = String::new();

        if (cursor.position() as usize) < packet.len() {
            server_charset = cursor.read_u8()?;
            status_flags = cursor.read_u16::<LittleEndian>()?;
            capabilities_hi = cursor.read_u16::<LittleEndian>()?;
            auth_data_len = cursor.read_u8()?;

            let mut reserved = [0u8; 10];
            cursor.read_exact(&mut reserved)?;
        }

        let server_capabilities =
            (capabilities_lo as u32) | ((capabilities_hi as u32) << 16);

        if server_capabilities & capability_flags::CLIENT_SECURE_CONNECTION != 0 {
            // the second half: max(13, auth_data_len - 8) bytes, NUL included
            let part2_len = std::cmp::max(13, auth_data_len.saturating_sub(8)) as usize;
            let mut part2 = vec![0u8; part2_len];
            cursor.read_exact(&mut part2)?;
            while part2.last() == Some(&0) {
                part2.pop();
            }
            scramble.extend_from_slice(&part2);
        }

        if server_capabilities & capability_flags::CLIENT_PLUGIN_AUTH != 0 {
            auth_plugin_name = read_null_term_string(&mut cursor)?;
        }

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            scramble,
            server_capabilities,
            server_charset,
            status_flags,
            auth_plugin_name,
        })
    }
}

#[cfg(test)]
pub(crate) fn build_handshake_payload(scramble: &[u8; 20], plugin: &str) -> Vec<u8> {
    let caps: u32 = capability_flags::CLIENT_PROTOCOL_41
        | capability_flags::CLIENT_SECURE_CONNECTION
        | capability_flags::CLIENT_PLUGIN_AUTH;

    let mut payload = vec![HANDSHAKE_PROTOCOL_VERSION];
    payload.extend_from_slice(b"8.0.32\0");
    payload.extend_from_slice(&42u32.to_le_bytes());
    payload.extend_from_slice(&scramble[..8]);
    payload.push(0);
    payload.extend_from_slice(&(caps as u16).to_le_bytes());
    payload.push(0x21);
    payload.extend_from_slice(&2u16.to_le_bytes());
    payload.extend_from_slice(&((caps >> 16) as u16).to_le_bytes());
    payload.push(21);
    payload.extend_from_slice(&[0u8; 10]);
    payload.extend_from_slice(&scramble[8..]);
    payload.push(0);
    payload.extend_from_slice(plugin.as_bytes());
    payload.push(0);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_v10() {
        let mut scramble = [0u8; 20];
        for (i, byte) in scramble.iter_mut().enumerate() {
            *byte = (i + 1) as u8;
        }
        let payload = build_handshake_payload(&scramble, "mysql_native_password");

        let handshake = HandshakePacket::parse(&payload).unwrap();
        assert_eq!(handshake.protocol_version, 10);
        assert_eq!(handshake.server_version, "8.0.32");
        assert_eq!(handshake.connection_id, 42);
        assert_eq!(handshake.scramble, scramble.to_vec());
        assert_eq!(handshake.auth_plugin_name, "mysql_native_password");
    }

    #[test]
    fn test_rejects_other_protocol_versions() {
        let payload = vec![9u8, 0];
        assert!(HandshakePacket::parse(&payload).is_err());
    }
}
