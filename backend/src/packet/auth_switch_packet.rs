use std::io::Cursor;

use common::err::PResult;

use crate::bytes::read_null_term_string;

/// AuthSwitchRequest: the server asks for a different authentication plugin
/// and provides a fresh challenge for it.
#[derive(Debug)]
pub struct AuthSwitchPacket {
    pub auth_plugin_name: String,
    pub scramble: Vec<u8>,
}

impl AuthSwitchPacket {
    /// Parse the payload following the `0xFE` marker byte.
    pub fn parse(packet: &[u8]) -> PResult<Self> {
        let mut cursor = Cursor::new(packet);

        let auth_plugin_name = read_null_term_string(&mut cursor)?;

        let mut scramble = packet[cursor.position() as usize..].to_vec();
        if scramble.last() == Some(&0) {
            scramble.pop();
        }

        Ok(Self {
            auth_plugin_name,
            scramble,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let mut payload = b"mysql_native_password\0".to_vec();
        let scramble: Vec<u8> = (0xaa..0xaa + 20).collect();
        payload.extend_from_slice(&scramble);
        payload.push(0);

        let packet = AuthSwitchPacket::parse(&payload).unwrap();
        assert_eq!(packet.auth_plugin_name, "mysql_native_password");
        assert_eq!(packet.scramble, scramble);
    }
}
