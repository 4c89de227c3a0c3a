use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use common::err::PResult;

/// Error code a server sends when too many failed connects blocked our host.
pub const ER_HOST_IS_BLOCKED: u16 = 1129;
pub const ER_DBACCESS_DENIED_ERROR: u16 = 1044;
pub const ER_ACCESS_DENIED_ERROR: u16 = 1045;
pub const ER_BAD_DB_ERROR: u16 = 1049;
pub const ER_ACCESS_DENIED_NO_PASSWORD_ERROR: u16 = 1698;

#[derive(Debug)]
pub struct ErrorPacket {
    pub error_code: u16,
    pub sql_state: String,
    pub message: String,
}

impl ErrorPacket {
    /// Parse the payload following the `0xFF` marker byte.
    pub fn parse(packet: &[u8]) -> PResult<Self> {
        let mut cursor = Cursor::new(packet);

        let error_code = cursor.read_u16::<LittleEndian>()?;

        let mut sql_state = String::new();
        if packet.len() > 2 && packet[2] == b'#' {
            cursor.read_u8()?;
            let mut state = [0u8; 5];
            cursor.read_exact(&mut state)?;
            sql_state = String::from_utf8_lossy(&state).to_string();
        }

        let mut message = String::new();
        cursor.read_to_string(&mut message)?;

        Ok(Self {
            error_code,
            sql_state,
            message,
        })
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(
            self.error_code,
            ER_ACCESS_DENIED_ERROR | ER_DBACCESS_DENIED_ERROR | ER_ACCESS_DENIED_NO_PASSWORD_ERROR
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_sql_state() {
        let mut payload = vec![];
        payload.extend_from_slice(&1129u16.to_le_bytes());
        payload.push(b'#');
        payload.extend_from_slice(b"HY000");
        payload.extend_from_slice(b"Host is blocked");

        let err = ErrorPacket::parse(&payload).unwrap();
        assert_eq!(err.error_code, ER_HOST_IS_BLOCKED);
        assert_eq!(err.sql_state, "HY000");
        assert_eq!(err.message, "Host is blocked");
        assert!(!err.is_access_denied());
    }

    #[test]
    fn test_parse_without_sql_state() {
        let mut payload = vec![];
        payload.extend_from_slice(&1045u16.to_le_bytes());
        payload.extend_from_slice(b"Access denied");

        let err = ErrorPacket::parse(&payload).unwrap();
        assert_eq!(err.error_code, ER_ACCESS_DENIED_ERROR);
        assert_eq!(err.sql_state, "");
        assert!(err.is_access_denied());
    }
}
