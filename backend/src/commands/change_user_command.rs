use std::io;
use std::io::{Cursor, Write};

use byteorder::WriteBytesExt;

use crate::bytes::{scramble_response, write_null_term_string};
use crate::declar::auth_plugin_names;
use crate::declar::command::MySqlCommand;
use crate::{NULL_TERMINATOR, SCRAMBLE_SIZE};

/// COM_CHANGE_USER built from the session's current identity. Used both for
/// an explicit client re-authentication and to reset a connection taken out
/// of the persistent pool.
pub struct ChangeUserCommand {
    pub username: String,
    pub database: String,
    pub password_sha1: Option<[u8; SCRAMBLE_SIZE]>,
    pub charset: u16,
    /// Challenge of the backend this command is written to.
    pub scramble: [u8; SCRAMBLE_SIZE],
}

impl ChangeUserCommand {
    pub fn new(
        username: &str,
        database: &str,
        password_sha1: Option<[u8; SCRAMBLE_SIZE]>,
        charset: u16,
        scramble: [u8; SCRAMBLE_SIZE],
    ) -> Self {
        Self {
            username: username.to_string(),
            database: database.to_string(),
            password_sha1,
            charset,
            scramble,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, io::Error> {
        let mut vec = Vec::new();
        let mut cursor = Cursor::new(&mut vec);

        cursor.write_u8(u8::from(MySqlCommand::ComChangeUser))?;
        write_null_term_string(&mut cursor, &self.username)?;

        match &self.password_sha1 {
            Some(hash) => {
                let token = scramble_response(&self.scramble, hash);
                cursor.write_u8(token.len() as u8)?;
                cursor.write_all(&token)?;
            }
            None => {
                // a passwordless account sends a zero-length token
                cursor.write_u8(0)?;
            }
        }

        if !self.database.is_empty() {
            cursor.write_all(self.database.as_bytes())?;
        }
        cursor.write_u8(NULL_TERMINATOR)?;

        cursor.write_u8((self.charset & 0xff) as u8)?;
        cursor.write_u8((self.charset >> 8) as u8)?;

        write_null_term_string(&mut cursor, auth_plugin_names::MY_SQL_NATIVE_PASSWORD)?;
        Ok(vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::sha1;
    use crate::packet::wrap_packet;

    fn password_sha1(password: &str) -> [u8; SCRAMBLE_SIZE] {
        let mut out = [0u8; SCRAMBLE_SIZE];
        out.copy_from_slice(&sha1(password.as_bytes()));
        out
    }

    #[test]
    fn test_field_exact_layout_with_password() {
        let mut scramble = [0u8; SCRAMBLE_SIZE];
        for (i, byte) in scramble.iter_mut().enumerate() {
            *byte = (i + 1) as u8;
        }
        let hash = password_sha1("p");

        let command = ChangeUserCommand::new("u", "d", Some(hash), 0x0021, scramble);
        let payload = command.serialize().unwrap();
        let packet = wrap_packet(&payload, 0).to_vec();

        // header: 3-byte little-endian length, seq 0
        let expected_len = 1 + 2 + 1 + 20 + 2 + 2 + 22;
        assert_eq!(
            u32::from_le_bytes([packet[0], packet[1], packet[2], 0]) as usize,
            expected_len
        );
        assert_eq!(payload.len(), expected_len);
        assert_eq!(packet[3], 0);

        let mut pos = 4;
        assert_eq!(packet[pos], 0x11);
        pos += 1;
        assert_eq!(&packet[pos..pos + 2], b"u\0");
        pos += 2;
        assert_eq!(packet[pos], 0x14);
        pos += 1;
        assert_eq!(&packet[pos..pos + 20], &scramble_response(&scramble, &hash));
        pos += 20;
        assert_eq!(&packet[pos..pos + 2], b"d\0");
        pos += 2;
        assert_eq!(&packet[pos..pos + 2], &[0x21, 0x00]);
        pos += 2;
        assert_eq!(&packet[pos..], b"mysql_native_password\0");
    }

    #[test]
    fn test_layout_without_password_and_database() {
        let scramble = [9u8; SCRAMBLE_SIZE];
        let command = ChangeUserCommand::new("u", "", None, 0x0008, scramble);
        let payload = command.serialize().unwrap();

        let mut pos = 0;
        assert_eq!(payload[pos], 0x11);
        pos += 1;
        assert_eq!(&payload[pos..pos + 2], b"u\0");
        pos += 2;
        // a single zero stands in for the whole auth-data block
        assert_eq!(payload[pos], 0x00);
        pos += 1;
        // empty database is just its terminator
        assert_eq!(payload[pos], 0x00);
        pos += 1;
        assert_eq!(&payload[pos..pos + 2], &[0x08, 0x00]);
        pos += 2;
        assert_eq!(&payload[pos..], b"mysql_native_password\0");
    }
}
