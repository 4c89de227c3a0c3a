use std::io;
use std::io::{Cursor, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::bytes::{scramble_response, write_null_term_string};
use crate::declar::capability_flags;
use crate::SCRAMBLE_SIZE;

/// HandshakeResponse41 sent on behalf of the client session once the server
/// handshake has been decoded.
pub struct HandshakeResponseCommand {
    pub client_capabilities: u32,
    pub max_packet_size: u32,
    pub client_collation: u8,
    pub username: String,
    pub password_sha1: Option<[u8; SCRAMBLE_SIZE]>,
    pub database: Option<String>,
    pub scramble: Vec<u8>,
    pub auth_plugin_name: String,
}

impl HandshakeResponseCommand {
    pub fn new(
        session_capabilities: u32,
        client_collation: u8,
        username: &str,
        password_sha1: Option<[u8; SCRAMBLE_SIZE]>,
        database: Option<String>,
        scramble: &[u8],
        auth_plugin_name: &str,
    ) -> Self {
        let mut client_capabilities = session_capabilities
            | capability_flags::CLIENT_LONG_PASSWORD
            | capability_flags::CLIENT_PROTOCOL_41
            | capability_flags::CLIENT_SECURE_CONNECTION
            | capability_flags::CLIENT_PLUGIN_AUTH;

        // the proxy never speaks the compressed protocol to a backend
        client_capabilities &= !capability_flags::CLIENT_COMPRESS;

        if database.is_some() {
            client_capabilities |= capability_flags::CLIENT_CONNECT_WITH_DB;
        }

        Self {
            client_capabilities,
            max_packet_size: 0,
            client_collation,
            username: username.to_string(),
            password_sha1,
            database,
            scramble: scramble.to_vec(),
            auth_plugin_name: auth_plugin_name.to_string(),
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, io::Error> {
        let mut vec = Vec::new();
        let mut cursor = Cursor::new(&mut vec);

        cursor.write_u32::<LittleEndian>(self.client_capabilities)?;
        cursor.write_u32::<LittleEndian>(self.max_packet_size)?;
        cursor.write_u8(self.client_collation)?;

        // Fill reserved bytes
        for _number in 0..23 {
            cursor.write_u8(0)?;
        }

        write_null_term_string(&mut cursor, &self.username)?;

        match &self.password_sha1 {
            Some(hash) => {
                let token = scramble_response(&self.scramble, hash);
                cursor.write_u8(token.len() as u8)?;
                cursor.write_all(&token)?;
            }
            None => {
                cursor.write_u8(0)?;
            }
        }

        if let Some(database) = &self.database {
            write_null_term_string(&mut cursor, database)?;
        }

        write_null_term_string(&mut cursor, &self.auth_plugin_name)?;
        Ok(vec)
    }
}
