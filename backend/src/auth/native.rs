use std::sync::Arc;

use tracing::{debug, error};

use common::err::proxy_error::ProxyError;
use common::err::PResult;
use common::users::ServiceUsers;

use crate::auth::{AuthResult, Authenticator};
use crate::bytes::{check_scramble, scramble_response};
use crate::declar::auth_plugin_names;
use crate::packet::auth_switch_packet::AuthSwitchPacket;
use crate::packet::error_packet::{ErrorPacket, ER_BAD_DB_ERROR};
use crate::packet::response_type::ResponseType;
use crate::packet::wrap_packet;
use crate::session::Session;
use crate::{EOF_PACKET_MAX_LEN, PACKET_HEADER_SIZE, SCRAMBLE_SIZE};

/// What the last server packet asked of us.
#[derive(Debug)]
enum ReplyState {
    None,
    Accepted,
    /// Server switched (or restarted) native authentication with a fresh
    /// challenge; a recomputed token must be sent with the stored sequence.
    Switch { scramble: Vec<u8>, seq: u8 },
}

/// `mysql_native_password`, the plugin the driver speaks itself.
#[derive(Debug)]
pub struct NativePasswordAuth {
    users: Arc<ServiceUsers>,
    reply: ReplyState,
}

impl NativePasswordAuth {
    pub fn new(users: Arc<ServiceUsers>) -> Self {
        NativePasswordAuth {
            users,
            reply: ReplyState::None,
        }
    }
}

impl Authenticator for NativePasswordAuth {
    fn name(&self) -> &'static str {
        auth_plugin_names::MY_SQL_NATIVE_PASSWORD
    }

    fn extract(&mut self, _session: &Session, packet: &[u8]) -> AuthResult {
        if packet.len() <= PACKET_HEADER_SIZE {
            return AuthResult::Failed;
        }
        let payload_len = packet.len() - PACKET_HEADER_SIZE;
        let seq = packet[3];
        let first = packet[PACKET_HEADER_SIZE];

        match first {
            ResponseType::OK => {
                self.reply = ReplyState::Accepted;
                AuthResult::Succeeded
            }
            ResponseType::ERROR => {
                match ErrorPacket::parse(&packet[PACKET_HEADER_SIZE + 1..]) {
                    Ok(err) if err.error_code == ER_BAD_DB_ERROR => AuthResult::BadDatabase,
                    _ => AuthResult::Failed,
                }
            }
            ResponseType::AUTH_PLUGIN_SWITCH if payload_len >= EOF_PACKET_MAX_LEN => {
                let switch = match AuthSwitchPacket::parse(&packet[PACKET_HEADER_SIZE + 1..]) {
                    Ok(switch) => switch,
                    Err(err) => {
                        error!("Malformed AuthSwitchRequest: {}", err);
                        return AuthResult::Failed;
                    }
                };
                if switch.auth_plugin_name != auth_plugin_names::MY_SQL_NATIVE_PASSWORD {
                    error!(
                        "Backend requested authentication plugin '{}' which is not supported",
                        switch.auth_plugin_name
                    );
                    return AuthResult::Failed;
                }
                debug!("Backend switched to a fresh native-password challenge");
                self.reply = ReplyState::Switch {
                    scramble: switch.scramble,
                    seq,
                };
                AuthResult::Incomplete
            }
            _ => AuthResult::Failed,
        }
    }

    fn authenticate(
        &mut self,
        session: &Session,
        scramble: &mut [u8; SCRAMBLE_SIZE],
        out: &mut Vec<u8>,
    ) -> AuthResult {
        match std::mem::replace(&mut self.reply, ReplyState::None) {
            ReplyState::Accepted => AuthResult::Succeeded,
            ReplyState::Switch {
                scramble: fresh,
                seq,
            } => {
                if fresh.len() >= SCRAMBLE_SIZE {
                    scramble.copy_from_slice(&fresh[..SCRAMBLE_SIZE]);
                }

                let token = match &session.client.password_sha1 {
                    Some(hash) => scramble_response(scramble, hash).to_vec(),
                    None => Vec::new(),
                };
                out.extend_from_slice(&wrap_packet(&token, seq.wrapping_add(1)).to_vec());
                AuthResult::Incomplete
            }
            ReplyState::None => AuthResult::Failed,
        }
    }

    fn reauthenticate(
        &mut self,
        user: &str,
        token: &[u8],
        client_scramble: &[u8; SCRAMBLE_SIZE],
    ) -> PResult<Option<[u8; SCRAMBLE_SIZE]>> {
        let Some(account) = self.users.find(user) else {
            return Err(ProxyError::Auth(format!("Unknown user '{}'", user)));
        };

        match account.password_hash {
            Some(stored) => match check_scramble(token, client_scramble, &stored) {
                Some(recovered) => Ok(Some(recovered)),
                None => Err(ProxyError::Auth(format!(
                    "Authentication token mismatch for user '{}'",
                    user
                ))),
            },
            None => {
                if token.is_empty() {
                    Ok(None)
                } else {
                    Err(ProxyError::Auth(format!(
                        "User '{}' has no password but a token was supplied",
                        user
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::users::UserEntry;

    use crate::bytes::sha1;
    use crate::session::ClientInfo;

    fn password_sha1(password: &str) -> [u8; SCRAMBLE_SIZE] {
        let mut out = [0u8; SCRAMBLE_SIZE];
        out.copy_from_slice(&sha1(password.as_bytes()));
        out
    }

    fn double_hash(password: &str) -> [u8; SCRAMBLE_SIZE] {
        let mut out = [0u8; SCRAMBLE_SIZE];
        out.copy_from_slice(&sha1(&password_sha1(password)));
        out
    }

    fn session_with_password(password: &str) -> Session {
        let mut client = ClientInfo::default();
        client.password_sha1 = Some(password_sha1(password));
        Session::new(client)
    }

    fn auth() -> NativePasswordAuth {
        NativePasswordAuth::new(Arc::new(ServiceUsers::new(vec![
            UserEntry::new("u", "%", Some(double_hash("p"))),
            UserEntry::new("nopw", "%", None),
        ])))
    }

    #[test]
    fn test_ok_reply_succeeds() {
        let mut auth = auth();
        let session = session_with_password("p");
        let ok = wrap_packet(&[0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00], 2).to_vec();

        assert_eq!(auth.extract(&session, &ok), AuthResult::Succeeded);

        let mut scramble = [0u8; SCRAMBLE_SIZE];
        let mut out = Vec::new();
        assert_eq!(
            auth.authenticate(&session, &mut scramble, &mut out),
            AuthResult::Succeeded
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_switch_refreshes_scramble_and_responds() {
        let mut auth = auth();
        let session = session_with_password("p");

        let fresh: Vec<u8> = (0xaa..0xaa + 20).collect();
        let mut payload = vec![ResponseType::AUTH_PLUGIN_SWITCH];
        payload.extend_from_slice(b"mysql_native_password\0");
        payload.extend_from_slice(&fresh);
        payload.push(0);
        let packet = wrap_packet(&payload, 2).to_vec();

        assert_eq!(auth.extract(&session, &packet), AuthResult::Incomplete);

        let mut scramble = [0u8; SCRAMBLE_SIZE];
        let mut out = Vec::new();
        assert_eq!(
            auth.authenticate(&session, &mut scramble, &mut out),
            AuthResult::Incomplete
        );
        assert_eq!(&scramble[..], &fresh[..]);
        // framed token: header + 20 bytes, sequence follows the request
        assert_eq!(out.len(), PACKET_HEADER_SIZE + SCRAMBLE_SIZE);
        assert_eq!(out[3], 3);
        assert_eq!(
            &out[PACKET_HEADER_SIZE..],
            &scramble_response(&scramble, &password_sha1("p"))
        );
    }

    #[test]
    fn test_error_replies_distinguish_bad_database() {
        let mut auth = auth();
        let session = session_with_password("p");

        let mut payload = vec![ResponseType::ERROR];
        payload.extend_from_slice(&ER_BAD_DB_ERROR.to_le_bytes());
        payload.push(b'#');
        payload.extend_from_slice(b"42000");
        payload.extend_from_slice(b"Unknown database 'shop'");
        let packet = wrap_packet(&payload, 2).to_vec();
        assert_eq!(auth.extract(&session, &packet), AuthResult::BadDatabase);

        let mut payload = vec![ResponseType::ERROR];
        payload.extend_from_slice(&1045u16.to_le_bytes());
        payload.extend_from_slice(b"Access denied");
        let packet = wrap_packet(&payload, 2).to_vec();
        assert_eq!(auth.extract(&session, &packet), AuthResult::Failed);
    }

    #[test]
    fn test_switch_to_foreign_plugin_fails() {
        let mut auth = auth();
        let session = session_with_password("p");

        let mut payload = vec![ResponseType::AUTH_PLUGIN_SWITCH];
        payload.extend_from_slice(b"caching_sha2_password\0");
        payload.extend_from_slice(&[0u8; 20]);
        let packet = wrap_packet(&payload, 2).to_vec();

        assert_eq!(auth.extract(&session, &packet), AuthResult::Failed);
    }

    #[test]
    fn test_reauthenticate_round_trip() {
        let mut auth = auth();
        let client_scramble = [3u8; SCRAMBLE_SIZE];
        let token = scramble_response(&client_scramble, &password_sha1("p"));

        let recovered = auth
            .reauthenticate("u", &token, &client_scramble)
            .expect("reauthentication error");
        assert_eq!(recovered, Some(password_sha1("p")));

        assert!(auth
            .reauthenticate("u", &[0u8; 20], &client_scramble)
            .is_err());
        assert!(auth.reauthenticate("ghost", &token, &client_scramble).is_err());

        // passwordless account: empty token passes, any token fails
        assert_eq!(
            auth.reauthenticate("nopw", &[], &client_scramble).unwrap(),
            None
        );
        assert!(auth.reauthenticate("nopw", &token, &client_scramble).is_err());
    }
}
