use crate::buffer::PacketBuf;
use crate::packet::response_type::ResponseType;
use crate::{EOF_PACKET_MAX_LEN, PACKET_HEADER_SIZE};

pub mod auth_switch_packet;
pub mod error_packet;
pub mod handshake_packet;
pub mod response_type;

/// What the first payload byte of a server packet announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Ok,
    Err,
    Eof,
    AuthSwitch,
    LocalInfile,
    /// Column-count header of a resultset.
    ResultSet,
}

/// Classify a server packet from its first payload byte. `0xFE` means EOF
/// only when the payload is short; longer packets are AuthSwitchRequests.
pub fn classify_response(first_byte: u8, payload_len: usize) -> ResponseKind {
    match first_byte {
        ResponseType::OK => ResponseKind::Ok,
        ResponseType::ERROR => ResponseKind::Err,
        ResponseType::LOCAL_INFILE => ResponseKind::LocalInfile,
        ResponseType::END_OF_FILE if payload_len < EOF_PACKET_MAX_LEN => ResponseKind::Eof,
        ResponseType::END_OF_FILE => ResponseKind::AuthSwitch,
        _ => ResponseKind::ResultSet,
    }
}

/// Payload length and sequence id of the packet at the head of `buf`, if at
/// least a whole header is buffered.
pub fn peek_packet_header(buf: &PacketBuf) -> Option<(usize, u8)> {
    let mut header = [0u8; PACKET_HEADER_SIZE];
    if buf.copy_data(0, PACKET_HEADER_SIZE, &mut header) < PACKET_HEADER_SIZE {
        return None;
    }
    let payload_len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    Some((payload_len, header[3]))
}

/// Detach the next whole packet (header included). Returns `None` when the
/// head packet is still incomplete; the buffer is left untouched in that case.
pub fn next_complete_packet(buf: &mut PacketBuf) -> Option<PacketBuf> {
    let (payload_len, _) = peek_packet_header(buf)?;
    let total = PACKET_HEADER_SIZE + payload_len;
    if buf.len() < total {
        return None;
    }
    Some(buf.split_to(total))
}

/// Detach every whole packet, leaving any trailing partial packet as residue.
/// Returns `None` when not even one packet is complete.
pub fn complete_packets(buf: &mut PacketBuf) -> Option<PacketBuf> {
    let mut boundary = 0usize;
    let mut header = [0u8; PACKET_HEADER_SIZE];

    loop {
        if buf.copy_data(boundary, PACKET_HEADER_SIZE, &mut header) < PACKET_HEADER_SIZE {
            break;
        }
        let payload_len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
        let total = PACKET_HEADER_SIZE + payload_len;
        if buf.len() < boundary + total {
            break;
        }
        boundary += total;
    }

    if boundary == 0 {
        None
    } else {
        Some(buf.split_to(boundary))
    }
}

/// First payload byte of a framed packet.
pub fn packet_first_byte(packet: &PacketBuf) -> Option<u8> {
    packet.peek_u8(PACKET_HEADER_SIZE)
}

/// Whether a complete response starts a resultset rather than a plain
/// OK/ERR/LOCAL_INFILE reply.
pub fn is_result_set(buf: &PacketBuf) -> bool {
    let Some((payload_len, _)) = peek_packet_header(buf) else {
        return false;
    };
    let Some(first) = packet_first_byte(buf) else {
        return false;
    };
    matches!(
        classify_response(first, payload_len),
        ResponseKind::ResultSet
    )
}

/// Count the signal packets (EOF, its deprecated-OK replacement, or ERR) in a
/// buffered resultset. The resultset is complete once two are seen. The head
/// packet is the column count and never counts.
pub fn count_signal_packets(buf: &PacketBuf) -> u32 {
    let mut header = [0u8; PACKET_HEADER_SIZE];
    let mut offset = 0usize;
    let mut count = 0u32;
    let mut first = true;

    loop {
        if buf.copy_data(offset, PACKET_HEADER_SIZE, &mut header) < PACKET_HEADER_SIZE {
            break;
        }
        let payload_len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
        let total = PACKET_HEADER_SIZE + payload_len;
        if buf.len() < offset + total {
            break;
        }

        if !first {
            if let Some(byte) = buf.peek_u8(offset + PACKET_HEADER_SIZE) {
                if byte == ResponseType::END_OF_FILE || byte == ResponseType::ERROR {
                    count += 1;
                }
            }
        }
        first = false;
        offset += total;

        if count == 2 {
            break;
        }
    }

    count
}

/// Frame a payload into a wire packet with the given sequence id.
pub fn wrap_packet(payload: &[u8], seq: u8) -> PacketBuf {
    let mut out = Vec::with_capacity(PACKET_HEADER_SIZE + payload.len());
    let len = payload.len() as u32;
    out.extend_from_slice(&len.to_le_bytes()[0..3]);
    out.push(seq);
    out.extend_from_slice(payload);
    PacketBuf::from_vec(out)
}

/// Synthesize a MySQL ERR packet the client side can forward verbatim.
pub fn create_error_packet(seq: u8, error_code: u16, sql_state: &str, message: &str) -> PacketBuf {
    let mut payload = Vec::with_capacity(9 + message.len());
    payload.push(ResponseType::ERROR);
    payload.extend_from_slice(&error_code.to_le_bytes());
    payload.push(b'#');
    payload.extend_from_slice(sql_state.as_bytes());
    payload.extend_from_slice(message.as_bytes());
    wrap_packet(&payload, seq)
}

pub fn create_custom_error(seq: u8, error_code: u16, message: &str) -> PacketBuf {
    create_error_packet(seq, error_code, "HY000", message)
}

pub fn create_com_quit() -> PacketBuf {
    wrap_packet(&[u8::from(crate::declar::command::MySqlCommand::ComQuit)], 0)
}
