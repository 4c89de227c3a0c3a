use std::collections::VecDeque;

use tracing::debug;

use crate::buffer::{PacketBuf, TYPE_RESPONSE_END, TYPE_SESCMD_RESPONSE};
use crate::declar::command::MySqlCommand;
use crate::packet::response_type::ResponseType;
use crate::packet::{
    classify_response, next_complete_packet, packet_first_byte, peek_packet_header, ResponseKind,
};
use crate::PACKET_HEADER_SIZE;

/// How many reply packets a session command produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    /// A fixed number of packets, known up front.
    Packets(u32),
    /// Packets until an EOF marker.
    UntilEof,
    /// A resultset: complete after two signal packets (EOF, its
    /// deprecated-OK stand-in, or ERR).
    SignalPair,
    /// The command never gets a reply.
    NoReply,
}

/// Decide the reply shape of `cmd` from its first reply packet. The first
/// packet must be complete in `first_packet`.
///
/// An ERR first byte always means a single-packet reply, whatever the
/// command. `COM_STMT_PREPARE` computes its packet count from the prepare
/// header: the header itself, one definition per parameter and column, and
/// an EOF after each non-empty definition block.
pub fn expected_reply_shape(cmd: MySqlCommand, first_packet: &PacketBuf) -> ReplyShape {
    if cmd.expects_no_reply() {
        return ReplyShape::NoReply;
    }

    let Some((payload_len, _)) = peek_packet_header(first_packet) else {
        return ReplyShape::Packets(1);
    };
    let Some(first) = packet_first_byte(first_packet) else {
        return ReplyShape::Packets(1);
    };

    if first == ResponseType::ERROR {
        return ReplyShape::Packets(1);
    }

    match cmd {
        MySqlCommand::ComFieldList => ReplyShape::UntilEof,

        MySqlCommand::ComStmtPrepare => {
            let mut counts = [0u8; 4];
            // num_columns and num_params, two little-endian u16 after the
            // status byte and the 4-byte statement id
            if first_packet.copy_data(PACKET_HEADER_SIZE + 5, 4, &mut counts) < 4 {
                return ReplyShape::Packets(1);
            }
            let columns = u16::from_le_bytes([counts[0], counts[1]]) as u32;
            let params = u16::from_le_bytes([counts[2], counts[3]]) as u32;

            let mut packets = 1 + params + columns;
            if params > 0 {
                packets += 1;
            }
            if columns > 0 {
                packets += 1;
            }
            ReplyShape::Packets(packets)
        }

        MySqlCommand::ComQuery | MySqlCommand::ComStmtExecute => {
            match classify_response(first, payload_len) {
                ResponseKind::Ok | ResponseKind::Err | ResponseKind::LocalInfile => {
                    ReplyShape::Packets(1)
                }
                _ => ReplyShape::SignalPair,
            }
        }

        _ => ReplyShape::Packets(1),
    }
}

/// Progress through the current reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Progress {
    #[default]
    Counted,
    UntilEof,
    SignalPair {
        seen: u8,
    },
}

/// Position inside an in-flight session-command reply. All-zero means no
/// reply is being consumed. `initial_*` snapshot the state at the start of
/// the reply so an interrupted parse can be rolled back deterministically.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseCursor {
    pub packets_left: u32,
    pub bytes_left: usize,
    pub initial_packets: u32,
    pub initial_bytes: usize,
    progress: Progress,
}

impl ResponseCursor {
    pub fn idle(&self) -> bool {
        self.packets_left == 0
    }

    fn reset(&mut self) {
        *self = ResponseCursor::default();
    }
}

/// Outcome of one tracking pass over freshly read bytes.
#[derive(Debug)]
pub enum TrackOutcome {
    /// One complete response, tagged and ready for the router.
    Complete(PacketBuf),
    /// The reply is still short. The returned buffer holds every byte that
    /// was consumed plus the unread rest, in wire order; it must go back to
    /// the read queue as-is. The cursor has been rolled back to its state at
    /// entry.
    Incomplete(PacketBuf),
}

/// Per-backend bookkeeping of in-flight session commands and their replies.
/// Commands are appended in write order; replies are consumed strictly FIFO.
#[derive(Debug, Default)]
pub struct ResponseTracker {
    commands: VecDeque<MySqlCommand>,
    archived: Option<MySqlCommand>,
    cursor: ResponseCursor,
}

impl ResponseTracker {
    pub fn add_command(&mut self, cmd: MySqlCommand) {
        if cmd.expects_no_reply() {
            return;
        }
        debug!("Recording session command {:?}", cmd);
        self.commands.push_back(cmd);
    }

    /// The command whose reply is expected next.
    pub fn current_command(&self) -> Option<MySqlCommand> {
        self.commands.front().copied()
    }

    /// The most recently completed command.
    pub fn archived_command(&self) -> Option<MySqlCommand> {
        self.archived
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    pub fn cursor(&self) -> &ResponseCursor {
        &self.cursor
    }

    fn archive(&mut self) {
        self.archived = self.commands.pop_front();
    }

    /// Consume reply packets for the head session command. Stops after one
    /// complete response; the caller loops while bytes remain.
    pub fn process_response_data(&mut self, readbuf: &mut PacketBuf) -> TrackOutcome {
        let snapshot = self.cursor;
        let mut outbuf = PacketBuf::new();

        loop {
            if self.cursor.idle() {
                // conclude the packet count from the command and the first
                // reply packet, which must be complete
                let whole_first = peek_packet_header(readbuf)
                    .map(|(len, _)| readbuf.len() >= PACKET_HEADER_SIZE + len)
                    .unwrap_or(false);
                let Some(cmd) = self.current_command() else {
                    return self.incomplete(snapshot, outbuf, readbuf);
                };
                if !whole_first {
                    return self.incomplete(snapshot, outbuf, readbuf);
                }

                let (packets, progress) = match expected_reply_shape(cmd, readbuf) {
                    ReplyShape::Packets(n) => (n, Progress::Counted),
                    ReplyShape::UntilEof => (1, Progress::UntilEof),
                    ReplyShape::SignalPair => (1, Progress::SignalPair { seen: 0 }),
                    ReplyShape::NoReply => {
                        // never queued; treat as a single packet if it happens
                        (1, Progress::Counted)
                    }
                };
                let (payload_len, _) = peek_packet_header(readbuf).unwrap_or((0, 0));

                self.cursor.packets_left = packets;
                self.cursor.bytes_left = PACKET_HEADER_SIZE + payload_len;
                self.cursor.initial_packets = packets;
                self.cursor.initial_bytes = self.cursor.bytes_left;
                self.cursor.progress = progress;
            }

            let Some(packet) = next_complete_packet(readbuf) else {
                return self.incomplete(snapshot, outbuf, readbuf);
            };

            let payload_len = packet.len() - PACKET_HEADER_SIZE;
            let first = packet_first_byte(&packet).unwrap_or(0);

            match &mut self.cursor.progress {
                Progress::Counted => {
                    self.cursor.packets_left -= 1;
                }
                Progress::UntilEof => {
                    if classify_response(first, payload_len) == ResponseKind::Eof {
                        self.cursor.packets_left = 0;
                    }
                }
                Progress::SignalPair { seen } => {
                    if first == ResponseType::END_OF_FILE || first == ResponseType::ERROR {
                        *seen += 1;
                        if *seen >= 2 {
                            self.cursor.packets_left = 0;
                        }
                    }
                }
            }

            let mut packet = packet;
            packet.set_type(TYPE_SESCMD_RESPONSE);
            outbuf.append(packet);

            if self.cursor.packets_left == 0 {
                outbuf.tag_last(TYPE_RESPONSE_END);
                self.archive();
                self.cursor.reset();
                return TrackOutcome::Complete(outbuf);
            }

            self.cursor.bytes_left = match peek_packet_header(readbuf) {
                Some((len, _)) => PACKET_HEADER_SIZE + len,
                None => 0,
            };
        }
    }

    /// Roll back to the entry state and hand every byte back in order.
    fn incomplete(
        &mut self,
        snapshot: ResponseCursor,
        mut outbuf: PacketBuf,
        readbuf: &mut PacketBuf,
    ) -> TrackOutcome {
        self.cursor = snapshot;
        outbuf.append(std::mem::take(readbuf));
        TrackOutcome::Incomplete(outbuf)
    }
}
