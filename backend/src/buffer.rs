use std::collections::VecDeque;

use bytes::BytesMut;

/// Buffer type tags. A buffer may carry several at once; routers and the
/// response tracker decide behaviour from the combination.
pub const TYPE_MYSQL: u32 = 0x01;
/// Buffer holds exactly one statement.
pub const TYPE_SINGLE_STMT: u32 = 0x02;
/// Session-state command that must be replayed on every backend.
pub const TYPE_SESCMD: u32 = 0x04;
/// Reply packets belonging to a session command.
pub const TYPE_SESCMD_RESPONSE: u32 = 0x08;
/// Final chunk of a complete response.
pub const TYPE_RESPONSE_END: u32 = 0x10;
pub const TYPE_IGNORABLE: u32 = 0x20;

#[derive(Debug, Clone)]
struct Chunk {
    data: BytesMut,
    buf_type: u32,
}

/// Chain of byte chunks with per-chunk type tags, the unit of data exchange
/// between the driver, the router and the event adapter. Reads append chunks
/// of whatever size the socket produced; the framer splits them along packet
/// boundaries without copying.
#[derive(Debug, Clone, Default)]
pub struct PacketBuf {
    chunks: VecDeque<Chunk>,
}

impl PacketBuf {
    pub fn new() -> Self {
        PacketBuf {
            chunks: VecDeque::new(),
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        let mut buf = PacketBuf::new();
        buf.append_slice(&data);
        buf
    }

    pub fn from_slice(data: &[u8]) -> Self {
        let mut buf = PacketBuf::new();
        buf.append_slice(data);
        buf
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(|c| c.data.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(|c| c.data.is_empty())
    }

    /// Move all chunks of `other` to the end of this buffer.
    pub fn append(&mut self, mut other: PacketBuf) {
        self.chunks.append(&mut other.chunks);
    }

    pub fn append_slice(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.chunks.push_back(Chunk {
            data: BytesMut::from(data),
            buf_type: 0,
        });
    }

    /// Detach the first `n` bytes into a new buffer, preserving chunk tags.
    /// `n` is clamped to the available length.
    pub fn split_to(&mut self, n: usize) -> PacketBuf {
        let mut remaining = n;
        let mut out = PacketBuf::new();

        while remaining > 0 {
            let Some(mut chunk) = self.chunks.pop_front() else {
                break;
            };
            if chunk.data.len() <= remaining {
                remaining -= chunk.data.len();
                out.chunks.push_back(chunk);
            } else {
                let head = chunk.data.split_to(remaining);
                out.chunks.push_back(Chunk {
                    data: head,
                    buf_type: chunk.buf_type,
                });
                remaining = 0;
                self.chunks.push_front(chunk);
            }
        }

        out
    }

    /// Discard the first `n` bytes.
    pub fn consume(&mut self, n: usize) {
        let _ = self.split_to(n);
    }

    /// Copy up to `len` bytes starting at `offset` into `dst`. Returns the
    /// number of bytes copied, which is less than `len` when the buffer is
    /// shorter than `offset + len`.
    pub fn copy_data(&self, offset: usize, len: usize, dst: &mut [u8]) -> usize {
        let mut skipped = 0usize;
        let mut copied = 0usize;

        for chunk in &self.chunks {
            let data = &chunk.data;
            if skipped + data.len() <= offset {
                skipped += data.len();
                continue;
            }
            let start = offset.saturating_sub(skipped);
            skipped += data.len();

            for &byte in &data[start..] {
                if copied == len {
                    return copied;
                }
                dst[copied] = byte;
                copied += 1;
            }
            if copied == len {
                break;
            }
        }

        copied
    }

    pub fn peek_u8(&self, offset: usize) -> Option<u8> {
        let mut byte = [0u8; 1];
        if self.copy_data(offset, 1, &mut byte) == 1 {
            Some(byte[0])
        } else {
            None
        }
    }

    /// Collapse the chain into a single chunk. The merged chunk carries the
    /// union of all chunk tags.
    pub fn make_contiguous(&mut self) {
        if self.chunks.len() <= 1 {
            return;
        }

        let mut merged = BytesMut::with_capacity(self.len());
        let mut buf_type = 0;
        for chunk in self.chunks.drain(..) {
            merged.extend_from_slice(&chunk.data);
            buf_type |= chunk.buf_type;
        }
        self.chunks.push_back(Chunk {
            data: merged,
            buf_type,
        });
    }

    /// Flat view of the whole buffer. Collapses the chain first.
    pub fn contiguous(&mut self) -> &[u8] {
        self.make_contiguous();
        match self.chunks.front() {
            Some(chunk) => &chunk.data,
            None => &[],
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for chunk in &self.chunks {
            out.extend_from_slice(&chunk.data);
        }
        out
    }

    /// Add tags to every chunk in the chain.
    pub fn set_type(&mut self, flags: u32) {
        for chunk in &mut self.chunks {
            chunk.buf_type |= flags;
        }
    }

    /// Add tags only to the last chunk.
    pub fn tag_last(&mut self, flags: u32) {
        if let Some(chunk) = self.chunks.back_mut() {
            chunk.buf_type |= flags;
        }
    }

    pub fn first_type(&self) -> u32 {
        self.chunks.front().map(|c| c.buf_type).unwrap_or(0)
    }

    pub fn last_type(&self) -> u32 {
        self.chunks.back().map(|c| c.buf_type).unwrap_or(0)
    }

    pub fn has_type(&self, flags: u32) -> bool {
        self.first_type() & flags == flags
    }

    pub fn chunk_slices(&self) -> impl Iterator<Item = &[u8]> {
        self.chunks.iter().map(|c| &c.data[..])
    }

    /// First non-empty chunk, the unit a nonblocking write pushes at a time.
    pub fn first_chunk(&self) -> Option<&[u8]> {
        self.chunks
            .iter()
            .find(|c| !c.data.is_empty())
            .map(|c| &c.data[..])
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }
}
