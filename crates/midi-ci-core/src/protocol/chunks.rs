//! Property Exchange chunking.
//!
//! A Property Exchange body larger than the negotiated chunk size travels as
//! several packets sharing one request id.  The first packet carries the real
//! header; later packets carry an empty header.  Indices are 1-based and the
//! final packet has `chunk_index == num_chunks`.
//!
//! [`split_into_chunks`] builds such a sequence; [`ChunkReassembler`] puts it
//! back together on the receiving side.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::muid::Muid;
use crate::protocol::messages::{Common, PropertyChunk};
use crate::protocol::packing::MAX_14BIT;

/// Errors raised while splitting or reassembling chunks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    /// A chunk arrived that is not the next one expected for its request.
    #[error("chunk out of sequence: expected {expected}, got {got}")]
    OutOfSequence { expected: u16, got: u16 },

    /// The chunk index / count pair is impossible (zero, or index > count).
    #[error("invalid chunk index {chunk_index} of {num_chunks}")]
    InvalidIndex { chunk_index: u16, num_chunks: u16 },

    /// The body would need more chunks than a 14-bit count can express.
    #[error("body needs {needed} chunks, more than a 14-bit count allows")]
    TooManyChunks { needed: usize },
}

/// Splits `body` into packets of at most `max_chunk_size` body bytes.
///
/// An empty body still yields exactly one packet (`1 of 1`).  A
/// `max_chunk_size` of zero is treated as one.
///
/// # Errors
///
/// [`ChunkError::TooManyChunks`] if more than 16383 packets would be needed.
pub fn split_into_chunks(
    common: Common,
    request_id: u8,
    header: &[u8],
    body: &[u8],
    max_chunk_size: usize,
) -> Result<Vec<PropertyChunk>, ChunkError> {
    let size = max_chunk_size.max(1);
    let pieces: Vec<&[u8]> = if body.is_empty() {
        vec![&body[..0]]
    } else {
        body.chunks(size).collect()
    };
    if pieces.len() > MAX_14BIT as usize {
        return Err(ChunkError::TooManyChunks {
            needed: pieces.len(),
        });
    }
    let num_chunks = pieces.len() as u16;
    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| PropertyChunk {
            common,
            request_id,
            header: if i == 0 { header.to_vec() } else { Vec::new() },
            num_chunks,
            chunk_index: i as u16 + 1,
            body: piece.to_vec(),
        })
        .collect())
}

/// Result of feeding one chunk to the reassembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkProgress {
    /// More chunks are needed.
    Pending,
    /// The transfer is complete.
    Complete { header: Vec<u8>, body: Vec<u8> },
}

#[derive(Debug)]
struct PartialTransfer {
    header: Vec<u8>,
    body: Vec<u8>,
    next_index: u16,
    started_at: Instant,
}

/// Accumulates multi-packet Property Exchange payloads keyed by
/// (counterpart MUID, request id).
///
/// Single-packet transfers never create an entry.  Abandoned transfers are
/// dropped by [`ChunkReassembler::purge_older_than`].
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    pending: HashMap<(Muid, u8), PartialTransfer>,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one inbound chunk from `source`.
    ///
    /// # Errors
    ///
    /// [`ChunkError::InvalidIndex`] for an impossible index/count pair and
    /// [`ChunkError::OutOfSequence`] when a chunk is skipped, repeated or
    /// starts mid-stream.  Either way any partial entry for the request is
    /// discarded.
    pub fn accept(
        &mut self,
        source: Muid,
        chunk: &PropertyChunk,
        now: Instant,
    ) -> Result<ChunkProgress, ChunkError> {
        let key = (source, chunk.request_id);
        let (index, count) = (chunk.chunk_index, chunk.num_chunks);

        if count == 0 || index == 0 || index > count {
            self.pending.remove(&key);
            return Err(ChunkError::InvalidIndex {
                chunk_index: index,
                num_chunks: count,
            });
        }

        if count == 1 {
            return Ok(ChunkProgress::Complete {
                header: chunk.header.clone(),
                body: chunk.body.clone(),
            });
        }

        // A first chunk always starts a fresh transfer, even if a stale one
        // with the same request id is still open.
        if index == 1 {
            if self.pending.remove(&key).is_some() {
                warn!(%source, request_id = chunk.request_id, "restarting chunked transfer");
            }
            self.pending.insert(
                key,
                PartialTransfer {
                    header: chunk.header.clone(),
                    body: chunk.body.clone(),
                    next_index: 2,
                    started_at: now,
                },
            );
            return Ok(ChunkProgress::Pending);
        }

        let Some(mut entry) = self.pending.remove(&key) else {
            return Err(ChunkError::OutOfSequence {
                expected: 1,
                got: index,
            });
        };
        if entry.next_index != index {
            return Err(ChunkError::OutOfSequence {
                expected: entry.next_index,
                got: index,
            });
        }
        entry.body.extend_from_slice(&chunk.body);

        if index == count {
            debug!(
                %source,
                request_id = chunk.request_id,
                chunks = count,
                bytes = entry.body.len(),
                "chunked transfer complete"
            );
            return Ok(ChunkProgress::Complete {
                header: entry.header,
                body: entry.body,
            });
        }
        entry.next_index += 1;
        self.pending.insert(key, entry);
        Ok(ChunkProgress::Pending)
    }

    /// Drops every partial transfer started more than `max_age` before `now`
    /// and returns their keys.
    pub fn purge_older_than(&mut self, now: Instant, max_age: Duration) -> Vec<(Muid, u8)> {
        let expired: Vec<(Muid, u8)> = self
            .pending
            .iter()
            .filter(|(_, t)| now.saturating_duration_since(t.started_at) > max_age)
            .map(|(k, _)| *k)
            .collect();
        for key in &expired {
            self.pending.remove(key);
        }
        expired
    }

    /// Drops every partial transfer from `source`.
    pub fn remove_source(&mut self, source: Muid) {
        self.pending.retain(|(muid, _), _| *muid != source);
    }

    /// Number of transfers currently in progress.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
