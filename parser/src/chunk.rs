use nom::bytes::complete::take;
use nom::number::complete::{le_u8, le_u32};
use serde::Serialize;
use std::io::Read;
use tracing::{debug, trace, warn};
use variantly::Variantly;

use crate::config::DecompressionLimits;
use crate::error::{Error, ErrorKind, IResult};

pub const CHUNK_HEADER_LEN: usize = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Variantly)]
pub enum ChunkKind {
    /// Full state snapshot.
    Keyframe,
    /// Incremental events since the previous chunk.
    Chunk,
    Other(u8),
}

impl From<u8> for ChunkKind {
    fn from(v: u8) -> Self {
        match v {
            1 => ChunkKind::Keyframe,
            2 => ChunkKind::Chunk,
            other => ChunkKind::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkHeader {
    pub id: u32,
    pub kind: ChunkKind,
    pub secondary_id: u32,
    pub declared_uncompressed_len: u32,
    pub declared_compressed_len: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: u32,
    pub kind: ChunkKind,
    pub secondary_id: u32,
    pub declared_uncompressed_len: u32,
    pub declared_compressed_len: u32,
    /// Decompressed body. `None` when the record had no compressed body.
    #[serde(skip)]
    pub payload: Option<Vec<u8>>,
    /// The payload is the raw compressed bytes because decompression failed.
    pub passthrough: bool,
}

impl Chunk {
    fn from_header(header: ChunkHeader, payload: Option<Vec<u8>>, passthrough: bool) -> Self {
        Chunk {
            id: header.id,
            kind: header.kind,
            secondary_id: header.secondary_id,
            declared_uncompressed_len: header.declared_uncompressed_len,
            declared_compressed_len: header.declared_compressed_len,
            payload,
            passthrough,
        }
    }

    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map(Vec::len).unwrap_or(0)
    }
}

fn parse_chunk_header(i: &[u8]) -> IResult<&[u8], ChunkHeader> {
    let (i, id) = le_u32(i)?;
    let (i, kind) = le_u8(i)?;
    let (i, secondary_id) = le_u32(i)?;
    let (i, declared_uncompressed_len) = le_u32(i)?;
    let (i, declared_compressed_len) = le_u32(i)?;
    Ok((
        i,
        ChunkHeader {
            id,
            kind: kind.into(),
            secondary_id,
            declared_uncompressed_len,
            declared_compressed_len,
        },
    ))
}

/// Decompresses a zstd frame, refusing to produce more than `limit` bytes.
pub fn decompress_bounded(data: &[u8], limit: usize) -> Result<Vec<u8>, ErrorKind> {
    let decoder = zstd::stream::read::Decoder::with_buffer(data)
        .map_err(|e| ErrorKind::Decompression(e.to_string()))?;
    let mut out = Vec::new();
    decoder
        .take((limit as u64).saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| ErrorKind::Decompression(e.to_string()))?;
    if out.len() > limit {
        return Err(ErrorKind::DecompressionLimit { limit });
    }
    Ok(out)
}

pub fn decompress_unbounded(data: &[u8]) -> Result<Vec<u8>, ErrorKind> {
    zstd::stream::decode_all(data).map_err(|e| ErrorKind::Decompression(e.to_string()))
}

/// Returns the decompressed payload and whether it fell back to the raw bytes.
fn decompress_payload(
    header: &ChunkHeader,
    compressed: &[u8],
    limits: DecompressionLimits,
) -> (Vec<u8>, bool) {
    let limit = limits.ceiling(header.declared_uncompressed_len);
    let bounded_err = match decompress_bounded(compressed, limit) {
        Ok(out) => return (out, false),
        Err(e) => e,
    };
    debug!(chunk = header.id, "bounded decompression failed ({bounded_err}), retrying unbounded");
    match decompress_unbounded(compressed) {
        Ok(out) => (out, false),
        Err(e) => {
            warn!(chunk = header.id, "failed to decompress chunk, keeping raw bytes: {e}");
            (compressed.to_vec(), true)
        }
    }
}

/// Walks the event region one chunk record at a time.
///
/// Iteration ends at the first record that does not fit in the remaining
/// input; everything produced before that point stays valid.
pub struct ChunkDecoder<'a> {
    remaining: &'a [u8],
    limits: DecompressionLimits,
}

impl<'a> ChunkDecoder<'a> {
    pub fn new(event_data: &'a [u8], limits: DecompressionLimits) -> Self {
        ChunkDecoder {
            remaining: event_data,
            limits,
        }
    }

    fn next_chunk(&mut self) -> Result<Chunk, ErrorKind> {
        let (i, header) = parse_chunk_header(self.remaining)?;

        if header.declared_compressed_len == 0 {
            // Inline raw data is skipped, not decoded.
            let skip = (header.declared_uncompressed_len as usize).min(i.len());
            self.remaining = &i[skip..];
            trace!(chunk = header.id, skipped = skip, "chunk without compressed body");
            return Ok(Chunk::from_header(header, None, false));
        }

        let (i, compressed) =
            take::<_, _, Error<_>>(header.declared_compressed_len as usize)(i)?;
        self.remaining = i;

        let (payload, passthrough) = decompress_payload(&header, compressed, self.limits);
        trace!(
            chunk = header.id,
            kind = ?header.kind,
            len = payload.len(),
            "decoded chunk"
        );
        Ok(Chunk::from_header(header, Some(payload), passthrough))
    }
}

impl Iterator for ChunkDecoder<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.remaining.is_empty() {
            return None;
        }
        match self.next_chunk() {
            Ok(chunk) => Some(chunk),
            Err(e) => {
                debug!(
                    remaining = self.remaining.len(),
                    "stopping chunk stream: {e}"
                );
                self.remaining = &[];
                None
            }
        }
    }
}

pub fn decode_chunks(event_data: &[u8], limits: DecompressionLimits) -> Vec<Chunk> {
    ChunkDecoder::new(event_data, limits).collect()
}
