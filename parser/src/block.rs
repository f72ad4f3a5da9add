use modular_bitfield::prelude::*;
use nom::bytes::complete::take;
use nom::number::complete::{le_f32, le_u8, le_u16, le_u32};
use serde::Serialize;
use tracing::trace;

use crate::error::IResult;

/// First byte of every block. A set bit selects the compact form of a field.
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct BlockMarker {
    #[skip]
    __: B4,
    pub compact_length: bool,
    pub compact_param: bool,
    pub reuse_packet_id: bool,
    pub compact_timestamp: bool,
}

/// How a single block header field is stored on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEncoding {
    /// One byte, either a delta against the previous block or reuse of it.
    Compact,
    /// Full width value replacing the running state.
    Absolute,
}

impl FieldEncoding {
    fn from_flag(compact: bool) -> Self {
        if compact {
            FieldEncoding::Compact
        } else {
            FieldEncoding::Absolute
        }
    }
}

/// Per-field encodings selected by one marker byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEncodings {
    pub timestamp: FieldEncoding,
    pub length: FieldEncoding,
    pub packet_id: FieldEncoding,
    pub param: FieldEncoding,
}

impl From<BlockMarker> for BlockEncodings {
    fn from(marker: BlockMarker) -> Self {
        BlockEncodings {
            timestamp: FieldEncoding::from_flag(marker.compact_timestamp()),
            length: FieldEncoding::from_flag(marker.compact_length()),
            packet_id: FieldEncoding::from_flag(marker.reuse_packet_id()),
            param: FieldEncoding::from_flag(marker.compact_param()),
        }
    }
}

impl From<u8> for BlockEncodings {
    fn from(marker: u8) -> Self {
        BlockMarker::from_bytes([marker]).into()
    }
}

/// Running state that compact fields are relative to. Fresh for every chunk.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct BlockContext {
    pub timestamp: f64,
    pub packet_id: u16,
    pub param: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Block<'a> {
    pub length: u32,
    /// Seconds since the start of the recording.
    pub timestamp: f64,
    pub packet_id: u16,
    pub param: u32,
    #[serde(serialize_with = "serialize_hex")]
    pub payload: &'a [u8],
}

fn serialize_hex<S: serde::Serializer>(payload: &&[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(payload))
}

fn parse_timestamp(i: &[u8], encoding: FieldEncoding, previous: f64) -> IResult<&[u8], f64> {
    match encoding {
        FieldEncoding::Compact => {
            let (i, delta_ms) = le_u8(i)?;
            Ok((i, previous + f64::from(delta_ms) / 1000.0))
        }
        FieldEncoding::Absolute => {
            let (i, secs) = le_f32(i)?;
            Ok((i, f64::from(secs)))
        }
    }
}

fn parse_length(i: &[u8], encoding: FieldEncoding) -> IResult<&[u8], u32> {
    match encoding {
        FieldEncoding::Compact => {
            let (i, len) = le_u8(i)?;
            Ok((i, u32::from(len)))
        }
        FieldEncoding::Absolute => le_u32(i),
    }
}

fn parse_packet_id(i: &[u8], encoding: FieldEncoding, previous: u16) -> IResult<&[u8], u16> {
    match encoding {
        FieldEncoding::Compact => Ok((i, previous)),
        FieldEncoding::Absolute => le_u16(i),
    }
}

fn parse_param(i: &[u8], encoding: FieldEncoding, previous: u32) -> IResult<&[u8], u32> {
    match encoding {
        FieldEncoding::Compact => {
            let (i, delta) = le_u8(i)?;
            Ok((i, previous.wrapping_add(u32::from(delta))))
        }
        FieldEncoding::Absolute => le_u32(i),
    }
}

/// Decodes one block, returning the context the next block is relative to.
pub fn parse_block(i: &[u8], ctx: BlockContext) -> IResult<&[u8], (BlockContext, Block<'_>)> {
    let (i, marker) = le_u8(i)?;
    let enc = BlockEncodings::from(marker);

    let (i, timestamp) = parse_timestamp(i, enc.timestamp, ctx.timestamp)?;
    let (i, length) = parse_length(i, enc.length)?;
    let (i, packet_id) = parse_packet_id(i, enc.packet_id, ctx.packet_id)?;
    let (i, param) = parse_param(i, enc.param, ctx.param)?;
    let (i, payload) = take(length as usize)(i)?;

    let ctx = BlockContext {
        timestamp,
        packet_id,
        param,
    };
    Ok((
        i,
        (
            ctx,
            Block {
                length,
                timestamp,
                packet_id,
                param,
                payload,
            },
        ),
    ))
}

/// Iterates the blocks of one decompressed chunk payload.
///
/// Stops quietly at the first block whose fields or payload run past the end
/// of the input.
pub struct BlockDecoder<'a> {
    remaining: &'a [u8],
    ctx: BlockContext,
}

impl<'a> BlockDecoder<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        BlockDecoder {
            remaining: payload,
            ctx: BlockContext::default(),
        }
    }
}

impl<'a> Iterator for BlockDecoder<'a> {
    type Item = Block<'a>;

    fn next(&mut self) -> Option<Block<'a>> {
        if self.remaining.is_empty() {
            return None;
        }
        match parse_block(self.remaining, self.ctx) {
            Ok((rest, (ctx, block))) => {
                self.remaining = rest;
                self.ctx = ctx;
                Some(block)
            }
            Err(e) => {
                let kind = crate::error::ErrorKind::from(e);
                trace!(
                    remaining = self.remaining.len(),
                    "stopping block stream: {kind}"
                );
                self.remaining = &[];
                None
            }
        }
    }
}

pub fn decode_blocks(payload: &[u8]) -> Vec<Block<'_>> {
    BlockDecoder::new(payload).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const COMPACT_TIME: u8 = 0x80;
    const REUSE_ID: u8 = 0x40;
    const COMPACT_PARAM: u8 = 0x20;
    const COMPACT_LEN: u8 = 0x10;

    pub(crate) fn absolute_block(timestamp: f32, packet_id: u16, param: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0x00];
        out.extend_from_slice(&timestamp.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&packet_id.to_le_bytes());
        out.extend_from_slice(&param.to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn compact_block(delta_ms: u8, param_delta: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![COMPACT_TIME | REUSE_ID | COMPACT_PARAM | COMPACT_LEN];
        out.push(delta_ms);
        out.push(payload.len() as u8);
        out.push(param_delta);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn marker_bits_map_to_fields() {
        let enc = BlockEncodings::from(COMPACT_TIME | COMPACT_LEN);
        assert_eq!(enc.timestamp, FieldEncoding::Compact);
        assert_eq!(enc.length, FieldEncoding::Compact);
        assert_eq!(enc.packet_id, FieldEncoding::Absolute);
        assert_eq!(enc.param, FieldEncoding::Absolute);

        let enc = BlockEncodings::from(REUSE_ID | COMPACT_PARAM | 0x0F);
        assert_eq!(enc.timestamp, FieldEncoding::Absolute);
        assert_eq!(enc.length, FieldEncoding::Absolute);
        assert_eq!(enc.packet_id, FieldEncoding::Compact);
        assert_eq!(enc.param, FieldEncoding::Compact);
    }

    #[test]
    fn absolute_fields_decode_exactly() {
        let mut data = absolute_block(1.5, 0x61, 0x4000_0001, &[1, 2, 3]);
        data.extend(absolute_block(2.25, 0x12, 7, &[]));
        data.extend(absolute_block(0.5, 0xFFFF, u32::MAX, &[9; 300]));

        let blocks = decode_blocks(&data);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].timestamp, 1.5);
        assert_eq!(blocks[0].packet_id, 0x61);
        assert_eq!(blocks[0].param, 0x4000_0001);
        assert_eq!(blocks[0].payload, &[1, 2, 3]);
        assert_eq!(blocks[1].timestamp, 2.25);
        assert_eq!(blocks[1].length, 0);
        assert!(blocks[1].payload.is_empty());
        // Absolute timestamps overwrite rather than accumulate.
        assert_eq!(blocks[2].timestamp, 0.5);
        assert_eq!(blocks[2].packet_id, 0xFFFF);
        assert_eq!(blocks[2].param, u32::MAX);
        assert_eq!(blocks[2].length, 300);
    }

    #[test]
    fn compact_fields_apply_deltas() {
        let mut data = absolute_block(10.0, 0x61, 1000, &[0xAA]);
        data.extend(compact_block(250, 5, &[0xBB, 0xCC]));
        data.extend(compact_block(16, 255, &[]));

        let blocks = decode_blocks(&data);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[1].packet_id, 0x61);
        assert_eq!(blocks[1].param, 1005);
        assert!((blocks[1].timestamp - 10.25).abs() < 1e-9);
        assert_eq!(blocks[1].payload, &[0xBB, 0xCC]);
        assert_eq!(blocks[2].packet_id, 0x61);
        assert_eq!(blocks[2].param, 1260);
        assert!((blocks[2].timestamp - 10.266).abs() < 1e-9);
    }

    #[test]
    fn compact_param_wraps() {
        let mut data = absolute_block(0.0, 1, u32::MAX, &[]);
        data.extend(compact_block(0, 2, &[]));
        let blocks = decode_blocks(&data);
        assert_eq!(blocks[1].param, 1);
    }

    #[test]
    fn context_is_passed_through_explicitly() {
        let ctx = BlockContext {
            timestamp: 3.0,
            packet_id: 0x64,
            param: 40,
        };
        let data = compact_block(250, 2, &[7]);
        let (rest, (next, block)) = parse_block(&data, ctx).unwrap();
        assert!(rest.is_empty());
        assert_eq!(block.packet_id, 0x64);
        assert_eq!(next.param, 42);
        assert!((next.timestamp - 3.25).abs() < 1e-9);
    }

    #[test]
    fn first_block_compact_uses_zeroed_context() {
        let data = compact_block(100, 3, &[1]);
        let blocks = decode_blocks(&data);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].packet_id, 0);
        assert_eq!(blocks[0].param, 3);
        assert!((blocks[0].timestamp - 0.1).abs() < 1e-9);
    }

    #[test]
    fn underrun_keeps_earlier_blocks() {
        let mut data = absolute_block(1.0, 1, 1, &[1, 2]);
        data.extend(absolute_block(2.0, 2, 2, &[3, 4]));
        let mut short = absolute_block(3.0, 3, 3, &[5, 6, 7, 8]);
        short.truncate(short.len() - 1);
        data.extend(short);

        let blocks = decode_blocks(&data);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].packet_id, 2);

        // Header cut off mid-field.
        let mut data = absolute_block(1.0, 1, 1, &[]);
        data.extend_from_slice(&[0x00, 0x00, 0x00]);
        assert_eq!(decode_blocks(&data).len(), 1);
    }

    #[test]
    fn block_serializes_payload_as_hex() {
        let data = absolute_block(1.0, 0x61, 2, &[0xDE, 0xAD]);
        let blocks = decode_blocks(&data);
        let json = serde_json::to_value(&blocks[0]).unwrap();
        assert_eq!(json["payload"], "dead");
        assert_eq!(json["packet_id"], 0x61);
    }
}
