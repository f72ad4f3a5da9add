//! Movement commands.
//!
//! A path packet carries an entity's speed and its planned route as a short
//! polyline. The first waypoint is stored as two absolute 16-bit values; every
//! later coordinate is either absolute or an 8-bit delta against the previous
//! one, chosen by a pair of flag bits per waypoint that precede the
//! coordinate data.

use nom::bytes::complete::take;
use nom::number::complete::{le_f32, le_i8, le_u16, le_u32};
use serde::Serialize;
use tracing::trace;

use crate::block::FieldEncoding;
use crate::config::CoordinateCalibration;
use crate::error::{ErrorKind, IResult, failure_from_kind};
use crate::types::{EntityId, MapPos};

const MIN_PAYLOAD_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathPacket {
    pub timestamp: f64,
    pub entity_id: EntityId,
    pub speed: f32,
    /// Never empty.
    pub waypoints: Vec<MapPos>,
}

impl PathPacket {
    pub fn first_waypoint(&self) -> MapPos {
        self.waypoints[0]
    }

    pub fn last_waypoint(&self) -> MapPos {
        self.waypoints[self.waypoints.len() - 1]
    }

    /// Seconds needed to walk the whole route at `speed`.
    pub fn duration(&self) -> f64 {
        self.waypoints
            .windows(2)
            .map(|seg| segment_time(seg[0], seg[1], self.speed))
            .sum()
    }

    /// Interpolated position at `time`, assuming the entity started walking
    /// at `self.timestamp`. Within `jitter_window` of the command the entity
    /// is reported at its first waypoint.
    pub fn position_at(&self, time: f64, jitter_window: f64) -> MapPos {
        let elapsed = time - self.timestamp;
        if self.waypoints.len() == 1 || elapsed <= jitter_window {
            return self.first_waypoint();
        }

        let mut remaining = elapsed;
        for seg in self.waypoints.windows(2) {
            let (from, to) = (seg[0], seg[1]);
            let travel = segment_time(from, to, self.speed);
            if remaining <= travel {
                let t = if travel > 0.0 { remaining / travel } else { 0.0 };
                return from.lerp(to, t as f32);
            }
            remaining -= travel;
        }
        self.last_waypoint()
    }
}

/// Non-positive speeds make every segment instantaneous.
fn segment_time(from: MapPos, to: MapPos, speed: f32) -> f64 {
    if speed > 0.0 {
        f64::from(from.distance(to)) / f64::from(speed)
    } else {
        0.0
    }
}

/// Two flag bits per waypoint after the first, numbered LSB-first.
struct FlagBits<'a> {
    bytes: &'a [u8],
    bit: usize,
}

impl<'a> FlagBits<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        FlagBits { bytes, bit: 0 }
    }

    fn next_bit(&mut self) -> Option<bool> {
        let byte = *self.bytes.get(self.bit / 8)?;
        let set = byte & (1 << (self.bit % 8)) != 0;
        self.bit += 1;
        Some(set)
    }

    /// A set bit means the coordinate is stored as a delta.
    fn next_encoding(&mut self) -> Option<FieldEncoding> {
        self.next_bit().map(|delta| {
            if delta {
                FieldEncoding::Compact
            } else {
                FieldEncoding::Absolute
            }
        })
    }
}

fn flag_region_len(waypoint_count: usize) -> usize {
    if waypoint_count > 1 {
        ((waypoint_count - 2) >> 2) + 1
    } else {
        0
    }
}

fn parse_coordinate(i: &[u8], encoding: FieldEncoding, previous: u16) -> IResult<&[u8], u16> {
    match encoding {
        FieldEncoding::Absolute => le_u16(i),
        FieldEncoding::Compact => {
            let (i, delta) = le_i8(i)?;
            Ok((i, previous.wrapping_add(delta as i16 as u16)))
        }
    }
}

/// Parses the packet body into raw (unscaled) coordinate pairs.
fn parse_path_body(i: &[u8]) -> IResult<&[u8], (EntityId, f32, Vec<(u16, u16)>)> {
    let (i, parsing_type) = le_u16(i)?;
    let (i, entity_id) = le_u32(i)?;
    let (i, speed) = le_f32(i)?;

    let i = if parsing_type & 1 != 0 {
        take(1usize)(i)?.0
    } else {
        i
    };

    let waypoint_count = ((parsing_type >> 1) & 0xFF) as usize;
    if waypoint_count == 0 {
        return Err(failure_from_kind(i, ErrorKind::PacketDecode("no waypoints")));
    }

    let (mut i, flag_bytes) = take(flag_region_len(waypoint_count))(i)?;
    let mut flags = FlagBits::new(flag_bytes);

    let mut raw = Vec::with_capacity(waypoint_count);
    let (mut x, mut y) = (0u16, 0u16);
    for idx in 0..waypoint_count {
        let (x_enc, y_enc) = if idx == 0 {
            (FieldEncoding::Absolute, FieldEncoding::Absolute)
        } else {
            match (flags.next_encoding(), flags.next_encoding()) {
                (Some(x_enc), Some(y_enc)) => (x_enc, y_enc),
                _ => {
                    return Err(failure_from_kind(
                        i,
                        ErrorKind::PacketDecode("flag region exhausted"),
                    ));
                }
            }
        };
        let (rest, new_x) = parse_coordinate(i, x_enc, x)?;
        let (rest, new_y) = parse_coordinate(rest, y_enc, y)?;
        i = rest;
        x = new_x;
        y = new_y;
        raw.push((x, y));
    }

    Ok((i, (EntityId(entity_id), speed, raw)))
}

/// Decodes a movement payload. `None` means the block is not a usable
/// movement command.
pub fn parse_path_packet(
    timestamp: f64,
    payload: &[u8],
    calibration: &CoordinateCalibration,
) -> Option<PathPacket> {
    if payload.len() < MIN_PAYLOAD_LEN {
        trace!(len = payload.len(), "path packet too short");
        return None;
    }

    match parse_path_body(payload) {
        Ok((_, (entity_id, speed, raw))) => Some(PathPacket {
            timestamp,
            entity_id,
            speed,
            waypoints: raw
                .into_iter()
                .map(|(x, y)| calibration.to_world(x, y))
                .collect(),
        }),
        Err(e) => {
            trace!(timestamp, "rejecting path packet: {}", ErrorKind::from(e));
            None
        }
    }
}
