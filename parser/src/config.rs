use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::types::MapPos;

/// Tunables for the decoding pipeline, loadable from a TOML file.
///
/// All fields default to the values observed on current replay files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
#[builder(default)]
pub struct DecoderConfig {
    pub decompression: DecompressionLimits,
    pub calibration: CoordinateCalibration,
    /// Seconds after a movement command during which the entity is reported at
    /// its first waypoint.
    pub jitter_window: f64,
    /// Packet ids whose payloads are decoded as movement commands.
    pub movement_packet_ids: Vec<u16>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            decompression: DecompressionLimits::default(),
            calibration: CoordinateCalibration::default(),
            jitter_window: 1.0,
            movement_packet_ids: vec![0x61, 0x64],
        }
    }
}

impl DecoderConfig {
    pub fn builder() -> DecoderConfigBuilder {
        DecoderConfigBuilder::default()
    }

    pub fn is_movement_packet(&self, packet_id: u16) -> bool {
        self.movement_packet_ids.contains(&packet_id)
    }

    /// Generate a commented default TOML config string.
    pub fn generate_default_toml() -> String {
        r#"# ROFL decoder configuration

# Seconds after a movement command during which the entity is still reported
# at the first waypoint
jitter_window = 1.0

# Block packet ids decoded as movement (path) packets
movement_packet_ids = [0x61, 0x64]

[decompression]
# Output ceiling is max(declared_uncompressed_len * ratio, floor)
ratio = 10
floor = 10485760

[calibration]
# world = sign_extend(raw) * scale + origin_offset
scale = 2.0
origin_offset_x = 7358.0
origin_offset_y = 7412.0
# Decoded positions outside [map_min, map_max] on either axis are discarded
map_min = 0.0
map_max = 15000.0
"#
        .to_string()
    }
}

/// Upper bound on how much a single chunk may inflate to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompressionLimits {
    pub ratio: usize,
    pub floor: usize,
}

impl Default for DecompressionLimits {
    fn default() -> Self {
        Self {
            ratio: 10,
            floor: 10 * 1024 * 1024,
        }
    }
}

impl DecompressionLimits {
    pub fn ceiling(&self, declared_uncompressed_len: u32) -> usize {
        (declared_uncompressed_len as usize)
            .saturating_mul(self.ratio)
            .max(self.floor)
    }
}

/// Maps raw 16-bit path coordinates into world space.
///
/// The offsets were fitted against a single Summoner's Rift build and are not
/// derivable from the packet itself; replace them per map version. Decoded
/// positions outside `map_min..=map_max` on either axis are treated as
/// misdecodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinateCalibration {
    pub scale: f32,
    pub origin_offset_x: f32,
    pub origin_offset_y: f32,
    pub map_min: f32,
    pub map_max: f32,
}

impl CoordinateCalibration {
    pub const SUMMONERS_RIFT: CoordinateCalibration = CoordinateCalibration {
        scale: 2.0,
        origin_offset_x: 7358.0,
        origin_offset_y: 7412.0,
        map_min: 0.0,
        map_max: 15000.0,
    };

    pub fn to_world(&self, raw_x: u16, raw_y: u16) -> MapPos {
        MapPos {
            x: f32::from(raw_x as i16) * self.scale + self.origin_offset_x,
            y: f32::from(raw_y as i16) * self.scale + self.origin_offset_y,
        }
    }

    /// Same scale and bounds, different origin.
    pub fn with_origin(&self, origin_offset_x: f32, origin_offset_y: f32) -> Self {
        CoordinateCalibration {
            origin_offset_x,
            origin_offset_y,
            ..*self
        }
    }

    pub fn contains(&self, pos: MapPos) -> bool {
        let on_map = |v: f32| (self.map_min..=self.map_max).contains(&v);
        on_map(pos.x) && on_map(pos.y)
    }
}

impl Default for CoordinateCalibration {
    fn default() -> Self {
        Self::SUMMONERS_RIFT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_uses_floor_for_small_chunks() {
        let limits = DecompressionLimits::default();
        assert_eq!(limits.ceiling(0), 10 * 1024 * 1024);
        assert_eq!(limits.ceiling(4 * 1024 * 1024), 40 * 1024 * 1024);
        assert_eq!(limits.ceiling(u32::MAX), (u32::MAX as usize).saturating_mul(10));
    }

    #[test]
    fn raw_coordinates_are_sign_extended() {
        let calibration = CoordinateCalibration::default();
        assert_eq!(calibration.to_world(0, 0), MapPos::new(7358.0, 7412.0));
        assert_eq!(calibration.to_world(0x0010, 0x0020), MapPos::new(7390.0, 7476.0));
        assert_eq!(calibration.to_world(0xFFFF, 0x8000), MapPos::new(7356.0, 7412.0 - 65536.0));
    }

    #[test]
    fn bounds_check_both_axes() {
        let calibration = CoordinateCalibration::default();
        assert!(calibration.contains(MapPos::new(0.0, 15000.0)));
        assert!(calibration.contains(calibration.to_world(0x0010, 0x0020)));
        assert!(!calibration.contains(MapPos::new(-1.0, 100.0)));
        assert!(!calibration.contains(MapPos::new(100.0, 15000.5)));
        assert!(!calibration.contains(calibration.to_world(0x8000, 0x7FFF)));

        let shifted = calibration.with_origin(0.0, 0.0);
        assert_eq!(shifted.map_max, 15000.0);
        assert!(!shifted.contains(shifted.to_world(0xFFFF, 0x0010)));
    }

    #[test]
    fn partial_document_falls_back_to_defaults() {
        let parsed: DecoderConfig =
            serde_json::from_str(r#"{"calibration": {"scale": 2.0}}"#).unwrap();
        assert_eq!(parsed, DecoderConfig::default());
    }

    #[test]
    fn builder_overrides_single_fields() {
        let config = DecoderConfig::builder()
            .jitter_window(0.5)
            .movement_packet_ids(vec![0x2a])
            .build()
            .unwrap();
        assert_eq!(config.jitter_window, 0.5);
        assert!(config.is_movement_packet(0x2a));
        assert!(!config.is_movement_packet(0x61));
        assert_eq!(config.calibration, CoordinateCalibration::SUMMONERS_RIFT);
    }
}
