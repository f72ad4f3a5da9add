use serde::Serialize;
use tracing::trace;

use crate::analyzer::Analyzer;
use crate::block::Block;
use crate::chunk::Chunk;
use crate::config::{CoordinateCalibration, DecoderConfig};
use crate::path::parse_path_packet;
use crate::tracker::PositionTracker;

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct PositionStats {
    /// Chunks with a payload that were walked for blocks.
    pub total_chunks: usize,
    pub total_blocks: usize,
    /// Blocks whose packet id marked them as movement candidates.
    pub candidates: usize,
    /// Candidates that decoded into a usable path packet.
    pub movement_packets: usize,
    /// Decoded packets with a waypoint off the map, kept out of the tracker.
    pub out_of_bounds: usize,
}

/// Feeds movement blocks into a [`PositionTracker`].
pub struct PositionExtractor {
    movement_packet_ids: Vec<u16>,
    calibration: CoordinateCalibration,
    tracker: PositionTracker,
    stats: PositionStats,
}

impl PositionExtractor {
    pub fn new(config: &DecoderConfig) -> Self {
        PositionExtractor {
            movement_packet_ids: config.movement_packet_ids.clone(),
            calibration: config.calibration,
            tracker: PositionTracker::with_jitter_window(config.jitter_window),
            stats: PositionStats::default(),
        }
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    pub fn into_tracker(self) -> PositionTracker {
        self.tracker
    }

    pub fn stats(&self) -> PositionStats {
        self.stats
    }
}

impl Analyzer for PositionExtractor {
    fn begin_chunk(&mut self, _chunk: &Chunk) {
        self.stats.total_chunks += 1;
    }

    fn process(&mut self, block: &Block<'_>) {
        self.stats.total_blocks += 1;
        if !self.movement_packet_ids.contains(&block.packet_id) {
            return;
        }
        self.stats.candidates += 1;
        let Some(packet) = parse_path_packet(block.timestamp, block.payload, &self.calibration)
        else {
            return;
        };
        if !packet.waypoints.iter().all(|&pos| self.calibration.contains(pos)) {
            trace!(
                entity = %packet.entity_id,
                timestamp = packet.timestamp,
                "discarding off-map path packet"
            );
            self.stats.out_of_bounds += 1;
            return;
        }
        self.stats.movement_packets += 1;
        self.tracker.update(packet);
    }

    fn finish(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::decode_blocks;
    use crate::block::tests::absolute_block;
    use crate::path::tests::path_header;
    use crate::types::EntityId;

    #[test]
    fn only_movement_ids_reach_the_tracker() {
        let mut movement = path_header(1 << 1, 7, 100.0);
        movement.extend_from_slice(&[0x10, 0x00, 0x20, 0x00]);

        let mut data = absolute_block(3.0, 0x61, 0, &movement);
        data.extend(absolute_block(4.0, 0x99, 0, &movement));
        data.extend(absolute_block(5.0, 0x64, 0, &[0x00; 12]));
        let blocks = decode_blocks(&data);

        let mut extractor = PositionExtractor::new(&DecoderConfig::default());
        for block in &blocks {
            extractor.process(block);
        }
        extractor.finish();

        assert_eq!(extractor.stats().total_blocks, 3);
        assert_eq!(extractor.stats().candidates, 2);
        assert_eq!(extractor.stats().movement_packets, 1);
        assert_eq!(extractor.stats().out_of_bounds, 0);
        let tracker = extractor.into_tracker();
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.latest(EntityId(7)).unwrap().timestamp, 3.0);
    }

    #[test]
    fn off_map_packets_are_counted_not_tracked() {
        // Raw (0x8000, 0x7FFF) lands far outside the map with default offsets.
        let mut off_map = path_header(1 << 1, 9, 100.0);
        off_map.extend_from_slice(&[0x00, 0x80, 0xFF, 0x7F]);
        let mut on_map = path_header(1 << 1, 9, 100.0);
        on_map.extend_from_slice(&[0x10, 0x00, 0x20, 0x00]);

        let mut data = absolute_block(1.0, 0x61, 0, &on_map);
        data.extend(absolute_block(2.0, 0x61, 0, &off_map));
        let blocks = decode_blocks(&data);

        let mut extractor = PositionExtractor::new(&DecoderConfig::default());
        for block in &blocks {
            extractor.process(block);
        }

        let stats = extractor.stats();
        assert_eq!(stats.candidates, 2);
        assert_eq!(stats.movement_packets, 1);
        assert_eq!(stats.out_of_bounds, 1);
        // The later off-map command did not replace the valid one.
        let latest = extractor.tracker().latest(EntityId(9)).unwrap();
        assert_eq!(latest.timestamp, 1.0);
        assert!(DecoderConfig::default().calibration.contains(latest.first_waypoint()));
    }
}
