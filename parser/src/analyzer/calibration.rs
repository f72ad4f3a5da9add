use serde::Serialize;

use crate::analyzer::Analyzer;
use crate::block::Block;
use crate::config::{CoordinateCalibration, DecoderConfig};
use crate::path::parse_path_packet;

/// Origins tried besides the configured one.
pub const CANDIDATE_ORIGINS: &[(f32, f32)] = &[
    (0.0, 0.0),
    (7500.0, 7500.0),
    (7000.0, 7000.0),
    (-7358.0, -7412.0),
    (3679.0, 3706.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OriginTrial {
    pub origin_offset_x: f32,
    pub origin_offset_y: f32,
    /// Movement packets that decoded at all.
    pub tested: usize,
    /// Of those, packets whose first waypoint landed on the map.
    pub on_map: usize,
}

impl OriginTrial {
    pub fn valid_rate(&self) -> f64 {
        if self.tested == 0 {
            0.0
        } else {
            self.on_map as f64 / self.tested as f64
        }
    }
}

/// Decodes every movement packet under several candidate origins and counts
/// how often each one puts the entity on the map.
pub struct CalibrationSurvey {
    movement_packet_ids: Vec<u16>,
    base: CoordinateCalibration,
    trials: Vec<OriginTrial>,
}

impl CalibrationSurvey {
    /// The configured origin is always the first trial.
    pub fn new(config: &DecoderConfig, candidates: &[(f32, f32)]) -> Self {
        let base = config.calibration;
        let configured = (base.origin_offset_x, base.origin_offset_y);
        let trials = std::iter::once(configured)
            .chain(candidates.iter().copied().filter(|&c| c != configured))
            .map(|(x, y)| OriginTrial {
                origin_offset_x: x,
                origin_offset_y: y,
                tested: 0,
                on_map: 0,
            })
            .collect();
        CalibrationSurvey {
            movement_packet_ids: config.movement_packet_ids.clone(),
            base,
            trials,
        }
    }

    pub fn trials(&self) -> &[OriginTrial] {
        &self.trials
    }

    /// Trial with the highest valid rate, ties going to the earlier one.
    pub fn best(&self) -> Option<&OriginTrial> {
        self.trials
            .iter()
            .filter(|t| t.tested > 0)
            .fold(None, |best: Option<&OriginTrial>, t| match best {
                Some(b) if b.valid_rate() >= t.valid_rate() => Some(b),
                _ => Some(t),
            })
    }
}

impl Analyzer for CalibrationSurvey {
    fn process(&mut self, block: &Block<'_>) {
        if !self.movement_packet_ids.contains(&block.packet_id) {
            return;
        }
        for trial in &mut self.trials {
            let calibration = self
                .base
                .with_origin(trial.origin_offset_x, trial.origin_offset_y);
            if let Some(packet) = parse_path_packet(block.timestamp, block.payload, &calibration) {
                trial.tested += 1;
                if calibration.contains(packet.first_waypoint()) {
                    trial.on_map += 1;
                }
            }
        }
    }

    fn finish(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::decode_blocks;
    use crate::block::tests::absolute_block;
    use crate::path::tests::path_header;

    fn movement(raw: [u8; 4]) -> Vec<u8> {
        let mut payload = path_header(1 << 1, 1, 100.0);
        payload.extend_from_slice(&raw);
        payload
    }

    #[test]
    fn configured_origin_wins_on_centered_coordinates() {
        let mut data = absolute_block(1.0, 0x61, 0, &movement([0x10, 0x00, 0x20, 0x00]));
        data.extend(absolute_block(2.0, 0x61, 0, &movement([0x18, 0xFC, 0x18, 0xFC])));
        data.extend(absolute_block(3.0, 0x61, 0, &movement([0x00, 0x80, 0xFF, 0x7F])));
        data.extend(absolute_block(4.0, 0x20, 0, &movement([0x10, 0x00, 0x20, 0x00])));
        let blocks = decode_blocks(&data);

        let mut survey = CalibrationSurvey::new(&DecoderConfig::default(), CANDIDATE_ORIGINS);
        for block in &blocks {
            survey.process(block);
        }

        let trials = survey.trials();
        assert_eq!(trials.len(), CANDIDATE_ORIGINS.len() + 1);
        assert_eq!((trials[0].origin_offset_x, trials[0].origin_offset_y), (7358.0, 7412.0));
        assert!(trials.iter().all(|t| t.tested == 3));
        assert_eq!(trials[0].on_map, 2);
        // Negative raw coordinates fall below zero without an origin.
        assert_eq!(trials[1].on_map, 1);

        let best = survey.best().unwrap();
        assert_eq!(best.origin_offset_x, 7358.0);
        assert!((best.valid_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn configured_origin_is_not_repeated() {
        let survey = CalibrationSurvey::new(&DecoderConfig::default(), &[(7358.0, 7412.0), (1.0, 2.0)]);
        assert_eq!(survey.trials().len(), 2);
        assert!(survey.best().is_none());
    }
}
