use serde::Serialize;
use std::collections::HashMap;

use crate::path::PathPacket;
use crate::types::{EntityId, MapPos};

/// Latest movement command per entity, queried by time.
///
/// Packets for one entity must be fed in non-decreasing timestamp order; a
/// late older packet silently replaces a newer one.
#[derive(Debug, Clone, Serialize)]
pub struct PositionTracker {
    last_packets: HashMap<EntityId, PathPacket>,
    jitter_window: f64,
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityPosition {
    pub id: EntityId,
    pub pos: MapPos,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionSnapshot {
    pub timestamp: f64,
    pub entities: Vec<EntityPosition>,
}

impl PositionTracker {
    pub const DEFAULT_JITTER_WINDOW: f64 = 1.0;

    pub fn new() -> Self {
        Self::with_jitter_window(Self::DEFAULT_JITTER_WINDOW)
    }

    pub fn with_jitter_window(jitter_window: f64) -> Self {
        PositionTracker {
            last_packets: HashMap::new(),
            jitter_window,
        }
    }

    pub fn update(&mut self, packet: PathPacket) {
        self.last_packets.insert(packet.entity_id, packet);
    }

    pub fn latest(&self, entity_id: EntityId) -> Option<&PathPacket> {
        self.last_packets.get(&entity_id)
    }

    pub fn get_position(&self, entity_id: EntityId, time: f64) -> Option<MapPos> {
        self.last_packets
            .get(&entity_id)
            .map(|packet| packet.position_at(time, self.jitter_window))
    }

    pub fn get_all_positions(&self, time: f64) -> HashMap<EntityId, MapPos> {
        self.last_packets
            .iter()
            .map(|(id, packet)| (*id, packet.position_at(time, self.jitter_window)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.last_packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_packets.is_empty()
    }

    /// Positions of every tracked entity at `step` second intervals in
    /// `[0, until)`, sorted by entity id. Empty instants are skipped.
    pub fn snapshots(&self, step: f64, until: f64) -> Vec<PositionSnapshot> {
        if step <= 0.0 || self.is_empty() {
            return Vec::new();
        }
        let steps = (until / step).ceil().max(0.0) as usize;
        (0..steps)
            .map(|n| n as f64 * step)
            .filter_map(|timestamp| {
                let mut entities: Vec<EntityPosition> = self
                    .get_all_positions(timestamp)
                    .into_iter()
                    .map(|(id, pos)| EntityPosition { id, pos })
                    .collect();
                if entities.is_empty() {
                    return None;
                }
                entities.sort_by_key(|e| e.id);
                Some(PositionSnapshot {
                    timestamp,
                    entities,
                })
            })
            .collect()
    }
}
