use serde::Serialize;
use std::cell::{RefCell, RefMut};
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::Metadata;
use crate::analyzer::Analyzer;
use crate::block::Block;
use crate::chunk::Chunk;

const MAX_SAMPLES: usize = 3;
const SAMPLE_PREFIX_LEN: usize = 32;

#[derive(Debug, Clone, Serialize)]
pub struct PacketSample {
    pub timestamp: f64,
    pub length: u32,
    pub param: u32,
    /// Hex of the first bytes of the payload.
    pub payload_start: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PacketStats {
    pub count: usize,
    pub total_len: u64,
    pub samples: Vec<PacketSample>,
}

impl PacketStats {
    pub fn average_len(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_len as f64 / self.count as f64
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct SurveyStats {
    pub replays: usize,
    pub total_chunks: usize,
    pub passthrough_chunks: usize,
    pub total_blocks: usize,
    pub packets: BTreeMap<u16, PacketStats>,
}

impl SurveyStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packet ids ordered by descending frequency.
    pub fn most_common(&self) -> Vec<(u16, &PacketStats)> {
        let mut ids: Vec<(u16, &PacketStats)> =
            self.packets.iter().map(|(id, stats)| (*id, stats)).collect();
        ids.sort_by(|a, b| b.1.count.cmp(&a.1.count).then(a.0.cmp(&b.0)));
        ids
    }
}

pub struct SurveyBuilder {
    stats: Rc<RefCell<SurveyStats>>,
}

impl SurveyBuilder {
    pub fn new(stats: Rc<RefCell<SurveyStats>>) -> Self {
        Self { stats }
    }

    pub fn build(&self, _meta: &Metadata) -> Box<dyn Analyzer> {
        self.stats.borrow_mut().replays += 1;
        Box::new(Survey {
            stats: self.stats.clone(),
        })
    }
}

struct Survey {
    stats: Rc<RefCell<SurveyStats>>,
}

impl Analyzer for Survey {
    fn begin_chunk(&mut self, chunk: &Chunk) {
        let mut stats: RefMut<_> = self.stats.borrow_mut();
        stats.total_chunks += 1;
        if chunk.passthrough {
            stats.passthrough_chunks += 1;
        }
    }

    fn process(&mut self, block: &Block<'_>) {
        let mut stats: RefMut<_> = self.stats.borrow_mut();
        stats.total_blocks += 1;
        let entry = stats.packets.entry(block.packet_id).or_default();
        entry.count += 1;
        entry.total_len += u64::from(block.length);
        if entry.samples.len() < MAX_SAMPLES {
            let prefix = &block.payload[..block.payload.len().min(SAMPLE_PREFIX_LEN)];
            entry.samples.push(PacketSample {
                timestamp: block.timestamp,
                length: block.length,
                param: block.param,
                payload_start: hex::encode(prefix),
            });
        }
    }

    fn finish(&mut self) {}
}
