use serde::Serialize;
use std::io::Write;
use tracing::warn;

use crate::Metadata;
use crate::analyzer::Analyzer;
use crate::block::Block;
use crate::chunk::Chunk;

pub struct PacketDumpBuilder {
    packet_ids: Option<Vec<u16>>,
    no_meta: bool,
}

impl Default for PacketDumpBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketDumpBuilder {
    pub fn new() -> Self {
        Self {
            packet_ids: None,
            no_meta: false,
        }
    }

    /// Only dump blocks with one of these packet ids.
    pub fn packet_ids(mut self, ids: Vec<u16>) -> Self {
        self.packet_ids = Some(ids);
        self
    }

    /// Skip the leading metadata line.
    pub fn no_meta(mut self, no_meta: bool) -> Self {
        self.no_meta = no_meta;
        self
    }

    pub fn build(self, meta: &Metadata, output: Box<dyn Write>) -> Box<dyn Analyzer> {
        let mut dump = PacketDump {
            packet_ids: self.packet_ids,
            output,
            chunk_id: None,
        };
        if !self.no_meta {
            dump.write_line(meta);
        }
        Box::new(dump)
    }
}

#[derive(Serialize)]
struct DumpLine<'a, 'b> {
    chunk: Option<u32>,
    #[serde(flatten)]
    block: &'a Block<'b>,
}

/// Writes one JSON object per block.
struct PacketDump {
    packet_ids: Option<Vec<u16>>,
    output: Box<dyn Write>,
    chunk_id: Option<u32>,
}

impl PacketDump {
    fn write_line<T: Serialize>(&mut self, value: &T) {
        let result = serde_json::to_writer(&mut self.output, value)
            .map_err(std::io::Error::from)
            .and_then(|_| self.output.write_all(b"\n"));
        if let Err(e) = result {
            warn!("failed to write packet dump line: {e}");
        }
    }
}

impl Analyzer for PacketDump {
    fn begin_chunk(&mut self, chunk: &Chunk) {
        self.chunk_id = Some(chunk.id);
    }

    fn process(&mut self, block: &Block<'_>) {
        if let Some(ids) = &self.packet_ids {
            if !ids.contains(&block.packet_id) {
                return;
            }
        }
        let line = DumpLine {
            chunk: self.chunk_id,
            block,
        };
        self.write_line(&line);
    }

    fn finish(&mut self) {
        if let Err(e) = self.output.flush() {
            warn!("failed to flush packet dump: {e}");
        }
    }
}
