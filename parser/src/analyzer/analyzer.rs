use crate::block::Block;
use crate::chunk::Chunk;

/// Consumes the decoded block stream of one replay.
pub trait Analyzer {
    /// Called before the blocks of each chunk that has a payload.
    fn begin_chunk(&mut self, _chunk: &Chunk) {}
    fn process(&mut self, block: &Block<'_>);
    fn finish(&mut self);
}
