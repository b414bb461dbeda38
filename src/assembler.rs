/// Accumulates notification chunks and assembles them into one buffer.
///
/// The printer protocol has no length prefix or terminator; a response is
/// whatever chunks arrived between two quiet periods on the channel. This
/// type only does the accumulation; the quiet-period detection lives in
/// [`crate::command::CommandManager`].
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    chunks: Vec<Vec<u8>>,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk. Arrival order is preserved.
    pub fn add(&mut self, chunk: &[u8]) {
        self.chunks.push(chunk.to_vec());
    }

    /// Returns the concatenation of all added chunks without mutating
    /// internal state.
    pub fn assemble(&self) -> Vec<u8> {
        let total: usize = self.chunks.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(total);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Drops all accumulated chunks. Idempotent.
    pub fn reset(&mut self) {
        self.chunks.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
