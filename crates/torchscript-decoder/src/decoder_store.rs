//! Ownership of child decoders
//!
//! A decoder hands out child decoders for its nested blocks and nodes. The parent
//! keeps one strong reference to each child, so callers may hold them as long as
//! the parent lives. Children never point back at their parent.

use std::rc::Rc;

use crate::decoder::GraphDecoder;

/// Append-only store of child decoders.
#[derive(Debug, Default)]
pub(crate) struct DecoderStore {
    decoders: Vec<Rc<GraphDecoder>>,
}

impl DecoderStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Keep `decoder` alive for as long as the store.
    pub(crate) fn retain(&mut self, decoder: Rc<GraphDecoder>) {
        self.decoders.push(decoder);
    }

    pub(crate) fn len(&self) -> usize {
        self.decoders.len()
    }
}
