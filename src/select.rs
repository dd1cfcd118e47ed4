//! Choosing the blocks that hold samples for a requested window.

use crate::catalog::Block;
use crate::time::TimeRange;

impl Block {
    /// Inclusive overlap between the block's `[min_time, max_time]` and the
    /// window. Any overlap counts: a partially covered block still carries
    /// samples inside the window.
    pub fn overlaps(&self, window: &TimeRange) -> bool {
        let (start, end) = (window.start(), window.end());
        let (min, max) = (self.min_time, self.max_time);

        start == min
            || end == max
            || (min < end && end < max)
            || (min < start && start < max)
            || (start < min && max < end)
    }
}

/// Blocks overlapping one window, in catalog order. An empty selection is a
/// normal outcome, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    blocks: Vec<Block>,
}

impl Selection {
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }
}

pub fn select(blocks: &[Block], window: &TimeRange) -> Selection {
    Selection {
        blocks: blocks
            .iter()
            .filter(|block| block.overlaps(window))
            .cloned()
            .collect(),
    }
}
