//! Synthetic work used by the demo binaries

use std::collections::VecDeque;
use tracing::info_span;

/// Allocation blocks kept alive between rounds
const RETAINED_BLOCKS: usize = 64;

/// Size of each retained block
const BLOCK_SIZE: usize = 64 * 1024;

/// CPU and heap activity that shows up in all three profiles
#[derive(Debug, Default)]
pub struct Workload {
    rounds: u64,
    checksum: u64,
    retained: VecDeque<Vec<u8>>,
}

impl Workload {
    /// Create an idle workload
    pub fn new() -> Self {
        Self::default()
    }

    /// Rounds completed so far
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Retained heap bytes
    pub fn retained_bytes(&self) -> usize {
        self.retained.iter().map(Vec::len).sum()
    }

    /// Run one round: hash some numbers, then allocate a block and keep it
    pub fn round(&mut self) -> u64 {
        let _span = info_span!("work_round", round = self.rounds).entered();

        self.checksum = mix(self.checksum, 200_000);

        let fill = (self.checksum & 0xff) as u8;
        self.retained.push_back(vec![fill; BLOCK_SIZE]);
        if self.retained.len() > RETAINED_BLOCKS {
            self.retained.pop_front();
        }

        self.rounds += 1;
        self.checksum
    }
}

#[inline(never)]
fn mix(seed: u64, iterations: u64) -> u64 {
    (0..iterations).fold(seed, |acc, i| {
        acc.rotate_left(5).wrapping_add(i).wrapping_mul(0x9e37_79b9_7f4a_7c15)
    })
}
