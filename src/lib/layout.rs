//! Step-id layout of the trimming pipeline graph.
//!
//! Stages are addressed by integers. The reader and the demultiplexer have
//! fixed ids; each sample then owns a block of [`SAMPLE_STRIDE`] ids holding
//! its trimmer and writer channels. When output compression is enabled, the
//! compressor takes the channel id and forwards to the writer at
//! `channel + ZIP_OFFSET` within the same block.

use crate::scheduler::StepId;

/// The reader (source) stage.
pub const READ_FASTQ: StepId = 0;
/// The demultiplexer, when barcodes are configured.
pub const DEMULTIPLEX: StepId = 1;
/// Unidentified mate 1 output channel.
pub const UNIDENTIFIED_1: StepId = 2;
/// Unidentified mate 2 output channel.
pub const UNIDENTIFIED_2: StepId = 3;
/// Ambiguous mate 1 output channel.
pub const AMBIGUOUS_1: StepId = 4;
/// Ambiguous mate 2 output channel.
pub const AMBIGUOUS_2: StepId = 5;

/// First id of the first sample block.
pub const SAMPLE_BASE: StepId = 16;
/// Ids reserved per sample block.
pub const SAMPLE_STRIDE: StepId = 16;

/// Writer id offset for a compressed channel.
pub const ZIP_OFFSET: StepId = 8;

/// Channel offsets within a sample block.
pub const TRIM: StepId = 0;
/// Accepted mate 1 (or single-end) reads.
pub const WRITE_MATE_1: StepId = 1;
/// Accepted mate 2 reads.
pub const WRITE_MATE_2: StepId = 2;
/// Reads whose mate was discarded.
pub const WRITE_SINGLETON: StepId = 3;
/// Full-length collapsed reads.
pub const WRITE_COLLAPSED: StepId = 4;
/// Quality-trimmed collapsed reads.
pub const WRITE_COLLAPSED_TRUNCATED: StepId = 5;
/// Discarded reads.
pub const WRITE_DISCARDED: StepId = 6;

/// First id of the block owned by sample `nth`.
#[must_use]
pub fn sample_block(nth: usize) -> StepId {
    SAMPLE_BASE + nth * SAMPLE_STRIDE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_do_not_collide() {
        // Compressed writers of the fixed channels stay below the first
        // sample block, and in-block writer ids stay within the stride.
        assert!(AMBIGUOUS_2 + ZIP_OFFSET < SAMPLE_BASE);
        assert!(WRITE_DISCARDED + ZIP_OFFSET < SAMPLE_STRIDE);
        assert_eq!(sample_block(0), SAMPLE_BASE);
        assert_eq!(sample_block(2), SAMPLE_BASE + 2 * SAMPLE_STRIDE);
    }
}
