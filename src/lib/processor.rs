//! The per-sample reads processors: the stages that compose alignment,
//! truncation, collapsing, and quality filtering, and route every record to
//! exactly one output channel while updating statistics.
//!
//! Processors are unordered stages; per-chunk working state (statistics,
//! tie-break RNGs) is borrowed from sink pools so concurrent workers never
//! contend on shared counters.

use std::sync::Arc;

use rand::rngs::StdRng;

use crate::adapters::AdapterPair;
use crate::alignment::{
    align_paired_ended, align_single_ended, collapse_paired_ended, truncate_paired_ended,
    truncate_single_ended,
};
use crate::chunks::{Chunk, OutputChunk, ReadChunk};
use crate::config::UserConfig;
use crate::errors::{Result, TrimError};
use crate::fastq::FastqRecord;
use crate::layout;
use crate::scheduler::{PipelineStep, StepId, StepOrdering};
use crate::statistics::{ReadType, SinkPool, Statistics, seeded_rng_pool};

/// Route a collapsed consensus read: quality-trim it, mark its header, and
/// send it to the collapsed, collapsed-truncated, or discarded channel.
fn process_collapsed_read(
    config: &UserConfig,
    statistics: &mut Statistics,
    mut collapsed: FastqRecord,
    out_collapsed: &mut OutputChunk,
    out_collapsed_truncated: &mut OutputChunk,
    out_discarded: &mut OutputChunk,
) {
    let trimmed = config.trim_sequence_by_quality_if_enabled(&mut collapsed);
    let was_trimmed = trimmed.0 > 0 || trimmed.1 > 0;
    collapsed.add_header_prefix(if was_trimmed { b"MT_" } else { b"M_" });

    let read_count = if config.paired_ended_mode { 2 } else { 1 };
    let encoding = &config.quality_output_fmt;
    if config.is_acceptable_read(&collapsed) {
        statistics.total_nucleotides += collapsed.len() as u64;
        statistics.total_good_reads += 1;
        if was_trimmed {
            statistics.truncated_collapsed += 1;
            statistics.record_length(ReadType::CollapsedTruncated, collapsed.len());
            out_collapsed_truncated.add_counted(encoding, &collapsed, read_count);
        } else {
            statistics.full_collapsed += 1;
            statistics.record_length(ReadType::Collapsed, collapsed.len());
            out_collapsed.add_counted(encoding, &collapsed, read_count);
        }
    } else {
        statistics.discard1 += 1;
        if config.paired_ended_mode {
            statistics.discard2 += 1;
        }
        statistics.record_length(ReadType::Discarded, collapsed.len());
        out_discarded.add_counted(encoding, &collapsed, read_count);
    }
}

/// Unordered stage trimming single-end reads for one sample.
pub struct SeReadsProcessor {
    config: Arc<UserConfig>,
    adapters: Vec<AdapterPair>,
    statistics: SinkPool<Statistics>,
    nth: usize,
}

impl SeReadsProcessor {
    /// Create the processor for sample `nth`.
    #[must_use]
    pub fn new(config: Arc<UserConfig>, nth: usize) -> Self {
        let adapters = config.adapters.adapter_set(nth);
        let adapter_count = config.adapters.adapter_count();
        Self {
            config,
            adapters,
            statistics: SinkPool::new(move || Statistics::new(adapter_count)),
            nth,
        }
    }

    /// Reduce the per-worker statistics into the sample total.
    #[must_use]
    pub fn final_statistics(&self) -> Statistics {
        self.statistics.reduce(self.config.adapters.adapter_count())
    }
}

impl PipelineStep for SeReadsProcessor {
    fn ordering(&self) -> StepOrdering {
        StepOrdering::Unordered
    }

    fn process(&self, chunk: Chunk) -> Result<Vec<(StepId, Chunk)>> {
        let Chunk::Read(chunk) = chunk else {
            return Err(TrimError::Pipeline("trimmer expected a read chunk".to_string()));
        };

        let config = &*self.config;
        let encoding = &config.quality_output_fmt;
        let mut statistics = self.statistics.acquire();

        let mut out_mate_1 = OutputChunk::new(chunk.eof);
        let mut out_collapsed = OutputChunk::new(chunk.eof);
        let mut out_collapsed_truncated = OutputChunk::new(chunk.eof);
        let mut out_discarded = OutputChunk::new(chunk.eof);

        statistics.records += chunk.reads_1.len() as u64;
        for mut read in chunk.reads_1 {
            let alignment = align_single_ended(&read, &self.adapters, config.shift);

            if config.is_good_alignment(&alignment) {
                truncate_single_ended(&alignment, &mut read);
                statistics.adapter_hits[alignment.adapter_id] += 1;
                statistics.well_aligned_reads += 1;

                if config.is_alignment_collapsible(&alignment) {
                    // A collapsible single-end alignment means the read was
                    // fully contained in the overlap; route it like a
                    // collapsed pair.
                    let collapsed = read;
                    process_collapsed_read(
                        config,
                        &mut statistics,
                        collapsed,
                        &mut out_collapsed,
                        &mut out_collapsed_truncated,
                        &mut out_discarded,
                    );
                    continue;
                }
            } else {
                statistics.unaligned_reads += 1;
            }

            config.trim_sequence_by_quality_if_enabled(&mut read);
            if config.is_acceptable_read(&read) {
                statistics.keep1 += 1;
                statistics.total_good_reads += 1;
                statistics.total_nucleotides += read.len() as u64;
                statistics.record_length(ReadType::Mate1, read.len());
                out_mate_1.add(encoding, &read);
            } else {
                statistics.discard1 += 1;
                statistics.record_length(ReadType::Discarded, read.len());
                out_discarded.add(encoding, &read);
            }
        }

        self.statistics.release(statistics);

        let block = layout::sample_block(self.nth);
        let mut outputs = vec![
            (block + layout::WRITE_MATE_1, Chunk::Output(out_mate_1)),
            (block + layout::WRITE_DISCARDED, Chunk::Output(out_discarded)),
        ];
        if config.collapse {
            outputs.push((block + layout::WRITE_COLLAPSED, Chunk::Output(out_collapsed)));
            outputs.push((
                block + layout::WRITE_COLLAPSED_TRUNCATED,
                Chunk::Output(out_collapsed_truncated),
            ));
        }
        Ok(outputs)
    }
}

/// Unordered stage trimming and optionally collapsing mate pairs for one
/// sample.
pub struct PeReadsProcessor {
    config: Arc<UserConfig>,
    adapters: Vec<AdapterPair>,
    statistics: SinkPool<Statistics>,
    rngs: SinkPool<StdRng>,
    nth: usize,
}

impl PeReadsProcessor {
    /// Create the processor for sample `nth`.
    #[must_use]
    pub fn new(config: Arc<UserConfig>, nth: usize) -> Self {
        let adapters = config.adapters.adapter_set(nth);
        let adapter_count = config.adapters.adapter_count();
        let seed = config.seed;
        Self {
            config,
            adapters,
            statistics: SinkPool::new(move || Statistics::new(adapter_count)),
            rngs: seeded_rng_pool(seed),
            nth,
        }
    }

    /// Reduce the per-worker statistics into the sample total.
    #[must_use]
    pub fn final_statistics(&self) -> Statistics {
        self.statistics.reduce(self.config.adapters.adapter_count())
    }
}

impl PipelineStep for PeReadsProcessor {
    fn ordering(&self) -> StepOrdering {
        StepOrdering::Unordered
    }

    fn process(&self, chunk: Chunk) -> Result<Vec<(StepId, Chunk)>> {
        let Chunk::Read(chunk) = chunk else {
            return Err(TrimError::Pipeline("trimmer expected a read chunk".to_string()));
        };
        if chunk.reads_1.len() != chunk.reads_2.len() {
            return Err(TrimError::Pipeline(
                "paired chunk with unequal mate counts".to_string(),
            ));
        }

        let config = &*self.config;
        let encoding = &config.quality_output_fmt;
        let mut statistics = self.statistics.acquire();
        let mut rng = self.rngs.acquire();

        let mut out_mate_1 = OutputChunk::new(chunk.eof);
        let mut out_mate_2 = OutputChunk::new(chunk.eof);
        let mut out_singleton = OutputChunk::new(chunk.eof);
        let mut out_collapsed = OutputChunk::new(chunk.eof);
        let mut out_collapsed_truncated = OutputChunk::new(chunk.eof);
        let mut out_discarded = OutputChunk::new(chunk.eof);

        statistics.records += chunk.reads_1.len() as u64;
        for (mut read_1, mut read_2) in chunk.reads_1.into_iter().zip(chunk.reads_2) {
            FastqRecord::validate_paired(&read_1, &read_2, config.mate_separator)?;

            // Mate 2 is aligned and trimmed in mate 1 orientation
            read_2.reverse_complement();

            let alignment = align_paired_ended(&read_1, &read_2, &self.adapters, config.shift);

            if config.is_good_alignment(&alignment) {
                statistics.well_aligned_reads += 1;
                let n_adapters = truncate_paired_ended(&alignment, &mut read_1, &mut read_2);
                statistics.adapter_hits[alignment.adapter_id] += n_adapters as u64;

                if config.is_alignment_collapsible(&alignment) {
                    let collapsed = collapse_paired_ended(
                        &alignment,
                        &read_1,
                        &read_2,
                        config.quality_output_fmt.max_score(),
                        &mut rng,
                    );
                    process_collapsed_read(
                        config,
                        &mut statistics,
                        collapsed,
                        &mut out_collapsed,
                        &mut out_collapsed_truncated,
                        &mut out_discarded,
                    );
                    continue;
                }
            } else {
                statistics.unaligned_reads += 1;
            }

            // Not collapsed: restore mate 2 orientation (adapters already
            // truncated) and filter the mates independently.
            read_2.reverse_complement();

            config.trim_sequence_by_quality_if_enabled(&mut read_1);
            config.trim_sequence_by_quality_if_enabled(&mut read_2);
            let acceptable_1 = config.is_acceptable_read(&read_1);
            let acceptable_2 = config.is_acceptable_read(&read_2);

            if acceptable_1 {
                statistics.total_good_reads += 1;
                statistics.total_nucleotides += read_1.len() as u64;
            }
            if acceptable_2 {
                statistics.total_good_reads += 1;
                statistics.total_nucleotides += read_2.len() as u64;
            }

            if acceptable_1 && acceptable_2 {
                statistics.record_length(ReadType::Mate1, read_1.len());
                statistics.record_length(ReadType::Mate2, read_2.len());
                out_mate_1.add(encoding, &read_1);
                if config.interleaved_output {
                    out_mate_1.add(encoding, &read_2);
                } else {
                    out_mate_2.add(encoding, &read_2);
                }
            } else {
                statistics.record_length(
                    if acceptable_1 { ReadType::Singleton } else { ReadType::Discarded },
                    read_1.len(),
                );
                statistics.record_length(
                    if acceptable_2 { ReadType::Singleton } else { ReadType::Discarded },
                    read_2.len(),
                );

                if acceptable_1 {
                    statistics.keep1 += 1;
                    out_singleton.add(encoding, &read_1);
                } else {
                    statistics.discard1 += 1;
                    out_discarded.add(encoding, &read_1);
                }
                if acceptable_2 {
                    statistics.keep2 += 1;
                    out_singleton.add(encoding, &read_2);
                } else {
                    statistics.discard2 += 1;
                    out_discarded.add(encoding, &read_2);
                }
            }
        }

        self.statistics.release(statistics);
        self.rngs.release(rng);

        let block = layout::sample_block(self.nth);
        let mut outputs = vec![(block + layout::WRITE_MATE_1, Chunk::Output(out_mate_1))];
        if !config.interleaved_output {
            outputs.push((block + layout::WRITE_MATE_2, Chunk::Output(out_mate_2)));
        }
        outputs.push((block + layout::WRITE_SINGLETON, Chunk::Output(out_singleton)));
        outputs.push((block + layout::WRITE_DISCARDED, Chunk::Output(out_discarded)));
        if config.collapse {
            outputs.push((block + layout::WRITE_COLLAPSED, Chunk::Output(out_collapsed)));
            outputs.push((
                block + layout::WRITE_COLLAPSED_TRUNCATED,
                Chunk::Output(out_collapsed_truncated),
            ));
        }
        Ok(outputs)
    }
}
