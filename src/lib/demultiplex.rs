//! Barcode demultiplexing stages.
//!
//! Each read (or mate pair) is classified by Hamming-matching its leading
//! bases against the barcode table: attributed to the unique best sample
//! within the mismatch thresholds, or routed to the `unidentified` /
//! `ambiguous` channels, which never enter a per-sample trimmer. Matched
//! reads have their barcode prefix stripped before being forwarded.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::chunks::{Chunk, OutputChunk, ReadChunk};
use crate::config::UserConfig;
use crate::errors::{Result, TrimError};
use crate::fastq::FastqRecord;
use crate::layout;
use crate::scheduler::{PipelineStep, StepId, StepOrdering};
use crate::statistics::DemuxStatistics;

/// Outcome of matching one read (or pair) against the barcode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BarcodeMatch {
    /// No sample within the mismatch thresholds
    Unidentified,
    /// Two or more samples tied for the minimum distance
    Ambiguous,
    /// The unique best sample
    Sample(usize),
}

/// Hamming distance between a barcode and the read prefix; `None` when the
/// read is too short to carry the barcode. N bases count as mismatches.
fn barcode_distance(read: &FastqRecord, barcode: &[u8]) -> Option<usize> {
    if read.len() < barcode.len() {
        return None;
    }
    Some(
        read.sequence[..barcode.len()]
            .iter()
            .zip(barcode)
            .filter(|(a, b)| a != b)
            .count(),
    )
}

/// The barcode table with its matching thresholds.
struct BarcodeClassifier {
    barcodes: Vec<(Vec<u8>, Vec<u8>)>,
    barcode_mm: usize,
    barcode_mm_r1: usize,
    barcode_mm_r2: usize,
}

impl BarcodeClassifier {
    fn new(config: &UserConfig) -> Self {
        Self {
            barcodes: config
                .adapters
                .samples()
                .iter()
                .map(|sample| (sample.barcode1.clone(), sample.barcode2.clone()))
                .collect(),
            barcode_mm: config.barcode_mm,
            barcode_mm_r1: config.barcode_mm_r1,
            barcode_mm_r2: config.barcode_mm_r2,
        }
    }

    fn classify(&self, read_1: &FastqRecord, read_2: Option<&FastqRecord>) -> BarcodeMatch {
        let mut best_distance = usize::MAX;
        let mut best_sample = 0;
        let mut ties = 0;

        for (nth, (barcode1, barcode2)) in self.barcodes.iter().enumerate() {
            let Some(distance_1) = barcode_distance(read_1, barcode1) else { continue };

            let distance_2 = if barcode2.is_empty() {
                0
            } else {
                let Some(read_2) = read_2 else { continue };
                let Some(distance) = barcode_distance(read_2, barcode2) else { continue };
                distance
            };

            let total = distance_1 + distance_2;
            if total > self.barcode_mm
                || distance_1 > self.barcode_mm_r1
                || distance_2 > self.barcode_mm_r2
            {
                continue;
            }

            if total < best_distance {
                best_distance = total;
                best_sample = nth;
                ties = 1;
            } else if total == best_distance {
                ties += 1;
            }
        }

        match ties {
            0 => BarcodeMatch::Unidentified,
            1 => BarcodeMatch::Sample(best_sample),
            _ => BarcodeMatch::Ambiguous,
        }
    }

    /// Barcode lengths for sample `nth`.
    fn barcode_lengths(&self, nth: usize) -> (usize, usize) {
        let (barcode1, barcode2) = &self.barcodes[nth];
        (barcode1.len(), barcode2.len())
    }
}

/// Ordered stage demultiplexing single-end reads.
pub struct DemultiplexSe {
    config: Arc<UserConfig>,
    classifier: BarcodeClassifier,
    statistics: Mutex<DemuxStatistics>,
}

impl DemultiplexSe {
    /// Create the stage from the run configuration.
    #[must_use]
    pub fn new(config: Arc<UserConfig>) -> Self {
        let classifier = BarcodeClassifier::new(&config);
        let statistics = Mutex::new(DemuxStatistics::new(config.adapters.barcode_count()));
        Self { config, classifier, statistics }
    }

    /// Snapshot of the demultiplexing counters.
    #[must_use]
    pub fn statistics(&self) -> DemuxStatistics {
        self.statistics.lock().clone()
    }
}

impl PipelineStep for DemultiplexSe {
    fn ordering(&self) -> StepOrdering {
        StepOrdering::Ordered
    }

    fn process(&self, chunk: Chunk) -> Result<Vec<(StepId, Chunk)>> {
        let Chunk::Read(chunk) = chunk else {
            return Err(TrimError::Pipeline("demultiplexer expected a read chunk".to_string()));
        };

        let sample_count = self.classifier.barcodes.len();
        let mut per_sample: Vec<ReadChunk> =
            (0..sample_count).map(|_| ReadChunk::new(chunk.eof)).collect();
        let mut unidentified = OutputChunk::new(chunk.eof);
        let mut ambiguous = OutputChunk::new(chunk.eof);

        let encoding = &self.config.quality_output_fmt;
        let mut statistics = self.statistics.lock();
        for mut read in chunk.reads_1 {
            match self.classifier.classify(&read, None) {
                BarcodeMatch::Unidentified => {
                    statistics.unidentified += 1;
                    unidentified.add(encoding, &read);
                }
                BarcodeMatch::Ambiguous => {
                    statistics.ambiguous += 1;
                    ambiguous.add(encoding, &read);
                }
                BarcodeMatch::Sample(nth) => {
                    statistics.barcodes[nth] += 1;
                    let (barcode_len, _) = self.classifier.barcode_lengths(nth);
                    read.truncate(barcode_len, read.len() - barcode_len);
                    per_sample[nth].reads_1.push(read);
                }
            }
        }
        drop(statistics);

        let mut outputs: Vec<(StepId, Chunk)> = per_sample
            .into_iter()
            .enumerate()
            .map(|(nth, chunk)| (layout::sample_block(nth) + layout::TRIM, Chunk::Read(chunk)))
            .collect();
        outputs.push((layout::UNIDENTIFIED_1, Chunk::Output(unidentified)));
        outputs.push((layout::AMBIGUOUS_1, Chunk::Output(ambiguous)));
        Ok(outputs)
    }
}

/// Ordered stage demultiplexing mate pairs.
pub struct DemultiplexPe {
    config: Arc<UserConfig>,
    classifier: BarcodeClassifier,
    statistics: Mutex<DemuxStatistics>,
}

impl DemultiplexPe {
    /// Create the stage from the run configuration.
    #[must_use]
    pub fn new(config: Arc<UserConfig>) -> Self {
        let classifier = BarcodeClassifier::new(&config);
        let statistics = Mutex::new(DemuxStatistics::new(config.adapters.barcode_count()));
        Self { config, classifier, statistics }
    }

    /// Snapshot of the demultiplexing counters.
    #[must_use]
    pub fn statistics(&self) -> DemuxStatistics {
        self.statistics.lock().clone()
    }
}

impl PipelineStep for DemultiplexPe {
    fn ordering(&self) -> StepOrdering {
        StepOrdering::Ordered
    }

    fn process(&self, chunk: Chunk) -> Result<Vec<(StepId, Chunk)>> {
        let Chunk::Read(chunk) = chunk else {
            return Err(TrimError::Pipeline("demultiplexer expected a read chunk".to_string()));
        };
        if chunk.reads_1.len() != chunk.reads_2.len() {
            return Err(TrimError::Pipeline(
                "paired chunk with unequal mate counts".to_string(),
            ));
        }

        let sample_count = self.classifier.barcodes.len();
        let mut per_sample: Vec<ReadChunk> =
            (0..sample_count).map(|_| ReadChunk::new(chunk.eof)).collect();
        let mut unidentified_1 = OutputChunk::new(chunk.eof);
        let mut unidentified_2 = OutputChunk::new(chunk.eof);
        let mut ambiguous_1 = OutputChunk::new(chunk.eof);
        let mut ambiguous_2 = OutputChunk::new(chunk.eof);

        let encoding = &self.config.quality_output_fmt;
        let mut statistics = self.statistics.lock();
        for (mut read_1, mut read_2) in chunk.reads_1.into_iter().zip(chunk.reads_2) {
            match self.classifier.classify(&read_1, Some(&read_2)) {
                BarcodeMatch::Unidentified => {
                    statistics.unidentified += 1;
                    unidentified_1.add(encoding, &read_1);
                    unidentified_2.add(encoding, &read_2);
                }
                BarcodeMatch::Ambiguous => {
                    statistics.ambiguous += 1;
                    ambiguous_1.add(encoding, &read_1);
                    ambiguous_2.add(encoding, &read_2);
                }
                BarcodeMatch::Sample(nth) => {
                    statistics.barcodes[nth] += 1;
                    let (barcode1_len, barcode2_len) = self.classifier.barcode_lengths(nth);
                    read_1.truncate(barcode1_len, read_1.len() - barcode1_len);
                    if barcode2_len > 0 {
                        read_2.truncate(barcode2_len, read_2.len() - barcode2_len);
                    }
                    per_sample[nth].reads_1.push(read_1);
                    per_sample[nth].reads_2.push(read_2);
                }
            }
        }
        drop(statistics);

        let mut outputs: Vec<(StepId, Chunk)> = per_sample
            .into_iter()
            .enumerate()
            .map(|(nth, chunk)| (layout::sample_block(nth) + layout::TRIM, Chunk::Read(chunk)))
            .collect();
        outputs.push((layout::UNIDENTIFIED_1, Chunk::Output(unidentified_1)));
        outputs.push((layout::UNIDENTIFIED_2, Chunk::Output(unidentified_2)));
        outputs.push((layout::AMBIGUOUS_1, Chunk::Output(ambiguous_1)));
        outputs.push((layout::AMBIGUOUS_2, Chunk::Output(ambiguous_2)));
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::base_config;

    fn read(seq: &[u8]) -> FastqRecord {
        FastqRecord::new(b"r/1".to_vec(), seq.to_vec(), vec![30; seq.len()]).unwrap()
    }

    fn demux_config(rows: &str, barcode_mm: usize) -> Arc<UserConfig> {
        let mut config = base_config();
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("barcodes.txt");
        std::fs::write(&table, rows).unwrap();
        config.adapters.load_barcode_list(&table).unwrap();
        config.barcode_mm = barcode_mm;
        config.barcode_mm_r1 = barcode_mm;
        config.barcode_mm_r2 = barcode_mm;
        Arc::new(config)
    }

    #[test]
    fn test_exact_match_wins_over_near_match() {
        // Barcodes ACGT and ACGA with one mismatch allowed: a read starting
        // ACGT is distance 0 vs 1, a unique minimum.
        let config = demux_config("first ACGT\nsecond ACGA\n", 1);
        let demux = DemultiplexSe::new(Arc::clone(&config));

        let outputs = demux
            .process(Chunk::Read(ReadChunk {
                eof: true,
                reads_1: vec![read(b"ACGTAACCGGTT")],
                reads_2: Vec::new(),
            }))
            .unwrap();

        // Prefix stripped, routed to the first sample's trimmer
        let (target, Chunk::Read(chunk)) = &outputs[0] else { panic!("expected read chunk") };
        assert_eq!(*target, layout::sample_block(0) + layout::TRIM);
        assert_eq!(chunk.reads_1[0].sequence, b"AACCGGTT");

        let statistics = demux.statistics();
        assert_eq!(statistics.barcodes, vec![1, 0]);
        assert_eq!(statistics.ambiguous, 0);
        assert_eq!(statistics.unidentified, 0);
    }

    #[test]
    fn test_tied_distance_is_ambiguous() {
        let config = demux_config("first ACGT\nsecond ACGA\n", 1);
        let demux = DemultiplexSe::new(Arc::clone(&config));

        // ACGC: distance 1 to ACGT, distance 1 to ACGA
        demux
            .process(Chunk::Read(ReadChunk {
                eof: true,
                reads_1: vec![read(b"ACGCAACC")],
                reads_2: Vec::new(),
            }))
            .unwrap();

        let statistics = demux.statistics();
        assert_eq!(statistics.ambiguous, 1);
        assert_eq!(statistics.barcodes, vec![0, 0]);
    }

    #[test]
    fn test_no_match_is_unidentified() {
        let config = demux_config("first ACGT\nsecond ACGA\n", 0);
        let demux = DemultiplexSe::new(Arc::clone(&config));

        demux
            .process(Chunk::Read(ReadChunk {
                eof: true,
                reads_1: vec![read(b"TTTTAACC")],
                reads_2: Vec::new(),
            }))
            .unwrap();

        let statistics = demux.statistics();
        assert_eq!(statistics.unidentified, 1);
    }

    #[test]
    fn test_read_shorter_than_barcode_is_unidentified() {
        let config = demux_config("first ACGTACGT\n", 1);
        let demux = DemultiplexSe::new(Arc::clone(&config));
        demux
            .process(Chunk::Read(ReadChunk {
                eof: true,
                reads_1: vec![read(b"ACG")],
                reads_2: Vec::new(),
            }))
            .unwrap();
        assert_eq!(demux.statistics().unidentified, 1);
    }

    #[test]
    fn test_paired_double_index_strips_both_barcodes() {
        let mut rows = String::new();
        rows.push_str("first ACGT TTAA\n");
        rows.push_str("second TGCA CCGG\n");
        let config = demux_config(&rows, 0);
        let mut config = (*config).clone();
        config.paired_ended_mode = true;
        let config = Arc::new(config);
        let demux = DemultiplexPe::new(Arc::clone(&config));

        let outputs = demux
            .process(Chunk::Read(ReadChunk {
                eof: true,
                reads_1: vec![read(b"TGCAAAAA")],
                reads_2: vec![read(b"CCGGTTTT")],
            }))
            .unwrap();

        let (target, Chunk::Read(chunk)) = &outputs[1] else { panic!("expected read chunk") };
        assert_eq!(*target, layout::sample_block(1) + layout::TRIM);
        assert_eq!(chunk.reads_1[0].sequence, b"AAAA");
        assert_eq!(chunk.reads_2[0].sequence, b"TTTT");
        assert_eq!(demux.statistics().barcodes, vec![0, 1]);
    }

    #[test]
    fn test_every_channel_emitted_every_chunk() {
        let config = demux_config("first ACGT\nsecond ACGA\n", 1);
        let demux = DemultiplexSe::new(Arc::clone(&config));
        let outputs = demux
            .process(Chunk::Read(ReadChunk::new(true)))
            .unwrap();
        // Two sample channels plus unidentified and ambiguous, all eof
        assert_eq!(outputs.len(), 4);
        assert!(outputs.iter().all(|(_, chunk)| chunk.eof()));
    }

    #[test]
    fn test_mismatch_in_mate2_counts_against_totals() {
        let rows = "only ACGT TTAA\n";
        let config = demux_config(rows, 1);
        let mut config = (*config).clone();
        config.paired_ended_mode = true;
        config.barcode_mm = 1;
        config.barcode_mm_r1 = 1;
        config.barcode_mm_r2 = 0;
        let config = Arc::new(config);
        let demux = DemultiplexPe::new(Arc::clone(&config));

        // One mismatch in mate 2 exceeds barcode_mm_r2 = 0
        demux
            .process(Chunk::Read(ReadChunk {
                eof: true,
                reads_1: vec![read(b"ACGTAAAA")],
                reads_2: vec![read(b"TTTATTTT")],
            }))
            .unwrap();
        assert_eq!(demux.statistics().unidentified, 1);
    }
}
