//! Immutable run configuration and the policy helpers built on it.
//!
//! A [`UserConfig`] is validated once, wrapped in an `Arc`, and shared
//! read-only by every pipeline stage. Besides the raw options it hosts the
//! policy functions that combine several of them: alignment acceptance,
//! read acceptance, and conditional quality trimming.

use std::path::PathBuf;

use crate::adapters::AdapterSet;
use crate::alignment::AlignmentInfo;
use crate::encoding::QualityEncoding;
use crate::errors::{Result, TrimError};
use crate::fastq::FastqRecord;
use crate::statistics::Statistics;

/// Classification of an alignment under the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentType {
    /// Usable for trimming (and possibly collapsing)
    Valid,
    /// Overlap found but scoring negative
    Poor,
    /// No usable overlap
    NotAligned,
}

/// Output files produced per sample (or per run, for the demultiplexing
/// channels and reports).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFile {
    /// Accepted mate 1 / single-end reads
    Mate1,
    /// Accepted mate 2 reads
    Mate2,
    /// Accepted reads whose mate was discarded
    Singleton,
    /// Full-length collapsed reads
    Collapsed,
    /// Collapsed reads truncated by quality trimming
    CollapsedTruncated,
    /// Reads failing the filters
    Discarded,
    /// Reads matching no barcode (mate 1)
    Unidentified1,
    /// Reads matching no barcode (mate 2)
    Unidentified2,
    /// Reads matching several barcodes (mate 1)
    Ambiguous1,
    /// Reads matching several barcodes (mate 2)
    Ambiguous2,
    /// Per-sample settings / statistics report
    Settings,
    /// Demultiplexing statistics report
    DemuxStats,
}

/// All user-supplied options, validated and immutable for the run.
#[derive(Debug, Clone)]
pub struct UserConfig {
    /// Prefix for all output files
    pub basename: String,
    /// Mate 1 (or single/interleaved) input file
    pub input_file_1: PathBuf,
    /// Mate 2 input file, for two-file paired-end input
    pub input_file_2: Option<PathBuf>,
    /// Paired-end processing (two files or interleaved)
    pub paired_ended_mode: bool,
    /// Mate pairs alternate within `input_file_1`
    pub interleaved_input: bool,
    /// Write mate 2 reads into the mate 1 stream
    pub interleaved_output: bool,
    /// Character separating read names from mate numbers
    pub mate_separator: u8,
    /// Minimum length of retained reads after trimming
    pub min_genomic_length: usize,
    /// Maximum length of retained reads after trimming
    pub max_genomic_length: usize,
    /// Minimum adapter overlap before trimming single-end reads
    pub min_adapter_overlap: usize,
    /// Minimum overlap before collapsing a pair
    pub min_alignment_length: usize,
    /// Acceptable mismatch rate within an alignment
    pub mismatch_threshold: f64,
    /// Quality encoding of the input files
    pub quality_input_fmt: QualityEncoding,
    /// Quality encoding of the output files
    pub quality_output_fmt: QualityEncoding,
    /// Trim low-quality termini
    pub trim_by_quality: bool,
    /// Highest Phred score considered low quality
    pub low_quality_score: u8,
    /// Trim ambiguous (N) termini
    pub trim_ambiguous_bases: bool,
    /// Maximum N count in a retained read
    pub max_ambiguous_bases: usize,
    /// Collapse overlapping pairs into consensus reads
    pub collapse: bool,
    /// Maximum missing 5' adapter bases allowed during alignment
    pub shift: usize,
    /// Seed for the collapse tie-break RNGs
    pub seed: u64,
    /// Worker thread count
    pub max_threads: usize,
    /// Gzip-compress output files
    pub gzip: bool,
    /// Gzip compression level
    pub gzip_level: u32,
    /// Bzip2-compress output files
    pub bzip2: bool,
    /// Bzip2 compression level
    pub bzip2_level: u32,
    /// Maximum total barcode mismatches
    pub barcode_mm: usize,
    /// Maximum mate 1 barcode mismatches
    pub barcode_mm_r1: usize,
    /// Maximum mate 2 barcode mismatches
    pub barcode_mm_r2: usize,
    /// Adapter sequences and barcode table
    pub adapters: AdapterSet,
}

impl UserConfig {
    /// Check option consistency; called once before any file is opened.
    pub fn validate(&self) -> Result<()> {
        if self.interleaved_input && self.input_file_2.is_some() {
            return Err(TrimError::Config(
                "interleaved input cannot be combined with a second input file".to_string(),
            ));
        }
        if self.paired_ended_mode && !self.interleaved_input && self.input_file_2.is_none() {
            return Err(TrimError::Config(
                "paired-end mode requires a second input file or interleaved input".to_string(),
            ));
        }
        if self.min_genomic_length > self.max_genomic_length {
            return Err(TrimError::Config(format!(
                "minimum genomic length ({}) exceeds maximum ({})",
                self.min_genomic_length, self.max_genomic_length
            )));
        }
        if !(0.0..=1.0).contains(&self.mismatch_threshold) {
            return Err(TrimError::Config(format!(
                "mismatch threshold must be within [0; 1], not {}",
                self.mismatch_threshold
            )));
        }
        if self.gzip && self.bzip2 {
            return Err(TrimError::Config(
                "gzip and bzip2 output compression are mutually exclusive".to_string(),
            ));
        }
        if self.interleaved_output && !self.paired_ended_mode {
            return Err(TrimError::Config(
                "interleaved output requires paired-end input".to_string(),
            ));
        }
        Ok(())
    }

    /// Classify an alignment under the configured thresholds.
    ///
    /// Single-end alignments must additionally reach `min_adapter_overlap`;
    /// short alignments get an absolute mismatch cap on top of the relative
    /// threshold.
    #[must_use]
    pub fn evaluate_alignment(&self, alignment: &AlignmentInfo) -> AlignmentType {
        if alignment.length == 0 {
            return AlignmentType::NotAligned;
        }
        if alignment.score <= 0 {
            return AlignmentType::Poor;
        }
        if !self.paired_ended_mode && alignment.length < self.min_adapter_overlap {
            return AlignmentType::NotAligned;
        }

        let mut max_mismatches = (self.mismatch_threshold * alignment.length as f64) as usize;
        if alignment.length < 6 {
            max_mismatches = max_mismatches.min(1);
        } else if alignment.length < 10 {
            max_mismatches = max_mismatches.min(2);
        }

        if alignment.n_mismatches > max_mismatches {
            AlignmentType::NotAligned
        } else {
            AlignmentType::Valid
        }
    }

    /// True when the alignment is usable for trimming.
    #[must_use]
    pub fn is_good_alignment(&self, alignment: &AlignmentInfo) -> bool {
        self.evaluate_alignment(alignment) == AlignmentType::Valid
    }

    /// True when an alignment additionally qualifies for collapsing.
    #[must_use]
    pub fn is_alignment_collapsible(&self, alignment: &AlignmentInfo) -> bool {
        self.collapse
            && self.is_good_alignment(alignment)
            && alignment.length >= self.min_alignment_length
    }

    /// True when a trimmed read satisfies the length and ambiguity limits.
    #[must_use]
    pub fn is_acceptable_read(&self, read: &FastqRecord) -> bool {
        read.len() >= self.min_genomic_length
            && read.len() <= self.max_genomic_length
            && read.count_ns() <= self.max_ambiguous_bases
    }

    /// Apply the configured terminal trimming, returning the number of
    /// bases removed from each end.
    pub fn trim_sequence_by_quality_if_enabled(&self, read: &mut FastqRecord) -> (usize, usize) {
        if !self.trim_ambiguous_bases && !self.trim_by_quality {
            return (0, 0);
        }
        let low_quality = self.trim_by_quality.then_some(self.low_quality_score);
        read.trim_low_quality_bases(self.trim_ambiguous_bases, low_quality)
    }

    /// Fresh statistics sized for this configuration.
    #[must_use]
    pub fn create_stats(&self) -> Statistics {
        Statistics::new(self.adapters.adapter_count())
    }

    /// Extension of compressed output files, if compression is enabled.
    #[must_use]
    fn compression_extension(&self) -> &'static str {
        if self.gzip {
            ".gz"
        } else if self.bzip2 {
            ".bz2"
        } else {
            ""
        }
    }

    /// Compose the path of an output file for sample `nth`.
    ///
    /// Sample names are included only when demultiplexing; the `pair1` /
    /// `pair2` infixes only in paired-end mode.
    #[must_use]
    pub fn output_filename(&self, file: OutputFile, nth: usize) -> PathBuf {
        let mut name = self.basename.clone();
        if self.adapters.barcode_count() > 0 {
            match file {
                OutputFile::Unidentified1
                | OutputFile::Unidentified2
                | OutputFile::Ambiguous1
                | OutputFile::Ambiguous2
                | OutputFile::DemuxStats => {}
                _ => {
                    name.push('.');
                    name.push_str(self.adapters.sample_name(nth));
                }
            }
        }

        let paired = self.paired_ended_mode;
        let suffix = match file {
            OutputFile::Mate1 if paired => ".pair1.fastq",
            OutputFile::Mate1 => ".fastq",
            OutputFile::Mate2 => ".pair2.fastq",
            OutputFile::Singleton => ".singleton.fastq",
            OutputFile::Collapsed => ".collapsed.fastq",
            OutputFile::CollapsedTruncated => ".collapsed.truncated.fastq",
            OutputFile::Discarded => ".discarded.fastq",
            OutputFile::Unidentified1 if paired => ".unidentified.pair1.fastq",
            OutputFile::Unidentified1 => ".unidentified.fastq",
            OutputFile::Unidentified2 => ".unidentified.pair2.fastq",
            OutputFile::Ambiguous1 if paired => ".ambiguous.pair1.fastq",
            OutputFile::Ambiguous1 => ".ambiguous.fastq",
            OutputFile::Ambiguous2 => ".ambiguous.pair2.fastq",
            OutputFile::Settings => ".settings",
            OutputFile::DemuxStats => ".demux_stats",
        };
        name.push_str(suffix);

        match file {
            OutputFile::Settings | OutputFile::DemuxStats => {}
            _ => name.push_str(self.compression_extension()),
        }

        PathBuf::from(name)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::base_config;
    use super::*;

    fn alignment(score: i32, length: usize, mismatches: usize) -> AlignmentInfo {
        AlignmentInfo { score, length, n_mismatches: mismatches, ..Default::default() }
    }

    #[test]
    fn test_evaluate_alignment_classes() {
        let config = base_config();
        assert_eq!(config.evaluate_alignment(&alignment(0, 0, 0)), AlignmentType::NotAligned);
        assert_eq!(config.evaluate_alignment(&alignment(-4, 8, 4)), AlignmentType::Poor);
        assert_eq!(config.evaluate_alignment(&alignment(12, 12, 0)), AlignmentType::Valid);
    }

    #[test]
    fn test_evaluate_alignment_mismatch_threshold() {
        let mut config = base_config();
        config.mismatch_threshold = 0.0;
        // One mismatch in an 8 bp overlap with threshold 0 is rejected
        assert_eq!(config.evaluate_alignment(&alignment(4, 8, 1)), AlignmentType::NotAligned);
        assert_eq!(config.evaluate_alignment(&alignment(8, 8, 0)), AlignmentType::Valid);
    }

    #[test]
    fn test_evaluate_alignment_short_overlap_caps() {
        let mut config = base_config();
        config.mismatch_threshold = 1.0;
        // Below 6 bases at most one mismatch is allowed regardless
        assert_eq!(config.evaluate_alignment(&alignment(1, 5, 2)), AlignmentType::NotAligned);
        assert_eq!(config.evaluate_alignment(&alignment(2, 5, 1)), AlignmentType::Valid);
        // Below 10 bases at most two
        assert_eq!(config.evaluate_alignment(&alignment(1, 9, 3)), AlignmentType::NotAligned);
        assert_eq!(config.evaluate_alignment(&alignment(3, 9, 2)), AlignmentType::Valid);
        // From 10 bases the relative threshold rules
        assert_eq!(config.evaluate_alignment(&alignment(1, 12, 4)), AlignmentType::Valid);
    }

    #[test]
    fn test_evaluate_alignment_min_overlap_single_end_only() {
        let mut config = base_config();
        config.min_adapter_overlap = 10;
        assert_eq!(config.evaluate_alignment(&alignment(5, 5, 0)), AlignmentType::NotAligned);
        config.paired_ended_mode = true;
        assert_eq!(config.evaluate_alignment(&alignment(5, 5, 0)), AlignmentType::Valid);
    }

    #[test]
    fn test_is_alignment_collapsible() {
        let mut config = base_config();
        config.collapse = true;
        config.min_alignment_length = 11;
        assert!(!config.is_alignment_collapsible(&alignment(10, 10, 0)));
        assert!(config.is_alignment_collapsible(&alignment(11, 11, 0)));
        config.collapse = false;
        assert!(!config.is_alignment_collapsible(&alignment(11, 11, 0)));
    }

    #[test]
    fn test_is_acceptable_read() {
        let mut config = base_config();
        config.min_genomic_length = 4;
        config.max_genomic_length = 6;
        config.max_ambiguous_bases = 1;

        let read = |seq: &[u8]| {
            FastqRecord::new(b"r".to_vec(), seq.to_vec(), vec![30; seq.len()]).unwrap()
        };
        assert!(config.is_acceptable_read(&read(b"ACGT")));
        assert!(!config.is_acceptable_read(&read(b"ACG")));
        assert!(!config.is_acceptable_read(&read(b"ACGTACG")));
        assert!(config.is_acceptable_read(&read(b"ACGN")));
        assert!(!config.is_acceptable_read(&read(b"ANGN")));
    }

    #[test]
    fn test_trim_disabled_is_noop() {
        let config = base_config();
        let mut read =
            FastqRecord::new(b"r".to_vec(), b"NNACGTNN".to_vec(), vec![0; 8]).unwrap();
        assert_eq!(config.trim_sequence_by_quality_if_enabled(&mut read), (0, 0));
        assert_eq!(read.len(), 8);
    }

    #[test]
    fn test_trim_enabled_removes_termini() {
        let mut config = base_config();
        config.trim_ambiguous_bases = true;
        config.trim_by_quality = true;
        config.low_quality_score = 2;
        let mut read = FastqRecord::new(
            b"r".to_vec(),
            b"NAACGTAC".to_vec(),
            vec![30, 30, 30, 30, 30, 30, 2, 2],
        )
        .unwrap();
        assert_eq!(config.trim_sequence_by_quality_if_enabled(&mut read), (1, 2));
        assert_eq!(read.sequence, b"AACGT");
    }

    #[test]
    fn test_validate_rejects_contradictions() {
        let mut config = base_config();
        config.gzip = true;
        config.bzip2 = true;
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.paired_ended_mode = true;
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.min_genomic_length = 100;
        config.max_genomic_length = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_output_filenames_single_sample() {
        let mut config = base_config();
        assert_eq!(config.output_filename(OutputFile::Mate1, 0), PathBuf::from("output.fastq"));
        assert_eq!(
            config.output_filename(OutputFile::Discarded, 0),
            PathBuf::from("output.discarded.fastq")
        );

        config.paired_ended_mode = true;
        config.gzip = true;
        assert_eq!(
            config.output_filename(OutputFile::Mate1, 0),
            PathBuf::from("output.pair1.fastq.gz")
        );
        assert_eq!(
            config.output_filename(OutputFile::CollapsedTruncated, 0),
            PathBuf::from("output.collapsed.truncated.fastq.gz")
        );
        // Reports are never compressed
        assert_eq!(
            config.output_filename(OutputFile::Settings, 0),
            PathBuf::from("output.settings")
        );
    }

    #[test]
    fn test_output_filenames_with_samples() {
        let mut config = base_config();
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("barcodes.txt");
        std::fs::write(&table, "alpha ACGT\nbeta TGCA\n").unwrap();
        config.adapters.load_barcode_list(&table).unwrap();

        assert_eq!(
            config.output_filename(OutputFile::Mate1, 1),
            PathBuf::from("output.beta.fastq")
        );
        assert_eq!(
            config.output_filename(OutputFile::Settings, 0),
            PathBuf::from("output.alpha.settings")
        );
        // Demultiplexing channels are per-run, not per-sample
        assert_eq!(
            config.output_filename(OutputFile::Unidentified1, 0),
            PathBuf::from("output.unidentified.fastq")
        );
        assert_eq!(
            config.output_filename(OutputFile::DemuxStats, 0),
            PathBuf::from("output.demux_stats")
        );
    }
}
