//! Paired-end adapter identification.
//!
//! When the adapters used for a library are unknown, they can be inferred
//! from the reads themselves: wherever a mate pair overlaps completely, the
//! bases read past the 3' end of the insert are adapter sequence. This
//! module aligns mate pairs against each other (with no adapter context),
//! collects per-position nucleotide counts of the read-through fragments,
//! and reports a consensus sequence per mate.

use itertools::Itertools;

use crate::adapters::{AdapterPair, reverse_complement};
use crate::alignment::align_paired_ended;
use crate::config::UserConfig;
use crate::errors::{Result, TrimError};
use crate::fastq::FastqRecord;
use crate::fastq_io::FastqParser;
use crate::progress::ProgressTracker;

const NUCLEOTIDES: [u8; 4] = [b'A', b'C', b'G', b'T'];

/// Per-position nucleotide counts over observed adapter fragments.
///
/// # Example
///
/// ```
/// use adaptrim_lib::identify::NucleotideCounts;
///
/// let mut counts = NucleotideCounts::default();
/// counts.add(b"ACGT");
/// counts.add(b"ACGA");
/// counts.add(b"ACG");
///
/// let consensus = counts.consensus();
/// assert_eq!(&consensus.sequence[..3], "ACG");
/// // All three fragments agree on the first three positions
/// assert_eq!(consensus.support[..3], [1.0, 1.0, 1.0]);
/// ```
#[derive(Debug, Default, Clone)]
pub struct NucleotideCounts {
    counts: Vec<[u64; 4]>,
}

impl NucleotideCounts {
    /// Count the bases of one fragment, anchored at position zero.
    /// Ambiguous bases are skipped.
    pub fn add(&mut self, fragment: &[u8]) {
        if self.counts.len() < fragment.len() {
            self.counts.resize(fragment.len(), [0; 4]);
        }
        for (position, &base) in fragment.iter().enumerate() {
            if let Some(index) = NUCLEOTIDES.iter().position(|&n| n == base) {
                self.counts[position][index] += 1;
            }
        }
    }

    /// The consensus sequence with, per position, the fraction of
    /// observations agreeing with the consensus base.
    #[must_use]
    pub fn consensus(&self) -> Consensus {
        let mut sequence = String::new();
        let mut support = Vec::new();
        for row in &self.counts {
            let total: u64 = row.iter().sum();
            if total == 0 {
                break;
            }
            let best = row.iter().position_max().expect("four nucleotide counts");
            sequence.push(char::from(NUCLEOTIDES[best]));
            support.push(row[best] as f64 / total as f64);
        }
        Consensus { sequence, support }
    }
}

/// A consensus adapter call.
#[derive(Debug, Clone, PartialEq)]
pub struct Consensus {
    /// Majority base per position
    pub sequence: String,
    /// Fraction of observations agreeing with the majority, per position
    pub support: Vec<f64>,
}

impl Consensus {
    /// Render the per-position support as a compact digit string: `9` for
    /// >= 90% agreement down to `0`.
    #[must_use]
    pub fn support_digits(&self) -> String {
        self.support
            .iter()
            .map(|&fraction| {
                char::from_digit(((fraction * 10.0) as u32).min(9), 10).expect("single digit")
            })
            .collect()
    }
}

/// Summary of an identification run.
#[derive(Debug)]
pub struct IdentifyResults {
    /// Mate pairs examined
    pub processed: u64,
    /// Pairs with a usable mate-vs-mate alignment
    pub aligned: u64,
    /// Pairs contributing mate 1 adapter sequence
    pub with_adapter1: u64,
    /// Pairs contributing mate 2 adapter sequence
    pub with_adapter2: u64,
    /// Inferred mate 1 adapter
    pub consensus1: Consensus,
    /// Inferred mate 2 adapter
    pub consensus2: Consensus,
}

/// Infer the adapter pair from overlapping mate pairs.
///
/// Reads the configured paired-end input sequentially; this analysis is
/// I/O-bound and needs no worker pool.
///
/// # Example
///
/// ```no_run
/// use adaptrim_lib::identify::identify_adapters;
/// # use adaptrim_lib::adapters::AdapterSet;
/// # use adaptrim_lib::config::UserConfig;
/// # use adaptrim_lib::encoding::QualityEncoding;
///
/// # fn main() -> adaptrim_lib::Result<()> {
/// # let config = UserConfig {
/// #     basename: "out".to_string(),
/// #     input_file_1: "r1.fastq.gz".into(),
/// #     input_file_2: Some("r2.fastq.gz".into()),
/// #     paired_ended_mode: true,
/// #     interleaved_input: false,
/// #     interleaved_output: false,
/// #     mate_separator: b'/',
/// #     min_genomic_length: 15,
/// #     max_genomic_length: usize::MAX,
/// #     min_adapter_overlap: 0,
/// #     min_alignment_length: 11,
/// #     mismatch_threshold: 1.0 / 3.0,
/// #     quality_input_fmt: QualityEncoding::sanger(),
/// #     quality_output_fmt: QualityEncoding::sanger(),
/// #     trim_by_quality: false,
/// #     low_quality_score: 2,
/// #     trim_ambiguous_bases: false,
/// #     max_ambiguous_bases: 1000,
/// #     collapse: false,
/// #     shift: 2,
/// #     seed: 42,
/// #     max_threads: 1,
/// #     gzip: false,
/// #     gzip_level: 6,
/// #     bzip2: false,
/// #     bzip2_level: 9,
/// #     barcode_mm: 0,
/// #     barcode_mm_r1: 0,
/// #     barcode_mm_r2: 0,
/// #     adapters: AdapterSet::new(Vec::new(), Vec::new())?,
/// # };
/// let results = identify_adapters(&config)?;
/// println!("adapter 1 consensus: {}", results.consensus1.sequence);
/// println!("agreement:           {}", results.consensus1.support_digits());
/// # Ok(())
/// # }
/// ```
pub fn identify_adapters(config: &UserConfig) -> Result<IdentifyResults> {
    if !config.paired_ended_mode {
        return Err(TrimError::Config(
            "adapter identification requires paired-end input".to_string(),
        ));
    }

    let mut parser_1 = FastqParser::open(&config.input_file_1, config.quality_input_fmt.clone())?;
    let mut parser_2 = match &config.input_file_2 {
        Some(path) => Some(FastqParser::open(path, config.quality_input_fmt.clone())?),
        None => None,
    };

    // Mate-vs-mate alignment only: a single empty adapter pair.
    let adapters = vec![AdapterPair { adapter1: Vec::new(), adapter2_rc: Vec::new() }];
    let progress = ProgressTracker::new("Processed pairs", 1_000_000);

    let mut counts_1 = NucleotideCounts::default();
    let mut counts_2 = NucleotideCounts::default();
    let mut results = IdentifyResults {
        processed: 0,
        aligned: 0,
        with_adapter1: 0,
        with_adapter2: 0,
        consensus1: Consensus { sequence: String::new(), support: Vec::new() },
        consensus2: Consensus { sequence: String::new(), support: Vec::new() },
    };

    loop {
        let (read_1, read_2) = match &mut parser_2 {
            Some(parser_2) => match (parser_1.next_record()?, parser_2.next_record()?) {
                (Some(read_1), Some(read_2)) => (read_1, read_2),
                (None, None) => break,
                _ => {
                    return Err(TrimError::FastqFormat {
                        file: config.input_file_1.display().to_string(),
                        record: parser_1.records_read(),
                        reason: "paired input files contain unequal numbers of records"
                            .to_string(),
                    });
                }
            },
            None => match parser_1.next_record()? {
                Some(read_1) => {
                    let Some(read_2) = parser_1.next_record()? else {
                        return Err(TrimError::FastqFormat {
                            file: config.input_file_1.display().to_string(),
                            record: parser_1.records_read(),
                            reason: "interleaved input contains an odd number of records"
                                .to_string(),
                        });
                    };
                    (read_1, read_2)
                }
                None => break,
            },
        };

        FastqRecord::validate_paired(&read_1, &read_2, config.mate_separator)?;
        results.processed += 1;
        progress.add(1);

        let mut read_2 = read_2;
        read_2.reverse_complement();

        // With no adapter context, negative offsets (short inserts, the
        // pairs that carry adapter) are only reachable through the shift;
        // span the whole mate so every relative placement is tried.
        let alignment = align_paired_ended(&read_1, &read_2, &adapters, read_2.len());
        if !config.is_good_alignment(&alignment) {
            continue;
        }
        results.aligned += 1;

        // Bases past the insert on mate 1 are the mate 1 adapter.
        let insert_size = (alignment.offset + read_2.len() as isize).max(0) as usize;
        if insert_size < read_1.len() {
            results.with_adapter1 += 1;
            counts_1.add(&read_1.sequence[insert_size..]);
        }

        // The bases preceding the insert on reverse-complemented mate 2
        // are the reverse complement of the mate 2 adapter.
        if alignment.offset < 0 {
            let adapter_len = ((-alignment.offset) as usize).min(read_2.len());
            results.with_adapter2 += 1;
            counts_2.add(&reverse_complement(&read_2.sequence[..adapter_len]));
        }
    }

    progress.finish();
    results.consensus1 = counts_1.consensus();
    results.consensus2 = counts_2.consensus();
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::base_config;
    use std::io::Write;

    #[test]
    fn test_nucleotide_counts_consensus() {
        let mut counts = NucleotideCounts::default();
        counts.add(b"ACGT");
        counts.add(b"ACGA");
        counts.add(b"ACG");

        let consensus = counts.consensus();
        assert_eq!(&consensus.sequence[..3], "ACG");
        assert_eq!(consensus.support[..3], [1.0, 1.0, 1.0]);
        // Position 3 saw T and A once each; either call has support 0.5
        assert!((consensus.support[3] - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_consensus_skips_ambiguous_bases() {
        let mut counts = NucleotideCounts::default();
        counts.add(b"ANT");
        counts.add(b"AGT");
        let consensus = counts.consensus();
        assert_eq!(consensus.sequence, "AGT");
        assert_eq!(consensus.support[1], 1.0);
    }

    #[test]
    fn test_support_digits() {
        let consensus = Consensus {
            sequence: "ACG".to_string(),
            support: vec![1.0, 0.95, 0.42],
        };
        assert_eq!(consensus.support_digits(), "994");
    }

    /// Write a paired library whose 20 bp inserts are fully read through
    /// into known adapters, then check that they are recovered.
    #[test]
    fn test_identify_recovers_adapters() {
        let adapter1: &[u8] = b"AGATCGGAAGAGC";
        let adapter2: &[u8] = b"GTGTAGATCTCGG";
        let inserts: [&[u8]; 3] = [
            b"ACGTGCATTGCAAGGCTTAG",
            b"TTGACCGGTAGGCCATTGCA",
            b"GCATCATCGGTACGATCCGA",
        ];

        let dir = tempfile::tempdir().unwrap();
        let path_1 = dir.path().join("r1.fastq");
        let path_2 = dir.path().join("r2.fastq");
        let mut file_1 = std::fs::File::create(&path_1).unwrap();
        let mut file_2 = std::fs::File::create(&path_2).unwrap();

        for (index, insert) in inserts.iter().enumerate() {
            // 30 bp reads over a 20 bp insert: ten adapter bases per mate
            let mut seq_1 = insert.to_vec();
            seq_1.extend_from_slice(adapter1);
            seq_1.truncate(30);

            let mut seq_2 = reverse_complement(insert);
            seq_2.extend_from_slice(adapter2);
            seq_2.truncate(30);

            let quals = "I".repeat(30);
            writeln!(
                file_1,
                "@frag_{index}/1\n{}\n+\n{quals}",
                String::from_utf8_lossy(&seq_1)
            )
            .unwrap();
            writeln!(
                file_2,
                "@frag_{index}/2\n{}\n+\n{quals}",
                String::from_utf8_lossy(&seq_2)
            )
            .unwrap();
        }
        drop(file_1);
        drop(file_2);

        let mut config = base_config();
        config.paired_ended_mode = true;
        config.input_file_1 = path_1;
        config.input_file_2 = Some(path_2);

        let results = identify_adapters(&config).unwrap();
        assert_eq!(results.processed, 3);
        assert_eq!(results.aligned, 3);
        assert_eq!(results.with_adapter1, 3);
        assert_eq!(results.with_adapter2, 3);
        assert_eq!(results.consensus1.sequence.as_bytes(), &adapter1[..10]);
        assert_eq!(results.consensus2.sequence.as_bytes(), &adapter2[..10]);
        assert!(results.consensus1.support.iter().all(|&s| s == 1.0));
    }
}
