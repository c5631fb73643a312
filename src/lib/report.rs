//! Settings and statistics reports.
//!
//! One `.settings` text file is written per sample, containing the tool
//! version, the input mode, the effective parameters, the trimming
//! statistics, and a length-distribution table; a `.demux_stats` file is
//! added when demultiplexing, listing per-barcode counts and fractions.

use std::fs::File;
use std::io::{self, BufWriter, Write};

use crate::config::{OutputFile, UserConfig};
use crate::errors::{Result, TrimError};
use crate::statistics::{DemuxStatistics, ReadType, Statistics};

/// Tool name printed at the top of every report.
pub const NAME: &str = "adaptrim";
/// Tool version printed at the top of every report.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Write the shared settings header.
///
/// `nth` selects the sample whose adapter view is printed; `None` prints
/// the raw adapters and the full sample table (used by the demultiplexing
/// report).
fn write_settings(config: &UserConfig, out: &mut dyn Write, nth: Option<usize>) -> io::Result<()> {
    write!(out, "{NAME} {VERSION}\nTrimming of ")?;

    if config.adapters.barcode_count() > 0 {
        let double_indexed =
            config.adapters.samples().iter().any(|sample| !sample.barcode2.is_empty());
        write!(out, "{} ", if double_indexed { "double-indexed" } else { "single-indexed" })?;
    }
    if config.paired_ended_mode {
        if config.interleaved_input {
            write!(out, "interleaved ")?;
        }
        writeln!(out, "paired-end reads")?;
    } else {
        writeln!(out, "single-end reads")?;
    }

    if config.adapters.barcode_count() > 0 {
        writeln!(out, "\n\n[Demultiplexing]")?;
        writeln!(out, "Maximum mismatches (total): {}", config.barcode_mm)?;
        if config.paired_ended_mode {
            writeln!(out, "Maximum mate 1 mismatches: {}", config.barcode_mm_r1)?;
            writeln!(out, "Maximum mate 2 mismatches: {}", config.barcode_mm_r2)?;
        }

        writeln!(out, "\n\n[Demultiplexing samples]")?;
        writeln!(out, "Name\tBarcode_1\tBarcode_2")?;
        for (index, sample) in config.adapters.samples().iter().enumerate() {
            let marker = if Some(index) == nth { "*" } else { "" };
            let barcode2 = if sample.barcode2.is_empty() {
                "*".to_string()
            } else {
                String::from_utf8_lossy(&sample.barcode2).into_owned()
            };
            writeln!(
                out,
                "{}{marker}\t{}\t{barcode2}",
                sample.name,
                String::from_utf8_lossy(&sample.barcode1)
            )?;
        }
    }

    writeln!(out, "\n[Adapter sequences]")?;
    if let Some(nth) = nth {
        for (id, (adapter1, adapter2)) in config.adapters.pretty_adapters(nth).iter().enumerate() {
            writeln!(out, "Adapter1[{}]: {adapter1}", id + 1)?;
            if config.paired_ended_mode {
                writeln!(out, "Adapter2[{}]: {adapter2}", id + 1)?;
            }
        }
    } else {
        for (id, (adapter1, adapter2)) in config.adapters.raw_adapters().iter().enumerate() {
            writeln!(out, "Adapter1[{}]: {}", id + 1, String::from_utf8_lossy(adapter1))?;
            if config.paired_ended_mode {
                writeln!(out, "Adapter2[{}]: {}", id + 1, String::from_utf8_lossy(adapter2))?;
            }
        }
    }

    writeln!(out, "\n[Adapter trimming]")?;
    // The per-worker RNG assignment is scheduling-dependent, so the seed
    // only pins down the output for single-threaded runs.
    if config.max_threads > 1 {
        writeln!(out, "RNG seed: NA")?;
    } else {
        writeln!(out, "RNG seed: {}", config.seed)?;
    }
    writeln!(out, "Alignment shift value: {}", config.shift)?;
    writeln!(out, "Global mismatch threshold: {}", config.mismatch_threshold)?;
    writeln!(out, "Quality format (input): {}", config.quality_input_fmt.name())?;
    writeln!(out, "Quality score max (input): {}", config.quality_input_fmt.max_score())?;
    writeln!(out, "Quality format (output): {}", config.quality_output_fmt.name())?;
    writeln!(out, "Quality score max (output): {}", config.quality_output_fmt.max_score())?;
    writeln!(out, "Mate-number separator (input): '{}'", char::from(config.mate_separator))?;
    writeln!(out, "Trimming Ns: {}", if config.trim_ambiguous_bases { "Yes" } else { "No" })?;
    writeln!(
        out,
        "Trimming Phred scores <= {}: {}",
        config.low_quality_score,
        if config.trim_by_quality { "Yes" } else { "No" }
    )?;
    writeln!(out, "Minimum genomic length: {}", config.min_genomic_length)?;
    writeln!(out, "Maximum genomic length: {}", config.max_genomic_length)?;
    writeln!(out, "Collapse overlapping reads: {}", if config.collapse { "Yes" } else { "No" })?;
    writeln!(out, "Minimum overlap (in case of collapse): {}", config.min_alignment_length)?;
    if !config.paired_ended_mode {
        writeln!(out, "Minimum adapter overlap: {}", config.min_adapter_overlap)?;
    }

    Ok(())
}

/// Write the trimming statistics and length distribution for one sample.
fn write_trimming_statistics(
    config: &UserConfig,
    statistics: &Statistics,
    out: &mut dyn Write,
) -> io::Result<()> {
    let reads_type = if config.paired_ended_mode { "read pairs" } else { "reads" };

    writeln!(out, "\n\n[Trimming statistics]")?;
    writeln!(out, "Total number of {reads_type}: {}", statistics.records)?;
    writeln!(out, "Number of unaligned {reads_type}: {}", statistics.unaligned_reads)?;
    writeln!(out, "Number of well aligned {reads_type}: {}", statistics.well_aligned_reads)?;
    writeln!(out, "Number of discarded mate 1 reads: {}", statistics.discard1)?;
    writeln!(out, "Number of singleton mate 1 reads: {}", statistics.keep1)?;
    if config.paired_ended_mode {
        writeln!(out, "Number of discarded mate 2 reads: {}", statistics.discard2)?;
        writeln!(out, "Number of singleton mate 2 reads: {}", statistics.keep2)?;
    }

    for (adapter_id, count) in statistics.adapter_hits.iter().enumerate() {
        writeln!(out, "Number of {reads_type} with adapters[{}]: {count}", adapter_id + 1)?;
    }

    if config.collapse {
        writeln!(out, "Number of full-length collapsed pairs: {}", statistics.full_collapsed)?;
        writeln!(out, "Number of truncated collapsed pairs: {}", statistics.truncated_collapsed)?;
    }

    writeln!(out, "Number of retained reads: {}", statistics.total_good_reads)?;
    writeln!(out, "Number of retained nucleotides: {}", statistics.total_nucleotides)?;
    let mean_length = if statistics.total_good_reads > 0 {
        statistics.total_nucleotides as f64 / statistics.total_good_reads as f64
    } else {
        0.0
    };
    writeln!(out, "Average read length of retained reads: {mean_length}")?;

    writeln!(out, "\n\n[Length distribution]")?;
    write!(out, "Length\tMate1\t")?;
    if config.paired_ended_mode {
        write!(out, "Mate2\tSingleton\t")?;
    }
    if config.collapse {
        write!(out, "Collapsed\tCollapsedTruncated\t")?;
    }
    writeln!(out, "Discarded\tAll")?;

    for (length, row) in statistics.read_lengths().iter().enumerate() {
        let total: u64 = row.iter().sum();
        write!(out, "{length}\t{}\t", row[ReadType::Mate1.index()])?;
        if config.paired_ended_mode {
            write!(out, "{}\t{}\t", row[ReadType::Mate2.index()], row[ReadType::Singleton.index()])?;
        }
        if config.collapse {
            write!(
                out,
                "{}\t{}\t",
                row[ReadType::Collapsed.index()],
                row[ReadType::CollapsedTruncated.index()]
            )?;
        }
        writeln!(out, "{}\t{total}", row[ReadType::Discarded.index()])?;
    }

    Ok(())
}

/// Write the `.settings` report for sample `nth`.
pub fn write_trimming_report(
    config: &UserConfig,
    statistics: &Statistics,
    nth: usize,
) -> Result<()> {
    let path = config.output_filename(OutputFile::Settings, nth);
    let file = File::create(&path).map_err(|e| TrimError::io(&path, e))?;
    let mut out = BufWriter::new(file);

    write_settings(config, &mut out, Some(nth))
        .and_then(|()| write_trimming_statistics(config, statistics, &mut out))
        .and_then(|()| out.flush())
        .map_err(|e| TrimError::io(&path, e))
}

/// Write the `.demux_stats` report.
pub fn write_demux_report(config: &UserConfig, statistics: &DemuxStatistics) -> Result<()> {
    let path = config.output_filename(OutputFile::DemuxStats, 0);
    let file = File::create(&path).map_err(|e| TrimError::io(&path, e))?;
    let mut out = BufWriter::new(file);

    let write = |out: &mut BufWriter<File>| -> io::Result<()> {
        write_settings(config, out, None)?;

        let total = statistics.total().max(1) as f64;
        writeln!(out, "\n\n[Demultiplexing statistics]")?;
        writeln!(out, "Name\tBarcode_1\tBarcode_2\tHits\tFraction")?;
        writeln!(
            out,
            "unidentified\tNA\tNA\t{}\t{:.3}",
            statistics.unidentified,
            statistics.unidentified as f64 / total
        )?;
        writeln!(
            out,
            "ambiguous\tNA\tNA\t{}\t{:.3}",
            statistics.ambiguous,
            statistics.ambiguous as f64 / total
        )?;

        for (sample, hits) in config.adapters.samples().iter().zip(&statistics.barcodes) {
            let barcode2 = if sample.barcode2.is_empty() {
                "*".to_string()
            } else {
                String::from_utf8_lossy(&sample.barcode2).into_owned()
            };
            writeln!(
                out,
                "{}\t{}\t{barcode2}\t{hits}\t{:.3}",
                sample.name,
                String::from_utf8_lossy(&sample.barcode1),
                *hits as f64 / total
            )?;
        }

        writeln!(out, "*\t*\t*\t{}\t{:.3}", statistics.total(), 1.0)?;
        out.flush()
    };

    write(&mut out).map_err(|e| TrimError::io(&path, e))
}
