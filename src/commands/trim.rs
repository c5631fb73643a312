//! Trim adapters from FASTQ reads.
//!
//! Assembles and runs the trimming pipeline: reader, optional
//! demultiplexer, per-sample trimmers, optional compressors, and writers,
//! then writes the per-sample settings reports.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use adaptrim_lib::config::{OutputFile, UserConfig};
use adaptrim_lib::demultiplex::{DemultiplexPe, DemultiplexSe};
use adaptrim_lib::fastq_io::{
    Bzip2Compress, GzipCompress, ReadInterleavedFastq, ReadPairedFastq, ReadSingleFastq,
    WriteFastq,
};
use adaptrim_lib::layout;
use adaptrim_lib::processor::{PeReadsProcessor, SeReadsProcessor};
use adaptrim_lib::report;
use adaptrim_lib::scheduler::{PipelineStep, Scheduler, StepId};
use adaptrim_lib::statistics::DemuxStatistics;

use crate::commands::command::Command;
use crate::commands::common::{self, AdapterArgs, InputArgs};

/// Trim adapters from single-end or paired-end FASTQ reads.
#[derive(Debug, Parser)]
#[command(
    name = "trim",
    about = "Trim adapters, filter, collapse, and demultiplex FASTQ reads",
    long_about = "\
Trim adapter sequences from single-end or paired-end FASTQ reads, filter
the results by length and quality, optionally collapse overlapping mate
pairs into consensus reads, and optionally demultiplex samples by barcode.

EXAMPLES:

  # Single-end trimming with quality trimming enabled
  adaptrim trim --file1 reads.fastq.gz --basename out --trimns --trimqualities

  # Paired-end trimming with collapsing and gzipped output
  adaptrim trim --file1 r1.fastq.gz --file2 r2.fastq.gz --collapse --gzip

  # Demultiplexing on a barcode table
  adaptrim trim --file1 r1.fastq --file2 r2.fastq --barcode-list barcodes.txt
"
)]
pub struct Trim {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub adapters: AdapterArgs,

    /// Prefix used for all output files.
    #[arg(long = "basename", value_name = "PREFIX", default_value = "output")]
    pub basename: String,

    /// Write mate 2 reads into the mate 1 output stream.
    #[arg(long = "interleaved-output")]
    pub interleaved_output: bool,

    /// Read and write interleaved paired-end data (shorthand for
    /// --interleaved-input --interleaved-output).
    #[arg(long = "interleaved", conflicts_with = "file2")]
    pub interleaved: bool,

    /// Quality score encoding of the output: 33, 64, or solexa.
    #[arg(long = "qualitybase-output", value_name = "NAME", default_value = "33")]
    pub quality_output: String,

    /// Minimum length of retained reads after trimming.
    #[arg(long = "minlength", value_name = "N", default_value_t = 15)]
    pub min_genomic_length: usize,

    /// Maximum length of retained reads after trimming.
    #[arg(long = "maxlength", value_name = "N", default_value_t = usize::MAX)]
    pub max_genomic_length: usize,

    /// Minimum adapter overlap required before trimming single-end reads.
    #[arg(long = "minadapteroverlap", value_name = "N", default_value_t = 0)]
    pub min_adapter_overlap: usize,

    /// Minimum pair overlap required before collapsing.
    #[arg(long = "minalignmentlength", value_name = "N", default_value_t = 11)]
    pub min_alignment_length: usize,

    /// Trim consecutive Ns from the read termini.
    #[arg(long = "trimns")]
    pub trim_ns: bool,

    /// Maximum number of Ns in retained reads.
    #[arg(long = "maxns", value_name = "N", default_value_t = 1000)]
    pub max_ns: usize,

    /// Trim low-quality bases from the read termini.
    #[arg(long = "trimqualities")]
    pub trim_qualities: bool,

    /// Highest Phred score treated as low quality.
    #[arg(long = "minquality", value_name = "Q", default_value_t = 2)]
    pub min_quality: u8,

    /// Collapse overlapping mate pairs into consensus reads.
    #[arg(long = "collapse")]
    pub collapse: bool,

    /// Seed for the collapse tie-break random number generators; the
    /// current time is used if unset.
    #[arg(long = "seed", value_name = "SEED")]
    pub seed: Option<u64>,

    /// Number of worker threads.
    #[arg(long = "threads", value_name = "N", default_value_t = 1)]
    pub threads: usize,

    /// Gzip-compress the output files.
    #[arg(long = "gzip")]
    pub gzip: bool,

    /// Gzip compression level (1-12).
    #[arg(long = "gzip-level", value_name = "LEVEL", default_value_t = 6)]
    pub gzip_level: u32,

    /// Bzip2-compress the output files.
    #[arg(long = "bzip2", conflicts_with = "gzip")]
    pub bzip2: bool,

    /// Bzip2 compression level (1-9).
    #[arg(long = "bzip2-level", value_name = "LEVEL", default_value_t = 9)]
    pub bzip2_level: u32,

    /// Table of sample barcodes for demultiplexing.
    #[arg(long = "barcode-list", value_name = "FILE")]
    pub barcode_list: Option<PathBuf>,

    /// Maximum total barcode mismatches per read (pair).
    #[arg(long = "barcode-mm", value_name = "N", default_value_t = 0)]
    pub barcode_mm: usize,

    /// Maximum barcode mismatches in mate 1.
    #[arg(long = "barcode-mm-r1", value_name = "N")]
    pub barcode_mm_r1: Option<usize>,

    /// Maximum barcode mismatches in mate 2.
    #[arg(long = "barcode-mm-r2", value_name = "N")]
    pub barcode_mm_r2: Option<usize>,
}

impl Trim {
    fn build_config(&self) -> Result<UserConfig> {
        let paired =
            self.input.file2.is_some() || self.input.interleaved_input || self.interleaved;
        let mut adapters = common::build_adapter_set(&self.adapters, paired)?;
        if let Some(path) = &self.barcode_list {
            adapters.load_barcode_list(path)?;
        }

        let mut config = common::base_config(&self.input, adapters, paired)?;
        config.basename = self.basename.clone();
        config.interleaved_input = self.input.interleaved_input || self.interleaved;
        config.interleaved_output = self.interleaved_output || self.interleaved;
        config.quality_output_fmt = common::parse_encoding(&self.quality_output)?;
        config.min_genomic_length = self.min_genomic_length;
        config.max_genomic_length = self.max_genomic_length;
        config.min_adapter_overlap = self.min_adapter_overlap;
        config.min_alignment_length = self.min_alignment_length;
        config.trim_ambiguous_bases = self.trim_ns;
        config.max_ambiguous_bases = self.max_ns;
        config.trim_by_quality = self.trim_qualities;
        config.low_quality_score = self.min_quality;
        config.collapse = self.collapse;
        config.seed = common::resolve_seed(self.seed);
        config.max_threads = self.threads.max(1);
        config.gzip = self.gzip;
        config.gzip_level = self.gzip_level;
        config.bzip2 = self.bzip2;
        config.bzip2_level = self.bzip2_level;
        config.barcode_mm = self.barcode_mm;
        config.barcode_mm_r1 = self.barcode_mm_r1.unwrap_or(self.barcode_mm);
        config.barcode_mm_r2 = self.barcode_mm_r2.unwrap_or(self.barcode_mm);

        config.validate()?;
        Ok(config)
    }
}

impl Command for Trim {
    fn execute(&self) -> Result<()> {
        let config = Arc::new(self.build_config()?);
        if config.paired_ended_mode {
            run_paired_ended(&config)
        } else {
            run_single_ended(&config)
        }
    }
}

/// Register the writer for one output channel, inserting a compressor
/// stage in front of it when compression is enabled.
fn add_write_step(
    scheduler: &mut Scheduler,
    config: &UserConfig,
    id: StepId,
    name: &str,
    path: &Path,
) -> Result<()> {
    let writer = Arc::new(WriteFastq::create(path)?);
    if config.gzip {
        let compressor = GzipCompress::new(config.gzip_level, id + layout::ZIP_OFFSET)?;
        scheduler.add_step(id, &format!("gzip_{name}"), Arc::new(compressor));
        scheduler.add_step(id + layout::ZIP_OFFSET, &format!("write_{name}"), writer);
    } else if config.bzip2 {
        let compressor = Bzip2Compress::new(config.bzip2_level, id + layout::ZIP_OFFSET)?;
        scheduler.add_step(id, &format!("bzip2_{name}"), Arc::new(compressor));
        scheduler.add_step(id + layout::ZIP_OFFSET, &format!("write_{name}"), writer);
    } else {
        scheduler.add_step(id, &format!("write_{name}"), writer);
    }
    Ok(())
}

/// Register the writers shared by both modes for one sample block.
fn add_sample_write_steps(
    scheduler: &mut Scheduler,
    config: &UserConfig,
    nth: usize,
) -> Result<()> {
    let block = layout::sample_block(nth);
    let sample = config.adapters.sample_name(nth).to_string();

    add_write_step(
        scheduler,
        config,
        block + layout::WRITE_MATE_1,
        &format!("{sample}_mate_1"),
        &config.output_filename(OutputFile::Mate1, nth),
    )?;
    add_write_step(
        scheduler,
        config,
        block + layout::WRITE_DISCARDED,
        &format!("{sample}_discarded"),
        &config.output_filename(OutputFile::Discarded, nth),
    )?;

    if config.collapse {
        add_write_step(
            scheduler,
            config,
            block + layout::WRITE_COLLAPSED,
            &format!("{sample}_collapsed"),
            &config.output_filename(OutputFile::Collapsed, nth),
        )?;
        add_write_step(
            scheduler,
            config,
            block + layout::WRITE_COLLAPSED_TRUNCATED,
            &format!("{sample}_collapsed_truncated"),
            &config.output_filename(OutputFile::CollapsedTruncated, nth),
        )?;
    }

    Ok(())
}

/// Write the demultiplexing report, if demultiplexing ran.
fn write_demux_report(
    config: &UserConfig,
    statistics: Option<DemuxStatistics>,
) -> Result<()> {
    if let Some(statistics) = statistics {
        report::write_demux_report(config, &statistics)?;
    }
    Ok(())
}

fn run_single_ended(config: &Arc<UserConfig>) -> Result<()> {
    info!("Trimming single-end reads ...");

    let mut scheduler = Scheduler::new();
    let demultiplexing = config.adapters.barcode_count() > 0;
    let reader_target = if demultiplexing {
        layout::DEMULTIPLEX
    } else {
        layout::sample_block(0) + layout::TRIM
    };

    scheduler.add_source(
        layout::READ_FASTQ,
        "read_fastq",
        Arc::new(ReadSingleFastq::open(
            &config.input_file_1,
            config.quality_input_fmt.clone(),
            reader_target,
        )?),
    );

    let mut demultiplexer = None;
    if demultiplexing {
        let step = Arc::new(DemultiplexSe::new(Arc::clone(config)));
        scheduler.add_step(layout::DEMULTIPLEX, "demultiplex_se", Arc::clone(&step) as Arc<dyn PipelineStep>);
        demultiplexer = Some(step);

        add_write_step(
            &mut scheduler,
            config,
            layout::UNIDENTIFIED_1,
            "unidentified",
            &config.output_filename(OutputFile::Unidentified1, 0),
        )?;
        add_write_step(
            &mut scheduler,
            config,
            layout::AMBIGUOUS_1,
            "ambiguous",
            &config.output_filename(OutputFile::Ambiguous1, 0),
        )?;
    }

    let mut processors = Vec::new();
    for nth in 0..config.adapters.adapter_set_count() {
        let processor = Arc::new(SeReadsProcessor::new(Arc::clone(config), nth));
        scheduler.add_step(
            layout::sample_block(nth) + layout::TRIM,
            &format!("trim_se_{}", config.adapters.sample_name(nth)),
            Arc::clone(&processor) as Arc<dyn PipelineStep>,
        );
        processors.push(processor);

        add_sample_write_steps(&mut scheduler, config, nth)?;
    }

    scheduler.run(config.max_threads).context("trimming pipeline failed")?;

    for (nth, processor) in processors.iter().enumerate() {
        report::write_trimming_report(config, &processor.final_statistics(), nth)?;
    }
    write_demux_report(config, demultiplexer.map(|demux| demux.statistics()))?;

    info!("Trimming complete");
    Ok(())
}

fn run_paired_ended(config: &Arc<UserConfig>) -> Result<()> {
    info!("Trimming paired-end reads ...");

    let mut scheduler = Scheduler::new();
    let demultiplexing = config.adapters.barcode_count() > 0;
    let reader_target = if demultiplexing {
        layout::DEMULTIPLEX
    } else {
        layout::sample_block(0) + layout::TRIM
    };

    if config.interleaved_input {
        scheduler.add_source(
            layout::READ_FASTQ,
            "read_interleaved_fastq",
            Arc::new(ReadInterleavedFastq::open(
                &config.input_file_1,
                config.quality_input_fmt.clone(),
                reader_target,
            )?),
        );
    } else {
        let input_file_2 = config
            .input_file_2
            .as_ref()
            .expect("two-file paired mode implies a second input file");
        scheduler.add_source(
            layout::READ_FASTQ,
            "read_paired_fastq",
            Arc::new(ReadPairedFastq::open(
                &config.input_file_1,
                input_file_2,
                config.quality_input_fmt.clone(),
                reader_target,
            )?),
        );
    }

    let mut demultiplexer = None;
    if demultiplexing {
        let step = Arc::new(DemultiplexPe::new(Arc::clone(config)));
        scheduler.add_step(layout::DEMULTIPLEX, "demultiplex_pe", Arc::clone(&step) as Arc<dyn PipelineStep>);
        demultiplexer = Some(step);

        add_write_step(
            &mut scheduler,
            config,
            layout::UNIDENTIFIED_1,
            "unidentified_mate_1",
            &config.output_filename(OutputFile::Unidentified1, 0),
        )?;
        add_write_step(
            &mut scheduler,
            config,
            layout::UNIDENTIFIED_2,
            "unidentified_mate_2",
            &config.output_filename(OutputFile::Unidentified2, 0),
        )?;
        add_write_step(
            &mut scheduler,
            config,
            layout::AMBIGUOUS_1,
            "ambiguous_mate_1",
            &config.output_filename(OutputFile::Ambiguous1, 0),
        )?;
        add_write_step(
            &mut scheduler,
            config,
            layout::AMBIGUOUS_2,
            "ambiguous_mate_2",
            &config.output_filename(OutputFile::Ambiguous2, 0),
        )?;
    }

    let mut processors = Vec::new();
    for nth in 0..config.adapters.adapter_set_count() {
        let block = layout::sample_block(nth);
        let sample = config.adapters.sample_name(nth).to_string();

        let processor = Arc::new(PeReadsProcessor::new(Arc::clone(config), nth));
        scheduler.add_step(
            block + layout::TRIM,
            &format!("trim_pe_{sample}"),
            Arc::clone(&processor) as Arc<dyn PipelineStep>,
        );
        processors.push(processor);

        add_sample_write_steps(&mut scheduler, config, nth)?;

        if !config.interleaved_output {
            add_write_step(
                &mut scheduler,
                config,
                block + layout::WRITE_MATE_2,
                &format!("{sample}_mate_2"),
                &config.output_filename(OutputFile::Mate2, nth),
            )?;
        }
        add_write_step(
            &mut scheduler,
            config,
            block + layout::WRITE_SINGLETON,
            &format!("{sample}_singleton"),
            &config.output_filename(OutputFile::Singleton, nth),
        )?;
    }

    scheduler.run(config.max_threads).context("trimming pipeline failed")?;

    for (nth, processor) in processors.iter().enumerate() {
        report::write_trimming_report(config, &processor.final_statistics(), nth)?;
    }
    write_demux_report(config, demultiplexer.map(|demux| demux.statistics()))?;

    info!("Trimming complete");
    Ok(())
}
