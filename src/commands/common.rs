//! Argument groups and config assembly shared by the subcommands.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use clap::Args;

use adaptrim_lib::adapters::AdapterSet;
use adaptrim_lib::config::UserConfig;
use adaptrim_lib::encoding::QualityEncoding;

/// Input options shared by `trim` and `identify`.
#[derive(Debug, Args)]
pub struct InputArgs {
    /// Input FASTQ file with mate 1 (or single-end) reads; may be gzip or
    /// bzip2 compressed.
    #[arg(long = "file1", value_name = "FILE")]
    pub file1: PathBuf,

    /// Input FASTQ file with mate 2 reads, for paired-end data in two
    /// files.
    #[arg(long = "file2", value_name = "FILE")]
    pub file2: Option<PathBuf>,

    /// Read mate pairs as alternating records from file1.
    #[arg(long = "interleaved-input", conflicts_with = "file2")]
    pub interleaved_input: bool,

    /// Quality score encoding of the input: 33, 64, or solexa.
    #[arg(long = "qualitybase", value_name = "NAME", default_value = "33")]
    pub quality_input: String,

    /// Character separating the read name from the mate number.
    #[arg(long = "mate-separator", value_name = "CHAR", default_value = "/")]
    pub mate_separator: char,

    /// Alignment shift: number of adapter bases allowed to be missing from
    /// the 5' end during alignment.
    #[arg(long = "shift", value_name = "N", default_value_t = 2)]
    pub shift: usize,

    /// Acceptable fraction of mismatches within an alignment; values above
    /// one are interpreted as 1/N.
    #[arg(long = "mm", value_name = "RATE", default_value_t = 3.0)]
    pub mismatch_rate: f64,
}

/// Adapter options shared by `trim` and `identify`.
#[derive(Debug, Args)]
pub struct AdapterArgs {
    /// Adapter expected at the 3' end of mate 1 reads.
    #[arg(
        long = "adapter1",
        value_name = "SEQUENCE",
        default_value = "AGATCGGAAGAGCACACGTCTGAACTCCAGTCA"
    )]
    pub adapter1: String,

    /// Adapter expected at the 3' end of mate 2 reads.
    #[arg(
        long = "adapter2",
        value_name = "SEQUENCE",
        default_value = "AGATCGGAAGAGCGTCGTGTAGGGAAAGAGTGT"
    )]
    pub adapter2: String,

    /// Table of adapter pairs to try, one pair per line.
    #[arg(long = "adapter-list", value_name = "FILE")]
    pub adapter_list: Option<PathBuf>,
}

/// Parse an encoding name into a [`QualityEncoding`].
pub fn parse_encoding(name: &str) -> Result<QualityEncoding> {
    QualityEncoding::from_name(name)
        .with_context(|| format!("unknown quality score encoding '{name}'"))
}

/// Normalize the user-facing mismatch rate: values above one mean 1/N.
pub fn mismatch_threshold(rate: f64) -> Result<f64> {
    if rate < 0.0 {
        bail!("mismatch rate must not be negative");
    }
    Ok(if rate > 1.0 { 1.0 / rate } else { rate })
}

/// Build the adapter set from the explicit pair or an adapter table.
pub fn build_adapter_set(args: &AdapterArgs, paired: bool) -> Result<AdapterSet> {
    let set = match &args.adapter_list {
        Some(path) => AdapterSet::load_adapter_list(path, paired)?,
        None => AdapterSet::new(
            args.adapter1.as_bytes().to_vec(),
            args.adapter2.as_bytes().to_vec(),
        )?,
    };
    Ok(set)
}

/// A seed for the collapse tie-break RNGs: user-supplied or wall-clock.
pub fn resolve_seed(seed: Option<u64>) -> u64 {
    seed.unwrap_or_else(|| {
        SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |elapsed| elapsed.as_secs())
    })
}

/// Shared conversion of the input arguments into a partially filled
/// [`UserConfig`]; the caller fills in the command-specific options.
pub fn base_config(
    input: &InputArgs,
    adapters: AdapterSet,
    paired: bool,
) -> Result<UserConfig> {
    Ok(UserConfig {
        basename: "output".to_string(),
        input_file_1: input.file1.clone(),
        input_file_2: input.file2.clone(),
        paired_ended_mode: paired,
        interleaved_input: input.interleaved_input,
        interleaved_output: false,
        mate_separator: u8::try_from(input.mate_separator)
            .context("mate separator must be an ASCII character")?,
        min_genomic_length: 15,
        max_genomic_length: usize::MAX,
        min_adapter_overlap: 0,
        min_alignment_length: 11,
        mismatch_threshold: mismatch_threshold(input.mismatch_rate)?,
        quality_input_fmt: parse_encoding(&input.quality_input)?,
        quality_output_fmt: QualityEncoding::sanger(),
        trim_by_quality: false,
        low_quality_score: 2,
        trim_ambiguous_bases: false,
        max_ambiguous_bases: 1000,
        collapse: false,
        shift: input.shift,
        seed: resolve_seed(None),
        max_threads: 1,
        gzip: false,
        gzip_level: 6,
        bzip2: false,
        bzip2_level: 9,
        barcode_mm: 0,
        barcode_mm_r1: 0,
        barcode_mm_r2: 0,
        adapters,
    })
}
