//! Infer the adapter pair from overlapping paired-end reads.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use adaptrim_lib::identify::identify_adapters;

use crate::commands::command::Command;
use crate::commands::common::{self, AdapterArgs, InputArgs};

/// Identify adapter sequences from paired-end reads.
#[derive(Debug, Parser)]
#[command(
    name = "identify",
    about = "Infer adapter sequences from overlapping paired-end reads",
    long_about = "\
Infer the adapter pair of a paired-end library by aligning mate pairs
against each other: wherever the mates overlap completely, the bases read
past the 3' end of the insert are adapter sequence. Reports a consensus
adapter per mate together with the per-position agreement, for comparison
against the adapters that would be used for trimming.

EXAMPLE:

  adaptrim identify --file1 r1.fastq.gz --file2 r2.fastq.gz
"
)]
pub struct Identify {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub adapters: AdapterArgs,
}

impl Command for Identify {
    fn execute(&self) -> Result<()> {
        let adapters = common::build_adapter_set(&self.adapters, true)?;
        let config = common::base_config(&self.input, adapters, true)?;
        config.validate().context("invalid identification options")?;

        info!("Identifying adapters from paired-end reads ...");
        let results = identify_adapters(&config)?;

        let unaligned = results.processed - results.aligned;
        info!("Processed {} read pairs", results.processed);
        info!("Found {} overlapping pairs ({} unaligned)", results.aligned, unaligned);
        info!("Of these, {} contained adapter 1 sequence", results.with_adapter1);
        info!("Of these, {} contained adapter 2 sequence", results.with_adapter2);

        for (name, expected, consensus) in [
            ("adapter1", &self.adapters.adapter1, &results.consensus1),
            ("adapter2", &self.adapters.adapter2, &results.consensus2),
        ] {
            println!("[{name}]");
            println!("Expected:   {expected}");
            println!("Consensus:  {}", consensus.sequence);
            println!("Agreement:  {}", consensus.support_digits());
            println!();
        }

        Ok(())
    }
}
