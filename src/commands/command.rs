//! Command trait definition for CLI commands.
//!
//! Each subcommand implements [`Command`]; dispatch across the variants
//! uses `enum_dispatch`.

use anyhow::Result;
use enum_dispatch::enum_dispatch;

/// Trait implemented by all adaptrim CLI commands.
#[enum_dispatch]
pub trait Command {
    #[allow(clippy::missing_errors_doc)]
    fn execute(&self) -> Result<()>;
}
