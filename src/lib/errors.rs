//! Error types for adaptrim operations.

use std::path::Path;

use thiserror::Error;

/// Result type alias for adaptrim operations
pub type Result<T> = std::result::Result<T, TrimError>;

/// Error type for adaptrim operations
#[derive(Error, Debug)]
pub enum TrimError {
    /// Invalid or contradictory user-supplied options; raised before any
    /// input file is opened.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed FASTQ input; fatal to the pipeline.
    #[error("malformed FASTQ record {record} in '{file}': {reason}")]
    FastqFormat {
        /// Path of the offending input file
        file: String,
        /// 1-based index of the offending record
        record: u64,
        /// Explanation of the problem
        reason: String,
    },

    /// Paired reads whose names do not match modulo the mate separator.
    #[error("mismatched mate names: '{name1}' does not pair with '{name2}'")]
    PairMismatch {
        /// Name parsed from the mate 1 header
        name1: String,
        /// Name parsed from the mate 2 header
        name2: String,
    },

    /// Underlying I/O failure, with the path it occurred on.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// Path of the file being read or written
        path: String,
        /// The underlying system error
        source: std::io::Error,
    },

    /// Internal invariant violation; indicates a bug, not bad input.
    #[error("internal pipeline error: {0}")]
    Pipeline(String),
}

impl TrimError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        TrimError::Io { path: path.display().to_string(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fastq_format_display() {
        let error = TrimError::FastqFormat {
            file: "reads.fq".to_string(),
            record: 17,
            reason: "sequence and quality lengths differ".to_string(),
        };
        let msg = format!("{error}");
        assert!(msg.contains("record 17"));
        assert!(msg.contains("reads.fq"));
        assert!(msg.contains("lengths differ"));
    }

    #[test]
    fn test_pair_mismatch_display() {
        let error = TrimError::PairMismatch {
            name1: "read_a".to_string(),
            name2: "read_b".to_string(),
        };
        let msg = format!("{error}");
        assert!(msg.contains("read_a"));
        assert!(msg.contains("read_b"));
    }

    #[test]
    fn test_io_wraps_path() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let error = TrimError::io(Path::new("/tmp/missing.fq"), source);
        let msg = format!("{error}");
        assert!(msg.contains("/tmp/missing.fq"));
        assert!(msg.contains("no such file"));
    }
}
