//! Adapter sequences and barcode tables.
//!
//! An [`AdapterSet`] holds the adapter pairs used for trimming and, when
//! demultiplexing, the barcode table mapping sample names to barcode pairs.
//! Adapters are exposed in three views: the *alignment* view (adapter 2
//! reverse-complemented and barcodes folded in, as consumed by the aligner),
//! the *raw* view (the sequences as supplied), and a *pretty* view for
//! reports.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::errors::{Result, TrimError};

/// Reverse complement of a plain byte sequence (A<->T, C<->G, N unchanged).
#[must_use]
pub fn reverse_complement(sequence: &[u8]) -> Vec<u8> {
    sequence
        .iter()
        .rev()
        .map(|&base| match base {
            b'A' | b'a' => b'T',
            b'T' | b't' => b'A',
            b'C' | b'c' => b'G',
            b'G' | b'g' => b'C',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}

/// An adapter pair in alignment orientation.
///
/// `adapter1` is the sequence expected at the 3' end of mate 1 reads;
/// `adapter2_rc` is the reverse complement of the mate 2 adapter, i.e. the
/// sequence expected *upstream* of mate 1 when the insert is shorter than
/// the read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterPair {
    /// Adapter expected at the 3' end of mate 1 (barcode-adjusted)
    pub adapter1: Vec<u8>,
    /// Reverse complement of the adapter expected at the 3' end of mate 2
    pub adapter2_rc: Vec<u8>,
}

/// A named sample with its barcode pair; `barcode2` is empty for
/// single-indexed layouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Sample name from the barcode table
    pub name: String,
    /// Barcode expected at the 5' end of mate 1
    pub barcode1: Vec<u8>,
    /// Barcode expected at the 5' end of mate 2 (empty if single-indexed)
    pub barcode2: Vec<u8>,
}

/// The set of adapters to trim, plus the optional barcode table.
///
/// # Example
///
/// ```
/// use adaptrim_lib::adapters::AdapterSet;
///
/// let set = AdapterSet::new(b"AGATCGGAAGAGC".to_vec(), b"AGATCGGAAGAGC".to_vec()).unwrap();
/// assert_eq!(set.adapter_set_count(), 1);
/// assert_eq!(set.barcode_count(), 0);
///
/// // In alignment orientation, adapter 2 is reverse-complemented
/// let pairs = set.adapter_set(0);
/// assert_eq!(pairs[0].adapter1, b"AGATCGGAAGAGC");
/// assert_eq!(pairs[0].adapter2_rc, b"GCTCTTCCGATCT");
/// ```
#[derive(Debug, Clone)]
pub struct AdapterSet {
    /// Raw adapter pairs as supplied by the user: (adapter1, adapter2)
    adapters: Vec<(Vec<u8>, Vec<u8>)>,
    /// Samples from the barcode table; empty when not demultiplexing
    samples: Vec<Sample>,
}

impl AdapterSet {
    /// Default mate 1 adapter (Illumina TruSeq).
    pub const DEFAULT_ADAPTER_1: &'static [u8] = b"AGATCGGAAGAGCACACGTCTGAACTCCAGTCA";
    /// Default mate 2 adapter (Illumina TruSeq).
    pub const DEFAULT_ADAPTER_2: &'static [u8] = b"AGATCGGAAGAGCGTCGTGTAGGGAAAGAGTGT";

    /// Build a set holding a single adapter pair.
    pub fn new(adapter1: Vec<u8>, adapter2: Vec<u8>) -> Result<Self> {
        let mut set = Self { adapters: Vec::new(), samples: Vec::new() };
        set.add_adapters(adapter1, adapter2)?;
        Ok(set)
    }

    /// Append an adapter pair to the set.
    pub fn add_adapters(&mut self, adapter1: Vec<u8>, adapter2: Vec<u8>) -> Result<()> {
        validate_sequence(&adapter1, "adapter 1")?;
        validate_sequence(&adapter2, "adapter 2")?;
        self.adapters.push((adapter1, adapter2));
        Ok(())
    }

    /// Load adapter pairs from a whitespace-separated table file; one pair
    /// per line, `#` comments and blank lines ignored. The second column is
    /// optional in single-end mode.
    pub fn load_adapter_list(path: &Path, paired: bool) -> Result<Self> {
        let mut set = Self { adapters: Vec::new(), samples: Vec::new() };
        for (line_no, line) in read_table_lines(path)? {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (adapter1, adapter2) = match fields.as_slice() {
                [a1] if !paired => (a1.as_bytes().to_vec(), Vec::new()),
                [a1, a2] => (a1.as_bytes().to_vec(), a2.as_bytes().to_vec()),
                _ => {
                    return Err(TrimError::Config(format!(
                        "malformed adapter table '{}' at line {line_no}: expected {} columns",
                        path.display(),
                        if paired { "2" } else { "1 or 2" }
                    )));
                }
            };
            set.add_adapters(adapter1, adapter2)?;
        }

        if set.adapters.is_empty() {
            return Err(TrimError::Config(format!(
                "adapter table '{}' contains no adapters",
                path.display()
            )));
        }

        Ok(set)
    }

    /// Load the barcode table: lines of `name barcode1 [barcode2]`.
    ///
    /// Enforces the table invariants: unique sample names, unique barcode
    /// pairs, and equal lengths within each barcode column.
    pub fn load_barcode_list(&mut self, path: &Path) -> Result<()> {
        for (line_no, line) in read_table_lines(path)? {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let sample = match fields.as_slice() {
                [name, b1] => Sample {
                    name: (*name).to_string(),
                    barcode1: b1.as_bytes().to_vec(),
                    barcode2: Vec::new(),
                },
                [name, b1, b2] => Sample {
                    name: (*name).to_string(),
                    barcode1: b1.as_bytes().to_vec(),
                    barcode2: b2.as_bytes().to_vec(),
                },
                _ => {
                    return Err(TrimError::Config(format!(
                        "malformed barcode table '{}' at line {line_no}: \
                         expected 'name barcode1 [barcode2]'",
                        path.display()
                    )));
                }
            };

            validate_sequence(&sample.barcode1, "barcode 1")?;
            validate_sequence(&sample.barcode2, "barcode 2")?;

            for existing in &self.samples {
                if existing.name == sample.name {
                    return Err(TrimError::Config(format!(
                        "duplicate sample name '{}' in barcode table",
                        sample.name
                    )));
                }
                if existing.barcode1 == sample.barcode1 && existing.barcode2 == sample.barcode2 {
                    return Err(TrimError::Config(format!(
                        "samples '{}' and '{}' share the same barcodes",
                        existing.name, sample.name
                    )));
                }
                if existing.barcode1.len() != sample.barcode1.len()
                    || existing.barcode2.len() != sample.barcode2.len()
                {
                    return Err(TrimError::Config(
                        "barcode lengths must be equal within each column".to_string(),
                    ));
                }
            }

            self.samples.push(sample);
        }

        if self.samples.is_empty() {
            return Err(TrimError::Config(format!(
                "barcode table '{}' contains no samples",
                path.display()
            )));
        }

        Ok(())
    }

    /// Number of samples in the barcode table (0 when not demultiplexing).
    #[must_use]
    pub fn barcode_count(&self) -> usize {
        self.samples.len()
    }

    /// Number of per-sample adapter sets; 1 when not demultiplexing.
    #[must_use]
    pub fn adapter_set_count(&self) -> usize {
        self.samples.len().max(1)
    }

    /// Number of adapter pairs per sample.
    #[must_use]
    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    /// The samples of the barcode table.
    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Name of the nth sample, or an empty string when not demultiplexing.
    #[must_use]
    pub fn sample_name(&self, nth: usize) -> &str {
        self.samples.get(nth).map_or("", |sample| sample.name.as_str())
    }

    /// The raw adapter pairs as supplied by the user.
    #[must_use]
    pub fn raw_adapters(&self) -> &[(Vec<u8>, Vec<u8>)] {
        &self.adapters
    }

    /// The adapter pairs for sample `nth` in alignment orientation.
    ///
    /// With barcodes, the fragment read through into the adapter also
    /// traverses the *other* mate's barcode, so the effective adapter 1 is
    /// `rc(barcode2) + adapter1` and the effective adapter 2 is
    /// `rc(barcode1) + adapter2`; adapter 2 is then reverse-complemented for
    /// alignment against mate 1 coordinates.
    #[must_use]
    pub fn adapter_set(&self, nth: usize) -> Vec<AdapterPair> {
        let (barcode1, barcode2) = self
            .samples
            .get(nth)
            .map_or((&[] as &[u8], &[] as &[u8]), |s| (&s.barcode1[..], &s.barcode2[..]));

        self.adapters
            .iter()
            .map(|(adapter1, adapter2)| {
                let mut effective1 = reverse_complement(barcode2);
                effective1.extend_from_slice(adapter1);

                let mut effective2 = reverse_complement(barcode1);
                effective2.extend_from_slice(adapter2);

                AdapterPair { adapter1: effective1, adapter2_rc: reverse_complement(&effective2) }
            })
            .collect()
    }

    /// Adapter pairs for sample `nth` rendered for reports, with the barcode
    /// segment separated from the adapter proper by an underscore.
    #[must_use]
    pub fn pretty_adapters(&self, nth: usize) -> Vec<(String, String)> {
        let (barcode1, barcode2) = self
            .samples
            .get(nth)
            .map_or((&[] as &[u8], &[] as &[u8]), |s| (&s.barcode1[..], &s.barcode2[..]));

        let pretty = |barcode: &[u8], adapter: &[u8]| {
            let adapter = String::from_utf8_lossy(adapter).into_owned();
            if barcode.is_empty() {
                adapter
            } else {
                format!("{}_{}", String::from_utf8_lossy(&reverse_complement(barcode)), adapter)
            }
        };

        self.adapters
            .iter()
            .map(|(adapter1, adapter2)| (pretty(barcode2, adapter1), pretty(barcode1, adapter2)))
            .collect()
    }
}

/// Reject sequences containing anything but A, C, G, T, or N.
fn validate_sequence(sequence: &[u8], what: &str) -> Result<()> {
    for &base in sequence {
        if !matches!(base.to_ascii_uppercase(), b'A' | b'C' | b'G' | b'T' | b'N') {
            return Err(TrimError::Config(format!(
                "{what} contains invalid base '{}'",
                char::from(base)
            )));
        }
    }
    Ok(())
}

/// Read non-empty, non-comment lines from a table file with line numbers.
fn read_table_lines(path: &Path) -> Result<Vec<(usize, String)>> {
    let file = File::open(path).map_err(|e| TrimError::io(path, e))?;
    let mut lines = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| TrimError::io(path, e))?;
        let trimmed = line.trim();
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            lines.push((idx + 1, trimmed.to_string()));
        }
    }
    Ok(lines)
}
