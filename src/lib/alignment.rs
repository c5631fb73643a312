//! Ungapped pairwise alignment of reads against adapters, adapter
//! truncation, and collapsing of overlapping mate pairs.
//!
//! Alignment is exhaustive over a window of offsets: every candidate shift of
//! the adapter (or of the reverse-complemented mate 2) against the read is
//! scored, and the best-scoring placement wins. Scoring is +1 per match, -2
//! per mismatch, and 0 where either base is ambiguous; positions where one
//! sequence has ended are not counted.

use rand::Rng;
use rand::rngs::StdRng;

use crate::adapters::AdapterPair;
use crate::fastq::{AMBIGUOUS_BASE, FastqRecord};

/// The outcome of aligning two sequences at the best-scoring offset.
///
/// `offset` is the signed shift applied to the second sequence relative to
/// the first; negative means the second sequence starts before the first.
/// The null alignment (no overlap found) is all zeroes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlignmentInfo {
    /// Alignment score: matches - 2 * mismatches
    pub score: i32,
    /// Signed shift of the second sequence relative to the first
    pub offset: isize,
    /// Number of positions compared
    pub length: usize,
    /// Number of mismatching positions (both bases called, unequal)
    pub n_mismatches: usize,
    /// Number of positions where either base was N
    pub n_ambiguous: usize,
    /// Index of the adapter pair that produced this alignment
    pub adapter_id: usize,
}

impl AlignmentInfo {
    /// Ordering used to select the winning alignment: highest score first,
    /// ties broken toward the smallest adapter id, then the smallest
    /// absolute offset.
    #[must_use]
    fn is_better_than(&self, other: &AlignmentInfo) -> bool {
        if self.score != other.score {
            return self.score > other.score;
        }
        if self.adapter_id != other.adapter_id {
            return self.adapter_id < other.adapter_id;
        }
        self.offset.abs() < other.offset.abs()
    }
}

/// Score the overlap of `seq2` shifted by `offset` against `seq1`.
fn compare_subsequences(seq1: &[u8], seq2: &[u8], offset: isize) -> AlignmentInfo {
    let start1 = offset.max(0) as usize;
    let start2 = (-offset).max(0) as usize;

    let mut info = AlignmentInfo { offset, ..AlignmentInfo::default() };
    if start1 >= seq1.len() || start2 >= seq2.len() {
        return info;
    }

    let length = (seq1.len() - start1).min(seq2.len() - start2);
    info.length = length;

    for (&base1, &base2) in seq1[start1..start1 + length].iter().zip(&seq2[start2..]) {
        if base1 == AMBIGUOUS_BASE || base2 == AMBIGUOUS_BASE {
            info.n_ambiguous += 1;
        } else if base1 == base2 {
            info.score += 1;
        } else {
            info.n_mismatches += 1;
            info.score -= 2;
        }
    }

    info
}

/// Merge a candidate placement into the running best.
///
/// Zero-length candidates are ignored; among the rest the best is kept even
/// when its score is non-positive, so that callers can distinguish a poor
/// alignment from no alignment at all.
fn keep_best(best: &mut Option<AlignmentInfo>, current: AlignmentInfo) {
    if current.length > 0 && best.map_or(true, |b| current.is_better_than(&b)) {
        *best = Some(current);
    }
}

/// Align each adapter against the 3' end of a single-end read.
///
/// Offsets from `-shift` (allowing a few adapter bases missing from the 5'
/// end of the adapter placement) up to the end of the read are tried for
/// every adapter; the returned `offset` is where the adapter starts within
/// the read.
///
/// # Example
///
/// ```
/// use adaptrim_lib::adapters::AdapterPair;
/// use adaptrim_lib::alignment::align_single_ended;
/// use adaptrim_lib::fastq::FastqRecord;
///
/// let read = FastqRecord::new(
///     b"read1".to_vec(),
///     b"ACGTACGTAGATCGG".to_vec(),
///     vec![30; 15],
/// )
/// .unwrap();
/// let adapters =
///     vec![AdapterPair { adapter1: b"AGATCGG".to_vec(), adapter2_rc: Vec::new() }];
///
/// let alignment = align_single_ended(&read, &adapters, 0);
/// assert_eq!(alignment.offset, 8);
/// assert_eq!(alignment.length, 7);
/// assert_eq!(alignment.n_mismatches, 0);
/// assert_eq!(alignment.score, 7);
/// ```
#[must_use]
pub fn align_single_ended(
    read: &FastqRecord,
    adapters: &[AdapterPair],
    shift: usize,
) -> AlignmentInfo {
    let mut best = None;
    for (adapter_id, pair) in adapters.iter().enumerate() {
        for offset in -(shift as isize)..read.len() as isize {
            let mut current = compare_subsequences(&read.sequence, &pair.adapter1, offset);
            current.adapter_id = adapter_id;
            keep_best(&mut best, current);
        }
    }
    best.unwrap_or_default()
}

/// Align a mate pair against each other plus their flanking adapters.
///
/// `read2` must already be reverse-complemented. For each adapter pair the
/// scorer walks `adapter2_rc + read1` against `read2 + adapter1`, so that
/// short inserts score the read-through into both adapters. The returned
/// `offset` describes how `read2` is shifted relative to `read1`; negative
/// offsets mean read 2 extends upstream of read 1 (adapter read-through).
#[must_use]
pub fn align_paired_ended(
    read1: &FastqRecord,
    read2: &FastqRecord,
    adapters: &[AdapterPair],
    shift: usize,
) -> AlignmentInfo {
    let mut best = None;
    for (adapter_id, pair) in adapters.iter().enumerate() {
        let mut seq1 = pair.adapter2_rc.clone();
        seq1.extend_from_slice(&read1.sequence);

        let mut seq2 = read2.sequence.clone();
        seq2.extend_from_slice(&pair.adapter1);

        // Offsets below zero in the concatenated coordinates are only useful
        // when adapter bases are missing from the 5' end (the shift option);
        // short-insert read-through is covered by the concatenation itself.
        for offset in -(shift as isize)..seq1.len() as isize {
            let mut current = compare_subsequences(&seq1, &seq2, offset);
            current.offset -= pair.adapter2_rc.len() as isize;
            current.adapter_id = adapter_id;
            keep_best(&mut best, current);
        }
    }
    best.unwrap_or_default()
}

/// Truncate a single-end read at the position where the adapter begins.
pub fn truncate_single_ended(alignment: &AlignmentInfo, read: &mut FastqRecord) {
    read.truncate(0, alignment.offset.max(0) as usize);
}

/// Truncate adapter bases from an aligned mate pair (`read2` still
/// reverse-complemented), returning how many of the two reads carried
/// adapter sequence.
pub fn truncate_paired_ended(
    alignment: &AlignmentInfo,
    read1: &mut FastqRecord,
    read2: &mut FastqRecord,
) -> usize {
    let mut n_adapters = 0;

    // The template spans [offset, offset + |read2|) in read1 coordinates;
    // anything past that on read1 is adapter.
    let template_end = (alignment.offset + read2.len() as isize).max(0) as usize;
    if template_end < read1.len() {
        read1.truncate(0, template_end);
        n_adapters += 1;
    }

    // A negative offset means read2 (reverse-complemented) starts inside the
    // mate 2 adapter; drop those leading bases.
    if alignment.offset < 0 {
        let adapter_len = (-alignment.offset) as usize;
        read2.truncate(adapter_len.min(read2.len()), read2.len());
        n_adapters += 1;
    }

    n_adapters
}

/// Merge an overlapping, adapter-trimmed mate pair into a single consensus
/// record (`read2` still reverse-complemented).
///
/// Per output position: a base covered by only one mate is copied; agreeing
/// bases get quality `min(q1 + q2, max_score)`; disagreeing bases keep the
/// higher-quality base with quality `|q1 - q2|`, with equal-quality ties
/// broken uniformly at random (quality 0). An N on one side is treated as
/// absence.
///
/// # Example
///
/// ```
/// use adaptrim_lib::alignment::{AlignmentInfo, collapse_paired_ended};
/// use adaptrim_lib::fastq::FastqRecord;
/// use rand::SeedableRng;
/// use rand::rngs::StdRng;
///
/// let read1 =
///     FastqRecord::new(b"frag".to_vec(), b"ACGTACGT".to_vec(), vec![20; 8]).unwrap();
/// let read2 = read1.clone();
/// let alignment = AlignmentInfo { offset: 0, length: 8, score: 8, ..Default::default() };
///
/// let mut rng = StdRng::seed_from_u64(1);
/// let collapsed = collapse_paired_ended(&alignment, &read1, &read2, 41, &mut rng);
/// assert_eq!(collapsed.sequence, b"ACGTACGT");
/// // Agreeing bases sum their qualities, capped at max_score
/// assert_eq!(collapsed.qualities, vec![40; 8]);
/// ```
#[must_use]
pub fn collapse_paired_ended(
    alignment: &AlignmentInfo,
    read1: &FastqRecord,
    read2: &FastqRecord,
    max_score: u8,
    rng: &mut StdRng,
) -> FastqRecord {
    let offset = alignment.offset.max(0) as usize;
    let length = read1.len().max(offset + read2.len());

    let mut sequence = read1.sequence.clone();
    let mut qualities = read1.qualities.clone();
    sequence.resize(length, AMBIGUOUS_BASE);
    qualities.resize(length, 0);

    for (index, (&base2, &quality2)) in read2.sequence.iter().zip(&read2.qualities).enumerate() {
        let position = offset + index;
        if position >= read1.len() {
            sequence[position] = base2;
            qualities[position] = quality2;
            continue;
        }

        let base1 = read1.sequence[position];
        let quality1 = read1.qualities[position];

        if base1 == AMBIGUOUS_BASE || base2 == AMBIGUOUS_BASE {
            if base1 == AMBIGUOUS_BASE && base2 != AMBIGUOUS_BASE {
                sequence[position] = base2;
                qualities[position] = quality2;
            } else if base1 == AMBIGUOUS_BASE {
                sequence[position] = AMBIGUOUS_BASE;
                qualities[position] = 0;
            }
            // base2 is N, base1 called: keep read1's base as-is
        } else if base1 == base2 {
            qualities[position] =
                (u16::from(quality1) + u16::from(quality2)).min(u16::from(max_score)) as u8;
        } else if quality1 > quality2 {
            qualities[position] = quality1 - quality2;
        } else if quality2 > quality1 {
            sequence[position] = base2;
            qualities[position] = quality2 - quality1;
        } else {
            if rng.random::<bool>() {
                sequence[position] = base2;
            }
            qualities[position] = 0;
        }
    }

    FastqRecord { header: read1.header.clone(), sequence, qualities }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::reverse_complement;
    use rand::SeedableRng;

    fn record(seq: &[u8], qual: &[u8]) -> FastqRecord {
        FastqRecord::new(b"read".to_vec(), seq.to_vec(), qual.to_vec()).unwrap()
    }

    fn uniform(seq: &[u8], quality: u8) -> FastqRecord {
        record(seq, &vec![quality; seq.len()])
    }

    fn adapter(sequence: &[u8]) -> Vec<AdapterPair> {
        vec![AdapterPair { adapter1: sequence.to_vec(), adapter2_rc: Vec::new() }]
    }

    fn pe_adapters() -> Vec<AdapterPair> {
        vec![AdapterPair { adapter1: b"AGATCGGAAGAGC".to_vec(), adapter2_rc: b"GCTCTTCCGATCT".to_vec() }]
    }

    #[test]
    fn test_null_alignment_is_all_zero() {
        let info = AlignmentInfo::default();
        assert_eq!(info.length, 0);
        assert_eq!(info.score, 0);
        assert_eq!(info.offset, 0);
    }

    #[test]
    fn test_scoring_matches_and_mismatches() {
        let info = compare_subsequences(b"ACGTACGT", b"ACGTACCT", 0);
        assert_eq!(info.length, 8);
        assert_eq!(info.n_mismatches, 1);
        assert_eq!(info.n_ambiguous, 0);
        assert_eq!(info.score, 7 - 2);
    }

    #[test]
    fn test_scoring_ambiguous_is_neutral() {
        let info = compare_subsequences(b"ACGT", b"ANGT", 0);
        assert_eq!(info.n_ambiguous, 1);
        assert_eq!(info.n_mismatches, 0);
        assert_eq!(info.score, 3);
    }

    #[test]
    fn test_scoring_is_symmetric() {
        let a = b"ACGTNAGGT";
        let b = b"ACCTNAGGA";
        let forward = compare_subsequences(a, b, 0);
        let reverse = compare_subsequences(b, a, 0);
        assert_eq!(forward.score, reverse.score);
        assert_eq!(forward.n_mismatches, reverse.n_mismatches);
    }

    #[test]
    fn test_se_alignment_finds_adapter() {
        let read = uniform(b"ACGTACGTAGATCGG", 30);
        let info = align_single_ended(&read, &adapter(b"AGATCGG"), 0);
        assert_eq!(info.offset, 8);
        assert_eq!(info.length, 7);
        assert_eq!(info.score, 7);
        assert_eq!(info.n_mismatches, 0);
    }

    #[test]
    fn test_se_alignment_shift_allows_negative_offsets() {
        // The first two adapter bases have fallen off the 5' end of the read
        let read = uniform(b"ATCGGTTTT", 30);
        let no_shift = align_single_ended(&read, &adapter(b"AGATCGG"), 0);
        let shifted = align_single_ended(&read, &adapter(b"AGATCGG"), 2);
        assert!(shifted.score > no_shift.score);
        assert_eq!(shifted.offset, -2);
        assert_eq!(shifted.length, 5);
    }

    #[test]
    fn test_se_alignment_ties_prefer_first_adapter() {
        let read = uniform(b"ACGTACGTAGATCGG", 30);
        let adapters = vec![
            AdapterPair { adapter1: b"AGATCGG".to_vec(), adapter2_rc: Vec::new() },
            AdapterPair { adapter1: b"AGATCGG".to_vec(), adapter2_rc: Vec::new() },
        ];
        let info = align_single_ended(&read, &adapters, 0);
        assert_eq!(info.adapter_id, 0);
    }

    #[test]
    fn test_se_truncation_drops_adapter() {
        let mut read = uniform(b"ACGTACGTAGATCGG", 30);
        let info = align_single_ended(&read, &adapter(b"AGATCGG"), 0);
        truncate_single_ended(&info, &mut read);
        assert_eq!(read.sequence, b"ACGTACGT");
    }

    #[test]
    fn test_se_truncation_negative_offset_empties_read() {
        let mut read = uniform(b"ATCGGTTTT", 30);
        let info = align_single_ended(&read, &adapter(b"AGATCGG"), 2);
        truncate_single_ended(&info, &mut read);
        assert!(read.is_empty());
    }

    /// Build a mate pair over `insert` with the given read length and
    /// standard adapters appended; returns (read1, read2_rc).
    fn mate_pair(insert: &[u8], read_len: usize) -> (FastqRecord, FastqRecord) {
        let mut seq1 = insert.to_vec();
        seq1.extend_from_slice(b"AGATCGGAAGAGC");
        seq1.truncate(read_len);

        // read2 as sequenced: rc(insert) + adapter2; reverse-complemented
        // back, it reads adapter2_rc + insert.
        let mut seq2_rc = b"GCTCTTCCGATCT".to_vec();
        seq2_rc.extend_from_slice(insert);
        let keep = read_len.min(seq2_rc.len());
        seq2_rc.drain(..seq2_rc.len() - keep);

        (uniform(&seq1, 30), uniform(&seq2_rc, 30))
    }

    #[test]
    fn test_pe_alignment_overlapping_reads() {
        // 20 bp insert sequenced with 15 bp reads: 5' of read2_rc overlaps
        // the tail of read1 with no adapter present.
        let insert = b"ACGTGCATTGCAAGGCTTAG";
        let read1 = uniform(&insert[..15], 30);
        let read2 = uniform(&insert[5..], 30);
        let info = align_paired_ended(&read1, &read2, &pe_adapters(), 0);
        assert_eq!(info.offset, 5);
        assert_eq!(info.length, 10);
        assert_eq!(info.n_mismatches, 0);
    }

    #[test]
    fn test_pe_alignment_short_insert_reads_into_adapter() {
        // 8 bp insert with 15 bp reads: both reads run through into adapter.
        let (read1, read2) = mate_pair(b"ACGTACCA", 15);
        let info = align_paired_ended(&read1, &read2, &pe_adapters(), 2);
        assert_eq!(info.offset, -7);
        assert_eq!(info.n_mismatches, 0);
        assert!(info.score > 0);
    }

    #[test]
    fn test_pe_alignment_unrelated_reads() {
        let read1 = uniform(b"AAAAAAAAAAAAAAA", 30);
        let read2 = uniform(b"CCCCCCCCCCCCCCC", 30);
        let info = align_paired_ended(&read1, &read2, &pe_adapters(), 0);
        assert!(info.score <= 0);
    }

    #[test]
    fn test_pe_truncation_removes_both_adapters() {
        let (mut read1, mut read2) = mate_pair(b"ACGTACCA", 15);
        let info = align_paired_ended(&read1, &read2, &pe_adapters(), 2);
        let n_adapters = truncate_paired_ended(&info, &mut read1, &mut read2);
        assert_eq!(n_adapters, 2);
        assert_eq!(read1.sequence, b"ACGTACCA");
        assert_eq!(read2.sequence, b"ACGTACCA");
    }

    #[test]
    fn test_pe_truncation_no_adapter_present() {
        let insert = b"ACGTGCATTGCAAGGCTTAG";
        let mut read1 = uniform(&insert[..15], 30);
        let mut read2 = uniform(&insert[5..], 30);
        let info = align_paired_ended(&read1, &read2, &pe_adapters(), 0);
        let n_adapters = truncate_paired_ended(&info, &mut read1, &mut read2);
        assert_eq!(n_adapters, 0);
        assert_eq!(read1.len(), 15);
        assert_eq!(read2.len(), 15);
    }

    #[test]
    fn test_collapse_perfect_overlap_doubles_quality() {
        let read1 = uniform(b"ACGTACGT", 20);
        let read2 = uniform(b"ACGTACGT", 20);
        let alignment = AlignmentInfo { offset: 0, length: 8, score: 8, ..Default::default() };
        let mut rng = StdRng::seed_from_u64(1);
        let collapsed = collapse_paired_ended(&alignment, &read1, &read2, 41, &mut rng);
        assert_eq!(collapsed.sequence, b"ACGTACGT");
        assert_eq!(collapsed.qualities, vec![40; 8]);
    }

    #[test]
    fn test_collapse_quality_capped_at_max() {
        let read1 = uniform(b"ACGT", 30);
        let read2 = uniform(b"ACGT", 30);
        let alignment = AlignmentInfo { offset: 0, length: 4, score: 4, ..Default::default() };
        let mut rng = StdRng::seed_from_u64(1);
        let collapsed = collapse_paired_ended(&alignment, &read1, &read2, 41, &mut rng);
        assert_eq!(collapsed.qualities, vec![41; 4]);
    }

    #[test]
    fn test_collapse_disagreement_keeps_higher_quality_base() {
        let read1 = record(b"ACGA", &[20, 20, 20, 30]);
        let read2 = record(b"ACGC", &[20, 20, 20, 20]);
        let alignment = AlignmentInfo { offset: 0, length: 4, score: 2, ..Default::default() };
        let mut rng = StdRng::seed_from_u64(1);
        let collapsed = collapse_paired_ended(&alignment, &read1, &read2, 41, &mut rng);
        assert_eq!(collapsed.sequence[3], b'A');
        assert_eq!(collapsed.qualities[3], 10);
    }

    #[test]
    fn test_collapse_tie_has_zero_quality_and_picks_either() {
        let read1 = record(b"A", &[20]);
        let read2 = record(b"C", &[20]);
        let alignment = AlignmentInfo { offset: 0, length: 1, score: -2, ..Default::default() };
        let mut seen = std::collections::HashSet::new();
        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            let collapsed = collapse_paired_ended(&alignment, &read1, &read2, 41, &mut rng);
            assert_eq!(collapsed.qualities[0], 0);
            seen.insert(collapsed.sequence[0]);
        }
        assert_eq!(seen, [b'A', b'C'].into_iter().collect());
    }

    #[test]
    fn test_collapse_n_is_absence() {
        let read1 = record(b"NCGT", &[0, 20, 20, 20]);
        let read2 = record(b"ACGN", &[20, 20, 20, 0]);
        let alignment = AlignmentInfo { offset: 0, length: 4, score: 2, ..Default::default() };
        let mut rng = StdRng::seed_from_u64(1);
        let collapsed = collapse_paired_ended(&alignment, &read1, &read2, 41, &mut rng);
        assert_eq!(collapsed.sequence, b"ACGT");
        assert_eq!(collapsed.qualities, vec![20, 40, 40, 20]);
    }

    #[test]
    fn test_collapse_spans_union_of_mates() {
        let read1 = uniform(b"ACGTAC", 20);
        let read2 = uniform(b"ACGGGG", 20);
        let alignment = AlignmentInfo { offset: 4, length: 2, score: 2, ..Default::default() };
        let mut rng = StdRng::seed_from_u64(1);
        let collapsed = collapse_paired_ended(&alignment, &read1, &read2, 41, &mut rng);
        assert_eq!(collapsed.len(), 10);
        assert_eq!(&collapsed.sequence[..4], b"ACGT");
        assert_eq!(&collapsed.sequence[6..], b"GGGG");
    }

    #[test]
    fn test_mate_pair_helper_is_consistent() {
        // Sanity-check the helper: with a long insert the reads carry no
        // adapter at all, and read2 (reverse-complemented) ends the insert.
        let insert: Vec<u8> = b"ACGTGCATTGCAAGGCTTAGGCATTACCGGTTACGATACG".to_vec();
        let (read1, read2) = mate_pair(&insert, 15);
        assert_eq!(read1.sequence, &insert[..15]);
        assert_eq!(read2.sequence, &insert[insert.len() - 15..]);
        assert_eq!(reverse_complement(&reverse_complement(&read2.sequence)), read2.sequence);
    }
}
