//! Per-sample trimming statistics and per-worker state pools.
//!
//! Statistics are accumulated per worker to avoid contention: each chunk a
//! worker processes borrows a sink from a [`SinkPool`], updates it, and
//! returns it. All sinks of a pool are reduced (element-wise addition) into
//! one object when the pipeline completes. The same pool mechanism provides
//! deterministically seeded per-worker RNGs for collapse tie-breaking.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// The classification a record ends up with, indexing the length histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadType {
    /// Accepted mate 1 (or single-end) read
    Mate1,
    /// Accepted mate 2 read
    Mate2,
    /// Accepted read whose mate was discarded
    Singleton,
    /// Collapsed consensus read, full length
    Collapsed,
    /// Collapsed consensus read that was subsequently quality-trimmed
    CollapsedTruncated,
    /// Read failing the length or ambiguity filters
    Discarded,
}

impl ReadType {
    /// Number of read types (width of the length histogram).
    pub const COUNT: usize = 6;

    /// Index of this read type within a histogram row.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            ReadType::Mate1 => 0,
            ReadType::Mate2 => 1,
            ReadType::Singleton => 2,
            ReadType::Collapsed => 3,
            ReadType::CollapsedTruncated => 4,
            ReadType::Discarded => 5,
        }
    }
}

/// Counters collected while trimming one sample.
///
/// All fields are additive; merging two statistics objects is element-wise
/// addition, which makes the reduction commutative and associative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statistics {
    /// Number of input records (read pairs in paired-end mode)
    pub records: u64,
    /// Records with a valid adapter/mate alignment
    pub well_aligned_reads: u64,
    /// Records without a usable alignment
    pub unaligned_reads: u64,
    /// Discarded mate 1 reads
    pub discard1: u64,
    /// Discarded mate 2 reads
    pub discard2: u64,
    /// Mate 1 reads kept as singletons
    pub keep1: u64,
    /// Mate 2 reads kept as singletons
    pub keep2: u64,
    /// Collapsed pairs emitted at full length
    pub full_collapsed: u64,
    /// Collapsed pairs truncated by quality trimming
    pub truncated_collapsed: u64,
    /// Reads written to any non-discarded channel
    pub total_good_reads: u64,
    /// Nucleotides across all retained reads
    pub total_nucleotides: u64,
    /// `read_lengths[length][read_type]` occurrence counts
    read_lengths: Vec<[u64; ReadType::COUNT]>,
    /// Records in which adapter `i` was identified
    pub adapter_hits: Vec<u64>,
}

impl Statistics {
    /// Create zeroed statistics sized for `adapter_count` adapters.
    #[must_use]
    pub fn new(adapter_count: usize) -> Self {
        Self {
            records: 0,
            well_aligned_reads: 0,
            unaligned_reads: 0,
            discard1: 0,
            discard2: 0,
            keep1: 0,
            keep2: 0,
            full_collapsed: 0,
            truncated_collapsed: 0,
            total_good_reads: 0,
            total_nucleotides: 0,
            read_lengths: Vec::new(),
            adapter_hits: vec![0; adapter_count],
        }
    }

    /// Count one read of the given type and length in the histogram.
    pub fn record_length(&mut self, read_type: ReadType, length: usize) {
        if self.read_lengths.len() <= length {
            self.read_lengths.resize(length + 1, [0; ReadType::COUNT]);
        }
        self.read_lengths[length][read_type.index()] += 1;
    }

    /// The length histogram, indexed `[length][read_type]`.
    #[must_use]
    pub fn read_lengths(&self) -> &[[u64; ReadType::COUNT]] {
        &self.read_lengths
    }

    /// Element-wise addition of another statistics object into this one.
    pub fn merge(&mut self, other: &Statistics) {
        self.records += other.records;
        self.well_aligned_reads += other.well_aligned_reads;
        self.unaligned_reads += other.unaligned_reads;
        self.discard1 += other.discard1;
        self.discard2 += other.discard2;
        self.keep1 += other.keep1;
        self.keep2 += other.keep2;
        self.full_collapsed += other.full_collapsed;
        self.truncated_collapsed += other.truncated_collapsed;
        self.total_good_reads += other.total_good_reads;
        self.total_nucleotides += other.total_nucleotides;

        if self.read_lengths.len() < other.read_lengths.len() {
            self.read_lengths.resize(other.read_lengths.len(), [0; ReadType::COUNT]);
        }
        for (dst, src) in self.read_lengths.iter_mut().zip(&other.read_lengths) {
            for (d, s) in dst.iter_mut().zip(src) {
                *d += s;
            }
        }

        debug_assert_eq!(self.adapter_hits.len(), other.adapter_hits.len());
        for (dst, src) in self.adapter_hits.iter_mut().zip(&other.adapter_hits) {
            *dst += src;
        }
    }
}

/// Counters collected while demultiplexing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemuxStatistics {
    /// Reads matching no barcode within the mismatch thresholds
    pub unidentified: u64,
    /// Reads matching two or more barcodes equally well
    pub ambiguous: u64,
    /// Reads attributed to each sample
    pub barcodes: Vec<u64>,
}

impl DemuxStatistics {
    /// Create zeroed statistics for `sample_count` samples.
    #[must_use]
    pub fn new(sample_count: usize) -> Self {
        Self { unidentified: 0, ambiguous: 0, barcodes: vec![0; sample_count] }
    }

    /// Total number of classified reads.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.unidentified + self.ambiguous + self.barcodes.iter().sum::<u64>()
    }
}

/// A pool of per-worker sinks with acquire/release semantics.
///
/// Workers borrow a sink per chunk rather than sharing one object behind a
/// lock for the duration of the run; the pool lock is only held for the
/// push/pop. New sinks are created on demand, so the pool holds at most one
/// sink per worker that ever ran the owning stage.
///
/// # Example
///
/// ```
/// use adaptrim_lib::statistics::SinkPool;
///
/// let pool: SinkPool<Vec<u32>> = SinkPool::new(Vec::new);
/// let mut sink = pool.acquire();
/// sink.push(1);
/// pool.release(sink);
///
/// // The returned sink is reused on the next acquire
/// assert_eq!(pool.acquire(), vec![1]);
/// ```
pub struct SinkPool<T> {
    sinks: Mutex<Vec<T>>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T: Send> SinkPool<T> {
    /// Create a pool whose sinks are built by `factory`.
    pub fn new(factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self { sinks: Mutex::new(Vec::new()), factory: Box::new(factory) }
    }

    /// Borrow a sink, creating one if the pool is empty.
    pub fn acquire(&self) -> T {
        self.sinks.lock().pop().unwrap_or_else(|| (self.factory)())
    }

    /// Return a sink to the pool.
    pub fn release(&self, sink: T) {
        self.sinks.lock().push(sink);
    }

    /// Take all pooled sinks, leaving the pool empty.
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *self.sinks.lock())
    }
}

impl SinkPool<Statistics> {
    /// Reduce all pooled statistics into a single object.
    #[must_use]
    pub fn reduce(&self, adapter_count: usize) -> Statistics {
        let mut total = Statistics::new(adapter_count);
        for sink in self.drain() {
            total.merge(&sink);
        }
        total
    }
}

/// Build an RNG pool whose per-worker generators are seeded from a single
/// deterministic seed sequence.
///
/// With one worker thread this makes tie-break decisions reproducible across
/// runs; with several workers the assignment of chunks to generators is
/// scheduling-dependent, so exact reproducibility is not guaranteed.
#[must_use]
pub fn seeded_rng_pool(seed: u64) -> SinkPool<StdRng> {
    let seeder = Mutex::new(StdRng::seed_from_u64(seed));
    SinkPool::new(move || StdRng::seed_from_u64(seeder.lock().random()))
}
