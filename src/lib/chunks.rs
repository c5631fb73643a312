//! Chunk types: the unit of transfer and parallelism between pipeline
//! stages.
//!
//! A chunk is a bounded batch of records (or their serialized/compressed
//! bytes) plus an `eof` marker. Chunks are move-only: the scheduler transfers
//! exclusive ownership on each hop, so no record is ever shared between
//! stages.

use crate::encoding::QualityEncoding;
use crate::fastq::FastqRecord;

/// Records per chunk produced by the reader stages (4 Ki).
pub const CHUNK_SIZE: usize = 4096;

/// A batch of parsed input reads.
///
/// In paired-end mode `reads_1` and `reads_2` are aligned by index and must
/// have equal length; in single-end mode `reads_2` is empty.
#[derive(Debug, Default)]
pub struct ReadChunk {
    /// True for the final chunk of the input
    pub eof: bool,
    /// Mate 1 (or single-end) reads
    pub reads_1: Vec<FastqRecord>,
    /// Mate 2 reads, aligned with `reads_1`
    pub reads_2: Vec<FastqRecord>,
}

impl ReadChunk {
    /// Create an empty chunk with the given eof marker.
    #[must_use]
    pub fn new(eof: bool) -> Self {
        Self { eof, reads_1: Vec::new(), reads_2: Vec::new() }
    }
}

/// A batch of serialized FASTQ bytes ready for compression or writing.
#[derive(Debug, Default)]
pub struct OutputChunk {
    /// True for the final chunk of the stream
    pub eof: bool,
    /// Serialized FASTQ records
    pub data: Vec<u8>,
    /// Running record count, weighted (collapsed pairs count as two reads)
    pub records: u64,
}

impl OutputChunk {
    /// Create an empty chunk with the given eof marker.
    #[must_use]
    pub fn new(eof: bool) -> Self {
        Self { eof, data: Vec::new(), records: 0 }
    }

    /// Serialize one record, counting it once.
    pub fn add(&mut self, encoding: &QualityEncoding, record: &FastqRecord) {
        self.add_counted(encoding, record, 1);
    }

    /// Serialize one record that accounts for `read_count` input reads
    /// (collapsed pairs count as two).
    pub fn add_counted(&mut self, encoding: &QualityEncoding, record: &FastqRecord, read_count: u64) {
        self.data.push(b'@');
        self.data.extend_from_slice(&record.header);
        self.data.push(b'\n');
        self.data.extend_from_slice(&record.sequence);
        self.data.extend_from_slice(b"\n+\n");
        encoding.encode_into(&record.qualities, &mut self.data);
        self.data.push(b'\n');
        self.records += read_count;
    }
}

/// A batch of compressed output bytes.
#[derive(Debug, Default)]
pub struct CompressedChunk {
    /// True for the final chunk of the stream
    pub eof: bool,
    /// Compressed payload (one gzip member / bzip2 stream per chunk)
    pub data: Vec<u8>,
    /// Record count carried through from the uncompressed chunk
    pub records: u64,
}

/// The tagged chunk routed between stages.
#[derive(Debug)]
pub enum Chunk {
    /// Parsed input reads
    Read(ReadChunk),
    /// Serialized FASTQ bytes
    Output(OutputChunk),
    /// Compressed bytes
    Compressed(CompressedChunk),
}

impl Chunk {
    /// Whether this chunk closes its stream.
    #[must_use]
    pub fn eof(&self) -> bool {
        match self {
            Chunk::Read(chunk) => chunk.eof,
            Chunk::Output(chunk) => chunk.eof,
            Chunk::Compressed(chunk) => chunk.eof,
        }
    }
}
