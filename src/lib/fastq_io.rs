//! FASTQ reading, writing, and compression pipeline stages.
//!
//! Readers are ordered source stages emitting [`ReadChunk`]s of up to
//! [`CHUNK_SIZE`] records; the writer is an ordered sink owning its output
//! file exclusively; the compressors are unordered CPU-bound stages that
//! turn serialized chunks into independent gzip members (libdeflater) or
//! bzip2 streams, which concatenate into valid `.gz` / `.bz2` files.
//!
//! Input files may be plain, gzip-, or bzip2-compressed; the codec is
//! detected from the leading magic bytes.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use bzip2::read::MultiBzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::MultiGzDecoder;
use libdeflater::{CompressionLvl, Compressor};
use parking_lot::Mutex;
use seq_io::fastq::{Reader as SeqReader, Record};

use crate::chunks::{CHUNK_SIZE, Chunk, CompressedChunk, OutputChunk, ReadChunk};
use crate::encoding::QualityEncoding;
use crate::errors::{Result, TrimError};
use crate::fastq::FastqRecord;
use crate::progress::ProgressTracker;
use crate::scheduler::{PipelineStep, StepId, StepOrdering};
use crate::statistics::SinkPool;

/// Open an input file, transparently decoding gzip or bzip2 containers.
pub fn open_input(path: &Path) -> Result<Box<dyn Read + Send>> {
    let file = File::open(path).map_err(|e| TrimError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let magic = reader.fill_buf().map_err(|e| TrimError::io(path, e))?;
    if magic.starts_with(&[0x1f, 0x8b]) {
        Ok(Box::new(MultiGzDecoder::new(reader)))
    } else if magic.starts_with(b"BZh") {
        Ok(Box::new(MultiBzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Streaming FASTQ parser for one input file, decoding qualities to raw
/// Phred scores and tracking the record index for diagnostics.
pub struct FastqParser {
    reader: SeqReader<Box<dyn Read + Send>>,
    encoding: QualityEncoding,
    path: String,
    records_read: u64,
}

impl FastqParser {
    /// Open `path` for parsing with the given input encoding.
    pub fn open(path: &Path, encoding: QualityEncoding) -> Result<Self> {
        Ok(Self {
            reader: SeqReader::new(open_input(path)?),
            encoding,
            path: path.display().to_string(),
            records_read: 0,
        })
    }

    /// Parse the next record, or `None` at end of input.
    pub fn next_record(&mut self) -> Result<Option<FastqRecord>> {
        let record_index = self.records_read + 1;
        let Some(parsed) = self.reader.next() else {
            return Ok(None);
        };
        let parsed = parsed.map_err(|e| TrimError::FastqFormat {
            file: self.path.clone(),
            record: record_index,
            reason: e.to_string(),
        })?;

        let qualities = self.encoding.decode(parsed.qual()).map_err(|ch| {
            TrimError::FastqFormat {
                file: self.path.clone(),
                record: record_index,
                reason: format!(
                    "quality character '{}' outside the {} range",
                    char::from(ch),
                    self.encoding.name()
                ),
            }
        })?;
        let record = FastqRecord::new(parsed.head().to_vec(), parsed.seq().to_vec(), qualities)
            .map_err(|e| TrimError::FastqFormat {
                file: self.path.clone(),
                record: record_index,
                reason: e.to_string(),
            })?;

        self.records_read += 1;
        Ok(Some(record))
    }

    /// Number of records parsed so far.
    #[must_use]
    pub fn records_read(&self) -> u64 {
        self.records_read
    }
}

/// Source stage reading single-end records from one file.
pub struct ReadSingleFastq {
    parser: Mutex<FastqParser>,
    target: StepId,
    progress: ProgressTracker,
}

impl ReadSingleFastq {
    /// Open the input file; parse errors surface lazily during the run.
    pub fn open(path: &Path, encoding: QualityEncoding, target: StepId) -> Result<Self> {
        Ok(Self {
            parser: Mutex::new(FastqParser::open(path, encoding)?),
            target,
            progress: ProgressTracker::new("Read records", 1_000_000),
        })
    }
}

impl PipelineStep for ReadSingleFastq {
    fn ordering(&self) -> StepOrdering {
        StepOrdering::Ordered
    }

    fn process(&self, _chunk: Chunk) -> Result<Vec<(StepId, Chunk)>> {
        Err(TrimError::Pipeline("reader received a chunk".to_string()))
    }

    fn pull(&self) -> Result<Vec<(StepId, Chunk)>> {
        let mut parser = self.parser.lock();
        let mut chunk = ReadChunk::new(false);
        while chunk.reads_1.len() < CHUNK_SIZE {
            match parser.next_record()? {
                Some(record) => chunk.reads_1.push(record),
                None => {
                    chunk.eof = true;
                    break;
                }
            }
        }
        self.progress.add(chunk.reads_1.len() as u64);
        if chunk.eof {
            self.progress.finish();
        }
        Ok(vec![(self.target, Chunk::Read(chunk))])
    }
}

/// Source stage reading mate pairs from two parallel files.
pub struct ReadPairedFastq {
    parsers: Mutex<(FastqParser, FastqParser)>,
    target: StepId,
    progress: ProgressTracker,
}

impl ReadPairedFastq {
    /// Open both input files.
    pub fn open(
        path_1: &Path,
        path_2: &Path,
        encoding: QualityEncoding,
        target: StepId,
    ) -> Result<Self> {
        Ok(Self {
            parsers: Mutex::new((
                FastqParser::open(path_1, encoding.clone())?,
                FastqParser::open(path_2, encoding)?,
            )),
            target,
            progress: ProgressTracker::new("Read pairs", 1_000_000),
        })
    }
}

impl PipelineStep for ReadPairedFastq {
    fn ordering(&self) -> StepOrdering {
        StepOrdering::Ordered
    }

    fn process(&self, _chunk: Chunk) -> Result<Vec<(StepId, Chunk)>> {
        Err(TrimError::Pipeline("reader received a chunk".to_string()))
    }

    fn pull(&self) -> Result<Vec<(StepId, Chunk)>> {
        let mut parsers = self.parsers.lock();
        let (parser_1, parser_2) = &mut *parsers;
        let mut chunk = ReadChunk::new(false);
        while chunk.reads_1.len() < CHUNK_SIZE {
            match (parser_1.next_record()?, parser_2.next_record()?) {
                (Some(read_1), Some(read_2)) => {
                    chunk.reads_1.push(read_1);
                    chunk.reads_2.push(read_2);
                }
                (None, None) => {
                    chunk.eof = true;
                    break;
                }
                (Some(_), None) | (None, Some(_)) => {
                    return Err(TrimError::FastqFormat {
                        file: parser_1.path.clone(),
                        record: parser_1.records_read().max(parser_2.records_read()),
                        reason: "paired input files contain unequal numbers of records"
                            .to_string(),
                    });
                }
            }
        }
        self.progress.add(chunk.reads_1.len() as u64);
        if chunk.eof {
            self.progress.finish();
        }
        Ok(vec![(self.target, Chunk::Read(chunk))])
    }
}

/// Source stage reading alternating mate1/mate2 records from one file.
pub struct ReadInterleavedFastq {
    parser: Mutex<FastqParser>,
    target: StepId,
    progress: ProgressTracker,
}

impl ReadInterleavedFastq {
    /// Open the interleaved input file.
    pub fn open(path: &Path, encoding: QualityEncoding, target: StepId) -> Result<Self> {
        Ok(Self {
            parser: Mutex::new(FastqParser::open(path, encoding)?),
            target,
            progress: ProgressTracker::new("Read pairs", 1_000_000),
        })
    }
}

impl PipelineStep for ReadInterleavedFastq {
    fn ordering(&self) -> StepOrdering {
        StepOrdering::Ordered
    }

    fn process(&self, _chunk: Chunk) -> Result<Vec<(StepId, Chunk)>> {
        Err(TrimError::Pipeline("reader received a chunk".to_string()))
    }

    fn pull(&self) -> Result<Vec<(StepId, Chunk)>> {
        let mut parser = self.parser.lock();
        let mut chunk = ReadChunk::new(false);
        while chunk.reads_1.len() < CHUNK_SIZE {
            let Some(read_1) = parser.next_record()? else {
                chunk.eof = true;
                break;
            };
            let Some(read_2) = parser.next_record()? else {
                return Err(TrimError::FastqFormat {
                    file: parser.path.clone(),
                    record: parser.records_read(),
                    reason: "interleaved input contains an odd number of records".to_string(),
                });
            };
            chunk.reads_1.push(read_1);
            chunk.reads_2.push(read_2);
        }
        self.progress.add(chunk.reads_1.len() as u64);
        if chunk.eof {
            self.progress.finish();
        }
        Ok(vec![(self.target, Chunk::Read(chunk))])
    }
}

/// Ordered sink writing serialized or compressed chunks to one file.
///
/// The writer owns its file exclusively; buffered data is flushed when the
/// eof chunk arrives, so interrupted runs may leave truncated files.
pub struct WriteFastq {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl WriteFastq {
    /// Create (truncate) the output file; open errors surface before the
    /// pipeline starts.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| TrimError::io(path, e))?;
        Ok(Self { path: path.to_path_buf(), writer: Mutex::new(BufWriter::new(file)) })
    }
}

impl PipelineStep for WriteFastq {
    fn ordering(&self) -> StepOrdering {
        StepOrdering::Ordered
    }

    fn process(&self, chunk: Chunk) -> Result<Vec<(StepId, Chunk)>> {
        let (data, eof) = match &chunk {
            Chunk::Output(chunk) => (&chunk.data, chunk.eof),
            Chunk::Compressed(chunk) => (&chunk.data, chunk.eof),
            Chunk::Read(_) => {
                return Err(TrimError::Pipeline("writer received an unserialized chunk".to_string()));
            }
        };

        let mut writer = self.writer.lock();
        writer.write_all(data).map_err(|e| TrimError::io(&self.path, e))?;
        if eof {
            writer.flush().map_err(|e| TrimError::io(&self.path, e))?;
        }
        Ok(Vec::new())
    }

    fn finish(&self) -> Result<()> {
        self.writer.lock().flush().map_err(|e| TrimError::io(&self.path, e))
    }
}

/// Unordered stage compressing serialized chunks into gzip members.
///
/// Each worker borrows a compressor from a pool rather than constructing
/// one per chunk.
pub struct GzipCompress {
    target: StepId,
    compressors: SinkPool<Compressor>,
}

impl GzipCompress {
    /// Create a compressor stage forwarding to `target`.
    pub fn new(level: u32, target: StepId) -> Result<Self> {
        let level = CompressionLvl::new(level as i32)
            .map_err(|e| TrimError::Config(format!("invalid gzip level: {e:?}")))?;
        Ok(Self { target, compressors: SinkPool::new(move || Compressor::new(level)) })
    }
}

impl PipelineStep for GzipCompress {
    fn ordering(&self) -> StepOrdering {
        StepOrdering::Unordered
    }

    fn process(&self, chunk: Chunk) -> Result<Vec<(StepId, Chunk)>> {
        let Chunk::Output(chunk) = chunk else {
            return Err(TrimError::Pipeline("compressor expected serialized chunk".to_string()));
        };

        let data = if chunk.data.is_empty() {
            Vec::new()
        } else {
            let mut compressor = self.compressors.acquire();
            let mut data = vec![0u8; compressor.gzip_compress_bound(chunk.data.len())];
            let written = compressor
                .gzip_compress(&chunk.data, &mut data)
                .map_err(|e| TrimError::Pipeline(format!("gzip compression failed: {e:?}")))?;
            data.truncate(written);
            self.compressors.release(compressor);
            data
        };

        let compressed = CompressedChunk { eof: chunk.eof, data, records: chunk.records };
        Ok(vec![(self.target, Chunk::Compressed(compressed))])
    }
}

/// Unordered stage compressing serialized chunks into bzip2 streams.
pub struct Bzip2Compress {
    level: u32,
    target: StepId,
}

impl Bzip2Compress {
    /// Create a compressor stage forwarding to `target`.
    pub fn new(level: u32, target: StepId) -> Result<Self> {
        if !(1..=9).contains(&level) {
            return Err(TrimError::Config(format!("invalid bzip2 level: {level}")));
        }
        Ok(Self { level, target })
    }
}

impl PipelineStep for Bzip2Compress {
    fn ordering(&self) -> StepOrdering {
        StepOrdering::Unordered
    }

    fn process(&self, chunk: Chunk) -> Result<Vec<(StepId, Chunk)>> {
        let Chunk::Output(chunk) = chunk else {
            return Err(TrimError::Pipeline("compressor expected serialized chunk".to_string()));
        };

        let data = if chunk.data.is_empty() {
            Vec::new()
        } else {
            let mut encoder = BzEncoder::new(Vec::new(), bzip2::Compression::new(self.level));
            encoder
                .write_all(&chunk.data)
                .and_then(|()| encoder.finish())
                .map_err(|e| TrimError::Pipeline(format!("bzip2 compression failed: {e}")))?
        };

        let compressed = CompressedChunk { eof: chunk.eof, data, records: chunk.records };
        Ok(vec![(self.target, Chunk::Compressed(compressed))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write as _;

    const FASTQ: &[u8] = b"@read1\nACGT\n+\nIIII\n@read2\nTTTT\n+\n!!!!\n";

    fn write_temp(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_open_input_detects_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(FASTQ).unwrap();
        let path = write_temp(&dir, "reads.fq.gz", &encoder.finish().unwrap());

        let mut data = Vec::new();
        open_input(&path).unwrap().read_to_end(&mut data).unwrap();
        assert_eq!(data, FASTQ);
    }

    #[test]
    fn test_open_input_detects_bzip2() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = BzEncoder::new(Vec::new(), bzip2::Compression::new(6));
        encoder.write_all(FASTQ).unwrap();
        let path = write_temp(&dir, "reads.fq.bz2", &encoder.finish().unwrap());

        let mut data = Vec::new();
        open_input(&path).unwrap().read_to_end(&mut data).unwrap();
        assert_eq!(data, FASTQ);
    }

    #[test]
    fn test_parser_decodes_qualities() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "reads.fq", FASTQ);
        let mut parser = FastqParser::open(&path, QualityEncoding::sanger()).unwrap();

        let first = parser.next_record().unwrap().unwrap();
        assert_eq!(first.header, b"read1");
        assert_eq!(first.sequence, b"ACGT");
        assert_eq!(first.qualities, vec![40; 4]);

        let second = parser.next_record().unwrap().unwrap();
        assert_eq!(second.qualities, vec![0; 4]);
        assert!(parser.next_record().unwrap().is_none());
        assert_eq!(parser.records_read(), 2);
    }

    #[test]
    fn test_parser_reports_bad_quality_with_record_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "reads.fq", b"@read1\nACGT\n+\nIIII\n@read2\nACGT\n+\nII I\n");
        let mut parser = FastqParser::open(&path, QualityEncoding::sanger()).unwrap();
        parser.next_record().unwrap().unwrap();

        let error = parser.next_record().unwrap_err();
        let message = error.to_string();
        assert!(message.contains("record 2"), "{message}");
        assert!(message.contains("Phred+33"), "{message}");
    }

    #[test]
    fn test_paired_reader_rejects_unequal_files() {
        let dir = tempfile::tempdir().unwrap();
        let path_1 = write_temp(&dir, "r1.fq", FASTQ);
        let path_2 = write_temp(&dir, "r2.fq", b"@read1\nACGT\n+\nIIII\n");
        let reader =
            ReadPairedFastq::open(&path_1, &path_2, QualityEncoding::sanger(), 1).unwrap();
        let error = reader.pull().unwrap_err();
        assert!(error.to_string().contains("unequal numbers of records"));
    }

    #[test]
    fn test_interleaved_reader_rejects_odd_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "reads.fq", b"@read1\nACGT\n+\nIIII\n");
        let reader = ReadInterleavedFastq::open(&path, QualityEncoding::sanger(), 1).unwrap();
        let error = reader.pull().unwrap_err();
        assert!(error.to_string().contains("odd number of records"));
    }

    #[test]
    fn test_interleaved_reader_pairs_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "reads.fq", FASTQ);
        let reader = ReadInterleavedFastq::open(&path, QualityEncoding::sanger(), 7).unwrap();
        let outputs = reader.pull().unwrap();
        assert_eq!(outputs.len(), 1);
        let (target, Chunk::Read(chunk)) = &outputs[0] else {
            panic!("expected read chunk");
        };
        assert_eq!(*target, 7);
        assert!(chunk.eof);
        assert_eq!(chunk.reads_1.len(), 1);
        assert_eq!(chunk.reads_2.len(), 1);
        assert_eq!(chunk.reads_2[0].header, b"read2");
    }

    #[test]
    fn test_gzip_compress_round_trips() {
        let stage = GzipCompress::new(6, 9).unwrap();
        let mut chunk = OutputChunk::new(true);
        chunk.data = FASTQ.to_vec();
        chunk.records = 2;

        let outputs = stage.process(Chunk::Output(chunk)).unwrap();
        let (target, Chunk::Compressed(compressed)) = &outputs[0] else {
            panic!("expected compressed chunk");
        };
        assert_eq!(*target, 9);
        assert!(compressed.eof);
        assert_eq!(compressed.records, 2);

        let mut decoded = Vec::new();
        MultiGzDecoder::new(&compressed.data[..]).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, FASTQ);
    }

    #[test]
    fn test_bzip2_compress_round_trips() {
        let stage = Bzip2Compress::new(6, 3).unwrap();
        let mut chunk = OutputChunk::new(false);
        chunk.data = FASTQ.to_vec();

        let outputs = stage.process(Chunk::Output(chunk)).unwrap();
        let (_, Chunk::Compressed(compressed)) = &outputs[0] else {
            panic!("expected compressed chunk");
        };

        let mut decoded = Vec::new();
        MultiBzDecoder::new(&compressed.data[..]).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, FASTQ);
    }

    #[test]
    fn test_empty_chunk_passes_through_compressor() {
        let stage = GzipCompress::new(6, 9).unwrap();
        let outputs = stage.process(Chunk::Output(OutputChunk::new(true))).unwrap();
        let (_, Chunk::Compressed(compressed)) = &outputs[0] else {
            panic!("expected compressed chunk");
        };
        assert!(compressed.data.is_empty());
        assert!(compressed.eof);
    }

    #[test]
    fn test_writer_writes_and_flushes_on_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fastq");
        let writer = WriteFastq::create(&path).unwrap();

        let mut chunk = OutputChunk::new(false);
        chunk.data = b"@r\nA\n+\nI\n".to_vec();
        writer.process(Chunk::Output(chunk)).unwrap();

        let mut eof_chunk = OutputChunk::new(true);
        eof_chunk.data = b"@s\nC\n+\nI\n".to_vec();
        writer.process(Chunk::Output(eof_chunk)).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"@r\nA\n+\nI\n@s\nC\n+\nI\n");
    }
}
