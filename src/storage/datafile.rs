//! Native data file format for wavebank
//!
//! A data file stores compressed blocks of regularly sampled values for one
//! or more identifiers.
//!
//! Layout:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (64 bytes)                       │
//! │   magic: [u8; 4] = "WBNK"               │
//! │   version: u16                          │
//! │   compression: u8                       │
//! │   reserved: u8                          │
//! │   block_count: u32                      │
//! │   channel_count: u32                    │
//! │   min_start: i64                        │
//! │   max_end: i64                          │
//! │   reserved: [u8; 28]                    │
//! │   checksum: u32                         │
//! ├─────────────────────────────────────────┤
//! │ BLOCKS (variable)                       │
//! │   For each block:                       │
//! │     block_size: u32                     │
//! │     compressed_data: [u8; block_size]   │
//! │     block_checksum: u32                 │
//! ├─────────────────────────────────────────┤
//! │ FOOTER                                  │
//! │   channels: identifier + interval       │
//! │   blocks: channel, offset, size,        │
//! │           sample_count, start           │
//! │   footer_size: u32                      │
//! │   footer_checksum: u32                  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Files are written once to a hidden temporary sibling and renamed into
//! place, so a reader sees either the old file or the complete new one.

use crate::storage::compression::{compress_samples, decode_raw, decompress_samples, encode_raw};
use crate::storage::error::{BankError, BankResult};
use crate::storage::reader::{HeaderInfo, ReaderError};
use crate::storage::types::{Identifier, Series, TimeSpan};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for data file identification
pub const DATAFILE_MAGIC: [u8; 4] = *b"WBNK";

/// Current data file format version
const DATAFILE_VERSION: u16 = 1;

/// Header size in bytes
const HEADER_SIZE: usize = 64;

/// Format tag recorded in the index for native files
pub const NATIVE_FORMAT: &str = "wbk";

/// File extension used by [`DataFileWriter`] callers
pub const NATIVE_EXTENSION: &str = "wbk";

/// Default number of samples per block
pub const DEFAULT_BLOCK_SAMPLES: usize = 4096;

/// Compression type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Compression {
    None = 0,
    Lz4 = 1,
}

impl TryFrom<u8> for Compression {
    type Error = ReaderError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            _ => Err(ReaderError::Format(format!(
                "Unknown compression type: {}",
                value
            ))),
        }
    }
}

/// Data file header
#[derive(Debug, Clone)]
pub struct DataFileHeader {
    pub version: u16,
    pub compression: Compression,
    pub block_count: u32,
    pub channel_count: u32,
    /// First sample time across all blocks
    pub min_start: i64,
    /// Last sample time across all blocks
    pub max_end: i64,
}

impl DataFileHeader {
    fn new(compression: Compression) -> Self {
        Self {
            version: DATAFILE_VERSION,
            compression,
            block_count: 0,
            channel_count: 0,
            min_start: i64::MAX,
            max_end: i64::MIN,
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];

        buf[0..4].copy_from_slice(&DATAFILE_MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6] = self.compression as u8;
        buf[8..12].copy_from_slice(&self.block_count.to_le_bytes());
        buf[12..16].copy_from_slice(&self.channel_count.to_le_bytes());
        buf[16..24].copy_from_slice(&self.min_start.to_le_bytes());
        buf[24..32].copy_from_slice(&self.max_end.to_le_bytes());
        // bytes 32-59 reserved

        let checksum = crc32fast::hash(&buf[0..60]);
        buf[60..64].copy_from_slice(&checksum.to_le_bytes());

        buf
    }

    /// Parse header from bytes
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Result<Self, ReaderError> {
        if buf[0..4] != DATAFILE_MAGIC {
            return Err(ReaderError::Format(format!(
                "Invalid magic: {:?}",
                &buf[0..4]
            )));
        }

        let stored_checksum = read_u32(&buf[60..64]);
        let computed_checksum = crc32fast::hash(&buf[0..60]);
        if stored_checksum != computed_checksum {
            return Err(ReaderError::Checksum(format!(
                "header checksum mismatch: stored={}, computed={}",
                stored_checksum, computed_checksum
            )));
        }

        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version > DATAFILE_VERSION {
            return Err(ReaderError::Format(format!(
                "Unsupported version: {}",
                version
            )));
        }

        Ok(Self {
            version,
            compression: Compression::try_from(buf[6])?,
            block_count: read_u32(&buf[8..12]),
            channel_count: read_u32(&buf[12..16]),
            min_start: read_i64(&buf[16..24]),
            max_end: read_i64(&buf[24..32]),
        })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn read_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    i64::from_le_bytes(buf)
}

/// One identifier stored in a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMeta {
    pub identifier: Identifier,
    pub sample_interval: i64,
}

/// Metadata for a single block within a data file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockMeta {
    /// Index into the channel table
    pub channel: u16,
    /// Offset from start of file
    pub offset: u64,
    /// Size of compressed data
    pub size: u32,
    pub sample_count: u32,
    /// Timestamp of the first sample
    pub start: i64,
}

impl BlockMeta {
    /// Timestamp of the last sample, `None` if it falls outside the i64 time line
    pub fn end(&self, sample_interval: i64) -> Option<i64> {
        let steps = i64::from(self.sample_count.saturating_sub(1));
        steps.checked_mul(sample_interval)?.checked_add(self.start)
    }

    pub fn span(&self, sample_interval: i64) -> Result<TimeSpan, ReaderError> {
        let end = self.end(sample_interval).ok_or_else(|| {
            ReaderError::Format(format!(
                "block of {} samples at {} with interval {} ends outside the time line",
                self.sample_count, self.start, sample_interval
            ))
        })?;
        Ok(TimeSpan {
            start: self.start,
            end,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Footer {
    channels: Vec<ChannelMeta>,
    blocks: Vec<BlockMeta>,
}

/// Check whether `path` starts with the data file magic
///
/// Files shorter than the magic are not data files. Open errors propagate.
pub fn has_magic(path: &Path) -> std::io::Result<bool> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 4];
    let mut filled = 0;
    while filled < magic.len() {
        let n = file.read(&mut magic[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(magic == DATAFILE_MAGIC)
}

/// An open data file, ready for block reads
pub struct DataFile {
    pub path: PathBuf,
    pub header: DataFileHeader,
    pub channels: Vec<ChannelMeta>,
    pub blocks: Vec<BlockMeta>,
    reader: BufReader<File>,
}

impl DataFile {
    /// Open an existing data file, reading header and footer only
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReaderError> {
        let path = path.as_ref().to_path_buf();
        let mut reader = BufReader::new(File::open(&path)?);

        let mut header_buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_buf)?;
        let header = DataFileHeader::from_bytes(&header_buf)?;

        let footer = Self::read_footer(&mut reader)?;
        if footer.blocks.len() != header.block_count as usize
            || footer.channels.len() != header.channel_count as usize
        {
            return Err(ReaderError::Format(format!(
                "footer lists {} blocks / {} channels, header says {} / {}",
                footer.blocks.len(),
                footer.channels.len(),
                header.block_count,
                header.channel_count
            )));
        }
        if let Some(block) = footer
            .blocks
            .iter()
            .find(|b| b.channel as usize >= footer.channels.len())
        {
            return Err(ReaderError::Format(format!(
                "block references unknown channel {}",
                block.channel
            )));
        }
        for block in &footer.blocks {
            block.span(footer.channels[block.channel as usize].sample_interval)?;
        }

        Ok(Self {
            path,
            header,
            channels: footer.channels,
            blocks: footer.blocks,
            reader,
        })
    }

    fn read_footer(reader: &mut BufReader<File>) -> Result<Footer, ReaderError> {
        let file_len = reader.seek(SeekFrom::End(0))?;
        if file_len < (HEADER_SIZE + 8) as u64 {
            return Err(ReaderError::Format("file too short for footer".into()));
        }

        reader.seek(SeekFrom::End(-8))?;
        let mut tail = [0u8; 8];
        reader.read_exact(&mut tail)?;
        let footer_size = read_u32(&tail[0..4]) as u64;
        let stored_checksum = read_u32(&tail[4..8]);

        if footer_size + 8 + HEADER_SIZE as u64 > file_len {
            return Err(ReaderError::Format(format!(
                "footer size {} exceeds file length {}",
                footer_size, file_len
            )));
        }

        reader.seek(SeekFrom::End(-(footer_size as i64) - 8))?;
        let mut footer_data = vec![0u8; footer_size as usize];
        reader.read_exact(&mut footer_data)?;

        if crc32fast::hash(&footer_data) != stored_checksum {
            return Err(ReaderError::Checksum("footer checksum mismatch".into()));
        }

        bincode::deserialize(&footer_data).map_err(|e| ReaderError::Format(e.to_string()))
    }

    /// Index of the channel holding `identifier`, if any
    fn channel_indices<'a>(&'a self, identifier: &'a Identifier) -> impl Iterator<Item = usize> + 'a {
        self.channels
            .iter()
            .enumerate()
            .filter(move |(_, c)| &c.identifier == identifier)
            .map(|(i, _)| i)
    }

    /// Blocks of one channel, ordered by start time
    fn channel_blocks(&self, channel: usize) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..self.blocks.len())
            .filter(|&i| self.blocks[i].channel as usize == channel)
            .collect();
        idx.sort_by_key(|&i| self.blocks[i].start);
        idx
    }

    /// Header metadata: one entry per contiguous run of blocks per channel
    pub fn header_info(&self) -> Result<Vec<HeaderInfo>, ReaderError> {
        let mut infos = Vec::new();

        for (channel_idx, channel) in self.channels.iter().enumerate() {
            let interval = channel.sample_interval;
            let mut run: Option<TimeSpan> = None;

            for block_idx in self.channel_blocks(channel_idx) {
                let span = self.blocks[block_idx].span(interval)?;
                run = match run {
                    Some(current) if span.start <= current.end.saturating_add(interval) => {
                        Some(TimeSpan {
                            start: current.start,
                            end: current.end.max(span.end),
                        })
                    }
                    Some(current) => {
                        infos.push(HeaderInfo::native(channel, current));
                        Some(span)
                    }
                    None => Some(span),
                };
            }

            if let Some(current) = run {
                infos.push(HeaderInfo::native(channel, current));
            }
        }

        Ok(infos)
    }

    /// Read and decompress a specific block
    pub fn read_block(&mut self, block_idx: usize) -> Result<Vec<f64>, ReaderError> {
        let meta = self.blocks.get(block_idx).ok_or_else(|| {
            ReaderError::Format(format!("Block index out of range: {}", block_idx))
        })?;
        let (offset, expected_size, expected_count) = (meta.offset, meta.size, meta.sample_count);

        self.reader.seek(SeekFrom::Start(offset))?;

        let mut size_buf = [0u8; 4];
        self.reader.read_exact(&mut size_buf)?;
        let size = u32::from_le_bytes(size_buf);
        if size != expected_size {
            return Err(ReaderError::Format(format!(
                "block {} size {} does not match footer size {}",
                block_idx, size, expected_size
            )));
        }

        let mut data = vec![0u8; size as usize];
        self.reader.read_exact(&mut data)?;

        let mut checksum_buf = [0u8; 4];
        self.reader.read_exact(&mut checksum_buf)?;
        if u32::from_le_bytes(checksum_buf) != crc32fast::hash(&data) {
            return Err(ReaderError::Checksum(format!(
                "Block {} checksum mismatch",
                block_idx
            )));
        }

        let samples = match self.header.compression {
            Compression::Lz4 => decompress_samples(&data),
            Compression::None => decode_raw(&data),
        }
        .map_err(|e| ReaderError::Format(e.to_string()))?;

        if samples.len() != expected_count as usize {
            return Err(ReaderError::Format(format!(
                "block {} decoded {} samples, footer says {}",
                block_idx,
                samples.len(),
                expected_count
            )));
        }

        Ok(samples)
    }

    /// Read the samples of `identifier` that fall inside `span`
    ///
    /// Only blocks overlapping `span` are read. Adjacent blocks are joined,
    /// so each returned segment is one gap-free run.
    pub fn read_range(
        &mut self,
        identifier: &Identifier,
        span: &TimeSpan,
    ) -> Result<Vec<Series>, ReaderError> {
        let mut segments: Vec<Series> = Vec::new();
        let channels: Vec<usize> = self.channel_indices(identifier).collect();

        for channel_idx in channels {
            let interval = self.channels[channel_idx].sample_interval;
            let mut current: Option<Series> = None;

            for block_idx in self.channel_blocks(channel_idx) {
                let block_span = self.blocks[block_idx].span(interval)?;
                if !block_span.overlaps(span) {
                    continue;
                }
                let samples = self.read_block(block_idx)?;
                let Some(piece) =
                    Series::new(identifier.clone(), interval, block_span.start, samples).clip(span)
                else {
                    continue;
                };

                current = match current {
                    Some(mut run) if run.end().checked_add(interval) == Some(piece.start) => {
                        run.samples.extend(piece.samples);
                        Some(run)
                    }
                    Some(run) => {
                        segments.push(run);
                        Some(piece)
                    }
                    None => Some(piece),
                };
            }

            if let Some(run) = current {
                segments.push(run);
            }
        }

        Ok(segments)
    }

    /// Total number of samples across all blocks
    pub fn sample_count(&self) -> u64 {
        self.blocks.iter().map(|b| b.sample_count as u64).sum()
    }
}

/// Writes complete data files in one shot
pub struct DataFileWriter {
    path: PathBuf,
    compression: Compression,
    block_samples: usize,
}

impl DataFileWriter {
    pub fn new(path: impl AsRef<Path>, compression: Compression) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            compression,
            block_samples: DEFAULT_BLOCK_SAMPLES,
        }
    }

    pub fn block_samples(mut self, samples: usize) -> Self {
        self.block_samples = samples.max(1);
        self
    }

    /// Temporary sibling; dot-prefixed so bank scans ignore it
    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(format!(".{}.tmp", name))
    }

    /// Write `series` to the target path, replacing any existing file
    ///
    /// Empty series are skipped; input with no samples at all is rejected.
    pub fn write(&self, series: &[Series]) -> BankResult<DataFileHeader> {
        if series.iter().all(Series::is_empty) {
            return Err(BankError::InvalidTimeRange);
        }
        if let Some(bad) = series.iter().find(|s| s.sample_interval <= 0) {
            return Err(BankError::Serialization(format!(
                "sample interval of {} must be positive, got {}",
                bad.identifier, bad.sample_interval
            )));
        }
        if series.iter().any(|s| s.checked_end().is_none()) {
            return Err(BankError::InvalidTimeRange);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp = self.temp_path();
        let result = self.write_to(&temp, series);
        match result {
            Ok(header) => {
                std::fs::rename(&temp, &self.path)?;
                Ok(header)
            }
            Err(e) => {
                let _ = std::fs::remove_file(&temp);
                Err(e)
            }
        }
    }

    fn write_to(&self, temp: &Path, series: &[Series]) -> BankResult<DataFileHeader> {
        let file = File::create(temp)?;
        let mut writer = BufWriter::new(file);

        let mut header = DataFileHeader::new(self.compression);
        writer.write_all(&header.to_bytes())?;

        let mut channel_lookup: BTreeMap<(Identifier, i64), u16> = BTreeMap::new();
        let mut channels = Vec::new();
        let mut blocks = Vec::new();
        let mut offset = HEADER_SIZE as u64;

        for s in series.iter().filter(|s| !s.is_empty()) {
            let key = (s.identifier.clone(), s.sample_interval);
            let channel = match channel_lookup.get(&key) {
                Some(&idx) => idx,
                None => {
                    let idx = u16::try_from(channels.len()).map_err(|_| {
                        BankError::Serialization("too many channels in one data file".into())
                    })?;
                    channels.push(ChannelMeta {
                        identifier: s.identifier.clone(),
                        sample_interval: s.sample_interval,
                    });
                    channel_lookup.insert(key, idx);
                    idx
                }
            };

            for (chunk_idx, chunk) in s.samples.chunks(self.block_samples).enumerate() {
                let data = match self.compression {
                    Compression::Lz4 => compress_samples(chunk)?,
                    Compression::None => encode_raw(chunk),
                };
                let start = s.start + (chunk_idx * self.block_samples) as i64 * s.sample_interval;

                let checksum = crc32fast::hash(&data);
                writer.write_all(&(data.len() as u32).to_le_bytes())?;
                writer.write_all(&data)?;
                writer.write_all(&checksum.to_le_bytes())?;

                let block = BlockMeta {
                    channel,
                    offset,
                    size: data.len() as u32,
                    sample_count: chunk.len() as u32,
                    start,
                };
                header.min_start = header.min_start.min(block.start);
                let end = block.end(s.sample_interval).ok_or(BankError::InvalidTimeRange)?;
                header.max_end = header.max_end.max(end);
                offset += data.len() as u64 + 8;
                blocks.push(block);
            }
        }

        header.block_count = blocks.len() as u32;
        header.channel_count = channels.len() as u32;

        let footer = bincode::serialize(&Footer { channels, blocks })?;
        writer.write_all(&footer)?;
        writer.write_all(&(footer.len() as u32).to_le_bytes())?;
        writer.write_all(&crc32fast::hash(&footer).to_le_bytes())?;

        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&header.to_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        Ok(header)
    }
}
