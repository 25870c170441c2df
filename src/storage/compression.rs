//! Compression module for native bank data files
//!
//! Implements XOR-delta encoding + LZ4 compression for sample blocks.
//!
//! Strategy:
//! 1. Take the IEEE-754 bit pattern of every sample
//! 2. XOR each pattern with its predecessor (slowly varying signals
//!    produce mostly-zero words)
//! 3. Serialize to compact binary format with bincode
//! 4. LZ4 compress the result
//!
//! Timestamps are not stored per sample: blocks are regularly sampled and
//! carry their start time in the file footer.

use crate::storage::error::{BankError, BankResult};
use serde::{Deserialize, Serialize};

/// Intermediate format for XOR-delta encoded samples
#[derive(Debug, Serialize, Deserialize)]
struct EncodedBlock {
    /// Bit pattern of the first sample
    first: u64,
    /// XOR of each sample's bits with the previous sample's bits
    xors: Vec<u64>,
}

/// Compress a block of samples using XOR-delta encoding + LZ4
///
/// # Arguments
/// * `samples` - Samples in time order
///
/// # Returns
/// Compressed bytes ready for storage
pub fn compress_samples(samples: &[f64]) -> BankResult<Vec<u8>> {
    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let first = samples[0].to_bits();
    let mut xors = Vec::with_capacity(samples.len() - 1);
    let mut prev = first;
    for sample in &samples[1..] {
        let bits = sample.to_bits();
        xors.push(bits ^ prev);
        prev = bits;
    }

    let block = EncodedBlock { first, xors };

    // Serialize with bincode (compact binary format)
    let serialized =
        bincode::serialize(&block).map_err(|e| BankError::Serialization(e.to_string()))?;

    // LZ4 compress
    Ok(lz4_flex::compress_prepend_size(&serialized))
}

/// Decompress a block back to samples
///
/// # Arguments
/// * `data` - LZ4-compressed data from compress_samples
pub fn decompress_samples(data: &[u8]) -> BankResult<Vec<f64>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let decompressed = lz4_flex::decompress_size_prepended(data)
        .map_err(|e| BankError::Serialization(format!("LZ4 decompression failed: {}", e)))?;

    let block: EncodedBlock = bincode::deserialize(&decompressed)
        .map_err(|e| BankError::Serialization(e.to_string()))?;

    let mut samples = Vec::with_capacity(block.xors.len() + 1);
    let mut prev = block.first;
    samples.push(f64::from_bits(prev));
    for xor in block.xors {
        prev ^= xor;
        samples.push(f64::from_bits(prev));
    }

    Ok(samples)
}

/// Store samples uncompressed as little-endian f64
pub fn encode_raw(samples: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 8);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Inverse of [`encode_raw`]
pub fn decode_raw(data: &[u8]) -> BankResult<Vec<f64>> {
    if data.len() % 8 != 0 {
        return Err(BankError::Serialization(format!(
            "raw block length {} is not a multiple of 8",
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            f64::from_le_bytes(buf)
        })
        .collect())
}

/// Compression statistics for a block
#[derive(Debug)]
pub struct CompressionStats {
    /// Number of samples
    pub sample_count: usize,
    /// Uncompressed size (bytes)
    pub original_size: usize,
    /// Compressed size (bytes)
    pub compressed_size: usize,
    /// Compression ratio (original / compressed)
    pub ratio: f64,
}

/// Calculate compression statistics
pub fn compression_stats(samples: &[f64], compressed: &[u8]) -> CompressionStats {
    let original_size = samples.len() * 8;
    let compressed_size = compressed.len();
    let ratio = if compressed_size > 0 {
        original_size as f64 / compressed_size as f64
    } else {
        0.0
    };

    CompressionStats {
        sample_count: samples.len(),
        original_size,
        compressed_size,
        ratio,
    }
}
