//! Binary layout of the partition files.
//!
//! Every field is a little endian 4 byte word. A three axis shard is laid out as
//!
//! ```text
//! i32 offset
//! u32 n_rows, n_cols, n_words, n_entries, n_values
//! u32[n_entries] row_index
//! u32[n_entries] col_index
//! u32[n_entries] bag_end
//! u32[n_values]  word_index
//! f32[n_values]  word_value
//! ```
//!
//! while a two axis shard (a plain sparse matrix) drops the word axis:
//!
//! ```text
//! i32 offset
//! u32 n_rows, n_cols, n_entries
//! u32[n_entries] row_index
//! u32[n_entries] col_index
//! f32[n_entries] value
//! ```

use std::{fs, path::Path};

use log::debug;

use crate::{
    error::{FormatErr, Result},
    shard::{Dims, SparseTensorShard},
};

const WORD: usize = size_of::<u32>();

/// The two flavours of partition files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardFormat {
    /// A sparse matrix, decoded as a tensor with a single word per bag.
    TwoAxis,
    /// A sparse tensor of bags of words.
    ThreeAxis,
}

impl ShardFormat {
    fn header_len(self) -> usize {
        let counts = match self {
            ShardFormat::TwoAxis => 3,
            ShardFormat::ThreeAxis => 5,
        };

        WORD * (1 + counts)
    }

    fn body_len(self, entries: usize, values: usize) -> usize {
        let words = match self {
            ShardFormat::TwoAxis => entries.saturating_mul(3),
            ShardFormat::ThreeAxis => entries
                .saturating_mul(3)
                .saturating_add(values.saturating_mul(2)),
        };

        words.saturating_mul(WORD)
    }
}

/// The header of a partition file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardHeader {
    /// Where this partition starts inside the global factor matrix of the axis it splits.
    pub offset: i32,
}

/// A decoded partition file.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorPartition {
    pub header: ShardHeader,
    pub shard: SparseTensorShard,
}

impl TensorPartition {
    /// Creates a new `TensorPartition`.
    pub fn new(offset: i32, shard: SparseTensorShard) -> Self {
        Self {
            header: ShardHeader { offset },
            shard,
        }
    }

    pub fn offset(&self) -> i32 {
        self.header.offset
    }
}

/// Reads and decodes a partition file.
///
/// # Arguments
/// * `path` - The location of the file.
/// * `format` - The layout the file was written with.
///
/// # Returns
/// The decoded partition, an `Io` error if the file can't be read or a `Format`
/// error if its content isn't a valid shard.
pub fn parse<P: AsRef<Path>>(path: P, format: ShardFormat) -> Result<TensorPartition> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let partition = decode(&bytes, format)?;

    debug!(
        offset = partition.offset(),
        entries = partition.shard.n_entries(),
        values = partition.shard.n_values();
        "parsed shard {}",
        path.display()
    );

    Ok(partition)
}

/// Decodes a partition out of its raw bytes.
///
/// # Arguments
/// * `bytes` - The complete content of a partition file.
/// * `format` - The layout of `bytes`.
///
/// # Returns
/// The decoded partition or a `Format` error.
pub fn decode(bytes: &[u8], format: ShardFormat) -> Result<TensorPartition> {
    let header_len = format.header_len();
    if bytes.len() < header_len {
        return Err(FormatErr::LengthMismatch {
            declared: header_len,
            actual: bytes.len(),
        }
        .into());
    }

    let mut reader = Reader::new(bytes);
    let offset = reader.u32() as i32;

    let (dims, entries, values) = match format {
        ShardFormat::TwoAxis => {
            let (rows, cols, entries) = (reader.u32(), reader.u32(), reader.u32());
            (Dims::new(rows, cols, 1), entries as usize, entries as usize)
        }
        ShardFormat::ThreeAxis => {
            let (rows, cols, words) = (reader.u32(), reader.u32(), reader.u32());
            let (entries, values) = (reader.u32(), reader.u32());
            (Dims::new(rows, cols, words), entries as usize, values as usize)
        }
    };

    let declared = header_len.saturating_add(format.body_len(entries, values));
    if declared != bytes.len() {
        return Err(FormatErr::LengthMismatch {
            declared,
            actual: bytes.len(),
        }
        .into());
    }

    let row_index = reader.u32s(entries);
    let col_index = reader.u32s(entries);

    let shard = match format {
        ShardFormat::TwoAxis => {
            let value = reader.f32s(entries);
            let bag_end = (1..=entries as u32).collect();
            let word_index = vec![0; entries];
            SparseTensorShard::new(dims, row_index, col_index, bag_end, word_index, value)?
        }
        ShardFormat::ThreeAxis => {
            let bag_end = reader.u32s(entries);
            let word_index = reader.u32s(values);
            let word_value = reader.f32s(values);
            SparseTensorShard::new(dims, row_index, col_index, bag_end, word_index, word_value)?
        }
    };

    Ok(TensorPartition::new(offset, shard))
}

/// Encodes a partition, the exact inverse of `decode`.
///
/// # Arguments
/// * `partition` - The partition to encode.
/// * `format` - The layout to write.
///
/// # Returns
/// The encoded bytes or a `NotTwoAxis` error if a shard with bags of more than a
/// single word is written as a matrix.
pub fn encode(partition: &TensorPartition, format: ShardFormat) -> Result<Vec<u8>> {
    let shard = &partition.shard;
    let Dims { rows, cols, words } = shard.dims();
    let entries = shard.n_entries();

    let mut writer = Writer::with_capacity(
        format
            .header_len()
            .saturating_add(format.body_len(entries, shard.n_values())),
    );
    writer.u32(partition.offset() as u32);

    match format {
        ShardFormat::TwoAxis => {
            check_two_axis(shard)?;
            writer.u32s(&[rows, cols, entries as u32]);
            writer.u32s(shard.row_index());
            writer.u32s(shard.col_index());
            writer.f32s(shard.word_value());
        }
        ShardFormat::ThreeAxis => {
            writer.u32s(&[rows, cols, words, entries as u32, shard.n_values() as u32]);
            writer.u32s(shard.row_index());
            writer.u32s(shard.col_index());
            writer.u32s(shard.bag_end());
            writer.u32s(shard.word_index());
            writer.f32s(shard.word_value());
        }
    }

    Ok(writer.into_bytes())
}

/// Encodes a partition and writes it to `path`, replacing any existing file.
pub fn write<P: AsRef<Path>>(
    path: P,
    partition: &TensorPartition,
    format: ShardFormat,
) -> Result<()> {
    let bytes = encode(partition, format)?;
    fs::write(path, bytes)?;
    Ok(())
}

fn check_two_axis(shard: &SparseTensorShard) -> Result<()> {
    if shard.n_words() != 1 {
        return Err(FormatErr::NotTwoAxis { entry: 0 }.into());
    }

    // With a single word every bag must hold exactly that word.
    match shard.entries().position(|entry| entry.bag.len() != 1) {
        Some(entry) => Err(FormatErr::NotTwoAxis { entry }.into()),
        None => Ok(()),
    }
}

/// Sequential little endian reader over a buffer whose length was already checked.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> &'a [u8] {
        let chunk = &self.bytes[self.pos..self.pos + n * WORD];
        self.pos += n * WORD;
        chunk
    }

    fn u32(&mut self) -> u32 {
        self.u32s(1)[0]
    }

    fn u32s(&mut self, n: usize) -> Vec<u32> {
        // The buffer isn't necessarily 4 byte aligned, so the words are copied out.
        let mut words: Vec<u32> = bytemuck::pod_collect_to_vec(self.take(n));
        words.iter_mut().for_each(|w| *w = u32::from_le(*w));
        words
    }

    fn f32s(&mut self, n: usize) -> Vec<f32> {
        self.u32s(n).into_iter().map(f32::from_bits).collect()
    }
}

struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    fn u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn u32s(&mut self, values: &[u32]) {
        if cfg!(target_endian = "little") {
            self.bytes.extend_from_slice(bytemuck::cast_slice(values));
        } else {
            values.iter().for_each(|&v| self.u32(v));
        }
    }

    fn f32s(&mut self, values: &[f32]) {
        if cfg!(target_endian = "little") {
            self.bytes.extend_from_slice(bytemuck::cast_slice(values));
        } else {
            values.iter().for_each(|v| self.u32(v.to_bits()));
        }
    }

    fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
