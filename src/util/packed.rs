//! Fixed-width bit packing (DirectWriter/DirectReader) and the
//! piecewise-linear encoding of monotonic sequences built on top of it.

use crate::store::{IndexInput, IndexOutput};
use crate::Error;

/// Bits to represent `value`; zero for zero. A zero-width sequence is
/// stored as width alone, no data bytes.
#[inline]
pub fn bits_required(value: u64) -> u32 {
    64 - value.leading_zeros()
}

#[inline]
fn low_mask(bits: u32) -> u128 {
    if bits == 0 {
        0
    } else {
        (1u128 << bits) - 1
    }
}

/// Packs `num_values` unsigned integers at a fixed `bits_per_value`
/// into a byte stream, most significant bit first. Byte-aligned widths
/// go out as plain big-endian fixed-size values.
pub struct DirectWriter<'a, W: IndexOutput> {
    output: &'a mut W,
    num_values: u64,
    bits_per_value: u32,
    count: u64,
    buffer: u128,
    pending_bits: u32,
    finished: bool,
}

impl<'a, W: IndexOutput> DirectWriter<'a, W> {
    pub fn new(output: &'a mut W, num_values: u64, bits_per_value: u32) -> Result<Self, Error> {
        if bits_per_value == 0 || bits_per_value > 64 {
            return Err(Error::InvalidArgument(format!(
                "bits_per_value {} outside 1..=64",
                bits_per_value
            )));
        }
        Ok(Self {
            output,
            num_values,
            bits_per_value,
            count: 0,
            buffer: 0,
            pending_bits: 0,
            finished: false,
        })
    }

    pub fn add(&mut self, value: u64) -> Result<(), Error> {
        if self.finished {
            return Err(Error::AlreadyClosed("DirectWriter"));
        }
        if self.count >= self.num_values {
            return Err(Error::InvalidArgument(format!(
                "more than {} values added",
                self.num_values
            )));
        }
        if self.bits_per_value < 64 && value >= 1u64 << self.bits_per_value {
            return Err(Error::InvalidArgument(format!(
                "{} does not fit in {} bits",
                value, self.bits_per_value
            )));
        }
        self.count += 1;
        if self.bits_per_value % 8 == 0 {
            // Byte-aligned fast path: big-endian, fixed size.
            let width = (self.bits_per_value / 8) as usize;
            let bytes = value.to_be_bytes();
            return self.output.write_bytes(&bytes[8 - width..]);
        }
        self.buffer = (self.buffer << self.bits_per_value) | value as u128;
        self.pending_bits += self.bits_per_value;
        while self.pending_bits >= 8 {
            let byte = (self.buffer >> (self.pending_bits - 8)) as u8;
            self.output.write_byte(byte)?;
            self.pending_bits -= 8;
            self.buffer &= low_mask(self.pending_bits);
        }
        Ok(())
    }

    /// Flush the trailing partial byte, zero-padded.
    pub fn finish(&mut self) -> Result<(), Error> {
        if self.finished {
            return Err(Error::AlreadyClosed("DirectWriter"));
        }
        if self.count != self.num_values {
            return Err(Error::InvalidArgument(format!(
                "wrote {} of {} values",
                self.count, self.num_values
            )));
        }
        if self.pending_bits > 0 {
            let byte = ((self.buffer << (8 - self.pending_bits)) & 0xff) as u8;
            self.output.write_byte(byte)?;
            self.pending_bits = 0;
            self.buffer = 0;
        }
        self.finished = true;
        Ok(())
    }
}

pub struct DirectReader;

impl DirectReader {
    /// Sequential bulk read of `count` values from the current position.
    pub fn read<I: IndexInput>(
        input: &mut I,
        bits_per_value: u32,
        count: u64,
    ) -> Result<Vec<u64>, Error> {
        if bits_per_value > 64 {
            return Err(Error::InvalidArgument(format!(
                "bits_per_value {} outside 0..=64",
                bits_per_value
            )));
        }
        if bits_per_value == 0 {
            return Ok(vec![0; count as usize]);
        }
        let mut out = Vec::with_capacity(count as usize);
        let mut buffer: u128 = 0;
        let mut pending: u32 = 0;
        for _ in 0..count {
            while pending < bits_per_value {
                buffer = (buffer << 8) | input.read_byte()? as u128;
                pending += 8;
            }
            let value = (buffer >> (pending - bits_per_value)) as u64
                & if bits_per_value == 64 {
                    u64::max_value()
                } else {
                    (1u64 << bits_per_value) - 1
                };
            pending -= bits_per_value;
            buffer &= low_mask(pending);
            out.push(value);
        }
        Ok(out)
    }

    /// Random access: value `index` of a packed stream beginning at
    /// absolute offset `base_fp`.
    pub fn get_instance<I: IndexInput>(
        input: &mut I,
        base_fp: u64,
        bits_per_value: u32,
        index: u64,
    ) -> Result<u64, Error> {
        if bits_per_value == 0 {
            return Ok(0);
        }
        let bit_pos = index * bits_per_value as u64;
        let first_byte = bit_pos / 8;
        let bit_in_byte = (bit_pos % 8) as u32;
        let total_bits = bit_in_byte + bits_per_value;
        let num_bytes = ((total_bits + 7) / 8) as usize;
        input.seek(base_fp + first_byte)?;
        let mut acc: u128 = 0;
        for _ in 0..num_bytes {
            acc = (acc << 8) | input.read_byte()? as u128;
        }
        let shift = num_bytes as u32 * 8 - total_bits;
        Ok(((acc >> shift) & low_mask(bits_per_value)) as u64)
    }
}

const BLOCK_META_BYTES: u64 = 29;

/// Handle returned by [`DirectMonotonicWriter::finish`]; everything a
/// reader needs to locate the block metadata and packed deviations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonotonicMeta {
    pub num_values: u64,
    pub block_shift: u32,
    pub meta_fp: u64,
    pub data_fp: u64,
}

impl MonotonicMeta {
    pub fn num_blocks(&self) -> u64 {
        if self.num_values == 0 {
            0
        } else {
            ((self.num_values - 1) >> self.block_shift) + 1
        }
    }
}

/// Splits a non-decreasing sequence into `1 << block_shift` blocks; each
/// block stores its first value, an f32 average slope, and bit-packed
/// deviations from the predicted line. Near-linear sequences (file
/// offsets, dense addresses) pack to a few bits per value with O(1)
/// random access.
pub struct DirectMonotonicWriter<'a, M: IndexOutput, D: IndexOutput> {
    meta: &'a mut M,
    data: &'a mut D,
    num_values: u64,
    block_size: usize,
    result: MonotonicMeta,
    buffer: Vec<i64>,
    count: u64,
    last_value: i64,
    finished: bool,
}

impl<'a, M: IndexOutput, D: IndexOutput> DirectMonotonicWriter<'a, M, D> {
    pub fn new(
        meta: &'a mut M,
        data: &'a mut D,
        num_values: u64,
        block_shift: u32,
    ) -> Result<Self, Error> {
        if block_shift < 2 || block_shift > 22 {
            return Err(Error::InvalidArgument(format!(
                "block_shift {} outside 2..=22",
                block_shift
            )));
        }
        let result = MonotonicMeta {
            num_values,
            block_shift,
            meta_fp: meta.file_pointer(),
            data_fp: data.file_pointer(),
        };
        Ok(Self {
            meta,
            data,
            num_values,
            block_size: 1usize << block_shift,
            result,
            buffer: Vec::with_capacity(1usize << block_shift),
            count: 0,
            last_value: i64::min_value(),
            finished: false,
        })
    }

    pub fn add(&mut self, value: i64) -> Result<(), Error> {
        if self.finished {
            return Err(Error::AlreadyClosed("DirectMonotonicWriter"));
        }
        if self.count >= self.num_values {
            return Err(Error::InvalidArgument(format!(
                "more than {} values added",
                self.num_values
            )));
        }
        if self.count > 0 && value < self.last_value {
            return Err(Error::InvalidArgument(format!(
                "sequence not monotonic: {} after {}",
                value, self.last_value
            )));
        }
        self.buffer.push(value);
        self.last_value = value;
        self.count += 1;
        if self.buffer.len() == self.block_size {
            self.flush_block()?;
        }
        Ok(())
    }

    pub fn finish(&mut self) -> Result<MonotonicMeta, Error> {
        if self.finished {
            return Err(Error::AlreadyClosed("DirectMonotonicWriter"));
        }
        if self.count != self.num_values {
            return Err(Error::InvalidArgument(format!(
                "wrote {} of {} values",
                self.count, self.num_values
            )));
        }
        if !self.buffer.is_empty() {
            self.flush_block()?;
        }
        self.finished = true;
        Ok(self.result)
    }

    fn flush_block(&mut self) -> Result<(), Error> {
        let first = self.buffer[0];
        let last = *self.buffer.last().unwrap();
        let len = self.buffer.len();
        let avg_slope = if len == 1 {
            0.0f32
        } else {
            (last - first) as f32 / (len - 1) as f32
        };

        let mut min_deviation = i64::max_value();
        let mut max_deviation = i64::min_value();
        for (i, v) in self.buffer.iter().enumerate() {
            let expected = first + (avg_slope * i as f32).round() as i64;
            let deviation = v - expected;
            min_deviation = min_deviation.min(deviation);
            max_deviation = max_deviation.max(deviation);
        }
        let bits = bits_required((max_deviation - min_deviation) as u64);
        let data_offset = self.data.file_pointer() - self.result.data_fp;

        // 29 bytes: min, slope bits, min deviation, data offset, width.
        self.meta.write_long(first)?;
        self.meta.write_int(avg_slope.to_bits() as i32)?;
        self.meta.write_long(min_deviation)?;
        self.meta.write_long(data_offset as i64)?;
        self.meta.write_byte(bits as u8)?;

        if bits > 0 {
            let mut packer = DirectWriter::new(&mut *self.data, len as u64, bits)?;
            for (i, v) in self.buffer.iter().enumerate() {
                let expected = first + (avg_slope * i as f32).round() as i64;
                packer.add((v - expected - min_deviation) as u64)?;
            }
            packer.finish()?;
        }
        self.buffer.clear();
        Ok(())
    }
}

struct BlockMeta {
    min: i64,
    avg_slope: f32,
    min_deviation: i64,
    data_offset: u64,
    bits_per_value: u32,
}

fn read_block_meta<I: IndexInput>(
    meta_in: &mut I,
    meta: &MonotonicMeta,
    block: u64,
) -> Result<BlockMeta, Error> {
    meta_in.seek(meta.meta_fp + block * BLOCK_META_BYTES)?;
    let min = meta_in.read_long()?;
    let avg_slope = f32::from_bits(meta_in.read_int()? as u32);
    let min_deviation = meta_in.read_long()?;
    let data_offset = meta_in.read_long()? as u64;
    let bits_per_value = meta_in.read_byte()? as u32;
    Ok(BlockMeta {
        min,
        avg_slope,
        min_deviation,
        data_offset,
        bits_per_value,
    })
}

pub struct DirectMonotonicReader;

impl DirectMonotonicReader {
    /// O(1) random access.
    pub fn get<I: IndexInput>(
        meta: &MonotonicMeta,
        meta_in: &mut I,
        data_in: &mut I,
        index: u64,
    ) -> Result<i64, Error> {
        if index >= meta.num_values {
            return Err(Error::InvalidArgument(format!(
                "index {} past {} values",
                index, meta.num_values
            )));
        }
        let block = index >> meta.block_shift;
        let within = index & ((1u64 << meta.block_shift) - 1);
        let bm = read_block_meta(meta_in, meta, block)?;
        let deviation = if bm.bits_per_value == 0 {
            0
        } else {
            DirectReader::get_instance(
                data_in,
                meta.data_fp + bm.data_offset,
                bm.bits_per_value,
                within,
            )? as i64
        };
        Ok(bm.min + (bm.avg_slope * within as f32).round() as i64 + bm.min_deviation + deviation)
    }

    pub fn read_all<I: IndexInput>(
        meta: &MonotonicMeta,
        meta_in: &mut I,
        data_in: &mut I,
    ) -> Result<Vec<i64>, Error> {
        let mut out = Vec::with_capacity(meta.num_values as usize);
        let block_size = 1u64 << meta.block_shift;
        for block in 0..meta.num_blocks() {
            let bm = read_block_meta(meta_in, meta, block)?;
            let in_block = block_size.min(meta.num_values - block * block_size);
            let deviations = if bm.bits_per_value == 0 {
                vec![0u64; in_block as usize]
            } else {
                data_in.seek(meta.data_fp + bm.data_offset)?;
                DirectReader::read(data_in, bm.bits_per_value, in_block)?
            };
            for (i, dev) in deviations.into_iter().enumerate() {
                out.push(
                    bm.min
                        + (bm.avg_slope * i as f32).round() as i64
                        + bm.min_deviation
                        + dev as i64,
                );
            }
        }
        Ok(out)
    }
}
