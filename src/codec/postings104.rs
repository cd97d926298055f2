//! Lucene104: the base postings format. Doc-id deltas go out in
//! StreamVByte groups of four, each followed by a frequency group when
//! the field stores frequencies, with a plain-VInt tail for the last
//! 1..3 documents. No skip data; `advance` is a linear scan.

use super::{PostingsWriter, TermState};
use crate::index::field_info::FieldInfo;
use crate::store::{ByteBuffersOutput, BytesInput, IndexInput, IndexOutput};
use crate::util::{prefix_sum, stream_vbyte};
use crate::{Error, NO_MORE_DOCS};

const GROUP_SIZE: usize = 4;

pub struct Lucene104PostingsWriter {
    doc_out: ByteBuffersOutput,
    write_freqs: bool,
    doc_start_fp: u64,
    last_doc_id: i32,
    doc_count: u32,
    total_term_freq: u64,
    doc_delta_buffer: [u32; GROUP_SIZE],
    freq_buffer: [u32; GROUP_SIZE],
    buffer_pos: usize,
    closed: bool,
}

impl Default for Lucene104PostingsWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Lucene104PostingsWriter {
    pub fn new() -> Self {
        Self {
            doc_out: ByteBuffersOutput::new(),
            write_freqs: false,
            doc_start_fp: 0,
            last_doc_id: 0,
            doc_count: 0,
            total_term_freq: 0,
            doc_delta_buffer: [0; GROUP_SIZE],
            freq_buffer: [0; GROUP_SIZE],
            buffer_pos: 0,
            closed: false,
        }
    }

    pub fn file_pointer(&self) -> u64 {
        self.doc_out.file_pointer()
    }

    /// Surrender the `.doc` stream to the directory layer.
    pub fn close(mut self) -> Result<Vec<u8>, Error> {
        if self.closed {
            return Err(Error::AlreadyClosed("Lucene104PostingsWriter"));
        }
        self.closed = true;
        self.doc_out.close()?;
        Ok(self.doc_out.into_bytes())
    }

    pub fn doc_bytes(&self) -> &[u8] {
        self.doc_out.as_bytes()
    }

    fn flush_group(&mut self) -> Result<(), Error> {
        debug_assert_eq!(self.buffer_pos, GROUP_SIZE);
        let mut encoded = [0u8; stream_vbyte::MAX_GROUP_BYTES];
        let n = stream_vbyte::encode(&self.doc_delta_buffer, &mut encoded)?;
        self.doc_out.write_bytes(&encoded[..n])?;
        if self.write_freqs {
            let n = stream_vbyte::encode(&self.freq_buffer, &mut encoded)?;
            self.doc_out.write_bytes(&encoded[..n])?;
        }
        self.buffer_pos = 0;
        Ok(())
    }
}

impl PostingsWriter for Lucene104PostingsWriter {
    fn set_field(&mut self, field: &FieldInfo) {
        self.write_freqs = field.has_freqs();
    }

    fn start_term(&mut self) {
        self.doc_start_fp = self.doc_out.file_pointer();
        self.last_doc_id = 0;
        self.doc_count = 0;
        self.total_term_freq = 0;
        self.buffer_pos = 0;
    }

    fn start_doc(&mut self, doc_id: i32, freq: i32, _norm: i8) -> Result<(), Error> {
        if doc_id < 0 {
            return Err(Error::InvalidArgument(format!("doc id {}", doc_id)));
        }
        if self.doc_count > 0 && doc_id <= self.last_doc_id {
            return Err(Error::OutOfOrder(format!(
                "doc {} after doc {}",
                doc_id, self.last_doc_id
            )));
        }
        if freq <= 0 {
            return Err(Error::InvalidArgument(format!(
                "freq {} for doc {}",
                freq, doc_id
            )));
        }

        self.doc_delta_buffer[self.buffer_pos] = (doc_id - self.last_doc_id) as u32;
        self.freq_buffer[self.buffer_pos] = freq as u32;
        self.buffer_pos += 1;

        self.total_term_freq += freq as u64;
        self.last_doc_id = doc_id;
        self.doc_count += 1;

        if self.buffer_pos == GROUP_SIZE {
            self.flush_group()?;
        }
        Ok(())
    }

    fn add_position(&mut self, _position: u32) -> Result<(), Error> {
        Err(Error::Unsupported("positions in the Lucene104 format"))
    }

    fn finish_term(&mut self) -> Result<TermState, Error> {
        // 1..3 leftover docs go out as plain vint pairs.
        for i in 0..self.buffer_pos {
            self.doc_out.write_vint(self.doc_delta_buffer[i])?;
            if self.write_freqs {
                self.doc_out.write_vint(self.freq_buffer[i])?;
            }
        }
        self.buffer_pos = 0;

        Ok(TermState {
            doc_start_fp: self.doc_start_fp,
            doc_freq: self.doc_count,
            total_term_freq: if self.write_freqs {
                Some(self.total_term_freq)
            } else {
                None
            },
            ..TermState::default()
        })
    }
}

pub struct Lucene104PostingsReader {
    doc_in: BytesInput,
}

impl Lucene104PostingsReader {
    pub fn new(doc_in: BytesInput) -> Self {
        Self { doc_in }
    }

    /// Cursor over one term; the clone carries its own file pointer.
    pub fn postings(
        &self,
        field: &FieldInfo,
        term: &TermState,
    ) -> Result<Lucene104PostingsEnum, Error> {
        Lucene104PostingsEnum::open(self.doc_in.clone(), term, field.has_freqs())
    }
}

/// Decode buffer: 128 docs, 32 StreamVByte groups per refill.
const BUFFER_SIZE: usize = 128;
/// Bytes pulled from the input per batched read.
const IO_BATCH_SIZE: usize = 512;

/// Caller-owned batch for [`Lucene104PostingsEnum::next_batch`].
pub struct PostingsBatch {
    pub docs: Vec<i32>,
    pub freqs: Vec<i32>,
    pub count: usize,
}

impl PostingsBatch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            docs: vec![0; capacity],
            freqs: vec![0; capacity],
            count: 0,
        }
    }
    pub fn capacity(&self) -> usize {
        self.docs.len()
    }
}

pub struct Lucene104PostingsEnum {
    doc_in: BytesInput,
    doc_freq: u32,
    write_freqs: bool,

    current_doc: i32,
    current_freq: i32,
    docs_read: u32,

    doc_delta_buffer: [u32; BUFFER_SIZE],
    freq_buffer: [u32; BUFFER_SIZE],
    buffer_pos: usize,
    buffer_limit: usize,

    io_batch: [u8; IO_BATCH_SIZE],
    io_pos: usize,
    io_limit: usize,
}

impl Lucene104PostingsEnum {
    pub(crate) fn open(
        mut doc_in: BytesInput,
        term: &TermState,
        write_freqs: bool,
    ) -> Result<Self, Error> {
        doc_in.seek(term.doc_start_fp)?;
        Ok(Self {
            doc_in,
            doc_freq: term.doc_freq,
            write_freqs,
            current_doc: -1,
            current_freq: 1,
            docs_read: 0,
            doc_delta_buffer: [0; BUFFER_SIZE],
            freq_buffer: [0; BUFFER_SIZE],
            buffer_pos: 0,
            buffer_limit: 0,
            io_batch: [0; IO_BATCH_SIZE],
            io_pos: 0,
            io_limit: 0,
        })
    }

    pub fn doc_id(&self) -> i32 {
        self.current_doc
    }

    pub fn freq(&self) -> i32 {
        self.current_freq
    }

    pub fn cost(&self) -> i64 {
        self.doc_freq as i64
    }

    /// Top up the I/O batch, sliding unconsumed bytes to the front.
    fn refill_io(&mut self) -> Result<(), Error> {
        let remaining = self.io_limit - self.io_pos;
        if remaining > 0 && self.io_pos > 0 {
            self.io_batch.copy_within(self.io_pos..self.io_limit, 0);
        }
        let in_file = (self.doc_in.len() - self.doc_in.file_pointer()) as usize;
        let to_read = (IO_BATCH_SIZE - remaining).min(in_file);
        if to_read > 0 {
            let start = remaining;
            self.doc_in
                .read_bytes(&mut self.io_batch[start..start + to_read])?;
        }
        self.io_pos = 0;
        self.io_limit = remaining + to_read;
        Ok(())
    }

    fn ensure_io(&mut self, want: usize) -> Result<(), Error> {
        if self.io_limit - self.io_pos < want {
            self.refill_io()?;
        }
        Ok(())
    }

    fn read_byte_batched(&mut self) -> Result<u8, Error> {
        if self.io_pos >= self.io_limit {
            self.refill_io()?;
            if self.io_pos >= self.io_limit {
                return Err(Error::Corruption(
                    "postings stream ended mid-term".to_string(),
                ));
            }
        }
        let b = self.io_batch[self.io_pos];
        self.io_pos += 1;
        Ok(b)
    }

    fn read_vint_batched(&mut self) -> Result<u32, Error> {
        let mut result = 0u32;
        let mut shift = 0u32;
        for _ in 0..5 {
            let b = self.read_byte_batched()?;
            result |= ((b & 0x7f) as u32) << shift;
            if b & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(Error::Corruption("vint longer than 5 bytes".to_string()))
    }

    fn decode_group(&mut self, at: usize, freqs: bool) -> Result<(), Error> {
        self.ensure_io(stream_vbyte::MAX_GROUP_BYTES)?;
        let window = &self.io_batch[self.io_pos..self.io_limit];
        let consumed = if freqs {
            stream_vbyte::decode4(window, &mut self.freq_buffer[at..at + GROUP_SIZE])?
        } else {
            stream_vbyte::decode4(window, &mut self.doc_delta_buffer[at..at + GROUP_SIZE])?
        };
        self.io_pos += consumed;
        Ok(())
    }

    fn refill_buffer(&mut self) -> Result<(), Error> {
        self.buffer_pos = 0;
        let mut idx = 0usize;
        let mut remaining = (self.doc_freq - self.docs_read) as usize;

        while remaining >= GROUP_SIZE && idx + GROUP_SIZE <= BUFFER_SIZE {
            self.decode_group(idx, false)?;
            if self.write_freqs {
                self.decode_group(idx, true)?;
            }
            idx += GROUP_SIZE;
            remaining -= GROUP_SIZE;
        }
        // vint tail for the last 1..3 docs of the term
        while remaining > 0 && idx < BUFFER_SIZE {
            self.doc_delta_buffer[idx] = self.read_vint_batched()?;
            self.freq_buffer[idx] = if self.write_freqs {
                self.read_vint_batched()?
            } else {
                1
            };
            idx += 1;
            remaining -= 1;
        }
        self.buffer_limit = idx;
        Ok(())
    }

    pub fn next_doc(&mut self) -> Result<i32, Error> {
        if self.docs_read >= self.doc_freq {
            self.current_doc = NO_MORE_DOCS;
            return Ok(NO_MORE_DOCS);
        }
        if self.buffer_pos >= self.buffer_limit {
            self.refill_buffer()?;
            if self.buffer_limit == 0 {
                return Err(Error::Corruption(
                    "postings stream ended mid-term".to_string(),
                ));
            }
        }
        let delta = self.doc_delta_buffer[self.buffer_pos] as i32;
        self.current_doc = if self.docs_read == 0 {
            delta
        } else {
            self.current_doc + delta
        };
        self.current_freq = if self.write_freqs {
            self.freq_buffer[self.buffer_pos] as i32
        } else {
            1
        };
        self.buffer_pos += 1;
        self.docs_read += 1;
        Ok(self.current_doc)
    }

    /// Linear scan to the first doc >= target.
    pub fn advance(&mut self, target: i32) -> Result<i32, Error> {
        if target < self.current_doc {
            return Err(Error::OutOfOrder(format!(
                "advance to {} behind {}",
                target, self.current_doc
            )));
        }
        while self.current_doc < target {
            if self.next_doc()? == NO_MORE_DOCS {
                break;
            }
        }
        Ok(self.current_doc)
    }

    /// Copy up to `batch.capacity()` postings out, converting deltas to
    /// absolute ids with the SIMD prefix sum when a chunk is 8 or 16 wide.
    pub fn next_batch(&mut self, batch: &mut PostingsBatch) -> Result<usize, Error> {
        let remaining = (self.doc_freq - self.docs_read) as usize;
        let to_return = remaining.min(batch.capacity());
        if to_return == 0 {
            batch.count = 0;
            return Ok(0);
        }

        let mut count = 0usize;
        let mut base = if self.docs_read == 0 {
            0
        } else {
            self.current_doc
        };

        while count < to_return {
            if self.buffer_pos >= self.buffer_limit {
                self.refill_buffer()?;
                if self.buffer_limit == 0 {
                    break;
                }
            }
            let available = self.buffer_limit - self.buffer_pos;
            let take = (to_return - count).min(available);

            if take == 8 || take == 16 {
                let mut deltas = [0i32; 16];
                for i in 0..take {
                    deltas[i] = self.doc_delta_buffer[self.buffer_pos + i] as i32;
                }
                prefix_sum::prefix_sum(&mut deltas[..take], base);
                batch.docs[count..count + take].copy_from_slice(&deltas[..take]);
                if self.write_freqs {
                    for i in 0..take {
                        batch.freqs[count + i] = self.freq_buffer[self.buffer_pos + i] as i32;
                    }
                } else {
                    for slot in batch.freqs[count..count + take].iter_mut() {
                        *slot = 1;
                    }
                }
                base = batch.docs[count + take - 1];
                self.buffer_pos += take;
                count += take;
                self.docs_read += take as u32;
            } else {
                for _ in 0..take {
                    let delta = self.doc_delta_buffer[self.buffer_pos] as i32;
                    base += delta;
                    batch.docs[count] = base;
                    batch.freqs[count] = if self.write_freqs {
                        self.freq_buffer[self.buffer_pos] as i32
                    } else {
                        1
                    };
                    self.buffer_pos += 1;
                    count += 1;
                }
                self.docs_read += take as u32;
            }
        }

        if count > 0 {
            self.current_doc = batch.docs[count - 1];
            self.current_freq = batch.freqs[count - 1];
        }
        batch.count = count;
        Ok(count)
    }
}
