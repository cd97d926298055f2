//! Lucene105: the 104 doc/freq block format plus a `.skp` stream with
//! per-128-doc impact entries (max freq, max norm) and a `.pos` stream
//! of VInt position deltas. Skip entries drive both `advance` seeking
//! and block-max score bounds for WAND-style pruning.

use super::{PostingsWriter, SkipEntry, TermState, SKIP_INTERVAL};
use crate::index::field_info::FieldInfo;
use crate::store::{ByteBuffersOutput, BytesInput, IndexInput, IndexOutput};
use crate::util::stream_vbyte;
use crate::{Error, NO_MORE_DOCS};

const GROUP_SIZE: usize = 4;

pub struct Lucene105PostingsWriter {
    doc_out: ByteBuffersOutput,
    skip_out: ByteBuffersOutput,
    pos_out: ByteBuffersOutput,
    write_freqs: bool,
    write_positions: bool,

    doc_start_fp: u64,
    pos_start_fp: Option<u64>,
    last_doc_id: i32,
    doc_count: u32,
    total_term_freq: u64,
    last_position: u32,

    doc_delta_buffer: [u32; GROUP_SIZE],
    freq_buffer: [u32; GROUP_SIZE],
    buffer_pos: usize,

    block_max_freq: i32,
    block_max_norm: i8,
    docs_since_last_skip: u32,
    skip_entries: Vec<SkipEntry>,

    closed: bool,
}

/// The three per-segment streams a writer surrenders on close.
pub struct PostingsOutputs {
    pub doc: Vec<u8>,
    pub skip: Vec<u8>,
    pub pos: Vec<u8>,
}

impl Default for Lucene105PostingsWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Lucene105PostingsWriter {
    pub fn new() -> Self {
        Self {
            doc_out: ByteBuffersOutput::new(),
            skip_out: ByteBuffersOutput::new(),
            pos_out: ByteBuffersOutput::new(),
            write_freqs: false,
            write_positions: false,
            doc_start_fp: 0,
            pos_start_fp: None,
            last_doc_id: 0,
            doc_count: 0,
            total_term_freq: 0,
            last_position: 0,
            doc_delta_buffer: [0; GROUP_SIZE],
            freq_buffer: [0; GROUP_SIZE],
            buffer_pos: 0,
            block_max_freq: 0,
            block_max_norm: 0,
            docs_since_last_skip: 0,
            skip_entries: Vec::new(),
            closed: false,
        }
    }

    pub fn file_pointer(&self) -> u64 {
        self.doc_out.file_pointer()
    }
    pub fn doc_bytes(&self) -> &[u8] {
        self.doc_out.as_bytes()
    }
    pub fn skip_bytes(&self) -> &[u8] {
        self.skip_out.as_bytes()
    }
    pub fn pos_bytes(&self) -> &[u8] {
        self.pos_out.as_bytes()
    }

    pub fn close(mut self) -> Result<PostingsOutputs, Error> {
        if self.closed {
            return Err(Error::AlreadyClosed("Lucene105PostingsWriter"));
        }
        self.closed = true;
        self.doc_out.close()?;
        self.skip_out.close()?;
        self.pos_out.close()?;
        Ok(PostingsOutputs {
            doc: self.doc_out.into_bytes(),
            skip: self.skip_out.into_bytes(),
            pos: self.pos_out.into_bytes(),
        })
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

    fn push_skip_entry(&mut self) {
        self.skip_entries.push(SkipEntry {
            doc: self.last_doc_id,
            doc_fp: self.doc_out.file_pointer(),
            max_freq: self.block_max_freq,
            max_norm: self.block_max_norm,
        });
        self.block_max_freq = 0;
        self.block_max_norm = 0;
        self.docs_since_last_skip = 0;
    }

    fn write_skip_data(&mut self) -> Result<Option<u64>, Error> {
        if self.skip_entries.is_empty() {
            return Ok(None);
        }
        let skip_start_fp = self.skip_out.file_pointer();
        self.skip_out.write_vint(self.skip_entries.len() as u32)?;
        let mut last_doc = 0i32;
        let mut last_fp = self.doc_start_fp;
        for entry in &self.skip_entries {
            self.skip_out.write_vint((entry.doc - last_doc) as u32)?;
            self.skip_out.write_vlong(entry.doc_fp - last_fp)?;
            self.skip_out.write_vint(entry.max_freq as u32)?;
            self.skip_out.write_byte(entry.max_norm as u8)?;
            last_doc = entry.doc;
            last_fp = entry.doc_fp;
        }
        Ok(Some(skip_start_fp))
    }
}

impl PostingsWriter for Lucene105PostingsWriter {
    fn set_field(&mut self, field: &FieldInfo) {
        self.write_freqs = field.has_freqs();
        self.write_positions = field.has_positions();
    }

    fn start_term(&mut self) {
        self.doc_start_fp = self.doc_out.file_pointer();
        self.pos_start_fp = if self.write_positions {
            Some(self.pos_out.file_pointer())
        } else {
            None
        };
        self.last_doc_id = 0;
        self.doc_count = 0;
        self.total_term_freq = 0;
        self.last_position = 0;
        self.buffer_pos = 0;
        self.block_max_freq = 0;
        self.block_max_norm = 0;
        self.docs_since_last_skip = 0;
        self.skip_entries.clear();
    }

    fn start_doc(&mut self, doc_id: i32, freq: i32, norm: i8) -> Result<(), Error> {
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

        self.block_max_freq = self.block_max_freq.max(freq);
        self.block_max_norm = self.block_max_norm.max(norm);
        self.docs_since_last_skip += 1;

        self.doc_delta_buffer[self.buffer_pos] = (doc_id - self.last_doc_id) as u32;
        self.freq_buffer[self.buffer_pos] = freq as u32;
        self.buffer_pos += 1;

        self.total_term_freq += freq as u64;
        self.last_doc_id = doc_id;
        self.doc_count += 1;
        self.last_position = 0;

        if self.buffer_pos == GROUP_SIZE {
            self.flush_group()?;
        }
        // SKIP_INTERVAL is a multiple of the group size, so the entry
        // lands right after its block's final group: `doc` is the last
        // doc of the block and `doc_fp` the position just past it.
        if self.docs_since_last_skip == SKIP_INTERVAL {
            self.push_skip_entry();
        }
        Ok(())
    }

    fn add_position(&mut self, position: u32) -> Result<(), Error> {
        if !self.write_positions {
            return Err(Error::Unsupported("positions on a docs/freqs field"));
        }
        if position < self.last_position {
            return Err(Error::OutOfOrder(format!(
                "position {} after {}",
                position, self.last_position
            )));
        }
        self.pos_out.write_vint(position - self.last_position)?;
        self.last_position = position;
        Ok(())
    }

    fn finish_term(&mut self) -> Result<TermState, Error> {
        for i in 0..self.buffer_pos {
            self.doc_out.write_vint(self.doc_delta_buffer[i])?;
            if self.write_freqs {
                self.doc_out.write_vint(self.freq_buffer[i])?;
            }
        }
        self.buffer_pos = 0;

        // A tail block only earns an entry when full blocks exist; a
        // short postings list carries no skip data at all.
        if self.docs_since_last_skip > 0 && !self.skip_entries.is_empty() {
            self.push_skip_entry();
        }
        let skip_start_fp = self.write_skip_data()?;

        Ok(TermState {
            doc_start_fp: self.doc_start_fp,
            doc_freq: self.doc_count,
            total_term_freq: if self.write_freqs {
                Some(self.total_term_freq)
            } else {
                None
            },
            skip_start_fp,
            skip_entry_count: self.skip_entries.len() as u32,
            pos_start_fp: self.pos_start_fp,
        })
    }
}

pub struct Lucene105PostingsReader {
    doc_in: BytesInput,
    skip_in: Option<BytesInput>,
    pos_in: Option<BytesInput>,
}

impl Lucene105PostingsReader {
    pub fn new(doc_in: BytesInput, skip_in: Option<BytesInput>, pos_in: Option<BytesInput>) -> Self {
        Self {
            doc_in,
            skip_in,
            pos_in,
        }
    }

    fn read_skip_entries(&self, term: &TermState) -> Result<Vec<SkipEntry>, Error> {
        let skip_start_fp = match (term.skip_start_fp, &self.skip_in) {
            (Some(fp), Some(_)) => fp,
            _ => return Ok(Vec::new()),
        };
        let mut skip_in = self.skip_in.as_ref().unwrap().clone();
        skip_in.seek(skip_start_fp)?;
        let count = skip_in.read_vint()?;
        if count != term.skip_entry_count {
            return Err(Error::Corruption(format!(
                "skip list of {} entries, term state says {}",
                count, term.skip_entry_count
            )));
        }
        let mut entries = Vec::with_capacity(count as usize);
        let mut last_doc = 0i32;
        let mut last_fp = term.doc_start_fp;
        for _ in 0..count {
            let doc = last_doc + skip_in.read_vint()? as i32;
            let doc_fp = last_fp + skip_in.read_vlong()?;
            let max_freq = skip_in.read_vint()? as i32;
            let max_norm = skip_in.read_byte()? as i8;
            entries.push(SkipEntry {
                doc,
                doc_fp,
                max_freq,
                max_norm,
            });
            last_doc = doc;
            last_fp = doc_fp;
        }
        Ok(entries)
    }

    pub fn postings(
        &self,
        field: &FieldInfo,
        term: &TermState,
    ) -> Result<Lucene105PostingsEnum, Error> {
        let skip_entries = self.read_skip_entries(term)?;
        let positions = match (&self.pos_in, term.pos_start_fp, field.has_positions()) {
            (Some(input), Some(fp), true) => {
                let mut cursor = input.clone();
                cursor.seek(fp)?;
                Some(cursor)
            }
            _ => None,
        };
        Lucene105PostingsEnum::open(
            self.doc_in.clone(),
            term,
            field.has_freqs(),
            skip_entries,
            positions,
        )
    }
}

const BUFFER_SIZE: usize = 128;
const IO_BATCH_SIZE: usize = 512;

pub struct Lucene105PostingsEnum {
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

    skip_entries: Vec<SkipEntry>,
    current_skip_index: usize,

    pos_in: Option<BytesInput>,
    positions_buffer: Vec<u32>,
    positions_pending: u32,
}

impl Lucene105PostingsEnum {
    fn open(
        mut doc_in: BytesInput,
        term: &TermState,
        write_freqs: bool,
        skip_entries: Vec<SkipEntry>,
        pos_in: Option<BytesInput>,
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
            skip_entries,
            current_skip_index: 0,
            pos_in,
            positions_buffer: Vec::new(),
            positions_pending: 0,
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
        if self.io_limit - self.io_pos < stream_vbyte::MAX_GROUP_BYTES {
            self.refill_io()?;
        }
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

    /// Discard positions of the doc we are leaving, if unread.
    fn drain_pending_positions(&mut self) -> Result<(), Error> {
        if self.positions_pending > 0 {
            if let Some(pos_in) = self.pos_in.as_mut() {
                for _ in 0..self.positions_pending {
                    pos_in.read_vint()?;
                }
            }
            self.positions_pending = 0;
        }
        Ok(())
    }

    pub fn next_doc(&mut self) -> Result<i32, Error> {
        if self.docs_read >= self.doc_freq {
            self.current_doc = NO_MORE_DOCS;
            return Ok(NO_MORE_DOCS);
        }
        self.drain_pending_positions()?;
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
        if self.pos_in.is_some() {
            self.positions_pending = self.current_freq as u32;
            self.positions_buffer.clear();
        }
        Ok(self.current_doc)
    }

    /// Positions of the current doc, decoded from their deltas.
    pub fn positions(&mut self) -> Result<&[u32], Error> {
        if self.positions_pending > 0 {
            let pos_in = self
                .pos_in
                .as_mut()
                .ok_or(Error::Unsupported("positions were not indexed"))?;
            let mut position = 0u32;
            for _ in 0..self.positions_pending {
                position += pos_in.read_vint()?;
                self.positions_buffer.push(position);
            }
            self.positions_pending = 0;
        }
        Ok(&self.positions_buffer)
    }

    /// Move to the first doc >= target, seeking over whole blocks via
    /// the skip list when the gap is wide enough. Position streams keep
    /// no per-block pointers, so a cursor serving positions scans.
    pub fn advance(&mut self, target: i32) -> Result<i32, Error> {
        if target < self.current_doc {
            return Err(Error::OutOfOrder(format!(
                "advance to {} behind {}",
                target, self.current_doc
            )));
        }
        if self.pos_in.is_none()
            && !self.skip_entries.is_empty()
            && target > self.current_doc.saturating_add(SKIP_INTERVAL as i32)
        {
            // Entries covering a full block can reseed the cursor; the
            // tail entry only carries impacts.
            let full_blocks = (self.doc_freq / SKIP_INTERVAL) as usize;
            let seekable = &self.skip_entries[..full_blocks.min(self.skip_entries.len())];
            // highest entry ending before the target
            let idx = match seekable.binary_search_by(|e| e.doc.cmp(&(target - 1))) {
                Ok(i) => Some(i),
                Err(0) => None,
                Err(i) => Some(i - 1),
            };
            if let Some(i) = idx {
                let docs_covered = (i as u32 + 1) * SKIP_INTERVAL;
                if docs_covered > self.docs_read {
                    let entry = seekable[i];
                    self.doc_in.seek(entry.doc_fp)?;
                    self.io_pos = 0;
                    self.io_limit = 0;
                    self.buffer_pos = 0;
                    self.buffer_limit = 0;
                    self.docs_read = docs_covered;
                    self.current_doc = entry.doc;
                    self.current_skip_index = i + 1;
                }
            }
        }
        while self.current_doc < target {
            if self.next_doc()? == NO_MORE_DOCS {
                break;
            }
        }
        Ok(self.current_doc)
    }

    /// Walk the skip list up to `target` without touching any postings.
    pub fn advance_shallow(&mut self, target: i32) {
        while self.current_skip_index < self.skip_entries.len()
            && self.skip_entries[self.current_skip_index].doc < target
        {
            self.current_skip_index += 1;
        }
    }

    fn overlapping_entries(&self, up_to: i32) -> impl Iterator<Item = &SkipEntry> {
        let start = self.current_skip_index.min(self.skip_entries.len());
        let entries = &self.skip_entries;
        entries[start..].iter().enumerate().take_while(move |(i, _)| {
            let abs = start + i;
            let block_start = if abs == 0 { 0 } else { entries[abs - 1].doc + 1 };
            block_start <= up_to
        })
        .map(|(_, e)| e)
    }

    /// Largest frequency any doc in [current, up_to] can carry. Before
    /// the first entry the first entry's value is the (conservative)
    /// answer.
    pub fn max_freq(&self, up_to: i32) -> Option<i32> {
        if self.skip_entries.is_empty() {
            return None;
        }
        let best = self.overlapping_entries(up_to).map(|e| e.max_freq).max();
        Some(best.unwrap_or_else(|| {
            let i = self.current_skip_index.min(self.skip_entries.len() - 1);
            self.skip_entries[i].max_freq
        }))
    }

    pub fn max_norm(&self, up_to: i32) -> Option<i8> {
        if self.skip_entries.is_empty() {
            return None;
        }
        let best = self.overlapping_entries(up_to).map(|e| e.max_norm).max();
        Some(best.unwrap_or_else(|| {
            let i = self.current_skip_index.min(self.skip_entries.len() - 1);
            self.skip_entries[i].max_norm
        }))
    }

    /// BM25 upper bound over blocks that overlap [current, up_to]; the
    /// norm byte already encodes the length scale. Infinite when the
    /// term has no skip data, which disables pruning.
    pub fn max_score(&self, up_to: i32, k1: f32, b: f32) -> f32 {
        if self.skip_entries.is_empty() {
            return f32::INFINITY;
        }
        let bound = |e: &SkipEntry| {
            let f = e.max_freq as f32;
            f * (k1 + 1.0) / (f + k1 * (1.0 - b + b / (e.max_norm as f32 + 1.0)))
        };
        let best = self
            .overlapping_entries(up_to)
            .map(|e| bound(e))
            .fold(None, |acc: Option<f32>, s| {
                Some(acc.map_or(s, |a| a.max(s)))
            });
        best.unwrap_or_else(|| {
            let i = self.current_skip_index.min(self.skip_entries.len() - 1);
            bound(&self.skip_entries[i])
        })
    }

    pub fn skip_entries(&self) -> &[SkipEntry] {
        &self.skip_entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::field_info::IndexOptions;

    fn freq_field() -> FieldInfo {
        FieldInfo::indexed("body", 0, IndexOptions::DocsAndFreqs)
    }
    fn pos_field() -> FieldInfo {
        FieldInfo::indexed("body", 0, IndexOptions::DocsAndFreqsAndPositions)
    }

    fn reader_for(writer: Lucene105PostingsWriter) -> Lucene105PostingsReader {
        let outputs = writer.close().unwrap();
        Lucene105PostingsReader::new(
            BytesInput::from_vec(outputs.doc),
            if outputs.skip.is_empty() {
                None
            } else {
                Some(BytesInput::from_vec(outputs.skip))
            },
            if outputs.pos.is_empty() {
                None
            } else {
                Some(BytesInput::from_vec(outputs.pos))
            },
        )
    }

    #[test]
    fn small_term_has_no_skip_data() {
        let field = freq_field();
        let mut writer = Lucene105PostingsWriter::new();
        writer.set_field(&field);
        writer.start_term();
        for i in 0..50 {
            writer.start_doc(i, 5, 50).unwrap();
        }
        let state = writer.finish_term().unwrap();
        assert_eq!(50, state.doc_freq);
        assert_eq!(Some(250), state.total_term_freq);
        assert_eq!(None, state.skip_start_fp);
        assert_eq!(0, state.skip_entry_count);
        assert!(writer.skip_bytes().is_empty());

        let reader = reader_for(writer);
        let mut cursor = reader.postings(&field, &state).unwrap();
        for i in 0..50 {
            assert_eq!(i, cursor.next_doc().unwrap());
            assert_eq!(5, cursor.freq());
        }
        assert_eq!(NO_MORE_DOCS, cursor.next_doc().unwrap());
        // no skip data: pruning is disabled, bounds are infinite/none
        assert_eq!(f32::INFINITY, cursor.max_score(10, 1.2, 0.75));
        assert_eq!(None, cursor.max_freq(10));
    }

    #[test]
    fn impacts_over_256_docs() {
        let field = freq_field();
        let mut writer = Lucene105PostingsWriter::new();
        writer.set_field(&field);
        writer.start_term();
        for i in 0..256 {
            writer
                .start_doc(i, i % 10 + 1, (i % 127) as i8)
                .unwrap();
        }
        let state = writer.finish_term().unwrap();
        assert_eq!(256, state.doc_freq);
        assert!(state.skip_start_fp.is_some());
        assert_eq!(2, state.skip_entry_count);

        let reader = reader_for(writer);
        let mut cursor = reader.postings(&field, &state).unwrap();
        {
            let entries = cursor.skip_entries();
            assert_eq!(2, entries.len());
            // block 0: docs 0..=127, block 1: docs 128..=255
            assert_eq!(127, entries[0].doc);
            assert_eq!(255, entries[1].doc);
            assert!(entries[0].doc_fp < entries[1].doc_fp);
            assert_eq!(10, entries[0].max_freq);
            assert_eq!(10, entries[1].max_freq);
            // norms cycle 0..=126 inside each block
            assert_eq!(126, entries[0].max_norm);
            assert_eq!(126, entries[1].max_norm);
        }

        assert_eq!(200, cursor.advance(200).unwrap());
        assert_eq!(200 % 10 + 1, cursor.freq());
        // the seek skipped the whole first block
        for i in 201..256 {
            assert_eq!(i, cursor.next_doc().unwrap());
        }
        assert_eq!(NO_MORE_DOCS, cursor.next_doc().unwrap());
    }

    #[test]
    fn impact_values_are_block_maxima() {
        let field = freq_field();
        let mut writer = Lucene105PostingsWriter::new();
        writer.set_field(&field);
        writer.start_term();
        // peaks buried mid-block
        for i in 0..128 {
            let freq = if i == 64 { 50 } else { 10 };
            let norm = if i == 32 { 100 } else { 50 };
            writer.start_doc(i, freq, norm).unwrap();
        }
        for i in 128..256 {
            let freq = if i == 192 { 75 } else { 15 };
            let norm = if i == 200 { 120 } else { 60 };
            writer.start_doc(i, freq, norm).unwrap();
        }
        let state = writer.finish_term().unwrap();
        assert_eq!(2, state.skip_entry_count);

        let reader = reader_for(writer);
        let cursor = reader.postings(&field, &state).unwrap();
        let entries = cursor.skip_entries();
        assert_eq!(50, entries[0].max_freq);
        assert_eq!(100, entries[0].max_norm);
        assert_eq!(75, entries[1].max_freq);
        assert_eq!(120, entries[1].max_norm);

        // both blocks overlap [0, 255]
        assert_eq!(Some(75), cursor.max_freq(255));
        assert_eq!(Some(120), cursor.max_norm(255));
        // only the first block overlaps [0, 100]
        assert_eq!(Some(50), cursor.max_freq(100));
        assert_eq!(Some(100), cursor.max_norm(100));
    }

    #[test]
    fn tail_block_gets_a_final_entry() {
        let field = freq_field();
        let mut writer = Lucene105PostingsWriter::new();
        writer.set_field(&field);
        writer.start_term();
        for i in 0..200 {
            writer.start_doc(i, 10, 50).unwrap();
        }
        let state = writer.finish_term().unwrap();
        // one full block plus a 72-doc tail
        assert_eq!(2, state.skip_entry_count);

        let reader = reader_for(writer);
        let cursor = reader.postings(&field, &state).unwrap();
        assert_eq!(127, cursor.skip_entries()[0].doc);
        assert_eq!(199, cursor.skip_entries()[1].doc);
    }

    #[test]
    fn advance_shallow_and_max_score() {
        let field = freq_field();
        let mut writer = Lucene105PostingsWriter::new();
        writer.set_field(&field);
        writer.start_term();
        for i in 0..384 {
            // freqs rise by block: 0..127 -> 3, 128..255 -> 9, 256..383 -> 27
            let freq = 3i32.pow(i as u32 / 128 + 1);
            writer.start_doc(i, freq, 40).unwrap();
        }
        let state = writer.finish_term().unwrap();
        assert_eq!(3, state.skip_entry_count);

        let reader = reader_for(writer);
        let mut cursor = reader.postings(&field, &state).unwrap();

        let bound = |freq: f32| {
            let (k1, b) = (1.2f32, 0.75f32);
            freq * (k1 + 1.0) / (freq + k1 * (1.0 - b + b / 41.0))
        };
        let score_all = cursor.max_score(383, 1.2, 0.75);
        assert!((score_all - bound(27.0)).abs() < 1e-5);
        let score_first = cursor.max_score(100, 1.2, 0.75);
        assert!((score_first - bound(3.0)).abs() < 1e-5);

        cursor.advance_shallow(130);
        // shallow cursor passed block 0; its impacts no longer count
        assert_eq!(Some(9), cursor.max_freq(200));
        let score_second = cursor.max_score(200, 1.2, 0.75);
        assert!((score_second - bound(9.0)).abs() < 1e-5);

        // iteration still starts at the beginning
        assert_eq!(0, cursor.next_doc().unwrap());
        assert_eq!(3, cursor.freq());
    }

    #[test]
    fn positions_round_trip() {
        let field = pos_field();
        let mut writer = Lucene105PostingsWriter::new();
        writer.set_field(&field);
        writer.start_term();
        writer.start_doc(2, 3, 10).unwrap();
        writer.add_position(1).unwrap();
        writer.add_position(4).unwrap();
        writer.add_position(9).unwrap();
        writer.start_doc(7, 2, 10).unwrap();
        writer.add_position(0).unwrap();
        writer.add_position(100).unwrap();
        writer.start_doc(11, 1, 10).unwrap();
        writer.add_position(55).unwrap();
        let state = writer.finish_term().unwrap();
        assert_eq!(Some(0), state.pos_start_fp);

        let reader = reader_for(writer);
        let mut cursor = reader.postings(&field, &state).unwrap();

        assert_eq!(2, cursor.next_doc().unwrap());
        assert_eq!(3, cursor.freq());
        assert_eq!(&[1, 4, 9], cursor.positions().unwrap());

        // skip doc 7 without reading its positions
        assert_eq!(7, cursor.next_doc().unwrap());
        assert_eq!(11, cursor.next_doc().unwrap());
        assert_eq!(&[55], cursor.positions().unwrap());
        assert_eq!(NO_MORE_DOCS, cursor.next_doc().unwrap());
    }

    #[test]
    fn out_of_order_positions_rejected() {
        let field = pos_field();
        let mut writer = Lucene105PostingsWriter::new();
        writer.set_field(&field);
        writer.start_term();
        writer.start_doc(0, 2, 1).unwrap();
        writer.add_position(5).unwrap();
        assert!(matches!(
            writer.add_position(3),
            Err(Error::OutOfOrder(_))
        ));
    }

    #[test]
    fn skip_entries_are_monotonic_and_bounding() {
        let field = freq_field();
        let mut writer = Lucene105PostingsWriter::new();
        writer.set_field(&field);
        writer.start_term();
        let mut expected: Vec<(i32, i32, i8)> = Vec::new();
        let mut doc = 0;
        for i in 0..1000 {
            doc += i % 5 + 1;
            let freq = (i * 31 % 90 + 1) as i32;
            let norm = (i * 17 % 120) as i8;
            writer.start_doc(doc, freq, norm).unwrap();
            expected.push((doc, freq, norm));
        }
        let state = writer.finish_term().unwrap();

        let reader = reader_for(writer);
        let cursor = reader.postings(&field, &state).unwrap();
        let entries = cursor.skip_entries();
        assert_eq!(state.skip_entry_count as usize, entries.len());
        for pair in entries.windows(2) {
            assert!(pair[0].doc < pair[1].doc);
            assert!(pair[0].doc_fp < pair[1].doc_fp);
        }
        // every doc's freq and norm bounded by its block entry
        let mut block = 0usize;
        for (i, (doc, freq, norm)) in expected.iter().enumerate() {
            if i > 0 && i % SKIP_INTERVAL as usize == 0 {
                block += 1;
            }
            assert!(entries[block].max_freq >= *freq, "doc {}", doc);
            assert!(entries[block].max_norm >= *norm, "doc {}", doc);
            assert!(entries[block].doc >= *doc);
        }
    }
}
