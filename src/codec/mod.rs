pub mod doc_values;
pub mod postings104;
pub mod postings105;
pub mod stored_fields;
pub mod term_dict;

use crate::index::field_info::FieldInfo;
use crate::Error;

/// One skip entry per this many documents.
pub const SKIP_INTERVAL: u32 = 128;

/// Per-block impact metadata. `doc` is the last document of the block
/// and `doc_fp` points immediately after the block's encoded bytes, so
/// a cursor reseeded from an entry is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipEntry {
    pub doc: i32,
    pub doc_fp: u64,
    pub max_freq: i32,
    pub max_norm: i8,
}

/// Where a term lives inside the segment files. The term dictionary
/// carries one of these per term and hands it to the reader.
///
/// Absent streams are `None` (the on-disk encoding is `value + 1`);
/// `total_term_freq` is `None` when frequencies are not stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TermState {
    pub doc_start_fp: u64,
    pub doc_freq: u32,
    pub total_term_freq: Option<u64>,
    pub skip_start_fp: Option<u64>,
    pub skip_entry_count: u32,
    pub pos_start_fp: Option<u64>,
}

/// Seam between the flush pipeline and a concrete postings format.
/// Call order per field: `set_field`, then per term `start_term`,
/// `start_doc` (ascending doc ids) with optional `add_position` calls,
/// `finish_term`.
pub trait PostingsWriter {
    fn set_field(&mut self, field: &FieldInfo);
    fn start_term(&mut self);
    fn start_doc(&mut self, doc_id: i32, freq: i32, norm: i8) -> Result<(), Error>;
    fn add_position(&mut self, position: u32) -> Result<(), Error>;
    fn finish_term(&mut self) -> Result<TermState, Error>;
}
