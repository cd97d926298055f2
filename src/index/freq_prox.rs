//! In-memory posting builder. Term bytes live in a byte pool, posting
//! ints (doc, freq, positions) in slice chains inside an int pool, so
//! a segment's worth of postings costs a handful of big allocations.

use crate::document::{Document, FieldValue, Token};
use crate::index::field_info::{FieldInfosBuilder, IndexOptions};
use crate::util::block_pool::{ByteBlockPool, IntBlockPool, IntSliceList};
use crate::{Error, HashMap};
use std::collections::hash_map::Entry;
use std::collections::BTreeSet;

/// Rolled forward on every posting so flush never rescans.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FieldStats {
    pub sum_total_term_freq: i64,
    pub sum_doc_freq: i64,
    pub doc_count: u32,
}

struct PostingData {
    /// Term bytes in the byte pool, null-terminated.
    term_offset: u64,
    last_doc_id: i32,
    list: IntSliceList,
}

#[derive(Default)]
struct DocTermEntry {
    freq: u32,
    positions: Vec<u32>,
}

/// Estimated map-entry overhead per new term, on top of the term bytes.
const TERM_OVERHEAD_BYTES: u64 = 64;

#[derive(Default)]
pub struct FreqProxTermsWriter {
    term_byte_pool: ByteBlockPool,
    posting_int_pool: IntBlockPool,
    postings: HashMap<(i32, String), PostingData>,
    /// Sorted term set per field, maintained on insert so flush is O(k).
    field_sorted_terms: HashMap<i32, BTreeSet<String>>,
    /// field -> doc -> token count, for norms.
    field_lengths: HashMap<i32, HashMap<i32, u32>>,
    field_stats: HashMap<i32, FieldStats>,
    /// Whether a field's entries interleave positions, fixed the first
    /// time the field is seen; later option upgrades apply to the next
    /// segment, keeping this segment's int stream parseable.
    field_positions_mode: HashMap<i32, bool>,
    /// Reusable per-document scratch; cleared, not reallocated.
    term_scratch: HashMap<String, DocTermEntry>,
    bytes_used: u64,
}

impl FreqProxTermsWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Approximate heap footprint, updated incrementally.
    pub fn bytes_used(&self) -> u64 {
        self.term_byte_pool.bytes_used() + self.posting_int_pool.bytes_used() + self.bytes_used
    }

    pub fn add_document(
        &mut self,
        fields: &mut FieldInfosBuilder,
        doc: &Document,
        doc_id: i32,
    ) -> Result<(), Error> {
        if doc_id < 0 {
            return Err(Error::InvalidArgument(format!("doc id {}", doc_id)));
        }
        for field in doc.fields() {
            let field_number = fields.get_or_add(&field.name);
            fields.update_index_options(&field.name, field.index_options)?;
            fields.update_doc_values_type(&field.name, field.doc_values)?;
            fields.update_doc_values_skip_index(&field.name, field.doc_values_skip_index)?;

            // doc values and stored-only fields carry no postings
            let index_options = fields.field(&field.name).unwrap().index_options;
            if !index_options.has_postings() {
                continue;
            }

            let keyword_token;
            let tokens: &[Token] = match &field.value {
                FieldValue::Tokens(tokens) => tokens,
                FieldValue::Keyword(text) => {
                    keyword_token = [Token::at(text, 0)];
                    &keyword_token
                }
                FieldValue::Numeric(_) => continue,
            };

            self.index_tokens(field_number, index_options, tokens, doc_id)?;
        }
        Ok(())
    }

    fn index_tokens(
        &mut self,
        field_number: i32,
        options: IndexOptions,
        tokens: &[Token],
        doc_id: i32,
    ) -> Result<(), Error> {
        let with_positions = *self
            .field_positions_mode
            .entry(field_number)
            .or_insert_with(|| options.has_positions());

        self.term_scratch.clear();
        for token in tokens {
            let entry = self.term_scratch.entry(token.text.clone()).or_default();
            entry.freq += 1;
            if with_positions {
                entry.positions.push(token.position);
            }
        }

        // field length for norm computation accumulates across repeated
        // instances of the field within one document
        let lengths = self.field_lengths.entry(field_number).or_default();
        let first_sight = !lengths.contains_key(&doc_id);
        *lengths.entry(doc_id).or_insert(0) += tokens.len() as u32;

        let stats = self.field_stats.entry(field_number).or_default();
        if first_sight {
            stats.doc_count += 1;
        }

        for (term, entry) in self.term_scratch.iter() {
            let pool = &mut self.posting_int_pool;
            match self.postings.entry((field_number, term.clone())) {
                Entry::Occupied(mut slot) => {
                    let data = slot.get_mut();
                    if data.last_doc_id == doc_id {
                        // duplicate emission of the same document
                        continue;
                    }
                    data.list.push(pool, doc_id)?;
                    data.list.push(pool, entry.freq as i32)?;
                    for p in &entry.positions {
                        data.list.push(pool, *p as i32)?;
                    }
                    data.last_doc_id = doc_id;
                }
                Entry::Vacant(slot) => {
                    let term_offset = self.term_byte_pool.append_str(term);
                    let mut list = IntSliceList::new(pool)?;
                    list.push(pool, doc_id)?;
                    list.push(pool, entry.freq as i32)?;
                    for p in &entry.positions {
                        list.push(pool, *p as i32)?;
                    }
                    slot.insert(PostingData {
                        term_offset,
                        last_doc_id: doc_id,
                        list,
                    });
                    self.field_sorted_terms
                        .entry(field_number)
                        .or_default()
                        .insert(term.clone());
                    self.bytes_used += term.len() as u64 + 1 + TERM_OVERHEAD_BYTES;
                }
            }
            let stats = self.field_stats.entry(field_number).or_default();
            stats.sum_doc_freq += 1;
            stats.sum_total_term_freq += entry.freq as i64;
        }
        Ok(())
    }

    /// `[doc, freq(, positions...)...]` for one term, walking its chain.
    pub fn posting_ints(&self, field_number: i32, term: &str) -> Result<Option<Vec<i32>>, Error> {
        match self.postings.get(&(field_number, term.to_string())) {
            Some(data) => Ok(Some(data.list.read_all(&self.posting_int_pool)?)),
            None => Ok(None),
        }
    }

    /// Term text read back from the pool (round-trips the stored bytes).
    pub fn term_text(&self, field_number: i32, term: &str) -> Result<Option<String>, Error> {
        match self.postings.get(&(field_number, term.to_string())) {
            Some(data) => Ok(Some(self.term_byte_pool.read_str(data.term_offset)?)),
            None => Ok(None),
        }
    }

    pub fn terms_for_field(&self, field_number: i32) -> Vec<&str> {
        self.field_sorted_terms
            .get(&field_number)
            .map(|set| set.iter().map(|s| s.as_str()).collect())
            .unwrap_or_default()
    }

    /// All `(field, term)` pairs, fields ascending, terms sorted.
    pub fn terms(&self) -> Vec<(i32, &str)> {
        let mut fields: Vec<i32> = self.field_sorted_terms.keys().cloned().collect();
        fields.sort_unstable();
        let mut out = Vec::new();
        for field in fields {
            for term in self.field_sorted_terms[&field].iter() {
                out.push((field, term.as_str()));
            }
        }
        out
    }

    pub fn field_stats(&self, field_number: i32) -> FieldStats {
        self.field_stats
            .get(&field_number)
            .cloned()
            .unwrap_or_default()
    }

    pub fn field_lengths(&self, field_number: i32) -> Option<&HashMap<i32, u32>> {
        self.field_lengths.get(&field_number)
    }

    /// Do this field's posting entries carry positions?
    pub fn positions_indexed(&self, field_number: i32) -> bool {
        self.field_positions_mode
            .get(&field_number)
            .cloned()
            .unwrap_or(false)
    }

    /// Back to empty, keeping pool blocks for the next segment.
    pub fn reset(&mut self) {
        self.term_byte_pool.reset();
        self.posting_int_pool.reset();
        self.postings.clear();
        self.field_sorted_terms.clear();
        self.field_lengths.clear();
        self.field_stats.clear();
        self.field_positions_mode.clear();
        self.term_scratch.clear();
        self.bytes_used = 0;
    }

    /// Release pool memory too.
    pub fn clear(&mut self) {
        self.reset();
        self.term_byte_pool.clear();
        self.posting_int_pool.clear();
    }
}
