//! DocumentsWriterPerThread: one single-threaded ingest lane. Buffers
//! documents through [`FreqProxTermsWriter`], watches its RAM and doc
//! counters, and on flush drives the postings codec, doc values,
//! stored fields, and skip indexes into one new segment.

use crate::codec::doc_values::NumericDocValuesWriter;
use crate::codec::postings104::Lucene104PostingsWriter;
use crate::codec::postings105::Lucene105PostingsWriter;
use crate::codec::stored_fields::{StoredFieldsWriter, StoredValue};
use crate::codec::term_dict::TermDictWriter;
use crate::codec::{PostingsWriter, TermState};
use crate::document::{Document, FieldValue};
use crate::index::field_info::{
    DocValuesSkipIndexType, DocValuesType, FieldInfos, FieldInfosBuilder,
};
use crate::index::freq_prox::FreqProxTermsWriter;
use crate::index::segment::{SegmentInfo, CODEC_LUCENE104, CODEC_LUCENE105};
use crate::index::skip::minmax::MinMaxIndex;
use crate::index::skip::{IndexDescription, MergeTreeIndex, RowValue, SkipIndexType, SkipIndexWriter};
use crate::store::{FileOutput, IndexOutput};
use crate::Error;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Single-byte norm: the field length clamped into the byte. Writers
/// only need a monotone upper bound per block, which clamping keeps.
pub fn length_norm(length: u32) -> i8 {
    length.min(127) as i8
}

#[derive(Debug, Clone)]
pub struct DwptConfig {
    pub max_buffered_docs: u32,
    pub ram_buffer_size_mb: u32,
    pub codec_name: String,
}

impl Default for DwptConfig {
    fn default() -> Self {
        Self {
            max_buffered_docs: 10_000,
            ram_buffer_size_mb: 16,
            codec_name: CODEC_LUCENE105.to_string(),
        }
    }
}

/// Ties only; uniqueness is all that matters for segment names.
static NEXT_SEGMENT_NUMBER: AtomicU32 = AtomicU32::new(0);

fn next_segment_name() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let counter = NEXT_SEGMENT_NUMBER.fetch_add(1, Ordering::Relaxed);
    format!("_{:x}_{}", timestamp, counter)
}

pub struct DocumentsWriterPerThread {
    config: DwptConfig,
    dir: PathBuf,
    fields: FieldInfosBuilder,
    terms: FreqProxTermsWriter,
    doc_values: NumericDocValuesWriter,
    stored: StoredFieldsWriter,
    num_docs: u32,
}

impl DocumentsWriterPerThread {
    pub fn new(dir: &Path, config: DwptConfig) -> Self {
        Self {
            config,
            dir: dir.to_path_buf(),
            fields: FieldInfosBuilder::new(),
            terms: FreqProxTermsWriter::new(),
            doc_values: NumericDocValuesWriter::new(),
            stored: StoredFieldsWriter::new(),
            num_docs: 0,
        }
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }

    /// Approximation in the accumulator's spirit: pool memory plus flat
    /// per-field and per-doc overheads.
    pub fn bytes_used(&self) -> u64 {
        self.terms.bytes_used()
            + self.doc_values.ram_bytes_used()
            + self.fields.len() as u64 * 256
            + self.num_docs as u64 * 64
    }

    pub fn needs_flush(&self) -> bool {
        self.num_docs >= self.config.max_buffered_docs
            || self.bytes_used() >= (self.config.ram_buffer_size_mb as u64) << 20
    }

    /// Buffer one document; `true` says the caller should flush now.
    pub fn add_document(&mut self, doc: &Document) -> Result<bool, Error> {
        let doc_id = self.num_docs as i32;

        self.stored.start_document()?;
        for field in doc.fields() {
            let number = self.fields.get_or_add(&field.name);
            if field.stored {
                match &field.value {
                    FieldValue::Keyword(s) => {
                        self.stored.write_field(number, StoredValue::Str(s.clone()))?
                    }
                    FieldValue::Numeric(v) => {
                        self.stored.write_field(number, StoredValue::Long(*v))?
                    }
                    // token streams carry no storable source text
                    FieldValue::Tokens(_) => {}
                }
            }
            if let FieldValue::Numeric(v) = &field.value {
                if field.doc_values == DocValuesType::Numeric {
                    self.fields
                        .update_doc_values_type(&field.name, field.doc_values)?;
                    self.fields
                        .update_doc_values_skip_index(&field.name, field.doc_values_skip_index)?;
                    let info = self.fields.field(&field.name).unwrap().clone();
                    self.doc_values.add_value(&info, doc_id, *v)?;
                }
            }
        }
        self.stored.finish_document()?;

        self.terms.add_document(&mut self.fields, doc, doc_id)?;
        self.num_docs += 1;
        Ok(self.needs_flush())
    }

    /// Write the buffered segment, returning its descriptor, or `None`
    /// with nothing buffered. On error the partial segment is abandoned
    /// and this writer comes back reset, ready for a retry.
    pub fn flush(&mut self) -> Result<Option<SegmentInfo>, Error> {
        if self.num_docs == 0 {
            return Ok(None);
        }
        let result = self.flush_segment();
        self.reset();
        result.map(Some)
    }

    /// Drop all buffered state, keeping pool memory.
    pub fn reset(&mut self) {
        self.terms.reset();
        self.fields.reset();
        self.doc_values.reset();
        self.stored = StoredFieldsWriter::new();
        self.num_docs = 0;
    }

    fn flush_segment(&mut self) -> Result<SegmentInfo, Error> {
        let segment = next_segment_name();
        let field_infos = self.fields.finish()?;
        let max_doc = self.num_docs;
        let mut files = BTreeSet::new();

        // postings + term dictionary
        let mut term_dict = TermDictWriter::new();
        let has_postings = field_infos.iter().any(|f| f.has_postings());
        if has_postings {
            let (doc, skip, pos) = match self.config.codec_name.as_str() {
                CODEC_LUCENE105 => {
                    let mut writer = Lucene105PostingsWriter::new();
                    write_postings(&mut writer, &field_infos, &self.terms, &mut term_dict, true)?;
                    let outputs = writer.close()?;
                    (outputs.doc, outputs.skip, outputs.pos)
                }
                CODEC_LUCENE104 => {
                    let mut writer = Lucene104PostingsWriter::new();
                    write_postings(&mut writer, &field_infos, &self.terms, &mut term_dict, false)?;
                    (writer.close()?, Vec::new(), Vec::new())
                }
                other => {
                    return Err(Error::InvalidArgument(format!("unknown codec '{}'", other)));
                }
            };
            write_file(&self.dir, &mut files, &format!("{}.doc", segment), &doc)?;
            if !skip.is_empty() {
                write_file(&self.dir, &mut files, &format!("{}.skp", segment), &skip)?;
            }
            if !pos.is_empty() {
                write_file(&self.dir, &mut files, &format!("{}.pos", segment), &pos)?;
            }
            let tmd = term_dict.finish()?;
            write_file(&self.dir, &mut files, &format!("{}.tmd", segment), &tmd)?;
        }

        // numeric doc values
        if !self.doc_values.is_empty() {
            let dvd_name = format!("{}.dvd", segment);
            let dvm_name = format!("{}.dvm", segment);
            let mut dvd = FileOutput::create(&self.dir.join(&dvd_name))?;
            let mut dvm = FileOutput::create(&self.dir.join(&dvm_name))?;
            self.doc_values.flush(max_doc, &mut dvd, &mut dvm)?;
            dvd.close()?;
            dvm.close()?;
            files.insert(dvd_name);
            files.insert(dvm_name);
        }

        // range skip indexes over doc-values columns
        for info in field_infos.iter() {
            if info.doc_values_skip_index != DocValuesSkipIndexType::Range
                || info.doc_values_type != DocValuesType::Numeric
            {
                continue;
            }
            if let Some(values) = self.doc_values.dense_values(info.number, max_doc) {
                let index = MinMaxIndex::new(IndexDescription::new(
                    &info.name,
                    SkipIndexType::MinMax,
                    1,
                ));
                let mut writer = SkipIndexWriter::new(&index);
                for value in values {
                    writer.add_row(&[RowValue::Number(value as f64)])?;
                }
                let bytes = writer.finish()?;
                let file_name = format!("{}.{}", segment, index.file_name());
                write_file(&self.dir, &mut files, &file_name, &bytes)?;
            }
        }

        // stored fields
        let stored = std::mem::replace(&mut self.stored, StoredFieldsWriter::new());
        let (fdt, fdx) = stored.finish()?;
        write_file(&self.dir, &mut files, &format!("{}.fdt", segment), &fdt)?;
        write_file(&self.dir, &mut files, &format!("{}.fdx", segment), &fdx)?;

        let mut diagnostics = BTreeMap::new();
        diagnostics.insert("source".to_string(), "flush".to_string());
        diagnostics.insert("os".to_string(), std::env::consts::OS.to_string());

        let info = SegmentInfo {
            name: segment,
            max_doc,
            codec_name: self.config.codec_name.clone(),
            files,
            diagnostics,
            field_infos,
        };
        info.write_manifest(&self.dir)?;
        Ok(info)
    }
}

fn write_file(
    dir: &Path,
    files: &mut BTreeSet<String>,
    name: &str,
    bytes: &[u8],
) -> Result<(), Error> {
    let mut out = FileOutput::create(&dir.join(name))?;
    out.write_bytes(bytes)?;
    out.close()?;
    files.insert(name.to_string());
    Ok(())
}

/// Drive one codec writer over every indexed field and term, recording
/// the resulting [`TermState`]s in the dictionary. `codec_positions`
/// marks formats with a position stream; fields whose accumulated
/// entries interleave positions are parsed either way.
fn write_postings<W: PostingsWriter>(
    writer: &mut W,
    field_infos: &FieldInfos,
    terms: &FreqProxTermsWriter,
    term_dict: &mut TermDictWriter,
    codec_positions: bool,
) -> Result<(), Error> {
    for info in field_infos.iter().filter(|f| f.has_postings()) {
        writer.set_field(info);
        term_dict.begin_field(info.number);
        let lengths = terms.field_lengths(info.number);
        let stored_positions = terms.positions_indexed(info.number);
        let emit_positions = codec_positions && info.has_positions() && stored_positions;

        for term in terms.terms_for_field(info.number) {
            writer.start_term();
            let ints = terms.posting_ints(info.number, term)?.unwrap_or_default();
            let mut i = 0usize;
            while i < ints.len() {
                let doc = ints[i];
                let freq = ints[i + 1];
                i += 2;
                let norm = lengths
                    .and_then(|by_doc| by_doc.get(&doc))
                    .map(|len| length_norm(*len))
                    .unwrap_or(0);
                writer.start_doc(doc, freq, norm)?;
                if stored_positions {
                    for _ in 0..freq {
                        let position = ints[i] as u32;
                        i += 1;
                        if emit_positions {
                            writer.add_position(position)?;
                        }
                    }
                }
            }
            let state: TermState = writer.finish_term()?;
            term_dict.add_term(term, state)?;
        }
    }
    Ok(())
}
