//! One flushed segment: a JSON manifest describing the files plus the
//! readers that open them back up.

use crate::codec::doc_values::{NumericDocValues, NumericDocValuesReader};
use crate::codec::postings104::{Lucene104PostingsEnum, Lucene104PostingsReader};
use crate::codec::postings105::{Lucene105PostingsEnum, Lucene105PostingsReader};
use crate::codec::stored_fields::StoredFieldsReader;
use crate::codec::term_dict::TermDictReader;
use crate::codec::TermState;
use crate::index::field_info::FieldInfos;
use crate::store::BytesInput;
use crate::Error;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const CODEC_LUCENE104: &str = "Lucene104";
pub const CODEC_LUCENE105: &str = "Lucene105";

/// Immutable description of a flushed segment, persisted as
/// `<name>.si.json` next to the data files.
#[derive(Debug, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub name: String,
    pub max_doc: u32,
    pub codec_name: String,
    pub files: BTreeSet<String>,
    pub diagnostics: BTreeMap<String, String>,
    pub field_infos: FieldInfos,
}

impl SegmentInfo {
    pub fn manifest_file_name(name: &str) -> String {
        format!("{}.si.json", name)
    }

    pub fn write_manifest(&self, dir: &Path) -> Result<PathBuf, Error> {
        let path = dir.join(Self::manifest_file_name(&self.name));
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(&path, json)?;
        Ok(path)
    }

    pub fn read_manifest(dir: &Path, name: &str) -> Result<SegmentInfo, Error> {
        let bytes = fs::read(dir.join(Self::manifest_file_name(name)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

enum PostingsReaderKind {
    L104(Lucene104PostingsReader),
    L105(Lucene105PostingsReader),
}

/// Postings cursor over a segment; one concrete variant per codec so
/// iteration stays devirtualized.
pub enum SegmentPostings {
    L104(Lucene104PostingsEnum),
    L105(Lucene105PostingsEnum),
}

impl SegmentPostings {
    pub fn doc_id(&self) -> i32 {
        match self {
            SegmentPostings::L104(e) => e.doc_id(),
            SegmentPostings::L105(e) => e.doc_id(),
        }
    }
    pub fn next_doc(&mut self) -> Result<i32, Error> {
        match self {
            SegmentPostings::L104(e) => e.next_doc(),
            SegmentPostings::L105(e) => e.next_doc(),
        }
    }
    pub fn advance(&mut self, target: i32) -> Result<i32, Error> {
        match self {
            SegmentPostings::L104(e) => e.advance(target),
            SegmentPostings::L105(e) => e.advance(target),
        }
    }
    pub fn freq(&self) -> i32 {
        match self {
            SegmentPostings::L104(e) => e.freq(),
            SegmentPostings::L105(e) => e.freq(),
        }
    }
    pub fn cost(&self) -> i64 {
        match self {
            SegmentPostings::L104(e) => e.cost(),
            SegmentPostings::L105(e) => e.cost(),
        }
    }
    /// The impacts-capable cursor, on segments written with Lucene105.
    pub fn as_impacts(&mut self) -> Option<&mut Lucene105PostingsEnum> {
        match self {
            SegmentPostings::L104(_) => None,
            SegmentPostings::L105(e) => Some(e),
        }
    }
}

pub struct SegmentReader {
    dir: PathBuf,
    info: SegmentInfo,
    term_dict: Option<TermDictReader>,
    postings: Option<PostingsReaderKind>,
    doc_values: Option<NumericDocValuesReader>,
    stored: Option<StoredFieldsReader>,
}

impl SegmentReader {
    pub fn open(dir: &Path, segment_name: &str) -> Result<SegmentReader, Error> {
        let info = SegmentInfo::read_manifest(dir, segment_name)?;

        let open_part = |ext: &str| -> Result<Option<BytesInput>, Error> {
            let file = format!("{}.{}", segment_name, ext);
            if info.files.contains(&file) {
                Ok(Some(BytesInput::open(&dir.join(&file))?))
            } else {
                Ok(None)
            }
        };

        let term_dict = match open_part("tmd")? {
            Some(input) => Some(TermDictReader::open(input)?),
            None => None,
        };

        let postings = match open_part("doc")? {
            Some(doc_in) => Some(match info.codec_name.as_str() {
                CODEC_LUCENE104 => PostingsReaderKind::L104(Lucene104PostingsReader::new(doc_in)),
                CODEC_LUCENE105 => PostingsReaderKind::L105(Lucene105PostingsReader::new(
                    doc_in,
                    open_part("skp")?,
                    open_part("pos")?,
                )),
                other => {
                    return Err(Error::Corruption(format!("unknown codec '{}'", other)));
                }
            }),
            None => None,
        };

        let doc_values = match (open_part("dvd")?, open_part("dvm")?) {
            (Some(data), Some(meta)) => Some(NumericDocValuesReader::open(data, meta)?),
            _ => None,
        };

        let stored = match (open_part("fdt")?, open_part("fdx")?) {
            (Some(fdt), Some(fdx)) => Some(StoredFieldsReader::open(fdt, fdx)?),
            _ => None,
        };

        Ok(SegmentReader {
            dir: dir.to_path_buf(),
            info,
            term_dict,
            postings,
            doc_values,
            stored,
        })
    }

    pub fn info(&self) -> &SegmentInfo {
        &self.info
    }
    pub fn field_infos(&self) -> &FieldInfos {
        &self.info.field_infos
    }
    pub fn max_doc(&self) -> u32 {
        self.info.max_doc
    }
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub fn term_state(&self, field_name: &str, term: &str) -> Option<&TermState> {
        let field = self.info.field_infos.by_name(field_name)?;
        self.term_dict.as_ref()?.term_state(field.number, term)
    }

    /// Sorted terms of a field.
    pub fn terms(&self, field_name: &str) -> Vec<(&str, &TermState)> {
        match (
            self.info.field_infos.by_name(field_name),
            self.term_dict.as_ref(),
        ) {
            (Some(field), Some(dict)) => dict.terms(field.number).collect(),
            _ => Vec::new(),
        }
    }

    /// Cursor over one term's postings, `None` for unknown terms.
    pub fn postings(&self, field_name: &str, term: &str) -> Result<Option<SegmentPostings>, Error> {
        let field = match self.info.field_infos.by_name(field_name) {
            Some(f) => f,
            None => return Ok(None),
        };
        let state = match self.term_dict.as_ref().and_then(|d| d.term_state(field.number, term)) {
            Some(s) => *s,
            None => return Ok(None),
        };
        let reader = match self.postings.as_ref() {
            Some(r) => r,
            None => return Ok(None),
        };
        Ok(Some(match reader {
            PostingsReaderKind::L104(r) => SegmentPostings::L104(r.postings(field, &state)?),
            PostingsReaderKind::L105(r) => SegmentPostings::L105(r.postings(field, &state)?),
        }))
    }

    pub fn doc_values(&self, field_name: &str) -> Option<NumericDocValues> {
        self.doc_values.as_ref()?.get_numeric(field_name)
    }

    pub fn stored_fields(&self) -> Option<&StoredFieldsReader> {
        self.stored.as_ref()
    }
}
