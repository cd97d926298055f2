//! Per-segment term dictionary: for each field, a sorted term table
//! mapping term bytes to the [`TermState`] that locates its postings.
//! Optional file pointers ride as `value + 1` so zero means absent.

use super::TermState;
use crate::store::{ByteBuffersOutput, BytesInput, IndexInput, IndexOutput};
use crate::{Error, HashMap};
use std::collections::BTreeMap;

const MAGIC: &str = "DiagonTermDict";
const VERSION: u32 = 1;

fn encode_opt(v: Option<u64>) -> u64 {
    v.map(|x| x + 1).unwrap_or(0)
}
fn decode_opt(v: u64) -> Option<u64> {
    if v == 0 {
        None
    } else {
        Some(v - 1)
    }
}

pub struct TermDictWriter {
    fields: Vec<(i32, Vec<(String, TermState)>)>,
}

impl Default for TermDictWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl TermDictWriter {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn begin_field(&mut self, field_number: i32) {
        self.fields.push((field_number, Vec::new()));
    }

    /// Terms must arrive in sorted order within their field.
    pub fn add_term(&mut self, term: &str, state: TermState) -> Result<(), Error> {
        let (_, terms) = self
            .fields
            .last_mut()
            .ok_or_else(|| Error::InvalidArgument("term before begin_field".to_string()))?;
        if let Some((last, _)) = terms.last() {
            if term <= last.as_str() {
                return Err(Error::OutOfOrder(format!(
                    "term '{}' after '{}'",
                    term, last
                )));
            }
        }
        terms.push((term.to_string(), state));
        Ok(())
    }

    pub fn finish(self) -> Result<Vec<u8>, Error> {
        let mut out = ByteBuffersOutput::new();
        out.write_string(MAGIC)?;
        out.write_vint(VERSION)?;
        out.write_vint(self.fields.len() as u32)?;
        for (number, terms) in &self.fields {
            out.write_vint(*number as u32)?;
            out.write_vint(terms.len() as u32)?;
            for (term, state) in terms {
                out.write_string(term)?;
                out.write_vint(state.doc_freq)?;
                out.write_vlong(encode_opt(state.total_term_freq))?;
                out.write_vlong(state.doc_start_fp)?;
                out.write_vlong(encode_opt(state.skip_start_fp))?;
                out.write_vint(state.skip_entry_count)?;
                out.write_vlong(encode_opt(state.pos_start_fp))?;
            }
        }
        out.close()?;
        Ok(out.into_bytes())
    }
}

pub struct TermDictReader {
    fields: HashMap<i32, BTreeMap<String, TermState>>,
}

impl TermDictReader {
    pub fn open(mut input: BytesInput) -> Result<Self, Error> {
        let magic = input.read_string()?;
        if magic != MAGIC {
            return Err(Error::Corruption(format!(
                "term dict magic '{}'",
                magic
            )));
        }
        let version = input.read_vint()?;
        if version != VERSION {
            return Err(Error::Corruption(format!(
                "term dict version {}",
                version
            )));
        }
        let num_fields = input.read_vint()?;
        let mut fields = HashMap::default();
        for _ in 0..num_fields {
            let number = input.read_vint()? as i32;
            let num_terms = input.read_vint()?;
            let mut terms = BTreeMap::new();
            for _ in 0..num_terms {
                let term = input.read_string()?;
                let doc_freq = input.read_vint()?;
                let total_term_freq = decode_opt(input.read_vlong()?);
                let doc_start_fp = input.read_vlong()?;
                let skip_start_fp = decode_opt(input.read_vlong()?);
                let skip_entry_count = input.read_vint()?;
                let pos_start_fp = decode_opt(input.read_vlong()?);
                terms.insert(
                    term,
                    TermState {
                        doc_start_fp,
                        doc_freq,
                        total_term_freq,
                        skip_start_fp,
                        skip_entry_count,
                        pos_start_fp,
                    },
                );
            }
            fields.insert(number, terms);
        }
        Ok(Self { fields })
    }

    pub fn term_state(&self, field_number: i32, term: &str) -> Option<&TermState> {
        self.fields.get(&field_number).and_then(|t| t.get(term))
    }

    /// Terms of a field in sorted order.
    pub fn terms(&self, field_number: i32) -> impl Iterator<Item = (&str, &TermState)> {
        self.fields
            .get(&field_number)
            .into_iter()
            .flat_map(|t| t.iter().map(|(k, v)| (k.as_str(), v)))
    }

    pub fn field_numbers(&self) -> Vec<i32> {
        let mut numbers: Vec<i32> = self.fields.keys().cloned().collect();
        numbers.sort_unstable();
        numbers
    }
}
