use crate::index::field_info::{DocValuesSkipIndexType, DocValuesType, IndexOptions};

/// One analyzed token. Analysis itself happens upstream; the core only
/// consumes the ordered sequence and treats `text` as opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub position: u32,
    pub start_offset: u32,
    pub end_offset: u32,
    pub kind: String,
}

impl Token {
    pub fn new(text: &str, position: u32, start_offset: u32, end_offset: u32) -> Self {
        Self {
            text: text.to_string(),
            position,
            start_offset,
            end_offset,
            kind: "word".to_string(),
        }
    }
    /// Convenience for tests and keyword fields: offsets spanning the text.
    pub fn at(text: &str, position: u32) -> Self {
        Self::new(text, position, 0, text.len() as u32)
    }
}

#[derive(Debug, Clone)]
pub enum FieldValue {
    /// Analyzed token stream; feeds the posting lists.
    Tokens(Vec<Token>),
    /// Atomic term; indexed as a single token at position 0.
    Keyword(String),
    /// 64-bit value; feeds numeric doc values.
    Numeric(i64),
}

#[derive(Debug, Clone)]
pub struct DocField {
    pub name: String,
    pub value: FieldValue,
    pub index_options: IndexOptions,
    pub doc_values: DocValuesType,
    pub doc_values_skip_index: DocValuesSkipIndexType,
    pub stored: bool,
}

/// A document handed to the indexing chain: fields with already-analyzed
/// values plus the per-field storage flags.
#[derive(Debug, Default, Clone)]
pub struct Document {
    fields: Vec<DocField>,
}

impl Document {
    pub fn fields(&self) -> &[DocField] {
        &self.fields
    }

    /// Add an analyzed text field.
    pub fn tokens(&mut self, name: &str, tokens: Vec<Token>, options: IndexOptions) -> &mut Self {
        self.fields.push(DocField {
            name: name.to_string(),
            value: FieldValue::Tokens(tokens),
            index_options: options,
            doc_values: DocValuesType::None,
            doc_values_skip_index: DocValuesSkipIndexType::None,
            stored: false,
        });
        self
    }

    /// Whitespace-split helper for tests; real analysis lives upstream.
    pub fn text(&mut self, name: &str, text: &str, options: IndexOptions) -> &mut Self {
        let tokens = text
            .split_whitespace()
            .enumerate()
            .map(|(i, w)| Token::at(w, i as u32))
            .collect();
        self.tokens(name, tokens, options)
    }

    /// Exact-match field: one token, stored verbatim.
    pub fn keyword(&mut self, name: &str, value: &str) -> &mut Self {
        self.fields.push(DocField {
            name: name.to_string(),
            value: FieldValue::Keyword(value.to_string()),
            index_options: IndexOptions::Docs,
            doc_values: DocValuesType::None,
            doc_values_skip_index: DocValuesSkipIndexType::None,
            stored: true,
        });
        self
    }

    pub fn numeric(&mut self, name: &str, value: i64) -> &mut Self {
        self.fields.push(DocField {
            name: name.to_string(),
            value: FieldValue::Numeric(value),
            index_options: IndexOptions::None,
            doc_values: DocValuesType::Numeric,
            doc_values_skip_index: DocValuesSkipIndexType::None,
            stored: true,
        });
        self
    }

    /// Numeric doc values plus a range skip index built at flush.
    pub fn numeric_with_skip_index(&mut self, name: &str, value: i64) -> &mut Self {
        self.numeric(name, value);
        self.fields.last_mut().unwrap().doc_values_skip_index = DocValuesSkipIndexType::Range;
        self
    }
}
