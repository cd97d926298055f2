//! Stored fields: `.fdt` holds each document's field values back to
//! back, `.fdx` maps doc id to its `.fdt` offset. Values are typed
//! string / int / long.

use crate::store::{ByteBuffersOutput, BytesInput, IndexInput, IndexOutput};
use crate::Error;

const MAGIC: &str = "DiagonStoredFields";
const VERSION: u32 = 1;

const TYPE_STRING: u8 = 0;
const TYPE_INT: u8 = 1;
const TYPE_LONG: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue {
    Str(String),
    Int(i32),
    Long(i64),
}

pub struct StoredFieldsWriter {
    fdt: ByteBuffersOutput,
    offsets: Vec<u64>,
    pending: Option<Vec<(i32, StoredValue)>>,
}

impl Default for StoredFieldsWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl StoredFieldsWriter {
    pub fn new() -> Self {
        let mut fdt = ByteBuffersOutput::new();
        // header failures on a heap buffer cannot happen
        fdt.write_string(MAGIC).unwrap();
        fdt.write_vint(VERSION).unwrap();
        Self {
            fdt,
            offsets: Vec::new(),
            pending: None,
        }
    }

    pub fn num_docs(&self) -> u32 {
        self.offsets.len() as u32
    }

    pub fn start_document(&mut self) -> Result<(), Error> {
        if self.pending.is_some() {
            return Err(Error::InvalidArgument(
                "document already started".to_string(),
            ));
        }
        self.pending = Some(Vec::new());
        Ok(())
    }

    pub fn write_field(&mut self, field_number: i32, value: StoredValue) -> Result<(), Error> {
        self.pending
            .as_mut()
            .ok_or_else(|| Error::InvalidArgument("field outside a document".to_string()))?
            .push((field_number, value));
        Ok(())
    }

    pub fn finish_document(&mut self) -> Result<(), Error> {
        let fields = self
            .pending
            .take()
            .ok_or_else(|| Error::InvalidArgument("no document started".to_string()))?;
        self.offsets.push(self.fdt.file_pointer());
        self.fdt.write_vint(fields.len() as u32)?;
        for (number, value) in fields {
            self.fdt.write_vint(number as u32)?;
            match value {
                StoredValue::Str(s) => {
                    self.fdt.write_byte(TYPE_STRING)?;
                    self.fdt.write_string(&s)?;
                }
                StoredValue::Int(v) => {
                    self.fdt.write_byte(TYPE_INT)?;
                    self.fdt.write_vint(v as u32)?;
                }
                StoredValue::Long(v) => {
                    self.fdt.write_byte(TYPE_LONG)?;
                    self.fdt.write_vlong(v as u64)?;
                }
            }
        }
        Ok(())
    }

    /// Produce (`.fdt`, `.fdx`) bytes.
    pub fn finish(mut self) -> Result<(Vec<u8>, Vec<u8>), Error> {
        if self.pending.is_some() {
            return Err(Error::InvalidArgument(
                "unfinished document at close".to_string(),
            ));
        }
        let mut fdx = ByteBuffersOutput::new();
        fdx.write_string(MAGIC)?;
        fdx.write_vint(VERSION)?;
        fdx.write_vint(self.offsets.len() as u32)?;
        for offset in &self.offsets {
            fdx.write_vlong(*offset)?;
        }
        fdx.close()?;
        self.fdt.close()?;
        Ok((self.fdt.into_bytes(), fdx.into_bytes()))
    }
}

pub struct StoredFieldsReader {
    fdt: BytesInput,
    offsets: Vec<u64>,
}

impl StoredFieldsReader {
    pub fn open(mut fdt: BytesInput, mut fdx: BytesInput) -> Result<Self, Error> {
        for input in &mut [&mut fdt, &mut fdx] {
            let magic = input.read_string()?;
            if magic != MAGIC {
                return Err(Error::Corruption(format!(
                    "stored fields magic '{}'",
                    magic
                )));
            }
            let version = input.read_vint()?;
            if version != VERSION {
                return Err(Error::Corruption(format!(
                    "stored fields version {}",
                    version
                )));
            }
        }
        let num_docs = fdx.read_vint()?;
        let mut offsets = Vec::with_capacity(num_docs as usize);
        for _ in 0..num_docs {
            offsets.push(fdx.read_vlong()?);
        }
        Ok(Self { fdt, offsets })
    }

    pub fn num_docs(&self) -> u32 {
        self.offsets.len() as u32
    }

    pub fn document(&self, doc_id: i32) -> Result<Vec<(i32, StoredValue)>, Error> {
        if doc_id < 0 || doc_id as usize >= self.offsets.len() {
            return Err(Error::InvalidArgument(format!(
                "doc {} outside 0..{}",
                doc_id,
                self.offsets.len()
            )));
        }
        let mut fdt = self.fdt.clone();
        fdt.seek(self.offsets[doc_id as usize])?;
        let num_fields = fdt.read_vint()?;
        let mut fields = Vec::with_capacity(num_fields as usize);
        for _ in 0..num_fields {
            let number = fdt.read_vint()? as i32;
            let kind = fdt.read_byte()?;
            let value = match kind {
                TYPE_STRING => StoredValue::Str(fdt.read_string()?),
                TYPE_INT => StoredValue::Int(fdt.read_vint()? as i32),
                TYPE_LONG => StoredValue::Long(fdt.read_vlong()? as i64),
                other => {
                    return Err(Error::Corruption(format!(
                        "stored field type {}",
                        other
                    )))
                }
            };
            fields.push((number, value));
        }
        Ok(fields)
    }
}
