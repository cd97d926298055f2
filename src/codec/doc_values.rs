//! Numeric doc values: a dense column of one i64 per document. Data
//! (`.dvd`) is plain big-endian values with zero for absent docs;
//! metadata (`.dvm`) locates each field's run and its min/max.

use crate::index::field_info::FieldInfo;
use crate::store::{BytesInput, IndexInput, IndexOutput};
use crate::{Error, HashMap};

const MAGIC: &str = "DiagonDocValues";
const VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct NumericFieldMeta {
    pub name: String,
    pub number: i32,
    pub num_docs: u32,
    pub num_values: u32,
    pub data_offset: u64,
    pub data_length: u64,
    pub min: i64,
    pub max: i64,
}

struct FieldBuffer {
    name: String,
    number: i32,
    values: Vec<i64>,
    has_value: Vec<bool>,
    num_values: u32,
    min: i64,
    max: i64,
}

/// Buffers values per field during indexing; `flush` lays them out as
/// dense per-doc runs once the segment's doc count is known.
#[derive(Default)]
pub struct NumericDocValuesWriter {
    buffers: HashMap<i32, FieldBuffer>,
}

impl NumericDocValuesWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn add_value(&mut self, field: &FieldInfo, doc_id: i32, value: i64) -> Result<(), Error> {
        if doc_id < 0 {
            return Err(Error::InvalidArgument(format!("doc id {}", doc_id)));
        }
        let buffer = self
            .buffers
            .entry(field.number)
            .or_insert_with(|| FieldBuffer {
                name: field.name.clone(),
                number: field.number,
                values: Vec::new(),
                has_value: Vec::new(),
                num_values: 0,
                min: i64::max_value(),
                max: i64::min_value(),
            });
        let idx = doc_id as usize;
        if buffer.values.len() <= idx {
            buffer.values.resize(idx + 1, 0);
            buffer.has_value.resize(idx + 1, false);
        }
        if buffer.has_value[idx] {
            return Err(Error::InvalidArgument(format!(
                "second value for doc {} in field '{}'",
                doc_id, buffer.name
            )));
        }
        buffer.values[idx] = value;
        buffer.has_value[idx] = true;
        buffer.num_values += 1;
        buffer.min = buffer.min.min(value);
        buffer.max = buffer.max.max(value);
        Ok(())
    }

    /// Values of one field in doc order (zeros for absent docs), for
    /// feeding skip-index aggregators at flush.
    pub fn dense_values(&self, field_number: i32, num_docs: u32) -> Option<Vec<i64>> {
        self.buffers.get(&field_number).map(|b| {
            let mut out = b.values.clone();
            out.resize(num_docs as usize, 0);
            out
        })
    }

    pub fn ram_bytes_used(&self) -> u64 {
        self.buffers
            .values()
            .map(|b| (b.values.len() * 8 + b.has_value.len()) as u64 + 64)
            .sum()
    }

    pub fn flush<D: IndexOutput, M: IndexOutput>(
        &self,
        num_docs: u32,
        data_out: &mut D,
        meta_out: &mut M,
    ) -> Result<(), Error> {
        for buffer in self.buffers.values() {
            if buffer.values.len() > num_docs as usize {
                return Err(Error::InvalidArgument(format!(
                    "field '{}' has a value for doc {} but the segment holds {} docs",
                    buffer.name,
                    buffer.values.len() - 1,
                    num_docs
                )));
            }
        }

        let mut numbers: Vec<i32> = self.buffers.keys().cloned().collect();
        numbers.sort_unstable();

        meta_out.write_string(MAGIC)?;
        meta_out.write_vint(VERSION)?;
        meta_out.write_vint(numbers.len() as u32)?;

        for number in numbers {
            let buffer = &self.buffers[&number];
            let data_offset = data_out.file_pointer();
            for doc in 0..num_docs as usize {
                let value = buffer.values.get(doc).cloned().unwrap_or(0);
                data_out.write_long(value)?;
            }
            let data_length = data_out.file_pointer() - data_offset;

            meta_out.write_vint(buffer.number as u32)?;
            meta_out.write_string(&buffer.name)?;
            meta_out.write_vint(num_docs)?;
            meta_out.write_vint(buffer.num_values)?;
            meta_out.write_vlong(data_offset)?;
            meta_out.write_vlong(data_length)?;
            meta_out.write_long(if buffer.num_values == 0 { 0 } else { buffer.min })?;
            meta_out.write_long(if buffer.num_values == 0 { 0 } else { buffer.max })?;
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.buffers.clear();
    }
}

/// Random access over one field's column.
pub struct NumericDocValues {
    data: BytesInput,
    meta: NumericFieldMeta,
}

impl NumericDocValues {
    pub fn get(&mut self, doc_id: i32) -> Result<i64, Error> {
        if doc_id < 0 || doc_id as u32 >= self.meta.num_docs {
            return Err(Error::InvalidArgument(format!(
                "doc {} outside 0..{}",
                doc_id, self.meta.num_docs
            )));
        }
        self.data.seek(self.meta.data_offset + doc_id as u64 * 8)?;
        self.data.read_long()
    }

    pub fn to_vec(&mut self) -> Result<Vec<i64>, Error> {
        self.data.seek(self.meta.data_offset)?;
        (0..self.meta.num_docs)
            .map(|_| self.data.read_long())
            .collect()
    }

    pub fn meta(&self) -> &NumericFieldMeta {
        &self.meta
    }
}

pub struct NumericDocValuesReader {
    data: BytesInput,
    by_name: HashMap<String, NumericFieldMeta>,
}

impl NumericDocValuesReader {
    pub fn open(data: BytesInput, mut meta_in: BytesInput) -> Result<Self, Error> {
        let magic = meta_in.read_string()?;
        if magic != MAGIC {
            return Err(Error::Corruption(format!("doc values magic '{}'", magic)));
        }
        let version = meta_in.read_vint()?;
        if version != VERSION {
            return Err(Error::Corruption(format!("doc values version {}", version)));
        }
        let num_fields = meta_in.read_vint()?;
        let mut by_name = HashMap::default();
        for _ in 0..num_fields {
            let number = meta_in.read_vint()? as i32;
            let name = meta_in.read_string()?;
            let num_docs = meta_in.read_vint()?;
            let num_values = meta_in.read_vint()?;
            let data_offset = meta_in.read_vlong()?;
            let data_length = meta_in.read_vlong()?;
            let min = meta_in.read_long()?;
            let max = meta_in.read_long()?;
            if data_length != num_docs as u64 * 8 {
                return Err(Error::Corruption(format!(
                    "field '{}': {} data bytes for {} docs",
                    name, data_length, num_docs
                )));
            }
            by_name.insert(
                name.clone(),
                NumericFieldMeta {
                    name,
                    number,
                    num_docs,
                    num_values,
                    data_offset,
                    data_length,
                    min,
                    max,
                },
            );
        }
        Ok(Self { data, by_name })
    }

    pub fn field_meta(&self, field_name: &str) -> Option<&NumericFieldMeta> {
        self.by_name.get(field_name)
    }

    pub fn get_numeric(&self, field_name: &str) -> Option<NumericDocValues> {
        self.by_name.get(field_name).map(|meta| NumericDocValues {
            data: self.data.clone(),
            meta: meta.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::field_info::{DocValuesType, FieldInfo};
    use crate::store::ByteBuffersOutput;

    fn numeric_field(name: &str, number: i32) -> FieldInfo {
        let mut info = FieldInfo::new(name, number);
        info.doc_values_type = DocValuesType::Numeric;
        info
    }

    #[test]
    fn dense_and_sparse_round_trip() {
        let price = numeric_field("price", 0);
        let stock = numeric_field("stock", 1);
        let mut writer = NumericDocValuesWriter::new();
        for doc in 0..10 {
            writer.add_value(&price, doc, (doc as i64 + 1) * 100).unwrap();
        }
        // stock only on even docs
        for doc in (0..10).step_by(2) {
            writer.add_value(&stock, doc, doc as i64 - 3).unwrap();
        }

        let mut data_out = ByteBuffersOutput::new();
        let mut meta_out = ByteBuffersOutput::new();
        writer.flush(10, &mut data_out, &mut meta_out).unwrap();

        let reader = NumericDocValuesReader::open(
            BytesInput::from_vec(data_out.into_bytes()),
            BytesInput::from_vec(meta_out.into_bytes()),
        )
        .unwrap();

        let price_meta = reader.field_meta("price").unwrap();
        assert_eq!(10, price_meta.num_docs);
        assert_eq!(10, price_meta.num_values);
        assert_eq!(100, price_meta.min);
        assert_eq!(1000, price_meta.max);

        let mut price_values = reader.get_numeric("price").unwrap();
        assert_eq!(100, price_values.get(0).unwrap());
        assert_eq!(700, price_values.get(6).unwrap());
        assert!(price_values.get(10).is_err());

        let stock_meta = reader.field_meta("stock").unwrap();
        assert_eq!(5, stock_meta.num_values);
        assert_eq!(-3, stock_meta.min);
        assert_eq!(5, stock_meta.max);

        // absent docs read as zero
        let mut stock_values = reader.get_numeric("stock").unwrap();
        assert_eq!(
            vec![-3, 0, -1, 0, 1, 0, 3, 0, 5, 0],
            stock_values.to_vec().unwrap()
        );

        assert!(reader.get_numeric("missing").is_none());
    }

    #[test]
    fn duplicate_and_out_of_range_docs_rejected() {
        let field = numeric_field("n", 0);
        let mut writer = NumericDocValuesWriter::new();
        writer.add_value(&field, 3, 7).unwrap();
        assert!(writer.add_value(&field, 3, 8).is_err());
        assert!(writer.add_value(&field, -1, 8).is_err());

        // doc 3 exists but the segment claims only 2 docs
        let mut data_out = ByteBuffersOutput::new();
        let mut meta_out = ByteBuffersOutput::new();
        assert!(writer.flush(2, &mut data_out, &mut meta_out).is_err());
    }

    #[test]
    fn dense_values_pad_to_doc_count() {
        let field = numeric_field("n", 0);
        let mut writer = NumericDocValuesWriter::new();
        writer.add_value(&field, 1, 5).unwrap();
        writer.add_value(&field, 4, 9).unwrap();
        assert_eq!(
            Some(vec![0, 5, 0, 0, 9, 0]),
            writer.dense_values(0, 6)
        );
        assert_eq!(None, writer.dense_values(9, 6));
    }
}
