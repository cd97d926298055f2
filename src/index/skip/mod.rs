//! Granule-level skip indexes in the MergeTree style: an aggregator
//! folds rows into a granule every `granularity` data granules, the
//! granule serializes into `skp_idx_<name>.idx`, and a query-time
//! condition decides per granule whether it can possibly match.

pub mod bloom;
pub mod minmax;

use crate::store::{ByteBuffersOutput, BytesInput, IndexInput, IndexOutput};
use crate::util::packed::{DirectMonotonicReader, DirectMonotonicWriter, MonotonicMeta};
use crate::Error;
use std::any::Any;

const MAGIC: &str = "DiagonSkipIndex";
const VERSION: u32 = 1;
const OFFSETS_BLOCK_SHIFT: u32 = 4;

/// Rows of a data granule, the unit fed to aggregators.
pub const DATA_GRANULE_ROWS: u64 = 8192;

/// One cell of an indexed row: plain numbers for ordered indexes,
/// pre-computed hashes for membership indexes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowValue {
    Number(f64),
    Hash(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipIndexType {
    MinMax,
    BloomFilter,
}

#[derive(Debug, Clone)]
pub struct IndexDescription {
    pub name: String,
    pub kind: SkipIndexType,
    /// Data granules per index granule.
    pub granularity: u64,
}

impl IndexDescription {
    pub fn new(name: &str, kind: SkipIndexType, granularity: u64) -> Self {
        Self {
            name: name.to_string(),
            kind,
            granularity: granularity.max(1),
        }
    }
}

/// Immutable per-granule payload.
pub trait IndexGranule: Any {
    fn is_empty(&self) -> bool;
    fn memory_usage_bytes(&self) -> usize;
    fn serialize(&self, out: &mut dyn IndexOutput) -> Result<(), Error>;
    fn as_any(&self) -> &dyn Any;
}

/// Accumulates rows between granule boundaries.
pub trait IndexAggregator {
    fn is_empty(&self) -> bool;
    fn add_row(&mut self, row: &[RowValue]) -> Result<(), Error>;
    /// Emit the accumulated granule and start a fresh one.
    fn granule_and_reset(&mut self) -> Result<Box<dyn IndexGranule>, Error>;
}

/// Query-time filter; `false` from `may_be_true_on_granule` proves the
/// granule cannot match and lets the planner skip it.
pub trait IndexCondition {
    /// True when this condition cannot rule anything out.
    fn always_unknown_or_true(&self) -> bool;
    fn may_be_true_on_granule(&self, granule: &dyn IndexGranule) -> bool;
    fn description(&self) -> String;
}

/// Factory tying a description to its granule and aggregator shapes.
/// Conditions are built directly from query predicates on the concrete
/// types in [`minmax`] and [`bloom`].
pub trait MergeTreeIndex {
    fn description(&self) -> &IndexDescription;
    fn create_aggregator(&self) -> Box<dyn IndexAggregator>;
    fn deserialize_granule(&self, input: &mut BytesInput) -> Result<Box<dyn IndexGranule>, Error>;

    fn name(&self) -> &str {
        &self.description().name
    }
    fn granularity(&self) -> u64 {
        self.description().granularity
    }
    fn file_name(&self) -> String {
        format!("skp_idx_{}.idx", self.description().name)
    }
}

/// Streams rows in, serializes one granule every
/// `granularity * rows_per_data_granule` rows, and finishes with a
/// monotonic offset directory so granule k is one seek away.
pub struct SkipIndexWriter {
    aggregator: Box<dyn IndexAggregator>,
    rows_per_granule: u64,
    rows_in_granule: u64,
    payload: ByteBuffersOutput,
    offsets: Vec<u64>,
}

impl SkipIndexWriter {
    pub fn new(index: &dyn MergeTreeIndex) -> Self {
        Self::with_rows_per_data_granule(index, DATA_GRANULE_ROWS)
    }

    /// Smaller data granules, for tests and tiny segments.
    pub fn with_rows_per_data_granule(index: &dyn MergeTreeIndex, rows: u64) -> Self {
        let mut payload = ByteBuffersOutput::new();
        payload.write_string(MAGIC).unwrap();
        payload.write_vint(VERSION).unwrap();
        Self {
            aggregator: index.create_aggregator(),
            rows_per_granule: index.granularity() * rows.max(1),
            rows_in_granule: 0,
            payload,
            offsets: Vec::new(),
        }
    }

    pub fn add_row(&mut self, row: &[RowValue]) -> Result<(), Error> {
        self.aggregator.add_row(row)?;
        self.rows_in_granule += 1;
        if self.rows_in_granule == self.rows_per_granule {
            self.flush_granule()?;
        }
        Ok(())
    }

    fn flush_granule(&mut self) -> Result<(), Error> {
        let granule = self.aggregator.granule_and_reset()?;
        self.offsets.push(self.payload.file_pointer());
        granule.serialize(&mut self.payload)?;
        self.rows_in_granule = 0;
        Ok(())
    }

    /// Close out the trailing partial granule and append the offset
    /// directory plus fixed-size footer.
    pub fn finish(mut self) -> Result<Vec<u8>, Error> {
        if !self.aggregator.is_empty() {
            self.flush_granule()?;
        }
        let granule_count = self.offsets.len() as u64;

        let mut offsets_data = ByteBuffersOutput::new();
        let mut offsets_meta = ByteBuffersOutput::new();
        {
            let mut writer = DirectMonotonicWriter::new(
                &mut offsets_meta,
                &mut offsets_data,
                granule_count,
                OFFSETS_BLOCK_SHIFT,
            )?;
            for offset in &self.offsets {
                writer.add(*offset as i64)?;
            }
            writer.finish()?;
        }

        let data_fp = self.payload.file_pointer();
        self.payload.write_bytes(offsets_data.as_bytes())?;
        let meta_fp = self.payload.file_pointer();
        self.payload.write_bytes(offsets_meta.as_bytes())?;

        self.payload.write_long(granule_count as i64)?;
        self.payload.write_long(meta_fp as i64)?;
        self.payload.write_long(data_fp as i64)?;
        self.payload.write_int(OFFSETS_BLOCK_SHIFT as i32)?;
        self.payload.close()?;
        Ok(self.payload.into_bytes())
    }
}

const FOOTER_BYTES: u64 = 8 + 8 + 8 + 4;

pub struct SkipIndexReader {
    input: BytesInput,
    offsets_meta: MonotonicMeta,
    granule_count: u64,
}

impl SkipIndexReader {
    pub fn open(input: BytesInput) -> Result<Self, Error> {
        let mut header = input.clone();
        let magic = header.read_string()?;
        if magic != MAGIC {
            return Err(Error::Corruption(format!("skip index magic '{}'", magic)));
        }
        let version = header.read_vint()?;
        if version != VERSION {
            return Err(Error::Corruption(format!("skip index version {}", version)));
        }

        if input.len() < FOOTER_BYTES {
            return Err(Error::Corruption("skip index shorter than footer".to_string()));
        }
        let mut footer = input.clone();
        footer.seek(input.len() - FOOTER_BYTES)?;
        let granule_count = footer.read_long()? as u64;
        let meta_fp = footer.read_long()? as u64;
        let data_fp = footer.read_long()? as u64;
        let block_shift = footer.read_int()? as u32;

        Ok(Self {
            input,
            offsets_meta: MonotonicMeta {
                num_values: granule_count,
                block_shift,
                meta_fp,
                data_fp,
            },
            granule_count,
        })
    }

    pub fn granule_count(&self) -> u64 {
        self.granule_count
    }

    pub fn granule(
        &self,
        index: &dyn MergeTreeIndex,
        granule_index: u64,
    ) -> Result<Box<dyn IndexGranule>, Error> {
        if granule_index >= self.granule_count {
            return Err(Error::InvalidArgument(format!(
                "granule {} of {}",
                granule_index, self.granule_count
            )));
        }
        let mut meta_in = self.input.clone();
        let mut data_in = self.input.clone();
        let offset = DirectMonotonicReader::get(
            &self.offsets_meta,
            &mut meta_in,
            &mut data_in,
            granule_index,
        )? as u64;
        let mut cursor = self.input.clone();
        cursor.seek(offset)?;
        index.deserialize_granule(&mut cursor)
    }

    /// One flag per granule: `false` means provably no match, skip it.
    pub fn select_granules(
        &self,
        index: &dyn MergeTreeIndex,
        condition: &dyn IndexCondition,
    ) -> Result<Vec<bool>, Error> {
        let mut keep = Vec::with_capacity(self.granule_count as usize);
        for g in 0..self.granule_count {
            if condition.always_unknown_or_true() {
                keep.push(true);
                continue;
            }
            let granule = self.granule(index, g)?;
            keep.push(condition.may_be_true_on_granule(granule.as_ref()));
        }
        Ok(keep)
    }
}

#[cfg(test)]
mod tests {
    use super::minmax::{MinMaxCondition, MinMaxIndex};
    use super::*;

    #[test]
    fn granule_directory_locates_every_granule() {
        let index = MinMaxIndex::new(IndexDescription::new("ts", SkipIndexType::MinMax, 1));
        let mut writer = SkipIndexWriter::with_rows_per_data_granule(&index, 10);
        // 95 rows -> 9 full granules + 1 tail
        for i in 0..95i64 {
            writer.add_row(&[RowValue::Number(i as f64)]).unwrap();
        }
        let bytes = writer.finish().unwrap();

        let reader = SkipIndexReader::open(BytesInput::from_vec(bytes)).unwrap();
        assert_eq!(10, reader.granule_count());

        let condition = MinMaxCondition::range(0, 42.0, 47.0);
        let keep = reader.select_granules(&index, &condition).unwrap();
        // rows 42..=47 live in granules 4 (40..49)
        assert_eq!(
            vec![false, false, false, false, true, false, false, false, false, false],
            keep
        );
    }

    #[test]
    fn granularity_multiplies_rows_per_granule() {
        let index = MinMaxIndex::new(IndexDescription::new("ts", SkipIndexType::MinMax, 3));
        let mut writer = SkipIndexWriter::with_rows_per_data_granule(&index, 10);
        for i in 0..60i64 {
            writer.add_row(&[RowValue::Number(i as f64)]).unwrap();
        }
        let bytes = writer.finish().unwrap();
        let reader = SkipIndexReader::open(BytesInput::from_vec(bytes)).unwrap();
        // 30 rows per index granule
        assert_eq!(2, reader.granule_count());
    }

    #[test]
    fn file_name_matches_convention() {
        let index = MinMaxIndex::new(IndexDescription::new("price", SkipIndexType::MinMax, 1));
        assert_eq!("skp_idx_price.idx", index.file_name());
    }

    #[test]
    fn truncated_file_is_corruption() {
        let result = SkipIndexReader::open(BytesInput::from_vec(vec![1, 2, 3]));
        assert!(result.is_err());
    }
}
