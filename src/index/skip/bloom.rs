//! Bloom-filter skip index: one filter per indexed column per granule,
//! sized from the row count, answering equality and IN predicates.

use super::{IndexAggregator, IndexCondition, IndexDescription, IndexGranule, MergeTreeIndex, RowValue};
use crate::store::{BytesInput, IndexInput, IndexOutput};
use crate::util::bloom::{hash64, BloomFilter};
use crate::Error;
use std::any::Any;

pub struct BloomGranule {
    total_rows: u64,
    filters: Vec<BloomFilter>,
}

impl BloomGranule {
    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }
    pub fn filter(&self, column: usize) -> Option<&BloomFilter> {
        self.filters.get(column)
    }
}

impl IndexGranule for BloomGranule {
    fn is_empty(&self) -> bool {
        self.total_rows == 0
    }
    fn memory_usage_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + self
                .filters
                .iter()
                .map(|f| f.memory_usage_bytes())
                .sum::<usize>()
    }
    fn serialize(&self, out: &mut dyn IndexOutput) -> Result<(), Error> {
        out.write_vlong(self.total_rows)?;
        for filter in &self.filters {
            out.write_vlong(filter.words().len() as u64 * 8)?;
            for word in filter.words() {
                out.write_bytes(&word.to_le_bytes())?;
            }
        }
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct BloomAggregator {
    bits_per_row: u64,
    num_hashes: usize,
    columns: usize,
    column_hashes: Vec<Vec<u64>>,
    total_rows: u64,
}

impl BloomAggregator {
    fn new(bits_per_row: u64, num_hashes: usize, columns: usize) -> Self {
        Self {
            bits_per_row,
            num_hashes,
            columns,
            column_hashes: (0..columns).map(|_| Vec::new()).collect(),
            total_rows: 0,
        }
    }
}

impl IndexAggregator for BloomAggregator {
    fn is_empty(&self) -> bool {
        self.total_rows == 0
    }

    fn add_row(&mut self, row: &[RowValue]) -> Result<(), Error> {
        if row.len() != self.columns {
            return Err(Error::InvalidArgument(format!(
                "row of {} columns in a {}-column bloom index",
                row.len(),
                self.columns
            )));
        }
        for (col, value) in row.iter().enumerate() {
            let hash = match value {
                RowValue::Hash(h) => *h,
                // numbers hash by their bit pattern
                RowValue::Number(v) => hash64(&v.to_bits().to_le_bytes()),
            };
            self.column_hashes[col].push(hash);
        }
        self.total_rows += 1;
        Ok(())
    }

    fn granule_and_reset(&mut self) -> Result<Box<dyn IndexGranule>, Error> {
        let total_rows = self.total_rows;
        let size_bytes = ((self.bits_per_row * total_rows + 7) / 8).max(1) as usize;
        let mut filters = Vec::with_capacity(self.columns);
        for hashes in self.column_hashes.iter_mut() {
            let mut filter = BloomFilter::new(size_bytes, self.num_hashes, 0)?;
            for hash in hashes.drain(..) {
                filter.add_hash(hash);
            }
            filters.push(filter);
        }
        self.total_rows = 0;
        Ok(Box::new(BloomGranule {
            total_rows,
            filters,
        }))
    }
}

/// Equality and IN predicates over hashed column values. A granule may
/// match only if every predicate finds at least one of its hashes in
/// the column's filter; predicates on columns the index does not cover
/// are ignored.
#[derive(Default)]
pub struct BloomCondition {
    predicates: Vec<(usize, Vec<u64>)>,
}

impl BloomCondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, column: usize, hash: u64) -> Self {
        self.predicates.push((column, vec![hash]));
        self
    }

    pub fn in_set(mut self, column: usize, hashes: Vec<u64>) -> Self {
        self.predicates.push((column, hashes));
        self
    }
}

impl IndexCondition for BloomCondition {
    fn always_unknown_or_true(&self) -> bool {
        self.predicates.is_empty()
    }

    fn may_be_true_on_granule(&self, granule: &dyn IndexGranule) -> bool {
        let granule = match granule.as_any().downcast_ref::<BloomGranule>() {
            Some(g) => g,
            None => return true,
        };
        self.predicates.iter().all(|(column, hashes)| {
            match granule.filter(*column) {
                Some(filter) => hashes.iter().any(|h| filter.contains_hash(*h)),
                // column not indexed here: no filtering possible
                None => true,
            }
        })
    }

    fn description(&self) -> String {
        format!("bloom over {} predicates", self.predicates.len())
    }
}

pub struct BloomFilterIndex {
    description: IndexDescription,
    columns: usize,
    bits_per_row: u64,
    num_hashes: usize,
}

impl BloomFilterIndex {
    pub fn new(
        description: IndexDescription,
        columns: usize,
        bits_per_row: u64,
        num_hashes: usize,
    ) -> Result<Self, Error> {
        if columns == 0 || bits_per_row == 0 || num_hashes == 0 {
            return Err(Error::InvalidArgument(format!(
                "bloom index with columns={} bits_per_row={} num_hashes={}",
                columns, bits_per_row, num_hashes
            )));
        }
        Ok(Self {
            description,
            columns,
            bits_per_row,
            num_hashes,
        })
    }
}

impl MergeTreeIndex for BloomFilterIndex {
    fn description(&self) -> &IndexDescription {
        &self.description
    }

    fn create_aggregator(&self) -> Box<dyn IndexAggregator> {
        Box::new(BloomAggregator::new(
            self.bits_per_row,
            self.num_hashes,
            self.columns,
        ))
    }

    fn deserialize_granule(&self, input: &mut BytesInput) -> Result<Box<dyn IndexGranule>, Error> {
        let total_rows = input.read_vlong()?;
        let mut filters = Vec::with_capacity(self.columns);
        for _ in 0..self.columns {
            let filter_bytes = input.read_vlong()? as usize;
            if filter_bytes % 8 != 0 {
                return Err(Error::Corruption(format!(
                    "bloom filter payload of {} bytes",
                    filter_bytes
                )));
            }
            let mut words = Vec::with_capacity(filter_bytes / 8);
            for _ in 0..filter_bytes / 8 {
                let mut buf = [0u8; 8];
                input.read_bytes(&mut buf)?;
                words.push(u64::from_le_bytes(buf));
            }
            let size_bytes = ((self.bits_per_row * total_rows + 7) / 8).max(1) as usize;
            filters.push(BloomFilter::from_words(
                size_bytes,
                self.num_hashes,
                0,
                words,
            )?);
        }
        Ok(Box::new(BloomGranule {
            total_rows,
            filters,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::{SkipIndexReader, SkipIndexType, SkipIndexWriter};
    use super::*;
    use crate::store::ByteBuffersOutput;

    fn status_index() -> BloomFilterIndex {
        BloomFilterIndex::new(
            IndexDescription::new("status_code", SkipIndexType::BloomFilter, 1),
            1,
            8,
            5,
        )
        .unwrap()
    }

    #[test]
    fn inserted_values_always_found() {
        let index = status_index();
        let mut agg = index.create_aggregator();
        for code in &[200u64, 404, 500] {
            agg.add_row(&[RowValue::Hash(hash64(&code.to_be_bytes()))])
                .unwrap();
        }
        let granule = agg.granule_and_reset().unwrap();

        for code in &[200u64, 404, 500] {
            let cond = BloomCondition::new().equals(0, hash64(&code.to_be_bytes()));
            assert!(cond.may_be_true_on_granule(granule.as_ref()));
        }
        // absent value: definitely-not with high probability
        let cond = BloomCondition::new().equals(0, hash64(&999u64.to_be_bytes()));
        assert!(!cond.may_be_true_on_granule(granule.as_ref()));
    }

    #[test]
    fn in_predicate_matches_any_of_its_hashes() {
        let index = status_index();
        let mut agg = index.create_aggregator();
        agg.add_row(&[RowValue::Hash(hash64(b"rust"))]).unwrap();
        let granule = agg.granule_and_reset().unwrap();

        let hit = BloomCondition::new()
            .in_set(0, vec![hash64(b"go"), hash64(b"rust")]);
        assert!(hit.may_be_true_on_granule(granule.as_ref()));

        let miss = BloomCondition::new()
            .in_set(0, vec![hash64(b"go"), hash64(b"zig")]);
        assert!(!miss.may_be_true_on_granule(granule.as_ref()));

        // predicate on a column the index does not cover is ignored
        let foreign = BloomCondition::new().equals(9, hash64(b"anything"));
        assert!(foreign.may_be_true_on_granule(granule.as_ref()));

        assert!(BloomCondition::new().always_unknown_or_true());
    }

    #[test]
    fn serialization_round_trip() {
        let index = status_index();
        let mut agg = index.create_aggregator();
        for code in &[200u64, 404, 500] {
            agg.add_row(&[RowValue::Hash(hash64(&code.to_be_bytes()))])
                .unwrap();
        }
        let granule = agg.granule_and_reset().unwrap();
        let mut out = ByteBuffersOutput::new();
        granule.serialize(&mut out).unwrap();

        let mut input = BytesInput::from_vec(out.into_bytes());
        let back = index.deserialize_granule(&mut input).unwrap();
        let back = back.as_any().downcast_ref::<BloomGranule>().unwrap();
        assert_eq!(3, back.total_rows());
        assert!(back
            .filter(0)
            .unwrap()
            .contains_hash(hash64(&404u64.to_be_bytes())));
        assert!(!back
            .filter(0)
            .unwrap()
            .contains_hash(hash64(&999u64.to_be_bytes())));
    }

    #[test]
    fn end_to_end_through_the_index_file() {
        let index = status_index();
        let mut writer = SkipIndexWriter::with_rows_per_data_granule(&index, 4);
        // granule 0: 200s, granule 1: 500s
        for _ in 0..4 {
            writer
                .add_row(&[RowValue::Hash(hash64(&200u64.to_be_bytes()))])
                .unwrap();
        }
        for _ in 0..4 {
            writer
                .add_row(&[RowValue::Hash(hash64(&500u64.to_be_bytes()))])
                .unwrap();
        }
        let bytes = writer.finish().unwrap();
        let reader = SkipIndexReader::open(BytesInput::from_vec(bytes)).unwrap();
        assert_eq!(2, reader.granule_count());

        let want_500 = BloomCondition::new().equals(0, hash64(&500u64.to_be_bytes()));
        let keep = reader.select_granules(&index, &want_500).unwrap();
        assert_eq!(vec![false, true], keep);
    }
}
