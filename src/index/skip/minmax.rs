//! MinMax skip index: per granule, the running min and max of each
//! indexed column; a range condition skips granules whose span cannot
//! intersect the queried interval.

use super::{IndexAggregator, IndexCondition, IndexDescription, IndexGranule, MergeTreeIndex, RowValue};
use crate::store::{BytesInput, IndexInput, IndexOutput};
use crate::Error;
use std::any::Any;

#[derive(Debug, Clone, Default)]
pub struct MinMaxGranule {
    mins: Vec<f64>,
    maxs: Vec<f64>,
}

impl MinMaxGranule {
    pub fn min(&self, column: usize) -> Option<f64> {
        self.mins.get(column).cloned()
    }
    pub fn max(&self, column: usize) -> Option<f64> {
        self.maxs.get(column).cloned()
    }
    pub fn columns(&self) -> usize {
        self.mins.len()
    }
}

impl IndexGranule for MinMaxGranule {
    fn is_empty(&self) -> bool {
        self.mins.is_empty()
    }
    fn memory_usage_bytes(&self) -> usize {
        std::mem::size_of::<Self>() + (self.mins.len() + self.maxs.len()) * 8
    }
    fn serialize(&self, out: &mut dyn IndexOutput) -> Result<(), Error> {
        out.write_vint(self.mins.len() as u32)?;
        for (min, max) in self.mins.iter().zip(self.maxs.iter()) {
            out.write_long(min.to_bits() as i64)?;
            out.write_long(max.to_bits() as i64)?;
        }
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
pub struct MinMaxAggregator {
    granule: MinMaxGranule,
}

impl IndexAggregator for MinMaxAggregator {
    fn is_empty(&self) -> bool {
        self.granule.is_empty()
    }

    fn add_row(&mut self, row: &[RowValue]) -> Result<(), Error> {
        if self.granule.mins.is_empty() {
            self.granule.mins = vec![f64::INFINITY; row.len()];
            self.granule.maxs = vec![f64::NEG_INFINITY; row.len()];
        }
        if row.len() != self.granule.mins.len() {
            return Err(Error::InvalidArgument(format!(
                "row of {} columns in a {}-column minmax index",
                row.len(),
                self.granule.mins.len()
            )));
        }
        for (col, value) in row.iter().enumerate() {
            let v = match value {
                RowValue::Number(v) => *v,
                RowValue::Hash(_) => {
                    return Err(Error::InvalidArgument(
                        "hash value in a minmax index".to_string(),
                    ))
                }
            };
            if v < self.granule.mins[col] {
                self.granule.mins[col] = v;
            }
            if v > self.granule.maxs[col] {
                self.granule.maxs[col] = v;
            }
        }
        Ok(())
    }

    fn granule_and_reset(&mut self) -> Result<Box<dyn IndexGranule>, Error> {
        Ok(Box::new(std::mem::take(&mut self.granule)))
    }
}

/// Range predicate `lo <= column <= hi`.
pub struct MinMaxCondition {
    column: usize,
    lo: f64,
    hi: f64,
}

impl MinMaxCondition {
    pub fn range(column: usize, lo: f64, hi: f64) -> Self {
        Self { column, lo, hi }
    }
}

impl IndexCondition for MinMaxCondition {
    fn always_unknown_or_true(&self) -> bool {
        self.lo == f64::NEG_INFINITY && self.hi == f64::INFINITY
    }

    fn may_be_true_on_granule(&self, granule: &dyn IndexGranule) -> bool {
        let granule = match granule.as_any().downcast_ref::<MinMaxGranule>() {
            Some(g) => g,
            // foreign granule shape proves nothing
            None => return true,
        };
        match (granule.min(self.column), granule.max(self.column)) {
            (Some(min), Some(max)) => !(max < self.lo || min > self.hi),
            _ => true,
        }
    }

    fn description(&self) -> String {
        format!("{} <= col{} <= {}", self.lo, self.column, self.hi)
    }
}

pub struct MinMaxIndex {
    description: IndexDescription,
}

impl MinMaxIndex {
    pub fn new(description: IndexDescription) -> Self {
        Self { description }
    }
}

impl MergeTreeIndex for MinMaxIndex {
    fn description(&self) -> &IndexDescription {
        &self.description
    }

    fn create_aggregator(&self) -> Box<dyn IndexAggregator> {
        Box::new(MinMaxAggregator::default())
    }

    fn deserialize_granule(&self, input: &mut BytesInput) -> Result<Box<dyn IndexGranule>, Error> {
        let columns = input.read_vint()? as usize;
        let mut granule = MinMaxGranule::default();
        for _ in 0..columns {
            granule.mins.push(f64::from_bits(input.read_long()? as u64));
            granule.maxs.push(f64::from_bits(input.read_long()? as u64));
        }
        Ok(Box::new(granule))
    }
}

#[cfg(test)]
mod tests {
    use super::super::SkipIndexType;
    use super::*;
    use crate::store::ByteBuffersOutput;

    #[test]
    fn aggregator_tracks_min_and_max() {
        let mut agg = MinMaxAggregator::default();
        assert!(agg.is_empty());
        for v in &[10.0, 25.0, 50.0, 75.0, 100.0] {
            agg.add_row(&[RowValue::Number(*v)]).unwrap();
        }
        assert!(!agg.is_empty());
        let granule = agg.granule_and_reset().unwrap();
        let granule = granule.as_any().downcast_ref::<MinMaxGranule>().unwrap();
        assert_eq!(Some(10.0), granule.min(0));
        assert_eq!(Some(100.0), granule.max(0));
        assert!(agg.is_empty());
    }

    #[test]
    fn condition_filters_by_overlap() {
        let mut agg = MinMaxAggregator::default();
        for v in &[10.0, 25.0, 50.0, 75.0, 100.0] {
            agg.add_row(&[RowValue::Number(*v)]).unwrap();
        }
        let granule = agg.granule_and_reset().unwrap();

        assert!(MinMaxCondition::range(0, 50.0, 80.0).may_be_true_on_granule(granule.as_ref()));
        assert!(!MinMaxCondition::range(0, 150.0, 200.0).may_be_true_on_granule(granule.as_ref()));
        assert!(!MinMaxCondition::range(0, -5.0, 9.0).may_be_true_on_granule(granule.as_ref()));
        // boundary contact counts as overlap
        assert!(MinMaxCondition::range(0, 100.0, 200.0).may_be_true_on_granule(granule.as_ref()));
        assert!(MinMaxCondition::range(0, 0.0, 10.0).may_be_true_on_granule(granule.as_ref()));
    }

    #[test]
    fn serialization_round_trip() {
        let mut agg = MinMaxAggregator::default();
        agg.add_row(&[RowValue::Number(-4.5), RowValue::Number(7.0)])
            .unwrap();
        agg.add_row(&[RowValue::Number(3.25), RowValue::Number(-100.0)])
            .unwrap();
        let granule = agg.granule_and_reset().unwrap();

        let mut out = ByteBuffersOutput::new();
        granule.serialize(&mut out).unwrap();
        let index = MinMaxIndex::new(IndexDescription::new("x", SkipIndexType::MinMax, 1));
        let mut input = BytesInput::from_vec(out.into_bytes());
        let back = index.deserialize_granule(&mut input).unwrap();
        let back = back.as_any().downcast_ref::<MinMaxGranule>().unwrap();
        assert_eq!(2, back.columns());
        assert_eq!(Some(-4.5), back.min(0));
        assert_eq!(Some(3.25), back.max(0));
        assert_eq!(Some(-100.0), back.min(1));
        assert_eq!(Some(7.0), back.max(1));
    }

    #[test]
    fn rejects_hash_rows_and_ragged_rows() {
        let mut agg = MinMaxAggregator::default();
        assert!(agg.add_row(&[RowValue::Hash(42)]).is_err());
        agg.add_row(&[RowValue::Number(1.0)]).unwrap();
        assert!(agg
            .add_row(&[RowValue::Number(1.0), RowValue::Number(2.0)])
            .is_err());
    }
}
