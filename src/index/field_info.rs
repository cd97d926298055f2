use crate::{Error, HashMap};
use std::collections::BTreeMap;

/// What a field's posting lists record. Ordered: every level includes
/// everything below it, and options may only be upgraded in a segment.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum IndexOptions {
    None,
    Docs,
    DocsAndFreqs,
    DocsAndFreqsAndPositions,
    DocsAndFreqsAndPositionsAndOffsets,
}

impl IndexOptions {
    pub fn has_postings(self) -> bool {
        self != IndexOptions::None
    }
    pub fn has_freqs(self) -> bool {
        self >= IndexOptions::DocsAndFreqs
    }
    pub fn has_positions(self) -> bool {
        self >= IndexOptions::DocsAndFreqsAndPositions
    }
    pub fn has_offsets(self) -> bool {
        self >= IndexOptions::DocsAndFreqsAndPositionsAndOffsets
    }
}

impl Default for IndexOptions {
    fn default() -> Self {
        IndexOptions::None
    }
}

/// Column-oriented per-document storage kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocValuesType {
    None,
    Numeric,
    Binary,
    Sorted,
    SortedNumeric,
    SortedSet,
}

impl DocValuesType {
    /// Families a range skip index can sit on.
    pub fn supports_skip_index(self) -> bool {
        matches!(
            self,
            DocValuesType::Numeric
                | DocValuesType::Sorted
                | DocValuesType::SortedNumeric
                | DocValuesType::SortedSet
        )
    }
}

impl Default for DocValuesType {
    fn default() -> Self {
        DocValuesType::None
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocValuesSkipIndexType {
    None,
    /// Min/max per block of doc values.
    Range,
}

impl Default for DocValuesSkipIndexType {
    fn default() -> Self {
        DocValuesSkipIndexType::None
    }
}

/// Per-field schema record, immutable once its segment is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub number: i32,
    pub index_options: IndexOptions,
    pub store_term_vector: bool,
    pub omit_norms: bool,
    pub store_payloads: bool,
    pub doc_values_type: DocValuesType,
    pub doc_values_skip_index: DocValuesSkipIndexType,
    pub dv_gen: i64,
    pub point_dimension_count: i32,
    pub point_index_dimension_count: i32,
    pub point_num_bytes: i32,
    pub soft_deletes_field: bool,
    pub is_parent_field: bool,
    pub attributes: BTreeMap<String, String>,
}

impl FieldInfo {
    pub fn new(name: &str, number: i32) -> Self {
        Self {
            name: name.to_string(),
            number,
            index_options: IndexOptions::None,
            store_term_vector: false,
            omit_norms: false,
            store_payloads: false,
            doc_values_type: DocValuesType::None,
            doc_values_skip_index: DocValuesSkipIndexType::None,
            dv_gen: -1,
            point_dimension_count: 0,
            point_index_dimension_count: 0,
            point_num_bytes: 0,
            soft_deletes_field: false,
            is_parent_field: false,
            attributes: BTreeMap::new(),
        }
    }

    pub fn indexed(name: &str, number: i32, options: IndexOptions) -> Self {
        let mut info = Self::new(name, number);
        info.index_options = options;
        info
    }

    pub fn has_postings(&self) -> bool {
        self.index_options.has_postings()
    }
    pub fn has_freqs(&self) -> bool {
        self.index_options.has_freqs()
    }
    pub fn has_positions(&self) -> bool {
        self.index_options.has_positions()
    }
    pub fn has_offsets(&self) -> bool {
        self.index_options.has_offsets()
    }
    pub fn has_norms(&self) -> bool {
        !self.omit_norms && self.has_postings()
    }
    pub fn has_doc_values(&self) -> bool {
        self.doc_values_type != DocValuesType::None
    }
    pub fn has_point_values(&self) -> bool {
        self.point_dimension_count > 0
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }
    pub fn put_attribute(&mut self, key: &str, value: &str) {
        self.attributes.insert(key.to_string(), value.to_string());
    }

    pub fn validate(&self) -> Result<(), Error> {
        let fail = |msg: String| Err(Error::InvalidArgument(format!("field '{}': {}", self.name, msg)));

        if self.name.is_empty() {
            return Err(Error::InvalidArgument("field with empty name".to_string()));
        }
        if self.number < 0 {
            return fail(format!("negative field number {}", self.number));
        }
        if self.store_payloads && !self.has_positions() {
            return fail("payloads require positions".to_string());
        }
        if !self.has_postings() && (self.store_term_vector || self.store_payloads) {
            return fail("term vectors and payloads require an indexed field".to_string());
        }
        if self.doc_values_skip_index != DocValuesSkipIndexType::None
            && !self.doc_values_type.supports_skip_index()
        {
            return fail(format!(
                "skip index is incompatible with doc values type {:?}",
                self.doc_values_type
            ));
        }
        if self.dv_gen != -1 && !self.has_doc_values() {
            return fail("doc values generation without doc values".to_string());
        }
        if self.point_dimension_count < 0
            || self.point_index_dimension_count < 0
            || self.point_num_bytes < 0
        {
            return fail("negative point configuration".to_string());
        }
        if self.point_dimension_count == 0
            && (self.point_index_dimension_count != 0 || self.point_num_bytes != 0)
        {
            return fail("point index dims or bytes without point dims".to_string());
        }
        if self.point_dimension_count > 0 {
            if self.point_index_dimension_count > self.point_dimension_count {
                return fail("point index dims exceed point dims".to_string());
            }
            if self.point_num_bytes == 0 {
                return fail("point dims without bytes per dimension".to_string());
            }
        }
        if self.soft_deletes_field && self.is_parent_field {
            return fail("cannot be both soft-deletes and parent field".to_string());
        }
        Ok(())
    }
}

/// All fields of one segment, with O(1) lookup by name or number and the
/// aggregate flags the codec consults. Non-copyable: the name index
/// holds positions into the canonical vector.
#[derive(Debug)]
pub struct FieldInfos {
    infos: Vec<FieldInfo>,
    by_name: HashMap<String, usize>,
    by_number: HashMap<i32, usize>,
    has_postings: bool,
    has_freq: bool,
    has_prox: bool,
    has_offsets: bool,
    has_payloads: bool,
    has_term_vectors: bool,
    has_norms: bool,
    has_doc_values: bool,
    has_point_values: bool,
    soft_deletes_field: Option<String>,
    parent_field: Option<String>,
}

impl FieldInfos {
    pub fn new(mut infos: Vec<FieldInfo>) -> Result<Self, Error> {
        infos.sort_by_key(|f| f.number);

        let mut by_name = HashMap::default();
        let mut by_number = HashMap::default();
        let mut soft_deletes_field = None;
        let mut parent_field = None;
        for (i, info) in infos.iter().enumerate() {
            info.validate()?;
            if by_name.insert(info.name.clone(), i).is_some() {
                return Err(Error::InvalidArgument(format!(
                    "duplicate field name '{}'",
                    info.name
                )));
            }
            if by_number.insert(info.number, i).is_some() {
                return Err(Error::InvalidArgument(format!(
                    "duplicate field number {}",
                    info.number
                )));
            }
            if info.soft_deletes_field {
                if soft_deletes_field.is_some() {
                    return Err(Error::InvalidArgument(format!(
                        "second soft-deletes field '{}'",
                        info.name
                    )));
                }
                soft_deletes_field = Some(info.name.clone());
            }
            if info.is_parent_field {
                if parent_field.is_some() {
                    return Err(Error::InvalidArgument(format!(
                        "second parent field '{}'",
                        info.name
                    )));
                }
                parent_field = Some(info.name.clone());
            }
        }

        Ok(Self {
            has_postings: infos.iter().any(|f| f.has_postings()),
            has_freq: infos.iter().any(|f| f.has_freqs()),
            has_prox: infos.iter().any(|f| f.has_positions()),
            has_offsets: infos.iter().any(|f| f.has_offsets()),
            has_payloads: infos.iter().any(|f| f.store_payloads),
            has_term_vectors: infos.iter().any(|f| f.store_term_vector),
            has_norms: infos.iter().any(|f| f.has_norms()),
            has_doc_values: infos.iter().any(|f| f.has_doc_values()),
            has_point_values: infos.iter().any(|f| f.has_point_values()),
            soft_deletes_field,
            parent_field,
            infos,
            by_name,
            by_number,
        })
    }

    pub fn by_name(&self, name: &str) -> Option<&FieldInfo> {
        self.by_name.get(name).map(|i| &self.infos[*i])
    }
    pub fn by_number(&self, number: i32) -> Option<&FieldInfo> {
        self.by_number.get(&number).map(|i| &self.infos[*i])
    }
    pub fn len(&self) -> usize {
        self.infos.len()
    }
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
    /// Iterate in field-number order.
    pub fn iter(&self) -> impl Iterator<Item = &FieldInfo> {
        self.infos.iter()
    }

    pub fn has_postings(&self) -> bool {
        self.has_postings
    }
    pub fn has_freq(&self) -> bool {
        self.has_freq
    }
    pub fn has_prox(&self) -> bool {
        self.has_prox
    }
    pub fn has_offsets(&self) -> bool {
        self.has_offsets
    }
    pub fn has_payloads(&self) -> bool {
        self.has_payloads
    }
    pub fn has_term_vectors(&self) -> bool {
        self.has_term_vectors
    }
    pub fn has_norms(&self) -> bool {
        self.has_norms
    }
    pub fn has_doc_values(&self) -> bool {
        self.has_doc_values
    }
    pub fn has_point_values(&self) -> bool {
        self.has_point_values
    }
    pub fn soft_deletes_field(&self) -> Option<&str> {
        self.soft_deletes_field.as_deref()
    }
    pub fn parent_field(&self) -> Option<&str> {
        self.parent_field.as_deref()
    }
}

/// Serialized as the canonical field list; deserialization re-runs the
/// full constructor so invalid manifests are rejected on load.
impl serde::Serialize for FieldInfos {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.infos.serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for FieldInfos {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let infos = Vec::<FieldInfo>::deserialize(deserializer)?;
        FieldInfos::new(infos).map_err(serde::de::Error::custom)
    }
}

/// Assigns field numbers monotonically while documents stream in, and
/// folds per-document field config into the per-segment schema.
#[derive(Default)]
pub struct FieldInfosBuilder {
    by_name: HashMap<String, FieldInfo>,
    next_number: i32,
}

impl FieldInfosBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Field number for `name`, allocating on first sight.
    pub fn get_or_add(&mut self, name: &str) -> i32 {
        if let Some(info) = self.by_name.get(name) {
            return info.number;
        }
        let number = self.next_number;
        self.next_number += 1;
        self.by_name
            .insert(name.to_string(), FieldInfo::new(name, number));
        number
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.by_name.get(name)
    }

    pub fn field_number(&self, name: &str) -> Option<i32> {
        self.by_name.get(name).map(|f| f.number)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Upgrade only; a downgrade attempt keeps the higher value.
    pub fn update_index_options(
        &mut self,
        name: &str,
        options: IndexOptions,
    ) -> Result<(), Error> {
        let info = self
            .by_name
            .get_mut(name)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown field '{}'", name)))?;
        if options > info.index_options {
            info.index_options = options;
        }
        Ok(())
    }

    /// Switching an established non-NONE type is a conflict.
    pub fn update_doc_values_type(
        &mut self,
        name: &str,
        doc_values: DocValuesType,
    ) -> Result<(), Error> {
        let info = self
            .by_name
            .get_mut(name)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown field '{}'", name)))?;
        if doc_values == DocValuesType::None {
            return Ok(());
        }
        if info.doc_values_type != DocValuesType::None && info.doc_values_type != doc_values {
            return Err(Error::InvalidArgument(format!(
                "field '{}': doc values type {:?} conflicts with {:?}",
                name, doc_values, info.doc_values_type
            )));
        }
        info.doc_values_type = doc_values;
        Ok(())
    }

    pub fn update_doc_values_skip_index(
        &mut self,
        name: &str,
        skip: DocValuesSkipIndexType,
    ) -> Result<(), Error> {
        let info = self
            .by_name
            .get_mut(name)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown field '{}'", name)))?;
        if skip != DocValuesSkipIndexType::None {
            info.doc_values_skip_index = skip;
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.by_name.clear();
        self.next_number = 0;
    }

    pub fn finish(&self) -> Result<FieldInfos, Error> {
        FieldInfos::new(self.by_name.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_options_are_ordered() {
        assert!(IndexOptions::None < IndexOptions::Docs);
        assert!(IndexOptions::Docs < IndexOptions::DocsAndFreqs);
        assert!(IndexOptions::DocsAndFreqs < IndexOptions::DocsAndFreqsAndPositions);
        assert!(
            IndexOptions::DocsAndFreqsAndPositions
                < IndexOptions::DocsAndFreqsAndPositionsAndOffsets
        );
        assert!(IndexOptions::DocsAndFreqsAndPositions.has_freqs());
        assert!(!IndexOptions::Docs.has_freqs());
    }

    #[test]
    fn single_valid_field() {
        let infos = FieldInfos::new(vec![FieldInfo::indexed(
            "body",
            0,
            IndexOptions::DocsAndFreqs,
        )])
        .unwrap();
        assert_eq!(1, infos.len());
        assert!(infos.has_freq());
        assert!(!infos.has_prox());
        assert_eq!(0, infos.by_name("body").unwrap().number);
        assert_eq!("body", infos.by_number(0).unwrap().name);
        assert!(infos.by_name("missing").is_none());
    }

    #[test]
    fn duplicate_names_and_numbers_rejected() {
        let dup_name = vec![
            FieldInfo::indexed("body", 0, IndexOptions::Docs),
            FieldInfo::indexed("body", 1, IndexOptions::Docs),
        ];
        assert!(FieldInfos::new(dup_name).is_err());

        let dup_number = vec![
            FieldInfo::indexed("a", 0, IndexOptions::Docs),
            FieldInfo::indexed("b", 0, IndexOptions::Docs),
        ];
        assert!(FieldInfos::new(dup_number).is_err());
    }

    #[test]
    fn at_most_one_special_field_each() {
        let mut a = FieldInfo::new("sd1", 0);
        a.soft_deletes_field = true;
        let mut b = FieldInfo::new("sd2", 1);
        b.soft_deletes_field = true;
        assert!(FieldInfos::new(vec![a.clone(), b]).is_err());

        let mut p1 = FieldInfo::new("p1", 1);
        p1.is_parent_field = true;
        let mut p2 = FieldInfo::new("p2", 2);
        p2.is_parent_field = true;
        assert!(FieldInfos::new(vec![p1.clone(), p2]).is_err());

        let infos = FieldInfos::new(vec![a, p1]).unwrap();
        assert_eq!(Some("sd1"), infos.soft_deletes_field());
        assert_eq!(Some("p1"), infos.parent_field());
    }

    #[test]
    fn validation_rules() {
        let mut payloads = FieldInfo::indexed("f", 0, IndexOptions::DocsAndFreqs);
        payloads.store_payloads = true;
        assert!(payloads.validate().is_err()); // payloads imply positions
        payloads.index_options = IndexOptions::DocsAndFreqsAndPositions;
        assert!(payloads.validate().is_ok());

        let mut vectors = FieldInfo::new("f", 0);
        vectors.store_term_vector = true;
        assert!(vectors.validate().is_err()); // not indexed

        let mut skip = FieldInfo::new("f", 0);
        skip.doc_values_skip_index = DocValuesSkipIndexType::Range;
        assert!(skip.validate().is_err()); // no doc values family
        skip.doc_values_type = DocValuesType::Numeric;
        assert!(skip.validate().is_ok());
        skip.doc_values_type = DocValuesType::Binary;
        assert!(skip.validate().is_err());

        let mut points = FieldInfo::new("f", 0);
        points.point_dimension_count = 2;
        assert!(points.validate().is_err()); // no bytes per dim
        points.point_num_bytes = 8;
        points.point_index_dimension_count = 3;
        assert!(points.validate().is_err()); // index dims > dims
        points.point_index_dimension_count = 2;
        assert!(points.validate().is_ok());

        assert!(FieldInfo::new("f", -1).validate().is_err());
        assert!(FieldInfo::new("", 0).validate().is_err());
    }

    #[test]
    fn builder_allocates_and_upgrades() {
        let mut builder = FieldInfosBuilder::new();
        assert_eq!(0, builder.get_or_add("title"));
        assert_eq!(1, builder.get_or_add("body"));
        assert_eq!(0, builder.get_or_add("title")); // stable

        builder
            .update_index_options("body", IndexOptions::DocsAndFreqsAndPositions)
            .unwrap();
        // downgrade silently keeps the higher value
        builder
            .update_index_options("body", IndexOptions::Docs)
            .unwrap();
        assert_eq!(
            IndexOptions::DocsAndFreqsAndPositions,
            builder.field("body").unwrap().index_options
        );

        assert!(builder
            .update_index_options("nope", IndexOptions::Docs)
            .is_err());

        builder
            .update_doc_values_type("title", DocValuesType::Numeric)
            .unwrap();
        assert!(builder
            .update_doc_values_type("title", DocValuesType::Sorted)
            .is_err());

        let infos = builder.finish().unwrap();
        assert_eq!(2, infos.len());
        assert!(infos.has_prox());

        builder.reset();
        assert_eq!(0, builder.len());
        assert_eq!(0, builder.get_or_add("fresh"));
    }

    #[test]
    fn serde_round_trip_revalidates() {
        let infos = FieldInfos::new(vec![
            FieldInfo::indexed("a", 0, IndexOptions::Docs),
            FieldInfo::indexed("b", 1, IndexOptions::DocsAndFreqsAndPositions),
        ])
        .unwrap();
        let json = serde_json::to_string(&infos).unwrap();
        let back: FieldInfos = serde_json::from_str(&json).unwrap();
        assert_eq!(2, back.len());
        assert!(back.by_name("b").unwrap().has_positions());
        assert!(back.has_prox());
    }
}
