//! Column-order contracts for sweep tables and dictionary records.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use arrow::{
    array::ArrayRef,
    datatypes::{DataType, Field, Schema, SchemaRef},
};

use crate::{
    error::{SweepError, SweepResult},
    index::ExpandedIndex,
    value::Record,
};

/// Schema metadata key holding the number of leading index columns.
pub const INDEX_COLUMNS_META: &str = "sweepstore.index_columns";

/// Column layout of a sweep table: `[index_names..., data_column_names...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSchema {
    index: Vec<(String, DataType)>,
    data: Vec<String>,
}

impl SweepSchema {
    /// Layout for `index` followed by float data columns.
    pub fn new<S>(index: &ExpandedIndex, data_column_names: &[S]) -> SweepResult<Self>
    where
        S: AsRef<str>,
    {
        let schema = Self {
            index: index
                .names()
                .iter()
                .cloned()
                .zip(index.data_types())
                .collect(),
            data: data_column_names
                .iter()
                .map(|n| n.as_ref().to_string())
                .collect(),
        };
        schema.ensure_unique_names()?;
        Ok(schema)
    }

    fn ensure_unique_names(&self) -> SweepResult<()> {
        let mut seen = HashSet::new();
        for name in self.column_names() {
            if !seen.insert(name) {
                return Err(SweepError::Schema(format!(
                    "column `{name}` appears more than once"
                )));
            }
        }
        Ok(())
    }

    /// Index column names in order.
    pub fn index_names(&self) -> impl Iterator<Item = &str> {
        self.index.iter().map(|(n, _)| n.as_str())
    }

    /// Data column names in order.
    pub fn data_names(&self) -> &[String] {
        &self.data
    }

    /// Every column name in stored order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.index_names().chain(self.data.iter().map(String::as_str))
    }

    /// Number of index columns.
    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    /// Arrow schema with the index column count recorded in metadata.
    pub fn to_arrow(&self) -> SchemaRef {
        let fields = self
            .index
            .iter()
            .map(|(name, ty)| Field::new(name, ty.clone(), false))
            .chain(
                self.data
                    .iter()
                    .map(|name| Field::new(name, DataType::Float64, false)),
            )
            .collect::<Vec<_>>();
        let metadata = HashMap::from([(
            INDEX_COLUMNS_META.to_string(),
            self.index.len().to_string(),
        )]);
        Arc::new(Schema::new_with_metadata(fields, metadata))
    }

    /// Recover the layout from a stored Arrow schema.
    pub fn from_arrow(schema: &Schema) -> SweepResult<Self> {
        let index_len = schema
            .metadata()
            .get(INDEX_COLUMNS_META)
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|n| *n <= schema.fields().len())
            .ok_or_else(|| {
                SweepError::Corrupt(format!(
                    "table schema lacks a valid `{INDEX_COLUMNS_META}` entry"
                ))
            })?;
        let (index_fields, data_fields) = schema.fields().split_at(index_len);
        let mut data = Vec::with_capacity(data_fields.len());
        for field in data_fields {
            if field.data_type() != &DataType::Float64 {
                return Err(SweepError::Corrupt(format!(
                    "data column `{}` stored as {}, expected Float64",
                    field.name(),
                    field.data_type()
                )));
            }
            data.push(field.name().clone());
        }
        Ok(Self {
            index: index_fields
                .iter()
                .map(|f| (f.name().clone(), f.data_type().clone()))
                .collect(),
            data,
        })
    }

    /// Require `self` (incoming) to equal `existing` column for column.
    pub fn ensure_matches(&self, existing: &SweepSchema, key: &str) -> SweepResult<()> {
        let incoming_index: Vec<_> = self.index_names().collect();
        let existing_index: Vec<_> = existing.index_names().collect();
        if incoming_index != existing_index {
            return Err(SweepError::mismatch(
                key,
                format!("index columns {incoming_index:?} differ from stored {existing_index:?}"),
            ));
        }
        for ((name, incoming), (_, stored)) in self.index.iter().zip(&existing.index) {
            if incoming != stored {
                return Err(SweepError::mismatch(
                    key,
                    format!("index column `{name}` is {incoming}, stored as {stored}"),
                ));
            }
        }
        if self.data != existing.data {
            return Err(SweepError::mismatch(
                key,
                format!(
                    "data columns {:?} differ from stored {:?}",
                    self.data, existing.data
                ),
            ));
        }
        Ok(())
    }
}

/// Column layout of a dictionary record table, fixed at first write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    fields: Vec<(String, DataType)>,
}

impl RecordSchema {
    /// Layout taken from the record's insertion order.
    pub fn from_record(record: &Record) -> SweepResult<Self> {
        if record.is_empty() {
            return Err(SweepError::Schema(
                "dictionary record has no fields".to_string(),
            ));
        }
        Ok(Self {
            fields: record
                .iter()
                .map(|(name, value)| (name.to_string(), value.data_type()))
                .collect(),
        })
    }

    /// Recover the layout from a stored Arrow schema.
    pub fn from_arrow(schema: &Schema) -> Self {
        Self {
            fields: schema
                .fields()
                .iter()
                .map(|f| (f.name().clone(), f.data_type().clone()))
                .collect(),
        }
    }

    /// Arrow schema in stored column order.
    pub fn to_arrow(&self) -> SchemaRef {
        Arc::new(Schema::new(
            self.fields
                .iter()
                .map(|(name, ty)| Field::new(name, ty.clone(), false))
                .collect::<Vec<_>>(),
        ))
    }

    /// Column names in stored order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    /// Require the same column set and types as `existing`, in any order.
    pub fn ensure_compatible(&self, existing: &RecordSchema, key: &str) -> SweepResult<()> {
        let stored: HashMap<&str, &DataType> =
            existing.fields.iter().map(|(n, t)| (n.as_str(), t)).collect();
        let incoming: HashMap<&str, &DataType> =
            self.fields.iter().map(|(n, t)| (n.as_str(), t)).collect();

        let mut missing: Vec<_> = stored
            .keys()
            .filter(|n| !incoming.contains_key(*n))
            .copied()
            .collect();
        let mut extra: Vec<_> = incoming
            .keys()
            .filter(|n| !stored.contains_key(*n))
            .copied()
            .collect();
        if !missing.is_empty() || !extra.is_empty() {
            missing.sort_unstable();
            extra.sort_unstable();
            return Err(SweepError::mismatch(
                key,
                format!("dictionary keys differ: missing {missing:?}, unexpected {extra:?}"),
            ));
        }

        for (name, stored_ty) in &existing.fields {
            let incoming_ty = incoming[name.as_str()];
            if incoming_ty != stored_ty {
                return Err(SweepError::mismatch(
                    key,
                    format!("dictionary key `{name}` is {incoming_ty}, stored as {stored_ty}"),
                ));
            }
        }
        Ok(())
    }

    /// Columns for `record` laid out in this schema's order.
    ///
    /// Callers must have checked compatibility first.
    pub(crate) fn align(&self, record: &Record, key: &str) -> SweepResult<Vec<ArrayRef>> {
        self.fields
            .iter()
            .map(|(name, _)| {
                record
                    .get(name)
                    .map(|value| value.to_array())
                    .ok_or_else(|| {
                        SweepError::mismatch(key, format!("dictionary key `{name}` is missing"))
                    })
            })
            .collect()
    }
}
