//! Caller-facing value types: scalars, sweep axes, data blocks and records.

use std::{fmt, sync::Arc};

use arrow::{
    array::{Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray},
    datatypes::DataType,
};

use crate::error::{SweepError, SweepResult};

/// A single index or dictionary value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Boolean flag.
    Bool(bool),
}

impl Scalar {
    /// Arrow type used to store this scalar.
    pub fn data_type(&self) -> DataType {
        match self {
            Scalar::Int(_) => DataType::Int64,
            Scalar::Float(_) => DataType::Float64,
            Scalar::Str(_) => DataType::Utf8,
            Scalar::Bool(_) => DataType::Boolean,
        }
    }

    pub(crate) fn to_array(&self) -> ArrayRef {
        match self {
            Scalar::Int(v) => Arc::new(Int64Array::from(vec![*v])),
            Scalar::Float(v) => Arc::new(Float64Array::from(vec![*v])),
            Scalar::Str(v) => Arc::new(StringArray::from(vec![v.as_str()])),
            Scalar::Bool(v) => Arc::new(BooleanArray::from(vec![*v])),
        }
    }

    /// Read the scalar stored at `row` of a column written by this crate.
    pub fn from_array(array: &dyn Array, row: usize) -> SweepResult<Self> {
        if row >= array.len() {
            return Err(SweepError::Shape(format!(
                "row {row} out of bounds for column of length {}",
                array.len()
            )));
        }
        let any = array.as_any();
        let scalar = match array.data_type() {
            DataType::Int64 => any
                .downcast_ref::<Int64Array>()
                .map(|a| Scalar::Int(a.value(row))),
            DataType::Float64 => any
                .downcast_ref::<Float64Array>()
                .map(|a| Scalar::Float(a.value(row))),
            DataType::Utf8 => any
                .downcast_ref::<StringArray>()
                .map(|a| Scalar::Str(a.value(row).to_string())),
            DataType::Boolean => any
                .downcast_ref::<BooleanArray>()
                .map(|a| Scalar::Bool(a.value(row))),
            _ => None,
        };
        scalar.ok_or_else(|| {
            SweepError::Schema(format!(
                "unsupported column type {} for scalar values",
                array.data_type()
            ))
        })
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Str(v) => write!(f, "{v:?}"),
            Scalar::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Int(value.into())
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Str(value)
    }
}

/// One dimension of a sweep, as handed in by the caller.
///
/// The `Scalar` variant exists so that a caller passing a bare value where a
/// sequence was expected (a constant bias voltage, say) gets a
/// [`SweepError::Shape`] from expansion instead of a silent coercion. Wrap
/// constants as one-element vectors.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexArray {
    /// Integer axis.
    Int(Vec<i64>),
    /// Floating point axis.
    Float(Vec<f64>),
    /// String axis.
    Str(Vec<String>),
    /// Boolean axis.
    Bool(Vec<bool>),
    /// A bare scalar. Has no length.
    Scalar(Scalar),
}

impl IndexArray {
    /// Build a homogeneous axis from loose scalars.
    pub fn from_scalars(values: Vec<Scalar>) -> SweepResult<Self> {
        let Some(first) = values.first() else {
            return Err(SweepError::Schema(
                "cannot infer the type of an empty index array, use a typed variant".to_string(),
            ));
        };
        let data_type = first.data_type();
        let mixed = |found: &Scalar| {
            SweepError::Schema(format!(
                "index array mixes {data_type} with {}",
                found.data_type()
            ))
        };
        let array = match &data_type {
            DataType::Int64 => IndexArray::Int(
                values
                    .iter()
                    .map(|v| match v {
                        Scalar::Int(i) => Ok(*i),
                        other => Err(mixed(other)),
                    })
                    .collect::<SweepResult<_>>()?,
            ),
            DataType::Float64 => IndexArray::Float(
                values
                    .iter()
                    .map(|v| match v {
                        Scalar::Float(x) => Ok(*x),
                        other => Err(mixed(other)),
                    })
                    .collect::<SweepResult<_>>()?,
            ),
            DataType::Utf8 => IndexArray::Str(
                values
                    .into_iter()
                    .map(|v| match v {
                        Scalar::Str(s) => Ok(s),
                        other => Err(mixed(&other)),
                    })
                    .collect::<SweepResult<_>>()?,
            ),
            _ => IndexArray::Bool(
                values
                    .iter()
                    .map(|v| match v {
                        Scalar::Bool(b) => Ok(*b),
                        other => Err(mixed(other)),
                    })
                    .collect::<SweepResult<_>>()?,
            ),
        };
        Ok(array)
    }

    /// Number of points along this axis, or `None` for a bare scalar.
    pub fn len(&self) -> Option<usize> {
        match self {
            IndexArray::Int(v) => Some(v.len()),
            IndexArray::Float(v) => Some(v.len()),
            IndexArray::Str(v) => Some(v.len()),
            IndexArray::Bool(v) => Some(v.len()),
            IndexArray::Scalar(_) => None,
        }
    }

    /// True when the axis is a sequence with no points.
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Arrow type of the expanded index column.
    pub fn data_type(&self) -> DataType {
        match self {
            IndexArray::Int(_) => DataType::Int64,
            IndexArray::Float(_) => DataType::Float64,
            IndexArray::Str(_) => DataType::Utf8,
            IndexArray::Bool(_) => DataType::Boolean,
            IndexArray::Scalar(s) => s.data_type(),
        }
    }

    pub(crate) fn to_array(&self) -> Option<ArrayRef> {
        let array: ArrayRef = match self {
            IndexArray::Int(v) => Arc::new(Int64Array::from(v.clone())),
            IndexArray::Float(v) => Arc::new(Float64Array::from(v.clone())),
            IndexArray::Str(v) => Arc::new(StringArray::from_iter_values(v.iter())),
            IndexArray::Bool(v) => Arc::new(BooleanArray::from(v.clone())),
            IndexArray::Scalar(_) => return None,
        };
        Some(array)
    }
}

impl From<Vec<i64>> for IndexArray {
    fn from(value: Vec<i64>) -> Self {
        IndexArray::Int(value)
    }
}

impl From<Vec<f64>> for IndexArray {
    fn from(value: Vec<f64>) -> Self {
        IndexArray::Float(value)
    }
}

impl From<Vec<bool>> for IndexArray {
    fn from(value: Vec<bool>) -> Self {
        IndexArray::Bool(value)
    }
}

impl From<Vec<String>> for IndexArray {
    fn from(value: Vec<String>) -> Self {
        IndexArray::Str(value)
    }
}

impl From<Vec<&str>> for IndexArray {
    fn from(value: Vec<&str>) -> Self {
        IndexArray::Str(value.into_iter().map(str::to_string).collect())
    }
}

impl From<&[f64]> for IndexArray {
    fn from(value: &[f64]) -> Self {
        IndexArray::Float(value.to_vec())
    }
}

impl From<Scalar> for IndexArray {
    fn from(value: Scalar) -> Self {
        IndexArray::Scalar(value)
    }
}

impl From<f64> for IndexArray {
    fn from(value: f64) -> Self {
        IndexArray::Scalar(Scalar::Float(value))
    }
}

/// Row-major 2-D block of measured values, one row per expanded index row.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

impl DataBlock {
    /// Wrap `values` laid out row-major as `rows x cols`.
    pub fn new(rows: usize, cols: usize, values: Vec<f64>) -> SweepResult<Self> {
        let expected = rows.checked_mul(cols).ok_or_else(|| {
            SweepError::Shape(format!("data block {rows}x{cols} overflows usize"))
        })?;
        if values.len() != expected {
            return Err(SweepError::Shape(format!(
                "data block declared {rows}x{cols} but holds {} values",
                values.len()
            )));
        }
        Ok(Self { rows, cols, values })
    }

    /// Build a block from rows, rejecting ragged input.
    pub fn from_rows<R>(rows: impl IntoIterator<Item = R>) -> SweepResult<Self>
    where
        R: AsRef<[f64]>,
    {
        let mut values = Vec::new();
        let mut cols = None;
        let mut count = 0;
        for row in rows {
            let row = row.as_ref();
            match cols {
                None => cols = Some(row.len()),
                Some(width) if width != row.len() => {
                    return Err(SweepError::Shape(format!(
                        "row {count} has {} values, expected {width}",
                        row.len()
                    )));
                }
                Some(_) => {}
            }
            values.extend_from_slice(row);
            count += 1;
        }
        Ok(Self {
            rows: count,
            cols: cols.unwrap_or(0),
            values,
        })
    }

    /// Single-column block, one value per row.
    pub fn column_vector(values: Vec<f64>) -> Self {
        Self {
            rows: values.len(),
            cols: 1,
            values,
        }
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Value at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.values.get(row * self.cols + col).copied()
    }

    pub(crate) fn column_arrays(&self) -> Vec<ArrayRef> {
        (0..self.cols)
            .map(|col| {
                let column = Float64Array::from_iter_values(
                    (0..self.rows).map(|row| self.values[row * self.cols + col]),
                );
                Arc::new(column) as ArrayRef
            })
            .collect()
    }
}

/// A flat, ordered set of named scalars persisted as one dictionary row.
///
/// Insertion order becomes the column order when the dictionary key is first
/// written; later appends are matched by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Scalar)>,
}

impl Record {
    /// Empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a field, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Option<Scalar> {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((name, value));
                None
            }
        }
    }

    /// Value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    /// Fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: Into<String>,
    V: Into<Scalar>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}
