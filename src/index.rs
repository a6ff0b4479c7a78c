//! Cartesian-product expansion of per-dimension sweep axes.
//!
//! Rows are produced in nested-loop order: the first listed axis is the
//! outermost loop and the last listed axis varies fastest.

use std::collections::HashSet;

use arrow::{
    array::{Array, ArrayRef, UInt64Array},
    compute::take,
    datatypes::DataType,
};

use crate::{
    error::{SweepError, SweepResult},
    value::{IndexArray, Scalar},
};

/// Mixed-radix counter over per-dimension lengths.
///
/// Yields the per-dimension positions of every combination with the last
/// digit incrementing first. A zero radix yields nothing; zero dimensions
/// yield a single empty combination.
#[derive(Debug, Clone)]
pub struct MixedRadix {
    radices: Vec<usize>,
    digits: Vec<usize>,
    remaining: usize,
}

impl MixedRadix {
    /// Counter over `radices`, or a shape error if the product overflows.
    pub fn new(radices: Vec<usize>) -> SweepResult<Self> {
        let total = radices
            .iter()
            .try_fold(1usize, |acc, &r| acc.checked_mul(r))
            .ok_or_else(|| {
                SweepError::Shape(format!("index product of {radices:?} overflows usize"))
            })?;
        Ok(Self {
            digits: vec![0; radices.len()],
            radices,
            remaining: total,
        })
    }

    /// Total number of combinations still to be yielded.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    fn advance(&mut self) {
        for (digit, radix) in self.digits.iter_mut().zip(&self.radices).rev() {
            *digit += 1;
            if *digit < *radix {
                return;
            }
            *digit = 0;
        }
    }
}

impl Iterator for MixedRadix {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.digits.clone();
        self.remaining -= 1;
        if self.remaining > 0 {
            self.advance();
        }
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for MixedRadix {}

/// Materialized Cartesian product: one Arrow column per index dimension.
#[derive(Debug, Clone)]
pub struct ExpandedIndex {
    names: Vec<String>,
    columns: Vec<ArrayRef>,
    len: usize,
}

impl ExpandedIndex {
    /// Index column names in caller order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Index columns, each `len()` long.
    pub fn columns(&self) -> &[ArrayRef] {
        &self.columns
    }

    /// Number of rows (combinations).
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when some axis was empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Index column types in caller order.
    pub fn data_types(&self) -> Vec<DataType> {
        self.columns.iter().map(|c| c.data_type().clone()).collect()
    }

    /// The index tuple of `row`.
    pub fn row(&self, row: usize) -> SweepResult<Vec<Scalar>> {
        self.columns
            .iter()
            .map(|column| Scalar::from_array(column.as_ref(), row))
            .collect()
    }
}

/// Expand `index_arrays` into one row per combination, rightmost fastest.
///
/// Fails with [`SweepError::Schema`] when the name count differs from the
/// axis count or names repeat, and with [`SweepError::Shape`] when an axis is
/// a bare scalar.
pub fn expand<S>(index_arrays: &[IndexArray], index_names: &[S]) -> SweepResult<ExpandedIndex>
where
    S: AsRef<str>,
{
    if index_arrays.len() != index_names.len() {
        return Err(SweepError::Schema(format!(
            "{} index arrays but {} index names",
            index_arrays.len(),
            index_names.len()
        )));
    }

    let mut seen = HashSet::with_capacity(index_names.len());
    for name in index_names {
        if !seen.insert(name.as_ref()) {
            return Err(SweepError::Schema(format!(
                "index name `{}` appears more than once",
                name.as_ref()
            )));
        }
    }

    let mut radices = Vec::with_capacity(index_arrays.len());
    let mut values = Vec::with_capacity(index_arrays.len());
    for (axis, name) in index_arrays.iter().zip(index_names) {
        let (Some(len), Some(array)) = (axis.len(), axis.to_array()) else {
            return Err(SweepError::Shape(format!(
                "index `{}` is a bare {} scalar, wrap it in a one-element array",
                name.as_ref(),
                axis.data_type()
            )));
        };
        radices.push(len);
        values.push(array);
    }

    let counter = MixedRadix::new(radices)?;
    let len = counter.remaining();
    let mut positions: Vec<Vec<u64>> =
        (0..values.len()).map(|_| Vec::with_capacity(len)).collect();
    for combination in counter {
        for (dim, digit) in combination.into_iter().enumerate() {
            positions[dim].push(digit as u64);
        }
    }

    let columns = values
        .iter()
        .zip(positions)
        .map(|(array, picks)| take(array.as_ref(), &UInt64Array::from(picks), None))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ExpandedIndex {
        names: index_names.iter().map(|n| n.as_ref().to_string()).collect(),
        columns,
        len,
    })
}
