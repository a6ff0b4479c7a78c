//! Common helpers for integration tests.
#![allow(dead_code)]

use sweepstore::{DataBlock, IndexArray, Record, SweepOptions, SweepStore, SweepTable};

/// Options with fsync disabled so tests stay fast.
pub fn test_options() -> SweepOptions {
    SweepOptions::default().sync_on_write(false)
}

pub fn test_store() -> SweepStore {
    SweepStore::new(test_options())
}

/// `rows x cols` block whose value at `(r, c)` is `offset + r * cols + c`.
pub fn counting_block(rows: usize, cols: usize, offset: f64) -> DataBlock {
    let values = (0..rows * cols).map(|v| offset + v as f64).collect();
    DataBlock::new(rows, cols, values).expect("block shape")
}

pub fn frequencies(n: i64) -> Vec<IndexArray> {
    vec![IndexArray::from((1..=n).collect::<Vec<_>>())]
}

pub fn settings(step: i64) -> Record {
    Record::new().with("step", step).with("power_dbm", -20.0)
}

/// Values of a data column as a plain vector.
pub fn data_values(table: &SweepTable, column: &str) -> Vec<f64> {
    table
        .data_column(column)
        .expect("data column present")
        .values()
        .to_vec()
}
