//! Keyed sweep tables and dictionary records inside one container file.
//!
//! Every operation takes the container path explicitly and opens, writes and
//! closes the file within the call. Validation runs before any byte is
//! written, and each successful call lands as exactly one frame.

use std::{fs::File, path::Path};

use arrow::{
    array::{Array, ArrayRef, Float64Array},
    datatypes::SchemaRef,
    record_batch::{RecordBatch, RecordBatchOptions},
};
use log::Level;
use parquet::arrow::ArrowWriter;

use crate::{
    container::{
        file::{self, ContainerLayout, ContainerScan, Entry, EntrySummary},
        FrameKind,
    },
    error::{io_err, SweepError, SweepResult},
    index::expand,
    logging::sweep_log,
    option::SweepOptions,
    schema::{RecordSchema, SweepSchema},
    value::{DataBlock, IndexArray, Record, Scalar},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Create,
    Append,
    CreateOrAppend,
}

/// Outcome of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    /// Key written to.
    pub key: String,
    /// Rows added by this call.
    pub rows_written: usize,
    /// Rows under the key after this call.
    pub total_rows: usize,
    /// Container size on disk after the write.
    pub file_len: u64,
}

/// A sweep table loaded from a container.
#[derive(Debug, Clone)]
pub struct SweepTable {
    key: String,
    schema: SweepSchema,
    batch: RecordBatch,
}

impl SweepTable {
    /// Key the table is stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Column layout.
    pub fn schema(&self) -> &SweepSchema {
        &self.schema
    }

    /// All rows as one batch, columns in stored order.
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Consume the table, returning its rows.
    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Any column by name.
    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.batch.column_by_name(name)
    }

    /// A data column by name.
    pub fn data_column(&self, name: &str) -> Option<&Float64Array> {
        if !self.schema.data_names().iter().any(|n| n == name) {
            return None;
        }
        self.column(name)?.as_any().downcast_ref::<Float64Array>()
    }

    /// Index tuple of `row`.
    pub fn index_row(&self, row: usize) -> SweepResult<Vec<Scalar>> {
        self.batch.columns()[..self.schema.index_len()]
            .iter()
            .map(|column| Scalar::from_array(column.as_ref(), row))
            .collect()
    }
}

/// Dictionary rows loaded from a container.
#[derive(Debug, Clone)]
pub struct RecordTable {
    key: String,
    schema: RecordSchema,
    batch: RecordBatch,
}

impl RecordTable {
    /// Key the dictionary is stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Column layout fixed at first write.
    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// All rows as one batch.
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Number of appended dictionaries.
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Column by dictionary key.
    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.batch.column_by_name(name)
    }

    /// The dictionary appended as row `row`, fields in stored order.
    pub fn row(&self, row: usize) -> SweepResult<Record> {
        self.schema
            .names()
            .zip(self.batch.columns())
            .map(|(name, column)| Ok((name.to_string(), Scalar::from_array(column.as_ref(), row)?)))
            .collect()
    }
}

/// Entry point for writing and reading sweep tables and dictionaries.
#[derive(Debug, Clone, Default)]
pub struct SweepStore {
    options: SweepOptions,
}

impl SweepStore {
    /// Store using `options`.
    pub fn new(options: SweepOptions) -> Self {
        Self { options }
    }

    /// Active options.
    pub fn options(&self) -> &SweepOptions {
        &self.options
    }

    /// Create the table `key` and write its first rows.
    ///
    /// Fails with [`SweepError::KeyExists`] when the key is already present.
    pub fn save<S, T>(
        &self,
        container_path: impl AsRef<Path>,
        data: &DataBlock,
        data_column_names: &[S],
        index_arrays: &[IndexArray],
        index_names: &[T],
        key: &str,
    ) -> SweepResult<WriteReport>
    where
        S: AsRef<str>,
        T: AsRef<str>,
    {
        self.write_table(
            container_path.as_ref(),
            data,
            data_column_names,
            index_arrays,
            index_names,
            key,
            WriteMode::Create,
        )
    }

    /// Append rows after every existing row of table `key`.
    ///
    /// The table must exist with identical index and data columns. Repeated
    /// index tuples are stored again as new rows.
    pub fn append<S, T>(
        &self,
        container_path: impl AsRef<Path>,
        data: &DataBlock,
        data_column_names: &[S],
        index_arrays: &[IndexArray],
        index_names: &[T],
        key: &str,
    ) -> SweepResult<WriteReport>
    where
        S: AsRef<str>,
        T: AsRef<str>,
    {
        self.write_table(
            container_path.as_ref(),
            data,
            data_column_names,
            index_arrays,
            index_names,
            key,
            WriteMode::Append,
        )
    }

    /// Create table `key` on first use, append afterwards.
    pub fn extend<S, T>(
        &self,
        container_path: impl AsRef<Path>,
        data: &DataBlock,
        data_column_names: &[S],
        index_arrays: &[IndexArray],
        index_names: &[T],
        key: &str,
    ) -> SweepResult<WriteReport>
    where
        S: AsRef<str>,
        T: AsRef<str>,
    {
        self.write_table(
            container_path.as_ref(),
            data,
            data_column_names,
            index_arrays,
            index_names,
            key,
            WriteMode::CreateOrAppend,
        )
    }

    /// Create dictionary `key` holding `record` as its first row.
    pub fn save_dict(
        &self,
        container_path: impl AsRef<Path>,
        record: &Record,
        key: &str,
    ) -> SweepResult<WriteReport> {
        self.write_record(container_path.as_ref(), record, key, WriteMode::Create)
    }

    /// Add `record` as a new row of dictionary `key`.
    ///
    /// The record must have exactly the stored key set with the stored types;
    /// field order does not matter.
    pub fn append_dict(
        &self,
        container_path: impl AsRef<Path>,
        record: &Record,
        key: &str,
    ) -> SweepResult<WriteReport> {
        self.write_record(container_path.as_ref(), record, key, WriteMode::Append)
    }

    /// Create dictionary `key` on first use, append afterwards.
    pub fn save_or_append_dict(
        &self,
        container_path: impl AsRef<Path>,
        record: &Record,
        key: &str,
    ) -> SweepResult<WriteReport> {
        self.write_record(
            container_path.as_ref(),
            record,
            key,
            WriteMode::CreateOrAppend,
        )
    }

    /// Keys present in the container, in first-write order.
    ///
    /// A missing file has no keys.
    pub fn keys(&self, container_path: impl AsRef<Path>) -> SweepResult<Vec<String>> {
        Ok(file::layout(container_path.as_ref())?.keys())
    }

    /// Load every row of table `key`.
    pub fn read_table(
        &self,
        container_path: impl AsRef<Path>,
        key: &str,
    ) -> SweepResult<SweepTable> {
        let scan = file::scan(container_path.as_ref())?;
        let entry = lookup(&scan, key, FrameKind::Table)?;
        Ok(SweepTable {
            key: key.to_string(),
            schema: SweepSchema::from_arrow(&entry.schema)?,
            batch: entry.concat()?,
        })
    }

    /// Load every row of dictionary `key`.
    pub fn read_dict(
        &self,
        container_path: impl AsRef<Path>,
        key: &str,
    ) -> SweepResult<RecordTable> {
        let scan = file::scan(container_path.as_ref())?;
        let entry = lookup(&scan, key, FrameKind::Record)?;
        Ok(RecordTable {
            key: key.to_string(),
            schema: RecordSchema::from_arrow(&entry.schema),
            batch: entry.concat()?,
        })
    }

    /// Write table `key` to a standalone Parquet file, returning the row count.
    pub fn export_parquet(
        &self,
        container_path: impl AsRef<Path>,
        key: &str,
        out_path: impl AsRef<Path>,
    ) -> SweepResult<usize> {
        let table = self.read_table(container_path, key)?;
        let out_path = out_path.as_ref();
        let file = File::create(out_path).map_err(io_err("create parquet file", out_path))?;
        let mut writer = ArrowWriter::try_new(
            file,
            table.batch().schema(),
            self.options.parquet_writer_properties.clone(),
        )?;
        writer.write(table.batch())?;
        writer.close()?;

        sweep_log!(
            Level::Info,
            "parquet_exported",
            "key={} rows={} path={}",
            key,
            table.num_rows(),
            out_path.display()
        );
        Ok(table.num_rows())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_table<S, T>(
        &self,
        path: &Path,
        data: &DataBlock,
        data_column_names: &[S],
        index_arrays: &[IndexArray],
        index_names: &[T],
        key: &str,
        mode: WriteMode,
    ) -> SweepResult<WriteReport>
    where
        S: AsRef<str>,
        T: AsRef<str>,
    {
        ensure_key(key)?;
        let index = expand(index_arrays, index_names)?;
        if data.cols() != data_column_names.len() {
            return Err(SweepError::Schema(format!(
                "data block has {} columns but {} data column names were given",
                data.cols(),
                data_column_names.len()
            )));
        }
        if data.rows() != index.len() {
            return Err(SweepError::Shape(format!(
                "data block has {} rows but the expanded index has {}",
                data.rows(),
                index.len()
            )));
        }
        let schema = SweepSchema::new(&index, data_column_names)?;

        let layout = file::layout(path)?;
        let existing_rows = match existing(&layout, key, mode)? {
            Some(entry) => {
                ensure_kind(key, entry.kind, FrameKind::Table)?;
                schema.ensure_matches(&SweepSchema::from_arrow(&entry.schema)?, key)?;
                entry.num_rows
            }
            None => 0,
        };

        let mut columns = index.columns().to_vec();
        columns.extend(data.column_arrays());
        let batch = build_batch(schema.to_arrow(), columns, index.len())?;
        let file_len = file::append_frame(
            path,
            layout.tail(),
            FrameKind::Table,
            key,
            &batch,
            self.options.sync_on_write,
        )?;

        Ok(WriteReport {
            key: key.to_string(),
            rows_written: batch.num_rows(),
            total_rows: existing_rows + batch.num_rows(),
            file_len,
        })
    }

    fn write_record(
        &self,
        path: &Path,
        record: &Record,
        key: &str,
        mode: WriteMode,
    ) -> SweepResult<WriteReport> {
        ensure_key(key)?;
        let incoming = RecordSchema::from_record(record)?;

        let layout = file::layout(path)?;
        let (schema, existing_rows) = match existing(&layout, key, mode)? {
            Some(entry) => {
                ensure_kind(key, entry.kind, FrameKind::Record)?;
                let stored = RecordSchema::from_arrow(&entry.schema);
                incoming.ensure_compatible(&stored, key)?;
                (stored, entry.num_rows)
            }
            None => (incoming, 0),
        };

        let columns = schema.align(record, key)?;
        let batch = build_batch(schema.to_arrow(), columns, 1)?;
        let file_len = file::append_frame(
            path,
            layout.tail(),
            FrameKind::Record,
            key,
            &batch,
            self.options.sync_on_write,
        )?;

        Ok(WriteReport {
            key: key.to_string(),
            rows_written: 1,
            total_rows: existing_rows + 1,
            file_len,
        })
    }
}

fn ensure_key(key: &str) -> SweepResult<()> {
    if key.is_empty() {
        return Err(SweepError::Schema("key must not be empty".to_string()));
    }
    Ok(())
}

/// The stored entry for `key`, checked against what `mode` allows.
fn existing<'a>(
    layout: &'a ContainerLayout,
    key: &str,
    mode: WriteMode,
) -> SweepResult<Option<&'a EntrySummary>> {
    match (layout.get(key), mode) {
        (Some(_), WriteMode::Create) => Err(SweepError::KeyExists {
            key: key.to_string(),
        }),
        (None, WriteMode::Append) => Err(SweepError::KeyNotFound {
            key: key.to_string(),
            available: layout.keys(),
        }),
        (entry, _) => Ok(entry),
    }
}

fn lookup<'a>(scan: &'a ContainerScan, key: &str, kind: FrameKind) -> SweepResult<&'a Entry> {
    let entry = scan.get(key).ok_or_else(|| SweepError::KeyNotFound {
        key: key.to_string(),
        available: scan.keys(),
    })?;
    ensure_kind(key, entry.kind, kind)?;
    Ok(entry)
}

fn ensure_kind(key: &str, stored: FrameKind, expected: FrameKind) -> SweepResult<()> {
    if stored != expected {
        return Err(SweepError::mismatch(
            key,
            format!(
                "stored as a {}, not a {}",
                stored.name(),
                expected.name()
            ),
        ));
    }
    Ok(())
}

fn build_batch(schema: SchemaRef, columns: Vec<ArrayRef>, rows: usize) -> SweepResult<RecordBatch> {
    let options = RecordBatchOptions::new().with_row_count(Some(rows));
    Ok(RecordBatch::try_new_with_options(schema, columns, &options)?)
}
