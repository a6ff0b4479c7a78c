//! Merge a chunk series back into a single container.
//!
//! Chunks are read in chunk-index order and every key is concatenated across
//! the chunks that hold it. The result is written once, through a staging
//! file, so a failed merge never leaves a partial output behind.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use arrow::{
    array::ArrayRef,
    compute::concat_batches,
    datatypes::{Schema, SchemaRef},
    record_batch::RecordBatch,
};
use log::Level;

use crate::{
    chunk::{list_chunks, ChunkDescriptor, ChunkSeries, CHUNK_EXTENSION},
    container::{file, FrameKind},
    error::{io_err, SweepError, SweepResult},
    logging::sweep_log,
    option::SweepOptions,
    schema::{RecordSchema, SweepSchema},
};

const CONSOLIDATED_SUFFIX: &str = "_consolidated";

/// Output path for a merged series: `<dir>/<dir name>_consolidated.swp`.
pub fn consolidated_path(series_dir: &Path) -> PathBuf {
    let stem = series_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "series".to_string());
    series_dir.join(format!("{stem}{CONSOLIDATED_SUFFIX}.{CHUNK_EXTENSION}"))
}

/// Summary of a finished merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidationReport {
    /// Source chunks in merge order.
    pub chunks: Vec<PathBuf>,
    /// Every merged key with its total row count, in first-seen order.
    pub keys: Vec<(String, usize)>,
    /// Merged container.
    pub output: PathBuf,
    /// Size of the merged container.
    pub bytes: u64,
    /// Whether the source chunks were deleted afterwards.
    pub chunks_removed: bool,
}

struct Merged {
    kind: FrameKind,
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

/// Merges chunk directories.
#[derive(Debug, Clone, Default)]
pub struct Consolidator {
    options: SweepOptions,
}

impl Consolidator {
    /// Consolidator writing with `options`.
    pub fn new(options: SweepOptions) -> Self {
        Self { options }
    }

    /// Merge every chunk in `chunk_directory` into a new file at `output_path`.
    ///
    /// Fails with [`SweepError::SchemaMismatch`] when a key's columns differ
    /// between chunks, and with [`SweepError::Io`] when `output_path` already
    /// exists. Chunk files are left in place.
    pub fn consolidate(
        &self,
        chunk_directory: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
    ) -> SweepResult<ConsolidationReport> {
        let chunk_directory = chunk_directory.as_ref();
        let output_path = output_path.as_ref();
        let chunks = list_chunks(chunk_directory)?;
        ensure_single_series(&chunks, chunk_directory)?;

        sweep_log!(
            Level::Info,
            "consolidate_start",
            "dir={} chunks={} output={}",
            chunk_directory.display(),
            chunks.len(),
            output_path.display()
        );

        let mut order: Vec<String> = Vec::new();
        let mut merged: HashMap<String, Merged> = HashMap::new();
        for chunk in &chunks {
            let scan = file::scan(&chunk.path)?;
            for (key, entry) in scan.into_entries() {
                match merged.get_mut(&key) {
                    Some(target) => {
                        ensure_same_kind(&key, target.kind, entry.kind, &chunk.path)?;
                        for batch in entry.batches {
                            let batch = conform(&key, target, batch, &chunk.path)?;
                            target.batches.push(batch);
                        }
                    }
                    None => {
                        order.push(key.clone());
                        merged.insert(
                            key,
                            Merged {
                                kind: entry.kind,
                                schema: entry.schema,
                                batches: entry.batches,
                            },
                        );
                    }
                }
            }
        }

        let mut frames = Vec::with_capacity(order.len());
        let mut keys = Vec::with_capacity(order.len());
        for key in order {
            let Some(entry) = merged.remove(&key) else {
                continue;
            };
            let batch = concat_batches(&entry.schema, &entry.batches)?;
            keys.push((key.clone(), batch.num_rows()));
            frames.push((key, entry.kind, batch));
        }
        let bytes = file::write_new(output_path, &frames, self.options.sync_on_write)?;

        sweep_log!(
            Level::Info,
            "consolidate_finish",
            "output={} keys={} bytes={}",
            output_path.display(),
            keys.len(),
            bytes
        );
        Ok(ConsolidationReport {
            chunks: chunks.into_iter().map(|chunk| chunk.path).collect(),
            keys,
            output: output_path.to_path_buf(),
            bytes,
            chunks_removed: false,
        })
    }

    /// Merge `series` into [`consolidated_path`] of its directory.
    ///
    /// Source chunks are deleted afterwards when
    /// [`SweepOptions::remove_chunks_after_consolidate`] is set.
    pub fn consolidate_series(&self, series: ChunkSeries) -> SweepResult<ConsolidationReport> {
        let output = consolidated_path(series.dir());
        let mut report = self.consolidate(series.dir(), &output)?;
        if self.options.remove_chunks_after_consolidate {
            for chunk in &report.chunks {
                fs::remove_file(chunk).map_err(io_err("remove consolidated chunk", chunk))?;
            }
            report.chunks_removed = true;
            sweep_log!(
                Level::Info,
                "chunks_removed",
                "series={} count={}",
                series.name(),
                report.chunks.len()
            );
        }
        Ok(report)
    }
}

fn ensure_single_series(chunks: &[ChunkDescriptor], dir: &Path) -> SweepResult<()> {
    if let Some(first) = chunks.first() {
        if let Some(other) = chunks.iter().find(|c| c.series != first.series) {
            return Err(SweepError::Schema(format!(
                "{} holds chunks of both `{}` and `{}`",
                dir.display(),
                first.series,
                other.series
            )));
        }
    }
    Ok(())
}

fn ensure_same_kind(key: &str, stored: FrameKind, found: FrameKind, chunk: &Path) -> SweepResult<()> {
    if stored != found {
        return Err(SweepError::mismatch(
            key,
            format!(
                "{} holds a {} but earlier chunks hold a {}",
                chunk.display(),
                found.name(),
                stored.name()
            ),
        ));
    }
    Ok(())
}

/// Bring `batch` onto the merged schema of `target`.
///
/// Tables must match column for column. Dictionary rows may list the same
/// keys in another order and are reordered to the first chunk's layout.
fn conform(key: &str, target: &Merged, batch: RecordBatch, chunk: &Path) -> SweepResult<RecordBatch> {
    if batch.schema() == target.schema {
        return Ok(batch);
    }
    let in_chunk = |err: SweepError| match err {
        SweepError::SchemaMismatch { key, reason } => SweepError::SchemaMismatch {
            key,
            reason: format!("{reason} (in {})", chunk.display()),
        },
        other => other,
    };

    match target.kind {
        FrameKind::Table => {
            let stored = SweepSchema::from_arrow(&target.schema)?;
            let found = SweepSchema::from_arrow(&batch.schema())?;
            found.ensure_matches(&stored, key).map_err(in_chunk)?;
            // Same columns, differing only in schema-level metadata.
            Ok(RecordBatch::try_new(
                target.schema.clone(),
                batch.columns().to_vec(),
            )?)
        }
        FrameKind::Record => {
            let stored = RecordSchema::from_arrow(&target.schema);
            RecordSchema::from_arrow(&batch.schema())
                .ensure_compatible(&stored, key)
                .map_err(in_chunk)?;
            let columns = project(&target.schema, &batch)?;
            Ok(RecordBatch::try_new(target.schema.clone(), columns)?)
        }
    }
}

fn project(schema: &Schema, batch: &RecordBatch) -> SweepResult<Vec<ArrayRef>> {
    schema
        .fields()
        .iter()
        .map(|field| {
            batch
                .column_by_name(field.name())
                .map(Arc::clone)
                .ok_or_else(|| {
                    SweepError::Corrupt(format!("column `{}` vanished during merge", field.name()))
                })
        })
        .collect()
}
