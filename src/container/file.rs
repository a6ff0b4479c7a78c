//! Reading and writing whole container files.

use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{self, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use arrow::{compute::concat_batches, datatypes::SchemaRef, record_batch::RecordBatch};
use log::Level;

use super::{
    codec::{decode_payload, encode_payload, summarize_payload, PayloadSummary},
    frame::{encode_frame, FrameFault, FrameHeader, FrameKind, INITIAL_FRAME_SEQ},
};
use crate::{
    error::{io_err, SweepError, SweepResult},
    logging::sweep_log,
};

/// All frames stored under one key, in frame order.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) kind: FrameKind,
    pub(crate) schema: SchemaRef,
    pub(crate) batches: Vec<RecordBatch>,
}

impl Entry {
    pub(crate) fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Concatenate every frame into one batch.
    pub(crate) fn concat(&self) -> SweepResult<RecordBatch> {
        Ok(concat_batches(&self.schema, &self.batches)?)
    }
}

/// Kind, schema and total row count of one key, without its rows.
#[derive(Debug, Clone)]
pub(crate) struct EntrySummary {
    pub(crate) kind: FrameKind,
    pub(crate) schema: SchemaRef,
    pub(crate) num_rows: usize,
}

/// Where the readable frames of a container end.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Tail {
    file_len: u64,
    valid_len: u64,
    last_seq: u64,
}

impl Tail {
    /// True when trailing bytes after the last complete frame were found.
    pub(crate) fn torn(&self) -> bool {
        self.valid_len < self.file_len
    }

    pub(crate) fn valid_len(&self) -> u64 {
        self.valid_len
    }

    fn next_seq(&self) -> u64 {
        if self.last_seq == 0 {
            INITIAL_FRAME_SEQ
        } else {
            self.last_seq + 1
        }
    }
}

/// Decoded view of a container file.
#[derive(Debug, Default)]
pub(crate) struct ContainerScan {
    entries: Vec<(String, Entry)>,
    positions: HashMap<String, usize>,
    tail: Tail,
}

impl ContainerScan {
    /// Keys in first-write order.
    pub(crate) fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    pub(crate) fn get(&self, key: &str) -> Option<&Entry> {
        self.positions.get(key).map(|&idx| &self.entries[idx].1)
    }

    pub(crate) fn into_entries(self) -> Vec<(String, Entry)> {
        self.entries
    }

    pub(crate) fn tail(&self) -> &Tail {
        &self.tail
    }

    fn push(&mut self, key: String, kind: FrameKind, batch: RecordBatch) -> SweepResult<()> {
        if let Some(&idx) = self.positions.get(&key) {
            let entry = &mut self.entries[idx].1;
            ensure_continues(&key, entry.kind, &entry.schema, kind, &batch.schema())?;
            entry.batches.push(batch);
        } else {
            self.positions.insert(key.clone(), self.entries.len());
            self.entries.push((
                key,
                Entry {
                    kind,
                    schema: batch.schema(),
                    batches: vec![batch],
                },
            ));
        }
        Ok(())
    }
}

/// Per-key summaries of a container, read from frame headers and IPC
/// message headers only. This is what the write path needs.
#[derive(Debug, Default)]
pub(crate) struct ContainerLayout {
    entries: Vec<(String, EntrySummary)>,
    positions: HashMap<String, usize>,
    tail: Tail,
}

impl ContainerLayout {
    /// Keys in first-write order.
    pub(crate) fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    pub(crate) fn get(&self, key: &str) -> Option<&EntrySummary> {
        self.positions.get(key).map(|&idx| &self.entries[idx].1)
    }

    pub(crate) fn tail(&self) -> &Tail {
        &self.tail
    }

    fn push(&mut self, kind: FrameKind, summary: PayloadSummary) -> SweepResult<()> {
        let PayloadSummary {
            key,
            schema,
            num_rows,
        } = summary;
        if let Some(&idx) = self.positions.get(&key) {
            let entry = &mut self.entries[idx].1;
            ensure_continues(&key, entry.kind, &entry.schema, kind, &schema)?;
            entry.num_rows += num_rows;
        } else {
            self.positions.insert(key.clone(), self.entries.len());
            self.entries.push((
                key,
                EntrySummary {
                    kind,
                    schema,
                    num_rows,
                },
            ));
        }
        Ok(())
    }
}

/// A later frame under an existing key must keep its kind and schema.
fn ensure_continues(
    key: &str,
    stored_kind: FrameKind,
    stored_schema: &SchemaRef,
    kind: FrameKind,
    schema: &SchemaRef,
) -> SweepResult<()> {
    if stored_kind != kind {
        return Err(SweepError::mismatch(
            key,
            format!(
                "stored as {} but a later frame holds a {}",
                stored_kind.name(),
                kind.name()
            ),
        ));
    }
    if schema != stored_schema {
        return Err(SweepError::mismatch(
            key,
            "frames under this key carry different column schemas",
        ));
    }
    Ok(())
}

fn read_container(path: &Path) -> SweepResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err("read container", path)(err)),
    }
}

/// Decode the container at `path`. A missing file is an empty container.
pub(crate) fn scan(path: &Path) -> SweepResult<ContainerScan> {
    match read_container(path)? {
        Some(data) => scan_bytes(&data, path),
        None => Ok(ContainerScan::default()),
    }
}

/// Decode frames from `data`, stopping at a torn trailing frame.
pub(crate) fn scan_bytes(data: &[u8], path: &Path) -> SweepResult<ContainerScan> {
    let mut scan = ContainerScan::default();
    let tail = walk(data, path, |kind, payload| {
        let (key, batch) = decode_payload(payload)?;
        scan.push(key, kind, batch)
    })?;
    scan.tail = tail;
    Ok(scan)
}

/// Summarize the container at `path` without decoding any column data.
/// A missing file is an empty container.
pub(crate) fn layout(path: &Path) -> SweepResult<ContainerLayout> {
    match read_container(path)? {
        Some(data) => layout_bytes(&data, path),
        None => Ok(ContainerLayout::default()),
    }
}

fn layout_bytes(data: &[u8], path: &Path) -> SweepResult<ContainerLayout> {
    let mut layout = ContainerLayout::default();
    let tail = walk(data, path, |kind, payload| {
        layout.push(kind, summarize_payload(payload)?)
    })?;
    layout.tail = tail;
    Ok(layout)
}

/// Visit every complete frame in `data`, stopping at a torn trailing frame.
///
/// Only the final frame may be incomplete; an undecodable frame followed by
/// more bytes means the file is corrupt.
fn walk<F>(data: &[u8], path: &Path, mut visit: F) -> SweepResult<Tail>
where
    F: FnMut(FrameKind, &[u8]) -> SweepResult<()>,
{
    let mut tail = Tail {
        file_len: data.len() as u64,
        ..Tail::default()
    };

    let mut offset = 0usize;
    while offset < data.len() {
        let slice = &data[offset..];
        match FrameHeader::decode_from(slice) {
            Ok((header, payload, rest)) => {
                if header.seq <= tail.last_seq {
                    return Err(SweepError::Corrupt(format!(
                        "frame sequence {} does not follow {} at offset {offset} in {}",
                        header.seq,
                        tail.last_seq,
                        path.display()
                    )));
                }
                visit(header.kind, payload)?;
                tail.last_seq = header.seq;
                offset = data.len() - rest.len();
            }
            Err(FrameFault::HeaderTruncated) | Err(FrameFault::PayloadTruncated) => break,
            Err(FrameFault::ChecksumMismatch { frame_len }) if offset + frame_len == data.len() => {
                break
            }
            Err(fault) => {
                return Err(SweepError::Corrupt(format!(
                    "{} at offset {offset} in {}",
                    fault.describe(),
                    path.display()
                )));
            }
        }
    }
    tail.valid_len = offset as u64;

    if tail.torn() {
        sweep_log!(
            Level::Warn,
            "container_torn_tail",
            "path={} valid_len={} file_len={}",
            path.display(),
            tail.valid_len,
            tail.file_len
        );
    }
    Ok(tail)
}

/// Append one frame holding `batch` under `key`, returning the new file length.
///
/// `tail` must describe the current file contents. A torn tail is cut off
/// before the frame is written so the new frame stays reachable.
pub(crate) fn append_frame(
    path: &Path,
    tail: &Tail,
    kind: FrameKind,
    key: &str,
    batch: &RecordBatch,
    sync: bool,
) -> SweepResult<u64> {
    let payload = encode_payload(key, batch)?;
    let frame = encode_frame(kind, tail.next_seq(), &payload)?;

    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(io_err("open container", path))?;

    if tail.torn() {
        file.set_len(tail.valid_len())
            .map_err(io_err("truncate torn tail of", path))?;
        sweep_log!(
            Level::Warn,
            "container_tail_repaired",
            "path={} truncated_to={}",
            path.display(),
            tail.valid_len()
        );
    }
    file.seek(SeekFrom::Start(tail.valid_len()))
        .map_err(io_err("seek container", path))?;
    write_and_flush(&mut file, &frame, sync, path)?;

    let new_len = tail.valid_len() + frame.len() as u64;
    sweep_log!(
        Level::Debug,
        "frame_appended",
        "path={} key={} kind={:?} rows={} bytes={} file_len={}",
        path.display(),
        key,
        kind,
        batch.num_rows(),
        frame.len(),
        new_len
    );
    Ok(new_len)
}

/// Write a fresh container holding one frame per `(key, kind, batch)`.
///
/// The file is staged next to `path` and renamed into place, so `path` either
/// holds every frame or does not exist. Fails if `path` already exists.
pub(crate) fn write_new(
    path: &Path,
    frames: &[(String, FrameKind, RecordBatch)],
    sync: bool,
) -> SweepResult<u64> {
    if fs::symlink_metadata(path).is_ok() {
        return Err(SweepError::Io {
            context: format!("create container {}", path.display()),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "output file already exists"),
        });
    }

    let staging = staging_path(path);
    let mut bytes = Vec::new();
    for (seq, (key, kind, batch)) in (INITIAL_FRAME_SEQ..).zip(frames) {
        let payload = encode_payload(key, batch)?;
        bytes.extend_from_slice(&encode_frame(*kind, seq, &payload)?);
    }

    let mut file = File::create(&staging).map_err(io_err("create staging file", &staging))?;
    if let Err(err) = write_and_flush(&mut file, &bytes, sync, &staging) {
        drop(file);
        let _ = fs::remove_file(&staging);
        return Err(err);
    }
    drop(file);
    fs::rename(&staging, path).map_err(io_err("move staged container to", path))?;
    Ok(bytes.len() as u64)
}

fn write_and_flush(file: &mut File, bytes: &[u8], sync: bool, path: &Path) -> SweepResult<()> {
    file.write_all(bytes)
        .map_err(io_err("write container", path))?;
    file.flush().map_err(io_err("flush container", path))?;
    if sync {
        file.sync_data().map_err(io_err("sync container", path))?;
    }
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::{
        array::{Float64Array, Int64Array},
        datatypes::{DataType, Field, Schema},
    };
    use tempfile::TempDir;

    use super::*;

    fn batch(values: &[i64]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, false)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values.to_vec()))])
            .expect("batch")
    }

    fn float_batch(values: &[f64]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Float64, false)]));
        RecordBatch::try_new(schema, vec![Arc::new(Float64Array::from(values.to_vec()))])
            .expect("batch")
    }

    fn append(path: &Path, kind: FrameKind, key: &str, batch: &RecordBatch) -> SweepResult<u64> {
        let current = layout(path)?;
        append_frame(path, current.tail(), kind, key, batch, false)
    }

    #[test]
    fn missing_file_scans_as_empty() {
        let dir = TempDir::new().unwrap();
        let scan = scan(&dir.path().join("absent.swp")).unwrap();
        assert!(scan.keys().is_empty());
        assert!(!scan.tail().torn());
    }

    #[test]
    fn frames_group_by_key_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.swp");
        append(&path, FrameKind::Record, "settings", &batch(&[1])).unwrap();
        append(&path, FrameKind::Table, "sweep", &float_batch(&[0.5, 0.25])).unwrap();
        let len = append(&path, FrameKind::Record, "settings", &batch(&[2])).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), len);

        let scan = scan(&path).unwrap();
        assert_eq!(scan.keys(), vec!["settings".to_string(), "sweep".to_string()]);
        let settings = scan.get("settings").unwrap();
        assert_eq!(settings.num_rows(), 2);
        assert_eq!(settings.concat().unwrap(), batch(&[1, 2]));
        assert_eq!(scan.get("sweep").unwrap().kind, FrameKind::Table);
    }

    #[test]
    fn torn_tail_is_ignored_then_repaired() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.swp");
        let first_len = append(&path, FrameKind::Record, "k", &batch(&[1])).unwrap();
        let full_len = append(&path, FrameKind::Record, "k", &batch(&[2])).unwrap();

        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full_len - 3).unwrap();
        drop(file);

        let torn = scan(&path).unwrap();
        assert!(torn.tail().torn());
        assert_eq!(torn.tail().valid_len(), first_len);
        assert_eq!(torn.get("k").unwrap().num_rows(), 1);

        let summary = layout(&path).unwrap();
        assert!(summary.tail().torn());
        assert_eq!(summary.tail().valid_len(), first_len);
        assert_eq!(summary.get("k").unwrap().num_rows, 1);

        append(&path, FrameKind::Record, "k", &batch(&[3])).unwrap();
        let repaired = scan(&path).unwrap();
        assert!(!repaired.tail().torn());
        assert_eq!(repaired.get("k").unwrap().concat().unwrap(), batch(&[1, 3]));
    }

    #[test]
    fn layout_agrees_with_full_scan() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.swp");
        append(&path, FrameKind::Record, "settings", &batch(&[1])).unwrap();
        append(&path, FrameKind::Table, "sweep", &float_batch(&[])).unwrap();
        append(&path, FrameKind::Table, "sweep", &float_batch(&[0.5, 0.25, 0.125])).unwrap();
        append(&path, FrameKind::Record, "settings", &batch(&[2])).unwrap();

        let full = scan(&path).unwrap();
        let summary = layout(&path).unwrap();
        assert_eq!(summary.keys(), full.keys());
        for key in full.keys() {
            let entry = full.get(&key).unwrap();
            let brief = summary.get(&key).unwrap();
            assert_eq!(brief.kind, entry.kind);
            assert_eq!(brief.schema, entry.schema);
            assert_eq!(brief.num_rows, entry.num_rows());
        }
        assert_eq!(summary.get("sweep").unwrap().num_rows, 3);
        assert_eq!(summary.tail().valid_len(), fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn corruption_before_the_tail_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.swp");
        append(&path, FrameKind::Record, "k", &batch(&[1])).unwrap();
        append(&path, FrameKind::Record, "k", &batch(&[2])).unwrap();

        let mut data = fs::read(&path).unwrap();
        data[super::super::frame::FRAME_HEADER_SIZE + 1] ^= 0xFF;
        let err = scan_bytes(&data, &path).expect_err("corrupt");
        assert!(matches!(err, SweepError::Corrupt(msg) if msg.contains("crc32")));
    }

    #[test]
    fn key_bound_to_one_kind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.swp");
        append(&path, FrameKind::Record, "k", &batch(&[1])).unwrap();
        append(&path, FrameKind::Table, "k", &batch(&[2])).unwrap();
        let err = scan(&path).expect_err("mixed kinds");
        assert!(matches!(err, SweepError::SchemaMismatch { key, .. } if key == "k"));
        let err = layout(&path).expect_err("mixed kinds");
        assert!(matches!(err, SweepError::SchemaMismatch { key, .. } if key == "k"));
    }

    #[test]
    fn write_new_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("merged.swp");
        let frames = vec![("k".to_string(), FrameKind::Record, batch(&[1, 2]))];
        write_new(&path, &frames, false).unwrap();
        assert!(!staging_path(&path).exists());
        assert_eq!(scan(&path).unwrap().get("k").unwrap().num_rows(), 2);

        let err = write_new(&path, &frames, false).expect_err("exists");
        assert!(
            matches!(err, SweepError::Io { source, .. } if source.kind() == io::ErrorKind::AlreadyExists)
        );
    }
}
