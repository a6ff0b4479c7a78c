//! Size-bounded chunk files for one measurement.
//!
//! A series owns one working directory. Chunks are named
//! `<series>_chunk<NNNNNN>.swp`, so directory order is append order, and a
//! `SERIES.json` state file records the series identity, the next chunk
//! number, and which chunk is active. Numbers are never handed out twice,
//! even when a chunk file is deleted later, and a sealed chunk is never
//! handed out as a write target again, not even after a restart.
//!
//! Rollover is checked by the caller before each write. The size seen by
//! [`ChunkSeries::check_and_roll`] is the on-disk length of data already
//! written, so a chunk may end up larger than the threshold by at most the
//! one write that followed the last check.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::Level;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{
    error::{io_err, SweepError, SweepResult},
    logging::sweep_log,
    option::SweepOptions,
    store::{SweepStore, WriteReport},
    value::{DataBlock, IndexArray, Record},
};

/// File extension shared by chunk and consolidated container files.
pub const CHUNK_EXTENSION: &str = "swp";

/// Name of the per-series state file.
pub const SERIES_STATE_FILE: &str = "SERIES.json";

const CHUNK_INDEX_WIDTH: usize = 6;

static CHUNK_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<series>.+)_chunk(?P<index>\d+)\.swp$")
        .expect("chunk name pattern is valid")
});

/// File name of chunk `index` in `series`.
pub fn chunk_file_name(series: &str, index: u64) -> String {
    format!(
        "{series}_chunk{index:0width$}.{CHUNK_EXTENSION}",
        width = CHUNK_INDEX_WIDTH
    )
}

/// Split a chunk file name into its series name and chunk index.
pub fn parse_chunk_file_name(name: &str) -> Option<(&str, u64)> {
    let caps = CHUNK_NAME.captures(name)?;
    let series = caps.name("series")?.as_str();
    let index = caps.name("index")?.as_str().parse().ok()?;
    Some((series, index))
}

/// One chunk file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// Series the chunk belongs to.
    pub series: String,
    /// Chunk number embedded in the file name.
    pub index: u64,
    /// Path to the chunk file.
    pub path: PathBuf,
    /// Size on disk when listed.
    pub bytes: u64,
}

/// Chunk files in `dir`, ordered by embedded chunk index.
///
/// Files whose names do not follow the chunk pattern are ignored.
pub fn list_chunks(dir: &Path) -> SweepResult<Vec<ChunkDescriptor>> {
    let mut chunks = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err("list chunk directory", dir))? {
        let entry = entry.map_err(io_err("read entry of", dir))?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some((series, index)) = parse_chunk_file_name(name) else {
            continue;
        };
        let path = entry.path();
        let meta = entry.metadata().map_err(io_err("stat chunk", &path))?;
        if !meta.is_file() {
            continue;
        }
        chunks.push(ChunkDescriptor {
            series: series.to_string(),
            index,
            path,
            bytes: meta.len(),
        });
    }
    chunks.sort_by_key(|chunk| chunk.index);
    Ok(chunks)
}

/// Persisted series state, kept in [`SERIES_STATE_FILE`].
///
/// Only `active_chunk` may ever be written to again; every other chunk below
/// `next_chunk` is sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SeriesState {
    name: String,
    id: Ulid,
    /// Next chunk number to hand out.
    next_chunk: u64,
    /// Chunks closed by a roll, in allocation order.
    #[serde(default)]
    sealed_chunks: Vec<u64>,
    /// Chunk currently receiving writes.
    #[serde(default)]
    active_chunk: Option<u64>,
}

impl SeriesState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            id: Ulid::new(),
            next_chunk: 0,
            sealed_chunks: Vec::new(),
            active_chunk: None,
        }
    }

    fn read(dir: &Path) -> SweepResult<Self> {
        let path = dir.join(SERIES_STATE_FILE);
        let bytes = fs::read(&path).map_err(io_err("read series state", &path))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Replace the state file atomically.
    fn write(&self, dir: &Path) -> SweepResult<()> {
        let body = serde_json::to_vec_pretty(self)?;
        let path = dir.join(SERIES_STATE_FILE);
        let staging = dir.join(format!("{SERIES_STATE_FILE}.partial"));
        let mut file =
            fs::File::create(&staging).map_err(io_err("create series state", &staging))?;
        file.write_all(&body)
            .map_err(io_err("write series state", &staging))?;
        file.sync_all()
            .map_err(io_err("sync series state", &staging))?;
        drop(file);
        fs::rename(&staging, &path).map_err(io_err("replace series state", &path))
    }

    /// Seal the active chunk, if any, and make `index` active.
    fn activate(&mut self, index: u64) {
        if let Some(previous) = self.active_chunk.take() {
            self.sealed_chunks.push(previous);
        }
        self.active_chunk = Some(index);
        self.next_chunk = index + 1;
    }
}

/// Allocates chunk series.
#[derive(Debug, Clone, Default)]
pub struct ChunkManager {
    options: SweepOptions,
}

impl ChunkManager {
    /// Manager handing `options` to every series it creates.
    pub fn new(options: SweepOptions) -> Self {
        Self { options }
    }

    /// Allocate `working_directory/series_name` for a fresh series.
    ///
    /// Fails with [`SweepError::Io`] if the name is not a plain file name,
    /// the directory cannot be created, or it already holds a series state
    /// file or chunk files.
    pub fn create_chunk_series(
        &self,
        series_name: &str,
        working_directory: impl AsRef<Path>,
    ) -> SweepResult<ChunkSeries> {
        validate_series_name(series_name)?;
        let dir = working_directory.as_ref().join(series_name);
        fs::create_dir_all(&dir).map_err(io_err("create series directory", &dir))?;

        if dir.join(SERIES_STATE_FILE).exists() || !list_chunks(&dir)?.is_empty() {
            return Err(SweepError::Io {
                context: format!("create series directory {}", dir.display()),
                source: io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "directory already holds a chunk series",
                ),
            });
        }

        let state = SeriesState::new(series_name);
        state.write(&dir)?;
        sweep_log!(
            Level::Info,
            "series_created",
            "series={} id={} dir={}",
            state.name,
            state.id,
            dir.display()
        );

        Ok(ChunkSeries {
            state,
            dir,
            options: self.options.clone(),
        })
    }

    /// Resume the series stored in `series_dir`.
    ///
    /// Writes continue in the chunk that was active when the series was last
    /// used, provided its file still exists. Otherwise the next write
    /// allocates a fresh chunk after the persisted high-water mark.
    pub fn open_chunk_series(&self, series_dir: impl AsRef<Path>) -> SweepResult<ChunkSeries> {
        let dir = series_dir.as_ref().to_path_buf();
        let mut state = SeriesState::read(&dir)?;
        let chunks = list_chunks(&dir)?;
        if let Some(stranger) = chunks.iter().find(|c| c.series != state.name) {
            return Err(SweepError::Corrupt(format!(
                "chunk {} does not belong to series {}",
                stranger.path.display(),
                state.name
            )));
        }

        // A chunk created just before a crash may be missing from the state.
        if let Some(last) = chunks.last() {
            state.next_chunk = state.next_chunk.max(last.index + 1);
        }
        if let Some(active) = state.active_chunk {
            if !chunks.iter().any(|c| c.index == active) {
                state.active_chunk = None;
                state.sealed_chunks.push(active);
            }
        }
        sweep_log!(
            Level::Info,
            "series_reopened",
            "series={} id={} chunks={} active={:?} next_chunk={}",
            state.name,
            state.id,
            chunks.len(),
            state.active_chunk,
            state.next_chunk
        );

        Ok(ChunkSeries {
            state,
            dir,
            options: self.options.clone(),
        })
    }
}

fn validate_series_name(name: &str) -> SweepResult<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.chars().any(char::is_control)
        && name != SERIES_STATE_FILE;
    if valid {
        Ok(())
    } else {
        Err(SweepError::Io {
            context: format!("create series {name:?}"),
            source: io::Error::new(io::ErrorKind::InvalidInput, "invalid series name"),
        })
    }
}

/// An open chunk series: one measurement written across numbered files.
#[derive(Debug)]
pub struct ChunkSeries {
    state: SeriesState,
    dir: PathBuf,
    options: SweepOptions,
}

impl ChunkSeries {
    /// Series name.
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Identity generated when the series was created.
    pub fn id(&self) -> Ulid {
        self.state.id
    }

    /// Working directory holding the chunks.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Options the series was opened with.
    pub fn options(&self) -> &SweepOptions {
        &self.options
    }

    /// Index of the current chunk, if one is active.
    pub fn current_index(&self) -> Option<u64> {
        self.state.active_chunk
    }

    /// Chunks closed by a roll; none of them is written to again.
    pub fn sealed_chunks(&self) -> &[u64] {
        &self.state.sealed_chunks
    }

    /// Path the next write should use, allocating a chunk if none is active.
    pub fn current_target(&mut self) -> SweepResult<PathBuf> {
        match self.state.active_chunk {
            Some(index) => Ok(self.chunk_path(index)),
            None => self.allocate(),
        }
    }

    /// Roll to a new chunk if the current one has reached `max_bytes`.
    ///
    /// Returns the path to write to next. The previous chunk is sealed when
    /// a roll happens and is never returned again.
    pub fn check_and_roll(&mut self, max_bytes: u64) -> SweepResult<PathBuf> {
        let Some(index) = self.state.active_chunk else {
            return self.allocate();
        };
        let path = self.chunk_path(index);
        let size = fs::metadata(&path)
            .map_err(io_err("stat current chunk", &path))?
            .len();
        if size < max_bytes {
            return Ok(path);
        }

        sweep_log!(
            Level::Info,
            "chunk_sealed",
            "series={} chunk={} bytes={} max_bytes={}",
            self.state.name,
            index,
            size,
            max_bytes
        );
        self.allocate()
    }

    /// Chunk files currently present, ordered by index.
    pub fn chunks(&self) -> SweepResult<Vec<ChunkDescriptor>> {
        Ok(list_chunks(&self.dir)?
            .into_iter()
            .filter(|chunk| chunk.series == self.state.name)
            .collect())
    }

    /// Roll if needed, then create-or-append table rows in the current chunk.
    pub fn extend<S, T>(
        &mut self,
        store: &SweepStore,
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
        let target = self.check_and_roll(self.options.max_chunk_bytes)?;
        store.extend(
            target,
            data,
            data_column_names,
            index_arrays,
            index_names,
            key,
        )
    }

    /// Roll if needed, then create-or-append a dictionary row in the current chunk.
    pub fn save_or_append_dict(
        &mut self,
        store: &SweepStore,
        record: &Record,
        key: &str,
    ) -> SweepResult<WriteReport> {
        let target = self.check_and_roll(self.options.max_chunk_bytes)?;
        store.save_or_append_dict(target, record, key)
    }

    fn chunk_path(&self, index: u64) -> PathBuf {
        self.dir.join(chunk_file_name(&self.state.name, index))
    }

    fn allocate(&mut self) -> SweepResult<PathBuf> {
        let index = self.state.next_chunk;
        let path = self.chunk_path(index);
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(io_err("allocate chunk", &path))?;

        let mut next = self.state.clone();
        next.activate(index);
        next.write(&self.dir)?;
        self.state = next;

        sweep_log!(
            Level::Info,
            "chunk_allocated",
            "series={} chunk={} path={}",
            self.state.name,
            index,
            path.display()
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn chunk_names_sort_numerically() {
        let names: Vec<_> = [0, 9, 10, 123]
            .iter()
            .map(|&i| chunk_file_name("run", i))
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert_eq!(names[2], "run_chunk000010.swp");
    }

    #[test]
    fn parse_chunk_file_name_extracts_parts() {
        assert_eq!(
            parse_chunk_file_name("cooldown_3_chunk000042.swp"),
            Some(("cooldown_3", 42))
        );
        assert_eq!(parse_chunk_file_name("run_consolidated.swp"), None);
        assert_eq!(parse_chunk_file_name("run_chunk000001.swp.partial"), None);
        assert_eq!(parse_chunk_file_name(SERIES_STATE_FILE), None);
    }

    #[test]
    fn state_json_round_trip() {
        let mut state = SeriesState::new("cooldown = 3");
        state.activate(0);
        state.activate(1);
        let json = serde_json::to_string(&state).unwrap();
        let decoded: SeriesState = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, state);
        assert_eq!(decoded.sealed_chunks, vec![0]);
        assert_eq!(decoded.active_chunk, Some(1));
        assert_eq!(decoded.next_chunk, 2);
    }

    #[test]
    fn malformed_state_is_reported() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(SERIES_STATE_FILE), b"{\"name\": \"run\"").unwrap();
        let err = ChunkManager::default()
            .open_chunk_series(dir.path())
            .expect_err("truncated json");
        assert!(matches!(err, SweepError::State(_)));
    }

    #[test]
    fn first_target_is_chunk_zero() {
        let dir = TempDir::new().unwrap();
        let mut series = ChunkManager::default()
            .create_chunk_series("run", dir.path())
            .unwrap();
        assert_eq!(series.current_index(), None);
        let target = series.current_target().unwrap();
        assert_eq!(target, dir.path().join("run").join("run_chunk000000.swp"));
        assert!(target.exists());
        assert_eq!(series.current_target().unwrap(), target);
        assert_eq!(series.current_index(), Some(0));
    }

    #[test]
    fn create_rejects_existing_series() {
        let dir = TempDir::new().unwrap();
        let manager = ChunkManager::default();
        manager.create_chunk_series("run", dir.path()).unwrap();
        let err = manager
            .create_chunk_series("run", dir.path())
            .expect_err("conflict");
        assert!(
            matches!(err, SweepError::Io { source, .. } if source.kind() == io::ErrorKind::AlreadyExists)
        );
    }

    #[test]
    fn create_rejects_path_like_and_control_names() {
        let dir = TempDir::new().unwrap();
        for name in ["", "..", "a/b", "run\nid=x", "tab\tbed", SERIES_STATE_FILE] {
            let err = ChunkManager::default()
                .create_chunk_series(name, dir.path())
                .expect_err("invalid name");
            assert!(
                matches!(err, SweepError::Io { source, .. } if source.kind() == io::ErrorKind::InvalidInput)
            );
        }
    }

    #[test]
    fn roll_happens_at_threshold() {
        let dir = TempDir::new().unwrap();
        let mut series = ChunkManager::default()
            .create_chunk_series("run", dir.path())
            .unwrap();
        let first = series.check_and_roll(10).unwrap();
        fs::write(&first, [0u8; 9]).unwrap();
        assert_eq!(series.check_and_roll(10).unwrap(), first);

        fs::write(&first, [0u8; 10]).unwrap();
        let second = series.check_and_roll(10).unwrap();
        assert_ne!(second, first);
        assert_eq!(series.current_index(), Some(1));
        assert_eq!(series.sealed_chunks(), &[0]);
        assert_eq!(series.check_and_roll(10).unwrap(), second);
    }

    #[test]
    fn numbers_are_not_reused_after_deletion() {
        let dir = TempDir::new().unwrap();
        let manager = ChunkManager::default();
        let mut series = manager.create_chunk_series("run", dir.path()).unwrap();
        let first = series.current_target().unwrap();
        fs::write(&first, [1u8; 4]).unwrap();
        let second = series.check_and_roll(1).unwrap();
        fs::remove_file(&second).unwrap();
        drop(series);

        let mut reopened = manager.open_chunk_series(dir.path().join("run")).unwrap();
        assert_eq!(reopened.current_index(), None);
        assert_eq!(reopened.sealed_chunks(), &[0, 1]);
        let third = reopened.check_and_roll(1).unwrap();
        assert_eq!(reopened.current_index(), Some(2));
        assert!(third.ends_with("run_chunk000002.swp"));
    }

    #[test]
    fn reopen_never_hands_out_a_sealed_chunk() {
        let dir = TempDir::new().unwrap();
        let manager = ChunkManager::default();
        let mut series = manager.create_chunk_series("run", dir.path()).unwrap();
        let first = series.current_target().unwrap();
        fs::write(&first, [1u8; 200]).unwrap();
        let second = series.check_and_roll(100).unwrap();
        fs::remove_file(&second).unwrap();
        drop(series);

        let mut reopened = manager.open_chunk_series(dir.path().join("run")).unwrap();
        let target = reopened.current_target().unwrap();
        assert_ne!(target, first);
        assert!(target.ends_with("run_chunk000002.swp"));
        assert_ne!(reopened.check_and_roll(u64::MAX).unwrap(), first);
        assert_eq!(fs::metadata(&first).unwrap().len(), 200);
    }

    #[test]
    fn reopen_resumes_active_chunk() {
        let dir = TempDir::new().unwrap();
        let manager = ChunkManager::default();
        let mut series = manager.create_chunk_series("run", dir.path()).unwrap();
        let id = series.id();
        let first = series.current_target().unwrap();
        fs::write(&first, [1u8; 4]).unwrap();
        let second = series.check_and_roll(1).unwrap();
        drop(series);

        let mut reopened = manager.open_chunk_series(dir.path().join("run")).unwrap();
        assert_eq!(reopened.id(), id);
        assert_eq!(reopened.name(), "run");
        assert_eq!(reopened.current_target().unwrap(), second);
        assert_eq!(reopened.sealed_chunks(), &[0]);
        assert_eq!(reopened.chunks().unwrap().len(), 2);
    }
}
