use parquet::file::properties::WriterProperties;

/// Default chunk rollover threshold: 64 MiB.
pub const DEFAULT_MAX_CHUNK_BYTES: u64 = 64 * 1024 * 1024;

/// Settings shared by the store, chunk series and consolidator.
#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub(crate) max_chunk_bytes: u64,
    pub(crate) sync_on_write: bool,
    pub(crate) remove_chunks_after_consolidate: bool,
    pub(crate) parquet_writer_properties: Option<WriterProperties>,
}

impl Default for SweepOptions {
    fn default() -> Self {
        SweepOptions {
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            sync_on_write: true,
            remove_chunks_after_consolidate: true,
            parquet_writer_properties: None,
        }
    }
}

impl SweepOptions {
    /// Size at which chunked writers roll to a new chunk file.
    pub fn max_chunk_bytes(self, max_chunk_bytes: u64) -> Self {
        SweepOptions {
            max_chunk_bytes,
            ..self
        }
    }

    /// Whether every frame is `fsync`ed after it is written.
    pub fn sync_on_write(self, sync_on_write: bool) -> Self {
        SweepOptions {
            sync_on_write,
            ..self
        }
    }

    /// Whether a series' chunk files are deleted once consolidated.
    pub fn remove_chunks_after_consolidate(self, remove_chunks_after_consolidate: bool) -> Self {
        SweepOptions {
            remove_chunks_after_consolidate,
            ..self
        }
    }

    /// Parquet writer settings used by table export.
    pub fn parquet_writer_properties(self, parquet_writer_properties: WriterProperties) -> Self {
        SweepOptions {
            parquet_writer_properties: Some(parquet_writer_properties),
            ..self
        }
    }
}
