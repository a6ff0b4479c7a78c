#![deny(missing_docs)]
//! Append-only storage for multi-indexed measurement sweeps.
//!
//! A sweep is a block of `f64` data whose rows are addressed by the
//! Cartesian product of one or more index arrays. [`SweepStore`] writes such
//! blocks, together with flat dictionary records, into keyed tables inside a
//! single container file. Long acquisitions spread their writes over a
//! [`ChunkSeries`] of size-bounded files, and a [`Consolidator`] merges the
//! chunks back into one container once the run is over.
//!
//! All I/O is blocking and caller driven; there is no background work.
//! Diagnostics go through the `log` facade under the `sweepstore` target.

mod logging;

/// Scalars, index arrays, data blocks and dictionary records.
pub mod value;

/// Cartesian-product expansion of index arrays.
pub mod index;

/// Column layouts of sweep tables and dictionary tables.
pub mod schema;

/// On-disk container format.
pub mod container;

/// Keyed table reads and writes on a container file.
pub mod store;

/// Size-bounded chunk series.
pub mod chunk;

/// Merging chunk series into one container.
pub mod consolidate;

/// Configuration.
pub mod option;

/// Error taxonomy.
pub mod error;

pub use crate::{
    chunk::{ChunkDescriptor, ChunkManager, ChunkSeries},
    consolidate::{consolidated_path, ConsolidationReport, Consolidator},
    error::{SweepError, SweepResult},
    index::{expand, ExpandedIndex, MixedRadix},
    option::SweepOptions,
    schema::{RecordSchema, SweepSchema},
    store::{RecordTable, SweepStore, SweepTable, WriteReport},
    value::{DataBlock, IndexArray, Record, Scalar},
};
