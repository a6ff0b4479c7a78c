//! On-disk container files.
//!
//! A container is an append-only sequence of checksummed frames. Each frame
//! carries one key and one Arrow record batch; a key's rows are the
//! concatenation of its frames in file order. Several independently keyed
//! tables and dictionaries therefore live side by side in one file, and a
//! write that is cut short only ever damages the final frame, which readers
//! skip.

pub(crate) mod codec;
pub(crate) mod file;
pub mod frame;

pub use frame::FrameKind;
