//! render-store: persistence layer for VizRender
//!
//! - `BlobStore`: content-addressed artifact bodies (filesystem + in-memory)
//! - `IndexStore`: one record per cache key, pointing at its body
//! - `CacheStore`: the pair of the two, with verified reload
//!
//! All stores are synchronous; callers on an async runtime should wrap
//! large writes in `spawn_blocking`.

pub mod blob;
pub mod digest;
pub mod error;
pub mod fakes;
pub mod index;
pub mod persist;

pub use blob::{BlobStore, FsBlobStore};
pub use digest::ContentDigest;
pub use error::{StoreError, StoreResult};
pub use index::{FsIndexStore, IndexRecord, IndexStore, LoadedRecord};
pub use persist::{CacheStore, LoadReport, RestoredEntry, SweepReport};
