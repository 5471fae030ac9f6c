//! Compute-or-load artifact cache
//!
//! Every expensive stage (preprocessing, sorting, post-processing) persists
//! its result as a directory keyed by the item name and the configuration
//! that produced it. A later call with the same key reloads the directory
//! instead of recomputing.
//!
//! # Crash Safety
//!
//! - Results are written into a private staging directory
//! - A completion manifest is written last
//! - The staging directory is renamed into place in one step
//! - A per-entry file lock serializes concurrent builders
//!
//! # Entry States
//!
//! | State | Meaning |
//! |-------|---------|
//! | Miss | No directory, will be computed |
//! | Building | Directory without manifest: crashed or foreign, recomputed |
//! | Complete | Manifest present, loaded as-is |

pub mod entry;
pub mod key;
pub mod lock;
pub mod store;

pub use entry::{
    format_bytes, gb_to_bytes, CacheEntry, CacheSizeStatus, CacheState, EntryManifest,
    MANIFEST_FILE,
};
pub use key::{CacheKey, Fingerprint, KeyMode};
pub use lock::EntryLock;
pub use store::{Artifact, ArtifactStore, Cached, CacheOutcome, GcReport, StoreOptions};
