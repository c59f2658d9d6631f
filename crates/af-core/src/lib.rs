//! af-core: shared errors, configuration, the asset model and timing state.
//!
//! This crate is the foundational dependency for the other af-* crates. It
//! carries no I/O of its own: the model types describe an asset as loaded
//! from its manifests, and [`SyncState`] records the cross-track timing
//! origin computed while an asset is reconstructed.

pub mod config;
pub mod error;
pub mod model;
pub mod sync;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use model::*;
pub use sync::{rescale, SyncState, VideoSync};
