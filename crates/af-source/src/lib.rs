//! # af-source
//!
//! Where asset bytes come from.
//!
//! - [`store`] -- the [`ObjectStore`] abstraction over containers of named
//!   objects, with a local-filesystem implementation.
//! - [`decrypt`] -- AES-CTR storage decryption applied while bytes stream.
//! - [`source`] -- the pull-based [`StreamSource`] interface, single-object
//!   sources and discard-on-failure [`download`].
//! - [`multifile`] -- virtual streams assembled from live-archive fragments.
//! - [`live`] -- sources that rewrite live-archive fragments on the fly.

pub mod decrypt;
pub mod live;
pub mod multifile;
pub mod source;
pub mod store;

pub use decrypt::Decryptor;
pub use live::{LiveAudioSource, LiveVideoSource};
pub use multifile::{FragmentFormat, MultiFileSource};
pub use source::{
    copy_cancellable, download, FileSource, ObjectSource, StreamSource, Transfer, COPY_BUFFER,
};
pub use store::{LocalStore, ObjectReader, ObjectStore};
