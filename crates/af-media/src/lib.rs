//! # af-media
//!
//! Container-level media handling for archiveforge.
//!
//! - [`manifest`] -- parse the server manifest (`.ism`) and the client
//!   manifest (`.ismc`) into the [`af_core`] model.
//! - [`boxes`] -- ISO BMFF box walking and writing primitives.
//! - [`fragment`] -- streaming rewrite of live-archive fragments: Smooth
//!   `tfxd` timing to `tfdt`, audio timeline rebasing, discontinuity
//!   detection.
//! - [`vtt`] -- WebVTT cue shifting and fragment merging.

pub mod boxes;
pub mod fragment;
pub mod manifest;
pub mod vtt;

pub use fragment::{fix_live_video, rebase_live_audio, FragmentStats, Timeline};
pub use manifest::{parse_client_manifest, parse_server_manifest};
