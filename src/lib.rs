//! # archiveforge
//!
//! Reconstructs fragmented live-archive media assets and repackages them
//! with an external packager.
//!
//! - [`selection`] -- which tracks of an asset get packaged.
//! - [`plan`] -- tracks grouped by input, deterministic output names.
//! - [`reconstruct`] -- inputs rebuilt from objects and fragments, with the
//!   audio and caption timelines aligned to video.
//! - [`packaging`] -- one asset end to end, staged or through pipes.
//! - [`batch`] / [`runner`] -- many assets with bounded concurrency.
//! - [`assets`] -- loading manifests and encryption material from a store.
//! - [`config`] -- TOML configuration loading.

pub mod assets;
pub mod batch;
pub mod config;
pub mod packaging;
pub mod plan;
pub mod reconstruct;
pub mod runner;
pub mod selection;
