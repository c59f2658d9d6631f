//! Per-asset working directory.
//!
//! Each packaging run gets `<working_root>/<container>/` with an `input/`
//! subdirectory for staged inputs. Packaged outputs and manifests are written
//! flat into the root. The directory is removed when the [`Workspace`] is
//! dropped, unless it was asked to be kept.

use std::path::{Path, PathBuf};

use af_core::{Error, Result};

/// Name of the staged-inputs subdirectory.
pub const INPUT_DIR: &str = "input";

pub struct Workspace {
    root: PathBuf,
    keep: bool,
}

impl Workspace {
    /// Create a fresh working directory for `container`. A leftover
    /// directory from an earlier run is removed first.
    pub async fn create(working_root: &Path, container: &str, keep: bool) -> Result<Self> {
        if container.is_empty()
            || container.contains(['/', '\\'])
            || container == "."
            || container == ".."
        {
            return Err(Error::Validation(format!(
                "invalid container name for workspace: {container:?}"
            )));
        }
        let root = working_root.join(container);

        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => tracing::debug!(path = %root.display(), "Removed stale working directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(root.join(INPUT_DIR)).await?;

        Ok(Self { root, keep })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for staged inputs.
    pub fn input_dir(&self) -> PathBuf {
        self.root.join(INPUT_DIR)
    }

    /// Path of a staged input.
    pub fn input_path(&self, name: &str) -> PathBuf {
        self.input_dir().join(flatten(name))
    }

    /// Path of a packaged output or manifest.
    pub fn output_path(&self, name: &str) -> PathBuf {
        self.root.join(flatten(name))
    }

    /// Keep the directory after the workspace is dropped.
    pub fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.keep {
            tracing::info!(path = %self.root.display(), "Keeping working directory");
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.root.display(), error = %e, "Failed to remove working directory");
            }
        }
    }
}

/// Object names may contain `/`; working files are flat.
fn flatten(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}
