//! Application configuration types.
//!
//! The top-level [`Config`] is deserialized from TOML by the binary. Every
//! section defaults sensibly so a completely empty file is valid.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Error, Result};

/// Upper bound on concurrently packaged assets.
pub const MAX_CONCURRENCY: usize = 10;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub tools: ToolsConfig,
    pub packaging: PackagingConfig,
    pub batch: BatchConfig,
}

impl Config {
    /// Check hard constraints. Returns the first violation.
    pub fn check(&self) -> Result<()> {
        if !(1..=MAX_CONCURRENCY).contains(&self.batch.concurrency) {
            return Err(Error::Validation(format!(
                "batch.concurrency must be between 1 and {MAX_CONCURRENCY}, got {}",
                self.batch.concurrency
            )));
        }
        if self.packaging.pipe_capacity == 0 {
            return Err(Error::Validation("packaging.pipe_capacity must be non-zero".into()));
        }
        if self.tools.timeout_secs == 0 {
            return Err(Error::Validation("tools.timeout_secs must be non-zero".into()));
        }
        Ok(())
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !self.storage.source_root.exists() {
            warnings.push(format!(
                "storage.source_root {} does not exist",
                self.storage.source_root.display()
            ));
        }

        if self.packaging.streaming && !cfg!(unix) {
            warnings.push("packaging.streaming requires named pipes; only supported on unix".into());
        }

        if self.packaging.adjust_vtt && !self.packaging.live_video_fixup {
            warnings.push(
                "packaging.adjust_vtt shifts captions to the raw video origin; \
                 live_video_fixup is off"
                    .into(),
            );
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Where assets are read from and outputs written to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the source object store; each subdirectory is a container.
    pub source_root: PathBuf,
    /// Root of the output object store.
    pub output_root: PathBuf,
    /// Root for per-asset working directories.
    pub working_root: PathBuf,
    /// Copy packaged outputs into the output store.
    pub upload_outputs: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            source_root: PathBuf::from("./assets"),
            output_root: PathBuf::from("./packaged"),
            working_root: std::env::temp_dir().join("archiveforge"),
            upload_outputs: true,
        }
    }
}

/// External tool path overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub packager_path: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
    /// Maximum run time of a single tool invocation.
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            packager_path: None,
            ffmpeg_path: None,
            timeout_secs: 6 * 60 * 60,
        }
    }
}

/// Packaging behavior for each asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagingConfig {
    /// Feed packager inputs through named pipes instead of staging files.
    pub streaming: bool,
    /// Normalize live video fragment timing boxes after concatenation.
    pub live_video_fixup: bool,
    /// Rebase live audio fragments onto the video origin.
    pub live_audio_fixup: bool,
    /// Shift caption cues by the video start offset.
    pub adjust_vtt: bool,
    /// Demux multi-track Smooth files with ffmpeg before packaging.
    pub transmux_smooth: bool,
    /// Buffer size in bytes for in-process pipes.
    pub pipe_capacity: usize,
    /// Leave the working directory in place after a run.
    pub keep_working_dir: bool,
}

impl Default for PackagingConfig {
    fn default() -> Self {
        Self {
            streaming: false,
            live_video_fixup: true,
            live_audio_fixup: true,
            adjust_vtt: true,
            transmux_smooth: true,
            pipe_capacity: 1024 * 1024,
            keep_working_dir: false,
        }
    }
}

/// Batch driver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub concurrency: usize,
    /// Cancel the remaining items after the first failure.
    pub fail_fast: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            fail_fast: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes_check() {
        assert!(Config::default().check().is_ok());
    }

    #[test]
    fn concurrency_out_of_range_fails() {
        let mut cfg = Config::default();
        cfg.batch.concurrency = 0;
        assert!(cfg.check().is_err());
        cfg.batch.concurrency = MAX_CONCURRENCY + 1;
        assert!(cfg.check().is_err());
        cfg.batch.concurrency = MAX_CONCURRENCY;
        assert!(cfg.check().is_ok());
    }

    #[test]
    fn zero_pipe_capacity_fails() {
        let mut cfg = Config::default();
        cfg.packaging.pipe_capacity = 0;
        assert!(cfg.check().is_err());
    }

    #[test]
    fn missing_source_root_warns() {
        let mut cfg = Config::default();
        cfg.storage.source_root = PathBuf::from("/nonexistent/archiveforge/source");
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("source_root")));
    }

    #[test]
    fn json_round_trip_keeps_defaults() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.batch.concurrency, 5);
        assert!(back.packaging.live_video_fixup);
    }
}
