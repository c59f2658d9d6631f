//! External tool detection.
//!
//! The [`ToolRegistry`] finds the packager (Shaka Packager) and ffmpeg once
//! at startup and hands out ready-to-use [`ToolCommand`]s.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use af_core::config::ToolsConfig;
use af_core::{Error, Result};
use serde::Serialize;

use crate::command::ToolCommand;

/// Registry name of the packager.
pub const PACKAGER: &str = "packager";

/// Registry name of ffmpeg.
pub const FFMPEG: &str = "ffmpeg";

/// Known tools and the executable names searched for in `PATH`.
const KNOWN_TOOLS: &[(&str, &[&str])] = &[
    (PACKAGER, &["packager", "shaka-packager"]),
    (FFMPEG, &["ffmpeg"]),
];

/// A resolved tool.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub name: String,
    pub path: PathBuf,
    /// Maximum execution time before the tool is killed.
    pub timeout: Duration,
}

impl ToolConfig {
    /// A fresh command for this tool with its timeout applied.
    pub fn command(&self) -> ToolCommand {
        let mut cmd = ToolCommand::new(self.path.clone());
        cmd.timeout(self.timeout);
        cmd
    }
}

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of the tool's version output, if available.
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

/// Registry holding discovered tools.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolConfig>,
}

impl ToolRegistry {
    /// Discover tools from config overrides or `PATH`.
    ///
    /// A configured path is used when it exists; otherwise [`which::which`]
    /// searches `PATH`. Tools that are not found are left out, and only
    /// fail when [`require`](Self::require)d.
    pub fn discover(tools_config: &ToolsConfig) -> Self {
        let timeout = Duration::from_secs(tools_config.timeout_secs);
        let mut registry = Self::default();

        for &(name, executables) in KNOWN_TOOLS {
            let custom_path = match name {
                PACKAGER => tools_config.packager_path.as_deref(),
                FFMPEG => tools_config.ffmpeg_path.as_deref(),
                _ => None,
            };

            let resolved = match custom_path {
                Some(p) if p.exists() => Some(p.to_path_buf()),
                Some(p) => {
                    tracing::warn!(tool = name, path = %p.display(), "Configured tool path does not exist, searching PATH");
                    search_path(executables)
                }
                None => search_path(executables),
            };

            match resolved {
                Some(path) => {
                    tracing::debug!(tool = name, path = %path.display(), "Found tool");
                    registry.insert(name, path, timeout);
                }
                None => tracing::debug!(tool = name, "Tool not found"),
            }
        }

        registry
    }

    /// Register a tool explicitly.
    pub fn insert(&mut self, name: &str, path: impl Into<PathBuf>, timeout: Duration) {
        self.tools.insert(
            name.to_string(),
            ToolConfig {
                name: name.to_string(),
                path: path.into(),
                timeout,
            },
        );
    }

    /// The [`ToolConfig`] for a tool, or [`Error::Tool`] if it was not found.
    pub fn require(&self, name: &str) -> Result<&ToolConfig> {
        self.tools.get(name).ok_or_else(|| {
            Error::tool(name, format!("{name} not found; is it installed and in PATH?"))
        })
    }

    /// Check all known tools and return availability information.
    pub async fn check_all(&self) -> Vec<ToolInfo> {
        let mut infos = Vec::with_capacity(KNOWN_TOOLS.len());
        for &(name, _) in KNOWN_TOOLS {
            let info = match self.tools.get(name) {
                Some(cfg) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: detect_version(name, &cfg.path).await,
                    path: Some(cfg.path.clone()),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            };
            infos.push(info);
        }
        infos
    }
}

fn search_path(executables: &[&str]) -> Option<PathBuf> {
    executables.iter().find_map(|exe| which::which(exe).ok())
}

/// Run `<tool> --version` (`-version` for ffmpeg) and return the first line.
async fn detect_version(name: &str, path: &Path) -> Option<String> {
    let version_arg = match name {
        FFMPEG => "-version",
        _ => "--version",
    };

    let output = ToolCommand::new(path.to_path_buf())
        .arg(version_arg)
        .timeout(Duration::from_secs(10))
        .execute()
        .await
        .ok()?;

    // Shaka Packager prints its version on stderr.
    output
        .stdout
        .lines()
        .chain(output.stderr.lines())
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
