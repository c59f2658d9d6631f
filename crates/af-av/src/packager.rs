//! Shaka Packager invocation.
//!
//! Each packager input is described by a stream descriptor
//! (`in=<input>,stream=<selector>,output=<output>[,language=..][,playlist_name=..]`),
//! followed by the manifest outputs.

use std::path::PathBuf;

use af_core::{Error, Result};
use tokio_util::sync::CancellationToken;

use crate::command::{ToolCommand, ToolRun};

/// One stream the packager reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagerStream {
    /// Input file or pipe.
    pub input: PathBuf,
    /// `video`, `audio`, `text`, or a stream index within the input.
    pub selector: String,
    pub output: PathBuf,
    pub language: Option<String>,
    /// HLS media playlist name for this stream.
    pub playlist_name: Option<String>,
}

impl PackagerStream {
    /// The stream descriptor argument.
    pub fn descriptor(&self) -> Result<String> {
        let mut fields = vec![
            ("in", self.input.to_string_lossy().to_string()),
            ("stream", self.selector.clone()),
            ("output", self.output.to_string_lossy().to_string()),
        ];
        if let Some(lang) = &self.language {
            fields.push(("language", lang.clone()));
        }
        if let Some(name) = &self.playlist_name {
            fields.push(("playlist_name", name.clone()));
        }

        for (key, value) in &fields {
            if value.is_empty() || value.contains(',') {
                return Err(Error::Validation(format!(
                    "packager descriptor field {key}={value:?} is empty or contains a comma"
                )));
            }
        }

        Ok(fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(","))
    }
}

/// Manifest files the packager writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestOutputs {
    pub dash: Option<PathBuf>,
    pub hls: Option<PathBuf>,
}

impl ManifestOutputs {
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.dash.iter().chain(self.hls.iter())
    }
}

/// Build the packager argument list.
pub fn packager_args(streams: &[PackagerStream], manifests: &ManifestOutputs) -> Result<Vec<String>> {
    if streams.is_empty() {
        return Err(Error::Validation("packager needs at least one stream".into()));
    }
    let mut args = streams
        .iter()
        .map(PackagerStream::descriptor)
        .collect::<Result<Vec<_>>>()?;
    if let Some(dash) = &manifests.dash {
        args.push("--mpd_output".into());
        args.push(dash.to_string_lossy().to_string());
    }
    if let Some(hls) = &manifests.hls {
        args.push("--hls_master_playlist_output".into());
        args.push(hls.to_string_lossy().to_string());
    }
    Ok(args)
}

/// Run the packager over `streams`.
///
/// A packager that exits non-zero is reported through
/// [`ToolRun::success`]; only a packager that cannot be started (or is
/// cancelled, or times out) is an error.
pub async fn run_packager(
    mut command: ToolCommand,
    streams: &[PackagerStream],
    manifests: &ManifestOutputs,
    cancel: &CancellationToken,
) -> Result<ToolRun> {
    let args = packager_args(streams, manifests)?;
    let tool = command.program_name();
    tracing::info!(tool = %tool, streams = streams.len(), "Running packager");
    command.args(args);
    let run = command.run(cancel).await?;
    if run.success {
        tracing::info!(tool = %tool, "Packager succeeded");
    } else {
        tracing::error!(
            tool = %tool,
            exit_code = ?run.exit_code,
            last_error = run.stderr.last().map(String::as_str).unwrap_or(""),
            "Packager failed"
        );
    }
    Ok(run)
}
