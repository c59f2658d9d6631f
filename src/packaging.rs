//! Packaging one asset end to end.
//!
//! select tracks -> plan inputs -> reconstruct -> run the packager ->
//! upload outputs. Everything happens inside a per-asset [`Workspace`]
//! that is removed afterwards unless configured otherwise.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use af_av::{run_packager, ManifestOutputs, PackagerStream, ToolRegistry, Workspace, PACKAGER};
use af_core::config::Config;
use af_core::{AssetDetails, Error, Result, SyncState, Track, TrackKind};
use af_source::{LocalStore, ObjectStore, Transfer};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::plan::build_input_plan;
use crate::reconstruct::{
    note_discontinuities, InputData, PackagerInput, ReconstructOptions, Reconstructor,
};
use crate::selection::select_tracks;

/// How long pipe producers may take to finish once the packager exited.
const PRODUCER_GRACE: Duration = Duration::from_secs(30);

/// Shared services for packaging runs.
#[derive(Clone)]
pub struct PackagingEnv {
    pub config: Arc<Config>,
    /// Store the assets are read from.
    pub source: Arc<dyn ObjectStore>,
    /// Store packaged outputs are uploaded to, if uploading is on.
    pub output: Option<Arc<dyn ObjectStore>>,
    pub tools: Arc<ToolRegistry>,
}

impl PackagingEnv {
    /// Local stores under the configured roots and tools found on this
    /// machine.
    pub fn from_config(config: Config) -> Self {
        let tools = ToolRegistry::discover(&config.tools);
        let source: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(&config.storage.source_root));
        let output = config.storage.upload_outputs.then(|| {
            Arc::new(LocalStore::new(&config.storage.output_root)) as Arc<dyn ObjectStore>
        });
        Self {
            config: Arc::new(config),
            source,
            output,
            tools: Arc::new(tools),
        }
    }
}

/// Outcome of packaging one asset.
#[derive(Debug, Clone, Serialize)]
pub struct PackageReport {
    pub container: String,
    /// Whether the packager exited with status zero.
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Planned output names in selection order.
    pub outputs: Vec<String>,
    pub manifests: Vec<String>,
    pub sync: SyncState,
    /// Number of files uploaded to the output store.
    pub uploaded: usize,
    /// Last stderr lines of a failed packager run.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Package `asset`.
///
/// A packager that exits non-zero yields a report with `success == false`.
/// Faults before or around the packager (missing tools, unreadable
/// fragments, cancellation) are errors.
pub async fn package_asset(
    asset: &AssetDetails,
    env: &PackagingEnv,
    cancel: &CancellationToken,
) -> Result<PackageReport> {
    let container = asset.container.as_str();
    let options = ReconstructOptions::from(&env.config.packaging);

    let selected = select_tracks(&asset.manifest, asset.client_manifest.as_ref());
    if selected.is_empty() {
        return Err(Error::Precondition(format!(
            "{container} has no packageable tracks"
        )));
    }
    let plan = build_input_plan(asset.manifest.base_name(), &selected);
    let packager = env.tools.require(PACKAGER)?;
    if options.streaming && !cfg!(unix) {
        return Err(Error::Precondition(
            "streaming mode needs named pipes, which this platform lacks".into(),
        ));
    }

    tracing::info!(
        container,
        tracks = selected.len(),
        inputs = plan.entries.len(),
        streaming = options.streaming,
        "Packaging asset"
    );

    let workspace = Workspace::create(
        &env.config.storage.working_root,
        container,
        env.config.packaging.keep_working_dir,
    )
    .await?;

    let recon = Reconstructor::new(asset, env.source.clone(), &workspace, &env.tools, &options)
        .reconstruct(&plan, cancel)
        .await?;
    let mut sync = recon.sync;

    let streams = packager_streams(&workspace, &recon.inputs)?;
    let dash = plan.dash_manifest();
    let hls = plan.hls_manifest();
    let manifests = ManifestOutputs {
        dash: Some(PathBuf::from(&dash)),
        hls: Some(PathBuf::from(&hls)),
    };

    let producer_cancel = cancel.child_token();
    let feeds = Feeds::start(&workspace, &recon.inputs, &producer_cancel)?;

    let mut command = packager.command();
    command.current_dir(workspace.root());
    let run = match run_packager(command, &streams, &manifests, cancel).await {
        Ok(run) => run,
        Err(e) => {
            producer_cancel.cancel();
            feeds.abandon().await;
            return Err(e);
        }
    };

    if run.success {
        feeds.finish(container, &mut sync, &producer_cancel).await?;
    } else {
        producer_cancel.cancel();
        feeds.abandon().await;
    }

    let mut uploaded = 0;
    if run.success && env.config.storage.upload_outputs {
        if let Some(output) = &env.output {
            uploaded = upload_outputs(&workspace, output.as_ref(), container, cancel).await?;
        }
    }

    if run.success {
        tracing::info!(container, uploaded, "Packaged asset");
    } else {
        tracing::error!(container, exit_code = ?run.exit_code, "Packaging failed");
    }

    Ok(PackageReport {
        container: container.to_string(),
        success: run.success,
        exit_code: run.exit_code,
        outputs: plan.outputs(),
        manifests: vec![dash, hls],
        sync,
        uploaded,
        errors: if run.success { Vec::new() } else { run.stderr },
    })
}

/// Packager streams for the reconstructed inputs, with paths relative to
/// the workspace root.
fn packager_streams(workspace: &Workspace, inputs: &[PackagerInput]) -> Result<Vec<PackagerStream>> {
    let mut streams = Vec::new();
    for input in inputs {
        let path = relative(workspace, &workspace.input_path(&input.name));
        for stream in &input.streams {
            let output = &stream.track.output;
            let stem = output.rsplit_once('.').map_or(output.as_str(), |(s, _)| s);
            streams.push(PackagerStream {
                input: path.clone(),
                selector: stream.selector.clone(),
                output: relative(workspace, &workspace.output_path(output)),
                language: stream.track.track.language.clone(),
                playlist_name: Some(format!("{stem}.m3u8")),
            });
        }
    }
    if streams.is_empty() {
        return Err(Error::Internal("reconstruction produced no inputs".into()));
    }
    Ok(streams)
}

fn relative(workspace: &Workspace, path: &Path) -> PathBuf {
    path.strip_prefix(workspace.root())
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Copy every file in the workspace root into `<container>/` of `store`.
async fn upload_outputs(
    workspace: &Workspace,
    store: &dyn ObjectStore,
    container: &str,
    cancel: &CancellationToken,
) -> Result<usize> {
    let mut names = Vec::new();
    let mut dir = tokio::fs::read_dir(workspace.root()).await?;
    while let Some(entry) = dir.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();

    for name in &names {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut file = tokio::fs::File::open(workspace.root().join(name)).await?;
        let bytes = store.put(container, name, &mut file).await?;
        tracing::debug!(container, object = %name, bytes, "Uploaded output");
    }
    Ok(names.len())
}

/// A producer writing one streamed input into its pipe.
struct Feed {
    name: String,
    audio: Option<Track>,
    handle: JoinHandle<Result<Transfer>>,
}

/// Pipe producers of one packaging run. The pipes are removed when this
/// is dropped.
#[derive(Default)]
struct Feeds {
    feeds: Vec<Feed>,
    #[cfg(unix)]
    _pipes: Vec<af_av::pipe::Pipe>,
}

impl Feeds {
    /// Create a pipe for every streamed input and start feeding it.
    #[cfg(unix)]
    fn start(
        workspace: &Workspace,
        inputs: &[PackagerInput],
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let mut feeds = Self::default();
        for input in inputs {
            let InputData::Streamed(source) = &input.data else {
                continue;
            };
            let pipe = af_av::pipe::Pipe::create(workspace.input_path(&input.name))?;
            let handle = pipe.feed(source.clone(), cancel.clone());
            feeds.feeds.push(Feed {
                name: input.name.clone(),
                audio: audio_track(input),
                handle,
            });
            feeds._pipes.push(pipe);
        }
        Ok(feeds)
    }

    #[cfg(not(unix))]
    fn start(
        _workspace: &Workspace,
        inputs: &[PackagerInput],
        _cancel: &CancellationToken,
    ) -> Result<Self> {
        if inputs.iter().any(|i| matches!(i.data, InputData::Streamed(_))) {
            return Err(Error::Validation("streamed inputs need named pipes".into()));
        }
        Ok(Self::default())
    }

    /// Wait for every producer after a successful packager run. Any
    /// producer fault fails the asset.
    async fn finish(
        self,
        container: &str,
        sync: &mut SyncState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + PRODUCER_GRACE;
        let mut first_error = None;

        for feed in self.feeds {
            let result = match tokio::time::timeout_at(deadline, feed.handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(join)) => Err(Error::Internal(format!(
                    "producer for {} failed: {join}",
                    feed.name
                ))),
                Err(_) => {
                    cancel.cancel();
                    Err(Error::reconstruction(
                        &feed.name,
                        "input was not fully read by the packager",
                    ))
                }
            };

            match result {
                Ok(transfer) => {
                    if let Some(track) = &feed.audio {
                        note_discontinuities(container, track, &transfer, sync);
                    }
                }
                Err(e) => {
                    tracing::error!(container, input = %feed.name, error = %e, "Pipe producer failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Wait for cancelled producers to wind down.
    async fn abandon(self) {
        for feed in self.feeds {
            match feed.handle.await {
                Ok(Ok(_)) | Ok(Err(Error::Cancelled)) => {}
                Ok(Err(e)) => tracing::debug!(input = %feed.name, error = %e, "Abandoned producer failed"),
                Err(e) => tracing::debug!(input = %feed.name, error = %e, "Abandoned producer panicked"),
            }
        }
    }
}

#[cfg(unix)]
fn audio_track(input: &PackagerInput) -> Option<Track> {
    input
        .streams
        .iter()
        .find(|s| s.track.track.kind == TrackKind::Audio && s.track.track.is_multi_file)
        .map(|s| s.track.track.clone())
}
