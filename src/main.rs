mod cli;

use archiveforge::{
    assets, config,
    batch::{BatchOptions, BatchProgress},
    packaging::PackagingEnv,
    plan::build_input_plan,
    runner,
    selection::select_tracks,
};

use af_av::ToolRegistry;
use af_source::LocalStore;
use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "archiveforge=trace,af_av=debug,af_source=debug,af_media=debug,af_core=debug".to_string()
        } else {
            "archiveforge=info,af_av=info,af_source=info,af_media=info,af_core=info".to_string()
        }
    });

    // Logs go to stderr so `--json` output stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            only,
            concurrency,
            fail_fast,
        } => run_batch(cli.config.as_deref(), only, concurrency, fail_fast),
        Commands::Package { container, json } => {
            package_container(cli.config.as_deref(), &container, json)
        }
        Commands::Inspect { container, json } => {
            inspect_asset(cli.config.as_deref(), &container, json)
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("archiveforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Cancel `cancel` on Ctrl-C. Must be called inside the runtime.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            cancel.cancel();
        }
    });
}

fn run_batch(
    config_path: Option<&Path>,
    only: Vec<String>,
    concurrency: Option<usize>,
    fail_fast: bool,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;
    if let Some(concurrency) = concurrency {
        config.batch.concurrency = concurrency;
    }
    config.batch.fail_fast |= fail_fast;
    config.check()?;

    let options = BatchOptions::from(&config.batch);
    let env = PackagingEnv::from_config(config);
    let only = (!only.is_empty()).then_some(only);

    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(async move {
        let cancel = CancellationToken::new();
        cancel_on_ctrl_c(cancel.clone());

        let (progress_tx, mut progress_rx) =
            tokio::sync::mpsc::unbounded_channel::<BatchProgress>();
        let reporter = tokio::spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                tracing::info!(
                    completed = progress.completed,
                    total = progress.total,
                    "Progress"
                );
            }
        });

        let summary = runner::run_batch(env, only, options, &cancel, Some(progress_tx)).await;
        if let Err(e) = reporter.await {
            tracing::warn!(error = %e, "Progress reporter stopped abnormally");
        }
        summary
    })?;

    println!("\nBatch complete: {}", summary);
    if summary.has_failures() {
        anyhow::bail!("{} asset(s) failed", summary.failed);
    }
    Ok(())
}

fn package_container(config_path: Option<&Path>, container: &str, json: bool) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    config.check()?;
    let env = PackagingEnv::from_config(config);

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let cancel = CancellationToken::new();
        cancel_on_ctrl_c(cancel.clone());
        runner::package_container(&env, container, &cancel).await
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Container: {}", report.container);
        println!("Outputs:");
        for output in &report.outputs {
            println!("  {}", output);
        }
        println!("Manifests: {}", report.manifests.join(", "));
        if report.sync.video_time_scale > 0 {
            println!(
                "Video start: {} @ {}",
                report.sync.video_start_time, report.sync.video_time_scale
            );
        }
        if report.sync.audio_time_scale > 0 {
            println!(
                "Audio start: {} @ {} (video origin {})",
                report.sync.audio_start_time,
                report.sync.audio_time_scale,
                report.sync.video_start_time_in_audio_time_scale
            );
        }
        if report.sync.audio_has_discontinuities {
            println!("Audio has discontinuities");
        }
        if report.success {
            println!("Uploaded: {} file(s)", report.uploaded);
        }
    }

    if !report.success {
        for line in &report.errors {
            eprintln!("  {}", line);
        }
        anyhow::bail!(
            "Packager failed for {} (exit code {:?})",
            report.container,
            report.exit_code
        );
    }
    Ok(())
}

fn inspect_asset(config_path: Option<&Path>, container: &str, json: bool) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let store = LocalStore::new(&config.storage.source_root);

    let rt = tokio::runtime::Runtime::new()?;
    let asset = rt.block_on(assets::load_asset(&store, container))?;

    let selected = select_tracks(&asset.manifest, asset.client_manifest.as_ref());
    let plan = build_input_plan(asset.manifest.base_name(), &selected);

    if json {
        let value = serde_json::json!({
            "container": asset.container,
            "manifest": asset.manifest.file_name,
            "live_archive": asset.manifest.is_live_archive,
            "encrypted": asset.decryption.is_some(),
            "selected": selected,
            "plan": plan,
            "outputs": plan.outputs(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Container: {}", asset.container);
    println!("Manifest: {}", asset.manifest.file_name);
    println!("Live archive: {}", asset.manifest.is_live_archive);
    println!("Encrypted: {}", asset.decryption.is_some());

    println!(
        "\nTracks: {} ({} selected)",
        asset.manifest.tracks.len(),
        selected.len()
    );
    for track in &asset.manifest.tracks {
        let mark = if selected.contains(track) { "✓" } else { " " };
        print!("  {} [{}] {} {}", mark, track.track_id, track.kind, track.source);
        if track.is_multi_file {
            print!(" (fragmented)");
        }
        if let Some(ref lang) = track.language {
            print!(" ({})", lang);
        }
        println!();
    }

    println!("\nInputs:");
    for entry in &plan.entries {
        println!("  {}", entry.identifier);
        for planned in &entry.tracks {
            println!(
                "    {} -> {} [{}]",
                planned.track.name,
                planned.output,
                entry.selector(&planned.track)
            );
        }
    }

    println!("\nManifests: {}, {}", plan.dash_manifest(), plan.hls_manifest());
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let registry = ToolRegistry::discover(&config.tools);
    let rt = tokio::runtime::Runtime::new()?;
    let tools = rt.block_on(registry.check_all());
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them to enable all features.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    println!("  Source root: {}", config.storage.source_root.display());
    println!("  Output root: {}", config.storage.output_root.display());
    println!("  Working root: {}", config.storage.working_root.display());
    println!("  Upload outputs: {}", config.storage.upload_outputs);
    println!("  Streaming: {}", config.packaging.streaming);
    println!("  Concurrency: {}", config.batch.concurrency);

    for warning in config.validate() {
        println!("  ⚠ {}", warning);
    }

    Ok(())
}
