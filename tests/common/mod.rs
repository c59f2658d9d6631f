//! Shared test harness for integration tests.
//!
//! [`Fixture`] lays out a source store, output store and working root in a
//! temp dir and builds a [`PackagingEnv`] over them. Live-archive assets
//! are written as real Smooth fragments so reconstruction and the fragment
//! rewriters run end to end. External tools are small shell scripts.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;

use af_av::{ToolRegistry, FFMPEG, PACKAGER};
use af_core::config::Config;
use af_media::boxes::{children, fullbox_header, read_u64, write_box, BoxType};
use af_media::fragment::TFXD_UUID;
use af_source::{LocalStore, ObjectStore};
use archiveforge::packaging::PackagingEnv;
use tempfile::TempDir;

/// Packager that copies every `in=` input to its `output=` and writes
/// placeholder manifests.
pub const COPYING_PACKAGER: &str = r#"#!/bin/sh
for arg in "$@"; do
  case "$arg" in
    in=*)
      input=$(printf '%s' "$arg" | sed 's/^in=\([^,]*\).*/\1/')
      output=$(printf '%s' "$arg" | sed 's/.*,output=\([^,]*\).*/\1/')
      cat "$input" > "$output" || exit 3
      ;;
  esac
done
prev=""
for arg in "$@"; do
  case "$prev" in
    --mpd_output|--hls_master_playlist_output) echo manifest > "$arg" ;;
  esac
  prev="$arg"
done
echo "packaging done" >&2
"#;

/// Packager that fails the way a packager rejecting its input does.
pub const FAILING_PACKAGER: &str = r#"#!/bin/sh
echo "Packaging failed: unsupported input $1" >&2
exit 2
"#;

/// ffmpeg that writes `track <id>` for the requested `-map 0:i:<id>`.
pub const LABELLING_FFMPEG: &str = r#"#!/bin/sh
while [ "$1" != "-map" ]; do shift; done
printf 'track %s' "${2#0:i:}"
"#;

pub struct Fixture {
    pub dir: TempDir,
    pub config: Config,
    tools: ToolRegistry,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.source_root = dir.path().join("source");
        config.storage.output_root = dir.path().join("output");
        config.storage.working_root = dir.path().join("work");
        std::fs::create_dir_all(&config.storage.source_root).unwrap();
        Self {
            dir,
            config,
            tools: ToolRegistry::default(),
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.config.storage.source_root
    }

    pub fn output_path(&self, container: &str, name: &str) -> PathBuf {
        self.config.storage.output_root.join(container).join(name)
    }

    /// Write an object into the source store.
    pub fn put(&self, container: &str, name: &str, body: impl AsRef<[u8]>) {
        let path = self.source_root().join(container).join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    /// Install a shell script as the named tool.
    #[cfg(unix)]
    pub fn tool(&mut self, name: &str, script: &str) {
        use std::os::unix::fs::PermissionsExt;

        let bin = self.dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let path = bin.join(name);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        self.tools.insert(name, path, Duration::from_secs(30));
    }

    #[cfg(unix)]
    pub fn packager(&mut self, script: &str) {
        self.tool(PACKAGER, script);
    }

    #[cfg(unix)]
    pub fn ffmpeg(&mut self, script: &str) {
        self.tool(FFMPEG, script);
    }

    pub fn env(&self) -> PackagingEnv {
        let output: Arc<dyn ObjectStore> =
            Arc::new(LocalStore::new(&self.config.storage.output_root));
        PackagingEnv {
            config: Arc::new(self.config.clone()),
            source: Arc::new(LocalStore::new(self.source_root())),
            output: Some(output),
            tools: Arc::new(self.tools.clone()),
        }
    }

    /// Write a config file pointing at this fixture and return its path.
    pub fn config_file(&self) -> PathBuf {
        let path = self.dir.path().join("archiveforge.toml");
        std::fs::write(
            &path,
            format!(
                "[storage]\nsource_root = {:?}\noutput_root = {:?}\nworking_root = {:?}\n",
                self.config.storage.source_root,
                self.config.storage.output_root,
                self.config.storage.working_root,
            ),
        )
        .unwrap();
        path
    }
}

// ---------------------------------------------------------------------------
// Live-archive assets
// ---------------------------------------------------------------------------

pub const LIVE_ISM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<smil xmlns="http://www.w3.org/2001/SMIL20/Language">
  <head><meta name="formats" content="fmp4" /></head>
  <body>
    <switch>
      <video src="video">
        <param name="trackID" value="1" valuetype="data" />
        <param name="trackName" value="video" valuetype="data" />
      </video>
      <audio src="audio" systemLanguage="en">
        <param name="trackID" value="2" valuetype="data" />
        <param name="trackName" value="audio" valuetype="data" />
      </audio>
      <textstream src="captions" systemLanguage="en">
        <param name="trackID" value="3" valuetype="data" />
        <param name="trackName" value="captions" valuetype="data" />
      </textstream>
    </switch>
  </body>
</smil>"#;

/// Video fragments start at `video_start` (10 MHz, 2 s each); audio at 44
/// (48 kHz, 96000 ticks each); captions at 0.
pub fn live_ismc(video_start: u64) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<SmoothStreamingMedia MajorVersion="2" MinorVersion="2" Duration="0" TimeScale="10000000">
  <StreamIndex Type="video" Name="video">
    <c t="{video_start}" d="20000000" r="3" />
  </StreamIndex>
  <StreamIndex Type="audio" Name="audio" TimeScale="48000">
    <c t="44" d="96000" r="2" />
  </StreamIndex>
  <StreamIndex Type="text" Subtype="SUBT" Name="captions">
    <c t="0" d="20000000" r="2" />
  </StreamIndex>
</SmoothStreamingMedia>"#
    )
}

pub const CAPTION_FRAGMENTS: [&str; 2] = [
    "WEBVTT\n\n00:00:00.500 --> 00:00:01.500\nFirst\n",
    "WEBVTT\n\n00:00:02.500 --> 00:00:03.500\nSecond\n",
];

/// Write a live-archive asset whose video starts at `video_start`.
pub fn write_live_asset(fixture: &Fixture, container: &str, video_start: u64) {
    fixture.put(container, "live.ism", LIVE_ISM);
    fixture.put(container, "live.ismc", live_ismc(video_start));

    fixture.put(container, "video/header", init_segment());
    for i in 0..3u64 {
        let t = video_start + i * 20_000_000;
        fixture.put(container, &format!("video/{t}"), fragment(t, 20_000_000));
    }

    fixture.put(container, "audio/header", init_segment());
    for i in 0..2u64 {
        let t = 44 + i * 96_000;
        fixture.put(container, &format!("audio/{t}"), fragment(t, 96_000));
    }

    fixture.put(container, "captions/0", CAPTION_FRAGMENTS[0]);
    fixture.put(container, "captions/20000000", CAPTION_FRAGMENTS[1]);
}

pub fn init_segment() -> Vec<u8> {
    let ftyp = write_box(BoxType::FTYP, b"isml\0\0\0\x01");
    let moov = write_box(BoxType::MOOV, &[0u8; 16]);
    [ftyp, moov].concat()
}

/// moof(traf(tfhd, tfxd)) followed by a small mdat.
pub fn fragment(time: u64, duration: u64) -> Vec<u8> {
    let mut tfhd = fullbox_header(0, 0).to_vec();
    tfhd.extend_from_slice(&1u32.to_be_bytes());
    let mut tfxd = TFXD_UUID.to_vec();
    tfxd.extend_from_slice(&fullbox_header(1, 0));
    tfxd.extend_from_slice(&time.to_be_bytes());
    tfxd.extend_from_slice(&duration.to_be_bytes());
    let traf = write_box(
        BoxType::TRAF,
        &[write_box(BoxType::TFHD, &tfhd), write_box(BoxType::UUID, &tfxd)].concat(),
    );
    [write_box(BoxType::MOOF, &traf), write_box(BoxType::MDAT, b"sample")].concat()
}

/// `tfdt` decode times of every fragment in `stream`.
pub fn decode_times(stream: &[u8]) -> Vec<u64> {
    children(stream)
        .unwrap()
        .into_iter()
        .filter(|b| b.box_type == BoxType::MOOF)
        .flat_map(|moof| children(moof.payload).unwrap())
        .flat_map(|traf| children(traf.payload).unwrap())
        .filter(|b| b.box_type == BoxType::TFDT)
        .map(|b| read_u64(b.payload, 4).unwrap())
        .collect()
}

// ---------------------------------------------------------------------------
// On-demand assets
// ---------------------------------------------------------------------------

/// Separate video, audio and caption objects.
pub const VOD_ISM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<smil xmlns="http://www.w3.org/2001/SMIL20/Language">
  <body>
    <switch>
      <video src="v.ismv"><param name="trackID" value="1" valuetype="data" /></video>
      <audio src="a.ismv" systemLanguage="en"><param name="trackID" value="1" valuetype="data" /></audio>
      <textstream src="c.vtt" systemLanguage="en" />
    </switch>
  </body>
</smil>"#;

/// Video and audio multiplexed in one Smooth file.
pub const MUXED_ISM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<smil xmlns="http://www.w3.org/2001/SMIL20/Language">
  <body>
    <switch>
      <video src="lecture.ismv"><param name="trackID" value="1" valuetype="data" /></video>
      <audio src="lecture.ismv"><param name="trackID" value="2" valuetype="data" /></audio>
    </switch>
  </body>
</smil>"#;

/// Video and audio in separate Smooth files sharing a base name.
pub const SPLIT_SMOOTH_ISM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<smil xmlns="http://www.w3.org/2001/SMIL20/Language">
  <body>
    <switch>
      <video src="lecture.ismv"><param name="trackID" value="1" valuetype="data" /></video>
      <audio src="lecture.isma"><param name="trackID" value="2" valuetype="data" /></audio>
    </switch>
  </body>
</smil>"#;

/// Separate objects whose audio declares a language list.
pub const LANGUAGE_LIST_ISM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<smil xmlns="http://www.w3.org/2001/SMIL20/Language">
  <body>
    <switch>
      <video src="v.ismv"><param name="trackID" value="1" valuetype="data" /></video>
      <audio src="a.ismv" systemLanguage="en,fr"><param name="trackID" value="1" valuetype="data" /></audio>
    </switch>
  </body>
</smil>"#;

// ---------------------------------------------------------------------------
// Log capture
// ---------------------------------------------------------------------------

/// Collects formatted log output for the current thread.
#[derive(Clone, Default)]
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Install a subscriber writing into a fresh capture. Logs are captured
    /// until the guard drops.
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_ansi(false)
            .finish();
        (capture, tracing::subscriber::set_default(subscriber))
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.buf.lock())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
