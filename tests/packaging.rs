//! End-to-end packaging through local stores and scripted tools.

mod common;

use std::collections::HashMap;

use af_core::Error;
use af_source::Decryptor;
use archiveforge::assets::load_asset;
use archiveforge::batch::ItemOutcome;
use archiveforge::plan::build_input_plan;
use archiveforge::runner::{package_container, package_item};
use archiveforge::selection::select_tracks;
use assert_matches::assert_matches;
use base64::Engine;
use common::*;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn live_archive_plan_names_outputs_in_selection_order() {
    let fixture = Fixture::new();
    write_live_asset(&fixture, "live", 1000);

    let asset = load_asset(&*fixture.env().source, "live").await.unwrap();
    assert!(asset.manifest.is_live_archive);

    let selected = select_tracks(&asset.manifest, asset.client_manifest.as_ref());
    assert_eq!(selected.len(), 3);

    let plan = build_input_plan(asset.manifest.base_name(), &selected);
    assert_eq!(plan.outputs(), vec!["live_0.mp4", "live_1.mp4", "live_2.vtt"]);
    assert_eq!(plan.dash_manifest(), "live.mpd");
    assert_eq!(plan.hls_manifest(), "live.m3u8");
}

#[cfg(unix)]
mod unix {
    use super::*;

    #[tokio::test]
    async fn staged_live_archive_is_rebased_and_uploaded() {
        let mut fixture = Fixture::new();
        fixture.packager(COPYING_PACKAGER);
        write_live_asset(&fixture, "live", 1000);

        let report = package_container(&fixture.env(), "live", &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.exit_code, Some(0));
        assert_eq!(report.sync.video_start_time, 1000);
        assert_eq!(report.sync.video_time_scale, 10_000_000);
        assert_eq!(report.sync.audio_start_time, 44);
        assert_eq!(report.sync.audio_time_scale, 48_000);
        assert_eq!(report.sync.video_start_time_in_audio_time_scale, 5);
        assert!(!report.sync.audio_has_discontinuities);
        assert_eq!(report.uploaded, 5);

        let video = std::fs::read(fixture.output_path("live", "live_0.mp4")).unwrap();
        assert_eq!(decode_times(&video), vec![1000, 20_001_000, 40_001_000]);

        let audio = std::fs::read(fixture.output_path("live", "live_1.mp4")).unwrap();
        assert_eq!(decode_times(&audio), vec![5, 96_005]);

        let captions = std::fs::read_to_string(fixture.output_path("live", "live_2.vtt")).unwrap();
        assert!(captions.starts_with("WEBVTT"));
        assert!(captions.contains("00:00:00.500 --> 00:00:01.500"));
        assert!(captions.contains("00:00:02.500 --> 00:00:03.500"));

        assert!(fixture.output_path("live", "live.mpd").exists());
        assert!(fixture.output_path("live", "live.m3u8").exists());
    }

    #[tokio::test]
    async fn late_video_start_shifts_audio_and_captions() {
        let mut fixture = Fixture::new();
        fixture.packager(COPYING_PACKAGER);
        write_live_asset(&fixture, "late", 25_000_000);

        let report = package_container(&fixture.env(), "late", &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.sync.video_start_time_in_audio_time_scale, 120_000);

        let audio = std::fs::read(fixture.output_path("late", "live_1.mp4")).unwrap();
        assert_eq!(decode_times(&audio), vec![120_000, 216_000]);

        let captions = std::fs::read_to_string(fixture.output_path("late", "live_2.vtt")).unwrap();
        assert!(captions.contains("00:00:03.000 --> 00:00:04.000"));
        assert!(captions.contains("00:00:05.000 --> 00:00:06.000"));
    }

    #[tokio::test]
    async fn streaming_mode_matches_staged_output() {
        let mut fixture = Fixture::new();
        fixture.packager(COPYING_PACKAGER);
        fixture.config.packaging.streaming = true;
        write_live_asset(&fixture, "live", 1000);

        let report = package_container(&fixture.env(), "live", &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.sync.video_start_time_in_audio_time_scale, 5);

        let video = std::fs::read(fixture.output_path("live", "live_0.mp4")).unwrap();
        assert_eq!(decode_times(&video), vec![1000, 20_001_000, 40_001_000]);
        let audio = std::fs::read(fixture.output_path("live", "live_1.mp4")).unwrap();
        assert_eq!(decode_times(&audio), vec![5, 96_005]);
        let captions = std::fs::read_to_string(fixture.output_path("live", "live_2.vtt")).unwrap();
        assert!(captions.contains("00:00:02.500 --> 00:00:03.500"));
    }

    #[tokio::test]
    async fn audio_gap_is_reported() {
        let mut fixture = Fixture::new();
        fixture.packager(COPYING_PACKAGER);
        write_live_asset(&fixture, "gap", 1000);
        // Second fragment claims a start well past the end of the first.
        fixture.put("gap", "audio/96044", fragment(200_000, 96_000));

        let report = package_container(&fixture.env(), "gap", &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.success);
        assert!(report.sync.audio_has_discontinuities);
    }

    #[tokio::test]
    async fn packager_failure_is_reported_not_raised() {
        let mut fixture = Fixture::new();
        fixture.packager(FAILING_PACKAGER);
        write_live_asset(&fixture, "live", 1000);
        let env = fixture.env();
        let (logs, _guard) = LogCapture::install();

        let report = package_container(&env, "live", &CancellationToken::new())
            .await
            .unwrap();
        assert!(!report.success);
        assert_eq!(report.exit_code, Some(2));
        assert_eq!(report.uploaded, 0);
        assert!(report
            .errors
            .iter()
            .any(|line| line.contains("Packaging failed")));
        assert!(!fixture.output_path("live", "live.mpd").exists());

        let lines = logs.lines();
        assert!(
            lines.iter().any(|line| line.contains("ERROR")
                && line.contains("Packaging failed")
                && line.contains("exit_code=Some(2)")),
            "{lines:#?}"
        );

        let outcome = package_item(&env, "live", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ItemOutcome::Failed("packager exited with code 2".into())
        );
    }

    #[tokio::test]
    async fn missing_fragment_fails_the_asset() {
        let mut fixture = Fixture::new();
        fixture.packager(COPYING_PACKAGER);
        write_live_asset(&fixture, "broken", 1000);
        std::fs::remove_file(fixture.source_root().join("broken/audio/96044")).unwrap();

        let err = package_container(&fixture.env(), "broken", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(err, Error::Reconstruction { .. });
        assert!(!fixture.output_path("broken", "live.mpd").exists());
    }

    #[tokio::test]
    async fn muxed_smooth_file_is_demuxed_per_track() {
        let mut fixture = Fixture::new();
        fixture.packager(COPYING_PACKAGER);
        fixture.ffmpeg(LABELLING_FFMPEG);
        fixture.config.packaging.transmux_smooth = true;
        fixture.put("vod", "lecture.ism", MUXED_ISM);
        fixture.put("vod", "lecture.ismv", b"muxed");

        let report = package_container(&fixture.env(), "vod", &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.outputs, vec!["lecture_0.mp4", "lecture_1.mp4"]);

        let video = std::fs::read_to_string(fixture.output_path("vod", "lecture_0.mp4")).unwrap();
        let audio = std::fs::read_to_string(fixture.output_path("vod", "lecture_1.mp4")).unwrap();
        assert_eq!(video, "track 1");
        assert_eq!(audio, "track 2");
    }

    async fn package_split_smooth(streaming: bool) {
        let mut fixture = Fixture::new();
        fixture.packager(COPYING_PACKAGER);
        fixture.ffmpeg(LABELLING_FFMPEG);
        fixture.config.packaging.transmux_smooth = true;
        fixture.config.packaging.streaming = streaming;
        fixture.put("split", "lecture.ism", SPLIT_SMOOTH_ISM);
        fixture.put("split", "lecture.ismv", b"video");
        fixture.put("split", "lecture.isma", b"audio");

        let report = package_container(&fixture.env(), "split", &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.outputs, vec!["lecture_0.mp4", "lecture_1.mp4"]);

        let video = std::fs::read_to_string(fixture.output_path("split", "lecture_0.mp4")).unwrap();
        let audio = std::fs::read_to_string(fixture.output_path("split", "lecture_1.mp4")).unwrap();
        assert_eq!(video, "track 1");
        assert_eq!(audio, "track 2");
    }

    #[tokio::test]
    async fn split_smooth_files_demux_to_separate_inputs() {
        package_split_smooth(false).await;
    }

    #[tokio::test]
    async fn split_smooth_files_stream_to_separate_pipes() {
        package_split_smooth(true).await;
    }

    #[tokio::test]
    async fn rejected_packager_arguments_fail_the_item() {
        let mut fixture = Fixture::new();
        fixture.packager(COPYING_PACKAGER);
        fixture.config.packaging.transmux_smooth = false;
        fixture.put("langs", "lecture.ism", LANGUAGE_LIST_ISM);
        fixture.put("langs", "v.ismv", b"video");
        fixture.put("langs", "a.ismv", b"audio");

        let outcome = package_item(&fixture.env(), "langs", &CancellationToken::new())
            .await
            .unwrap();
        assert_matches!(outcome, ItemOutcome::Failed(reason) if reason.contains("en,fr"));
    }

    #[tokio::test]
    async fn encrypted_objects_are_decrypted_before_packaging() {
        let mut fixture = Fixture::new();
        fixture.packager(COPYING_PACKAGER);
        fixture.config.packaging.transmux_smooth = false;

        let key = [7u8; 16];
        let encrypt = |plain: &[u8], iv: u64| {
            let mut data = plain.to_vec();
            Decryptor::new(&key, iv).unwrap().apply(&mut data);
            data
        };
        fixture.put("secret", "lecture.ism", VOD_ISM);
        fixture.put("secret", "v.ismv", encrypt(b"video bytes", 1));
        fixture.put("secret", "a.ismv", encrypt(b"audio bytes", 2));
        fixture.put("secret", "c.vtt", encrypt(b"WEBVTT\n", 3));
        let ivs = HashMap::from([("v.ismv", 1u64), ("a.ismv", 2), ("c.vtt", 3)]);
        fixture.put(
            "secret",
            "asset.json",
            serde_json::json!({
                "storage_encryption": {
                    "key": base64::engine::general_purpose::STANDARD.encode(key),
                    "ivs": ivs,
                }
            })
            .to_string(),
        );

        let report = package_container(&fixture.env(), "secret", &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(
            std::fs::read(fixture.output_path("secret", "lecture_0.mp4")).unwrap(),
            b"video bytes"
        );
        assert_eq!(
            std::fs::read(fixture.output_path("secret", "lecture_1.mp4")).unwrap(),
            b"audio bytes"
        );
        assert_eq!(
            std::fs::read_to_string(fixture.output_path("secret", "lecture_2.vtt")).unwrap(),
            "WEBVTT\n"
        );
    }

    #[tokio::test]
    async fn working_directory_is_removed_afterwards() {
        let mut fixture = Fixture::new();
        fixture.packager(COPYING_PACKAGER);
        write_live_asset(&fixture, "live", 1000);

        package_container(&fixture.env(), "live", &CancellationToken::new())
            .await
            .unwrap();
        let leftovers = std::fs::read_dir(&fixture.config.storage.working_root)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }
}

#[tokio::test]
async fn missing_container_is_skipped() {
    let fixture = Fixture::new();
    let outcome = package_item(&fixture.env(), "nowhere", &CancellationToken::new())
        .await
        .unwrap();
    assert_matches!(outcome, ItemOutcome::Skipped(_));
}

#[tokio::test]
async fn asset_without_packageable_tracks_is_skipped() {
    let fixture = Fixture::new();
    fixture.put(
        "notes",
        "notes.ism",
        r#"<smil><body><switch><textstream src="notes.txt" /></switch></body></smil>"#,
    );

    let outcome = package_item(&fixture.env(), "notes", &CancellationToken::new())
        .await
        .unwrap();
    assert_matches!(outcome, ItemOutcome::Skipped(reason) if reason.contains("no packageable tracks"));
}

#[tokio::test]
async fn missing_packager_is_fatal() {
    let fixture = Fixture::new();
    write_live_asset(&fixture, "live", 1000);

    let err = package_container(&fixture.env(), "live", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_matches!(err, Error::Tool { .. });
    assert!(err.is_fatal());
}
