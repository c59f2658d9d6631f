//! Benchmarks for live-archive fragment rewriting.
//!
//! Measures the `tfxd` -> `tfdt` rewrite per fragment and per stream, and
//! caption timestamp shifting.

use af_media::boxes::{children, fullbox_header, write_box, BoxType};
use af_media::fragment::{rewrite_moof, FragmentStats, Timeline, TFXD_UUID};
use af_media::vtt::shift_cues;
use af_media::{fix_live_video, rebase_live_audio};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

/// A Smooth fragment with `samples` trun entries and `mdat_size` media bytes.
fn smooth_fragment(time: u64, samples: u32, mdat_size: usize) -> Vec<u8> {
    let mfhd = write_box(BoxType::MFHD, &[0, 0, 0, 0, 0, 0, 0, 1]);

    let mut tfhd = fullbox_header(0, 0).to_vec();
    tfhd.extend_from_slice(&1u32.to_be_bytes());

    // data offset + per-sample duration and size
    let mut trun = fullbox_header(0, 0x01 | 0x100 | 0x200).to_vec();
    trun.extend_from_slice(&samples.to_be_bytes());
    trun.extend_from_slice(&0i32.to_be_bytes());
    for _ in 0..samples {
        trun.extend_from_slice(&1024u32.to_be_bytes());
        trun.extend_from_slice(&((mdat_size as u32) / samples.max(1)).to_be_bytes());
    }

    let mut tfxd = TFXD_UUID.to_vec();
    tfxd.extend_from_slice(&fullbox_header(1, 0));
    tfxd.extend_from_slice(&time.to_be_bytes());
    tfxd.extend_from_slice(&(samples as u64 * 1024).to_be_bytes());

    let traf = write_box(
        BoxType::TRAF,
        &[
            write_box(BoxType::TFHD, &tfhd),
            write_box(BoxType::TRUN, &trun),
            write_box(BoxType::UUID, &tfxd),
        ]
        .concat(),
    );
    let moof = write_box(BoxType::MOOF, &[mfhd, traf].concat());
    [moof, write_box(BoxType::MDAT, &vec![0u8; mdat_size])].concat()
}

fn bench_rewrite_moof(c: &mut Criterion) {
    let mut group = c.benchmark_group("rewrite_moof");

    for samples in [1u32, 48, 240] {
        let fragment = smooth_fragment(44, samples, 64 * 1024);
        let moof = children(&fragment).unwrap().remove(0);
        let payload = moof.payload.to_vec();
        let size = moof.bytes.len() as u64;

        group.bench_function(format!("samples_{}", samples), |b| {
            b.iter(|| {
                let mut stats = FragmentStats::default();
                let rewritten = rewrite_moof(
                    black_box(&payload),
                    size,
                    Timeline::Rebase { from: 44, to: 5 },
                    &mut stats,
                )
                .unwrap();
                black_box(rewritten)
            });
        });
    }

    group.finish();
}

fn bench_stream_rewrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_rewrite");
    let rt = tokio::runtime::Runtime::new().unwrap();

    // 30 two-second fragments, roughly a minute of archive
    let stream: Vec<u8> = (0..30u64)
        .flat_map(|i| smooth_fragment(44 + i * 96_000, 94, 256 * 1024))
        .collect();
    group.throughput(Throughput::Bytes(stream.len() as u64));

    group.bench_function("fix_live_video", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut reader = stream.as_slice();
                let mut out = Vec::with_capacity(stream.len());
                let stats = fix_live_video(&mut reader, &mut out).await.unwrap();
                black_box((stats, out))
            })
        });
    });

    group.bench_function("rebase_live_audio", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut reader = stream.as_slice();
                let mut out = Vec::with_capacity(stream.len());
                let stats = rebase_live_audio(&mut reader, &mut out, 44, 5)
                    .await
                    .unwrap();
                black_box((stats, out))
            })
        });
    });

    group.finish();
}

fn bench_shift_cues(c: &mut Criterion) {
    let mut group = c.benchmark_group("shift_cues");

    for cues in [10usize, 500, 5000] {
        let mut vtt = String::from("WEBVTT\n\n");
        for i in 0..cues as u64 {
            let start = i * 2000;
            vtt.push_str(&format!(
                "{} --> {}\nCue number {}\n\n",
                af_media::vtt::format_timestamp(start, true),
                af_media::vtt::format_timestamp(start + 1500, true),
                i
            ));
        }

        group.throughput(Throughput::Bytes(vtt.len() as u64));
        group.bench_function(format!("cues_{}", cues), |b| {
            b.iter(|| black_box(shift_cues(black_box(&vtt), 2500)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_rewrite_moof,
    bench_stream_rewrite,
    bench_shift_cues
);
criterion_main!(benches);
