use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use hermes_wake::audio::{FrameBuffer, decode_payload, encode_wav, pcm_to_samples, samples_to_pcm};
use std::hint::black_box;

const SAMPLE_RATE: u32 = 16_000;

/// One second of a 440 Hz tone.
fn tone() -> Vec<i16> {
    (0..SAMPLE_RATE)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            ((t * 440.0 * std::f32::consts::TAU).sin() * 8_000.0) as i16
        })
        .collect()
}

/// Chunk sizes seen from audio servers: odd sizes force carry-over.
fn bench_framing(c: &mut Criterion) {
    let pcm = samples_to_pcm(&tone());
    let mut group = c.benchmark_group("frame_buffer");

    for chunk_size in [512usize, 1600, 2048, 4410] {
        group.bench_with_input(
            BenchmarkId::from_parameter(chunk_size),
            &chunk_size,
            |b, &chunk_size| {
                b.iter(|| {
                    let mut buffer = FrameBuffer::new(2048);
                    let mut frames = 0;
                    for chunk in pcm.chunks(chunk_size) {
                        for frame in buffer.push("default", black_box(chunk)).unwrap_or_default() {
                            frames += pcm_to_samples(&frame).len();
                        }
                    }
                    black_box(frames)
                })
            },
        );
    }

    group.finish();
}

fn bench_decode_payload(c: &mut Criterion) {
    let samples = tone();
    let raw = samples_to_pcm(&samples[..1024]);
    let wav = encode_wav(&samples[..1024], SAMPLE_RATE).unwrap_or_default();
    let wav_44k = encode_wav(&samples[..2822], 44_100).unwrap_or_default();

    let mut group = c.benchmark_group("decode_payload");
    group.bench_function("raw_pcm", |b| {
        b.iter(|| decode_payload(black_box(&raw), SAMPLE_RATE).map(|pcm| pcm.len()))
    });
    group.bench_function("wav_16k", |b| {
        b.iter(|| decode_payload(black_box(&wav), SAMPLE_RATE).map(|pcm| pcm.len()))
    });
    group.bench_function("wav_44k_resampled", |b| {
        b.iter(|| decode_payload(black_box(&wav_44k), SAMPLE_RATE).map(|pcm| pcm.len()))
    });
    group.finish();
}

criterion_group!(benches, bench_framing, bench_decode_payload);
criterion_main!(benches);
