use criterion::{Criterion, black_box, criterion_group, criterion_main};
use pocket_stream::config::{GenerationConfig, PlaybackConfig};
use pocket_stream::playback::{PlaybackRing, PlayerEvent};
use pocket_stream::text::{WordTokenizer, chunk_text, normalize};
use pocket_stream::{GenerationEngine, SyntheticModel, prepare_chunks};
use std::sync::Arc;

const PASSAGE: &str = "Dr. Smith paid $19.99 on 3/14/2024 at 3:05 PM. Call 555-123-4567 \
    for the 2nd edition, which covers 1,250 pages and 42% more examples than the 1st. \
    The quick brown fox jumps over the lazy dog while the band plays on.";

fn bench_text(c: &mut Criterion) {
    c.bench_function("normalize_passage", |b| {
        b.iter(|| normalize(black_box(PASSAGE)))
    });

    let tokenizer = WordTokenizer::new();
    let normalized = normalize(PASSAGE).repeat(8);
    c.bench_function("chunk_long_passage", |b| {
        b.iter(|| chunk_text(black_box(&normalized), &tokenizer, 50).expect("chunking failed"))
    });
}

fn bench_ring(c: &mut Criterion) {
    let config = PlaybackConfig::default();
    let mut ring = PlaybackRing::new(&config, 24_000);
    let segment = vec![0.1f32; 1920 * 12];
    let mut out = vec![0.0f32; 128];
    let mut sink = |_: PlayerEvent| {};

    c.bench_function("ring_push_render_segment", |b| {
        b.iter(|| {
            ring.push(black_box(&segment), &mut sink);
            for _ in 0..segment.len() / out.len() {
                ring.render(&mut out, &mut sink);
            }
        })
    });
}

fn bench_synthetic_generation(c: &mut Criterion) {
    let cfg = GenerationConfig {
        seed: Some(0),
        ..Default::default()
    };
    let model = SyntheticModel::new(cfg.latent_dim, cfg.samples_per_frame, cfg.sample_rate);
    let voice = model.voice().expect("voice");
    let tokenizer = Arc::new(WordTokenizer::new());
    let chunks = prepare_chunks("Hello, this is a test for latency.", tokenizer.as_ref(), 50)
        .expect("chunks");
    let mut engine = GenerationEngine::new(model.ports(), tokenizer, cfg);

    c.bench_function("synthetic_first_segment", |b| {
        b.iter(|| {
            let mut first = None;
            engine
                .run(&voice, &chunks, &mut || None, &mut |segment| {
                    if first.is_none() {
                        first = Some(segment.samples.len());
                    }
                })
                .expect("generation failed");
            first
        })
    });
}

criterion_group!(benches, bench_text, bench_ring, bench_synthetic_generation);
criterion_main!(benches);
