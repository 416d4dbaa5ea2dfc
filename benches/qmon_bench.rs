use criterion::{Criterion, black_box, criterion_group, criterion_main};

use qmon::models::{Job, JobState, QueueSnapshot};
use qmon::render::render_queue;
use qmon::store::diff_queue;

fn snapshot(count: usize, offset: usize) -> QueueSnapshot {
    let states = [
        JobState::Queued,
        JobState::Downloading,
        JobState::Paused,
        JobState::Extracting,
    ];
    QueueSnapshot::new(
        (0..count)
            .map(|i| Job {
                id: format!("job{}", i + offset),
                name: if i % 3 == 0 {
                    format!("Movie.{}.1080p", i)
                } else {
                    format!("Show.S{:02}E{:02}", i % 20, i % 50)
                },
                state: states[(i + offset) % states.len()],
                downloaded_bytes: (i as u64) * 1_000_000,
                total_bytes: 4_000_000_000,
                speed_bps: 2_500_000,
                ..Job::default()
            })
            .collect(),
    )
}

fn benchmark_render_queue(c: &mut Criterion) {
    let snap = snapshot(5000, 0);
    c.bench_function("render 5000 jobs, no filter", |b| {
        b.iter(|| render_queue(black_box(&snap), "", 3, 20))
    });
    c.bench_function("render 5000 jobs, filtered", |b| {
        b.iter(|| render_queue(black_box(&snap), "movie", 7, 50))
    });
}

fn benchmark_diff_queue(c: &mut Criterion) {
    let prev = snapshot(5000, 0);
    let next = snapshot(5000, 100);
    c.bench_function("diff 5000 jobs", |b| {
        b.iter(|| diff_queue(black_box(&prev), black_box(&next)))
    });
}

criterion_group!(benches, benchmark_render_queue, benchmark_diff_queue);
criterion_main!(benches);
