use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tickseq::{Chan, Ev, EvSpec, SeqPtr, Track};

/// Builds a track of back-to-back eighth notes over `count` pitches.
fn note_track(count: u32, offset: u32) -> Track {
    let mut t = Track::new();
    let mut sp = SeqPtr::new(&t);
    let chan = Chan::new(0, 0);
    let mut last = 0;
    for i in 0..count {
        let tic = offset + i * 48;
        let pitch = 36 + (i % 48) as u8;
        sp.seek(&mut t, tic - last);
        sp.evput(
            &mut t,
            &Ev::NoteOn {
                chan,
                pitch,
                vel: 100,
            },
        );
        sp.seek(&mut t, 24);
        sp.evput(&mut t, &Ev::NoteOff { chan, pitch });
        last = tic + 24;
    }
    t
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    for size in [256, 1024, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let src = note_track(size, 13);
            b.iter(|| {
                let mut dst = note_track(size, 0);
                dst.merge(&src);
                black_box(dst.num_tics())
            });
        });
    }
    group.finish();
}

fn bench_quantize(c: &mut Criterion) {
    c.bench_function("quantize_1024_notes", |b| {
        b.iter(|| {
            let mut t = note_track(1024, 7);
            t.quantize(0, t.num_tics() + 96, 0, 96, 100);
            black_box(t.num_tics())
        });
    });
}

fn bench_check(c: &mut Criterion) {
    c.bench_function("check_1024_notes", |b| {
        b.iter(|| {
            let mut t = note_track(1024, 0);
            t.check();
            black_box(t.num_tics())
        });
    });
}

fn bench_copy(c: &mut Criterion) {
    c.bench_function("copy_1024_notes", |b| {
        let src = note_track(1024, 0);
        let len = src.num_tics();
        b.iter(|| {
            let mut src = note_track(1024, 0);
            let mut dst = Track::new();
            src.move_range(0, len, &EvSpec::ANY, Some(&mut dst), false);
            black_box(dst.num_tics())
        });
    });
}

criterion_group!(benches, bench_merge, bench_quantize, bench_check, bench_copy);
criterion_main!(benches);
