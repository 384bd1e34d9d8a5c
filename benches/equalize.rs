// benches/equalize.rs -- Per-stage benchmarks of the CPU reference
// pipeline.
//
//   cargo bench
//
// GPU dispatch times are reported by the driver itself (per-kernel
// timestamps); these benches cover the host-side reference the GPU
// results are validated against, plus the colour-conversion glue.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use lumeq::color;
use lumeq::histeq;
use lumeq::image::Image;

// ============================================================
// Helpers
// ============================================================

/// Synthetic low-contrast scene: a gradient compressed into the middle
/// of the intensity range, plus a few brighter rectangles. Histogram
/// equalization has real work to do on this.
fn make_scene(w: usize, h: usize) -> Image<u8> {
    let mut img = Image::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let base = 80 + ((x * 60 / w) + (y * 30 / h)) as u8;
            img.set(x, y, base);
        }
    }
    for rect in 0..6 {
        let rx = (50 + rect * 100) % w;
        let ry = (40 + (rect % 3) * 120) % h;
        let bright = 150u8 + rect as u8 * 5;
        for y in ry..(ry + 60).min(h) {
            for x in rx..(rx + 80).min(w) {
                img.set(x, y, bright);
            }
        }
    }
    img
}

/// Interleaved RGB version of the synthetic scene.
fn make_rgb_scene(w: usize, h: usize) -> Vec<u8> {
    let gray = make_scene(w, h);
    let mut rgb = Vec::with_capacity(w * h * 3);
    for y in 0..h {
        for x in 0..w {
            let v = gray.get(x, y);
            rgb.push(v);
            rgb.push(v.wrapping_add((x % 17) as u8));
            rgb.push(v.wrapping_sub((y % 13) as u8));
        }
    }
    rgb
}

// ============================================================
// Per-stage benchmarks
// ============================================================

fn bench_histogram(c: &mut Criterion) {
    let img = make_scene(1024, 768);

    let mut group = c.benchmark_group("histogram");
    for &n_bins in &[256usize, 64, 8] {
        group.bench_function(BenchmarkId::new("1024x768", n_bins), |b| {
            b.iter(|| histeq::histogram(&img, n_bins))
        });
    }
    group.finish();
}

fn bench_scans(c: &mut Criterion) {
    let img = make_scene(1024, 768);
    let hist = histeq::histogram(&img, 256);

    let mut group = c.benchmark_group("scan");
    group.bench_function("serial_256", |b| b.iter(|| histeq::scan_serial(&hist)));
    group.bench_function("blelloch_256", |b| b.iter(|| histeq::scan_blelloch(&hist)));
    group.bench_function("hillis_steele_256", |b| {
        b.iter(|| histeq::scan_hillis_steele(&hist))
    });
    group.finish();
}

fn bench_equalize(c: &mut Criterion) {
    let img = make_scene(1024, 768);

    let mut group = c.benchmark_group("equalize");
    group.bench_function("full_1024x768_256bins", |b| {
        b.iter(|| histeq::equalize(&img, 256))
    });
    group.finish();
}

fn bench_color(c: &mut Criterion) {
    let rgb = make_rgb_scene(1024, 768);
    let planes = color::split_ycbcr(&rgb, 1024, 768);

    let mut group = c.benchmark_group("color");
    group.bench_function("split_ycbcr_1024x768", |b| {
        b.iter(|| color::split_ycbcr(&rgb, 1024, 768))
    });
    group.bench_function("recombine_ycbcr_1024x768", |b| {
        b.iter(|| color::recombine_ycbcr(&planes.y, &planes.cb, &planes.cr))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_histogram,
    bench_scans,
    bench_equalize,
    bench_color
);
criterion_main!(benches);
