// tests/test_equalize.rs — Integration tests for the CPU equalization
// pipeline through the public API.
//
// These run with `cargo test --test test_equalize`.
// The GPU path is exercised by the subprocess-isolated tests inside
// src/gpu/equalize.rs; everything here is host-only and always runs.

use lumeq::color;
use lumeq::histeq;
use lumeq::image::Image;

/// Deterministic pseudo-random image (LCG).
fn noise_image(w: usize, h: usize, seed: u32) -> Image<u8> {
    let mut rng = seed;
    let pixels: Vec<u8> = (0..w * h)
        .map(|_| {
            rng = rng.wrapping_mul(1664525).wrapping_add(1013904223);
            (rng >> 24) as u8
        })
        .collect();
    Image::from_vec(w, h, pixels)
}

/// Low-contrast gradient: every pixel in [100, 160).
fn low_contrast_image(w: usize, h: usize) -> Image<u8> {
    let mut img = Image::new(w, h);
    for y in 0..h {
        for x in 0..w {
            img.set(x, y, 100 + ((x + y) * 60 / (w + h)) as u8);
        }
    }
    img
}

// ===== End-to-end pipeline properties =====

#[test]
fn equalize_expands_low_contrast_range() {
    let img = low_contrast_image(64, 64);
    let out = histeq::equalize(&img, 256);

    let (in_min, in_max) = min_max(&img);
    let (out_min, out_max) = min_max(&out);
    assert!(
        (out_max as i32 - out_min as i32) > (in_max as i32 - in_min as i32),
        "output range [{out_min}, {out_max}] should exceed input [{in_min}, {in_max}]"
    );
    // The brightest bin always lands at full scale.
    assert_eq!(out_max, 255);
}

#[test]
fn equalize_preserves_intensity_ordering() {
    let img = noise_image(48, 32, 7);
    let out = histeq::equalize(&img, 256);

    for y in 0..img.height() {
        for x in 1..img.width() {
            let a_in = img.get(x - 1, y);
            let b_in = img.get(x, y);
            let a_out = out.get(x - 1, y);
            let b_out = out.get(x, y);
            if a_in <= b_in {
                assert!(a_out <= b_out, "ordering broken at ({x},{y})");
            } else {
                assert!(a_out >= b_out, "ordering broken at ({x},{y})");
            }
        }
    }
}

#[test]
fn equalize_constant_image_is_constant() {
    let img = Image::from_vec(16, 16, vec![42u8; 256]);
    let out = histeq::equalize(&img, 256);
    // Every pixel is in the same bin, so the flat cdf maps it to 255.
    assert!(out.pixels().all(|p| p == 255));
}

#[test]
fn equalize_is_idempotent_on_full_range_ramp() {
    // A perfect 0..=255 ramp already has a uniform histogram; equalizing
    // it should be (near-)identity.
    let img = Image::from_vec(256, 1, (0u8..=255).collect());
    let out = histeq::equalize(&img, 256);
    for x in 0..256 {
        let diff = (out.get(x, 0) as i32 - img.get(x, 0) as i32).abs();
        assert!(diff <= 1, "x={x}: {} vs {}", out.get(x, 0), img.get(x, 0));
    }
}

#[test]
fn coarse_bins_quantize_output() {
    let img = noise_image(64, 64, 99);
    let out = histeq::equalize(&img, 4);

    // With 4 bins the LUT has at most 4 distinct values.
    let mut values: Vec<u8> = out.pixels().collect();
    values.sort_unstable();
    values.dedup();
    assert!(values.len() <= 4, "got {} distinct values", values.len());
}

// ===== Scan strategy agreement =====

#[test]
fn scan_strategies_agree_on_real_histogram() {
    let img = noise_image(128, 128, 3);
    let hist = histeq::histogram(&img, 256);

    let serial = histeq::scan_serial(&hist);
    let hs = histeq::scan_hillis_steele(&hist);
    let bl = histeq::scan_blelloch(&hist);

    assert_eq!(serial, hs, "both inclusive scans must agree");
    // Exclusive scan is the inclusive scan shifted one to the right.
    for i in 1..serial.len() {
        assert_eq!(bl[i], serial[i - 1], "bin {i}");
    }
    assert_eq!(bl[0], 0);
    // The last inclusive entry counts every pixel.
    assert_eq!(*serial.last().unwrap(), 128 * 128);
}

// ===== LUT invariants =====

#[test]
fn lut_is_monotonic_and_full_scale() {
    let img = noise_image(64, 64, 21);
    for n_bins in [256usize, 32, 2] {
        let hist = histeq::histogram(&img, n_bins);
        let cumulative = histeq::scan_serial(&hist);
        let lut = histeq::build_lut(&cumulative, n_bins);

        assert_eq!(lut.len(), 256);
        for i in 1..256 {
            assert!(lut[i] >= lut[i - 1], "LUT not monotonic at {i} ({n_bins} bins)");
        }
        assert_eq!(lut[255], 255, "{n_bins} bins");
    }
}

// ===== Colour pipeline =====

#[test]
fn color_equalize_preserves_hue_of_gray_pixels() {
    // A gray gradient through the colour path must come back gray.
    let w = 32;
    let h = 8;
    let mut rgb = Vec::with_capacity(w * h * 3);
    for y in 0..h {
        for x in 0..w {
            let v = (100 + (x + y) * 2) as u8;
            rgb.extend_from_slice(&[v, v, v]);
        }
    }

    let planes = color::split_ycbcr(&rgb, w, h);
    let eq_y = histeq::equalize(&planes.y, 256);
    let out = color::recombine_ycbcr(&eq_y, &planes.cb, &planes.cr);

    for (i, px) in out.chunks_exact(3).enumerate() {
        let spread = px.iter().copied().max().unwrap() as i32
            - px.iter().copied().min().unwrap() as i32;
        assert!(spread <= 4, "pixel {i} drifted off gray: {px:?}");
    }
}

#[test]
fn sixteen_bit_normalization_feeds_equalizer() {
    // 12-bit-style data: normalize to u8, then equalize. The pipeline
    // must produce full-scale output from the compressed input.
    let src = Image::<u16>::from_vec(
        64,
        1,
        (0..64u16).map(|i| 2000 + i * 10).collect(),
    );
    let gray = color::normalize_to_u8(&src);
    assert_eq!(gray.get(0, 0), 0);
    assert_eq!(gray.get(63, 0), 255);

    let out = histeq::equalize(&gray, 256);
    let (_, out_max) = min_max(&out);
    assert_eq!(out_max, 255);
}

// ===== Helpers =====

fn min_max(img: &Image<u8>) -> (u8, u8) {
    let mut lo = u8::MAX;
    let mut hi = u8::MIN;
    for p in img.pixels() {
        lo = lo.min(p);
        hi = hi.max(p);
    }
    (lo, hi)
}
