// histeq.rs — CPU reference implementation of the equalization pipeline.
//
// Histogram equalization remaps pixel intensities through the cumulative
// distribution function so the output histogram is approximately uniform.
// Four stages, mirroring the GPU kernels in gpu::equalize one-to-one:
//
//   1. histogram      — count pixels per intensity bin.
//   2. scan           — cumulative histogram (running sum over bins).
//   3. build_lut      — normalise the cumulative histogram into a
//                       256-entry intensity lookup table.
//   4. back_project   — per-pixel LUT remap.
//
// Three scan strategies are provided because the GPU side races them
// against each other:
//
//   scan_serial        — plain running sum. The result the pipeline
//                        actually consumes.
//   scan_blelloch      — work-efficient up-sweep/down-sweep. O(n) adds,
//                        produces an EXCLUSIVE scan (element i excludes
//                        bin i itself). Comparison only.
//   scan_hillis_steele — step-efficient doubling scan. O(n log n) adds
//                        but fewer steps, INCLUSIVE. Comparison only.
//
// These CPU versions reproduce the exact access pattern of their WGSL
// counterparts so the GPU tests can assert bin-for-bin equality.

use crate::image::Image;

/// Number of representable intensity values; also the LUT length.
/// Bins are a coarsening of this range, never a refinement.
pub const INTENSITY_LEVELS: usize = 256;

/// Map an intensity value to its histogram bin.
///
/// With `n_bins == 256` this is the identity. Coarser binnings divide the
/// intensity range into equal spans: `n_bins == 64` puts intensities
/// 0..=3 into bin 0.
#[inline]
pub fn bin_of(intensity: u8, n_bins: usize) -> usize {
    intensity as usize * n_bins / INTENSITY_LEVELS
}

/// Compute an `n_bins`-bin intensity histogram.
pub fn histogram(image: &Image<u8>, n_bins: usize) -> Vec<u32> {
    let mut hist = vec![0u32; n_bins];
    for v in image.pixels() {
        hist[bin_of(v, n_bins)] += 1;
    }
    hist
}

/// Inclusive running sum: `out[i] = h[0] + ... + h[i]`.
///
/// This is the cumulative histogram consumed by [`build_lut`].
pub fn scan_serial(h: &[u32]) -> Vec<u32> {
    let mut out = vec![0u32; h.len()];
    let mut acc = 0u32;
    for (o, &v) in out.iter_mut().zip(h.iter()) {
        acc += v;
        *o = acc;
    }
    out
}

/// Blelloch work-efficient scan. EXCLUSIVE: `out[i] = h[0] + ... + h[i-1]`,
/// `out[0] = 0`.
///
/// Reproduces the in-place up-sweep / down-sweep tree that the GPU kernel
/// runs across one workgroup, so results agree element-for-element.
///
/// # Panics
/// Panics if `h.len()` is not a power of two (the tree sweep assumes it,
/// on the GPU and here alike).
pub fn scan_blelloch(h: &[u32]) -> Vec<u32> {
    let n = h.len();
    assert!(n.is_power_of_two(), "Blelloch scan requires power-of-two length (got {n})");

    let mut a = h.to_vec();

    // Up-sweep: build partial sums at increasing strides.
    let mut stride = 1;
    while stride < n {
        let step = stride * 2;
        let mut i = step - 1;
        while i < n {
            a[i] = a[i].wrapping_add(a[i - stride]);
            i += step;
        }
        stride = step;
    }

    // Clear the root, then down-sweep: each node passes its value left and
    // the left+right sum right.
    a[n - 1] = 0;
    let mut stride = n / 2;
    while stride >= 1 {
        let step = stride * 2;
        let mut i = step - 1;
        while i < n {
            let left = a[i - stride];
            a[i - stride] = a[i];
            a[i] = a[i].wrapping_add(left);
            i += step;
        }
        stride /= 2;
    }

    a
}

/// Hillis–Steele doubling scan. INCLUSIVE, like [`scan_serial`].
///
/// Each round adds the value `offset` positions back, doubling `offset`
/// until it covers the whole array — the ping-pong structure of the GPU
/// kernel, reproduced with two buffers.
pub fn scan_hillis_steele(h: &[u32]) -> Vec<u32> {
    let n = h.len();
    let mut src = h.to_vec();
    let mut dst = vec![0u32; n];

    let mut offset = 1;
    while offset < n {
        for i in 0..n {
            dst[i] = if i >= offset {
                src[i].wrapping_add(src[i - offset])
            } else {
                src[i]
            };
        }
        std::mem::swap(&mut src, &mut dst);
        offset *= 2;
    }

    src
}

/// Normalise a cumulative histogram into a 256-entry lookup table.
///
/// The LUT always has [`INTENSITY_LEVELS`] entries regardless of bin
/// count: input intensity `i` reads the cumulative count of its bin and
/// scales it so the final bin (== total pixel count) maps to 255.
///
/// A constant image yields a flat cumulative histogram, so every entry
/// maps to 255 and the output is a uniform white frame.
pub fn build_lut(cumulative: &[u32], n_bins: usize) -> [u8; INTENSITY_LEVELS] {
    assert_eq!(cumulative.len(), n_bins, "cumulative length must equal n_bins");

    let mut lut = [0u8; INTENSITY_LEVELS];
    let total = *cumulative.last().expect("n_bins must be >= 1");
    if total == 0 {
        return lut;
    }

    for (i, entry) in lut.iter_mut().enumerate() {
        let c = cumulative[i * n_bins / INTENSITY_LEVELS];
        // floor(x + 0.5), not round(): WGSL round() is round-half-to-even,
        // so exact halves would diverge between the CPU and GPU tables.
        *entry = ((c as f32) * 255.0 / (total as f32) + 0.5).floor() as u8;
    }
    lut
}

/// Remap every pixel through the lookup table.
pub fn back_project(image: &Image<u8>, lut: &[u8; INTENSITY_LEVELS]) -> Image<u8> {
    let mut out = Image::new(image.width(), image.height());
    for y in 0..image.height() {
        for x in 0..image.width() {
            out.set(x, y, lut[image.get(x, y) as usize]);
        }
    }
    out
}

/// Full CPU pipeline: histogram → serial scan → LUT → back-projection.
pub fn equalize(image: &Image<u8>, n_bins: usize) -> Image<u8> {
    let hist = histogram(image, n_bins);
    let cumulative = scan_serial(&hist);
    let lut = build_lut(&cumulative, n_bins);
    back_project(image, &lut)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_image() -> Image<u8> {
        let mut img = Image::new(256, 1);
        for x in 0..256 {
            img.set(x, 0, x as u8);
        }
        img
    }

    // ---- Histogram ----------------------------------------------------------

    #[test]
    fn test_histogram_full_bins() {
        let img = ramp_image();
        let h = histogram(&img, 256);
        assert_eq!(h.len(), 256);
        assert!(h.iter().all(|&c| c == 1));
    }

    #[test]
    fn test_histogram_coarse_bins() {
        // 256 distinct values into 64 bins → 4 per bin.
        let img = ramp_image();
        let h = histogram(&img, 64);
        assert_eq!(h.len(), 64);
        assert!(h.iter().all(|&c| c == 4));
    }

    #[test]
    fn test_bin_of_boundaries() {
        assert_eq!(bin_of(0, 256), 0);
        assert_eq!(bin_of(255, 256), 255);
        assert_eq!(bin_of(0, 64), 0);
        assert_eq!(bin_of(3, 64), 0);
        assert_eq!(bin_of(4, 64), 1);
        assert_eq!(bin_of(255, 64), 63);
        assert_eq!(bin_of(255, 2), 1);
    }

    // ---- Scans --------------------------------------------------------------

    #[test]
    fn test_scan_serial_inclusive() {
        assert_eq!(scan_serial(&[1, 2, 3, 4]), vec![1, 3, 6, 10]);
        assert_eq!(scan_serial(&[5]), vec![5]);
    }

    #[test]
    fn test_scan_blelloch_is_exclusive() {
        assert_eq!(scan_blelloch(&[1, 2, 3, 4]), vec![0, 1, 3, 6]);
        // Exclusive scan == inclusive scan shifted right by one.
        let data = [3u32, 1, 4, 1, 5, 9, 2, 6];
        let incl = scan_serial(&data);
        let excl = scan_blelloch(&data);
        assert_eq!(excl[0], 0);
        for i in 1..data.len() {
            assert_eq!(excl[i], incl[i - 1], "index {i}");
        }
    }

    #[test]
    fn test_scan_hillis_steele_matches_serial() {
        let data = [3u32, 1, 4, 1, 5, 9, 2, 6, 5, 3, 5];
        assert_eq!(scan_hillis_steele(&data), scan_serial(&data));
    }

    #[test]
    fn test_scans_on_256_bins() {
        // The shape the pipeline actually runs: 256 bins.
        let data: Vec<u32> = (0..256).map(|i| (i * 7 + 3) % 101).collect();
        let incl = scan_serial(&data);
        assert_eq!(scan_hillis_steele(&data), incl);
        let excl = scan_blelloch(&data);
        for i in 1..256 {
            assert_eq!(excl[i], incl[i - 1], "index {i}");
        }
    }

    #[test]
    #[should_panic(expected = "power-of-two")]
    fn test_scan_blelloch_rejects_odd_length() {
        let _ = scan_blelloch(&[1, 2, 3]);
    }

    // ---- LUT ----------------------------------------------------------------

    #[test]
    fn test_lut_is_monotone_and_ends_at_255() {
        let img = ramp_image();
        let cumulative = scan_serial(&histogram(&img, 256));
        let lut = build_lut(&cumulative, 256);
        for i in 1..256 {
            assert!(lut[i] >= lut[i - 1], "LUT not monotone at {i}");
        }
        assert_eq!(lut[255], 255);
    }

    #[test]
    fn test_lut_coarse_bins_plateau() {
        // With 4 bins, intensities within the same span share a LUT value.
        let img = ramp_image();
        let cumulative = scan_serial(&histogram(&img, 4));
        let lut = build_lut(&cumulative, 4);
        assert_eq!(lut[0], lut[63]);
        assert_eq!(lut[64], lut[127]);
        assert_ne!(lut[63], lut[64]);
        assert_eq!(lut[255], 255);
    }

    #[test]
    fn test_lut_half_products_round_up() {
        // 1 * 255 / 510 is exactly 0.5 in f32; quantization must take it
        // upward, the same direction the kernel's floor(x + 0.5) takes.
        let cumulative = [1u32, 510];
        let lut = build_lut(&cumulative, 2);
        assert_eq!(lut[0], 1);
        assert_eq!(lut[127], 1);
        assert_eq!(lut[255], 255);
    }

    #[test]
    fn test_lut_empty_histogram() {
        let lut = build_lut(&[0u32; 256], 256);
        assert!(lut.iter().all(|&v| v == 0));
    }

    // ---- End-to-end ---------------------------------------------------------

    #[test]
    fn test_equalize_uniform_input_is_near_identity() {
        // Already-uniform distribution → the CDF is linear and the remap
        // changes each value by at most one step.
        let img = ramp_image();
        let out = equalize(&img, 256);
        for x in 0..256 {
            let diff = (out.get(x, 0) as i32 - x as i32).abs();
            assert!(diff <= 1, "pixel {x}: got {}", out.get(x, 0));
        }
    }

    #[test]
    fn test_equalize_constant_image() {
        // Flat CDF: every entry maps to 255, output is uniform white.
        let img = Image::from_vec(10, 10, vec![128u8; 100]);
        let out = equalize(&img, 256);
        assert!(out.pixels().all(|p| p == 255));
    }

    #[test]
    fn test_equalize_expands_low_contrast() {
        // Values squeezed into [100, 110] should spread across the range.
        let w = 110;
        let mut img = Image::new(w, 1);
        for x in 0..w {
            img.set(x, 0, (100 + x % 11) as u8);
        }
        let out = equalize(&img, 256);
        let min_val = out.pixels().min().unwrap();
        let max_val = out.pixels().max().unwrap();
        assert!(
            max_val - min_val > 100,
            "range {min_val}..{max_val} not expanded enough"
        );
    }

    #[test]
    fn test_equalize_preserves_ordering() {
        let img = Image::from_vec(5, 1, vec![10, 50, 100, 150, 200]);
        let out = equalize(&img, 256);
        for i in 1..5 {
            assert!(
                out.get(i, 0) >= out.get(i - 1, 0),
                "monotonicity violated at {i}"
            );
        }
    }

    #[test]
    fn test_equalize_with_coarse_bins() {
        // Fewer bins quantize the mapping but the output must stay in
        // range and ordered.
        let mut img = Image::new(64, 64);
        for y in 0..64 {
            for x in 0..64 {
                img.set(x, y, ((x * 3 + y * 5) % 256) as u8);
            }
        }
        let out = equalize(&img, 16);
        assert_eq!(out.width(), 64);
        assert_eq!(out.height(), 64);
        let lut_check = {
            let cumulative = scan_serial(&histogram(&img, 16));
            build_lut(&cumulative, 16)
        };
        for y in 0..64 {
            for x in 0..64 {
                assert_eq!(out.get(x, y), lut_check[img.get(x, y) as usize]);
            }
        }
    }
}
