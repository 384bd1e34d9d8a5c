// color.rs — Colour-space glue around the grayscale equalization core.
//
// Equalization operates on a single intensity channel. Colour inputs are
// split into YCbCr, only the luma plane is equalized, and the untouched
// chroma planes are recombined afterwards. Equalizing R/G/B independently
// would shift hues; remapping luma alone preserves them.
//
// The conversion uses the integer BT.601 studio-range approximation
// (Y in [16, 235], Cb/Cr in [16, 240]), so a u8 round trip stays within
// ±1 of the input.
//
// Also here: range normalization of 16-bit sources down to the 8-bit
// working range, for inputs whose samples exceed 255.

use crate::image::Image;

/// A colour frame split into planar YCbCr components.
///
/// Produced by [`split_ycbcr`]; the `y` plane is what the equalization
/// pipeline consumes.
pub struct YCbCr {
    pub y: Image<u8>,
    pub cb: Image<u8>,
    pub cr: Image<u8>,
}

/// Split an interleaved RGB buffer into planar YCbCr.
///
/// `rgb` is tightly packed `[r, g, b, r, g, b, ...]`, row-major,
/// `width * height * 3` bytes.
///
/// # Panics
/// Panics if `rgb.len() != width * height * 3`.
pub fn split_ycbcr(rgb: &[u8], width: usize, height: usize) -> YCbCr {
    assert_eq!(
        rgb.len(),
        width * height * 3,
        "rgb length ({}) must equal width * height * 3 ({})",
        rgb.len(),
        width * height * 3,
    );

    let mut y = Image::new(width, height);
    let mut cb = Image::new(width, height);
    let mut cr = Image::new(width, height);

    for row in 0..height {
        for col in 0..width {
            let i = (row * width + col) * 3;
            let r = rgb[i] as i32;
            let g = rgb[i + 1] as i32;
            let b = rgb[i + 2] as i32;

            // Integer BT.601: the +128 term rounds the >>8 division.
            let yv = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
            let cbv = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
            let crv = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;

            y.set(col, row, yv.clamp(0, 255) as u8);
            cb.set(col, row, cbv.clamp(0, 255) as u8);
            cr.set(col, row, crv.clamp(0, 255) as u8);
        }
    }

    YCbCr { y, cb, cr }
}

/// Recombine planar YCbCr into an interleaved RGB buffer.
///
/// Inverse of [`split_ycbcr`]. Typically called with the *equalized* luma
/// plane and the original chroma planes.
///
/// # Panics
/// Panics if the three planes do not share the same dimensions.
pub fn recombine_ycbcr(y: &Image<u8>, cb: &Image<u8>, cr: &Image<u8>) -> Vec<u8> {
    assert!(
        y.width() == cb.width()
            && y.width() == cr.width()
            && y.height() == cb.height()
            && y.height() == cr.height(),
        "YCbCr planes must share dimensions",
    );

    let width = y.width();
    let height = y.height();
    let mut rgb = vec![0u8; width * height * 3];

    for row in 0..height {
        for col in 0..width {
            let yv = y.get(col, row) as i32 - 16;
            let cbv = cb.get(col, row) as i32 - 128;
            let crv = cr.get(col, row) as i32 - 128;

            let r = (298 * yv + 409 * crv + 128) >> 8;
            let g = (298 * yv - 100 * cbv - 208 * crv + 128) >> 8;
            let b = (298 * yv + 516 * cbv + 128) >> 8;

            let i = (row * width + col) * 3;
            rgb[i] = r.clamp(0, 255) as u8;
            rgb[i + 1] = g.clamp(0, 255) as u8;
            rgb[i + 2] = b.clamp(0, 255) as u8;
        }
    }

    rgb
}

/// Linearly map a 16-bit image's value range onto [0, 255].
///
/// The source min maps to 0 and the source max to 255; intermediate
/// values are scaled and rounded. A constant image (zero range) maps to
/// all zeros.
pub fn normalize_to_u8(src: &Image<u16>) -> Image<u8> {
    let mut dst = Image::new(src.width(), src.height());
    if src.num_pixels() == 0 {
        return dst;
    }

    let mut lo = u16::MAX;
    let mut hi = u16::MIN;
    for v in src.pixels() {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if lo == hi {
        return dst;
    }

    let range = (hi - lo) as f32;
    for row in 0..src.height() {
        for col in 0..src.width() {
            let v = (src.get(col, row) - lo) as f32 / range * 255.0;
            dst.set(col, row, v.round() as u8);
        }
    }
    dst
}

/// Bring a 16-bit image into the 8-bit working range.
///
/// Sources whose samples all fit in 8 bits pass through value-for-value
/// (a nominally 16-bit file holding 8-bit data must not be stretched);
/// anything wider is range-normalized with [`normalize_to_u8`].
pub fn compact_to_u8(src: &Image<u16>) -> Image<u8> {
    match src.max_value() {
        Some(m) if m > 255 => normalize_to_u8(src),
        _ => {
            let data: Vec<u8> = src.pixels().map(|v| v as u8).collect();
            Image::from_vec(src.width(), src.height(), data)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
