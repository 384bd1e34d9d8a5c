// lumeq — GPU histogram equalization.
//
// Host-side driver for a fixed pipeline of compute kernels:
//   histogram → cumulative histogram (three scan strategies, compared) →
//   LUT normalization → per-pixel back-projection.
//
// The CPU implementations in `histeq` are the authoritative reference —
// every GPU kernel in `gpu::equalize` is validated against them bin-for-bin
// and pixel-for-pixel.

pub mod color;
pub mod histeq;
pub mod image;

pub mod gpu;
