// gpu/mod.rs — wgpu compute layer.
//
// The GPU pipeline mirrors the CPU algorithms in `histeq` kernel-for-
// kernel. The CPU implementations remain the authoritative reference —
// every kernel is validated against them bin-for-bin in tests.
//
// Host orchestration is deliberately sequential: each kernel is submitted
// and waited on before the next, with its intermediate buffer read back.
// There is no scheduling, no overlap, no retry — errors propagate to the
// caller and stop the run.

pub mod device;
pub mod equalize;
pub mod timing;
