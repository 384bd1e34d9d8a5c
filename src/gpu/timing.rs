// gpu/timing.rs — per-kernel execution timing.
//
// Each compute pass gets a begin/end timestamp pair from a wgpu
// `QuerySet`, resolved after the run and converted from GPU ticks to
// nanoseconds via `queue.get_timestamp_period()`. When the adapter does
// not expose TIMESTAMP_QUERY the timer falls back to host wall clocks
// around each submit-and-wait — coarser (it includes submission
// overhead), but the driver labels the source so the numbers are never
// mistaken for one another.
//
// The fallback works because the host orchestration is sequential:
// every kernel is submitted and waited on before the next, so the wall
// interval brackets exactly one kernel.

use std::fmt;
use std::time::Duration;

use crate::gpu::device::GpuDevice;

// ---------------------------------------------------------------------------
// PassTiming
// ---------------------------------------------------------------------------

/// Where a timing number came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingSource {
    /// GPU timestamp counters: kernel execution only.
    GpuTimestamp,
    /// Host wall clock around submit + wait: includes queue overhead.
    HostWallClock,
}

/// One kernel's measured execution time.
#[derive(Debug, Clone)]
pub struct PassTiming {
    pub label: &'static str,
    pub nanos: u64,
    pub source: TimingSource,
}

impl fmt::Display for PassTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let src = match self.source {
            TimingSource::GpuTimestamp => "gpu",
            TimingSource::HostWallClock => "wall",
        };
        write!(
            f,
            "{}: execution time [ns]: {} [{}]",
            self.label, self.nanos, src
        )
    }
}

/// Sum of all pass times, for the driver's TOTAL line.
pub fn total_nanos(timings: &[PassTiming]) -> u64 {
    timings.iter().map(|t| t.nanos).sum()
}

// ---------------------------------------------------------------------------
// KernelTimer
// ---------------------------------------------------------------------------

/// Timestamp bookkeeping for a fixed sequence of compute passes.
///
/// Pass labels are registered up front; each pass claims query slots
/// `2i` (begin) and `2i + 1` (end) via [`pass_writes`]. After all passes
/// have been submitted, [`finish`] resolves the queries and produces one
/// [`PassTiming`] per label.
///
/// [`pass_writes`]: KernelTimer::pass_writes
/// [`finish`]: KernelTimer::finish
pub struct KernelTimer {
    labels: Vec<&'static str>,
    /// Wall-clock fallback, recorded for every pass regardless of
    /// timestamp support.
    wall_nanos: Vec<u64>,
    query_set: Option<wgpu::QuerySet>,
}

impl KernelTimer {
    /// Create a timer for the given pass labels. Allocates a query set
    /// only when the device granted TIMESTAMP_QUERY.
    pub fn new(gpu: &GpuDevice, labels: &[&'static str]) -> Self {
        let query_set = gpu.supports_timestamps().then(|| {
            gpu.device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some("KernelTimer"),
                ty: wgpu::QueryType::Timestamp,
                count: (labels.len() * 2) as u32,
            })
        });
        KernelTimer {
            labels: labels.to_vec(),
            wall_nanos: vec![0; labels.len()],
            query_set,
        }
    }

    /// Timestamp writes for pass `idx`, or `None` when running on wall
    /// clocks. Pass the result straight to `begin_compute_pass`.
    pub fn pass_writes(&self, idx: usize) -> Option<wgpu::ComputePassTimestampWrites<'_>> {
        assert!(idx < self.labels.len(), "pass index {idx} out of range");
        self.query_set
            .as_ref()
            .map(|qs| wgpu::ComputePassTimestampWrites {
                query_set: qs,
                beginning_of_pass_write_index: Some((idx * 2) as u32),
                end_of_pass_write_index: Some((idx * 2 + 1) as u32),
            })
    }

    /// Record the host-side wall time for pass `idx` (submit to wait).
    pub fn record_wall(&mut self, idx: usize, elapsed: Duration) {
        assert!(idx < self.labels.len(), "pass index {idx} out of range");
        self.wall_nanos[idx] = elapsed.as_nanos() as u64;
    }

    /// Resolve the query set and convert each pass's tick pair to
    /// nanoseconds. Falls back to the recorded wall times when the
    /// query set is absent.
    pub fn finish(self, gpu: &GpuDevice) -> Vec<PassTiming> {
        // Borrow rather than move: the map-failure branch below still
        // needs `self` for the wall-clock numbers.
        let Some(query_set) = self.query_set.as_ref() else {
            return self.wall_timings();
        };

        let count = self.labels.len() * 2;
        let size = (count * std::mem::size_of::<u64>()) as u64;

        let resolve_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("KernelTimer::resolve"),
            size,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let read_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("KernelTimer::read"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("KernelTimer::finish"),
            });
        encoder.resolve_query_set(query_set, 0..count as u32, &resolve_buf, 0);
        encoder.copy_buffer_to_buffer(&resolve_buf, 0, &read_buf, 0, size);
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let slice = read_buf.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            tx.send(r).expect("timer readback channel closed");
        });
        gpu.device.poll(wgpu::Maintain::Wait);
        let map_result = rx.recv().expect("timer readback callback never fired");
        if map_result.is_err() {
            // Mapping failure is not worth aborting a finished run over;
            // the wall numbers are already in hand.
            return self.wall_timings();
        }

        let ticks: Vec<u64> = {
            let mapped = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, u64>(&mapped).to_vec()
        };
        read_buf.unmap();

        let period = gpu.queue.get_timestamp_period() as f64;
        self.labels
            .iter()
            .enumerate()
            .map(|(i, &label)| {
                let begin = ticks[i * 2];
                let end = ticks[i * 2 + 1];
                if end > begin {
                    PassTiming {
                        label,
                        nanos: ((end - begin) as f64 * period) as u64,
                        source: TimingSource::GpuTimestamp,
                    }
                } else {
                    // Counter wrapped or never written; use the wall number.
                    PassTiming {
                        label,
                        nanos: self.wall_nanos[i],
                        source: TimingSource::HostWallClock,
                    }
                }
            })
            .collect()
    }

    fn wall_timings(&self) -> Vec<PassTiming> {
        self.labels
            .iter()
            .enumerate()
            .map(|(i, &label)| PassTiming {
                label,
                nanos: self.wall_nanos[i],
                source: TimingSource::HostWallClock,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
