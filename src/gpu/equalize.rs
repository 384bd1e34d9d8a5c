// gpu/equalize.rs — the GPU equalization pipeline.
//
// Mirrors the CPU pipeline in histeq.rs kernel-for-kernel:
//
//   hist_simple         histogram.wgsl      histeq::histogram
//   scan_serial         scan.wgsl           histeq::scan_serial
//   scan_blelloch       scan.wgsl           histeq::scan_blelloch
//   scan_hillis_steele  scan.wgsl           histeq::scan_hillis_steele
//   normalise           lut.wgsl            histeq::build_lut
//   back_projection     back_project.wgsl   histeq::back_project
//
// The two extra scans are raced for comparison and their results read
// back, but only scan_serial's output feeds the LUT.
//
// DATA LAYOUT
// ────────────
// The image travels as a storage buffer holding one u32 per pixel
// (value 0..=255). WGSL has no u8 arrays; packing four pixels per word
// would save bandwidth at the cost of unpack arithmetic in every
// kernel, which is the wrong trade for a pipeline this small.
//
// ORCHESTRATION
// ──────────────
// Strictly sequential: each kernel is submitted and waited on, then its
// buffer is read back, before the next launches. This stalls the GPU
// between stages on purpose — the per-kernel wall-clock fallback in
// gpu::timing depends on one-kernel-per-submit, and every intermediate
// is part of the driver's printed output anyway.
//
// PIPELINE LIFETIME
// ──────────────────
// `GpuEqualizePipeline` is expensive to create (four shader modules).
// Create it once and call `run` per image; `run` allocates only buffers
// and bind groups.

use std::time::Instant;

use wgpu::util::DeviceExt;

use crate::gpu::device::{GpuDevice, GpuError};
use crate::gpu::timing::{KernelTimer, PassTiming, TimingSource};
use crate::histeq::INTENSITY_LEVELS;
use crate::image::Image;

/// Kernel labels, in dispatch order. Indexes into the run's
/// [`KernelTimer`] and the `timings` field of [`EqualizeOutput`].
pub const PASS_LABELS: [&str; 6] = [
    "hist_simple",
    "scan_serial",
    "scan_blelloch",
    "scan_hillis_steele",
    "normalise",
    "back_projection",
];

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Everything one pipeline run produces: the equalized image, every
/// intermediate buffer, and per-kernel timings.
#[derive(Debug)]
pub struct EqualizeOutput {
    /// The back-projected (equalized) image.
    pub image: Image<u8>,
    /// Per-bin pixel counts.
    pub histogram: Vec<u32>,
    /// Inclusive cumulative histogram (consumed by the LUT).
    pub cumulative: Vec<u32>,
    /// Blelloch scan result — exclusive, comparison only.
    pub cumulative_blelloch: Vec<u32>,
    /// Hillis–Steele scan result — inclusive, comparison only.
    pub cumulative_hillis_steele: Vec<u32>,
    /// 256-entry lookup table (values 0..=255, one per u32).
    pub lut: Vec<u32>,
    /// Host-timed image upload.
    pub upload: PassTiming,
    /// One entry per kernel, ordered as [`PASS_LABELS`].
    pub timings: Vec<PassTiming>,
}

impl EqualizeOutput {
    /// Total time attributable to producing the output image: the upload
    /// plus every kernel whose result feeds it. The two comparison scans
    /// run for the printed report only and are excluded.
    pub fn total_nanos(&self) -> u64 {
        self.upload.nanos
            + self
                .timings
                .iter()
                .filter(|t| t.label != "scan_blelloch" && t.label != "scan_hillis_steele")
                .map(|t| t.nanos)
                .sum::<u64>()
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Compiled compute pipelines for the fixed kernel sequence.
pub struct GpuEqualizePipeline {
    hist: wgpu::ComputePipeline,
    hist_bgl: wgpu::BindGroupLayout,
    scan_serial: wgpu::ComputePipeline,
    scan_serial_bgl: wgpu::BindGroupLayout,
    scan_blelloch: wgpu::ComputePipeline,
    scan_hillis_steele: wgpu::ComputePipeline,
    /// Shared by the two in-place scans (they bind only the data buffer).
    scan_inplace_bgl: wgpu::BindGroupLayout,
    normalise: wgpu::ComputePipeline,
    lut_bgl: wgpu::BindGroupLayout,
    back_projection: wgpu::ComputePipeline,
    bp_bgl: wgpu::BindGroupLayout,
}

/// Shorthand for a read-only or read-write storage buffer BGL entry.
fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl GpuEqualizePipeline {
    /// Compile all four shader modules and build one compute pipeline per
    /// kernel. The per-pixel kernels are specialized to the device's
    /// workgroup width via the `{{WG}}` token; the scan kernels always run
    /// one 256-lane workgroup.
    pub fn new(gpu: &GpuDevice) -> Self {
        let make_module = |label: &str, template: &str| {
            let src = template.replace("{{WG}}", &gpu.workgroup_size.to_string());
            gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(src.into()),
            })
        };

        let hist_module = make_module("histogram.wgsl", include_str!("../shaders/histogram.wgsl"));
        let scan_module = make_module("scan.wgsl", include_str!("../shaders/scan.wgsl"));
        let lut_module = make_module("lut.wgsl", include_str!("../shaders/lut.wgsl"));
        let bp_module = make_module(
            "back_project.wgsl",
            include_str!("../shaders/back_project.wgsl"),
        );

        let make_pipeline = |label: &str,
                             module: &wgpu::ShaderModule,
                             entry: &str,
                             bgl: &wgpu::BindGroupLayout| {
            let layout = gpu
                .device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(label),
                    bind_group_layouts: &[bgl],
                    push_constant_ranges: &[],
                });
            gpu.device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(label),
                    layout: Some(&layout),
                    module,
                    entry_point: entry,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                })
        };

        // 0 — image pixels (read), 1 — histogram bins (atomic read_write).
        let hist_bgl = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("hist_simple BGL"),
                entries: &[storage_entry(0, true), storage_entry(1, false)],
            });

        // 0 — histogram (read), 1 — cumulative output (read_write).
        let scan_serial_bgl = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("scan_serial BGL"),
                entries: &[storage_entry(0, true), storage_entry(1, false)],
            });

        // The in-place scans use only binding 1 of scan.wgsl.
        let scan_inplace_bgl = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("scan in-place BGL"),
                entries: &[storage_entry(1, false)],
            });

        // 0 — cumulative (read), 1 — LUT (read_write).
        let lut_bgl = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("normalise BGL"),
                entries: &[storage_entry(0, true), storage_entry(1, false)],
            });

        // 0 — image (read), 1 — LUT (read), 2 — output (read_write).
        let bp_bgl = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("back_projection BGL"),
                entries: &[
                    storage_entry(0, true),
                    storage_entry(1, true),
                    storage_entry(2, false),
                ],
            });

        let hist = make_pipeline("hist_simple", &hist_module, "hist_simple", &hist_bgl);
        let scan_serial =
            make_pipeline("scan_serial", &scan_module, "scan_serial", &scan_serial_bgl);
        let scan_blelloch =
            make_pipeline("scan_blelloch", &scan_module, "scan_blelloch", &scan_inplace_bgl);
        let scan_hillis_steele = make_pipeline(
            "scan_hillis_steele",
            &scan_module,
            "scan_hillis_steele",
            &scan_inplace_bgl,
        );
        let normalise = make_pipeline("normalise", &lut_module, "normalise", &lut_bgl);
        let back_projection =
            make_pipeline("back_projection", &bp_module, "back_projection", &bp_bgl);

        GpuEqualizePipeline {
            hist,
            hist_bgl,
            scan_serial,
            scan_serial_bgl,
            scan_blelloch,
            scan_hillis_steele,
            scan_inplace_bgl,
            normalise,
            lut_bgl,
            back_projection,
            bp_bgl,
        }
    }

    /// Run the full pipeline on one image.
    ///
    /// # Errors
    /// Returns [`GpuError::InvalidBinCount`] unless `n_bins` is a power
    /// of two in 2..=256 (the scans run as a single 256-lane workgroup).
    pub fn run(
        &self,
        gpu: &GpuDevice,
        image: &Image<u8>,
        n_bins: usize,
    ) -> Result<EqualizeOutput, GpuError> {
        validate_bins(n_bins)?;

        let num_pixels = image.num_pixels() as u32;
        let hist_bytes = (n_bins * 4) as u64;

        // --- Upload: compact the image into one u32 per pixel ---
        let upload_start = Instant::now();
        let pixels: Vec<u32> = image.pixels().map(u32::from).collect();
        let src_buf = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("equalize::src"),
                contents: bytemuck::cast_slice(&pixels),
                usage: wgpu::BufferUsages::STORAGE,
            });
        gpu.queue.submit(std::iter::empty());
        gpu.wait();
        let upload = PassTiming {
            label: "upload",
            nanos: upload_start.elapsed().as_nanos() as u64,
            source: TimingSource::HostWallClock,
        };

        // --- Working buffers ---
        // wgpu zero-initializes buffers, which stands in for the explicit
        // fill a raw API would need before the atomic histogram.
        let make_storage = |label: &'static str, size: u64| {
            gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let hist_buf = make_storage("equalize::hist", hist_bytes);
        let cum_buf = make_storage("equalize::cumulative", hist_bytes);
        let bl_buf = make_storage("equalize::blelloch", hist_bytes);
        let hs_buf = make_storage("equalize::hillis_steele", hist_bytes);
        let lut_buf = make_storage("equalize::lut", (INTENSITY_LEVELS * 4) as u64);
        let out_buf = make_storage("equalize::out", u64::from(num_pixels) * 4);

        let mut timer = KernelTimer::new(gpu, &PASS_LABELS);

        // --- 1. Histogram ---
        let bind = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("hist_simple"),
            layout: &self.hist_bgl,
            entries: &[
                bind_entry(0, &src_buf),
                bind_entry(1, &hist_buf),
            ],
        });
        self.dispatch(gpu, &mut timer, 0, &self.hist, &bind, gpu.dispatch_size(num_pixels), None);
        let histogram = read_buffer_u32(gpu, &hist_buf, n_bins);

        // --- 2a. Serial cumulative scan (feeds the LUT) ---
        let bind = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("scan_serial"),
            layout: &self.scan_serial_bgl,
            entries: &[
                bind_entry(0, &hist_buf),
                bind_entry(1, &cum_buf),
            ],
        });
        self.dispatch(gpu, &mut timer, 1, &self.scan_serial, &bind, 1, None);
        let cumulative = read_buffer_u32(gpu, &cum_buf, n_bins);

        // --- 2b. Blelloch scan (comparison only, in place) ---
        let bind = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("scan_blelloch"),
            layout: &self.scan_inplace_bgl,
            entries: &[bind_entry(1, &bl_buf)],
        });
        self.dispatch(
            gpu, &mut timer, 2, &self.scan_blelloch, &bind, 1,
            Some((&hist_buf, &bl_buf, hist_bytes)),
        );
        let cumulative_blelloch = read_buffer_u32(gpu, &bl_buf, n_bins);

        // --- 2c. Hillis–Steele scan (comparison only, in place) ---
        let bind = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("scan_hillis_steele"),
            layout: &self.scan_inplace_bgl,
            entries: &[bind_entry(1, &hs_buf)],
        });
        self.dispatch(
            gpu, &mut timer, 3, &self.scan_hillis_steele, &bind, 1,
            Some((&hist_buf, &hs_buf, hist_bytes)),
        );
        let cumulative_hillis_steele = read_buffer_u32(gpu, &hs_buf, n_bins);

        // --- 3. Normalise into the LUT ---
        let bind = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("normalise"),
            layout: &self.lut_bgl,
            entries: &[
                bind_entry(0, &cum_buf),
                bind_entry(1, &lut_buf),
            ],
        });
        self.dispatch(
            gpu, &mut timer, 4, &self.normalise, &bind,
            gpu.dispatch_size(INTENSITY_LEVELS as u32), None,
        );
        let lut = read_buffer_u32(gpu, &lut_buf, INTENSITY_LEVELS);

        // --- 4. Back-projection ---
        let bind = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("back_projection"),
            layout: &self.bp_bgl,
            entries: &[
                bind_entry(0, &src_buf),
                bind_entry(1, &lut_buf),
                bind_entry(2, &out_buf),
            ],
        });
        self.dispatch(
            gpu, &mut timer, 5, &self.back_projection, &bind,
            gpu.dispatch_size(num_pixels), None,
        );
        let out_words = read_buffer_u32(gpu, &out_buf, num_pixels as usize);

        let out_pixels: Vec<u8> = out_words.iter().map(|&v| v.min(255) as u8).collect();
        let image = Image::from_vec(image.width(), image.height(), out_pixels);

        Ok(EqualizeOutput {
            image,
            histogram,
            cumulative,
            cumulative_blelloch,
            cumulative_hillis_steele,
            lut,
            upload,
            timings: timer.finish(gpu),
        })
    }

    /// Encode and submit one kernel, waiting for completion.
    ///
    /// `pre_copy` optionally copies `(src, dst, bytes)` in the same
    /// encoder before the pass — used to seed the in-place scans with
    /// the histogram. The copy sits outside the pass timestamps.
    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &self,
        gpu: &GpuDevice,
        timer: &mut KernelTimer,
        idx: usize,
        pipeline: &wgpu::ComputePipeline,
        bind_group: &wgpu::BindGroup,
        workgroups: u32,
        pre_copy: Option<(&wgpu::Buffer, &wgpu::Buffer, u64)>,
    ) {
        let start = Instant::now();
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(PASS_LABELS[idx]),
            });
        if let Some((src, dst, bytes)) = pre_copy {
            encoder.copy_buffer_to_buffer(src, 0, dst, 0, bytes);
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(PASS_LABELS[idx]),
                timestamp_writes: timer.pass_writes(idx),
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));
        gpu.wait();
        timer.record_wall(idx, start.elapsed());
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// The scans run as one 256-lane workgroup; the Blelloch tree sweep
/// additionally assumes a power-of-two width.
fn validate_bins(n_bins: usize) -> Result<(), GpuError> {
    if (2..=INTENSITY_LEVELS).contains(&n_bins) && n_bins.is_power_of_two() {
        Ok(())
    } else {
        Err(GpuError::InvalidBinCount(n_bins))
    }
}

fn bind_entry(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

/// Read `count` u32 words back from a storage buffer.
///
/// **Expensive and synchronous** — stalls the GPU. The sequential
/// orchestration stalls between stages anyway, so this is the intended
/// access pattern here, not a test-only escape hatch.
fn read_buffer_u32(gpu: &GpuDevice, src: &wgpu::Buffer, count: usize) -> Vec<u32> {
    let size = (count * 4) as u64;
    let read_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("equalize::readback"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("equalize::readback"),
        });
    encoder.copy_buffer_to_buffer(src, 0, &read_buf, 0, size);
    gpu.queue.submit(std::iter::once(encoder.finish()));

    let slice = read_buf.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        tx.send(r).expect("readback channel closed");
    });
    gpu.device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .expect("readback callback never fired")
        .expect("readback map failed");

    let out = {
        let mapped = slice.get_mapped_range();
        bytemuck::cast_slice::<u8, u32>(&mapped).to_vec()
    };
    read_buf.unmap();
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
