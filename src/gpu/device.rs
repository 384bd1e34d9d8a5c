// gpu/device.rs — wgpu device abstraction.
//
// Responsibilities:
//   - Enumerate adapters so the driver can print them (`-l`) and select
//     one by index (`-d`).
//   - Request the device, asking for TIMESTAMP_QUERY when the adapter
//     supports it so kernel timings come from GPU counters instead of
//     host wall clocks.
//   - Provide the 1D workgroup size and ceiling-division dispatch helper
//     shared by every kernel launch.
//
// ADAPTER SELECTION:
// `request_adapter`'s power-preference heuristics can grab a software
// rasterizer (llvmpipe) on headless machines. We enumerate explicitly:
// an explicit `-d` index is honored verbatim; otherwise the first
// non-CPU adapter wins, with anything at all as a last resort. The
// chosen adapter is printed at startup so there is no guessing.

use std::fmt;

/// Workgroup width used by the per-pixel kernels (histogram and
/// back-projection). The scan kernels run one workgroup of
/// [`crate::histeq::INTENSITY_LEVELS`] lanes regardless.
const DEFAULT_WORKGROUP: u32 = 256;

// ---------------------------------------------------------------------------
// Adapter enumeration
// ---------------------------------------------------------------------------

/// One row of `-l` output: an adapter the instance can see.
#[derive(Debug, Clone)]
pub struct AdapterSummary {
    pub index: usize,
    pub name: String,
    pub backend: wgpu::Backend,
    pub device_type: wgpu::DeviceType,
}

impl fmt::Display for AdapterSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({:?}, {:?})",
            self.index, self.name, self.backend, self.device_type
        )
    }
}

/// Enumerate all adapters visible through the primary backends.
///
/// Used by the `-l` flag; creates (and drops) its own instance.
pub fn list_adapters() -> Vec<AdapterSummary> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });
    instance
        .enumerate_adapters(wgpu::Backends::PRIMARY)
        .into_iter()
        .enumerate()
        .map(|(index, a)| {
            let info = a.get_info();
            AdapterSummary {
                index,
                name: info.name,
                backend: info.backend,
                device_type: info.device_type,
            }
        })
        .collect()
}

/// Position of the first non-CPU adapter, falling back to 0 when only
/// software rasterizers exist. Prefer real hardware; llvmpipe is a last
/// resort.
fn auto_select(types: &[wgpu::DeviceType]) -> usize {
    types
        .iter()
        .position(|t| !matches!(t, wgpu::DeviceType::Cpu))
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// GpuDevice
// ---------------------------------------------------------------------------

/// The core GPU context: device, queue, and selected-adapter metadata.
///
/// Create once at startup and reuse — device initialization is expensive,
/// everything built from it is cheap.
///
/// # Field drop order
/// Rust drops struct fields in declaration order. `_instance` is declared
/// last so the `wgpu::Instance` outlives `device` and `queue`; some
/// translation layers crash if the instance goes first.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: AdapterSummary,
    /// 1D workgroup width for per-pixel kernels, capped to the device's
    /// invocation limit.
    pub workgroup_size: u32,
    /// Whether `Features::TIMESTAMP_QUERY` was granted.
    timestamps: bool,
    /// Keeps the `wgpu::Instance` alive until `device` and `queue` drop.
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Create a `GpuDevice` on the first non-CPU adapter found.
    ///
    /// # Errors
    /// Returns `Err` if no adapter exists or the device request fails.
    pub fn new() -> Result<Self, GpuError> {
        Self::with_adapter(None)
    }

    /// Create a `GpuDevice` on the adapter with the given enumeration
    /// index (the `-d` flag), or auto-select when `None`.
    pub fn with_adapter(index: Option<usize>) -> Result<Self, GpuError> {
        pollster::block_on(Self::init_async(index))
    }

    async fn init_async(index: Option<usize>) -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let mut adapters: Vec<wgpu::Adapter> =
            instance.enumerate_adapters(wgpu::Backends::PRIMARY);
        if adapters.is_empty() {
            return Err(GpuError::NoAdapter);
        }

        let chosen = match index {
            Some(i) => {
                if i >= adapters.len() {
                    return Err(GpuError::AdapterIndexOutOfRange {
                        index: i,
                        count: adapters.len(),
                    });
                }
                i
            }
            None => {
                let types: Vec<wgpu::DeviceType> =
                    adapters.iter().map(|a| a.get_info().device_type).collect();
                auto_select(&types)
            }
        };
        let adapter = adapters.swap_remove(chosen);

        let raw_info = adapter.get_info();
        // `index` is the enumeration position, so it always matches a row
        // of the `-l` listing.
        let adapter_info = AdapterSummary {
            index: chosen,
            name: raw_info.name,
            backend: raw_info.backend,
            device_type: raw_info.device_type,
        };

        // GPU-side kernel timing needs TIMESTAMP_QUERY; request it only
        // when the adapter offers it, fall back to wall clocks otherwise.
        let timestamps = adapter
            .features()
            .contains(wgpu::Features::TIMESTAMP_QUERY);
        let required_features = if timestamps {
            wgpu::Features::TIMESTAMP_QUERY
        } else {
            wgpu::Features::empty()
        };

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("lumeq"),
                    required_features,
                    required_limits: wgpu::Limits::downlevel_defaults(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(GpuError::DeviceRequest)?;

        let workgroup_size = DEFAULT_WORKGROUP
            .min(device.limits().max_compute_invocations_per_workgroup);

        Ok(GpuDevice {
            device,
            queue,
            adapter_info,
            workgroup_size,
            timestamps,
            _instance: instance,
        })
    }

    /// Whether kernel timings come from GPU timestamp queries (true) or
    /// host wall clocks (false).
    pub fn supports_timestamps(&self) -> bool {
        self.timestamps
    }

    /// Number of workgroups needed to cover `n` elements with the active
    /// workgroup size. Ceiling division — the shader must guard
    /// out-of-bounds global IDs.
    pub fn dispatch_size(&self, n: u32) -> u32 {
        (n + self.workgroup_size - 1) / self.workgroup_size
    }

    /// Block until all submitted GPU work completes.
    pub fn wait(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {} ({:?}), workgroup: {}, timestamps: {} }}",
            self.adapter_info.name, self.adapter_info.backend, self.workgroup_size, self.timestamps
        )
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from GPU device initialization and pipeline configuration.
#[derive(Debug)]
pub enum GpuError {
    /// No adapter visible through any primary backend. Check driver
    /// installation; headless CI usually lands here.
    NoAdapter,
    /// `-d` index beyond the enumerated adapter list.
    AdapterIndexOutOfRange { index: usize, count: usize },
    /// wgpu device request failed (driver issue, unsupported limits).
    DeviceRequest(wgpu::RequestDeviceError),
    /// Bin count outside the supported range: the scan kernels run in a
    /// single workgroup, so bins must be a power of two in 2..=256.
    InvalidBinCount(usize),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::NoAdapter => {
                write!(f, "no GPU adapter found (is a graphics driver installed?)")
            }
            GpuError::AdapterIndexOutOfRange { index, count } => write!(
                f,
                "adapter index {index} out of range ({count} adapter(s) available, try -l)"
            ),
            GpuError::DeviceRequest(e) => write!(f, "device request failed: {e}"),
            GpuError::InvalidBinCount(n) => write!(
                f,
                "invalid bin count {n}: must be a power of two between 2 and 256"
            ),
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::DeviceRequest(e) => Some(e),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
