//! wgpu-based GPU compute backend (Metal / Vulkan / DX12).
//!
//! Every operation records one or two compute passes and submits them right
//! away; the queue keeps them in call order. 1D kernels index their element
//! as `gid.x + gid.y * num_workgroups.x * 256` so that counts above
//! `65535 * 256` spill into a second dispatch dimension.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use ndarray::{Array2, ArrayView2};
use wgpu::util::DeviceExt;

use crate::consts::{GPU_MAX_WORKGROUPS_PER_DIM, GPU_TILE, GPU_WORKGROUP};
use crate::error::{Result, XpcsError};

use super::{BufferInner, ComputeBackend, DeviceBuffer, FftDirection, FftPlan, PlanInner};

// ---------------------------------------------------------------------------
// Inline WGSL shaders
// ---------------------------------------------------------------------------

/// `c = a · bᵀ` with 16x16 shared-memory tiles along the inner dimension.
const MATMUL_NT_WGSL: &str = r"
struct Params { m: u32, n: u32, k: u32, _pad: u32 }
@group(0) @binding(0) var<storage, read>       a:      array<f32>;
@group(0) @binding(1) var<storage, read>       b:      array<f32>;
@group(0) @binding(2) var<storage, read_write> c:      array<f32>;
@group(0) @binding(3) var<uniform>             params: Params;
var<workgroup> tile_a: array<array<f32, 16>, 16>;
var<workgroup> tile_b: array<array<f32, 16>, 16>;
@compute @workgroup_size(16, 16)
fn main(@builtin(local_invocation_id) lid: vec3<u32>,
        @builtin(workgroup_id) wid: vec3<u32>) {
    let row = wid.y * 16u + lid.y;
    let col = wid.x * 16u + lid.x;
    let b_row = wid.x * 16u + lid.y;
    var acc = 0.0;
    let tiles = (params.k + 15u) / 16u;
    for (var t = 0u; t < tiles; t = t + 1u) {
        let kk = t * 16u + lid.x;
        if row < params.m && kk < params.k {
            tile_a[lid.y][lid.x] = a[row * params.k + kk];
        } else {
            tile_a[lid.y][lid.x] = 0.0;
        }
        if b_row < params.n && kk < params.k {
            tile_b[lid.y][lid.x] = b[b_row * params.k + kk];
        } else {
            tile_b[lid.y][lid.x] = 0.0;
        }
        workgroupBarrier();
        for (var i = 0u; i < 16u; i = i + 1u) {
            acc = acc + tile_a[lid.y][i] * tile_b[lid.x][i];
        }
        workgroupBarrier();
    }
    if row < params.m && col < params.n {
        c[row * params.n + col] = acc;
    }
}
";

/// One workgroup per row: `output[row] = Σ input[row, :] / divisor`.
const ROW_REDUCE_WGSL: &str = r"
struct Params { rows: u32, cols: u32, divisor: f32, _pad: u32 }
@group(0) @binding(0) var<storage, read>       input:  array<f32>;
@group(0) @binding(1) var<storage, read_write> output: array<f32>;
@group(0) @binding(2) var<uniform>             params: Params;
var<workgroup> partial: array<f32, 256>;
@compute @workgroup_size(256)
fn main(@builtin(local_invocation_id) lid: vec3<u32>,
        @builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>) {
    let row = wid.x + wid.y * nwg.x;
    var acc = 0.0;
    if row < params.rows {
        for (var c = lid.x; c < params.cols; c = c + 256u) {
            acc = acc + input[row * params.cols + c];
        }
    }
    partial[lid.x] = acc;
    workgroupBarrier();
    for (var s = 128u; s > 0u; s = s >> 1u) {
        if lid.x < s {
            partial[lid.x] = partial[lid.x] + partial[lid.x + s];
        }
        workgroupBarrier();
    }
    if lid.x == 0u && row < params.rows {
        output[row] = partial[0] / params.divisor;
    }
}
";

/// `staging[k, col] = matrix[col - k, col]` for `col >= k`, zero elsewhere.
const SCATTER_DIAGONALS_WGSL: &str = r"
struct Params { n: u32 }
@group(0) @binding(0) var<storage, read>       matrix:  array<f32>;
@group(0) @binding(1) var<storage, read_write> staging: array<f32>;
@group(0) @binding(2) var<uniform>             params:  Params;
@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let col = gid.x; let k = gid.y;
    if col >= params.n || k >= params.n { return; }
    if col >= k {
        staging[k * params.n + col] = matrix[(col - k) * params.n + col];
    } else {
        staging[k * params.n + col] = 0.0;
    }
}
";

/// One workgroup per diagonal: `output[k] = Σ_i matrix[i, i + k]`.
const DIAGONAL_SUM_WGSL: &str = r"
struct Params { n: u32 }
@group(0) @binding(0) var<storage, read>       matrix: array<f32>;
@group(0) @binding(1) var<storage, read_write> output: array<f32>;
@group(0) @binding(2) var<uniform>             params: Params;
var<workgroup> partial: array<f32, 256>;
@compute @workgroup_size(256)
fn main(@builtin(local_invocation_id) lid: vec3<u32>,
        @builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>) {
    let k = wid.x + wid.y * nwg.x;
    var acc = 0.0;
    if k < params.n {
        let len = params.n - k;
        for (var i = lid.x; i < len; i = i + 256u) {
            acc = acc + matrix[i * params.n + i + k];
        }
    }
    partial[lid.x] = acc;
    workgroupBarrier();
    for (var s = 128u; s > 0u; s = s >> 1u) {
        if lid.x < s {
            partial[lid.x] = partial[lid.x] + partial[lid.x + s];
        }
        workgroupBarrier();
    }
    if lid.x == 0u && k < params.n {
        output[k] = partial[0];
    }
}
";

const DIVIDE_SCALED_WGSL: &str = r"
struct Params { count: u32, scale: f32 }
@group(0) @binding(0) var<storage, read>       a:      array<f32>;
@group(0) @binding(1) var<storage, read>       b:      array<f32>;
@group(0) @binding(2) var<storage, read_write> output: array<f32>;
@group(0) @binding(3) var<uniform>             params: Params;
@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = gid.x + gid.y * nwg.x * 256u;
    if i >= params.count { return; }
    output[i] = a[i] / b[i] / params.scale;
}
";

const NORMALIZE_WGSL: &str = r"
struct Params { count: u32, scale: f32 }
@group(0) @binding(0) var<storage, read>       input:  array<f32>;
@group(0) @binding(1) var<storage, read_write> output: array<f32>;
@group(0) @binding(2) var<uniform>             params: Params;
@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = gid.x + gid.y * nwg.x * 256u;
    if i >= params.count { return; }
    output[i] = input[i] * params.scale;
}
";

/// Real signal (optionally reversed) into a zero-padded interleaved complex buffer.
const PAD_COMPLEX_WGSL: &str = r"
struct Params { len: u32, size: u32, reversed: u32 }
@group(0) @binding(0) var<storage, read>       input:  array<f32>;
@group(0) @binding(1) var<storage, read_write> output: array<f32>;
@group(0) @binding(2) var<uniform>             params: Params;
@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = gid.x + gid.y * nwg.x * 256u;
    if i >= params.size { return; }
    var value = 0.0;
    if i < params.len {
        if params.reversed != 0u {
            value = input[params.len - 1u - i];
        } else {
            value = input[i];
        }
    }
    output[2u * i] = value;
    output[2u * i + 1u] = 0.0;
}
";

/// One radix-2 Stockham stage over sub-transform length `n` and stride `s`.
/// `direction` is -1 for the forward transform, +1 for the inverse.
const FFT_STOCKHAM_WGSL: &str = r"
struct Params { n: u32, s: u32, size: u32, direction: f32 }
@group(0) @binding(0) var<storage, read>       src:    array<f32>;
@group(0) @binding(1) var<storage, read_write> dst:    array<f32>;
@group(0) @binding(2) var<uniform>             params: Params;
@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>) {
    let j = gid.x + gid.y * nwg.x * 256u;
    if j >= params.size / 2u { return; }
    let s = params.s;
    let m = params.n / 2u;
    let q = j % s;
    let p = j / s;

    let angle = params.direction * 6.283185307179586 * f32(p) / f32(params.n);
    let w = vec2<f32>(cos(angle), sin(angle));

    let ia = 2u * (q + s * p);
    let ib = 2u * (q + s * (p + m));
    let a = vec2<f32>(src[ia], src[ia + 1u]);
    let b = vec2<f32>(src[ib], src[ib + 1u]);
    let sum = a + b;
    let diff = a - b;

    let o0 = 2u * (q + s * (2u * p));
    let o1 = 2u * (q + s * (2u * p + 1u));
    dst[o0] = sum.x;
    dst[o0 + 1u] = sum.y;
    dst[o1] = diff.x * w.x - diff.y * w.y;
    dst[o1 + 1u] = diff.x * w.y + diff.y * w.x;
}
";

const COMPLEX_MUL_WGSL: &str = r"
struct Params { count: u32 }
@group(0) @binding(0) var<storage, read>       a:      array<f32>;
@group(0) @binding(1) var<storage, read>       b:      array<f32>;
@group(0) @binding(2) var<storage, read_write> output: array<f32>;
@group(0) @binding(3) var<uniform>             params: Params;
@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = gid.x + gid.y * nwg.x * 256u;
    if i >= params.count { return; }
    let ar = a[2u * i]; let ai = a[2u * i + 1u];
    let br = b[2u * i]; let bi = b[2u * i + 1u];
    output[2u * i] = ar * br - ai * bi;
    output[2u * i + 1u] = ar * bi + ai * br;
}
";

const REAL_PART_WGSL: &str = r"
struct Params { count: u32 }
@group(0) @binding(0) var<storage, read>       input:  array<f32>;
@group(0) @binding(1) var<storage, read_write> output: array<f32>;
@group(0) @binding(2) var<uniform>             params: Params;
@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>) {
    let i = gid.x + gid.y * nwg.x * 256u;
    if i >= params.count { return; }
    output[i] = input[2u * i];
}
";

// ---------------------------------------------------------------------------
// Uniform parameter structs (must match WGSL layouts exactly)
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct MatmulParams {
    m: u32,
    n: u32,
    k: u32,
    _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RowReduceParams {
    rows: u32,
    cols: u32,
    divisor: f32,
    _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SquareParams {
    n: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CountParams {
    count: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ScaleParams {
    count: u32,
    scale: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct PadParams {
    len: u32,
    size: u32,
    reversed: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FftParams {
    n: u32,
    s: u32,
    size: u32,
    direction: f32,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn gpu_buf(buf: &DeviceBuffer) -> Result<&wgpu::Buffer> {
    match &buf.inner {
        BufferInner::Wgpu { buffer, .. } => Ok(buffer),
        _ => Err(XpcsError::Resource(
            "GPU backend received a host buffer".into(),
        )),
    }
}

const fn div_ceil(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| XpcsError::Resource(format!("{what} {value} exceeds GPU index range")))
}

/// Workgroup grid covering `count` items with `per_group` items per workgroup.
fn grid_1d(count: u32, per_group: u32) -> Result<(u32, u32, u32)> {
    let groups = div_ceil(count.max(1), per_group);
    let x = groups.min(GPU_MAX_WORKGROUPS_PER_DIM);
    let y = div_ceil(groups, x);
    if y > GPU_MAX_WORKGROUPS_PER_DIM {
        return Err(XpcsError::Resource(format!(
            "{count} items exceed the GPU dispatch limit"
        )));
    }
    Ok((x, y, 1))
}

fn grid_2d(cols: u32, rows: u32) -> Result<(u32, u32, u32)> {
    let x = div_ceil(cols.max(1), GPU_TILE);
    let y = div_ceil(rows.max(1), GPU_TILE);
    if x > GPU_MAX_WORKGROUPS_PER_DIM || y > GPU_MAX_WORKGROUPS_PER_DIM {
        return Err(XpcsError::Resource(format!(
            "{rows}x{cols} grid exceeds the GPU dispatch limit"
        )));
    }
    Ok((x, y, 1))
}

fn check_same_dim(what: &'static str, a: &DeviceBuffer, b: &DeviceBuffer) -> Result<()> {
    if a.dim() != b.dim() {
        return Err(XpcsError::ShapeMismatch {
            what,
            expected: vec![a.rows, a.cols],
            found: vec![b.rows, b.cols],
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// WgpuBackend
// ---------------------------------------------------------------------------

pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_name: String,
    max_binding_bytes: u64,
    // Pipelines
    matmul_nt_pipeline: wgpu::ComputePipeline,
    row_reduce_pipeline: wgpu::ComputePipeline,
    scatter_diagonals_pipeline: wgpu::ComputePipeline,
    diagonal_sum_pipeline: wgpu::ComputePipeline,
    divide_scaled_pipeline: wgpu::ComputePipeline,
    normalize_pipeline: wgpu::ComputePipeline,
    pad_complex_pipeline: wgpu::ComputePipeline,
    fft_pipeline: wgpu::ComputePipeline,
    complex_mul_pipeline: wgpu::ComputePipeline,
    real_part_pipeline: wgpu::ComputePipeline,
}

impl WgpuBackend {
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| XpcsError::MissingFacility(format!("no suitable GPU adapter found: {e}")))?;

        let adapter_name = adapter.get_info().name.clone();
        tracing::info!("GPU adapter: {adapter_name}");

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("xpcs"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                ..Default::default()
            },
        ))
        .map_err(|e| XpcsError::MissingFacility(format!("failed to create GPU device: {e}")))?;

        let limits = device.limits();
        let max_binding_bytes =
            (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);

        let device: Arc<wgpu::Device> = Arc::new(device);
        let queue: Arc<wgpu::Queue> = Arc::new(queue);

        let mk = |label, src: &str| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(src.into()),
            })
        };

        let matmul_mod = mk("matmul_nt", MATMUL_NT_WGSL);
        let reduce_mod = mk("row_reduce", ROW_REDUCE_WGSL);
        let scatter_mod = mk("scatter_diagonals", SCATTER_DIAGONALS_WGSL);
        let diag_mod = mk("diagonal_sum", DIAGONAL_SUM_WGSL);
        let div_mod = mk("divide_scaled", DIVIDE_SCALED_WGSL);
        let norm_mod = mk("normalize", NORMALIZE_WGSL);
        let pad_mod = mk("pad_complex", PAD_COMPLEX_WGSL);
        let fft_mod = mk("fft_stockham", FFT_STOCKHAM_WGSL);
        let cmul_mod = mk("complex_mul", COMPLEX_MUL_WGSL);
        let real_mod = mk("real_part", REAL_PART_WGSL);

        let pipe = |module: &wgpu::ShaderModule, entry: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: None,
                layout: None,
                module,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        Ok(Self {
            adapter_name,
            max_binding_bytes,
            matmul_nt_pipeline: pipe(&matmul_mod, "main"),
            row_reduce_pipeline: pipe(&reduce_mod, "main"),
            scatter_diagonals_pipeline: pipe(&scatter_mod, "main"),
            diagonal_sum_pipeline: pipe(&diag_mod, "main"),
            divide_scaled_pipeline: pipe(&div_mod, "main"),
            normalize_pipeline: pipe(&norm_mod, "main"),
            pad_complex_pipeline: pipe(&pad_mod, "main"),
            fft_pipeline: pipe(&fft_mod, "main"),
            complex_mul_pipeline: pipe(&cmul_mod, "main"),
            real_part_pipeline: pipe(&real_mod, "main"),
            device,
            queue,
        })
    }

    // --- Buffer helpers ---

    /// Byte size of `count` f32 values, checked against the binding limit.
    fn binding_bytes(&self, count: usize) -> Result<u64> {
        let bytes = count as u64 * 4;
        if bytes == 0 {
            return Err(XpcsError::Resource("cannot bind an empty GPU buffer".into()));
        }
        if bytes > self.max_binding_bytes {
            return Err(XpcsError::Resource(format!(
                "{bytes} byte buffer exceeds the device binding limit of {} bytes",
                self.max_binding_bytes
            )));
        }
        Ok(bytes)
    }

    fn create_storage(&self, data: &[f32]) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: None,
                contents: bytemuck::cast_slice(data),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
            })
    }

    /// Zero-initialized storage buffer.
    fn create_storage_uninit(&self, byte_size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: None,
            size: byte_size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn create_uniform<T: Pod>(&self, data: &T) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: None,
                contents: bytemuck::bytes_of(data),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            })
    }

    fn download_f32(&self, buffer: &wgpu::Buffer) -> Result<Vec<f32>> {
        let size = buffer.size();
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: None,
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut enc = self.device.create_command_encoder(&Default::default());
        enc.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(enc.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        slice.map_async(wgpu::MapMode::Read, move |r| {
            tx.send(r).ok();
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| XpcsError::Resource(format!("GPU poll failed: {e}")))?;
        rx.recv()
            .map_err(|_| XpcsError::Resource("GPU readback channel closed".into()))?
            .map_err(|e| XpcsError::Resource(format!("buffer mapping failed: {e}")))?;

        let data = slice.get_mapped_range();
        let result: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging.unmap();
        Ok(result)
    }

    /// Dispatch a single compute pass with one bind group at group(0).
    fn dispatch(
        &self,
        pipeline: &wgpu::ComputePipeline,
        entries: &[wgpu::BindGroupEntry],
        workgroups: (u32, u32, u32),
    ) {
        let layout = pipeline.get_bind_group_layout(0);
        let bg = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &layout,
            entries,
        });
        let mut enc = self.device.create_command_encoder(&Default::default());
        {
            let mut pass = enc.begin_compute_pass(&Default::default());
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bg, &[]);
            pass.dispatch_workgroups(workgroups.0, workgroups.1, workgroups.2);
        }
        self.queue.submit(std::iter::once(enc.finish()));
    }

    fn make_device_buffer(&self, buffer: wgpu::Buffer, rows: usize, cols: usize) -> DeviceBuffer {
        DeviceBuffer {
            inner: BufferInner::Wgpu {
                buffer,
                device: Arc::clone(&self.device),
                queue: Arc::clone(&self.queue),
            },
            rows,
            cols,
        }
    }

    /// Sum every row of an `(rows, cols)` buffer and divide by `divisor`.
    fn reduce_rows(
        &self,
        input: &wgpu::Buffer,
        rows: usize,
        cols: usize,
        divisor: f32,
    ) -> Result<wgpu::Buffer> {
        let out = self.create_storage_uninit(self.binding_bytes(rows)?);
        let rows = to_u32(rows, "row count")?;
        let uniform = self.create_uniform(&RowReduceParams {
            rows,
            cols: to_u32(cols, "column count")?,
            divisor,
            _pad: 0,
        });
        self.dispatch(
            &self.row_reduce_pipeline,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: input.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: out.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform.as_entire_binding(),
                },
            ],
            grid_1d(rows, 1)?,
        );
        Ok(out)
    }

    fn square_size(&self, matrix: &DeviceBuffer) -> Result<u32> {
        if matrix.rows != matrix.cols {
            return Err(XpcsError::ShapeMismatch {
                what: "diagonal reduction input",
                expected: vec![matrix.rows, matrix.rows],
                found: vec![matrix.rows, matrix.cols],
            });
        }
        to_u32(matrix.rows, "matrix size")
    }
}

// ---------------------------------------------------------------------------
// ComputeBackend implementation
// ---------------------------------------------------------------------------

impl ComputeBackend for WgpuBackend {
    fn name(&self) -> &str {
        &self.adapter_name
    }

    fn is_gpu(&self) -> bool {
        true
    }

    fn upload(&self, data: ArrayView2<'_, f32>) -> Result<DeviceBuffer> {
        let (rows, cols) = data.dim();
        self.binding_bytes(rows * cols)?;
        let flat: Vec<f32> = data.iter().copied().collect();
        let buffer = self.create_storage(&flat);
        Ok(self.make_device_buffer(buffer, rows, cols))
    }

    fn download(&self, buf: &DeviceBuffer) -> Result<Array2<f32>> {
        let buffer = gpu_buf(buf)?;
        let data = self.download_f32(buffer)?;
        let storage_cols = data.len() / buf.rows.max(1);
        Array2::from_shape_vec((buf.rows, storage_cols), data)
            .map_err(|e| XpcsError::Resource(format!("GPU readback shape: {e}")))
    }

    fn zeros(&self, rows: usize, cols: usize) -> Result<DeviceBuffer> {
        let bytes = self.binding_bytes(rows * cols)?;
        let buffer = self.create_storage_uninit(bytes);
        Ok(self.make_device_buffer(buffer, rows, cols))
    }

    fn matmul_transposed(&self, a: &DeviceBuffer, b: &DeviceBuffer) -> Result<DeviceBuffer> {
        if a.cols != b.cols {
            return Err(XpcsError::ShapeMismatch {
                what: "matrix product operand",
                expected: vec![b.rows, a.cols],
                found: vec![b.rows, b.cols],
            });
        }
        let (a_buf, b_buf) = (gpu_buf(a)?, gpu_buf(b)?);
        let m = to_u32(a.rows, "row count")?;
        let n = to_u32(b.rows, "row count")?;
        let k = to_u32(a.cols, "inner dimension")?;
        let out = self.create_storage_uninit(self.binding_bytes(a.rows * b.rows)?);
        let uniform = self.create_uniform(&MatmulParams { m, n, k, _pad: 0 });

        self.dispatch(
            &self.matmul_nt_pipeline,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: a_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: b_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: out.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: uniform.as_entire_binding(),
                },
            ],
            grid_2d(n, m)?,
        );
        Ok(self.make_device_buffer(out, a.rows, b.rows))
    }

    fn row_means(&self, a: &DeviceBuffer) -> Result<DeviceBuffer> {
        let buf = gpu_buf(a)?;
        let out = self.reduce_rows(buf, a.rows, a.cols, a.cols as f32)?;
        Ok(self.make_device_buffer(out, a.rows, 1))
    }

    fn sum_diagonals(
        &self,
        matrix: &DeviceBuffer,
        staging: Option<&mut DeviceBuffer>,
    ) -> Result<DeviceBuffer> {
        let n = self.square_size(matrix)?;
        let buf = gpu_buf(matrix)?;

        let out = match staging {
            Some(staging) => {
                if staging.dim() != matrix.dim() {
                    return Err(XpcsError::ShapeMismatch {
                        what: "diagonal staging buffer",
                        expected: vec![matrix.rows, matrix.cols],
                        found: vec![staging.rows, staging.cols],
                    });
                }
                let staging_buf = gpu_buf(staging)?;
                let uniform = self.create_uniform(&SquareParams { n });
                self.dispatch(
                    &self.scatter_diagonals_pipeline,
                    &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: buf.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: staging_buf.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: uniform.as_entire_binding(),
                        },
                    ],
                    grid_2d(n, n)?,
                );
                self.reduce_rows(staging_buf, matrix.rows, matrix.cols, 1.0)?
            }
            None => {
                let out = self.create_storage_uninit(self.binding_bytes(matrix.rows)?);
                let uniform = self.create_uniform(&SquareParams { n });
                self.dispatch(
                    &self.diagonal_sum_pipeline,
                    &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: buf.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: out.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: uniform.as_entire_binding(),
                        },
                    ],
                    grid_1d(n, 1)?,
                );
                out
            }
        };
        Ok(self.make_device_buffer(out, 1, matrix.rows))
    }

    fn divide_scaled(
        &self,
        a: &DeviceBuffer,
        b: &DeviceBuffer,
        scale: f32,
    ) -> Result<DeviceBuffer> {
        check_same_dim("divisor", a, b)?;
        let (a_buf, b_buf) = (gpu_buf(a)?, gpu_buf(b)?);
        let count = to_u32(a.len(), "element count")?;
        let out = self.create_storage_uninit(self.binding_bytes(a.len())?);
        let uniform = self.create_uniform(&ScaleParams { count, scale });

        self.dispatch(
            &self.divide_scaled_pipeline,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: a_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: b_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: out.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: uniform.as_entire_binding(),
                },
            ],
            grid_1d(count, GPU_WORKGROUP)?,
        );
        Ok(self.make_device_buffer(out, a.rows, a.cols))
    }

    fn plan_fft(&self, size: usize) -> Result<FftPlan> {
        if !size.is_power_of_two() {
            return Err(XpcsError::MissingFacility(format!(
                "GPU FFT supports power-of-two lengths only, got {size}"
            )));
        }
        let bytes = self.binding_bytes(size * 2)?;
        let n = to_u32(size, "transform length")?;
        grid_1d(n, GPU_WORKGROUP)?;

        let stages = |direction: f32| -> Vec<wgpu::Buffer> {
            (0..n.trailing_zeros())
                .map(|t| {
                    self.create_uniform(&FftParams {
                        n: n >> t,
                        s: 1 << t,
                        size: n,
                        direction,
                    })
                })
                .collect()
        };

        Ok(FftPlan::new(
            size,
            PlanInner::Wgpu {
                forward_stages: stages(-1.0),
                inverse_stages: stages(1.0),
                forward_scale: self.create_uniform(&ScaleParams {
                    count: n * 2,
                    scale: 1.0,
                }),
                inverse_scale: self.create_uniform(&ScaleParams {
                    count: n * 2,
                    scale: 1.0 / n as f32,
                }),
                ping: self.create_storage_uninit(bytes),
                pong: self.create_storage_uninit(bytes),
            },
        ))
    }

    fn pad_complex(
        &self,
        signal: &DeviceBuffer,
        size: usize,
        reversed: bool,
    ) -> Result<DeviceBuffer> {
        let len = signal.len();
        if len > size {
            return Err(XpcsError::ShapeMismatch {
                what: "padded transform input",
                expected: vec![size],
                found: vec![len],
            });
        }
        let buf = gpu_buf(signal)?;
        let size_u32 = to_u32(size, "transform length")?;
        let out = self.create_storage_uninit(self.binding_bytes(size * 2)?);
        let uniform = self.create_uniform(&PadParams {
            len: to_u32(len, "signal length")?,
            size: size_u32,
            reversed: u32::from(reversed),
        });

        self.dispatch(
            &self.pad_complex_pipeline,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: out.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform.as_entire_binding(),
                },
            ],
            grid_1d(size_u32, GPU_WORKGROUP)?,
        );
        Ok(self.make_device_buffer(out, 1, size))
    }

    fn fft(
        &self,
        plan: &mut FftPlan,
        input: &DeviceBuffer,
        direction: FftDirection,
    ) -> Result<DeviceBuffer> {
        let size = plan.size();
        if input.rows != 1 || input.cols != size {
            return Err(XpcsError::ShapeMismatch {
                what: "transform input",
                expected: vec![1, size],
                found: vec![input.rows, input.cols],
            });
        }
        let src = gpu_buf(input)?;
        let (stages, scale_uniform, ping, pong) = match &plan.inner {
            PlanInner::Wgpu {
                forward_stages,
                inverse_stages,
                forward_scale,
                inverse_scale,
                ping,
                pong,
            } => match direction {
                FftDirection::Forward => (forward_stages, forward_scale, ping, pong),
                FftDirection::Inverse => (inverse_stages, inverse_scale, ping, pong),
            },
            _ => {
                return Err(XpcsError::Resource(
                    "GPU backend received a host transform plan".into(),
                ))
            }
        };

        let bytes = self.binding_bytes(size * 2)?;
        let n = to_u32(size, "transform length")?;
        let butterflies = grid_1d(n / 2, GPU_WORKGROUP)?;
        let copy_grid = grid_1d(n * 2, GPU_WORKGROUP)?;
        let out = self.create_storage_uninit(bytes);

        let fft_layout = self.fft_pipeline.get_bind_group_layout(0);
        let mut enc = self.device.create_command_encoder(&Default::default());
        enc.copy_buffer_to_buffer(src, 0, ping, 0, bytes);

        for (stage, uniform) in stages.iter().enumerate() {
            let (from, to) = if stage % 2 == 0 {
                (ping, pong)
            } else {
                (pong, ping)
            };
            let bg = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: None,
                layout: &fft_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: from.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: to.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: uniform.as_entire_binding(),
                    },
                ],
            });
            let mut pass = enc.begin_compute_pass(&Default::default());
            pass.set_pipeline(&self.fft_pipeline);
            pass.set_bind_group(0, &bg, &[]);
            pass.dispatch_workgroups(butterflies.0, butterflies.1, butterflies.2);
        }

        // Result is in ping for an even number of stages, pong for odd
        let result = if stages.len() % 2 == 0 { ping } else { pong };
        let norm_layout = self.normalize_pipeline.get_bind_group_layout(0);
        let norm_bg = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &norm_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: result.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: out.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: scale_uniform.as_entire_binding(),
                },
            ],
        });
        {
            let mut pass = enc.begin_compute_pass(&Default::default());
            pass.set_pipeline(&self.normalize_pipeline);
            pass.set_bind_group(0, &norm_bg, &[]);
            pass.dispatch_workgroups(copy_grid.0, copy_grid.1, copy_grid.2);
        }
        self.queue.submit(std::iter::once(enc.finish()));

        Ok(self.make_device_buffer(out, 1, size))
    }

    fn complex_mul(&self, a: &DeviceBuffer, b: &DeviceBuffer) -> Result<DeviceBuffer> {
        check_same_dim("complex operand", a, b)?;
        let (a_buf, b_buf) = (gpu_buf(a)?, gpu_buf(b)?);
        let count = to_u32(a.len(), "element count")?;
        let out = self.create_storage_uninit(self.binding_bytes(a.len() * 2)?);
        let uniform = self.create_uniform(&CountParams { count });

        self.dispatch(
            &self.complex_mul_pipeline,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: a_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: b_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: out.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: uniform.as_entire_binding(),
                },
            ],
            grid_1d(count, GPU_WORKGROUP)?,
        );
        Ok(self.make_device_buffer(out, a.rows, a.cols))
    }

    fn real_part(&self, input: &DeviceBuffer, count: usize) -> Result<DeviceBuffer> {
        if count > input.len() {
            return Err(XpcsError::ShapeMismatch {
                what: "real part extraction",
                expected: vec![input.len()],
                found: vec![count],
            });
        }
        let buf = gpu_buf(input)?;
        let count_u32 = to_u32(count, "element count")?;
        let out = self.create_storage_uninit(self.binding_bytes(count)?);
        let uniform = self.create_uniform(&CountParams { count: count_u32 });

        self.dispatch(
            &self.real_part_pipeline,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: out.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform.as_entire_binding(),
                },
            ],
            grid_1d(count_u32, GPU_WORKGROUP)?,
        );
        Ok(self.make_device_buffer(out, 1, count))
    }
}
