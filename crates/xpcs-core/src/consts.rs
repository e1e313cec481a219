/// Minimum element count (rows*cols) to use Rayon parallelism on host arrays.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Minimum bin count before `parallel_bins` actually fans out over the Rayon pool.
pub const PARALLEL_BIN_THRESHOLD: usize = 2;

/// Scale factor applied to every bin unless the caller overrides it.
pub const DEFAULT_SCALE_FACTOR: f32 = 1.0;

/// Relative tolerance expected between f32 algorithm variants.
pub const F32_RELATIVE_TOLERANCE: f32 = 1e-4;

/// Workgroup edge for 2D compute dispatches (16x16 threads).
pub const GPU_TILE: u32 = 16;

/// Workgroup size for 1D compute dispatches and per-row reductions.
pub const GPU_WORKGROUP: u32 = 256;

/// Largest workgroup count wgpu accepts along one dispatch dimension.
pub const GPU_MAX_WORKGROUPS_PER_DIM: u32 = 65_535;

/// Magic bytes at the start of a frame stack file.
pub const STACK_MAGIC: &[u8; 8] = b"XPCSSTK1";

/// Size in bytes of the frame stack file header.
pub const STACK_HEADER_SIZE: usize = 32;

/// Current frame stack file format version.
pub const STACK_FORMAT_VERSION: u32 = 1;
