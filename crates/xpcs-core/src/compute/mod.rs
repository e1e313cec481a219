mod backend;
pub mod cpu;
#[cfg(feature = "gpu")]
pub mod wgpu_backend;

pub(crate) use backend::{BufferInner, PlanInner};
pub use backend::{
    create_backend, BufferLocation, ComputeBackend, DevicePreference, DeviceBuffer, FftDirection,
    FftPlan,
};
