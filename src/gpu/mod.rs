//! GPU resource primitives
//!
//! Thin, explicit wrappers over wgpu used by the culling stages.

pub mod compute_stage;
pub mod device_buffer;

pub use compute_stage::{BindingKind, ComputeStage, StageBinding, StageDescriptor};
pub use device_buffer::{read_buffer, DeviceBuffer};
