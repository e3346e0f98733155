//! Renderer Module - GPU-driven instance culling

pub mod gpu_culling;

pub use gpu_culling::{FrustumCuller, GpuFrustumCuller};
