// Mass Cull - GPU instance culling for crowd rendering
//
// Each frame the culler tests every instance's bounding sphere against the
// camera frustum, compacts the survivors into per-prototype buckets and
// rewrites the indirect draw arguments so one multi-draw covers only what is
// visible.
//
// Layout follows the Data-Oriented split used throughout:
// - *_data modules hold plain structures
// - *_operations modules hold pure functions over them
// - renderer::gpu_culling owns the stateful orchestrator

// Core modules
pub mod config;
pub mod error;

// Systems
pub mod camera;
pub mod gpu;
pub mod instance;
pub mod renderer;

pub use camera::{camera_frustum, CameraData};
pub use config::CullerConfig;
pub use error::{CullError, CullResult, ErrorContext, OptionExt};
pub use instance::{instance_at, InstanceRecord, INSTANCE_STRIDE};
pub use renderer::gpu_culling::{
    build_template_commands, CpuBackend, CpuFrustumCuller, CullBackend, CullOutcome, CullerState,
    CullingStats, DrawCommand, Frustum, FrustumCuller, GpuFrustumCuller, HostDrawArgs,
    HostInstances, MeshSegment, Plane, PrototypeLayout, SkipReason, WgpuBackend,
};

// Re-export wgpu so callers can build source and target buffers against the same version
pub use wgpu;
