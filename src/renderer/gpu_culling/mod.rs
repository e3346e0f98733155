/// GPU-Driven Instance Culling
///
/// Culls instances against the camera frustum and compacts the survivors into
/// per-prototype buckets, then rewrites the indirect draw arguments so one
/// multi-draw call covers only visible geometry.
///
/// Pipeline per invocation: reset counters -> cull + compact -> rewrite args -> copy.
use bytemuck::{Pod, Zeroable};
use cgmath::{InnerSpace, Matrix4, Vector3, Vector4};
use static_assertions::const_assert_eq;

pub mod backend;
pub mod cpu_backend;
pub mod frustum_culler;
pub mod prototype_layout;
pub mod wgpu_backend;

pub use backend::{CullBackend, StageDispatch};
pub use cpu_backend::{CpuBackend, HostCullBuffers, HostDrawArgs, HostInstances};
pub use frustum_culler::{CullOutcome, CullerState, FrustumCuller, SkipReason};
pub use prototype_layout::{build_template_commands, PrototypeLayout};
pub use wgpu_backend::{GpuCullResources, WgpuBackend};

/// Culler driven by wgpu compute stages
pub type GpuFrustumCuller = FrustumCuller<WgpuBackend>;
/// Culler driven by the rayon reference stages
pub type CpuFrustumCuller = FrustumCuller<CpuBackend>;

/// Lanes per workgroup for the reset stage (one lane per prototype)
pub const RESET_BLOCK_SIZE: u32 = 64;
/// Lanes per workgroup for the cull stage (one lane per instance)
pub const CULL_BLOCK_SIZE: u32 = 128;
/// Lanes per workgroup for the rewrite-args stage (one lane per draw command)
pub const ARGS_BLOCK_SIZE: u32 = 64;
/// u32 words per indirect draw command
pub const ARGS_PER_COMMAND: usize = 5;
/// Byte size of one indirect draw command
pub const DRAW_COMMAND_SIZE: u64 = (ARGS_PER_COMMAND * std::mem::size_of::<u32>()) as u64;

/// A plane in Hessian normal form: dot(normal, p) + distance = 0
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Plane {
    pub normal: [f32; 3],
    pub distance: f32,
}

impl Plane {
    pub const fn new(normal: [f32; 3], distance: f32) -> Self {
        Self { normal, distance }
    }

    /// Scale so the normal has unit length. Degenerate planes are returned as-is.
    pub fn normalized(self) -> Self {
        let [x, y, z] = self.normal;
        let length = (x * x + y * y + z * z).sqrt();
        if length > 0.0 {
            Self {
                normal: [x / length, y / length, z / length],
                distance: self.distance / length,
            }
        } else {
            self
        }
    }

    /// Signed distance from a point to the plane (positive on the inside)
    #[inline]
    pub fn distance_to_point(&self, point: [f32; 3]) -> f32 {
        self.normal[0] * point[0]
            + self.normal[1] * point[1]
            + self.normal[2] * point[2]
            + self.distance
    }

    pub fn as_array(&self) -> [f32; 4] {
        [self.normal[0], self.normal[1], self.normal[2], self.distance]
    }
}

impl From<Vector4<f32>> for Plane {
    fn from(v: Vector4<f32>) -> Self {
        Plane::new([v.x, v.y, v.z], v.w)
    }
}

/// Six clip planes: left, right, bottom, top, near, far
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    pub fn from_planes(planes: [Plane; 6]) -> Self {
        Self { planes }
    }

    /// Extract planes from a view-projection matrix (OpenGL clip space, as
    /// produced by `cgmath::perspective`) using the Gribb-Hartmann method
    pub fn from_view_projection(vp: &Matrix4<f32>) -> Self {
        let m = vp;
        let row = |i: usize| Vector4::new(m.x[i], m.y[i], m.z[i], m.w[i]);
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        Self {
            planes: [
                // Left
                Plane::from(r3 + r0).normalized(),
                // Right
                Plane::from(r3 - r0).normalized(),
                // Bottom
                Plane::from(r3 + r1).normalized(),
                // Top
                Plane::from(r3 - r1).normalized(),
                // Near
                Plane::from(r3 + r2).normalized(),
                // Far
                Plane::from(r3 - r2).normalized(),
            ],
        }
    }

    /// Planes as `vec4<f32>` rows for GPU upload
    pub fn as_arrays(&self) -> [[f32; 4]; 6] {
        self.planes.map(|plane| plane.as_array())
    }

    /// Sphere-vs-six-planes test. Conservative: never rejects a sphere that
    /// touches the frustum, may accept some that do not.
    pub fn intersects_sphere(&self, center: [f32; 3], radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(center) >= -radius)
    }
}

/// Transform a local position by a global transform (w = 1)
pub fn transform_point(transform: &Matrix4<f32>, point: [f32; 3]) -> [f32; 3] {
    let p = transform * Vector4::new(point[0], point[1], point[2], 1.0);
    [p.x, p.y, p.z]
}

/// Largest axis scale of the transform's linear part. Multiplying a local
/// bounding radius by this keeps the sphere test conservative.
pub fn max_axis_scale(transform: &Matrix4<f32>) -> f32 {
    let axis = |c: Vector4<f32>| Vector3::new(c.x, c.y, c.z).magnitude();
    axis(transform.x)
        .max(axis(transform.y))
        .max(axis(transform.z))
}

/// Drawable sub-range of the merged prototype mesh
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MeshSegment {
    pub base_vertex: u32,
    pub start_index: u32,
    pub index_count: u32,
    /// Prototype this segment draws (bucket index)
    pub prototype_index: u32,
}

/// Indirect indexed draw arguments, laid out as wgpu's `drawIndexedIndirect` block
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawCommand {
    pub index_count_per_instance: u32,
    pub instance_count: u32,
    pub start_index: u32,
    pub base_vertex_index: u32,
    pub start_instance: u32,
}

const_assert_eq!(std::mem::size_of::<DrawCommand>(), DRAW_COMMAND_SIZE as usize);

impl DrawCommand {
    pub fn as_words(&self) -> [u32; ARGS_PER_COMMAND] {
        [
            self.index_count_per_instance,
            self.instance_count,
            self.start_index,
            self.base_vertex_index,
            self.start_instance,
        ]
    }

    pub fn from_words(words: &[u32]) -> Self {
        Self {
            index_count_per_instance: words[0],
            instance_count: words[1],
            start_index: words[2],
            base_vertex_index: words[3],
            start_instance: words[4],
        }
    }
}

/// Per-invocation culling uniforms
/// Must match `CullUniforms` in frustum_cull.wgsl exactly
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CullUniforms {
    /// Six planes (xyz = normal, w = distance)
    pub frustum_planes: [[f32; 4]; 6],
    /// Global transform applied to instance positions (column-major)
    pub global_transform: [[f32; 4]; 4],
    pub total_instance_count: u32,
    pub prototype_count: u32,
    pub command_count: u32,
    /// Bounding radius already scaled by the global transform
    pub bounding_sphere_radius: f32,
}

const_assert_eq!(std::mem::size_of::<CullUniforms>(), 176);

/// Culling statistics derived from a readback
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CullingStats {
    pub total_instances: u32,
    pub visible_instances: u32,
    pub prototype_count: u32,
    pub draw_commands: u32,
    /// Draw commands whose instance count was rewritten to zero
    pub empty_draw_commands: u32,
}

impl CullingStats {
    pub fn culled_instances(&self) -> u32 {
        self.total_instances.saturating_sub(self.visible_instances)
    }
}
