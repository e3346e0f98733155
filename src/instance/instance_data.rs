//! Instance data - Pure DOP
//!
//! The per-instance record written by the instance-generation collaborator
//! (crowd or grass simulation) and read by the culling stages. The culler never
//! interprets anything but `position` and `prototype_id`; everything else is
//! copied verbatim into the visible output.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

/// Per-instance pose plus prototype id
/// Must match `InstanceRecord` in frustum_cull.wgsl exactly
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceRecord {
    /// Local position (transformed by the culler's global transform)
    pub position: [f32; 3],
    /// Index into the prototype offset table
    pub prototype_id: u32,
    /// Rotation quaternion (x, y, z, w)
    pub rotation: [f32; 4],
    /// Non-uniform scale
    pub scale: [f32; 3],
    /// Padding to 16 bytes
    pub _padding: f32,
}

/// Byte stride of one instance record on the device
pub const INSTANCE_STRIDE: u64 = std::mem::size_of::<InstanceRecord>() as u64;

const_assert_eq!(std::mem::size_of::<InstanceRecord>(), 48);
const_assert_eq!(std::mem::align_of::<InstanceRecord>(), 4);

impl Default for InstanceRecord {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            prototype_id: 0,
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0; 3],
            _padding: 0.0,
        }
    }
}
