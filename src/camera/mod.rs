/// Camera Module - Data-Oriented Programming (DOP) style
///
/// A minimal frustum provider for the culler:
/// - camera_data.rs: Pure data structures with NO methods
/// - camera_operations.rs: Pure functions that operate on data

pub mod camera_data;
pub mod camera_operations;

// Re-export data structures
pub use camera_data::CameraData;

// Re-export all operations
pub use camera_operations::{
    build_projection_matrix, build_view_matrix, build_view_projection, calculate_forward_vector,
    camera_frustum, init_camera,
};
