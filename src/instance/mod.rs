/// Instance Records
///
/// Data-oriented instance storage consumed by the culling stages.
/// Pure data plus a few free functions, no instance "objects".

// Data structures
pub mod instance_data;

pub use instance_data::{InstanceRecord, INSTANCE_STRIDE};

/// Create an instance at a position with identity rotation and unit scale
pub fn instance_at(position: [f32; 3], prototype_id: u32) -> InstanceRecord {
    InstanceRecord {
        position,
        prototype_id,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_at_defaults() {
        let record = instance_at([1.0, 2.0, 3.0], 7);
        assert_eq!(record.position, [1.0, 2.0, 3.0]);
        assert_eq!(record.prototype_id, 7);
        assert_eq!(record.rotation, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(record.scale, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_record_bytes_match_stride() {
        let record = instance_at([0.5, -1.0, 4.0], 3);
        let bytes = bytemuck::bytes_of(&record);
        assert_eq!(bytes.len() as u64, INSTANCE_STRIDE);
        let back: InstanceRecord = *bytemuck::from_bytes(bytes);
        assert_eq!(back, record);
    }
}
