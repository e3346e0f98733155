//! Prototype layout - bucket offsets and segment mapping
//!
//! Computed once at initialization from static configuration and immutable
//! afterwards. Validation here is what keeps one prototype's visible instances
//! from spilling into its neighbour's bucket at cull time.

use super::backend::StageDispatch;
use super::{
    DrawCommand, MeshSegment, ARGS_BLOCK_SIZE, ARGS_PER_COMMAND, CULL_BLOCK_SIZE,
    RESET_BLOCK_SIZE,
};
use crate::config::CullerConfig;
use crate::error::{invalid_config, CullError, CullResult};
use crate::instance::InstanceRecord;
use std::ops::Range;

/// Static bucket layout for one culler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrototypeLayout {
    instance_counts: Vec<u32>,
    offsets: Vec<u32>,
    segment_to_prototype: Vec<u32>,
    template_commands: Vec<DrawCommand>,
    total_instance_count: u32,
}

impl PrototypeLayout {
    /// Validate the static tables against the config and build the layout
    pub fn build(
        config: &CullerConfig,
        instance_counts: &[u32],
        segments: &[MeshSegment],
        template_commands: &[DrawCommand],
    ) -> CullResult<Self> {
        config.validate()?;

        let prototype_count = config.prototype_count as usize;
        if instance_counts.len() != prototype_count {
            return Err(CullError::LengthMismatch {
                what: "per-prototype instance counts",
                expected: prototype_count,
                found: instance_counts.len(),
            });
        }

        if segments.is_empty() {
            return Err(invalid_config(
                "mesh_segments",
                0,
                "at least one mesh segment is required",
            ));
        }
        if template_commands.len() != segments.len() {
            return Err(CullError::LengthMismatch {
                what: "template draw commands",
                expected: segments.len(),
                found: template_commands.len(),
            });
        }

        let segment_to_prototype = map_segments(segments, prototype_count)?;

        let (offsets, total) = exclusive_prefix_sum(instance_counts);
        if total != u64::from(config.total_instance_count) {
            return Err(CullError::InstanceCountMismatch {
                expected: u64::from(config.total_instance_count),
                found: total,
            });
        }

        Ok(Self {
            instance_counts: instance_counts.to_vec(),
            offsets,
            segment_to_prototype,
            template_commands: template_commands.to_vec(),
            total_instance_count: config.total_instance_count,
        })
    }

    /// Per-prototype instance counts for a set of records
    pub fn count_instances(
        records: &[InstanceRecord],
        prototype_count: u32,
    ) -> CullResult<Vec<u32>> {
        let mut counts = vec![0u32; prototype_count as usize];
        for (index, record) in records.iter().enumerate() {
            let slot = counts.get_mut(record.prototype_id as usize).ok_or_else(|| {
                invalid_config(
                    "prototype_id",
                    record.prototype_id,
                    &format!("instance {} is outside {} prototypes", index, prototype_count),
                )
            })?;
            *slot += 1;
        }
        Ok(counts)
    }

    pub fn instance_counts(&self) -> &[u32] {
        &self.instance_counts
    }

    /// Exclusive prefix sum of the instance counts: bucket base per prototype
    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    pub fn segment_to_prototype(&self) -> &[u32] {
        &self.segment_to_prototype
    }

    pub fn template_commands(&self) -> &[DrawCommand] {
        &self.template_commands
    }

    pub fn total_instance_count(&self) -> u32 {
        self.total_instance_count
    }

    pub fn prototype_count(&self) -> u32 {
        self.instance_counts.len() as u32
    }

    pub fn command_count(&self) -> u32 {
        self.segment_to_prototype.len() as u32
    }

    /// Reserved slot range of a prototype's bucket in the visible output
    pub fn bucket_range(&self, prototype: usize) -> Range<u32> {
        let start = self.offsets[prototype];
        start..start + self.instance_counts[prototype]
    }

    /// Template commands as the flat 5-words-per-command upload layout
    pub fn template_words(&self) -> Vec<u32> {
        flatten_draw_commands(&self.template_commands)
    }

    /// Workgroup counts for the three stages
    pub fn stage_dispatch(&self) -> StageDispatch {
        StageDispatch {
            reset_workgroups: workgroup_count(self.prototype_count(), RESET_BLOCK_SIZE),
            cull_workgroups: workgroup_count(self.total_instance_count, CULL_BLOCK_SIZE),
            args_workgroups: workgroup_count(self.command_count(), ARGS_BLOCK_SIZE),
        }
    }
}

/// Exclusive prefix sum. Returns the offsets and the grand total.
pub fn exclusive_prefix_sum(counts: &[u32]) -> (Vec<u32>, u64) {
    let mut offsets = Vec::with_capacity(counts.len());
    let mut current: u64 = 0;
    for &count in counts {
        offsets.push(current as u32);
        current += u64::from(count);
    }
    (offsets, current)
}

/// Ceiling division of an element count by a block size
pub fn workgroup_count(elements: u32, block_size: u32) -> u32 {
    elements.div_ceil(block_size)
}

/// Flatten draw commands into the 5-words-per-command layout
pub fn flatten_draw_commands(commands: &[DrawCommand]) -> Vec<u32> {
    let mut flat = Vec::with_capacity(commands.len() * ARGS_PER_COMMAND);
    for command in commands {
        flat.extend_from_slice(&command.as_words());
    }
    flat
}

/// Rebuild flat words into draw commands. Trailing partial commands are ignored.
pub fn unflatten_draw_commands(words: &[u32]) -> Vec<DrawCommand> {
    words
        .chunks_exact(ARGS_PER_COMMAND)
        .map(DrawCommand::from_words)
        .collect()
}

/// Pre-culling draw commands for a set of segments: every instance of the
/// segment's prototype, starting at the prototype's bucket.
pub fn build_template_commands(
    instance_counts: &[u32],
    segments: &[MeshSegment],
) -> CullResult<Vec<DrawCommand>> {
    map_segments(segments, instance_counts.len())?;
    let (offsets, _) = exclusive_prefix_sum(instance_counts);

    Ok(segments
        .iter()
        .map(|segment| {
            let prototype = segment.prototype_index as usize;
            DrawCommand {
                index_count_per_instance: segment.index_count,
                instance_count: instance_counts[prototype],
                start_index: segment.start_index,
                base_vertex_index: segment.base_vertex,
                start_instance: offsets[prototype],
            }
        })
        .collect())
}

fn map_segments(segments: &[MeshSegment], prototype_count: usize) -> CullResult<Vec<u32>> {
    segments
        .iter()
        .enumerate()
        .map(|(index, segment)| {
            if (segment.prototype_index as usize) < prototype_count {
                Ok(segment.prototype_index)
            } else {
                log::error!(
                    "[Prototype Layout] Segment {} references prototype {} of {}",
                    index,
                    segment.prototype_index,
                    prototype_count
                );
                Err(CullError::PrototypeOutOfRange {
                    segment: index,
                    prototype: segment.prototype_index,
                    prototype_count,
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::instance_at;

    fn segment(prototype_index: u32) -> MeshSegment {
        MeshSegment {
            base_vertex: 100 * prototype_index,
            start_index: 36 * prototype_index,
            index_count: 36,
            prototype_index,
        }
    }

    #[test]
    fn test_offsets_are_exclusive_prefix_sum() {
        let (offsets, total) = exclusive_prefix_sum(&[2, 3, 1]);
        assert_eq!(offsets, vec![0, 2, 5]);
        assert_eq!(total, 6);
    }

    #[test]
    fn test_prefix_sum_with_empty_prototypes() {
        let (offsets, total) = exclusive_prefix_sum(&[0, 4, 0, 0, 2]);
        assert_eq!(offsets, vec![0, 0, 4, 4, 4]);
        assert_eq!(total, 6);
    }

    #[test]
    fn test_workgroup_count_rounds_up() {
        assert_eq!(workgroup_count(0, 64), 0);
        assert_eq!(workgroup_count(1, 64), 1);
        assert_eq!(workgroup_count(64, 64), 1);
        assert_eq!(workgroup_count(65, 64), 2);
        assert_eq!(workgroup_count(1000, 128), 8);
    }

    #[test]
    fn test_build_layout() {
        let counts = [2, 3, 1];
        let segments = [segment(0), segment(1), segment(1), segment(2)];
        let templates = build_template_commands(&counts, &segments).unwrap();
        let config = CullerConfig::new(6, 3, 1.0);

        let layout = PrototypeLayout::build(&config, &counts, &segments, &templates).unwrap();
        assert_eq!(layout.offsets(), &[0, 2, 5]);
        assert_eq!(layout.segment_to_prototype(), &[0, 1, 1, 2]);
        assert_eq!(layout.bucket_range(1), 2..5);
        assert_eq!(layout.command_count(), 4);
        assert_eq!(
            layout.stage_dispatch(),
            StageDispatch {
                reset_workgroups: 1,
                cull_workgroups: 1,
                args_workgroups: 1,
            }
        );
    }

    #[test]
    fn test_template_commands_point_at_buckets() {
        let segments = [segment(0), segment(2)];
        let templates = build_template_commands(&[2, 3, 1], &segments).unwrap();
        assert_eq!(
            templates[1],
            DrawCommand {
                index_count_per_instance: 36,
                instance_count: 1,
                start_index: 72,
                base_vertex_index: 200,
                start_instance: 5,
            }
        );
    }

    #[test]
    fn test_rejects_count_length_mismatch() {
        let segments = [segment(0)];
        let templates = build_template_commands(&[6], &segments).unwrap();
        let config = CullerConfig::new(6, 2, 1.0);
        let result = PrototypeLayout::build(&config, &[6], &segments, &templates);
        assert!(matches!(result, Err(CullError::LengthMismatch { expected: 2, found: 1, .. })));
    }

    #[test]
    fn test_rejects_template_length_mismatch() {
        let segments = [segment(0), segment(0)];
        let templates = build_template_commands(&[6], &segments[..1]).unwrap();
        let config = CullerConfig::new(6, 1, 1.0);
        let result = PrototypeLayout::build(&config, &[6], &segments, &templates);
        assert!(matches!(result, Err(CullError::LengthMismatch { expected: 2, found: 1, .. })));
    }

    #[test]
    fn test_rejects_out_of_range_segment() {
        let segments = [segment(0), segment(3)];
        let templates = vec![DrawCommand::default(); 2];
        let config = CullerConfig::new(6, 3, 1.0);
        let result = PrototypeLayout::build(&config, &[2, 3, 1], &segments, &templates);
        assert!(matches!(
            result,
            Err(CullError::PrototypeOutOfRange { segment: 1, prototype: 3, prototype_count: 3 })
        ));
    }

    #[test]
    fn test_rejects_counts_not_summing_to_total() {
        let segments = [segment(0)];
        let templates = vec![DrawCommand::default()];
        let config = CullerConfig::new(7, 3, 1.0);
        let result = PrototypeLayout::build(&config, &[2, 3, 1], &segments, &templates);
        assert!(matches!(
            result,
            Err(CullError::InstanceCountMismatch { expected: 7, found: 6 })
        ));
    }

    #[test]
    fn test_rejects_empty_segments() {
        let config = CullerConfig::new(6, 3, 1.0);
        let result = PrototypeLayout::build(&config, &[2, 3, 1], &[], &[]);
        assert!(matches!(result, Err(CullError::InvalidConfig { .. })));
    }

    #[test]
    fn test_count_instances() {
        let records = [
            instance_at([0.0; 3], 1),
            instance_at([0.0; 3], 0),
            instance_at([0.0; 3], 1),
        ];
        assert_eq!(PrototypeLayout::count_instances(&records, 3).unwrap(), vec![1, 2, 0]);
        assert!(PrototypeLayout::count_instances(&records, 1).is_err());
    }

    #[test]
    fn test_flatten_preserves_field_order() {
        let command = DrawCommand {
            index_count_per_instance: 1,
            instance_count: 2,
            start_index: 3,
            base_vertex_index: 4,
            start_instance: 5,
        };
        let words = flatten_draw_commands(&[command, command]);
        assert_eq!(&words[..5], &[1, 2, 3, 4, 5]);
        assert_eq!(words.len(), 10);
        assert_eq!(unflatten_draw_commands(&words), vec![command, command]);
        // Matches the raw byte layout used for the GPU upload
        assert_eq!(bytemuck::cast_slice::<DrawCommand, u32>(&[command]), &words[..5]);
    }
}
