//! Host reference backend
//!
//! Runs the same three stages on rayon's pool. Lanes claim bucket slots with
//! an atomic fetch-add exactly like the compute shader does, so slot order
//! inside a bucket is unspecified here too.

use super::backend::CullBackend;
use super::prototype_layout::unflatten_draw_commands;
use super::{
    transform_point, CullUniforms, DrawCommand, Frustum, Plane, PrototypeLayout, ARGS_PER_COMMAND,
};
use crate::config::CullerConfig;
use crate::error::{CullError, CullResult};
use crate::instance::{InstanceRecord, INSTANCE_STRIDE};
use cgmath::Matrix4;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Instance source shared with whatever generates the instances
pub type HostInstances = Arc<RwLock<Vec<InstanceRecord>>>;

/// Caller-owned draw argument words, 5 per command
#[derive(Debug, Default)]
pub struct HostDrawArgs {
    words: Mutex<Vec<u32>>,
}

impl HostDrawArgs {
    /// Zeroed arguments for `command_count` commands
    pub fn new(command_count: usize) -> Self {
        Self::with_words(vec![0; command_count * ARGS_PER_COMMAND])
    }

    pub fn with_words(words: Vec<u32>) -> Self {
        Self {
            words: Mutex::new(words),
        }
    }

    pub fn from_commands(commands: &[DrawCommand]) -> Self {
        Self::with_words(commands.iter().flat_map(|c| c.as_words()).collect())
    }

    pub fn size_bytes(&self) -> u64 {
        (self.words.lock().len() * std::mem::size_of::<u32>()) as u64
    }

    pub fn words(&self) -> Vec<u32> {
        self.words.lock().clone()
    }

    pub fn commands(&self) -> Vec<DrawCommand> {
        unflatten_draw_commands(&self.words.lock())
    }

    fn copy_from(&self, staged: &[u32]) {
        let mut words = self.words.lock();
        words[..staged.len()].copy_from_slice(staged);
    }
}

/// Host-side counterpart of the device buffer set
pub struct HostCullBuffers {
    source: HostInstances,
    visible_output: RwLock<Vec<InstanceRecord>>,
    visible_counts: Vec<AtomicU32>,
    prototype_offsets: Vec<u32>,
    bucket_capacity: Vec<u32>,
    segment_to_prototype: Vec<u32>,
    original_args: Vec<u32>,
    staging_args: RwLock<Vec<u32>>,
}

impl HostCullBuffers {
    pub fn source(&self) -> &HostInstances {
        &self.source
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }

    fn reset_counters(buffers: &HostCullBuffers) {
        buffers
            .visible_counts
            .par_iter()
            .for_each(|counter| counter.store(0, Ordering::Relaxed));
    }

    fn cull_and_compact(buffers: &HostCullBuffers, uniforms: &CullUniforms) {
        let frustum = Frustum::from_planes(
            uniforms
                .frustum_planes
                .map(|p| Plane::new([p[0], p[1], p[2]], p[3])),
        );
        let transform = Matrix4::from(uniforms.global_transform);
        let prototype_count = uniforms.prototype_count as usize;
        let radius = uniforms.bounding_sphere_radius;

        let placed: Vec<(usize, InstanceRecord)> = {
            let source = buffers.source.read();
            let lanes = (uniforms.total_instance_count as usize).min(source.len());

            source[..lanes]
                .par_iter()
                .filter_map(|record| {
                    let prototype = record.prototype_id as usize;
                    if prototype >= prototype_count {
                        return None;
                    }
                    let world = transform_point(&transform, record.position);
                    if !frustum.intersects_sphere(world, radius) {
                        return None;
                    }
                    let slot = buffers.visible_counts[prototype].fetch_add(1, Ordering::Relaxed);
                    (slot < buffers.bucket_capacity[prototype]).then(|| {
                        ((buffers.prototype_offsets[prototype] + slot) as usize, *record)
                    })
                })
                .collect()
        };

        let mut output = buffers.visible_output.write();
        for (slot, record) in placed {
            output[slot] = record;
        }
    }

    fn rewrite_args(buffers: &HostCullBuffers) {
        let mut staging = buffers.staging_args.write();
        staging
            .par_chunks_mut(ARGS_PER_COMMAND)
            .zip(buffers.original_args.par_chunks(ARGS_PER_COMMAND))
            .zip(buffers.segment_to_prototype.par_iter())
            .for_each(|((staged, original), &prototype)| {
                let prototype = prototype as usize;
                let visible = buffers.visible_counts[prototype]
                    .load(Ordering::Relaxed)
                    .min(buffers.bucket_capacity[prototype]);

                staged.copy_from_slice(original);
                staged[1] = visible;
                staged[4] = buffers.prototype_offsets[prototype];
            });
    }
}

impl CullBackend for CpuBackend {
    type Source = HostInstances;
    type Target = HostDrawArgs;
    type Resources = HostCullBuffers;

    fn name(&self) -> &'static str {
        "cpu"
    }

    fn create_resources(
        &self,
        config: &CullerConfig,
        layout: &PrototypeLayout,
        source: HostInstances,
    ) -> CullResult<HostCullBuffers> {
        let total = layout.total_instance_count() as usize;
        let available = source.read().len();
        if available < total {
            return Err(CullError::SourceTooSmall {
                required: total as u64 * INSTANCE_STRIDE,
                available: available as u64 * INSTANCE_STRIDE,
            });
        }

        log::debug!(
            "[Cpu Backend] Allocating host buffers for '{}': {} instances, {} prototypes, \
             {} commands",
            config.label,
            total,
            layout.prototype_count(),
            layout.command_count()
        );

        Ok(HostCullBuffers {
            source,
            visible_output: RwLock::new(vec![InstanceRecord::default(); total]),
            visible_counts: (0..layout.prototype_count()).map(|_| AtomicU32::new(0)).collect(),
            prototype_offsets: layout.offsets().to_vec(),
            bucket_capacity: layout.instance_counts().to_vec(),
            segment_to_prototype: layout.segment_to_prototype().to_vec(),
            original_args: layout.template_words(),
            staging_args: RwLock::new(vec![0; layout.command_count() as usize * ARGS_PER_COMMAND]),
        })
    }

    fn validate_target(&self, target: &HostDrawArgs, required_bytes: u64) -> CullResult<()> {
        let available = target.size_bytes();
        if available < required_bytes {
            return Err(CullError::TargetTooSmall {
                required: required_bytes,
                available,
            });
        }
        Ok(())
    }

    fn run_stages(
        &self,
        resources: &HostCullBuffers,
        uniforms: &CullUniforms,
        target: &HostDrawArgs,
    ) -> CullResult<()> {
        Self::reset_counters(resources);
        Self::cull_and_compact(resources, uniforms);
        Self::rewrite_args(resources);
        target.copy_from(&resources.staging_args.read());
        Ok(())
    }

    fn read_visible_counts(&self, resources: &HostCullBuffers) -> CullResult<Vec<u32>> {
        Ok(resources
            .visible_counts
            .iter()
            .map(|counter| counter.load(Ordering::Relaxed))
            .collect())
    }

    fn read_visible_range(
        &self,
        resources: &HostCullBuffers,
        slots: Range<u32>,
    ) -> CullResult<Vec<InstanceRecord>> {
        let output = resources.visible_output.read();
        let end = (slots.end as usize).min(output.len());
        let start = (slots.start as usize).min(end);
        Ok(output[start..end].to_vec())
    }

    fn read_staged_commands(&self, resources: &HostCullBuffers) -> CullResult<Vec<DrawCommand>> {
        Ok(unflatten_draw_commands(&resources.staging_args.read()))
    }

    fn release(&self, resources: HostCullBuffers) {
        log::trace!(
            "[Cpu Backend] Releasing {} visible slots",
            resources.visible_output.read().len()
        );
        drop(resources);
    }
}
