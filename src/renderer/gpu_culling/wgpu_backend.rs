//! wgpu compute backend
//!
//! Owns the device buffer set and the three compute stages. Every cull is a
//! single submission: uniform upload, reset, cull, rewrite args, then a copy
//! of the staged arguments into the caller's indirect buffer.

use super::backend::CullBackend;
use super::prototype_layout::unflatten_draw_commands;
use super::{
    CullUniforms, DrawCommand, PrototypeLayout, ARGS_BLOCK_SIZE, ARGS_PER_COMMAND,
    CULL_BLOCK_SIZE, DRAW_COMMAND_SIZE, RESET_BLOCK_SIZE,
};
use crate::config::CullerConfig;
use crate::error::{CullError, CullResult, OptionExt};
use crate::gpu::{
    read_buffer, BindingKind, ComputeStage, DeviceBuffer, StageBinding, StageDescriptor,
};
use crate::instance::{InstanceRecord, INSTANCE_STRIDE};
use std::ops::Range;
use std::sync::Arc;

const U32_SIZE: u64 = std::mem::size_of::<u32>() as u64;

// Binding slots, shared by all entry points of frustum_cull.wgsl
const BINDING_UNIFORMS: u32 = 0;
const BINDING_SOURCE: u32 = 1;
const BINDING_VISIBLE_OUTPUT: u32 = 2;
const BINDING_VISIBLE_COUNTS: u32 = 3;
const BINDING_PROTOTYPE_OFFSETS: u32 = 4;
const BINDING_SEGMENT_TO_PROTOTYPE: u32 = 5;
const BINDING_ORIGINAL_ARGS: u32 = 6;
const BINDING_STAGING_ARGS: u32 = 7;

/// Runs the culling stages on a wgpu device
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
}

impl WgpuBackend {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self { device, queue }
    }

    /// Create a device without a surface. Fails if no adapter is available.
    pub fn request_headless() -> CullResult<Self> {
        Self::request_headless_with(|limits| limits)
    }

    /// Like [`request_headless`](Self::request_headless), with the adapter's
    /// limits passed through `adjust` before the device is requested.
    pub fn request_headless_with(
        adjust: impl FnOnce(wgpu::Limits) -> wgpu::Limits,
    ) -> CullResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .ok_or_cull(|| CullError::DeviceRequest("no compatible adapter found".to_string()))?;

        let info = adapter.get_info();
        log::info!(
            "[Wgpu Backend] Using adapter {} ({:?})",
            info.name,
            info.backend
        );

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Mass Cull Device"),
                required_features: wgpu::Features::empty(),
                required_limits: adjust(adapter.limits()),
            },
            None,
        ))?;

        Ok(Self::new(Arc::new(device), Arc::new(queue)))
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    /// Allocate the buffer set and bind it to the stages. Sizes must already
    /// have been checked against the device limits.
    fn build_resources(
        &self,
        config: &CullerConfig,
        layout: &PrototypeLayout,
        source: Arc<wgpu::Buffer>,
    ) -> GpuCullResources {
        let total = layout.total_instance_count();
        let prototype_count = layout.prototype_count();
        let command_count = layout.command_count();
        let source_binding = source_binding_size(total);

        let device = &*self.device;
        let storage = wgpu::BufferUsages::STORAGE;

        let buffers = CullBuffers {
            uniforms: DeviceBuffer::new(
                device,
                &config.labeled("Cull Uniforms"),
                1,
                std::mem::size_of::<CullUniforms>() as u64,
                wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            ),
            visible_output: DeviceBuffer::new(
                device,
                &config.labeled("Visible Instances"),
                u64::from(total),
                INSTANCE_STRIDE,
                storage | wgpu::BufferUsages::COPY_SRC,
            ),
            visible_counts: DeviceBuffer::new(
                device,
                &config.labeled("Visible Counts"),
                u64::from(prototype_count),
                U32_SIZE,
                storage | wgpu::BufferUsages::COPY_SRC,
            ),
            prototype_offsets: DeviceBuffer::with_data(
                device,
                &config.labeled("Prototype Offsets"),
                layout.offsets(),
                storage,
            ),
            segment_to_prototype: DeviceBuffer::with_data(
                device,
                &config.labeled("Segment To Prototype"),
                layout.segment_to_prototype(),
                storage,
            ),
            original_args: DeviceBuffer::with_data(
                device,
                &config.labeled("Original Draw Args"),
                &layout.template_words(),
                storage,
            ),
            staging_args: DeviceBuffer::new(
                device,
                &config.labeled("Staging Draw Args"),
                u64::from(command_count) * ARGS_PER_COMMAND as u64,
                U32_SIZE,
                storage | wgpu::BufferUsages::COPY_SRC,
            ),
            source,
        };

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Frustum Cull Shader"),
            source: wgpu::ShaderSource::Wgsl(
                include_str!("../../shaders/compute/frustum_cull.wgsl").into(),
            ),
        });

        let reset_stage = ComputeStage::new(
            device,
            &StageDescriptor {
                label: &config.labeled("Reset Counters"),
                module: &shader,
                entry_point: "reset_counters",
                bindings: &[
                    StageBinding::new(
                        BINDING_UNIFORMS,
                        BindingKind::Uniform,
                        buffers.uniforms.raw(),
                    ),
                    StageBinding::new(
                        BINDING_VISIBLE_COUNTS,
                        BindingKind::StorageReadWrite,
                        buffers.visible_counts.raw(),
                    ),
                ],
                block_size: RESET_BLOCK_SIZE,
                element_count: prototype_count,
            },
        );

        let cull_stage = ComputeStage::new(
            device,
            &StageDescriptor {
                label: &config.labeled("Frustum Cull"),
                module: &shader,
                entry_point: "frustum_cull",
                bindings: &[
                    StageBinding::new(
                        BINDING_UNIFORMS,
                        BindingKind::Uniform,
                        buffers.uniforms.raw(),
                    ),
                    StageBinding::sized(
                        BINDING_SOURCE,
                        BindingKind::StorageRead,
                        &buffers.source,
                        source_binding,
                    ),
                    StageBinding::new(
                        BINDING_VISIBLE_OUTPUT,
                        BindingKind::StorageReadWrite,
                        buffers.visible_output.raw(),
                    ),
                    StageBinding::new(
                        BINDING_VISIBLE_COUNTS,
                        BindingKind::StorageReadWrite,
                        buffers.visible_counts.raw(),
                    ),
                    StageBinding::new(
                        BINDING_PROTOTYPE_OFFSETS,
                        BindingKind::StorageRead,
                        buffers.prototype_offsets.raw(),
                    ),
                ],
                block_size: CULL_BLOCK_SIZE,
                element_count: total,
            },
        );

        let args_stage = ComputeStage::new(
            device,
            &StageDescriptor {
                label: &config.labeled("Update Draw Args"),
                module: &shader,
                entry_point: "update_draw_args",
                bindings: &[
                    StageBinding::new(
                        BINDING_UNIFORMS,
                        BindingKind::Uniform,
                        buffers.uniforms.raw(),
                    ),
                    StageBinding::new(
                        BINDING_VISIBLE_COUNTS,
                        BindingKind::StorageReadWrite,
                        buffers.visible_counts.raw(),
                    ),
                    StageBinding::new(
                        BINDING_PROTOTYPE_OFFSETS,
                        BindingKind::StorageRead,
                        buffers.prototype_offsets.raw(),
                    ),
                    StageBinding::new(
                        BINDING_SEGMENT_TO_PROTOTYPE,
                        BindingKind::StorageRead,
                        buffers.segment_to_prototype.raw(),
                    ),
                    StageBinding::new(
                        BINDING_ORIGINAL_ARGS,
                        BindingKind::StorageRead,
                        buffers.original_args.raw(),
                    ),
                    StageBinding::new(
                        BINDING_STAGING_ARGS,
                        BindingKind::StorageReadWrite,
                        buffers.staging_args.raw(),
                    ),
                ],
                block_size: ARGS_BLOCK_SIZE,
                element_count: command_count,
            },
        );

        log::debug!(
            "[Wgpu Backend] Created buffer set for '{}': workgroups reset={} cull={} args={}",
            config.label,
            reset_stage.workgroups(),
            cull_stage.workgroups(),
            args_stage.workgroups()
        );

        GpuCullResources {
            buffers,
            reset_stage,
            cull_stage,
            args_stage,
        }
    }
}

/// Device buffers owned by one initialized culler
pub struct CullBuffers {
    source: Arc<wgpu::Buffer>,
    uniforms: DeviceBuffer,
    visible_output: DeviceBuffer,
    visible_counts: DeviceBuffer,
    prototype_offsets: DeviceBuffer,
    segment_to_prototype: DeviceBuffer,
    original_args: DeviceBuffer,
    staging_args: DeviceBuffer,
}

impl CullBuffers {
    fn owned(&self) -> [&DeviceBuffer; 7] {
        [
            &self.uniforms,
            &self.visible_output,
            &self.visible_counts,
            &self.prototype_offsets,
            &self.segment_to_prototype,
            &self.original_args,
            &self.staging_args,
        ]
    }

    fn release(&self) {
        for buffer in self.owned() {
            buffer.release();
        }
    }
}

/// Buffer set plus the stages bound to it
pub struct GpuCullResources {
    buffers: CullBuffers,
    reset_stage: ComputeStage,
    cull_stage: ComputeStage,
    args_stage: ComputeStage,
}

impl GpuCullResources {
    /// Compacted visible instances, bucketed by prototype. The renderer binds
    /// this as instance data; slot `start_instance + i` of each command.
    pub fn visible_output_buffer(&self) -> &wgpu::Buffer {
        self.buffers.visible_output.raw()
    }

    pub fn source_buffer(&self) -> &Arc<wgpu::Buffer> {
        &self.buffers.source
    }

    pub fn stages(&self) -> [&ComputeStage; 3] {
        [&self.reset_stage, &self.cull_stage, &self.args_stage]
    }
}

/// Bytes of the source buffer bound to the cull stage
fn source_binding_size(total_instance_count: u32) -> u64 {
    u64::from(total_instance_count.max(1)) * INSTANCE_STRIDE
}

/// Byte size of every storage binding the stages create for `layout`
fn storage_binding_sizes(layout: &PrototypeLayout) -> [(&'static str, u64); 7] {
    let elements = |count: u32, stride: u64| u64::from(count.max(1)) * stride;
    let command_words = layout.command_count() * ARGS_PER_COMMAND as u32;
    [
        ("Instance Source", source_binding_size(layout.total_instance_count())),
        ("Visible Instances", elements(layout.total_instance_count(), INSTANCE_STRIDE)),
        ("Visible Counts", elements(layout.prototype_count(), U32_SIZE)),
        ("Prototype Offsets", elements(layout.prototype_count(), U32_SIZE)),
        ("Segment To Prototype", elements(layout.command_count(), U32_SIZE)),
        ("Original Draw Args", elements(command_words, U32_SIZE)),
        ("Staging Draw Args", elements(command_words, U32_SIZE)),
    ]
}

/// Reject bindings the device could not create, before anything is allocated
fn check_device_limits(limits: &wgpu::Limits, bindings: &[(&str, u64)]) -> CullResult<()> {
    let max_binding = u64::from(limits.max_storage_buffer_binding_size);
    for &(buffer, size) in bindings {
        let exceeded = if size > limits.max_buffer_size {
            Some(("max_buffer_size", limits.max_buffer_size))
        } else if size > max_binding {
            Some(("max_storage_buffer_binding_size", max_binding))
        } else {
            None
        };

        if let Some((limit, max)) = exceeded {
            log::error!(
                "[Wgpu Backend] '{}' needs {} bytes, over {} ({})",
                buffer,
                size,
                limit,
                max
            );
            return Err(CullError::DeviceLimit {
                buffer: buffer.to_string(),
                size,
                limit,
                max,
            });
        }
    }
    Ok(())
}

fn require_usage(buffer: &wgpu::Buffer, name: &str, usage: wgpu::BufferUsages) -> CullResult<()> {
    if buffer.usage().contains(usage) {
        Ok(())
    } else {
        Err(CullError::MissingUsage {
            buffer: name.to_string(),
            usage: format!("{:?}", usage),
        })
    }
}

impl CullBackend for WgpuBackend {
    type Source = Arc<wgpu::Buffer>;
    type Target = wgpu::Buffer;
    type Resources = GpuCullResources;

    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn create_resources(
        &self,
        config: &CullerConfig,
        layout: &PrototypeLayout,
        source: Arc<wgpu::Buffer>,
    ) -> CullResult<GpuCullResources> {
        let required = source_binding_size(layout.total_instance_count());
        if source.size() < required {
            return Err(CullError::SourceTooSmall {
                required,
                available: source.size(),
            });
        }
        require_usage(&source, "instance source", wgpu::BufferUsages::STORAGE)?;
        check_device_limits(&self.device.limits(), &storage_binding_sizes(layout))?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let resources = self.build_resources(config, layout, source);
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            resources.buffers.release();
            return Err(CullError::DeviceValidation {
                operation: "create_resources".to_string(),
                reason: error.to_string(),
            });
        }

        Ok(resources)
    }

    fn validate_target(&self, target: &wgpu::Buffer, required_bytes: u64) -> CullResult<()> {
        require_usage(target, "draw args target", wgpu::BufferUsages::COPY_DST)?;
        if target.size() < required_bytes {
            return Err(CullError::TargetTooSmall {
                required: required_bytes,
                available: target.size(),
            });
        }
        Ok(())
    }

    fn run_stages(
        &self,
        resources: &GpuCullResources,
        uniforms: &CullUniforms,
        target: &wgpu::Buffer,
    ) -> CullResult<()> {
        self.queue.write_buffer(
            resources.buffers.uniforms.raw(),
            0,
            bytemuck::bytes_of(uniforms),
        );

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Frustum Cull Encoder"),
        });

        resources.reset_stage.dispatch(&mut encoder);
        resources.cull_stage.dispatch(&mut encoder);
        resources.args_stage.dispatch(&mut encoder);

        let copy_size = u64::from(uniforms.command_count) * DRAW_COMMAND_SIZE;
        encoder.copy_buffer_to_buffer(
            resources.buffers.staging_args.raw(),
            0,
            target,
            0,
            copy_size,
        );

        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn read_visible_counts(&self, resources: &GpuCullResources) -> CullResult<Vec<u32>> {
        let counts = &resources.buffers.visible_counts;
        read_buffer(&self.device, &self.queue, counts.raw(), 0, counts.size_bytes())
    }

    fn read_visible_range(
        &self,
        resources: &GpuCullResources,
        slots: Range<u32>,
    ) -> CullResult<Vec<InstanceRecord>> {
        let output = &resources.buffers.visible_output;
        let end = u64::from(slots.end).min(output.element_count());
        let start = u64::from(slots.start).min(end);
        read_buffer(
            &self.device,
            &self.queue,
            output.raw(),
            start * INSTANCE_STRIDE,
            (end - start) * INSTANCE_STRIDE,
        )
    }

    fn read_staged_commands(&self, resources: &GpuCullResources) -> CullResult<Vec<DrawCommand>> {
        let staging = &resources.buffers.staging_args;
        let words: Vec<u32> =
            read_buffer(&self.device, &self.queue, staging.raw(), 0, staging.size_bytes())?;
        Ok(unflatten_draw_commands(&words))
    }

    fn release(&self, resources: GpuCullResources) {
        // In-flight culls may still reference the buffers
        self.device.poll(wgpu::Maintain::Wait);
        resources.buffers.release();
        log::debug!("[Wgpu Backend] Released owned cull buffers");
    }
}

impl super::FrustumCuller<WgpuBackend> {
    /// Compacted instance buffer to bind as per-instance data, once initialized
    pub fn visible_output_buffer(&self) -> Option<&wgpu::Buffer> {
        self.resources().map(GpuCullResources::visible_output_buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::gpu_culling::prototype_layout::build_template_commands;
    use crate::renderer::gpu_culling::MeshSegment;

    /// One segment per prototype
    fn layout_for(counts: &[u32]) -> PrototypeLayout {
        let segments: Vec<MeshSegment> = (0..counts.len() as u32)
            .map(|prototype_index| MeshSegment {
                index_count: 36,
                prototype_index,
                ..Default::default()
            })
            .collect();
        let templates = build_template_commands(counts, &segments).unwrap();
        let config = CullerConfig::new(counts.iter().sum(), counts.len() as u32, 1.0);
        PrototypeLayout::build(&config, counts, &segments, &templates).unwrap()
    }

    fn limits(max_binding: u32) -> wgpu::Limits {
        wgpu::Limits {
            max_storage_buffer_binding_size: max_binding,
            ..Default::default()
        }
    }

    #[test]
    fn test_binding_sizes_cover_every_storage_buffer() {
        let sizes = storage_binding_sizes(&layout_for(&[120, 80]));

        assert_eq!(sizes[0], ("Instance Source", 200 * INSTANCE_STRIDE));
        assert_eq!(sizes[1], ("Visible Instances", 200 * INSTANCE_STRIDE));
        assert_eq!(sizes[2], ("Visible Counts", 2 * U32_SIZE));
        assert_eq!(sizes[4], ("Segment To Prototype", 2 * U32_SIZE));
        assert_eq!(sizes[6], ("Staging Draw Args", 2 * DRAW_COMMAND_SIZE));
    }

    #[test]
    fn test_empty_population_still_binds_one_record() {
        let sizes = storage_binding_sizes(&layout_for(&[0, 0]));
        assert_eq!(sizes[0].1, INSTANCE_STRIDE);
        assert_eq!(sizes[1].1, INSTANCE_STRIDE);
    }

    #[test]
    fn test_oversized_binding_is_rejected() {
        let sizes = storage_binding_sizes(&layout_for(&[120, 80]));
        let result = check_device_limits(&limits(4096), &sizes);

        match result {
            Err(CullError::DeviceLimit {
                buffer,
                size,
                limit,
                max,
            }) => {
                assert_eq!(buffer, "Instance Source");
                assert_eq!(size, 9600);
                assert_eq!(limit, "max_storage_buffer_binding_size");
                assert_eq!(max, 4096);
            }
            other => panic!("expected DeviceLimit, got {:?}", other),
        }
    }

    #[test]
    fn test_buffer_size_limit_checked_first() {
        let tight = wgpu::Limits {
            max_buffer_size: 1024,
            max_storage_buffer_binding_size: 512,
            ..Default::default()
        };
        let result = check_device_limits(&tight, &[("Visible Instances", 2048)]);
        assert!(matches!(
            result,
            Err(CullError::DeviceLimit { limit: "max_buffer_size", max: 1024, .. })
        ));
    }

    #[test]
    fn test_bindings_within_limits_pass() {
        let sizes = storage_binding_sizes(&layout_for(&[30, 20]));
        assert!(check_device_limits(&limits(4096), &sizes).is_ok());
    }
}
